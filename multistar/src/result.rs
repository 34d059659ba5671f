//! Per-frame guiding results

use std::fmt;

use serde::{Deserialize, Serialize};
use shared_wasm::FrameOutcomeKind;

use crate::controller::ExposureInfo;
use crate::point::{PixelPoint, StarMeasurement};

/// How a frame was resolved. Everything except `Nominal` drops the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameOutcome {
    Nominal,
    /// No primary star has been selected
    NoTargetSelected,
    /// No pool star was detected
    AllPointsLost,
    /// Stars were detected but none passed the eligibility gates
    NoEligibleContributors,
    /// The admission checker rejected the solution as a jump
    JumpRejected,
}

impl FrameOutcome {
    pub fn is_dropped(&self) -> bool {
        !matches!(self, FrameOutcome::Nominal)
    }

    /// Status text shown for a dropped frame
    pub fn drop_status(&self) -> &'static str {
        match self {
            FrameOutcome::Nominal => "",
            FrameOutcome::NoTargetSelected => "No star selected",
            FrameOutcome::AllPointsLost => "Star lost",
            FrameOutcome::NoEligibleContributors | FrameOutcome::JumpRejected => "Recovering",
        }
    }
}

impl fmt::Display for FrameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameOutcome::Nominal => "nominal",
            FrameOutcome::NoTargetSelected => "no target selected",
            FrameOutcome::AllPointsLost => "all points lost",
            FrameOutcome::NoEligibleContributors => "no eligible contributors",
            FrameOutcome::JumpRejected => "jump rejected",
        };
        f.write_str(name)
    }
}

impl From<FrameOutcome> for FrameOutcomeKind {
    fn from(outcome: FrameOutcome) -> Self {
        match outcome {
            FrameOutcome::Nominal => FrameOutcomeKind::Nominal,
            FrameOutcome::NoTargetSelected => FrameOutcomeKind::NoTargetSelected,
            FrameOutcome::AllPointsLost => FrameOutcomeKind::AllPointsLost,
            FrameOutcome::NoEligibleContributors => FrameOutcomeKind::NoEligibleContributors,
            FrameOutcome::JumpRejected => FrameOutcomeKind::JumpRejected,
        }
    }
}

/// Offset of the solution from the lock position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuiderOffset {
    pub camera: PixelPoint,
    /// Same offset in mount axes; None when the mount is uncalibrated
    pub mount: Option<PixelPoint>,
}

/// Error/status record reported with every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameErrorInfo {
    pub outcome: FrameOutcome,
    pub mass: f64,
    pub snr: f64,
    pub hfd: f64,
    pub status: String,
}

impl FrameErrorInfo {
    /// Record for a dropped frame, carrying the display star's quality if any.
    pub fn dropped(outcome: FrameOutcome, display: Option<&StarMeasurement>) -> Self {
        let m = display.copied().unwrap_or_default();
        Self {
            outcome,
            mass: m.mass,
            snr: m.snr,
            hfd: m.hfd,
            status: outcome.drop_status().to_string(),
        }
    }

    /// Record for an accepted frame.
    pub fn nominal(display: &StarMeasurement, exposure: &ExposureInfo) -> Self {
        Self {
            outcome: FrameOutcome::Nominal,
            mass: display.mass,
            snr: display.snr,
            hfd: display.hfd,
            status: star_status(display, exposure),
        }
    }
}

/// Short quality summary for an accepted star, e.g. `m=5230 SNR=24.1 Exp=1.5 s`.
///
/// The exposure is only mentioned under auto-exposure since it otherwise
/// never changes.
pub fn star_status(star: &StarMeasurement, exposure: &ExposureInfo) -> String {
    let mut status = format!("m={:.0} SNR={:.1}", star.mass, star.snr);
    if star.saturated {
        status.push_str(" Saturated");
    }
    if exposure.auto_exposure {
        if exposure.duration_ms >= 1000 {
            status.push_str(&format!(" Exp={:.1} s", exposure.duration_ms as f64 / 1000.0));
        } else {
            status.push_str(&format!(" Exp={} ms", exposure.duration_ms));
        }
    }
    status
}

/// Stars that contributed this frame and the session peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StarCount {
    pub used: u32,
    pub max: u32,
}

impl fmt::Display for StarCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.used, self.max)
    }
}

/// Everything the guiding core reports for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameResult {
    pub outcome: FrameOutcome,
    /// Solution position; None once tracking has been lost
    pub solution: Option<PixelPoint>,
    /// Offset from lock, present only on accepted frames with a lock position
    pub offset: Option<GuiderOffset>,
    /// Solution distance from lock (RA-only uses |dx|), 0 without a lock
    pub distance: f64,
    pub error_info: FrameErrorInfo,
    pub star_count: StarCount,
}

impl FrameResult {
    pub fn is_dropped(&self) -> bool {
        self.outcome.is_dropped()
    }

    pub(crate) fn dropped(
        outcome: FrameOutcome,
        solution: Option<PixelPoint>,
        display: Option<&StarMeasurement>,
        star_count: StarCount,
    ) -> Self {
        Self {
            outcome,
            solution,
            offset: None,
            distance: 0.0,
            error_info: FrameErrorInfo::dropped(outcome, display),
            star_count,
        }
    }
}
