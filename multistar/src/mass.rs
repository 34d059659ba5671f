//! Per-star mass-change outlier rejection
//!
//! Each pool star keeps its own flux history over a sliding window and a pair
//! of adaptive watermarks derived from the running median. A detection whose
//! flux falls far below the low watermark, far above the high watermark, or
//! spikes well above the current median is flagged as an outlier. The low
//! watermark drifts toward the median every update so that a genuine, slow
//! change in flux (focus, transparency) moves the bounds instead of locking the
//! star out permanently.

use std::collections::VecDeque;
use std::time::Duration;

use shared_wasm::Timestamp;

use crate::controller::ExposureInfo;

/// Length of the flux history window.
pub const MASS_WINDOW: Duration = Duration::from_millis(45_000);

/// Samples required before the filter starts rejecting.
pub const MIN_MASS_SAMPLES: usize = 5;

/// Fraction of the gap to the median the low watermark closes per update.
pub const LOW_MASS_DRIFT: f64 = 0.05;

/// Adaptive flux bounds derived from the running median.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Watermarks {
    pub low: f64,
    pub high: f64,
}

/// Result of checking one detection's flux.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassCheck {
    /// Detection should not contribute this frame
    pub reject: bool,
    /// Exposure-normalized flux that was recorded
    pub adjusted_mass: f64,
    /// Median of the history, once enough samples exist
    pub median: Option<f64>,
}

/// Flux history and watermarks for one pool star.
#[derive(Debug, Clone, Default)]
pub struct MassChecker {
    history: VecDeque<(Timestamp, f64)>,
    watermarks: Option<Watermarks>,
}

/// Normalize a raw mass by exposure time when auto-exposure may change it.
pub fn adjusted_mass(mass: f64, exposure: &ExposureInfo) -> f64 {
    if exposure.auto_exposure && exposure.duration_ms > 0 {
        mass / exposure.duration_ms as f64
    } else {
        mass
    }
}

/// Median by selection; upper median for even counts. Empty input yields None.
pub fn select_median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mid = values.len() / 2;
    let (_, median, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    Some(*median)
}

impl MassChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `adjusted_mass` at `now` and decide whether it is an outlier.
    ///
    /// `threshold` is a fraction, e.g. 0.5 allows a 50% excursion from the
    /// watermarks before rejecting.
    pub fn check(&mut self, now: Timestamp, adjusted_mass: f64, threshold: f64) -> MassCheck {
        let oldest = now.saturating_sub(MASS_WINDOW);
        while self
            .history
            .front()
            .is_some_and(|(time, _)| *time < oldest)
        {
            self.history.pop_front();
        }

        // History must stay time-ordered even if a caller hands us a stale timestamp.
        let stamp = match self.history.back() {
            Some((last, _)) if *last > now => *last,
            _ => now,
        };
        self.history.push_back((stamp, adjusted_mass));

        if self.history.len() < MIN_MASS_SAMPLES {
            return MassCheck {
                reject: false,
                adjusted_mass,
                median: None,
            };
        }

        let mut values: Vec<f64> = self.history.iter().map(|(_, mass)| *mass).collect();
        let Some(median) = select_median(&mut values) else {
            return MassCheck {
                reject: false,
                adjusted_mass,
                median: None,
            };
        };

        let marks = match self.watermarks {
            Some(prev) => {
                let mut low = prev.low.min(median);
                low += LOW_MASS_DRIFT * (median - low);
                Watermarks {
                    low,
                    high: prev.high.max(median),
                }
            }
            None => Watermarks {
                low: median,
                high: median,
            },
        };
        self.watermarks = Some(marks);

        let low = marks.low * (1.0 - threshold);
        let high = marks.high * (1.0 + threshold);
        let spike = median * (1.0 + 2.0 * threshold);
        let reject = adjusted_mass < low || adjusted_mass > high || adjusted_mass > spike;

        if reject {
            log::debug!(
                "mass reject: m={adjusted_mass:.3} median={median:.3} low={:.3} high={:.3}",
                marks.low,
                marks.high
            );
        }

        MassCheck {
            reject,
            adjusted_mass,
            median: Some(median),
        }
    }

    /// Current watermarks, None until enough samples have been seen.
    pub fn watermarks(&self) -> Option<Watermarks> {
        self.watermarks
    }

    /// Number of samples currently inside the window.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.watermarks = None;
    }
}
