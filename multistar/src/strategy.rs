//! Guiding strategy interface
//!
//! A session runs exactly one strategy, chosen at construction. Strategies own
//! their star pool and solution state; everything shared with the rest of the
//! system is lent to them per frame through [`GuideEnv`].

use ndarray::ArrayView2;
use shared_wasm::{StarSlotStatus, Timestamp};

use crate::admission::{AdmissionTransition, DistanceChecker};
use crate::callback::{CallbackRegistry, GuideEvent};
use crate::config::MultiStarConfig;
use crate::controller::FrameController;
use crate::detector::StarFinder;
use crate::point::{PixelPoint, PoolStar, StarMeasurement};
use crate::result::{FrameResult, GuiderOffset, StarCount};
use crate::session::SessionError;

/// Collaborators lent to a strategy for one frame.
pub struct GuideEnv<'a> {
    pub finder: &'a mut dyn StarFinder,
    pub controller: &'a mut dyn FrameController,
    pub checker: &'a mut DistanceChecker,
    pub callbacks: &'a CallbackRegistry,
    pub config: &'a MultiStarConfig,
}

impl GuideEnv<'_> {
    /// Force the checker into Waiting after a total loss of usable stars.
    pub(crate) fn activate_checker(&mut self, now: Timestamp) {
        if let Some(transition) = self.checker.activate(now) {
            self.publish_transition(transition);
        }
    }

    pub(crate) fn publish_transition(&self, transition: AdmissionTransition) {
        if !self.callbacks.is_empty() {
            self.callbacks.emit(&GuideEvent::Admission(transition));
        }
    }

    /// Run the admission checker on a solution's distance from lock.
    pub(crate) fn admit(&mut self, distance: f64, now: Timestamp) -> bool {
        let stats = self.controller.error_statistics(self.controller.ra_only());
        let admission = self
            .checker
            .check(distance, self.config.jump_tolerance(), &stats, now);
        if let Some(transition) = admission.transition {
            self.publish_transition(transition);
        }
        admission.admitted
    }

    /// Distance and offset of `solution` from the lock position.
    pub(crate) fn measure_offset(&self, solution: PixelPoint) -> LockOffset {
        let Some(lock) = self.controller.lock_position() else {
            return LockOffset::default();
        };
        let camera = solution - lock;
        let mount = self.controller.camera_to_mount(camera);
        let distance = if self.controller.ra_only() {
            camera.x.abs()
        } else {
            camera.norm()
        };
        LockOffset {
            distance,
            distance_ra: mount.map_or(0.0, |m| m.x.abs()),
            offset: Some(GuiderOffset { camera, mount }),
        }
    }

    /// Tell the controller about an accepted frame.
    pub(crate) fn notify_accepted(&mut self, display: &StarMeasurement, measured: &LockOffset) {
        self.controller
            .update_current_distance(measured.distance, measured.distance_ra);
        self.controller.adjust_auto_exposure(display.snr);
    }
}

/// A solution's offset from the lock position; all zero without a lock.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct LockOffset {
    pub distance: f64,
    /// RA component in mount axes, 0 when uncalibrated
    pub distance_ra: f64,
    pub offset: Option<GuiderOffset>,
}

pub trait GuideStrategy: Send {
    /// Replace the pool. Index 0 becomes the primary.
    fn select(&mut self, pool: &[PixelPoint]) -> Result<(), SessionError>;

    /// Process one frame and produce its result.
    fn update_position(
        &mut self,
        frame: ArrayView2<'_, u16>,
        timestamp: Timestamp,
        env: &mut GuideEnv<'_>,
    ) -> FrameResult;

    /// Discard solution and runtime state. A full reset also forgets the
    /// selected primary.
    fn invalidate(&mut self, full_reset: bool);

    /// A valid solution exists
    fn is_locked(&self) -> bool;

    fn current_position(&self) -> Option<PixelPoint>;

    fn primary_star(&self) -> Option<&PoolStar>;

    /// Star whose quality is reported for the latest frame
    fn display_star(&self) -> Option<StarMeasurement>;

    fn star_count(&self) -> StarCount;

    /// Per-slot status for display
    fn slots(&self) -> Vec<StarSlotStatus>;
}
