//! Jump admission state machine
//!
//! Decides whether a frame's offset from the lock position is trustworthy
//! enough to hand to the mount. A large offset opens a grace period during
//! which large offsets are rejected; if the offset is still large when the
//! grace period expires the checker gives up and admits everything until
//! offsets shrink again. The timeout admission keeps the control loop from
//! ever being starved of updates.
//!
//! ```text
//!            large                 timeout (admits)
//! Guiding ----------> Waiting -------------------> Recovering
//!    ^   <----------    |                              |
//!    |      small       | large, not expired           |
//!    |                  v (rejects)                    |
//!    +-------------------------------------------------+
//!                         small
//! ```

use std::fmt;
use std::time::Duration;

use shared_wasm::{AdmissionStateKind, Timestamp};

use crate::controller::ErrorStatistics;

/// Grace period before a persistent large offset is admitted anyway.
pub const WAIT_INTERVAL: Duration = Duration::from_millis(5000);

/// Tolerance applied after a total loss of usable stars.
pub const FORCED_TOLERANCE: f64 = 2.0;

/// Error samples required before offsets are judged at all.
pub const MIN_FRAMES_FOR_STATS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionState {
    #[default]
    Guiding,
    Waiting,
    Recovering,
}

impl fmt::Display for AdmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionState::Guiding => write!(f, "guiding"),
            AdmissionState::Waiting => write!(f, "waiting"),
            AdmissionState::Recovering => write!(f, "recovering"),
        }
    }
}

impl From<AdmissionState> for AdmissionStateKind {
    fn from(state: AdmissionState) -> Self {
        match state {
            AdmissionState::Guiding => AdmissionStateKind::Guiding,
            AdmissionState::Waiting => AdmissionStateKind::Waiting,
            AdmissionState::Recovering => AdmissionStateKind::Recovering,
        }
    }
}

/// Result of the distance-acceptability test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceCheck {
    pub small_offset: bool,
    /// Smoothed recent error, None when statistics were bypassed
    pub avg_dist: Option<f64>,
    /// `tolerance * avg_dist`, None when statistics were bypassed
    pub threshold: Option<f64>,
}

/// Compare `distance` against `tolerance` times the smoothed recent error.
///
/// Without a tolerance, or before enough statistics exist, every offset is
/// considered small.
pub fn check_distance(
    distance: f64,
    tolerance: Option<f64>,
    stats: &ErrorStatistics,
) -> DistanceCheck {
    let bypass = DistanceCheck {
        small_offset: true,
        avg_dist: None,
        threshold: None,
    };

    let Some(tolerance) = tolerance else {
        return bypass;
    };
    if !stats.guiding
        || stats.paused
        || stats.settling
        || stats.error_frame_count < MIN_FRAMES_FOR_STATS
    {
        return bypass;
    }

    let avg_dist = stats.smoothed_error;
    let threshold = tolerance * avg_dist;
    let small_offset = distance <= threshold;
    if !small_offset {
        log::debug!(
            "DistanceChecker: reject for large offset ({distance:.2} > {threshold:.2}) avgDist = {avg_dist:.2} count = {}",
            stats.error_frame_count
        );
    }

    DistanceCheck {
        small_offset,
        avg_dist: Some(avg_dist),
        threshold: Some(threshold),
    }
}

/// What caused an admission state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionEventKind {
    /// Entered Waiting (large offset or forced activation)
    Activate,
    /// Returned to Guiding
    Deactivate,
    /// Waiting expired, entered Recovering
    Timeout,
}

/// A state transition, reported to diagnostics observers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionTransition {
    pub event: AdmissionEventKind,
    /// State after the transition
    pub state: AdmissionState,
    /// Tolerance in effect, None when the distance test was disabled
    pub tolerance: Option<f64>,
    pub avg_dist: Option<f64>,
    pub threshold: Option<f64>,
    /// Offset that triggered the transition, None for forced activation
    pub distance: Option<f64>,
}

/// Outcome of one admission decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    pub admitted: bool,
    /// State change taken while deciding, if any
    pub transition: Option<AdmissionTransition>,
}

/// Hysteresis checker owned by the guiding session.
#[derive(Debug, Clone)]
pub struct DistanceChecker {
    state: AdmissionState,
    expires: Option<Timestamp>,
    forced_tolerance: Option<f64>,
    wait_interval: Duration,
}

impl Default for DistanceChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl DistanceChecker {
    pub fn new() -> Self {
        Self::with_wait_interval(WAIT_INTERVAL)
    }

    pub fn with_wait_interval(wait_interval: Duration) -> Self {
        Self {
            state: AdmissionState::Guiding,
            expires: None,
            forced_tolerance: None,
            wait_interval,
        }
    }

    pub fn state(&self) -> AdmissionState {
        self.state
    }

    /// Tolerance override active after a forced activation
    pub fn forced_tolerance(&self) -> Option<f64> {
        self.forced_tolerance
    }

    /// When Waiting escalates to Recovering
    pub fn expires(&self) -> Option<Timestamp> {
        self.expires
    }

    /// Back to Guiding with no override; used at session start and reselection.
    pub fn reset(&mut self) {
        self.state = AdmissionState::Guiding;
        self.expires = None;
        self.forced_tolerance = None;
    }

    /// Force Guiding -> Waiting with the lenient forced tolerance.
    ///
    /// Called when a frame had no usable stars. Has no effect unless the checker
    /// is Guiding, so repeated losses do not restart the grace period.
    pub fn activate(&mut self, now: Timestamp) -> Option<AdmissionTransition> {
        if self.state != AdmissionState::Guiding {
            return None;
        }

        log::debug!("DistanceChecker: activated");
        self.state = AdmissionState::Waiting;
        self.expires = Some(now.saturating_add(self.wait_interval));
        self.forced_tolerance = Some(FORCED_TOLERANCE);

        Some(AdmissionTransition {
            event: AdmissionEventKind::Activate,
            state: self.state,
            tolerance: self.forced_tolerance,
            avg_dist: None,
            threshold: None,
            distance: None,
        })
    }

    /// Decide whether a frame at `distance` from lock is admitted.
    ///
    /// `tolerance` is the configured multiplier, None when jump tolerance is
    /// disabled; a forced tolerance overrides it either way.
    pub fn check(
        &mut self,
        distance: f64,
        tolerance: Option<f64>,
        stats: &ErrorStatistics,
        now: Timestamp,
    ) -> Admission {
        let tolerance = self.forced_tolerance.or(tolerance);
        let check = check_distance(distance, tolerance, stats);
        let transition = |event, state| AdmissionTransition {
            event,
            state,
            tolerance,
            avg_dist: check.avg_dist,
            threshold: check.threshold,
            distance: Some(distance),
        };

        match self.state {
            AdmissionState::Guiding => {
                if check.small_offset {
                    return Admission {
                        admitted: true,
                        transition: None,
                    };
                }
                log::debug!("DistanceChecker: activated");
                self.state = AdmissionState::Waiting;
                self.expires = Some(now.saturating_add(self.wait_interval));
                Admission {
                    admitted: false,
                    transition: Some(transition(AdmissionEventKind::Activate, self.state)),
                }
            }
            AdmissionState::Waiting => {
                if check.small_offset {
                    log::debug!("DistanceChecker: deactivated");
                    self.state = AdmissionState::Guiding;
                    self.expires = None;
                    self.forced_tolerance = None;
                    return Admission {
                        admitted: true,
                        transition: Some(transition(AdmissionEventKind::Deactivate, self.state)),
                    };
                }
                if self.expires.is_some_and(|expires| now < expires) {
                    return Admission {
                        admitted: false,
                        transition: None,
                    };
                }
                // Still large at the end of the grace period: admit anyway.
                log::debug!("DistanceChecker: begin recovering");
                self.state = AdmissionState::Recovering;
                Admission {
                    admitted: true,
                    transition: Some(transition(AdmissionEventKind::Timeout, self.state)),
                }
            }
            AdmissionState::Recovering => {
                if !check.small_offset {
                    return Admission {
                        admitted: true,
                        transition: None,
                    };
                }
                log::debug!("DistanceChecker: deactivated");
                self.state = AdmissionState::Guiding;
                self.expires = None;
                self.forced_tolerance = None;
                Admission {
                    admitted: true,
                    transition: Some(transition(AdmissionEventKind::Deactivate, self.state)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(smoothed_error: f64) -> ErrorStatistics {
        ErrorStatistics {
            guiding: true,
            paused: false,
            settling: false,
            error_frame_count: 50,
            smoothed_error,
        }
    }

    fn at(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn test_bootstrap_bypass() {
        let mut s = stats(0.5);
        s.error_frame_count = MIN_FRAMES_FOR_STATS - 1;
        assert!(check_distance(100.0, Some(4.0), &s).small_offset);

        let mut s = stats(0.5);
        s.paused = true;
        assert!(check_distance(100.0, Some(4.0), &s).small_offset);

        let mut s = stats(0.5);
        s.settling = true;
        assert!(check_distance(100.0, Some(4.0), &s).small_offset);

        let mut s = stats(0.5);
        s.guiding = false;
        let check = check_distance(100.0, Some(4.0), &s);
        assert!(check.small_offset);
        assert!(check.avg_dist.is_none());
    }

    #[test]
    fn test_threshold_is_tolerance_times_average() {
        let check = check_distance(2.0, Some(4.0), &stats(0.5));
        assert!(check.small_offset);
        assert_eq!(check.threshold, Some(2.0));

        assert!(!check_distance(2.01, Some(4.0), &stats(0.5)).small_offset);
        assert!(check_distance(1000.0, None, &stats(0.5)).small_offset);
    }

    #[test]
    fn test_full_hysteresis_cycle() {
        let mut checker = DistanceChecker::new();
        let s = stats(1.0);

        // Small offset while guiding
        assert!(checker.check(1.0, Some(4.0), &s, at(0)).admitted);
        assert_eq!(checker.state(), AdmissionState::Guiding);

        // First large offset opens the grace period and is rejected
        let first = checker.check(10.0, Some(4.0), &s, at(1_000));
        assert!(!first.admitted);
        assert_eq!(checker.state(), AdmissionState::Waiting);
        assert_eq!(
            first.transition.map(|t| t.event),
            Some(AdmissionEventKind::Activate)
        );

        // Second large offset inside 5 s is still rejected
        assert!(!checker.check(10.0, Some(4.0), &s, at(4_000)).admitted);
        assert_eq!(checker.state(), AdmissionState::Waiting);

        // After the timer expires the large offset is admitted
        let timeout = checker.check(10.0, Some(4.0), &s, at(6_000));
        assert!(timeout.admitted);
        assert_eq!(checker.state(), AdmissionState::Recovering);
        assert_eq!(
            timeout.transition.map(|t| t.event),
            Some(AdmissionEventKind::Timeout)
        );

        // Large offsets keep being admitted while recovering
        assert!(checker.check(10.0, Some(4.0), &s, at(7_000)).admitted);
        assert_eq!(checker.state(), AdmissionState::Recovering);

        // A small offset returns to guiding
        assert!(checker.check(1.0, Some(4.0), &s, at(8_000)).admitted);
        assert_eq!(checker.state(), AdmissionState::Guiding);
    }

    #[test]
    fn test_waiting_small_offset_clears_forced_tolerance() {
        let mut checker = DistanceChecker::new();
        assert!(checker.activate(at(0)).is_some());
        assert_eq!(checker.state(), AdmissionState::Waiting);
        assert_eq!(checker.forced_tolerance(), Some(FORCED_TOLERANCE));

        // Forced tolerance 2.0 applies even though the configured one is 100
        assert!(!checker.check(3.0, Some(100.0), &stats(1.0), at(100)).admitted);

        let back = checker.check(1.5, Some(100.0), &stats(1.0), at(200));
        assert!(back.admitted);
        assert_eq!(checker.state(), AdmissionState::Guiding);
        assert_eq!(checker.forced_tolerance(), None);
    }

    #[test]
    fn test_activate_is_idempotent() {
        let mut checker = DistanceChecker::new();
        assert!(checker.activate(at(0)).is_some());
        let expires = checker.expires();
        assert!(checker.activate(at(2_000)).is_none());
        assert_eq!(checker.expires(), expires);

        // Also a no-op while recovering
        checker.check(50.0, None, &stats(1.0), at(6_000));
        assert_eq!(checker.state(), AdmissionState::Recovering);
        assert!(checker.activate(at(6_100)).is_none());
        assert_eq!(checker.state(), AdmissionState::Recovering);
    }

    #[test]
    fn test_forced_tolerance_cleared_leaving_recovering() {
        let mut checker = DistanceChecker::new();
        checker.activate(at(0));
        checker.check(50.0, None, &stats(1.0), at(5_000));
        assert_eq!(checker.state(), AdmissionState::Recovering);

        checker.check(0.5, None, &stats(1.0), at(5_100));
        assert_eq!(checker.state(), AdmissionState::Guiding);
        assert_eq!(checker.forced_tolerance(), None);

        // The next total loss can activate again
        assert!(checker.activate(at(6_000)).is_some());
    }

    #[test]
    fn test_reset() {
        let mut checker = DistanceChecker::new();
        checker.activate(at(0));
        checker.reset();
        assert_eq!(checker.state(), AdmissionState::Guiding);
        assert_eq!(checker.forced_tolerance(), None);
        assert_eq!(checker.expires(), None);
    }
}
