//! Legacy single-star guiding
//!
//! Guides on the primary star alone: the solution is the star's measured
//! position. Shares the admission checker, mass filter and result types with
//! the multi-star guider so sessions can switch strategies by configuration.

use ndarray::ArrayView2;
use shared_wasm::{StarSlotStatus, Timestamp};

use crate::detector::SearchHint;
use crate::mass::adjusted_mass;
use crate::point::{PixelPoint, PoolStar, StarMeasurement, StarState};
use crate::result::{FrameErrorInfo, FrameOutcome, FrameResult, StarCount};
use crate::session::SessionError;
use crate::strategy::{GuideEnv, GuideStrategy};

#[derive(Debug, Default)]
pub struct SingleStarGuider {
    star: Option<PoolStar>,
    state: StarState,
    solution: Option<PixelPoint>,
    display: Option<StarMeasurement>,
    used: u32,
    max_used: u32,
}

impl SingleStarGuider {
    pub fn new() -> Self {
        Self::default()
    }

    fn count(&self) -> StarCount {
        StarCount {
            used: self.used,
            max: self.max_used,
        }
    }
}

impl GuideStrategy for SingleStarGuider {
    fn select(&mut self, pool: &[PixelPoint]) -> Result<(), SessionError> {
        let Some(&primary) = pool.first() else {
            return Err(SessionError::EmptyPool);
        };
        if !primary.is_finite() {
            return Err(SessionError::NonFinitePosition(0));
        }
        if pool.len() > 1 {
            log::debug!(
                "single star guider ignoring {} secondary stars",
                pool.len() - 1
            );
        }

        self.invalidate(true);
        self.star = Some(PoolStar::new(primary, primary));
        self.state.last_pos = Some(primary);
        log::info!(
            "single star: selected ({:.2}, {:.2})",
            primary.x,
            primary.y
        );
        Ok(())
    }

    fn update_position(
        &mut self,
        frame: ArrayView2<'_, u16>,
        now: Timestamp,
        env: &mut GuideEnv<'_>,
    ) -> FrameResult {
        self.state.begin_frame();
        self.used = 0;

        let Some(star) = self.star.as_mut() else {
            self.solution = None;
            self.display = None;
            env.activate_checker(now);
            return FrameResult::dropped(FrameOutcome::NoTargetSelected, None, None, self.count());
        };

        let hint = match self.state.last_pos {
            Some(pos) => SearchHint::Near(pos),
            None => SearchHint::FullFrame,
        };
        let measurement = match env.finder.find_star(frame, hint, env.config.search_region) {
            Ok(m) => m,
            Err(e) => {
                log::debug!("single star: lost: {e}");
                star.was_lost = true;
                self.state.mark_lost();
                self.solution = None;
                self.display = None;
                env.controller.reset_auto_exposure();
                env.activate_checker(now);
                return FrameResult::dropped(FrameOutcome::AllPointsLost, None, None, self.count());
            }
        };

        star.record(&measurement);
        star.was_lost = false;
        // A single star has nothing to hand over to, so it is usable immediately.
        self.state.mark_found(measurement.position, false);
        self.display = Some(measurement);

        let exposure = env.controller.exposure();
        if let Some(threshold) = env.config.mass_threshold() {
            let mass = adjusted_mass(measurement.mass, &exposure);
            if self.state.mass.check(now, mass, threshold).reject {
                env.controller.reset_auto_exposure();
                env.activate_checker(now);
                return FrameResult::dropped(
                    FrameOutcome::NoEligibleContributors,
                    self.solution,
                    Some(&measurement),
                    self.count(),
                );
            }
        }

        self.state.contributing_this_frame = true;
        self.used = 1;
        self.max_used = 1;

        let candidate = measurement.position;
        let measured = env.measure_offset(candidate);
        if !env.admit(measured.distance, now) {
            env.controller.reset_auto_exposure();
            let mut result = FrameResult::dropped(
                FrameOutcome::JumpRejected,
                self.solution,
                Some(&measurement),
                self.count(),
            );
            result.distance = measured.distance;
            return result;
        }

        self.solution = Some(candidate);
        env.notify_accepted(&measurement, &measured);

        FrameResult {
            outcome: FrameOutcome::Nominal,
            solution: Some(candidate),
            offset: measured.offset,
            distance: measured.distance,
            error_info: FrameErrorInfo::nominal(&measurement, &exposure),
            star_count: self.count(),
        }
    }

    fn invalidate(&mut self, full_reset: bool) {
        if full_reset {
            self.star = None;
        }
        self.state = StarState::default();
        self.solution = None;
        self.display = None;
        self.used = 0;
        self.max_used = 0;
    }

    fn is_locked(&self) -> bool {
        self.solution.is_some()
    }

    fn current_position(&self) -> Option<PixelPoint> {
        self.solution
    }

    fn primary_star(&self) -> Option<&PoolStar> {
        self.star.as_ref()
    }

    fn display_star(&self) -> Option<StarMeasurement> {
        self.display
    }

    fn star_count(&self) -> StarCount {
        self.count()
    }

    fn slots(&self) -> Vec<StarSlotStatus> {
        self.star
            .iter()
            .map(|star| StarSlotStatus {
                index: 0,
                x: self.state.last_pos.map(|p| p.x),
                y: self.state.last_pos.map(|p| p.y),
                found: self.state.found_this_frame,
                contributing: self.state.contributing_this_frame,
                lost: star.was_lost,
                reacquire_good_count: self.state.reacquire_good_count,
            })
            .collect()
    }
}
