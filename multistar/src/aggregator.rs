//! Multi-star guide position aggregator
//!
//! Every pool star is tracked relative to its own reference point. The guide
//! solution is the SNR-weighted mean of the eligible stars' displacements
//! from their references, added to the lock position. When a star drops out
//! the remaining stars carry the displacement. When it comes back it must be
//! detected for [`REACQUIRE_GOOD_FRAMES`] consecutive frames, after which its
//! reference is re-anchored so that its current displacement equals the
//! current aggregate. Stars therefore enter and leave the solution without
//! stepping it.
//!
//! [`REACQUIRE_GOOD_FRAMES`]: crate::point::REACQUIRE_GOOD_FRAMES

use ndarray::ArrayView2;
use shared_wasm::{StarSlotStatus, Timestamp};

use crate::callback::GuideEvent;
use crate::detector::SearchHint;
use crate::diagnostics::{FrameSummary, MembershipTracker, RejectionCounts};
use crate::mass::adjusted_mass;
use crate::point::{PixelPoint, PoolStar, StarMeasurement, StarState};
use crate::result::{FrameErrorInfo, FrameOutcome, FrameResult, StarCount};
use crate::session::SessionError;
use crate::strategy::{GuideEnv, GuideStrategy};

/// SNR-weighted mean accumulator.
#[derive(Debug, Default)]
struct WeightedMean {
    sum_w: f64,
    sum_x: f64,
    sum_y: f64,
}

impl WeightedMean {
    fn add(&mut self, value: PixelPoint, weight: f64) {
        self.sum_w += weight;
        self.sum_x += weight * value.x;
        self.sum_y += weight * value.y;
    }

    fn mean(&self) -> Option<PixelPoint> {
        (self.sum_w > 0.0).then(|| PixelPoint::new(self.sum_x / self.sum_w, self.sum_y / self.sum_w))
    }
}

/// Index of the highest-SNR measurement; ties go to the first.
fn best_by_snr<'a>(
    candidates: impl Iterator<Item = (usize, &'a StarMeasurement)>,
) -> Option<(usize, &'a StarMeasurement)> {
    let mut best: Option<(usize, &StarMeasurement)> = None;
    for (i, m) in candidates {
        if best.map_or(true, |(_, b)| m.snr > b.snr) {
            best = Some((i, m));
        }
    }
    best
}

/// Measurement of pool star `i` if it was detected this frame.
fn found_measurement<'a>(
    pool: &'a [PoolStar],
    states: &[StarState],
    i: usize,
) -> Option<&'a StarMeasurement> {
    if states[i].found_this_frame {
        pool[i].measurement.as_ref()
    } else {
        None
    }
}

/// Per-pass bookkeeping, turned into a [`FrameSummary`] when observed.
#[derive(Debug, Default)]
struct PassTally {
    found: usize,
    rejected: RejectionCounts,
    used_indices: Vec<usize>,
    distance: f64,
    displacement: Option<PixelPoint>,
}

/// Multi-star guiding strategy.
#[derive(Debug, Default)]
pub struct MultiStarGuider {
    pool: Vec<PoolStar>,
    states: Vec<StarState>,
    /// Primary position at selection; None until a star is selected
    selected_primary: Option<PixelPoint>,
    /// Published solution
    solution: Option<PixelPoint>,
    /// Displacement of the last accepted solution
    last_displacement: Option<PixelPoint>,
    display: Option<StarMeasurement>,
    used: u32,
    max_used: u32,
    tracker: MembershipTracker,
}

impl MultiStarGuider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(&self) -> &[PoolStar] {
        &self.pool
    }

    pub fn states(&self) -> &[StarState] {
        &self.states
    }

    fn star_count_now(&self) -> StarCount {
        StarCount {
            used: self.used,
            max: self.max_used,
        }
    }

    fn publish_summary(&mut self, env: &GuideEnv<'_>, outcome: FrameOutcome, tally: PassTally) {
        if env.callbacks.is_empty() {
            return;
        }

        let mut summary = FrameSummary {
            outcome: Some(outcome),
            pool_size: self.pool.len(),
            found: tally.found,
            used: tally.used_indices.len(),
            primary_contributing: tally.used_indices.first() == Some(&0),
            distance: tally.distance,
            displacement: tally.displacement,
            delta: None,
            rejected: tally.rejected,
            used_indices: tally.used_indices,
            added: Vec::new(),
            removed: Vec::new(),
        };

        if self.tracker.observe(&mut summary) {
            log::debug!(
                "multistar: pool={} found={} used={} primary={} added={:?} removed={:?}",
                summary.pool_size,
                summary.found,
                summary.used,
                summary.primary_contributing,
                summary.added,
                summary.removed
            );
            env.callbacks
                .emit(&GuideEvent::MembershipChanged(summary.clone()));
        }
        env.callbacks.emit(&GuideEvent::Frame(summary));
    }

    /// Drop the frame, reset auto-exposure and force the checker to wait.
    fn drop_frame(
        &mut self,
        env: &mut GuideEnv<'_>,
        now: Timestamp,
        outcome: FrameOutcome,
        tally: PassTally,
    ) -> FrameResult {
        env.controller.reset_auto_exposure();
        env.activate_checker(now);
        self.publish_summary(env, outcome, tally);
        FrameResult::dropped(
            outcome,
            self.solution,
            self.display.as_ref(),
            self.star_count_now(),
        )
    }
}

impl GuideStrategy for MultiStarGuider {
    fn select(&mut self, pool: &[PixelPoint]) -> Result<(), SessionError> {
        let Some(&primary) = pool.first() else {
            return Err(SessionError::EmptyPool);
        };
        if let Some(bad) = pool.iter().position(|p| !p.is_finite()) {
            return Err(SessionError::NonFinitePosition(bad));
        }

        self.invalidate(true);
        // Secondaries anchor on the first frame they are eligible.
        self.pool = pool
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                if i == 0 {
                    PoolStar::new(p, primary)
                } else {
                    PoolStar::unanchored(p, primary)
                }
            })
            .collect();
        self.states = vec![StarState::default(); pool.len()];
        self.selected_primary = Some(primary);

        log::info!(
            "multistar: selected {} stars, primary at ({:.2}, {:.2})",
            pool.len(),
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
        for state in &mut self.states {
            state.begin_frame();
        }
        let mut tally = PassTally::default();

        let Some(selected_primary) = self.selected_primary.filter(|_| !self.pool.is_empty()) else {
            self.solution = None;
            self.display = None;
            self.used = 0;
            env.activate_checker(now);
            self.publish_summary(env, FrameOutcome::NoTargetSelected, tally);
            return FrameResult::dropped(
                FrameOutcome::NoTargetSelected,
                None,
                None,
                self.star_count_now(),
            );
        };

        let exposure = env.controller.exposure();
        let mass_threshold = env.config.mass_threshold();
        let use_secondaries = env.config.multi_star_mode
            && self.pool.len() > 1
            && !env.controller.use_subframes();
        let active = if use_secondaries { self.pool.len() } else { 1 };
        let search_origin = self.solution.unwrap_or(selected_primary);

        let mut eligible = vec![false; active];
        for i in 0..active {
            let star = &mut self.pool[i];
            let state = &mut self.states[i];

            let hint = match state.last_pos {
                Some(pos) => SearchHint::Near(pos),
                None if i == 0 => SearchHint::FullFrame,
                None => SearchHint::Near(search_origin + star.offset_from_primary),
            };

            let measurement = match env.finder.find_star(frame, hint, env.config.search_region) {
                Ok(m) => m,
                Err(e) => {
                    log::trace!("multistar: star {i} not found: {e}");
                    star.was_lost = true;
                    state.mark_lost();
                    tally.rejected.not_found += 1;
                    continue;
                }
            };

            tally.found += 1;
            star.record(&measurement);
            state.mark_found(measurement.position, star.was_lost);

            let mass_reject = match mass_threshold {
                Some(threshold) => {
                    let mass = adjusted_mass(measurement.mass, &exposure);
                    state.mass.check(now, mass, threshold).reject
                }
                None => false,
            };
            if mass_reject {
                tally.rejected.mass += 1;
            }
            let gated_in = state.gated_in();
            if !gated_in {
                tally.rejected.reacquire_gate += 1;
            }
            eligible[i] = gated_in && !mass_reject;
        }

        if tally.found == 0 {
            self.solution = None;
            self.display = None;
            self.used = 0;
            return self.drop_frame(env, now, FrameOutcome::AllPointsLost, tally);
        }

        // Baseline from stars with trusted references, so reacquired and
        // newly anchored stars join at the current displacement. With none
        // trusted, returning stars measure against their old references so
        // motion during the loss is kept.
        let mut trusted = WeightedMean::default();
        let mut returning = WeightedMean::default();
        for i in (0..active).filter(|&i| eligible[i]) {
            let star = &self.pool[i];
            if let (Some(m), Some(d)) = (star.measurement, star.displacement(star.position)) {
                if star.was_lost {
                    returning.add(d, m.weight());
                } else {
                    trusted.add(d, m.weight());
                }
            }
        }
        let baseline = trusted
            .mean()
            .or_else(|| returning.mean())
            .or(self.last_displacement)
            .unwrap_or_default();

        for i in (0..active).filter(|&i| eligible[i]) {
            let star = &mut self.pool[i];
            let reacquired = star.was_lost && self.states[i].gated_in();
            if reacquired || star.reference.is_none() {
                let old_reference = star.reference;
                let new_reference = star.position - baseline;
                star.reference = Some(new_reference);
                if reacquired {
                    log::debug!(
                        "multistar: reacquired star {i} at ({:.2}, {:.2}), reference re-anchored",
                        star.position.x,
                        star.position.y
                    );
                    if !env.callbacks.is_empty() {
                        env.callbacks.emit(&GuideEvent::Reacquired {
                            index: i,
                            position: star.position,
                            baseline,
                            old_reference,
                            new_reference,
                        });
                    }
                }
            }
            star.was_lost = false;
        }

        let mut final_mean = WeightedMean::default();
        for i in (0..active).filter(|&i| eligible[i]) {
            let star = &self.pool[i];
            if let (Some(m), Some(d)) = (star.measurement, star.displacement(star.position)) {
                final_mean.add(d, m.weight());
                self.states[i].contributing_this_frame = true;
                tally.used_indices.push(i);
            }
        }

        let best_eligible = best_by_snr(
            tally
                .used_indices
                .iter()
                .filter_map(|&i| found_measurement(&self.pool, &self.states, i).map(|m| (i, m))),
        )
        .map(|(_, m)| *m);

        let (Some(displacement), Some(display)) = (final_mean.mean(), best_eligible) else {
            self.display = best_by_snr(
                (0..active).filter_map(|i| found_measurement(&self.pool, &self.states, i).map(|m| (i, m))),
            )
            .map(|(_, m)| *m);
            self.used = 0;
            return self.drop_frame(env, now, FrameOutcome::NoEligibleContributors, tally);
        };

        let lock = env.controller.lock_position();
        let candidate = lock.unwrap_or(selected_primary) + displacement;

        self.used = tally.used_indices.len() as u32;
        self.max_used = self.max_used.max(self.used);
        self.display = Some(display);

        let measured = env.measure_offset(candidate);
        tally.distance = measured.distance;
        tally.displacement = Some(displacement);

        if !env.admit(measured.distance, now) {
            // Point state keeps this frame's updates; only the solution is held.
            tally.rejected.jump = true;
            env.controller.reset_auto_exposure();
            self.publish_summary(env, FrameOutcome::JumpRejected, tally);
            let mut result = FrameResult::dropped(
                FrameOutcome::JumpRejected,
                self.solution,
                Some(&display),
                self.star_count_now(),
            );
            result.distance = measured.distance;
            return result;
        }

        self.solution = Some(candidate);
        self.last_displacement = Some(displacement);
        env.notify_accepted(&display, &measured);
        self.publish_summary(env, FrameOutcome::Nominal, tally);

        log::trace!(
            "multistar: solution ({:.3}, {:.3}) from {} stars, distance {:.3}",
            candidate.x,
            candidate.y,
            self.used,
            measured.distance
        );

        FrameResult {
            outcome: FrameOutcome::Nominal,
            solution: Some(candidate),
            offset: measured.offset,
            distance: measured.distance,
            error_info: FrameErrorInfo::nominal(&display, &exposure),
            star_count: self.star_count_now(),
        }
    }

    fn invalidate(&mut self, full_reset: bool) {
        if full_reset {
            self.selected_primary = None;
        }
        self.solution = None;
        self.last_displacement = None;
        self.display = None;
        self.used = 0;
        self.max_used = 0;
        for state in &mut self.states {
            *state = StarState::default();
        }
        self.tracker.reset();
    }

    fn is_locked(&self) -> bool {
        self.solution.is_some()
    }

    fn current_position(&self) -> Option<PixelPoint> {
        self.solution
    }

    fn primary_star(&self) -> Option<&PoolStar> {
        self.pool.first()
    }

    fn display_star(&self) -> Option<StarMeasurement> {
        self.display
    }

    fn star_count(&self) -> StarCount {
        self.star_count_now()
    }

    fn slots(&self) -> Vec<StarSlotStatus> {
        self.pool
            .iter()
            .zip(&self.states)
            .enumerate()
            .map(|(index, (star, state))| StarSlotStatus {
                index,
                x: state.last_pos.map(|p| p.x),
                y: state.last_pos.map(|p| p.y),
                found: state.found_this_frame,
                contributing: state.contributing_this_frame,
                lost: star.was_lost,
                reacquire_good_count: state.reacquire_good_count,
            })
            .collect()
    }
}
