//! Guiding session: owns the strategy and everything it is lent per frame

use std::sync::{Arc, Mutex};

use ndarray::ArrayView2;
use shared_wasm::{GuiderStatus, Timestamp};
use thiserror::Error;

use crate::admission::DistanceChecker;
use crate::aggregator::MultiStarGuider;
use crate::callback::{CallbackId, CallbackRegistry, GuideEvent};
use crate::config::{ConfigError, MultiStarConfig, StrategyKind};
use crate::controller::FrameController;
use crate::detector::StarFinder;
use crate::point::PixelPoint;
use crate::result::FrameResult;
use crate::single::SingleStarGuider;
use crate::strategy::{GuideEnv, GuideStrategy};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Star selection must contain at least a primary star")]
    EmptyPool,

    #[error("Star {0} has a non-finite position")]
    NonFinitePosition(usize),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// One guiding run: star pool, admission checker and collaborators.
///
/// Frames are processed strictly one at a time. Other threads observe the
/// session through the status snapshot from [`GuidingSession::status_handle`],
/// which is replaced at the end of every pass.
pub struct GuidingSession<F: StarFinder, C: FrameController> {
    config: MultiStarConfig,
    strategy: Box<dyn GuideStrategy>,
    checker: DistanceChecker,
    finder: F,
    controller: C,
    callbacks: CallbackRegistry,
    status: Arc<Mutex<GuiderStatus>>,
    frames_processed: u64,
}

fn build_strategy(kind: StrategyKind) -> Box<dyn GuideStrategy> {
    match kind {
        StrategyKind::MultiStar => Box::new(MultiStarGuider::new()),
        StrategyKind::SingleStar => Box::new(SingleStarGuider::new()),
    }
}

impl<F: StarFinder, C: FrameController> GuidingSession<F, C> {
    pub fn new(config: MultiStarConfig, finder: F, controller: C) -> Result<Self, SessionError> {
        config.validate()?;
        log::info!("Creating guiding session with {:?} strategy", config.strategy);
        Ok(Self {
            strategy: build_strategy(config.strategy),
            config,
            checker: DistanceChecker::new(),
            finder,
            controller,
            callbacks: CallbackRegistry::new(),
            status: Arc::new(Mutex::new(GuiderStatus::default())),
            frames_processed: 0,
        })
    }

    /// Replace the star pool; `pool[0]` is the primary.
    pub fn select_stars(&mut self, pool: &[PixelPoint]) -> Result<(), SessionError> {
        self.strategy.select(pool)?;
        self.checker.reset();
        self.publish_status(None, None);
        Ok(())
    }

    /// Run one full guiding pass over `frame` captured at `timestamp`.
    pub fn process_frame(&mut self, frame: ArrayView2<'_, u16>, timestamp: Timestamp) -> FrameResult {
        let mut env = GuideEnv {
            finder: &mut self.finder,
            controller: &mut self.controller,
            checker: &mut self.checker,
            callbacks: &self.callbacks,
            config: &self.config,
        };
        let result = self.strategy.update_position(frame, timestamp, &mut env);
        self.frames_processed += 1;

        if result.is_dropped() {
            log::debug!(
                "frame {} dropped: {} ({})",
                self.frames_processed,
                result.outcome,
                result.error_info.status
            );
        }

        self.publish_status(Some(timestamp), Some(&result));
        result
    }

    /// Forget the selection and all tracking state.
    pub fn reset(&mut self) {
        log::info!("Resetting guiding session");
        self.strategy.invalidate(true);
        self.checker.reset();
        self.frames_processed = 0;
        self.publish_status(None, None);
    }

    /// Drop the current solution; keeps the selection unless `full_reset`.
    pub fn invalidate_position(&mut self, full_reset: bool) {
        self.strategy.invalidate(full_reset);
        self.publish_status(None, None);
    }

    pub fn register_callback<Cb>(&mut self, callback: Cb) -> CallbackId
    where
        Cb: Fn(&GuideEvent) + Send + Sync + 'static,
    {
        self.callbacks.register(callback)
    }

    pub fn deregister_callback(&mut self, id: CallbackId) -> bool {
        self.callbacks.deregister(id)
    }

    /// Shared handle to the status snapshot for reader threads.
    pub fn status_handle(&self) -> Arc<Mutex<GuiderStatus>> {
        self.status.clone()
    }

    pub fn status(&self) -> GuiderStatus {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn strategy(&self) -> &dyn GuideStrategy {
        self.strategy.as_ref()
    }

    pub fn checker(&self) -> &DistanceChecker {
        &self.checker
    }

    pub fn config(&self) -> &MultiStarConfig {
        &self.config
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.controller
    }

    pub fn finder_mut(&mut self) -> &mut F {
        &mut self.finder
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    fn publish_status(&self, timestamp: Option<Timestamp>, result: Option<&FrameResult>) {
        let solution = self.strategy.current_position();
        let count = self.strategy.star_count();
        let snapshot = GuiderStatus {
            timestamp,
            outcome: result.map(|r| r.outcome.into()).unwrap_or_default(),
            status: result
                .map(|r| r.error_info.status.clone())
                .unwrap_or_default(),
            locked: self.strategy.is_locked(),
            solution_x: solution.map(|p| p.x),
            solution_y: solution.map(|p| p.y),
            distance: result.map_or(0.0, |r| r.distance),
            stars_used: count.used,
            max_stars_used: count.max,
            admission: self.checker.state().into(),
            slots: self.strategy.slots(),
            frames_processed: self.frames_processed,
        };

        let mut guard = self.status.lock().unwrap_or_else(|e| e.into_inner());
        *guard = snapshot;
    }
}
