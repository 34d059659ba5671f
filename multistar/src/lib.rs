//! Multi-star guide position estimation
//!
//! Estimates a guide position once per frame from a pool of simultaneously
//! tracked stars, so that guiding survives individual stars being obscured,
//! saturated or lost, and guards the mount control loop against spurious
//! position jumps with a hysteresis admission checker.
//!
//! Per-frame flow:
//!
//! ```text
//! StarFinder -> per-star state -> mass filter -> aggregator -> DistanceChecker -> FrameResult
//! ```
//!
//! A [`GuidingSession`] owns the pieces and is the usual entry point:
//!
//! ```no_run
//! use multistar::{
//!     CentroidFinder, GuidingSession, MultiStarConfig, PixelPoint, SimpleFrameController,
//! };
//! use shared_wasm::Timestamp;
//!
//! let controller = SimpleFrameController::guiding_at(PixelPoint::new(100.0, 100.0));
//! let mut session =
//!     GuidingSession::new(MultiStarConfig::default(), CentroidFinder::default(), controller)
//!         .unwrap();
//! session
//!     .select_stars(&[PixelPoint::new(100.0, 100.0), PixelPoint::new(140.0, 90.0)])
//!     .unwrap();
//!
//! let frame = ndarray::Array2::<u16>::zeros((256, 256));
//! let result = session.process_frame(frame.view(), Timestamp::from_millis(0));
//! println!("{} {}", result.outcome, result.star_count);
//! ```

pub mod admission;
pub mod aggregator;
pub mod callback;
pub mod config;
pub mod controller;
pub mod detector;
pub mod diagnostics;
pub mod mass;
pub mod point;
pub mod result;
pub mod session;
pub mod single;
pub mod strategy;
pub mod synthetic;
#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

pub use admission::{AdmissionEventKind, AdmissionState, AdmissionTransition, DistanceChecker};
pub use aggregator::MultiStarGuider;
pub use callback::{CallbackId, GuideEvent};
pub use config::{ConfigError, MultiStarConfig, StrategyKind};
pub use controller::{
    ErrorStatistics, ExposureInfo, FrameController, MountTransform, SimpleFrameController,
};
pub use detector::{CentroidFinder, CentroidFinderConfig, FindError, SearchHint, StarFinder};
pub use diagnostics::FrameSummary;
pub use point::{PixelPoint, PoolStar, StarMeasurement, StarState};
pub use result::{FrameErrorInfo, FrameOutcome, FrameResult, GuiderOffset, StarCount};
pub use session::{GuidingSession, SessionError};
pub use single::SingleStarGuider;
pub use strategy::{GuideEnv, GuideStrategy};
