//! Shared WASM-compatible types used across multiple repositories.
//!
//! Contains the serializable guider status published by the `multistar` crate
//! and consumed by status readers. All types must be WASM-compatible.

pub mod tracking;
mod types;

pub use tracking::{AdmissionStateKind, FrameOutcomeKind, GuiderStatus, StarSlotStatus};
pub use types::Timestamp;
