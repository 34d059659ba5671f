//! Guider status types.
//!
//! Snapshot of the multi-star guider published once per frame so that a UI or
//! telemetry reader never observes a half-updated pass.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Jump admission state as reported to status consumers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionStateKind {
    /// Offsets are checked against the normal tolerance
    #[default]
    Guiding,
    /// Grace period after a large offset or a total star loss
    Waiting,
    /// Grace period expired, all offsets admitted until they shrink
    Recovering,
}

/// Outcome of the most recent frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrameOutcomeKind {
    /// No frame processed since the last reset
    #[default]
    None,
    /// Frame accepted and handed to the mount controller
    Nominal,
    /// No primary star has been selected
    NoTargetSelected,
    /// No pool star was detected
    AllPointsLost,
    /// Stars were detected but none passed gating
    NoEligibleContributors,
    /// Offset refused by the admission state machine
    JumpRejected,
}

/// Per-slot view of one pool star.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StarSlotStatus {
    /// Pool index (0 is the primary)
    pub index: usize,
    /// Last detected X position in pixels, if ever detected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    /// Last detected Y position in pixels, if ever detected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    /// Detected in the latest frame
    pub found: bool,
    /// Contributed to the latest solution
    pub contributing: bool,
    /// Lost at least once since it last contributed
    pub lost: bool,
    /// Consecutive good detections since the last loss
    pub reacquire_good_count: u32,
}

/// Full guider status published at the end of every frame pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GuiderStatus {
    /// Timestamp of the frame this status describes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    /// Outcome of that frame
    pub outcome: FrameOutcomeKind,
    /// Human readable status line
    pub status: String,
    /// Whether a solution position is currently valid
    pub locked: bool,
    /// Solution X position in pixels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution_x: Option<f64>,
    /// Solution Y position in pixels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution_y: Option<f64>,
    /// Distance from lock position of the last evaluated solution
    pub distance: f64,
    /// Stars contributing to the latest solution
    pub stars_used: u32,
    /// Peak concurrent contributors since the last selection
    pub max_stars_used: u32,
    /// Jump admission state
    pub admission: AdmissionStateKind,
    /// Per-slot status, index-aligned with the guide star pool
    pub slots: Vec<StarSlotStatus>,
    /// Frames processed since the last reset
    pub frames_processed: u64,
}
