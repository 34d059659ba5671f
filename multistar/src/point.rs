//! Pool star data model
//!
//! A guiding session tracks a fixed pool of stars. Index 0 is always the
//! primary. Each pool slot pairs a [`PoolStar`] (what we know about the star
//! itself) with a [`StarState`] (per-frame runtime bookkeeping).

use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

use crate::mass::MassChecker;

/// Consecutive good detections required before a lost star contributes again.
pub const REACQUIRE_GOOD_FRAMES: u32 = 3;

/// A position or displacement in camera pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance(&self, other: &PixelPoint) -> f64 {
        (*self - *other).norm()
    }

    /// Length of this point treated as a vector
    pub fn norm(&self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for PixelPoint {
    type Output = PixelPoint;

    fn add(self, rhs: PixelPoint) -> PixelPoint {
        PixelPoint::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for PixelPoint {
    type Output = PixelPoint;

    fn sub(self, rhs: PixelPoint) -> PixelPoint {
        PixelPoint::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// A single successful detection reported by a star finder.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StarMeasurement {
    /// Centroid position in full-frame pixels
    pub position: PixelPoint,
    /// Integrated flux above background (ADU)
    pub mass: f64,
    /// Signal-to-noise ratio
    pub snr: f64,
    /// Half-flux diameter in pixels
    pub hfd: f64,
    /// Peak pixel value (ADU)
    pub peak: f64,
    /// At least one pixel reached the saturation level
    pub saturated: bool,
}

impl StarMeasurement {
    /// Weight used for SNR-weighted averaging; never zero.
    pub fn weight(&self) -> f64 {
        if self.snr > 0.0 {
            self.snr
        } else {
            1.0
        }
    }
}

/// A star in the guide pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolStar {
    /// Last accepted position
    pub position: PixelPoint,
    /// Anchor this star's displacement is measured against. None until anchored.
    pub reference: Option<PixelPoint>,
    /// Expected displacement from the primary, used to search for this star while lost
    pub offset_from_primary: PixelPoint,
    /// Failed detection at least once since it last became eligible
    pub was_lost: bool,
    /// Latest successful measurement
    pub measurement: Option<StarMeasurement>,
}

impl PoolStar {
    /// Pool star anchored at its selection position.
    pub fn new(position: PixelPoint, primary: PixelPoint) -> Self {
        Self {
            position,
            reference: Some(position),
            offset_from_primary: position - primary,
            was_lost: false,
            measurement: None,
        }
    }

    /// Pool star whose reference is established on its first eligible frame.
    pub fn unanchored(position: PixelPoint, primary: PixelPoint) -> Self {
        Self {
            reference: None,
            ..Self::new(position, primary)
        }
    }

    /// Displacement of `position` from this star's reference, if anchored.
    pub fn displacement(&self, position: PixelPoint) -> Option<PixelPoint> {
        self.reference.map(|reference| position - reference)
    }

    pub(crate) fn record(&mut self, measurement: &StarMeasurement) {
        self.position = measurement.position;
        self.measurement = Some(*measurement);
    }
}

/// Per-slot runtime bookkeeping, index-aligned with the pool.
#[derive(Debug, Clone, Default)]
pub struct StarState {
    /// Most recent detected position, used to seed the next search
    pub last_pos: Option<PixelPoint>,
    pub found_this_frame: bool,
    pub contributing_this_frame: bool,
    /// Consecutive detections since the last loss, saturating at [`REACQUIRE_GOOD_FRAMES`]
    pub reacquire_good_count: u32,
    /// Flux history and watermarks for mass-change rejection
    pub mass: MassChecker,
}

impl StarState {
    pub(crate) fn begin_frame(&mut self) {
        self.found_this_frame = false;
        self.contributing_this_frame = false;
    }

    pub(crate) fn mark_lost(&mut self) {
        self.found_this_frame = false;
        self.reacquire_good_count = 0;
    }

    /// Record a detection and advance the reacquisition debounce.
    pub(crate) fn mark_found(&mut self, position: PixelPoint, was_lost: bool) {
        self.found_this_frame = true;
        self.last_pos = Some(position);
        self.reacquire_good_count = if was_lost {
            (self.reacquire_good_count + 1).min(REACQUIRE_GOOD_FRAMES)
        } else {
            REACQUIRE_GOOD_FRAMES
        };
    }

    /// Passed the reacquisition debounce
    pub fn gated_in(&self) -> bool {
        self.reacquire_good_count >= REACQUIRE_GOOD_FRAMES
    }
}
