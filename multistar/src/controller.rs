//! Frame controller interface
//!
//! The frame controller owns everything around the guiding core: exposure and
//! auto-exposure, the lock position, mount calibration and the running error
//! statistics. The core reads from it once per frame and notifies it of
//! accepted distances and auto-exposure events.

use serde::{Deserialize, Serialize};

use crate::point::PixelPoint;

/// Current exposure configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExposureInfo {
    /// Exposure duration in milliseconds
    pub duration_ms: u32,
    /// Exposure is being adjusted automatically
    pub auto_exposure: bool,
}

/// Guiding-session statistics used by the jump admission test.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ErrorStatistics {
    /// Mount corrections are being issued
    pub guiding: bool,
    pub paused: bool,
    /// A dither/settle is in progress
    pub settling: bool,
    /// Error samples accumulated since guiding started
    pub error_frame_count: u32,
    /// Smoothed recent tracking error (pixels), RA-only or full per request
    pub smoothed_error: f64,
}

/// Linear camera-to-mount transform established by calibration.
///
/// ```text
/// mount_x = a * camera_x + b * camera_y
/// mount_y = c * camera_x + d * camera_y
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MountTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl MountTransform {
    /// Rotation by `angle` radians with uniform scale.
    pub fn from_rotation(angle: f64, scale: f64) -> Self {
        let (sin_a, cos_a) = angle.sin_cos();
        Self {
            a: scale * cos_a,
            b: scale * sin_a,
            c: -scale * sin_a,
            d: scale * cos_a,
        }
    }

    pub fn apply(&self, camera: PixelPoint) -> PixelPoint {
        PixelPoint::new(
            self.a * camera.x + self.b * camera.y,
            self.c * camera.x + self.d * camera.y,
        )
    }
}

impl Default for MountTransform {
    /// Identity transform
    fn default() -> Self {
        Self::from_rotation(0.0, 1.0)
    }
}

/// Collaborator that owns exposure, lock position, calibration and statistics.
pub trait FrameController {
    fn exposure(&self) -> ExposureInfo;

    /// Only the RA axis is being guided
    fn ra_only(&self) -> bool;

    /// Position the solution is guided toward, if one is set
    fn lock_position(&self) -> Option<PixelPoint>;

    /// Camera-space offset in mount coordinates; None when uncalibrated.
    fn camera_to_mount(&self, camera_offset: PixelPoint) -> Option<PixelPoint>;

    fn error_statistics(&self, ra_only: bool) -> ErrorStatistics;

    /// Camera is restricted to a subframe around the primary
    fn use_subframes(&self) -> bool;

    /// A frame was dropped; return to the maximum exposure while recovering.
    fn reset_auto_exposure(&mut self) {}

    /// A frame was accepted with the given display-star SNR.
    fn adjust_auto_exposure(&mut self, _snr: f64) {}

    /// A frame was accepted at `distance` from lock (`distance_ra` along RA).
    fn update_current_distance(&mut self, _distance: f64, _distance_ra: f64) {}
}

/// Smoothing factor for the running error average.
const ERROR_SMOOTHING: f64 = 0.2;

/// Self-contained frame controller for replay, simulation and tests.
///
/// Keeps an exponentially smoothed average of accepted distances so the jump
/// admission test has realistic statistics to work against.
#[derive(Debug, Clone, Default)]
pub struct SimpleFrameController {
    pub exposure: ExposureInfo,
    pub ra_only: bool,
    pub lock_position: Option<PixelPoint>,
    /// None leaves the mount uncalibrated
    pub transform: Option<MountTransform>,
    pub guiding: bool,
    pub paused: bool,
    pub settling: bool,
    pub use_subframes: bool,
    pub error_frame_count: u32,
    pub smoothed_error: f64,
    pub smoothed_error_ra: f64,
    /// Times a dropped frame asked for the maximum exposure
    pub auto_exposure_resets: u32,
    pub last_snr: Option<f64>,
}

impl SimpleFrameController {
    /// Guiding toward `lock` with an identity calibration.
    pub fn guiding_at(lock: PixelPoint) -> Self {
        Self {
            exposure: ExposureInfo {
                duration_ms: 1000,
                auto_exposure: false,
            },
            lock_position: Some(lock),
            transform: Some(MountTransform::default()),
            guiding: true,
            ..Default::default()
        }
    }
}

impl FrameController for SimpleFrameController {
    fn exposure(&self) -> ExposureInfo {
        self.exposure
    }

    fn ra_only(&self) -> bool {
        self.ra_only
    }

    fn lock_position(&self) -> Option<PixelPoint> {
        self.lock_position
    }

    fn camera_to_mount(&self, camera_offset: PixelPoint) -> Option<PixelPoint> {
        self.transform.map(|t| t.apply(camera_offset))
    }

    fn error_statistics(&self, ra_only: bool) -> ErrorStatistics {
        ErrorStatistics {
            guiding: self.guiding,
            paused: self.paused,
            settling: self.settling,
            error_frame_count: self.error_frame_count,
            smoothed_error: if ra_only {
                self.smoothed_error_ra
            } else {
                self.smoothed_error
            },
        }
    }

    fn use_subframes(&self) -> bool {
        self.use_subframes
    }

    fn reset_auto_exposure(&mut self) {
        self.auto_exposure_resets += 1;
    }

    fn adjust_auto_exposure(&mut self, snr: f64) {
        self.last_snr = Some(snr);
    }

    fn update_current_distance(&mut self, distance: f64, distance_ra: f64) {
        if self.error_frame_count == 0 {
            self.smoothed_error = distance;
            self.smoothed_error_ra = distance_ra;
        } else {
            self.smoothed_error += ERROR_SMOOTHING * (distance - self.smoothed_error);
            self.smoothed_error_ra += ERROR_SMOOTHING * (distance_ra - self.smoothed_error_ra);
        }
        self.error_frame_count = self.error_frame_count.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_identity_transform() {
        let t = MountTransform::default();
        let p = t.apply(PixelPoint::new(1.5, -2.0));
        assert_relative_eq!(p.x, 1.5, epsilon = 1e-12);
        assert_relative_eq!(p.y, -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotated_transform() {
        let t = MountTransform::from_rotation(FRAC_PI_2, 2.0);
        let p = t.apply(PixelPoint::new(0.0, 1.0));
        assert_relative_eq!(p.x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_uncalibrated_has_no_mount_offset() {
        let controller = SimpleFrameController::default();
        assert!(controller
            .camera_to_mount(PixelPoint::new(1.0, 1.0))
            .is_none());
    }

    #[test]
    fn test_error_statistics_smoothing() {
        let mut controller = SimpleFrameController::guiding_at(PixelPoint::new(50.0, 50.0));
        controller.update_current_distance(1.0, 0.5);
        let stats = controller.error_statistics(false);
        assert_eq!(stats.error_frame_count, 1);
        assert_relative_eq!(stats.smoothed_error, 1.0);
        assert_relative_eq!(controller.error_statistics(true).smoothed_error, 0.5);

        controller.update_current_distance(2.0, 0.5);
        assert_relative_eq!(controller.error_statistics(false).smoothed_error, 1.2);
        assert!(stats.guiding);
    }
}
