//! Star finder interface and a windowed centroid implementation
//!
//! The guiding core treats star detection as a black box: given a frame and
//! an optional expected position, either a measurement comes back or the star
//! is considered not found this frame.

use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mass::select_median;
use crate::point::{PixelPoint, StarMeasurement};

/// Where to look for a star.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchHint {
    /// Search the whole frame for the brightest star
    FullFrame,
    /// Search a box of half-width `search_region` around this position
    Near(PixelPoint),
}

/// Reasons a star finder reports no star.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FindError {
    #[error("No star found in search region")]
    NotFound,

    #[error("Search position ({x:.1}, {y:.1}) is outside the frame")]
    OutsideFrame { x: f64, y: f64 },

    #[error("Star SNR {snr:.1} below minimum {min:.1}")]
    LowSnr { snr: f64, min: f64 },

    #[error("Star HFD {hfd:.2} outside allowed range [{min:.2}, {max:.2}]")]
    HfdOutOfRange { hfd: f64, min: f64, max: f64 },
}

/// Locates one star near an expected position.
pub trait StarFinder {
    /// Find a star in `frame`, searching per `hint`.
    ///
    /// `search_region` is the half-width of the search box in pixels.
    fn find_star(
        &mut self,
        frame: ArrayView2<'_, u16>,
        hint: SearchHint,
        search_region: u32,
    ) -> Result<StarMeasurement, FindError>;
}

impl<T: StarFinder + ?Sized> StarFinder for Box<T> {
    fn find_star(
        &mut self,
        frame: ArrayView2<'_, u16>,
        hint: SearchHint,
        search_region: u32,
    ) -> Result<StarMeasurement, FindError> {
        (**self).find_star(frame, hint, search_region)
    }
}

/// Tuning for [`CentroidFinder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentroidFinderConfig {
    /// Centroid aperture radius around the peak (pixels)
    pub aperture_radius: f64,
    /// Peak must exceed background by this many noise sigmas
    pub detection_sigma: f64,
    /// Minimum SNR for a detection to count
    pub min_snr: f64,
    /// Pixel value treated as saturated
    pub saturation_level: u16,
    /// Allowed half-flux diameter range (pixels)
    pub hfd_range: (f64, f64),
}

impl Default for CentroidFinderConfig {
    fn default() -> Self {
        Self {
            aperture_radius: 6.0,
            detection_sigma: 5.0,
            min_snr: 6.0,
            saturation_level: u16::MAX,
            hfd_range: (0.5, 20.0),
        }
    }
}

/// Peak-seeded center-of-mass star finder.
///
/// Background and noise come from the median and MAD of the search box, the
/// centroid from background-subtracted flux inside the aperture around the
/// brightest pixel.
#[derive(Debug, Clone, Default)]
pub struct CentroidFinder {
    pub config: CentroidFinderConfig,
}

impl CentroidFinder {
    pub fn new(config: CentroidFinderConfig) -> Self {
        Self { config }
    }
}

/// Inclusive pixel bounds of a search box.
struct SearchBox {
    x_min: usize,
    x_max: usize,
    y_min: usize,
    y_max: usize,
}

fn search_box(
    frame: &ArrayView2<'_, u16>,
    hint: SearchHint,
    search_region: u32,
) -> Result<SearchBox, FindError> {
    let (height, width) = frame.dim();
    if width == 0 || height == 0 {
        return Err(FindError::NotFound);
    }

    match hint {
        SearchHint::FullFrame => Ok(SearchBox {
            x_min: 0,
            x_max: width - 1,
            y_min: 0,
            y_max: height - 1,
        }),
        SearchHint::Near(p) => {
            if !p.is_finite()
                || p.x < 0.0
                || p.y < 0.0
                || p.x > (width - 1) as f64
                || p.y > (height - 1) as f64
            {
                return Err(FindError::OutsideFrame { x: p.x, y: p.y });
            }
            let r = search_region as f64;
            Ok(SearchBox {
                x_min: (p.x - r).max(0.0).round() as usize,
                x_max: ((p.x + r).round() as usize).min(width - 1),
                y_min: (p.y - r).max(0.0).round() as usize,
                y_max: ((p.y + r).round() as usize).min(height - 1),
            })
        }
    }
}

impl StarFinder for CentroidFinder {
    fn find_star(
        &mut self,
        frame: ArrayView2<'_, u16>,
        hint: SearchHint,
        search_region: u32,
    ) -> Result<StarMeasurement, FindError> {
        let cfg = &self.config;
        let bounds = search_box(&frame, hint, search_region)?;
        let window = frame.slice(ndarray::s![
            bounds.y_min..=bounds.y_max,
            bounds.x_min..=bounds.x_max
        ]);

        let mut pixels: Vec<f64> = window.iter().map(|&v| v as f64).collect();
        let background = select_median(&mut pixels).ok_or(FindError::NotFound)?;
        let mut deviations: Vec<f64> = pixels.iter().map(|v| (v - background).abs()).collect();
        let mad = select_median(&mut deviations).unwrap_or(0.0);
        // MAD to sigma for Gaussian noise; floor keeps SNR finite on clean frames
        let noise = (1.4826 * mad).max(1.0);

        let mut peak = (0usize, 0usize, 0u16);
        for ((row, col), &value) in window.indexed_iter() {
            if value > peak.2 {
                peak = (row, col, value);
            }
        }
        let peak_x = bounds.x_min + peak.1;
        let peak_y = bounds.y_min + peak.0;
        let peak_value = peak.2 as f64;

        if peak_value - background < cfg.detection_sigma * noise {
            return Err(FindError::NotFound);
        }

        // Center of mass inside the aperture, using the full frame so the
        // aperture may extend past the search box.
        let (height, width) = frame.dim();
        let radius = cfg.aperture_radius;
        let reach = radius.ceil() as usize;
        let x_lo = peak_x.saturating_sub(reach);
        let x_hi = (peak_x + reach).min(width - 1);
        let y_lo = peak_y.saturating_sub(reach);
        let y_hi = (peak_y + reach).min(height - 1);

        let mut samples = Vec::new();
        let mut mass = 0.0;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut saturated = false;
        for (dy, row) in frame
            .slice(ndarray::s![y_lo..=y_hi, x_lo..=x_hi])
            .axis_iter(Axis(0))
            .enumerate()
        {
            let y = (y_lo + dy) as f64;
            for (dx, &value) in row.iter().enumerate() {
                let x = (x_lo + dx) as f64;
                let r2 = (x - peak_x as f64).powi(2) + (y - peak_y as f64).powi(2);
                if r2 > radius * radius {
                    continue;
                }
                if value >= cfg.saturation_level {
                    saturated = true;
                }
                let signal = (value as f64 - background).max(0.0);
                mass += signal;
                sum_x += signal * x;
                sum_y += signal * y;
                samples.push((x, y, signal));
            }
        }

        if mass <= 0.0 {
            return Err(FindError::NotFound);
        }
        let position = PixelPoint::new(sum_x / mass, sum_y / mass);

        let n_pixels = samples.len() as f64;
        let snr = mass / (mass + n_pixels * noise * noise).sqrt();
        if snr < cfg.min_snr {
            return Err(FindError::LowSnr {
                snr,
                min: cfg.min_snr,
            });
        }

        let hfd = half_flux_diameter(&samples, position, mass);
        let (min_hfd, max_hfd) = cfg.hfd_range;
        if hfd < min_hfd || hfd > max_hfd {
            return Err(FindError::HfdOutOfRange {
                hfd,
                min: min_hfd,
                max: max_hfd,
            });
        }

        Ok(StarMeasurement {
            position,
            mass,
            snr,
            hfd,
            peak: peak_value,
            saturated,
        })
    }
}

/// Diameter of the circle around `center` enclosing half of `mass`.
fn half_flux_diameter(samples: &[(f64, f64, f64)], center: PixelPoint, mass: f64) -> f64 {
    let mut by_radius: Vec<(f64, f64)> = samples
        .iter()
        .map(|&(x, y, signal)| ((x - center.x).hypot(y - center.y), signal))
        .collect();
    by_radius.sort_by(|a, b| a.0.total_cmp(&b.0));

    let half = mass / 2.0;
    let mut enclosed = 0.0;
    for (radius, signal) in by_radius {
        enclosed += signal;
        if enclosed >= half {
            return 2.0 * radius.max(0.5);
        }
    }
    0.0
}
