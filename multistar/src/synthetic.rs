//! Synthetic star fields with Gaussian PSFs
//!
//! Used by the replay binary and the end-to-end tests. Output is fully
//! determined by the seed.

use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// PSF sigma for a FWHM of about 3 pixels
pub const DEFAULT_PSF_SIGMA: f64 = 3.0 / 2.355;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticStar {
    pub x: f64,
    pub y: f64,
    /// Peak amplitude above background (ADU)
    pub amplitude: f64,
    pub sigma: f64,
}

impl SyntheticStar {
    pub fn new(x: f64, y: f64, amplitude: f64) -> Self {
        Self {
            x,
            y,
            amplitude,
            sigma: DEFAULT_PSF_SIGMA,
        }
    }

    pub fn shifted(&self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }
}

/// Render `stars` over a flat background with Gaussian read noise.
pub fn render_star_field(
    width: usize,
    height: usize,
    stars: &[SyntheticStar],
    background: f64,
    noise_sigma: f64,
    seed: u64,
) -> Array2<u16> {
    let mut frame = Array2::<f64>::from_elem((height, width), background);

    for star in stars {
        // Out to ~5 sigma; beyond that the PSF is below the noise
        let radius = (5.0 * star.sigma).ceil() as i64;
        let cx = star.x.round() as i64;
        let cy = star.y.round() as i64;
        let two_sigma2 = 2.0 * star.sigma * star.sigma;

        for y in (cy - radius).max(0)..=(cy + radius).min(height as i64 - 1) {
            for x in (cx - radius).max(0)..=(cx + radius).min(width as i64 - 1) {
                let dx = x as f64 - star.x;
                let dy = y as f64 - star.y;
                frame[[y as usize, x as usize]] +=
                    star.amplitude * (-(dx * dx + dy * dy) / two_sigma2).exp();
            }
        }
    }

    if noise_sigma > 0.0 {
        if let Ok(noise) = Normal::new(0.0, noise_sigma) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            for pixel in frame.iter_mut() {
                *pixel += noise.sample(&mut rng);
            }
        }
    }

    frame.mapv(|v| v.round().clamp(0.0, u16::MAX as f64) as u16)
}
