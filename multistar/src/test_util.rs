//! Test doubles for driving guiders without rendering images

use std::sync::{Arc, Mutex};

use ndarray::ArrayView2;

use crate::detector::{FindError, SearchHint, StarFinder};
use crate::point::{PixelPoint, StarMeasurement};

/// Detection with the given position, SNR and mass; HFD 2.5 px, unsaturated.
pub fn detection(x: f64, y: f64, snr: f64, mass: f64) -> StarMeasurement {
    StarMeasurement {
        position: PixelPoint::new(x, y),
        mass,
        snr,
        hfd: 2.5,
        peak: mass / 10.0,
        saturated: false,
    }
}

/// Shared handle for changing what a [`ScriptedFinder`] sees between frames.
#[derive(Debug, Clone, Default)]
pub struct SkyHandle {
    stars: Arc<Mutex<Vec<StarMeasurement>>>,
}

impl SkyHandle {
    /// Replace the detectable stars for the next frame
    pub fn set(&self, stars: Vec<StarMeasurement>) {
        let mut guard = self.stars.lock().unwrap_or_else(|e| e.into_inner());
        *guard = stars;
    }

    pub fn clear(&self) {
        self.set(Vec::new());
    }
}

/// Star finder that ignores pixels and reports from a scripted star list.
///
/// A full-frame search returns the highest-SNR star. A directed search returns
/// the star nearest the hint within the search region.
#[derive(Debug, Default)]
pub struct ScriptedFinder {
    sky: SkyHandle,
    /// Number of `find_star` calls made
    pub calls: usize,
}

impl ScriptedFinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> SkyHandle {
        self.sky.clone()
    }
}

impl StarFinder for ScriptedFinder {
    fn find_star(
        &mut self,
        _frame: ArrayView2<'_, u16>,
        hint: SearchHint,
        search_region: u32,
    ) -> Result<StarMeasurement, FindError> {
        self.calls += 1;
        let stars = self.sky.stars.lock().unwrap_or_else(|e| e.into_inner());

        let mut best: Option<&StarMeasurement> = None;
        match hint {
            SearchHint::FullFrame => {
                for star in stars.iter() {
                    if best.map_or(true, |b| star.snr > b.snr) {
                        best = Some(star);
                    }
                }
            }
            SearchHint::Near(p) => {
                let mut best_dist = search_region as f64;
                for star in stars.iter() {
                    let d = star.position.distance(&p);
                    if d <= best_dist {
                        best_dist = d;
                        best = Some(star);
                    }
                }
            }
        }
        best.copied().ok_or(FindError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_scripted_finder_nearest_in_region() {
        let frame = Array2::<u16>::zeros((4, 4));
        let mut finder = ScriptedFinder::new();
        let sky = finder.handle();
        sky.set(vec![
            detection(10.0, 10.0, 20.0, 1000.0),
            detection(40.0, 10.0, 30.0, 1000.0),
        ]);

        let near = finder
            .find_star(frame.view(), SearchHint::Near(PixelPoint::new(12.0, 9.0)), 5)
            .unwrap();
        assert_eq!(near.position, PixelPoint::new(10.0, 10.0));

        let full = finder
            .find_star(frame.view(), SearchHint::FullFrame, 5)
            .unwrap();
        assert_eq!(full.position, PixelPoint::new(40.0, 10.0));

        assert!(finder
            .find_star(frame.view(), SearchHint::Near(PixelPoint::new(25.0, 25.0)), 5)
            .is_err());

        sky.clear();
        assert!(finder
            .find_star(frame.view(), SearchHint::FullFrame, 5)
            .is_err());
        assert_eq!(finder.calls, 4);
    }
}
