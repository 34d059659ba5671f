//! Structured per-frame summaries for diagnostics observers

use crate::point::PixelPoint;
use crate::result::FrameOutcome;

/// Why pool stars did not contribute this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RejectionCounts {
    /// Detection failed
    pub not_found: usize,
    /// Detected but flagged by the mass filter
    pub mass: usize,
    /// Detected but still inside the reacquisition debounce
    pub reacquire_gate: usize,
    /// The whole solution was rejected by the admission checker
    pub jump: bool,
}

/// What happened to the pool on one multi-star pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameSummary {
    pub outcome: Option<FrameOutcome>,
    pub pool_size: usize,
    pub found: usize,
    pub used: usize,
    pub primary_contributing: bool,
    pub distance: f64,
    pub displacement: Option<PixelPoint>,
    /// Change in displacement since the previous summarized frame
    pub delta: Option<PixelPoint>,
    pub rejected: RejectionCounts,
    pub used_indices: Vec<usize>,
    /// Indices that started contributing since the previous summary
    pub added: Vec<usize>,
    /// Indices that stopped contributing since the previous summary
    pub removed: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
struct Membership {
    used_indices: Vec<usize>,
    pool_size: usize,
    found: usize,
    used: usize,
    primary_contributing: bool,
}

/// Remembers the previous frame's contributors to report what changed.
#[derive(Debug, Clone, Default)]
pub struct MembershipTracker {
    previous: Option<Membership>,
    last_displacement: Option<PixelPoint>,
}

impl MembershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill in `added`, `removed` and `delta` on `summary`.
    ///
    /// Returns true when the contributor set or any pool count changed, which
    /// is when a membership event should be published. The first frame
    /// observed always counts as a change.
    pub fn observe(&mut self, summary: &mut FrameSummary) -> bool {
        let current = Membership {
            used_indices: summary.used_indices.clone(),
            pool_size: summary.pool_size,
            found: summary.found,
            used: summary.used,
            primary_contributing: summary.primary_contributing,
        };

        let previous_used: &[usize] = self
            .previous
            .as_ref()
            .map(|m| m.used_indices.as_slice())
            .unwrap_or(&[]);
        summary.added = current
            .used_indices
            .iter()
            .copied()
            .filter(|i| !previous_used.contains(i))
            .collect();
        summary.removed = previous_used
            .iter()
            .copied()
            .filter(|i| !current.used_indices.contains(i))
            .collect();

        if let Some(displacement) = summary.displacement {
            summary.delta = self.last_displacement.map(|last| displacement - last);
            self.last_displacement = Some(displacement);
        }

        let changed = self.previous.as_ref() != Some(&current);
        self.previous = Some(current);
        changed
    }

    pub fn reset(&mut self) {
        self.previous = None;
        self.last_displacement = None;
    }
}
