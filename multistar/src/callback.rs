//! Observer callbacks for guiding events
//!
//! Callbacks run synchronously on the guiding thread at the end of each
//! stage that produces an event, so they should be quick. Nothing is built
//! for observers when none are registered.

use crate::admission::AdmissionTransition;
use crate::diagnostics::FrameSummary;
use crate::point::PixelPoint;

/// Handle returned by registration, used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Events delivered to registered callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum GuideEvent {
    /// Summary of every multi-star pass
    Frame(FrameSummary),
    /// A lost star passed the reacquisition gate and was re-anchored
    Reacquired {
        index: usize,
        position: PixelPoint,
        baseline: PixelPoint,
        old_reference: Option<PixelPoint>,
        new_reference: PixelPoint,
    },
    /// Contributor membership or pool counts changed since the last frame
    MembershipChanged(FrameSummary),
    /// The admission checker changed state
    Admission(AdmissionTransition),
}

type Callback = Box<dyn Fn(&GuideEvent) + Send + Sync>;

#[derive(Default)]
pub struct CallbackRegistry {
    next_id: u64,
    callbacks: Vec<(CallbackId, Callback)>,
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, callback: F) -> CallbackId
    where
        F: Fn(&GuideEvent) + Send + Sync + 'static,
    {
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        self.callbacks.push((id, Box::new(callback)));
        id
    }

    /// Remove a callback. Returns false if the id was not registered.
    pub fn deregister(&mut self, id: CallbackId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(cid, _)| *cid != id);
        self.callbacks.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn emit(&self, event: &GuideEvent) {
        for (_, callback) in &self.callbacks {
            callback(event);
        }
    }
}
