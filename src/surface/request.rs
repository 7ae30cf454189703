//! Prerender job and completion types

use std::fmt;
use std::sync::Arc;

use super::backend::RenderBackend;
use super::types::{Dimensions, PageRef, PageVariant};
use super::viewport::ViewportId;

/// Slot configuration captured when a render starts.
///
/// A result is only stored if the slot still carries the same stamp when
/// the render completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Stamp {
    /// Store-wide counter bumped on every reconfiguration
    pub generation: u64,
    pub dims: Dimensions,
    pub variant: PageVariant,
}

/// Identity of one background render.
///
/// Includes the generation so a reconfigured slot can be re-queued while a
/// stale render of the same page is still running.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub slot: ViewportId,
    pub page: usize,
    pub generation: u64,
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.slot, self.page, self.generation)
    }
}

/// Result of offering a surface to the store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored,
    /// The slot was reconfigured or removed since the render started
    Stale,
}

/// Background render of one page for one slot
pub(crate) struct PrerenderJob {
    pub key: JobKey,
    pub page: PageRef,
    pub stamp: Stamp,
    pub backend: Arc<dyn RenderBackend>,
}

impl fmt::Debug for PrerenderJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrerenderJob")
            .field("key", &self.key)
            .field("stamp", &self.stamp)
            .finish_non_exhaustive()
    }
}

/// Message sent to render workers
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Render(PrerenderJob),
    Shutdown,
}
