//! Render-surface cache with speculative background prerendering

mod backend;
mod cache;
mod error;
mod request;
mod scheduler;
mod state;
mod store;
mod types;
mod viewport;
mod window;
mod worker;

pub use backend::{PageSource, RenderBackend};
pub use cache::{CacheConfig, CacheStats, SurfaceCache};
pub use error::{CacheError, RenderError};
pub use request::{JobKey, Stamp, WriteOutcome};
pub use scheduler::PrerenderScheduler;
pub use state::{CacheState, Command, Effect};
pub use store::{CacheEntry, CapacityPolicy, StoreStats, SurfaceStore};
pub use types::*;
pub use viewport::{SlotChange, Viewport, ViewportId, ViewportTable};
pub use window::PrerenderWindow;

/// Pages rendered ahead of the current page
pub const DEFAULT_PRERENDER_AHEAD: usize = 4;

/// Pages rendered behind the current page
pub const DEFAULT_PRERENDER_BEHIND: usize = 2;

/// Memory budget shared by all viewports when no fixed page count is configured
pub const DEFAULT_MEMORY_BUDGET: usize = 512 * 1024 * 1024;

/// Lower bound of a budget-derived capacity: the whole prerender window plus the current page
pub const MIN_PAGES_PER_VIEWPORT: usize = 8;

/// Upper bound of a budget-derived capacity
pub const MAX_PAGES_PER_VIEWPORT: usize = 200;

/// Bytes per pixel of a rendered surface (RGBA)
pub const BYTES_PER_PIXEL: usize = 4;

/// Number of background render workers when none is configured
#[must_use]
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}
