//! Which pages to keep warm around the current one

use super::{DEFAULT_PRERENDER_AHEAD, DEFAULT_PRERENDER_BEHIND};

/// Pages prerendered ahead of and behind the current page
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrerenderWindow {
    pub ahead: usize,
    pub behind: usize,
}

impl Default for PrerenderWindow {
    fn default() -> Self {
        Self {
            ahead: DEFAULT_PRERENDER_AHEAD,
            behind: DEFAULT_PRERENDER_BEHIND,
        }
    }
}

impl PrerenderWindow {
    #[must_use]
    pub const fn new(ahead: usize, behind: usize) -> Self {
        Self { ahead, behind }
    }

    /// Pages to prerender, in render order.
    ///
    /// Forward pages nearest-first, then backward pages nearest-first. The
    /// current page itself is excluded and the window is clamped to the
    /// document.
    #[must_use]
    pub fn pages(&self, current: usize, page_count: usize) -> Vec<usize> {
        if page_count == 0 || current >= page_count {
            return Vec::new();
        }

        let last = page_count - 1;
        let forward = (current + 1)..=last.min(current.saturating_add(self.ahead));
        let backward = (current.saturating_sub(self.behind)..current).rev();

        forward.chain(backward).collect()
    }
}
