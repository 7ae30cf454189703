//! Collaborators the cache drives but does not implement

use super::error::RenderError;
use super::types::{Dimensions, PageRef, PageVariant, Surface};

/// Pagination of the loaded document
pub trait PageSource: Send + Sync {
    /// Number of pages; stable for the lifetime of the loaded document
    fn page_count(&self) -> usize;

    /// Reference to one page, `None` past the last page
    fn page_ref(&self, index: usize) -> Option<PageRef>;
}

/// Produces a rendered surface for one page.
///
/// Calls are slow and synchronous. Background workers invoke this from
/// their own threads, the interactive thread only on a cache miss.
pub trait RenderBackend: Send + Sync {
    fn render(
        &self,
        page: PageRef,
        dims: Dimensions,
        variant: PageVariant,
    ) -> Result<Surface, RenderError>;
}

impl<F> RenderBackend for F
where
    F: Fn(PageRef, Dimensions, PageVariant) -> Result<Surface, RenderError> + Send + Sync,
{
    fn render(
        &self,
        page: PageRef,
        dims: Dimensions,
        variant: PageVariant,
    ) -> Result<Surface, RenderError> {
        self(page, dims, variant)
    }
}
