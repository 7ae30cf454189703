//! Error types for the surface cache

use super::types::PageVariant;
use super::viewport::ViewportId;

/// Failure to produce a surface for one page
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("page {page} is out of range (document has {page_count} pages)")]
    PageOutOfRange { page: usize, page_count: usize },

    #[error("rendering page {page} ({variant}) failed: {detail}")]
    Backend {
        page: usize,
        variant: PageVariant,
        detail: String,
    },

    #[error("renderer panicked on page {page}")]
    Panicked { page: usize },
}

impl RenderError {
    pub fn backend(page: usize, variant: PageVariant, detail: impl Into<String>) -> Self {
        Self::Backend {
            page,
            variant,
            detail: detail.into(),
        }
    }

    /// Page the failure belongs to
    #[must_use]
    pub fn page(&self) -> usize {
        match self {
            RenderError::PageOutOfRange { page, .. }
            | RenderError::Backend { page, .. }
            | RenderError::Panicked { page } => *page,
        }
    }
}

/// Errors returned by the cache facade
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("viewport {0} is not registered")]
    UnknownViewport(ViewportId),

    #[error("viewport {viewport} cannot share surfaces with unregistered viewport {target}")]
    UnknownShareTarget {
        viewport: ViewportId,
        target: ViewportId,
    },

    #[error("viewport {0} has no size yet")]
    UnsizedViewport(ViewportId),

    #[error(transparent)]
    Render(#[from] RenderError),
}
