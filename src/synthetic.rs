//! Synthetic document and renderer for driving the cache without a real PDF engine

use std::collections::HashSet;
use std::time::Duration;

use crate::surface::{
    BYTES_PER_PIXEL, Dimensions, PageRef, PageSource, PageVariant, RenderBackend, RenderError,
    Surface,
};

/// Default page size in points (16:9 slide)
const DEFAULT_PAGE_SIZE: (f32, f32) = (1024.0, 576.0);

/// A document of `page_count` identically sized pages
#[derive(Clone, Debug)]
pub struct SyntheticDocument {
    page_count: usize,
    page_size: (f32, f32),
}

impl SyntheticDocument {
    #[must_use]
    pub fn new(page_count: usize) -> Self {
        Self::with_page_size(page_count, DEFAULT_PAGE_SIZE)
    }

    /// Pages with notes are twice as wide: slide on the left, notes on the right
    #[must_use]
    pub fn with_notes(page_count: usize) -> Self {
        Self::with_page_size(page_count, (DEFAULT_PAGE_SIZE.0 * 2.0, DEFAULT_PAGE_SIZE.1))
    }

    #[must_use]
    pub fn with_page_size(page_count: usize, page_size: (f32, f32)) -> Self {
        Self {
            page_count,
            page_size,
        }
    }
}

impl PageSource for SyntheticDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn page_ref(&self, index: usize) -> Option<PageRef> {
        (index < self.page_count).then(|| PageRef::new(index, self.page_size.0, self.page_size.1))
    }
}

/// Paints a per-page gradient over the region a variant shows.
///
/// Can simulate slow rendering and broken pages.
#[derive(Clone, Debug, Default)]
pub struct SyntheticRenderer {
    delay: Duration,
    failing_pages: HashSet<usize>,
}

impl SyntheticRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long in every render
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every render of these pages
    #[must_use]
    pub fn with_failing_pages(mut self, pages: impl IntoIterator<Item = usize>) -> Self {
        self.failing_pages.extend(pages);
        self
    }
}

impl RenderBackend for SyntheticRenderer {
    fn render(
        &self,
        page: PageRef,
        dims: Dimensions,
        variant: PageVariant,
    ) -> Result<Surface, RenderError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.failing_pages.contains(&page.index) {
            return Err(RenderError::backend(
                page.index,
                variant,
                "synthetic page marked unreadable",
            ));
        }

        let width = dims.width as usize;
        let mut pixels = vec![0u8; dims.pixel_count() * BYTES_PER_PIXEL];
        let shade = (page.index % 256) as u8;
        // Horizontal gradient across the whole source page, cropped to the variant
        let (offset, span) = variant.horizontal_span();

        for (i, px) in pixels.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
            let x = i % width.max(1);
            let y = i / width.max(1);
            let page_x = offset + span * x as f32 / width.max(1) as f32;
            px[0] = shade;
            px[1] = (page_x * 255.0) as u8;
            px[2] = ((y * 255) / dims.height.max(1) as usize) as u8;
            px[3] = 0xFF;
        }

        Ok(Surface::new(pixels, dims.width, dims.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_refs_stop_at_last_page() {
        let doc = SyntheticDocument::new(3);
        assert_eq!(doc.page_count(), 3);
        assert!(doc.page_ref(2).is_some());
        assert!(doc.page_ref(3).is_none());
    }

    #[test]
    fn renders_at_requested_size() {
        let doc = SyntheticDocument::new(3);
        let surface = SyntheticRenderer::new()
            .render(doc.page_ref(1).unwrap(), Dimensions::new(6, 4), PageVariant::Full)
            .unwrap();

        assert_eq!(surface.dimensions(), Dimensions::new(6, 4));
        assert_eq!(surface.pixels.len(), 6 * 4 * 4);
        assert_eq!(surface.pixels[0], 1);
    }

    #[test]
    fn variants_render_differently() {
        let doc = SyntheticDocument::with_notes(1);
        let renderer = SyntheticRenderer::new();
        let page = doc.page_ref(0).unwrap();
        let dims = Dimensions::new(4, 4);

        let content = renderer.render(page, dims, PageVariant::ContentHalf).unwrap();
        let notes = renderer.render(page, dims, PageVariant::NotesHalf).unwrap();
        assert_ne!(content, notes);
        // Notes start where the content half ends
        assert_eq!(content.pixels[1], 0);
        assert_eq!(notes.pixels[1], 127);
    }

    #[test]
    fn failing_pages_error() {
        let doc = SyntheticDocument::new(3);
        let renderer = SyntheticRenderer::new().with_failing_pages([2]);

        let err = renderer
            .render(doc.page_ref(2).unwrap(), Dimensions::new(2, 2), PageVariant::Full)
            .unwrap_err();
        assert_eq!(err.page(), 2);
    }
}
