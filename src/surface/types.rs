//! Core types for page surfaces

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Which region of a source page a viewport displays
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageVariant {
    /// The whole page
    #[default]
    Full,
    /// Left half: the slide content of a page with notes
    ContentHalf,
    /// Right half: the speaker notes of a page with notes
    NotesHalf,
}

impl PageVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageVariant::Full => "full",
            PageVariant::ContentHalf => "content",
            PageVariant::NotesHalf => "notes",
        }
    }

    /// Horizontal region of the source page as `(offset, width)` fractions
    #[must_use]
    pub fn horizontal_span(self) -> (f32, f32) {
        match self {
            PageVariant::Full => (0.0, 1.0),
            PageVariant::ContentHalf => (0.0, 0.5),
            PageVariant::NotesHalf => (0.5, 0.5),
        }
    }
}

impl fmt::Display for PageVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel dimensions of a viewport or a rendered surface
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A viewport that has never been laid out has no area to render into
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Reference to one page of the loaded document, as handed to a renderer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageRef {
    /// Page index (0-indexed)
    pub index: usize,
    /// Page width in document points
    pub width_pt: f32,
    /// Page height in document points
    pub height_pt: f32,
}

impl PageRef {
    #[must_use]
    pub const fn new(index: usize, width_pt: f32, height_pt: f32) -> Self {
        Self {
            index,
            width_pt,
            height_pt,
        }
    }

    /// Aspect ratio of the region a variant shows
    #[must_use]
    pub fn aspect_ratio(&self, variant: PageVariant) -> f32 {
        let (_, span) = variant.horizontal_span();
        if self.height_pt <= 0.0 {
            return 1.0;
        }
        self.width_pt * span / self.height_pt
    }
}

/// A rendered page surface.
///
/// Holds RGBA pixels (4 bytes per pixel) at the dimensions it was rendered for.
#[derive(Clone, PartialEq, Eq)]
pub struct Surface {
    /// Raw RGBA pixel data
    pub pixels: Vec<u8>,
    /// Surface width in pixels
    pub width: u32,
    /// Surface height in pixels
    pub height: u32,
}

impl Surface {
    #[must_use]
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            pixels,
            width,
            height,
        }
    }

    /// A fully transparent surface of the given size
    #[must_use]
    pub fn blank(dims: Dimensions) -> Self {
        Self::new(
            vec![0; dims.pixel_count() * super::BYTES_PER_PIXEL],
            dims.width,
            dims.height,
        )
    }

    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Memory held by the pixel buffer in bytes
    #[must_use]
    pub fn memory_size(&self) -> usize {
        self.pixels.len()
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Surfaces are handed out by reference count; the store and every painter share one buffer
pub type SharedSurface = Arc<Surface>;
