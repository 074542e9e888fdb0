//! Core value types shared by the cache, render pipeline, layout and selection

use std::sync::Arc;

/// Native page size in document units (points)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Bounding box in document units (points), origin at the page's top-left
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    #[must_use]
    pub const fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }
}

/// A point in content space (pixels, scroll offset included)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in content space (pixels)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    #[must_use]
    pub const fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Rectangle spanned by two corner points, in any order
    #[must_use]
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            x0: a.x.min(b.x),
            y0: a.y.min(b.y),
            x1: a.x.max(b.x),
            y1: a.y.max(b.y),
        }
    }

    #[must_use]
    pub fn center(&self) -> Point {
        Point::new((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    /// Inclusive containment
    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x0 && p.x <= self.x1 && p.y >= self.y0 && p.y <= self.y1
    }

    #[must_use]
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x0 <= other.x1 && other.x0 <= self.x1 && self.y0 <= other.y1 && other.y0 <= self.y1
    }
}

/// A word extracted from a page, with its box in document units
#[derive(Clone, Debug, PartialEq)]
pub struct Word {
    pub text: String,
    pub bbox: BBox,
    pub page_index: usize,
}

/// Pixel layout of a [`PixelBuffer`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// 4 bytes per pixel, opaque alpha. Preferred display format.
    Rgba8,
    /// 3 bytes per pixel. Fallback when RGBA conversion is not possible.
    Rgb8,
}

impl PixelFormat {
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 => 4,
            Self::Rgb8 => 3,
        }
    }
}

/// Rendered page bitmap ready for display
#[derive(Clone)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Tightly packed rows
    pub data: Vec<u8>,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Render quality tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QualityTier {
    /// Fast low-DPI pass followed by a normal-quality pass
    Preview,
    /// Single high-quality pass with DPI boosting
    Final,
}

/// Notifications delivered to the UI shell from the consumer thread
#[derive(Clone, Debug)]
pub enum ViewerEvent {
    /// A page finished rendering and is now cached
    PageReady {
        page: usize,
        pixels: Arc<PixelBuffer>,
        words: Arc<[Word]>,
    },
    /// Low fidelity bitmap for a page that has nothing cached yet
    PreviewReady {
        page: usize,
        pixels: Arc<PixelBuffer>,
    },
    /// The page under the viewport centre changed
    CurrentPageChanged(usize),
    /// Selected text changed (empty string when cleared)
    SelectionChanged(String),
    /// The viewer moved the scroll position (zoom restore, go to page)
    ScrollTo(f32),
}
