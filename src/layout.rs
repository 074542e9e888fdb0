//! Layout table: per-page screen geometry for continuous vertical scrolling
//!
//! Pages are stacked top to bottom, left aligned at x = 0, separated by a
//! fixed spacing. All values are pixels in content space.

use crate::types::{PageSize, Rect, Word};

/// Points per inch
const POINTS_PER_INCH: f32 = 72.0;

/// Inputs the layout is a pure function of (besides page sizes)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayoutParams {
    pub zoom: f32,
    pub dpi: f32,
    pub max_display_width: f32,
    pub page_spacing: f32,
}

impl LayoutParams {
    /// Display pixels per document point before width clamping
    #[must_use]
    pub fn scale(&self) -> f32 {
        self.zoom * self.dpi / POINTS_PER_INCH
    }
}

/// Screen geometry of one page
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageLayout {
    pub y_offset: f32,
    pub display_width: f32,
    pub display_height: f32,
}

impl PageLayout {
    #[must_use]
    pub fn bottom(&self) -> f32 {
        self.y_offset + self.display_height
    }
}

/// Geometry of every page plus the total content height
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayoutTable {
    pages: Vec<PageLayout>,
    sizes: Vec<PageSize>,
    total_height: f32,
    page_spacing: f32,
}

impl LayoutTable {
    /// Lay out all pages. Pages wider than `max_display_width` are shrunk to
    /// it, with the height scaled by the same ratio.
    #[must_use]
    pub fn compute(sizes: &[PageSize], params: LayoutParams) -> Self {
        let scale = params.scale();
        let mut y = 0.0;
        let mut pages = Vec::with_capacity(sizes.len());

        for (i, size) in sizes.iter().enumerate() {
            let mut width = size.width * scale;
            let mut height = size.height * scale;
            if width > params.max_display_width && width > 0.0 {
                height *= params.max_display_width / width;
                width = params.max_display_width;
            }

            if i > 0 {
                y += params.page_spacing;
            }
            pages.push(PageLayout {
                y_offset: y,
                display_width: width,
                display_height: height,
            });
            y += height;
        }

        Self {
            pages,
            sizes: sizes.to_vec(),
            total_height: y,
            page_spacing: params.page_spacing,
        }
    }

    #[must_use]
    pub fn page(&self, index: usize) -> Option<&PageLayout> {
        self.pages.get(index)
    }

    #[must_use]
    pub fn pages(&self) -> &[PageLayout] {
        &self.pages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    #[must_use]
    pub fn total_height(&self) -> f32 {
        self.total_height
    }

    /// Largest valid scroll offset for a viewport of `viewport_height`
    #[must_use]
    pub fn max_scroll(&self, viewport_height: f32) -> f32 {
        (self.total_height - viewport_height).max(0.0)
    }

    /// Pages intersecting `[scroll_top, scroll_top + height)` widened by
    /// `buffer` pixels on both sides, in page order
    #[must_use]
    pub fn visible_pages(&self, scroll_top: f32, height: f32, buffer: f32) -> Vec<usize> {
        let bottom = scroll_top + height;
        let first = self
            .pages
            .partition_point(|p| p.bottom() + buffer <= scroll_top);

        self.pages[first..]
            .iter()
            .enumerate()
            .take_while(|(_, p)| p.y_offset - buffer < bottom)
            .map(|(i, _)| first + i)
            .collect()
    }

    /// Page whose span (including the gap below it) contains `y`
    #[must_use]
    pub fn page_at(&self, y: f32) -> Option<usize> {
        if y < 0.0 || y > self.total_height {
            return None;
        }
        let idx = self
            .pages
            .partition_point(|p| p.bottom() + self.page_spacing <= y);
        (idx < self.pages.len()).then_some(idx)
    }

    /// Project a word's document-space box into content space
    #[must_use]
    pub fn word_rect(&self, word: &Word) -> Option<Rect> {
        let layout = self.pages.get(word.page_index)?;
        let size = self.sizes.get(word.page_index)?;
        if size.width <= 0.0 || size.height <= 0.0 {
            return None;
        }

        let sx = layout.display_width / size.width;
        let sy = layout.display_height / size.height;
        Some(Rect::new(
            word.bbox.x0 * sx,
            layout.y_offset + word.bbox.y0 * sy,
            word.bbox.x1 * sx,
            layout.y_offset + word.bbox.y1 * sy,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BBox;

    fn params(zoom: f32) -> LayoutParams {
        LayoutParams {
            zoom,
            dpi: 72.0,
            max_display_width: 1200.0,
            page_spacing: 0.0,
        }
    }

    fn letter_pages(n: usize) -> Vec<PageSize> {
        vec![PageSize::new(600.0, 800.0); n]
    }

    #[test]
    fn pages_stack_with_spacing() {
        let layout = LayoutTable::compute(
            &letter_pages(3),
            LayoutParams {
                page_spacing: 5.0,
                ..params(1.0)
            },
        );

        let offsets: Vec<f32> = layout.pages().iter().map(|p| p.y_offset).collect();
        assert_eq!(offsets, vec![0.0, 805.0, 1610.0]);
        assert_eq!(layout.total_height(), 2410.0);
    }

    #[test]
    fn dpi_scales_pages() {
        let layout = LayoutTable::compute(
            &letter_pages(1),
            LayoutParams {
                dpi: 144.0,
                ..params(0.5)
            },
        );
        let page = layout.page(0).expect("one page");
        assert_eq!((page.display_width, page.display_height), (600.0, 800.0));
    }

    #[test]
    fn wide_pages_are_clamped_preserving_aspect() {
        let layout = LayoutTable::compute(&letter_pages(1), params(3.0));
        let page = layout.page(0).expect("one page");

        assert_eq!(page.display_width, 1200.0);
        assert!((page.display_height - 1600.0).abs() < 1e-3);
    }

    #[test]
    fn recomputing_is_idempotent() {
        let sizes = vec![
            PageSize::new(612.0, 792.0),
            PageSize::new(842.0, 595.0),
            PageSize::new(300.0, 300.0),
        ];
        let p = LayoutParams {
            zoom: 1.7,
            dpi: 200.0,
            max_display_width: 1200.0,
            page_spacing: 1.0,
        };

        assert_eq!(LayoutTable::compute(&sizes, p), LayoutTable::compute(&sizes, p));
    }

    #[test]
    fn visible_pages_include_buffer() {
        let layout = LayoutTable::compute(&letter_pages(5), params(1.0));

        // Viewport shows the lower part of page 1 only
        assert_eq!(layout.visible_pages(1000.0, 500.0, 0.0), vec![1]);
        // Buffer reaches into page 2 (starts at 1600)
        assert_eq!(layout.visible_pages(1000.0, 550.0, 0.0), vec![1]);
        assert_eq!(layout.visible_pages(1000.0, 550.0, 100.0), vec![1, 2]);
        // Buffer reaches back into page 0 (ends at 800)
        assert_eq!(layout.visible_pages(850.0, 100.0, 100.0), vec![0, 1]);
    }

    #[test]
    fn visible_pages_at_end_and_empty() {
        let layout = LayoutTable::compute(&letter_pages(2), params(1.0));
        assert_eq!(layout.visible_pages(1500.0, 800.0, 100.0), vec![1]);
        assert!(LayoutTable::default().visible_pages(0.0, 800.0, 100.0).is_empty());
    }

    #[test]
    fn page_at_uses_page_spans() {
        let layout = LayoutTable::compute(
            &letter_pages(3),
            LayoutParams {
                page_spacing: 10.0,
                ..params(1.0)
            },
        );

        assert_eq!(layout.page_at(0.0), Some(0));
        assert_eq!(layout.page_at(805.0), Some(0));
        assert_eq!(layout.page_at(810.0), Some(1));
        assert_eq!(layout.page_at(2419.0), Some(2));
        assert_eq!(layout.page_at(5000.0), None);
    }

    #[test]
    fn word_rect_projects_into_page_span() {
        let layout = LayoutTable::compute(&letter_pages(2), params(2.0));
        let word = Word {
            text: "hi".into(),
            bbox: BBox::new(10.0, 20.0, 30.0, 40.0),
            page_index: 1,
        };

        let rect = layout.word_rect(&word).expect("page exists");
        assert_eq!(rect, Rect::new(20.0, 1600.0 + 40.0, 60.0, 1600.0 + 80.0));
    }
}
