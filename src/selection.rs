//! Text selection over the words of the visible pages
//!
//! Points and word rectangles are in content space. The engine never looks at
//! the cache itself; the viewer hands it the projected words of every cached
//! visible page whenever the cache or the viewport changes.

use crate::types::{Point, Rect, Word};

/// Default vertical distance (px) between word centres that starts a new line
pub const DEFAULT_LINE_GAP: f32 = 15.0;

/// A word of a visible page together with its content-space rectangle
#[derive(Clone, Debug, PartialEq)]
pub struct VisibleWord {
    pub word: Word,
    pub rect: Rect,
}

/// Pointer shape the shell should show
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorHint {
    /// I-beam over selectable text
    Text,
    Arrow,
}

/// Rubber-band text selection state
#[derive(Clone, Debug)]
pub struct SelectionEngine {
    line_gap_threshold: f32,
    is_selecting: bool,
    start_point: Option<Point>,
    current_point: Option<Point>,
    visible_words: Vec<VisibleWord>,
    /// Indices into `visible_words`, in reading order
    selected: Vec<usize>,
}

impl Default for SelectionEngine {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_GAP)
    }
}

impl SelectionEngine {
    #[must_use]
    pub fn new(line_gap_threshold: f32) -> Self {
        Self {
            line_gap_threshold,
            is_selecting: false,
            start_point: None,
            current_point: None,
            visible_words: Vec::new(),
            selected: Vec::new(),
        }
    }

    /// Replace the selectable words. An existing selection rectangle is
    /// evaluated again against the new list.
    pub fn set_visible_words(&mut self, words: Vec<VisibleWord>) {
        self.visible_words = words;
        self.selected.clear();
        if self.start_point.is_some() && self.current_point.is_some() {
            self.recompute();
        }
    }

    #[must_use]
    pub fn visible_words(&self) -> &[VisibleWord] {
        &self.visible_words
    }

    /// Begin a drag at `point`. Any previous selection is dropped; the drag
    /// only starts when `point` is over a word.
    pub fn start_selection(&mut self, point: Point) -> bool {
        self.clear();
        if self.get_word_at(point).is_none() {
            return false;
        }

        self.is_selecting = true;
        self.start_point = Some(point);
        self.current_point = Some(point);
        true
    }

    /// Move the drag end. Ignored unless a drag is in progress.
    pub fn update_selection(&mut self, point: Point) -> bool {
        if !self.is_selecting {
            return false;
        }
        self.current_point = Some(point);
        self.recompute();
        true
    }

    /// Finish the drag and return the selected text. The selected words stay
    /// highlighted until the next selection starts.
    pub fn end_selection(&mut self) -> String {
        if !self.is_selecting {
            return String::new();
        }
        self.is_selecting = false;
        self.selected_text()
    }

    #[must_use]
    pub fn is_selecting(&self) -> bool {
        self.is_selecting
    }

    #[must_use]
    pub fn has_selection(&self) -> bool {
        !self.selected.is_empty()
    }

    /// First visible word whose rectangle contains `point`
    #[must_use]
    pub fn get_word_at(&self, point: Point) -> Option<usize> {
        self.visible_words
            .iter()
            .position(|w| w.rect.contains(point))
    }

    #[must_use]
    pub fn is_over_text(&self, point: Point) -> bool {
        self.get_word_at(point).is_some()
    }

    #[must_use]
    pub fn cursor_at(&self, point: Point) -> CursorHint {
        if self.is_over_text(point) {
            CursorHint::Text
        } else {
            CursorHint::Arrow
        }
    }

    /// Selected words in reading order
    pub fn selected_words(&self) -> impl Iterator<Item = &VisibleWord> {
        self.selected.iter().map(|&i| &self.visible_words[i])
    }

    /// Rectangles to highlight
    #[must_use]
    pub fn selected_rects(&self) -> Vec<Rect> {
        self.selected_words().map(|w| w.rect).collect()
    }

    /// Selected words joined in reading order.
    ///
    /// Words on the same line are separated by a space, a vertical jump larger
    /// than the line gap threshold starts a new line and a page change inserts
    /// a page marker.
    #[must_use]
    pub fn selected_text(&self) -> String {
        let mut text = String::new();
        let mut last: Option<(usize, f32)> = None;

        for word in self.selected_words() {
            let page = word.word.page_index;
            let y = word.rect.center().y;

            match last {
                Some((last_page, _)) if last_page != page => {
                    text.push_str(&format!("\n--- page {} ---\n", page + 1));
                }
                Some((_, last_y)) if (y - last_y).abs() > self.line_gap_threshold => {
                    text.push('\n');
                }
                _ if !text.is_empty() && !text.ends_with([' ', '\n']) => text.push(' '),
                _ => {}
            }

            text.push_str(&word.word.text);
            last = Some((page, y));
        }

        text.trim().to_string()
    }

    /// Back to idle with nothing selected
    pub fn clear(&mut self) {
        self.is_selecting = false;
        self.start_point = None;
        self.current_point = None;
        self.selected.clear();
    }

    fn recompute(&mut self) {
        self.selected.clear();
        let (Some(start), Some(current)) = (self.start_point, self.current_point) else {
            return;
        };
        let band = Rect::from_corners(start, current);

        let mut hits: Vec<usize> = (0..self.visible_words.len())
            .filter(|&i| band.contains(self.visible_words[i].rect.center()))
            .collect();

        if hits.is_empty() {
            hits = (0..self.visible_words.len())
                .filter(|&i| band.intersects(&self.visible_words[i].rect))
                .collect();
        }

        let words = &self.visible_words;
        hits.sort_by(|&a, &b| {
            let (ca, cb) = (words[a].rect.center(), words[b].rect.center());
            words[a]
                .word
                .page_index
                .cmp(&words[b].word.page_index)
                .then(ca.y.total_cmp(&cb.y))
                .then(ca.x.total_cmp(&cb.x))
        });
        self.selected = hits;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BBox;

    fn word(text: &str, page: usize, rect: Rect) -> VisibleWord {
        VisibleWord {
            word: Word {
                text: text.into(),
                bbox: BBox::new(rect.x0, rect.y0, rect.x1, rect.y1),
                page_index: page,
            },
            rect,
        }
    }

    /// Two pages, 1000px tall, two lines of two words each
    fn two_pages() -> Vec<VisibleWord> {
        let mut words = Vec::new();
        for page in 0..2 {
            let top = page as f32 * 1000.0;
            for (line, y) in [(0, 900.0), (1, 930.0)] {
                for (i, x) in [(0, 10.0), (1, 60.0)] {
                    words.push(word(
                        &format!("p{page}l{line}w{i}"),
                        page,
                        Rect::new(x, top + y, x + 40.0, top + y + 12.0),
                    ));
                }
            }
        }
        words
    }

    fn engine(words: Vec<VisibleWord>) -> SelectionEngine {
        let mut engine = SelectionEngine::default();
        engine.set_visible_words(words);
        engine
    }

    #[test]
    fn start_outside_text_stays_idle() {
        let mut sel = engine(two_pages());
        assert!(!sel.start_selection(Point::new(500.0, 10.0)));
        assert!(!sel.is_selecting());
        assert!(!sel.update_selection(Point::new(600.0, 20.0)));
        assert_eq!(sel.end_selection(), "");
    }

    #[test]
    fn selection_across_pages_inserts_marker() {
        let mut sel = engine(two_pages());

        assert!(sel.start_selection(Point::new(15.0, 905.0)));
        sel.update_selection(Point::new(95.0, 1910.0));

        assert_eq!(
            sel.end_selection(),
            "p0l0w0 p0l0w1\np0l1w0 p0l1w1\n--- page 2 ---\np1l0w0 p1l0w1"
        );
        assert!(!sel.is_selecting());
        assert_eq!(sel.selected_rects().len(), 6);
    }

    #[test]
    fn reverse_drag_keeps_reading_order() {
        let mut sel = engine(two_pages());

        assert!(sel.start_selection(Point::new(95.0, 940.0)));
        sel.update_selection(Point::new(5.0, 895.0));

        assert_eq!(sel.end_selection(), "p0l0w0 p0l0w1\np0l1w0 p0l1w1");
    }

    #[test]
    fn intersection_fallback_only_when_no_centre_inside() {
        let mut sel = engine(two_pages());

        // Band covers the left edge of p0l0w0 but not its centre
        assert!(sel.start_selection(Point::new(12.0, 902.0)));
        sel.update_selection(Point::new(20.0, 904.0));
        assert_eq!(sel.selected_text(), "p0l0w0");

        // Once a centre is inside, partially covered words are not added
        sel.update_selection(Point::new(85.0, 908.0));
        assert_eq!(sel.selected_text(), "p0l0w0 p0l0w1");
        sel.update_selection(Point::new(85.0, 935.0));
        assert_eq!(sel.selected_text(), "p0l0w0 p0l0w1");
    }

    #[test]
    fn cursor_and_hit_testing() {
        let sel = engine(two_pages());
        assert_eq!(sel.get_word_at(Point::new(65.0, 935.0)), Some(3));
        assert!(sel.is_over_text(Point::new(10.0, 900.0)));
        assert_eq!(sel.cursor_at(Point::new(10.0, 900.0)), CursorHint::Text);
        assert_eq!(sel.cursor_at(Point::new(5.0, 5.0)), CursorHint::Arrow);
    }

    #[test]
    fn new_words_reevaluate_selection() {
        let mut sel = engine(two_pages());
        sel.start_selection(Point::new(15.0, 905.0));
        sel.update_selection(Point::new(95.0, 1950.0));
        let _ = sel.end_selection();
        assert_eq!(sel.selected_rects().len(), 8);

        // Page 1 scrolled out of the cache
        let first_page = two_pages()
            .into_iter()
            .filter(|w| w.word.page_index == 0)
            .collect();
        sel.set_visible_words(first_page);
        assert_eq!(sel.selected_text(), "p0l0w0 p0l0w1\np0l1w0 p0l1w1");
    }

    #[test]
    fn clear_drops_highlight() {
        let mut sel = engine(two_pages());
        sel.start_selection(Point::new(15.0, 905.0));
        sel.update_selection(Point::new(95.0, 945.0));
        sel.clear();

        assert!(!sel.has_selection());
        assert_eq!(sel.selected_text(), "");
    }

    #[test]
    fn same_line_words_with_jitter_share_a_line() {
        let words = vec![
            word("hello", 0, Rect::new(0.0, 100.0, 40.0, 112.0)),
            word("world", 0, Rect::new(50.0, 104.0, 90.0, 116.0)),
            word("again", 0, Rect::new(0.0, 140.0, 40.0, 152.0)),
        ];
        let mut sel = engine(words);
        sel.start_selection(Point::new(1.0, 101.0));
        sel.update_selection(Point::new(95.0, 155.0));

        assert_eq!(sel.end_selection(), "hello world\nagain");
    }
}
