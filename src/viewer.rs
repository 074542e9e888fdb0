//! Page viewer - owns cache, layout, render pipeline and selection
//!
//! Everything here runs on the consumer thread. The UI shell feeds viewport
//! and pointer input in, calls [`PageViewer::pump`] from its event loop and
//! picks up [`ViewerEvent`]s with [`PageViewer::drain_events`].

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};

use crate::backend::{DocumentBackend, page_sizes};
use crate::cache::{CacheEntry, PageCache};
use crate::layout::LayoutTable;
use crate::pipeline::{Completion, RenderPipeline};
use crate::selection::{CursorHint, SelectionEngine, VisibleWord};
use crate::settings::ViewerConfig;
use crate::state::{Command, Effect, ViewerState};
use crate::types::{Point, QualityTier, Rect, ViewerEvent};
use crate::worker::RasterConfig;
use crate::zoom::ScrollAnchor;

/// Scroll restore waiting for its deadline
#[derive(Clone, Copy, Debug)]
struct PendingRestore {
    due: Instant,
    anchor: ScrollAnchor,
}

/// Continuous-scroll page viewer core
pub struct PageViewer {
    config: ViewerConfig,
    state: ViewerState,
    doc: Option<Arc<dyn DocumentBackend>>,
    pipeline: RenderPipeline,
    cache: PageCache,
    selection: SelectionEngine,
    events: Vec<ViewerEvent>,
    preload_due: Option<Instant>,
    restore: Option<PendingRestore>,
}

impl PageViewer {
    /// Create a viewer and spawn its render workers
    #[must_use]
    pub fn new(config: ViewerConfig) -> Self {
        let pipeline = RenderPipeline::new(
            RasterConfig::from(&config),
            config.render_workers,
            config.shutdown_timeout(),
        );

        Self {
            state: ViewerState::new(&config),
            doc: None,
            pipeline,
            cache: PageCache::new(config.cache_capacity),
            selection: SelectionEngine::new(config.line_gap_threshold),
            events: Vec::new(),
            preload_due: None,
            restore: None,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> &ViewerState {
        &self.state
    }

    #[must_use]
    pub fn document(&self) -> Option<&Arc<dyn DocumentBackend>> {
        self.doc.as_ref()
    }

    /// Show a new document at the current zoom, scrolled to the top
    pub fn set_document(&mut self, doc: Arc<dyn DocumentBackend>) {
        self.open(doc, None);
    }

    /// Show a new document at `zoom`
    pub fn set_document_with_zoom(&mut self, doc: Arc<dyn DocumentBackend>, zoom: f32) {
        self.open(doc, Some(zoom));
    }

    fn open(&mut self, doc: Arc<dyn DocumentBackend>, zoom: Option<f32>) {
        let sizes = page_sizes(doc.as_ref());
        info!("Opening document with {} pages", sizes.len());

        self.doc = Some(doc);
        self.apply_command(Command::SetDocument {
            page_sizes: sizes,
            zoom,
        });
    }

    pub fn close_document(&mut self) {
        if self.doc.take().is_some() {
            info!("Closing document");
        }
        self.apply_command(Command::CloseDocument);
    }

    /// The shell scrolled or resized
    pub fn update_viewport(&mut self, scroll_top: f32, height: f32) {
        self.apply_command(Command::SetViewport { scroll_top, height });
    }

    pub fn set_zoom(&mut self, factor: f32) {
        self.apply_command(Command::SetZoom(factor));
    }

    pub fn zoom_in(&mut self) {
        let factor = self.state.zoom.stepped_in();
        self.set_zoom(factor);
    }

    pub fn zoom_out(&mut self) {
        let factor = self.state.zoom.stepped_out();
        self.set_zoom(factor);
    }

    #[must_use]
    pub fn zoom(&self) -> f32 {
        self.state.zoom.factor
    }

    pub fn set_dpi(&mut self, dpi: f32) {
        self.apply_command(Command::SetDpi(dpi));
    }

    #[must_use]
    pub fn dpi(&self) -> f32 {
        self.state.dpi
    }

    pub fn go_to_page(&mut self, page: usize) {
        self.apply_command(Command::GoToPage(page));
    }

    /// Page under the viewport centre, 0 without a document
    #[must_use]
    pub fn current_page(&self) -> usize {
        self.state.current_page
    }

    #[must_use]
    pub fn scroll_top(&self) -> f32 {
        self.state.scroll_top
    }

    #[must_use]
    pub fn layout(&self) -> &LayoutTable {
        self.state.layout()
    }

    /// Cached render of `page`; counts as a use for LRU purposes
    pub fn cached_page(&mut self, page: usize) -> Option<Arc<CacheEntry>> {
        self.cache.get(page)
    }

    /// Cached pages, most recently used first
    #[must_use]
    pub fn cached_pages(&self) -> Vec<usize> {
        self.cache.pages()
    }

    #[must_use]
    pub fn pending_pages(&self) -> Vec<usize> {
        self.pipeline.pending_pages()
    }

    // Selection

    /// Begin a text drag at a content-space point
    pub fn start_selection(&mut self, point: Point) -> bool {
        let had_selection = self.selection.has_selection();
        let started = self.selection.start_selection(point);
        if had_selection {
            self.events.push(ViewerEvent::SelectionChanged(String::new()));
        }
        started
    }

    pub fn update_selection(&mut self, point: Point) {
        self.selection.update_selection(point);
    }

    /// Finish the drag and return the selected text
    pub fn end_selection(&mut self) -> String {
        let text = self.selection.end_selection();
        if !text.is_empty() {
            debug!("Selected {} characters", text.len());
            self.events.push(ViewerEvent::SelectionChanged(text.clone()));
        }
        text
    }

    #[must_use]
    pub fn is_over_text(&self, point: Point) -> bool {
        self.selection.is_over_text(point)
    }

    #[must_use]
    pub fn cursor_at(&self, point: Point) -> CursorHint {
        self.selection.cursor_at(point)
    }

    #[must_use]
    pub fn selected_text(&self) -> String {
        self.selection.selected_text()
    }

    /// Highlight rectangles of the selected words, content space
    #[must_use]
    pub fn selected_rects(&self) -> Vec<Rect> {
        self.selection.selected_rects()
    }

    #[must_use]
    pub fn visible_words(&self) -> &[VisibleWord] {
        self.selection.visible_words()
    }

    // Event loop

    /// Apply finished renders, then fire due timers
    pub fn pump(&mut self) {
        self.poll_responses();
        self.tick(Instant::now());
    }

    /// Fire deferred steps whose deadline is at or before `now`
    pub fn tick(&mut self, now: Instant) {
        if let Some(restore) = self.restore.filter(|r| r.due <= now) {
            self.restore = None;
            self.apply_command(Command::RestoreScroll(restore.anchor));
        }

        if self.preload_due.is_some_and(|due| due <= now) {
            self.preload_due = None;
            self.preload_nearby_pages();
        }
    }

    /// Drain worker completions into the cache and the event queue
    pub fn poll_responses(&mut self) {
        let mut cache_changed = false;
        let mut cancelled = false;

        for completion in self.pipeline.poll() {
            match completion {
                Completion::Preview { page, pixels } => {
                    if !self.cache.has(page) {
                        self.events.push(ViewerEvent::PreviewReady { page, pixels });
                    }
                }

                Completion::Page {
                    page,
                    tier,
                    pixels,
                    words,
                } => {
                    if page >= self.state.page_count() {
                        continue;
                    }
                    let (entry, evicted) = self.cache.put(page, pixels, words);
                    debug!("Page {page} ready ({tier:?}), evicted {evicted:?}");
                    self.events.push(ViewerEvent::PageReady {
                        page,
                        pixels: entry.pixels.clone(),
                        words: entry.words.clone(),
                    });
                    cache_changed = true;
                }

                Completion::Cancelled { page } => {
                    debug!("Render of page {page} cancelled");
                    cancelled = true;
                }

                Completion::Failed { page, error } => {
                    warn!("Page {page} left unrendered: {error}");
                }
            }
        }

        if cache_changed {
            self.refresh_visible_words();
        }
        // A cancelled task may have blocked a request for the same page
        if cancelled {
            self.render_visible();
        }
    }

    /// Preview-tier renders for the pages around the current page
    pub fn preload_nearby_pages(&mut self) {
        let Some(doc) = self.doc.clone() else {
            return;
        };
        for page in self.state.preload_pages() {
            self.request_if_needed(&doc, page, QualityTier::Preview);
        }
    }

    /// Take the events produced since the last call
    pub fn drain_events(&mut self) -> Vec<ViewerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Stop the render workers, waiting a bounded time for them
    pub fn shutdown(&mut self) {
        self.preload_due = None;
        self.restore = None;
        self.pipeline.shutdown();
    }

    fn apply_command(&mut self, cmd: Command) {
        let effects = self.state.apply(cmd);
        self.execute_effects(effects);
    }

    fn execute_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::CancelRenders => {
                    self.pipeline.cancel_all();
                    self.preload_due = None;
                    self.restore = None;
                }

                Effect::InvalidateCache => self.cache.clear(),

                Effect::ClearSelection => {
                    if self.selection.has_selection() {
                        self.events.push(ViewerEvent::SelectionChanged(String::new()));
                    }
                    self.selection.clear();
                }

                Effect::ScrollTo(y) => self.events.push(ViewerEvent::ScrollTo(y)),

                Effect::CurrentPageChanged(page) => {
                    self.events.push(ViewerEvent::CurrentPageChanged(page));
                }

                Effect::RenderVisible => self.render_visible(),

                Effect::RefreshVisibleWords => self.refresh_visible_words(),

                Effect::ArmPreload => {
                    self.preload_due = Some(Instant::now() + self.config.preload_debounce());
                }

                Effect::ScheduleScrollRestore(anchor) => {
                    self.restore = Some(PendingRestore {
                        due: Instant::now() + self.config.scroll_restore_delay(),
                        anchor,
                    });
                }
            }
        }
    }

    fn render_visible(&mut self) {
        let Some(doc) = self.doc.clone() else {
            return;
        };
        for page in self.state.visible_pages() {
            self.request_if_needed(&doc, page, QualityTier::Final);
        }
    }

    fn request_if_needed(
        &mut self,
        doc: &Arc<dyn DocumentBackend>,
        page: usize,
        tier: QualityTier,
    ) {
        if self.cache.has(page) || self.pipeline.is_pending(page) {
            return;
        }
        let params = self.state.render_params(page);
        self.pipeline.render(doc, page, params, tier);
    }

    fn refresh_visible_words(&mut self) {
        let layout = self.state.layout();
        let words = self
            .state
            .visible_pages()
            .into_iter()
            .filter_map(|page| self.cache.peek(page))
            .flat_map(|entry| {
                entry
                    .words
                    .iter()
                    .filter_map(|word| {
                        layout.word_rect(word).map(|rect| VisibleWord {
                            word: word.clone(),
                            rect,
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        self.selection.set_visible_words(words);
    }
}

impl Drop for PageViewer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_utils::FakeDocument;

    fn test_config() -> ViewerConfig {
        ViewerConfig {
            default_dpi: 72.0,
            page_spacing: 0.0,
            ..ViewerConfig::default()
        }
    }

    fn pump_until(viewer: &mut PageViewer, mut done: impl FnMut(&PageViewer) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(viewer) && Instant::now() < deadline {
            viewer.poll_responses();
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn no_document_is_inert() {
        let mut viewer = PageViewer::new(test_config());
        viewer.update_viewport(100.0, 500.0);
        viewer.set_zoom(2.0);
        viewer.go_to_page(3);
        viewer.tick(Instant::now() + Duration::from_secs(1));

        assert_eq!(viewer.current_page(), 0);
        assert!(viewer.layout().is_empty());
        assert!(viewer.pending_pages().is_empty());
        assert!(!viewer.start_selection(Point::new(10.0, 10.0)));
        assert_eq!(viewer.zoom(), 2.0);
    }

    #[test]
    fn visible_pages_render_and_become_selectable() {
        let mut viewer = PageViewer::new(test_config());
        viewer.set_document(Arc::new(FakeDocument::uniform(6, 200.0, 300.0)));
        viewer.update_viewport(0.0, 400.0);

        assert_eq!(viewer.pending_pages(), vec![0, 1]);
        pump_until(&mut viewer, |v| v.cached_pages().len() == 2);

        assert!(viewer.pending_pages().is_empty());
        assert_eq!(viewer.visible_words().len(), 12);
        // p0l0w0 sits at (10, 10)-(35, 20) in points, 1:1 at 72 dpi
        assert_eq!(viewer.cursor_at(Point::new(20.0, 15.0)), CursorHint::Text);
        assert_eq!(viewer.cursor_at(Point::new(150.0, 15.0)), CursorHint::Arrow);
    }

    #[test]
    fn preload_fires_after_debounce() {
        let doc = Arc::new(FakeDocument::uniform(10, 200.0, 300.0).gated());
        let mut viewer = PageViewer::new(test_config());
        viewer.set_document(doc.clone());
        viewer.update_viewport(0.0, 150.0);
        assert_eq!(viewer.pending_pages(), vec![0]);

        viewer.tick(Instant::now());
        assert_eq!(viewer.pending_pages(), vec![0]);

        viewer.tick(Instant::now() + Duration::from_secs(1));
        assert_eq!(viewer.pending_pages(), vec![0, 1, 2]);

        doc.open_gate();
        pump_until(&mut viewer, |v| v.pending_pages().is_empty());
        assert_eq!(viewer.cached_pages().len(), 3);
    }

    #[test]
    fn events_drain_once() {
        let mut viewer = PageViewer::new(test_config());
        viewer.set_document(Arc::new(FakeDocument::uniform(2, 200.0, 300.0)));

        let events = viewer.drain_events();
        assert!(
            events
                .iter()
                .any(|e| matches!(e, ViewerEvent::CurrentPageChanged(0)))
        );
        assert!(viewer.drain_events().is_empty());
    }
}
