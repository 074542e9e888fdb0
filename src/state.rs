//! Viewer state management
//!
//! Pure state machine: commands mutate layout-related state and return the
//! side effects the [`PageViewer`](crate::viewer::PageViewer) has to execute.
//! Nothing here touches the cache, the render pipeline or the clock.

use crate::layout::{LayoutParams, LayoutTable};
use crate::request::RenderParams;
use crate::settings::ViewerConfig;
use crate::types::PageSize;
use crate::zoom::{ScrollAnchor, Zoom};

/// Whether a layout table exists
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No document, nothing laid out
    Unlaid,
    /// Layout table matches the current document, zoom and DPI
    Laid,
}

/// Layout, zoom and viewport state for the open document
#[derive(Clone, Debug)]
pub struct ViewerState {
    phase: Phase,
    page_sizes: Vec<PageSize>,
    layout: LayoutTable,

    /// Scroll fraction of a relayout whose restore has not been applied yet
    pending_anchor: Option<ScrollAnchor>,

    /// Zoom factor and bounds
    pub zoom: Zoom,

    /// Base rendering DPI
    pub dpi: f32,

    /// Top of the viewport in content space
    pub scroll_top: f32,

    /// Height of the viewport in pixels
    pub viewport_height: f32,

    /// Page under the viewport centre (0-indexed)
    pub current_page: usize,

    max_display_width: f32,
    page_spacing: f32,
    viewport_buffer: f32,
    preload_window: usize,
}

impl ViewerState {
    #[must_use]
    pub fn new(config: &ViewerConfig) -> Self {
        Self {
            phase: Phase::Unlaid,
            page_sizes: Vec::new(),
            layout: LayoutTable::default(),
            pending_anchor: None,
            zoom: Zoom::new(
                config.default_zoom,
                config.min_zoom,
                config.max_zoom,
                config.zoom_step,
            ),
            dpi: config.default_dpi,
            scroll_top: 0.0,
            viewport_height: 0.0,
            current_page: 0,
            max_display_width: config.max_display_width,
            page_spacing: config.page_spacing,
            viewport_buffer: config.viewport_buffer,
            preload_window: config.preload_window,
        }
    }

    /// Apply a command and return resulting effects
    #[must_use]
    pub fn apply(&mut self, cmd: Command) -> Vec<Effect> {
        match cmd {
            Command::SetDocument { page_sizes, zoom } => {
                if let Some(zoom) = zoom {
                    self.zoom.set(zoom);
                }
                self.page_sizes = page_sizes;
                self.pending_anchor = None;
                self.relayout();
                self.scroll_top = 0.0;
                self.current_page = 0;

                let mut effects = vec![
                    Effect::CancelRenders,
                    Effect::InvalidateCache,
                    Effect::ClearSelection,
                    Effect::ScrollTo(0.0),
                    Effect::CurrentPageChanged(0),
                ];
                effects.extend(self.viewport_effects());
                effects
            }

            Command::CloseDocument => {
                self.phase = Phase::Unlaid;
                self.page_sizes.clear();
                self.layout = LayoutTable::default();
                self.pending_anchor = None;
                self.scroll_top = 0.0;
                self.current_page = 0;
                vec![
                    Effect::CancelRenders,
                    Effect::InvalidateCache,
                    Effect::ClearSelection,
                    Effect::RefreshVisibleWords,
                ]
            }

            Command::SetViewport { scroll_top, height } => {
                self.scroll_top = sanitize(scroll_top);
                self.viewport_height = sanitize(height);
                if self.phase == Phase::Unlaid {
                    return vec![];
                }
                self.viewport_effects()
            }

            Command::SetZoom(factor) => {
                let anchor = self.anchor();
                if !self.zoom.set(factor) || self.phase == Phase::Unlaid {
                    return vec![];
                }
                self.relayout();
                self.pending_anchor = Some(anchor);
                relayout_effects(anchor)
            }

            Command::SetDpi(dpi) => {
                if !dpi.is_finite() || dpi <= 0.0 || (self.dpi - dpi).abs() <= f32::EPSILON {
                    return vec![];
                }
                let anchor = self.anchor();
                self.dpi = dpi;
                if self.phase == Phase::Unlaid {
                    return vec![];
                }
                self.relayout();
                self.pending_anchor = Some(anchor);
                relayout_effects(anchor)
            }

            Command::RestoreScroll(anchor) => {
                self.pending_anchor = None;
                if self.phase == Phase::Unlaid {
                    return vec![];
                }
                self.scroll_top =
                    anchor.restore(self.layout.total_height(), self.viewport_height);

                let mut effects = vec![Effect::ScrollTo(self.scroll_top)];
                effects.extend(self.viewport_effects());
                effects
            }

            Command::GoToPage(page) => {
                if self.phase == Phase::Unlaid || self.layout.is_empty() {
                    return vec![];
                }
                let clamped = page.min(self.layout.len() - 1);
                let y = self.layout.page(clamped).map_or(0.0, |p| p.y_offset);
                self.scroll_top = y.min(self.layout.max_scroll(self.viewport_height));

                let mut effects = vec![Effect::ScrollTo(self.scroll_top)];
                effects.extend(self.viewport_effects());
                effects
            }
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn layout(&self) -> &LayoutTable {
        &self.layout
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.page_sizes.len()
    }

    #[must_use]
    pub fn layout_params(&self) -> LayoutParams {
        LayoutParams {
            zoom: self.zoom.factor,
            dpi: self.dpi,
            max_display_width: self.max_display_width,
            page_spacing: self.page_spacing,
        }
    }

    /// Pages intersecting the viewport widened by the viewport buffer
    #[must_use]
    pub fn visible_pages(&self) -> Vec<usize> {
        self.layout
            .visible_pages(self.scroll_top, self.viewport_height, self.viewport_buffer)
    }

    /// Pages within the preload window around the current page, nearest
    /// first
    #[must_use]
    pub fn preload_pages(&self) -> Vec<usize> {
        let count = self.layout.len();
        if count == 0 {
            return vec![];
        }

        let mut pages = vec![self.current_page.min(count - 1)];
        for distance in 1..=self.preload_window {
            if let Some(before) = self.current_page.checked_sub(distance) {
                pages.push(before);
            }
            if self.current_page + distance < count {
                pages.push(self.current_page + distance);
            }
        }
        pages
    }

    /// Render parameters for one page, sized to its display width
    #[must_use]
    pub fn render_params(&self, page: usize) -> RenderParams {
        RenderParams {
            zoom: self.zoom.factor,
            dpi: self.dpi,
            target_width: self
                .layout
                .page(page)
                .map(|p| p.display_width.round().max(1.0) as u32),
        }
    }

    fn relayout(&mut self) {
        self.phase = Phase::Unlaid;
        self.layout = LayoutTable::compute(&self.page_sizes, self.layout_params());
        self.phase = Phase::Laid;
    }

    /// Scroll fraction to carry across a relayout. `scroll_top` still belongs
    /// to the previous layout while a restore is pending.
    fn anchor(&self) -> ScrollAnchor {
        if let Some(anchor) = self.pending_anchor {
            return anchor;
        }
        ScrollAnchor::capture(
            self.scroll_top,
            self.layout.total_height(),
            self.viewport_height,
        )
    }

    fn compute_current_page(&self) -> usize {
        self.layout
            .page_at(self.scroll_top + self.viewport_height / 2.0)
            .unwrap_or(0)
    }

    /// Effects of the viewport having moved over a laid out document
    fn viewport_effects(&mut self) -> Vec<Effect> {
        let mut effects = Vec::with_capacity(4);

        let page = self.compute_current_page();
        if page != self.current_page {
            self.current_page = page;
            effects.push(Effect::CurrentPageChanged(page));
        }

        effects.extend([
            Effect::RenderVisible,
            Effect::RefreshVisibleWords,
            Effect::ArmPreload,
        ]);
        effects
    }
}

fn relayout_effects(anchor: ScrollAnchor) -> Vec<Effect> {
    vec![
        Effect::CancelRenders,
        Effect::InvalidateCache,
        Effect::ClearSelection,
        Effect::RefreshVisibleWords,
        Effect::ScheduleScrollRestore(anchor),
    ]
}

fn sanitize(value: f32) -> f32 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

/// Commands that modify viewer state
#[derive(Clone, Debug)]
pub enum Command {
    /// A document was opened; `zoom` overrides the current zoom
    SetDocument {
        page_sizes: Vec<PageSize>,
        zoom: Option<f32>,
    },
    /// The document was closed
    CloseDocument,
    /// The UI shell scrolled or resized the viewport
    SetViewport { scroll_top: f32, height: f32 },
    /// Set the zoom factor
    SetZoom(f32),
    /// Set the base rendering DPI
    SetDpi(f32),
    /// Deferred scroll restore after a relayout
    RestoreScroll(ScrollAnchor),
    /// Scroll to the top of a page
    GoToPage(usize),
}

/// Effects produced by state changes
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Cancel every in-flight render
    CancelRenders,
    /// Invalidate entire cache
    InvalidateCache,
    /// Drop the current selection
    ClearSelection,
    /// Tell the shell to move its scroll position
    ScrollTo(f32),
    /// Current page changed
    CurrentPageChanged(usize),
    /// Render visible pages that are neither cached nor pending
    RenderVisible,
    /// Rebuild the selectable word list from cache and layout
    RefreshVisibleWords,
    /// (Re)start the preload debounce timer
    ArmPreload,
    /// Restore the scroll fraction once the relayout settled
    ScheduleScrollRestore(ScrollAnchor),
}
