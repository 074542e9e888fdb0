//! In-memory document backend for tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use crate::backend::{BackendError, DocumentBackend, RawPixmap, RawWord};
use crate::types::{BBox, PageSize};

/// Fake document with configurable page sizes, words and failures.
///
/// By default every page carries three lines of two words each, laid out at
/// 20pt line pitch starting 10pt from the top.
pub struct FakeDocument {
    sizes: Vec<PageSize>,
    words: HashMap<usize, Vec<RawWord>>,
    failing: HashSet<usize>,
    gate: Option<(Mutex<bool>, Condvar)>,
    rasterize_calls: AtomicUsize,
}

impl FakeDocument {
    #[must_use]
    pub fn new(sizes: Vec<PageSize>) -> Self {
        Self {
            sizes,
            words: HashMap::new(),
            failing: HashSet::new(),
            gate: None,
            rasterize_calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn uniform(pages: usize, width: f32, height: f32) -> Self {
        Self::new(vec![PageSize::new(width, height); pages])
    }

    /// Replace the words of one page
    #[must_use]
    pub fn with_words(mut self, page: usize, words: Vec<RawWord>) -> Self {
        self.words.insert(page, words);
        self
    }

    /// Make rasterizing `page` fail
    #[must_use]
    pub fn failing_on(mut self, page: usize) -> Self {
        self.failing.insert(page);
        self
    }

    /// Block every rasterize call until [`FakeDocument::open_gate`]
    #[must_use]
    pub fn gated(mut self) -> Self {
        self.gate = Some((Mutex::new(false), Condvar::new()));
        self
    }

    pub fn open_gate(&self) {
        if let Some((lock, cvar)) = &self.gate {
            *lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = true;
            cvar.notify_all();
        }
    }

    #[must_use]
    pub fn rasterize_calls(&self) -> usize {
        self.rasterize_calls.load(Ordering::SeqCst)
    }

    fn default_words(page: usize) -> Vec<RawWord> {
        (0..3)
            .flat_map(|line| {
                (0..2).map(move |i| {
                    let x0 = 10.0 + i as f32 * 30.0;
                    let y0 = 10.0 + line as f32 * 20.0;
                    RawWord {
                        text: format!("p{page}l{line}w{i}"),
                        bbox: BBox::new(x0, y0, x0 + 25.0, y0 + 10.0),
                    }
                })
            })
            .collect()
    }

    fn check_page(&self, index: usize) -> Result<(), BackendError> {
        if index < self.sizes.len() {
            Ok(())
        } else {
            Err(BackendError::PageOutOfRange {
                page: index,
                count: self.sizes.len(),
            })
        }
    }
}

impl DocumentBackend for FakeDocument {
    fn page_count(&self) -> usize {
        self.sizes.len()
    }

    fn page_size(&self, index: usize) -> Result<PageSize, BackendError> {
        self.check_page(index)?;
        Ok(self.sizes[index])
    }

    fn rasterize(&self, index: usize, scale: f32) -> Result<RawPixmap, BackendError> {
        self.check_page(index)?;
        self.rasterize_calls.fetch_add(1, Ordering::SeqCst);

        if let Some((lock, cvar)) = &self.gate {
            let mut open = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            while !*open {
                open = cvar
                    .wait(open)
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
            }
        }

        if self.failing.contains(&index) {
            return Err(BackendError::generic(format!("page {index} is broken")));
        }

        let size = self.sizes[index];
        let width = (size.width * scale).ceil().max(1.0) as u32;
        let height = (size.height * scale).ceil().max(1.0) as u32;
        let stride = width as usize * 3;

        Ok(RawPixmap {
            width,
            height,
            channels: 3,
            stride,
            samples: vec![0xFF; stride * height as usize],
        })
    }

    fn extract_words(&self, index: usize) -> Result<Vec<RawWord>, BackendError> {
        self.check_page(index)?;
        Ok(self
            .words
            .get(&index)
            .cloned()
            .unwrap_or_else(|| Self::default_words(index)))
    }
}
