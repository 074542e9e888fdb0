//! Document backend contract
//!
//! The viewer never opens or closes documents itself. The shell opens a
//! backend (see `MupdfBackend` behind the `pdf` feature) and hands it over as
//! an `Arc<dyn DocumentBackend>`; render workers read through the same handle.

use crate::types::{BBox, PageSize};

/// Errors reported by a document backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("page {page} out of range (document has {count} pages)")]
    PageOutOfRange { page: usize, count: usize },

    #[error("failed to open document: {0}")]
    Open(String),

    #[error("{detail}")]
    Generic { detail: String },
}

impl BackendError {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }
}

/// Raw rasterized page as produced by the backend.
///
/// `samples` holds `height` rows of `stride` bytes, each pixel `channels`
/// bytes wide (1 = gray, 3 = RGB, 4 = RGBA).
#[derive(Clone)]
pub struct RawPixmap {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub stride: usize,
    pub samples: Vec<u8>,
}

impl std::fmt::Debug for RawPixmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawPixmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("stride", &self.stride)
            .finish_non_exhaustive()
    }
}

/// A word as extracted by the backend, before page tagging and filtering
#[derive(Clone, Debug, PartialEq)]
pub struct RawWord {
    pub text: String,
    pub bbox: BBox,
}

/// Read-only access to an open multi-page document.
///
/// Implementations must be safe to call from several render workers at once.
pub trait DocumentBackend: Send + Sync {
    fn page_count(&self) -> usize;

    fn page_size(&self, index: usize) -> Result<PageSize, BackendError>;

    /// Rasterize the whole page at `scale` pixels per point
    fn rasterize(&self, index: usize, scale: f32) -> Result<RawPixmap, BackendError>;

    /// Word boxes in document units
    fn extract_words(&self, index: usize) -> Result<Vec<RawWord>, BackendError>;
}

/// Collect native page sizes for every page. Pages the backend cannot
/// measure fall back to US Letter so the layout stays contiguous.
pub fn page_sizes(doc: &dyn DocumentBackend) -> Vec<PageSize> {
    (0..doc.page_count())
        .map(|i| match doc.page_size(i) {
            Ok(size) => size,
            Err(e) => {
                log::warn!("Could not read size of page {i}: {e}");
                PageSize::new(612.0, 792.0)
            }
        })
        .collect()
}
