pub mod backend;
pub mod cache;
pub mod layout;
pub mod pipeline;
pub mod request;
pub mod selection;
pub mod settings;
pub mod state;
pub mod types;
pub mod viewer;
pub mod worker;
pub mod zoom;

#[cfg(feature = "pdf")]
pub mod mupdf_backend;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the viewer surface
pub use backend::{BackendError, DocumentBackend, RawPixmap, RawWord};
pub use cache::{CacheEntry, PageCache};
pub use layout::{LayoutTable, PageLayout};
pub use selection::{CursorHint, VisibleWord};
pub use settings::ViewerConfig;
pub use types::{
    BBox, PageSize, PixelBuffer, PixelFormat, Point, QualityTier, Rect, ViewerEvent, Word,
};
pub use viewer::PageViewer;

#[cfg(feature = "pdf")]
pub use mupdf_backend::MupdfBackend;
