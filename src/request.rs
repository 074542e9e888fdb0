//! Render request and response types

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backend::{BackendError, DocumentBackend};
use crate::types::{PixelBuffer, QualityTier, Word};

/// Unique identifier for render requests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Cooperative cancellation flag shared between the pipeline and one task.
///
/// Workers only look at it between pipeline stages.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent; every clone observes it
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Per-request render parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderParams {
    /// User zoom factor (1.0 = 100%)
    pub zoom: f32,
    /// Base rendering DPI
    pub dpi: f32,
    /// Width in pixels the page is displayed at, if known
    pub target_width: Option<u32>,
}

/// One unit of work for a render worker
#[derive(Clone)]
pub struct RenderTask {
    pub id: RequestId,
    /// Document handle captured at dispatch time
    pub doc: Arc<dyn DocumentBackend>,
    pub page: usize,
    pub params: RenderParams,
    pub tier: QualityTier,
    pub cancel: CancelFlag,
}

impl std::fmt::Debug for RenderTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTask")
            .field("id", &self.id)
            .field("page", &self.page)
            .field("params", &self.params)
            .field("tier", &self.tier)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Request sent to render workers
#[derive(Debug)]
pub enum RenderRequest {
    /// Render a page
    Render(RenderTask),

    /// Shutdown the worker
    Shutdown,
}

/// Errors from render tasks
#[derive(Debug, thiserror::Error)]
pub enum RenderFault {
    #[error("document backend: {0}")]
    Backend(#[from] BackendError),

    #[error("pixel conversion: {detail}")]
    Conversion { detail: String },
}

impl RenderFault {
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion { detail: msg.into() }
    }
}

/// Response from render workers
#[derive(Debug)]
pub enum RenderResponse {
    /// Low fidelity bitmap; the task keeps running
    Preview {
        id: RequestId,
        page: usize,
        pixels: Arc<PixelBuffer>,
    },

    /// Rendered page; the task is finished
    Page {
        id: RequestId,
        page: usize,
        pixels: Arc<PixelBuffer>,
        words: Arc<[Word]>,
    },

    /// Task observed its cancel flag and stopped
    Cancelled { id: RequestId, page: usize },

    /// Task failed
    Failed {
        id: RequestId,
        page: usize,
        error: RenderFault,
    },

    /// A worker thread left its loop
    WorkerExited,
}
