//! Render pipeline - worker pool, pending set and completion delivery
//!
//! Workers never touch the page cache. They post responses on a channel that
//! the consumer thread drains with [`RenderPipeline::poll`].

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use log::{debug, warn};

use crate::backend::DocumentBackend;
use crate::request::{
    CancelFlag, RenderFault, RenderParams, RenderRequest, RenderResponse, RenderTask, RequestId,
};
use crate::types::{PixelBuffer, QualityTier, Word};
use crate::worker::{RasterConfig, render_worker};

/// A task currently owned by a worker
#[derive(Debug)]
struct InFlight {
    id: RequestId,
    tier: QualityTier,
    cancel: CancelFlag,
}

/// Outcome of a render task as seen by the consumer thread
#[derive(Debug)]
pub enum Completion {
    Preview {
        page: usize,
        pixels: Arc<PixelBuffer>,
    },
    Page {
        page: usize,
        tier: QualityTier,
        pixels: Arc<PixelBuffer>,
        words: Arc<[Word]>,
    },
    Cancelled {
        page: usize,
    },
    Failed {
        page: usize,
        error: RenderFault,
    },
}

/// Pool of render workers shared by every document the viewer opens
pub struct RenderPipeline {
    request_tx: Sender<RenderRequest>,
    response_rx: Receiver<RenderResponse>,
    workers: Vec<JoinHandle<()>>,
    exited_workers: usize,
    next_request_id: u64,
    /// Page index -> the single task rendering it
    pending: HashMap<usize, InFlight>,
    shutdown_timeout: Duration,
}

impl RenderPipeline {
    /// Spawn `num_workers` render threads
    #[must_use]
    pub fn new(config: RasterConfig, num_workers: usize, shutdown_timeout: Duration) -> Self {
        // Workers share one request queue
        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();

        let workers = (0..num_workers.max(1))
            .filter_map(|i| {
                let config = config.clone();
                let rx = request_rx.clone();
                let tx = response_tx.clone();

                std::thread::Builder::new()
                    .name(format!("render-worker-{i}"))
                    .spawn(move || render_worker(config, rx, tx))
                    .map_err(|e| warn!("Failed to spawn render worker {i}: {e}"))
                    .ok()
            })
            .collect();

        Self {
            request_tx,
            response_rx,
            workers,
            exited_workers: 0,
            next_request_id: 1,
            pending: HashMap::new(),
            shutdown_timeout,
        }
    }

    /// Dispatch a render unless the page already has one in flight.
    ///
    /// Returns `None` when the call was a no-op.
    pub fn render(
        &mut self,
        doc: &Arc<dyn DocumentBackend>,
        page: usize,
        params: RenderParams,
        tier: QualityTier,
    ) -> Option<RequestId> {
        if self.pending.contains_key(&page) {
            debug!("Page {page} already pending, skipping {tier:?} render");
            return None;
        }

        let id = self.next_id();
        let cancel = CancelFlag::new();
        let task = RenderTask {
            id,
            doc: doc.clone(),
            page,
            params,
            tier,
            cancel: cancel.clone(),
        };

        if self.request_tx.send(RenderRequest::Render(task)).is_err() {
            warn!("Render workers are gone, dropping request for page {page}");
            return None;
        }

        debug!("Dispatched {tier:?} render of page {page} ({id:?})");
        self.pending.insert(page, InFlight { id, tier, cancel });
        Some(id)
    }

    #[must_use]
    pub fn is_pending(&self, page: usize) -> bool {
        self.pending.contains_key(&page)
    }

    /// Pages with a task in flight
    #[must_use]
    pub fn pending_pages(&self) -> Vec<usize> {
        let mut pages: Vec<_> = self.pending.keys().copied().collect();
        pages.sort_unstable();
        pages
    }

    /// Ask every in-flight task to stop. Pages stay pending until their
    /// worker reports back.
    pub fn cancel_all(&mut self) {
        for flight in self.pending.values() {
            flight.cancel.cancel();
        }
    }

    /// Drain worker responses. Must be called on the consumer thread.
    pub fn poll(&mut self) -> Vec<Completion> {
        let mut completions = Vec::new();

        while let Ok(response) = self.response_rx.try_recv() {
            if let Some(completion) = self.accept(response) {
                completions.push(completion);
            }
        }

        completions
    }

    fn accept(&mut self, response: RenderResponse) -> Option<Completion> {
        match response {
            RenderResponse::Preview { id, page, pixels } => {
                let live = self
                    .pending
                    .get(&page)
                    .is_some_and(|f| f.id == id && !f.cancel.is_cancelled());
                live.then_some(Completion::Preview { page, pixels })
            }

            RenderResponse::Page {
                id,
                page,
                pixels,
                words,
            } => {
                let flight = self.take_pending(id, page)?;
                if flight.cancel.is_cancelled() {
                    debug!("Dropping result for cancelled render of page {page}");
                    Some(Completion::Cancelled { page })
                } else {
                    Some(Completion::Page {
                        page,
                        tier: flight.tier,
                        pixels,
                        words,
                    })
                }
            }

            RenderResponse::Cancelled { id, page } => {
                self.take_pending(id, page)?;
                Some(Completion::Cancelled { page })
            }

            RenderResponse::Failed { id, page, error } => {
                self.take_pending(id, page)?;
                Some(Completion::Failed { page, error })
            }

            RenderResponse::WorkerExited => {
                self.exited_workers += 1;
                None
            }
        }
    }

    fn take_pending(&mut self, id: RequestId, page: usize) -> Option<InFlight> {
        match self.pending.get(&page) {
            Some(flight) if flight.id == id => self.pending.remove(&page),
            _ => {
                warn!("Response for unknown render {id:?} of page {page}");
                None
            }
        }
    }

    /// Cancel everything, stop the workers and wait for them up to the
    /// shutdown timeout. Workers still busy after that are detached.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        self.cancel_all();
        for _ in 0..self.workers.len() {
            let _ = self.request_tx.send(RenderRequest::Shutdown);
        }

        let deadline = Instant::now() + self.shutdown_timeout;
        while self.exited_workers < self.workers.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.response_rx.recv_timeout(remaining) {
                Ok(response) => {
                    let _ = self.accept(response);
                }
                Err(_) => break,
            }
        }

        let workers = std::mem::take(&mut self.workers);
        let total = workers.len();
        let mut detached = 0;
        for handle in workers {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                detached += 1;
            }
        }

        if detached > 0 {
            warn!("{detached} of {total} render workers did not stop in time, detaching");
        }
        self.pending.clear();
    }

    fn next_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_request_id);
        self.next_request_id += 1;
        id
    }
}

impl Drop for RenderPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeDocument;

    const PARAMS: RenderParams = RenderParams {
        zoom: 1.0,
        dpi: 72.0,
        target_width: Some(100),
    };

    fn pipeline(workers: usize) -> RenderPipeline {
        RenderPipeline::new(RasterConfig::default(), workers, Duration::from_secs(2))
    }

    fn shared(doc: &Arc<FakeDocument>) -> Arc<dyn DocumentBackend> {
        doc.clone()
    }

    fn wait_for(pipeline: &mut RenderPipeline, count: usize) -> Vec<Completion> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut out = Vec::new();
        while out.len() < count && Instant::now() < deadline {
            out.extend(
                pipeline
                    .poll()
                    .into_iter()
                    .filter(|c| !matches!(c, Completion::Preview { .. })),
            );
            std::thread::sleep(Duration::from_millis(2));
        }
        out
    }

    #[test]
    fn second_render_for_pending_page_is_noop() {
        let doc = Arc::new(FakeDocument::uniform(10, 100.0, 140.0).gated());
        let mut pipeline = pipeline(2);
        let handle = shared(&doc);

        assert!(pipeline.render(&handle, 5, PARAMS, QualityTier::Final).is_some());
        assert!(pipeline.render(&handle, 5, PARAMS, QualityTier::Final).is_none());
        assert!(pipeline.render(&handle, 5, PARAMS, QualityTier::Preview).is_none());
        assert_eq!(pipeline.pending_pages(), vec![5]);

        doc.open_gate();
        let done = wait_for(&mut pipeline, 1);

        assert!(matches!(done[0], Completion::Page { page: 5, .. }));
        assert!(!pipeline.is_pending(5));
        assert_eq!(doc.rasterize_calls(), 1);
    }

    #[test]
    fn pending_is_cleared_after_failure() {
        let doc = Arc::new(FakeDocument::uniform(4, 100.0, 140.0).failing_on(2));
        let mut pipeline = pipeline(1);
        let handle = shared(&doc);

        pipeline.render(&handle, 2, PARAMS, QualityTier::Final);
        let done = wait_for(&mut pipeline, 1);

        assert!(matches!(done[0], Completion::Failed { page: 2, .. }));
        assert!(pipeline.pending_pages().is_empty());
        assert!(pipeline.render(&handle, 2, PARAMS, QualityTier::Final).is_some());
    }

    #[test]
    fn cancel_all_suppresses_results() {
        let doc = Arc::new(FakeDocument::uniform(4, 100.0, 140.0).gated());
        let mut pipeline = pipeline(2);
        let handle = shared(&doc);

        pipeline.render(&handle, 0, PARAMS, QualityTier::Final);
        pipeline.render(&handle, 1, PARAMS, QualityTier::Final);
        pipeline.cancel_all();
        doc.open_gate();

        let done = wait_for(&mut pipeline, 2);
        assert_eq!(done.len(), 2);
        assert!(done.iter().all(|c| matches!(c, Completion::Cancelled { .. })));
        assert!(pipeline.pending_pages().is_empty());
    }

    #[test]
    fn completions_for_many_pages_arrive() {
        let doc = Arc::new(FakeDocument::uniform(8, 100.0, 140.0));
        let mut pipeline = pipeline(3);
        let handle = shared(&doc);

        for page in 0..8 {
            pipeline.render(&handle, page, PARAMS, QualityTier::Final);
        }
        let done = wait_for(&mut pipeline, 8);

        let mut pages: Vec<_> = done
            .iter()
            .filter_map(|c| match c {
                Completion::Page { page, .. } => Some(*page),
                _ => None,
            })
            .collect();
        pages.sort_unstable();
        assert_eq!(pages, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn shutdown_waits_for_idle_workers() {
        let doc = Arc::new(FakeDocument::uniform(2, 100.0, 140.0));
        let mut pipeline = pipeline(2);
        let handle = shared(&doc);

        let started = Instant::now();
        pipeline.shutdown();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(pipeline.render(&handle, 0, PARAMS, QualityTier::Final).is_none());
    }
}
