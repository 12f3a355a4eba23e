//! Off-thread page rendering.
//!
//! Workers only produce values: each finished job becomes a
//! [`RenderCompletion`] on a channel that the interactive side drains. Nothing
//! running on a worker touches page state.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::document::{DocumentBackend, PageBitmap, RenderRequest};
use crate::geometry::Rotation;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to start render workers: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Geometry a bitmap was rendered for. A completion whose key differs from
/// the current one is stale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderKey {
    pub scale: f64,
    pub rotation: Rotation,
    /// Bumped whenever an intrinsic page size changes.
    pub generation: u64,
}

impl RenderKey {
    /// Whether bitmaps made under `other` are wrong for every page, not just
    /// for the one whose size changed.
    pub fn rescales(&self, other: &RenderKey) -> bool {
        self.scale != other.scale || self.rotation != other.rotation
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderJob {
    pub request: RenderRequest,
    pub key: RenderKey,
}

#[derive(Debug)]
pub struct RenderCompletion {
    pub page_index: usize,
    pub key: RenderKey,
    pub result: Result<PageBitmap>,
}

pub struct RenderDispatcher {
    backend: Arc<dyn DocumentBackend>,
    pool: ThreadPool,
    sender: UnboundedSender<RenderCompletion>,
    receiver: UnboundedReceiver<RenderCompletion>,
    in_flight: HashSet<usize>,
}

impl RenderDispatcher {
    /// `workers == 0` lets rayon pick one thread per CPU.
    pub fn new(backend: Arc<dyn DocumentBackend>, workers: usize) -> Result<Self, DispatchError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("pageflow-render-{index}"))
            .build()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        Ok(Self {
            backend,
            pool,
            sender,
            receiver,
            in_flight: HashSet::new(),
        })
    }

    pub fn backend(&self) -> &Arc<dyn DocumentBackend> {
        &self.backend
    }

    /// Queues `job` unless a job for the same page is still outstanding.
    /// Returns whether a job was queued.
    pub fn submit(&mut self, job: RenderJob) -> bool {
        let page_index = job.request.page_index;
        if !self.in_flight.insert(page_index) {
            return false;
        }

        debug!(
            page = page_index,
            width = job.request.width,
            height = job.request.height,
            "queueing render job"
        );
        let backend = Arc::clone(&self.backend);
        let sender = self.sender.clone();
        self.pool.spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| backend.render_page(job.request)))
                .unwrap_or_else(|_| Err(anyhow!("renderer panicked on page {page_index}")));
            if let Err(err) = &result {
                warn!(?err, page = page_index, "page render failed");
            }
            let completion = RenderCompletion {
                page_index,
                key: job.key,
                result,
            };
            if sender.send(completion).is_err() {
                debug!(page = page_index, "render finished after dispatcher shut down");
            }
        });
        true
    }

    pub fn is_pending(&self, page_index: usize) -> bool {
        self.in_flight.contains(&page_index)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Next finished job, if one is already waiting.
    pub fn try_next(&mut self) -> Option<RenderCompletion> {
        let completion = self.receiver.try_recv().ok()?;
        self.in_flight.remove(&completion.page_index);
        Some(completion)
    }

    /// Waits for the next finished job. Returns `None` straight away when
    /// nothing is outstanding.
    pub async fn next(&mut self) -> Option<RenderCompletion> {
        if self.in_flight.is_empty() {
            return self.try_next();
        }
        let completion = self.receiver.recv().await?;
        self.in_flight.remove(&completion.page_index);
        Some(completion)
    }
}
