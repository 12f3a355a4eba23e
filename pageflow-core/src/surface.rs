//! Visible-only bitmap cache.
//!
//! A page holds a bitmap only while it is visible. Releasing a page drops its
//! bitmap on the spot; a job that finishes for a page that is no longer
//! visible, or that was rendered for an outdated [`RenderKey`], is dropped
//! instead of installed.

use tracing::{debug, trace};

use crate::dispatch::{RenderCompletion, RenderDispatcher, RenderJob, RenderKey};
use crate::document::PageBitmap;

#[derive(Debug, Default)]
struct PageSlot {
    visible: bool,
    surface: Option<PageBitmap>,
    /// Key of the outstanding job, if any.
    pending: Option<RenderKey>,
    /// Last render failed; stays blank until the page leaves the viewport.
    failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Submitted,
    Resident,
    Pending,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Installed,
    /// Page left the viewport while the job ran.
    DiscardedInvisible,
    /// Scale or rotation changed while the job ran.
    DiscardedStale,
    Failed,
    /// Completion for a page index the cache does not know.
    Ignored,
}

pub struct PageSurfaceCache {
    slots: Vec<PageSlot>,
    dispatcher: RenderDispatcher,
}

impl PageSurfaceCache {
    pub fn new(page_count: usize, dispatcher: RenderDispatcher) -> Self {
        let mut slots = Vec::with_capacity(page_count);
        slots.resize_with(page_count, PageSlot::default);
        Self { slots, dispatcher }
    }

    /// Marks `job`'s page visible and queues a render unless the page already
    /// has a bitmap, has a job outstanding or failed since it became visible.
    pub fn acquire(&mut self, job: RenderJob) -> Acquire {
        let page = job.request.page_index;
        let Some(slot) = self.slots.get_mut(page) else {
            return Acquire::Failed;
        };
        slot.visible = true;

        if slot.surface.is_some() {
            return Acquire::Resident;
        }
        if slot.pending.is_some() {
            return Acquire::Pending;
        }
        if slot.failed {
            return Acquire::Failed;
        }

        if self.dispatcher.submit(job) {
            slot.pending = Some(job.key);
            Acquire::Submitted
        } else {
            // the dispatcher still tracks a job we already settled
            Acquire::Pending
        }
    }

    /// Marks the page invisible and frees its bitmap. An outstanding job is
    /// left running; its result will be dropped on arrival unless the page
    /// is visible again by then.
    pub fn release(&mut self, page: usize) -> bool {
        let Some(slot) = self.slots.get_mut(page) else {
            return false;
        };
        slot.visible = false;
        slot.failed = false;
        let freed = slot.surface.take();
        if let Some(bitmap) = &freed {
            trace!(page, bytes = bitmap.byte_len(), "released page surface");
        }
        freed.is_some()
    }

    /// Drops every bitmap, e.g. after the scale changed. Visibility flags and
    /// outstanding jobs are kept.
    pub fn invalidate_all(&mut self) -> usize {
        let mut dropped = 0;
        for slot in &mut self.slots {
            slot.failed = false;
            if slot.surface.take().is_some() {
                dropped += 1;
            }
        }
        dropped
    }

    /// Drops one page's bitmap without touching its visibility.
    pub fn invalidate(&mut self, page: usize) -> bool {
        let Some(slot) = self.slots.get_mut(page) else {
            return false;
        };
        slot.failed = false;
        slot.surface.take().is_some()
    }

    pub fn on_job_complete(
        &mut self,
        completion: RenderCompletion,
        current: RenderKey,
    ) -> CompletionOutcome {
        let page = completion.page_index;
        let Some(slot) = self.slots.get_mut(page) else {
            return CompletionOutcome::Ignored;
        };
        slot.pending = None;

        if !slot.visible {
            debug!(page, "dropping render for page that left the viewport");
            return CompletionOutcome::DiscardedInvisible;
        }
        if completion.key != current {
            debug!(page, "dropping render made for outdated geometry");
            return CompletionOutcome::DiscardedStale;
        }
        match completion.result {
            Ok(bitmap) => {
                slot.surface = Some(bitmap);
                CompletionOutcome::Installed
            }
            Err(_) => {
                slot.failed = true;
                CompletionOutcome::Failed
            }
        }
    }

    pub fn try_next_completion(&mut self) -> Option<RenderCompletion> {
        self.dispatcher.try_next()
    }

    pub async fn next_completion(&mut self) -> Option<RenderCompletion> {
        self.dispatcher.next().await
    }

    pub fn surface(&self, page: usize) -> Option<&PageBitmap> {
        self.slots.get(page)?.surface.as_ref()
    }

    pub fn is_visible(&self, page: usize) -> bool {
        self.slots.get(page).is_some_and(|slot| slot.visible)
    }

    pub fn is_pending(&self, page: usize) -> bool {
        self.slots.get(page).is_some_and(|slot| slot.pending.is_some())
    }

    pub fn has_failed(&self, page: usize) -> bool {
        self.slots.get(page).is_some_and(|slot| slot.failed)
    }

    pub fn resident_pages(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(page, slot)| slot.surface.as_ref().map(|_| page))
    }

    pub fn resident_bytes(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.surface.as_ref())
            .map(PageBitmap::byte_len)
            .sum()
    }

    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    pub fn page_count(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentBackend, DocumentInfo, DocumentMetadata, RenderRequest};
    use crate::geometry::{Rotation, Size};
    use anyhow::{anyhow, Result};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    struct SlowBackend {
        info: DocumentInfo,
        delay: Duration,
    }

    impl DocumentBackend for SlowBackend {
        fn info(&self) -> &DocumentInfo {
            &self.info
        }

        fn render_page(&self, request: RenderRequest) -> Result<PageBitmap> {
            std::thread::sleep(self.delay);
            if request.page_index == 1 {
                return Err(anyhow!("broken page"));
            }
            Ok(PageBitmap {
                width: 1,
                height: 1,
                pixels: vec![0, 0, 0, 255],
            })
        }
    }

    const KEY: RenderKey = RenderKey {
        scale: 1.0,
        rotation: Rotation::Deg0,
        generation: 0,
    };

    fn cache(delay: Duration) -> PageSurfaceCache {
        let backend = Arc::new(SlowBackend {
            info: DocumentInfo {
                id: Uuid::nil(),
                path: PathBuf::from("slow.pdf"),
                page_sizes: vec![Size::new(1.0, 1.0); 3],
                metadata: DocumentMetadata::default(),
            },
            delay,
        });
        PageSurfaceCache::new(3, RenderDispatcher::new(backend, 2).unwrap())
    }

    fn job(page_index: usize, key: RenderKey) -> RenderJob {
        RenderJob {
            request: RenderRequest {
                page_index,
                width: 1,
                height: 1,
                rotation: key.rotation,
            },
            key,
        }
    }

    async fn settle(cache: &mut PageSurfaceCache, key: RenderKey) -> Vec<CompletionOutcome> {
        let mut outcomes = Vec::new();
        while let Some(completion) =
            tokio::time::timeout(Duration::from_secs(5), cache.next_completion())
                .await
                .unwrap()
        {
            outcomes.push(cache.on_job_complete(completion, key));
        }
        outcomes
    }

    #[tokio::test]
    async fn visible_page_gets_its_bitmap() {
        let mut cache = cache(Duration::ZERO);
        assert_eq!(cache.acquire(job(0, KEY)), Acquire::Submitted);
        assert_eq!(cache.acquire(job(0, KEY)), Acquire::Pending);

        assert_eq!(settle(&mut cache, KEY).await, vec![CompletionOutcome::Installed]);
        assert!(cache.surface(0).is_some());
        assert_eq!(cache.acquire(job(0, KEY)), Acquire::Resident);
        assert_eq!(cache.resident_bytes(), 4);
    }

    #[tokio::test]
    async fn completion_after_release_is_discarded() {
        let mut cache = cache(Duration::from_millis(50));
        cache.acquire(job(0, KEY));
        assert!(!cache.release(0));

        assert_eq!(
            settle(&mut cache, KEY).await,
            vec![CompletionOutcome::DiscardedInvisible]
        );
        assert!(cache.surface(0).is_none());
        assert!(!cache.is_pending(0));
        assert_eq!(cache.resident_pages().count(), 0);
    }

    #[tokio::test]
    async fn page_back_in_view_before_completion_keeps_result() {
        let mut cache = cache(Duration::from_millis(30));
        cache.acquire(job(0, KEY));
        cache.release(0);
        assert_eq!(cache.acquire(job(0, KEY)), Acquire::Pending);

        assert_eq!(settle(&mut cache, KEY).await, vec![CompletionOutcome::Installed]);
        assert!(cache.surface(0).is_some());
    }

    #[tokio::test]
    async fn stale_key_is_never_installed() {
        let mut cache = cache(Duration::from_millis(20));
        cache.acquire(job(2, KEY));
        let zoomed = RenderKey {
            scale: 2.0,
            ..KEY
        };
        assert_eq!(
            settle(&mut cache, zoomed).await,
            vec![CompletionOutcome::DiscardedStale]
        );
        assert!(cache.surface(2).is_none());
        assert_eq!(cache.acquire(job(2, zoomed)), Acquire::Submitted);
    }

    #[tokio::test]
    async fn failed_page_is_not_retried_until_it_leaves_the_viewport() {
        let mut cache = cache(Duration::ZERO);
        cache.acquire(job(1, KEY));
        assert_eq!(settle(&mut cache, KEY).await, vec![CompletionOutcome::Failed]);
        assert!(cache.has_failed(1));
        assert_eq!(cache.acquire(job(1, KEY)), Acquire::Failed);

        cache.release(1);
        assert_eq!(cache.acquire(job(1, KEY)), Acquire::Submitted);
    }

    #[tokio::test]
    async fn release_and_invalidate_drop_bitmaps() {
        let mut cache = cache(Duration::ZERO);
        cache.acquire(job(0, KEY));
        cache.acquire(job(2, KEY));
        settle(&mut cache, KEY).await;
        assert_eq!(cache.resident_pages().collect::<Vec<_>>(), vec![0, 2]);

        assert!(cache.release(0));
        assert!(!cache.release(0));
        assert!(!cache.is_visible(0));
        assert_eq!(cache.invalidate_all(), 1);
        assert!(cache.is_visible(2));
        assert!(cache.surface(2).is_none());
        assert!(!cache.release(99));
    }
}
