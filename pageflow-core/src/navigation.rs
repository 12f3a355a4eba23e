//! Index/link activation: jump to a page or hand a URI to the system.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, warn};

use crate::notify::{NotificationSink, Severity};

pub const EXTERNAL_LINK_FAILED: &str = "failed to open external resource";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationTarget {
    ToPage(usize),
    ExternalLink(String),
}

/// One entry of a document index, as produced by the outline extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexElement {
    pub title: String,
    pub depth: usize,
    pub target: NavigationTarget,
}

/// The panel that lists index entries. Hiding it changes the viewport
/// extent, which is why page jumps wait for the layout to settle.
pub trait IndexPanel {
    fn is_open(&self) -> bool;
    fn hide(&mut self);
}

pub trait UriOpener: Send + Sync {
    fn open(&self, uri: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayedScroll {
    pub page: usize,
    pub due: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    ScrollScheduled(DelayedScroll),
    LinkOpened,
    LinkFailed,
    /// Document has no pages to jump to.
    Ignored,
}

pub struct NavigationController {
    opener: Arc<dyn UriOpener>,
    notifier: Arc<dyn NotificationSink>,
    settle_delay: Duration,
    pending: Option<DelayedScroll>,
}

impl NavigationController {
    pub fn new(
        opener: Arc<dyn UriOpener>,
        notifier: Arc<dyn NotificationSink>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            opener,
            notifier,
            settle_delay,
            pending: None,
        }
    }

    pub fn handle(
        &mut self,
        target: &NavigationTarget,
        page_count: usize,
        panel: &mut dyn IndexPanel,
        now: Instant,
    ) -> NavigationOutcome {
        match target {
            NavigationTarget::ToPage(page) => {
                if page_count == 0 {
                    return NavigationOutcome::Ignored;
                }
                let page = (*page).min(page_count - 1);
                let due = if panel.is_open() {
                    panel.hide();
                    now + self.settle_delay
                } else {
                    now
                };
                let scroll = DelayedScroll { page, due };
                debug!(page, "scheduled jump to page");
                self.pending = Some(scroll);
                NavigationOutcome::ScrollScheduled(scroll)
            }
            NavigationTarget::ExternalLink(uri) => match self.opener.open(uri) {
                Ok(()) => NavigationOutcome::LinkOpened,
                Err(err) => {
                    warn!(?err, %uri, "external link handler failed");
                    self.notifier.notify(Severity::Error, EXTERNAL_LINK_FAILED);
                    NavigationOutcome::LinkFailed
                }
            },
        }
    }

    pub fn pending(&self) -> Option<DelayedScroll> {
        self.pending
    }

    /// Hands out the scheduled jump once its delay has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<usize> {
        match self.pending {
            Some(scroll) if scroll.due <= now => {
                self.pending = None;
                Some(scroll.page)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<(Severity, String)>>,
    }

    impl NotificationSink for RecordingSink {
        fn notify(&self, severity: Severity, message: &str) {
            self.messages.lock().push((severity, message.to_owned()));
        }
    }

    struct SchemeOpener;

    impl UriOpener for SchemeOpener {
        fn open(&self, uri: &str) -> Result<()> {
            if uri.starts_with("https://") {
                Ok(())
            } else {
                Err(anyhow!("no handler for {uri}"))
            }
        }
    }

    struct Panel {
        open: bool,
        hidden: usize,
    }

    impl IndexPanel for Panel {
        fn is_open(&self) -> bool {
            self.open
        }

        fn hide(&mut self) {
            self.open = false;
            self.hidden += 1;
        }
    }

    fn controller(sink: Arc<RecordingSink>) -> NavigationController {
        NavigationController::new(Arc::new(SchemeOpener), sink, Duration::from_millis(40))
    }

    #[test]
    fn to_page_closes_panel_and_delays_scroll() {
        let sink = Arc::new(RecordingSink::default());
        let mut nav = controller(sink);
        let mut panel = Panel {
            open: true,
            hidden: 0,
        };
        let now = Instant::now();

        let outcome = nav.handle(&NavigationTarget::ToPage(5), 10, &mut panel, now);
        assert_eq!(
            outcome,
            NavigationOutcome::ScrollScheduled(DelayedScroll {
                page: 5,
                due: now + Duration::from_millis(40),
            })
        );
        assert!(!panel.open);
        assert_eq!(panel.hidden, 1);

        assert_eq!(nav.take_due(now), None);
        assert_eq!(nav.take_due(now + Duration::from_millis(40)), Some(5));
        assert_eq!(nav.take_due(now + Duration::from_secs(1)), None);
    }

    #[test]
    fn to_page_is_clamped_and_immediate_without_panel() {
        let mut nav = controller(Arc::new(RecordingSink::default()));
        let mut panel = Panel {
            open: false,
            hidden: 0,
        };
        let now = Instant::now();
        nav.handle(&NavigationTarget::ToPage(400), 10, &mut panel, now);
        assert_eq!(panel.hidden, 0);
        assert_eq!(nav.take_due(now), Some(9));

        assert_eq!(
            nav.handle(&NavigationTarget::ToPage(0), 0, &mut panel, now),
            NavigationOutcome::Ignored
        );
        assert_eq!(nav.pending(), None);
    }

    #[test]
    fn failed_external_link_notifies_once() {
        let sink = Arc::new(RecordingSink::default());
        let mut nav = controller(sink.clone());
        let mut panel = Panel {
            open: true,
            hidden: 0,
        };

        let outcome = nav.handle(
            &NavigationTarget::ExternalLink("bad://uri".into()),
            10,
            &mut panel,
            Instant::now(),
        );
        assert_eq!(outcome, NavigationOutcome::LinkFailed);
        assert_eq!(
            *sink.messages.lock(),
            vec![(Severity::Error, EXTERNAL_LINK_FAILED.to_owned())]
        );
        assert!(panel.open);
        assert_eq!(nav.pending(), None);

        let outcome = nav.handle(
            &NavigationTarget::ExternalLink("https://example.org".into()),
            10,
            &mut panel,
            Instant::now(),
        );
        assert_eq!(outcome, NavigationOutcome::LinkOpened);
        assert_eq!(sink.messages.lock().len(), 1);
    }
}
