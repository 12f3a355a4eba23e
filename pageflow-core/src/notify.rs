use std::fmt;

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(label)
    }
}

/// Where user-facing messages go. Implementations must not block.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, severity: Severity, message: &str);
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!(target: "pageflow::notify", "{message}"),
            Severity::Warning => warn!(target: "pageflow::notify", "{message}"),
            Severity::Error => error!(target: "pageflow::notify", "{message}"),
        }
    }
}
