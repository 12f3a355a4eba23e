use std::io::{self, Write};

use anyhow::{anyhow, Context, Result};
use crossterm::style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor};
use pageflow_core::{NotificationSink, Severity, UriOpener};
use parking_lot::Mutex;
use tracing::{debug, info};
use url::Url;

/// Prints notifications as a styled status line on stderr, keeping stdout
/// free for the JSON report.
pub struct StatusLine {
    out: Mutex<io::Stderr>,
}

impl StatusLine {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(io::stderr()),
        }
    }

    fn write_line(&self, severity: Severity, message: &str) -> io::Result<()> {
        let color = match severity {
            Severity::Info => Color::Cyan,
            Severity::Warning => Color::Yellow,
            Severity::Error => Color::Red,
        };
        let mut out = self.out.lock();
        crossterm::execute!(
            &mut *out,
            SetForegroundColor(color),
            SetAttribute(Attribute::Bold),
            Print(format!("[{severity}] ")),
            SetAttribute(Attribute::Reset),
            ResetColor,
            Print(message),
            Print("\n"),
        )?;
        out.flush()
    }
}

impl NotificationSink for StatusLine {
    fn notify(&self, severity: Severity, message: &str) {
        info!(target: "pageflow::notify", %severity, "{message}");
        if let Err(err) = self.write_line(severity, message) {
            debug!(%err, "status line write failed");
        }
    }
}

/// Hands absolute URIs to the desktop's default handler.
pub struct SystemOpener;

impl UriOpener for SystemOpener {
    fn open(&self, uri: &str) -> Result<()> {
        let url = Url::parse(uri).with_context(|| format!("not an absolute URI: {uri}"))?;
        if url.cannot_be_a_base() && url.scheme() != "mailto" {
            return Err(anyhow!("refusing to open opaque URI {uri}"));
        }
        open::that(url.as_str()).with_context(|| format!("no handler accepted {url}"))
    }
}
