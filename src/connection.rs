//! CDP attachment to an already-running Chrome.
//!
//! Every tool goes through [`BrowserHandle::connect`]: resolve the websocket
//! endpoint from the remote-debugging HTTP interface, spawn the event handler
//! task, and expose page selection helpers. The handle never launches or
//! closes Chrome; it only detaches on shutdown.

use std::sync::Arc;

use chromiumoxide::browser::Browser;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;
use futures::StreamExt;
use log::{debug, warn};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::ToolsConfig;

/// Errors raised while attaching to Chrome or locating a page.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(
        "could not connect to Chrome at {url}: {source}\n\
         Is Chrome running with --remote-debugging-port? Try the start command."
    )]
    Connect {
        url: String,
        #[source]
        source: CdpError,
    },
    #[error("CDP request failed: {0}")]
    Cdp(#[from] CdpError),
}

/// A live attachment to a running Chrome instance.
///
/// Holds the CDP connection plus the background task that pumps protocol
/// events. Dropping the handle detaches; it never terminates the browser.
pub struct BrowserHandle {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
}

impl BrowserHandle {
    /// Attach to the remote-debugging endpoint described by `config`.
    pub async fn connect(config: &ToolsConfig) -> Result<Self, ConnectionError> {
        let url = config.debug_url();
        let (browser, mut handler) =
            Browser::connect(&url)
                .await
                .map_err(|source| ConnectionError::Connect {
                    url: url.clone(),
                    source,
                })?;
        debug!("attached to Chrome at {url}");

        let join = tokio::spawn(async move {
            while let Some(result) = handler.next().await {
                if let Err(err) = result {
                    warn!("CDP handler error: {err}");
                }
            }
        });

        Ok(BrowserHandle {
            browser: Arc::new(browser),
            handler: join,
        })
    }

    /// The underlying `chromiumoxide` browser.
    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    /// All attached pages, in Chrome's target order.
    pub async fn pages(&self) -> Result<Vec<Page>, ConnectionError> {
        Ok(self.browser.pages().await?)
    }

    /// The page a command should act on: the most recently opened page that
    /// is not a browser-internal target. Opens `about:blank` when no such
    /// page exists.
    pub async fn active_page(&self) -> Result<Page, ConnectionError> {
        let pages = self.pages().await?;
        for page in pages.into_iter().rev() {
            let url = page.url().await?.unwrap_or_default();
            if is_user_page(&url) {
                debug!("active page: {url}");
                return Ok(page);
            }
        }

        debug!("no user page found, opening about:blank");
        Ok(self.browser.new_page("about:blank").await?)
    }

    /// Open a new tab at `url`.
    pub async fn new_page(&self, url: &str) -> Result<Page, ConnectionError> {
        Ok(self.browser.new_page(url).await?)
    }

    /// Detach from the browser, leaving it running.
    pub async fn shutdown(self) {
        self.handler.abort();
        let _ = self.handler.await;
    }
}

/// Whether a target URL belongs to a user page rather than browser UI.
fn is_user_page(url: &str) -> bool {
    !url.starts_with("chrome://")
        && !url.starts_with("chrome-extension://")
        && !url.starts_with("devtools://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_targets_are_not_user_pages() {
        assert!(!is_user_page("chrome://newtab/"));
        assert!(!is_user_page("chrome://settings"));
        assert!(!is_user_page("devtools://devtools/bundled/inspector.html"));
        assert!(!is_user_page("chrome-extension://abcdef/popup.html"));
    }

    #[test]
    fn regular_urls_are_user_pages() {
        assert!(is_user_page("https://example.com/"));
        assert!(is_user_page("http://localhost:3000/app"));
        assert!(is_user_page("about:blank"));
        assert!(is_user_page("file:///tmp/page.html"));
        // Empty URL happens for pages still initialising; treat as usable.
        assert!(is_user_page(""));
    }
}
