//! Page handles and locators

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::engine::{BrowserEngine, Navigation, PageId};
use crate::error::{E2eError, E2eResult};

/// Interval between `expect_text` polls
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct PageTimeouts {
    pub navigation: Duration,
    pub assertion: Duration,
}

/// A page (tab) inside a role session's browsing context
pub struct Page {
    engine: Arc<dyn BrowserEngine>,
    id: PageId,
    timeouts: PageTimeouts,
}

impl Page {
    pub(crate) fn new(engine: Arc<dyn BrowserEngine>, id: PageId, timeouts: PageTimeouts) -> Self {
        Self {
            engine,
            id,
            timeouts,
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    /// Navigate to a path relative to the base URL and wait for it to settle
    pub async fn goto(&self, path: &str) -> E2eResult<Navigation> {
        debug!(page = %self.id, "goto {}", path);
        // Small grace period so the engine reports its own timeout first
        let limit = self.timeouts.navigation + Duration::from_secs(1);
        match tokio::time::timeout(limit, self.engine.goto(self.id, path, self.timeouts.navigation)).await {
            Ok(Ok(navigation)) => Ok(navigation),
            Ok(Err(e @ E2eError::NavigationFailure { .. })) => Err(e),
            Ok(Err(e)) => Err(E2eError::NavigationFailure {
                path: path.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(E2eError::NavigationFailure {
                path: path.to_string(),
                reason: format!("not settled within {:?}", self.timeouts.navigation),
            }),
        }
    }

    pub fn locator(&self, selector: &str) -> Locator<'_> {
        Locator {
            page: self,
            selector: selector.to_string(),
        }
    }

    pub async fn close(self) -> E2eResult<()> {
        self.engine.close_page(self.id).await
    }
}

/// Lazy reference to the elements matching a selector
pub struct Locator<'a> {
    page: &'a Page,
    selector: String,
}

impl Locator<'_> {
    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Text of the first match right now, without waiting
    pub async fn text_content(&self) -> E2eResult<Option<String>> {
        self.page
            .engine
            .text_content(self.page.id, &self.selector)
            .await
    }

    /// Wait until the first match's text equals `expected`
    ///
    /// Whitespace is normalized on both sides before comparing.
    pub async fn expect_text(&self, expected: &str) -> E2eResult<()> {
        let expected = normalize_whitespace(expected);
        let deadline = Instant::now() + self.page.timeouts.assertion;

        loop {
            let actual = self.text_content().await?.map(|t| normalize_whitespace(&t));
            if actual.as_deref() == Some(expected.as_str()) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(E2eError::AssertionFailure {
                    selector: self.selector.clone(),
                    expected,
                    actual,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Collapse runs of whitespace and trim, the way rendered text is compared
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
