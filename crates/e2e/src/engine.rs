//! Browser engine seam
//!
//! Everything the harness needs from a browser: isolated contexts (one cookie
//! jar each), pages inside them, and an HTTP client bound to a context's jar.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::E2eResult;

/// Handle to an isolated browsing context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub u64);

/// Handle to a page (tab) inside a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page-{}", self.0)
    }
}

/// Request issued through a context's API client (shares the context's cookies)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: "POST".to_string(),
            path: path.into(),
            body: Some(body),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
}

/// Result of a settled navigation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Navigation {
    /// URL the page ended on after redirects
    pub url: String,
    #[serde(default)]
    pub status: Option<u16>,
}

#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Create a context with an empty cookie/storage jar
    async fn new_context(&self) -> E2eResult<ContextId>;

    /// Close a context and every page in it
    async fn close_context(&self, context: ContextId) -> E2eResult<()>;

    async fn clear_cookies(&self, context: ContextId) -> E2eResult<()>;

    async fn cookies(&self, context: ContextId) -> E2eResult<Vec<Cookie>>;

    /// Issue an HTTP request through the context's API client
    async fn request(
        &self,
        context: ContextId,
        request: ApiRequest,
        timeout: Duration,
    ) -> E2eResult<ApiResponse>;

    async fn new_page(&self, context: ContextId) -> E2eResult<PageId>;

    async fn close_page(&self, page: PageId) -> E2eResult<()>;

    /// Navigate and resolve once the network is idle
    async fn goto(&self, page: PageId, path: &str, timeout: Duration) -> E2eResult<Navigation>;

    /// Text content of the first element matching `selector`, `None` if nothing matches
    async fn text_content(&self, page: PageId, selector: &str) -> E2eResult<Option<String>>;

    /// Shut the engine down, closing any remaining contexts
    async fn shutdown(&self) -> E2eResult<()>;
}
