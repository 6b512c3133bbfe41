//! Renderer abstraction for browser-based page interaction.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over the
//! browser engine (currently Chromium via chromiumoxide). The locator,
//! capture, and popup components drive these traits only, so fixture tests
//! can substitute scripted implementations.

pub mod chromium;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// A network response grabbed off the wire before the viewer rendered it.
#[derive(Debug, Clone)]
pub struct InterceptedResponse {
    pub url: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// A browser engine that can create and enumerate contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new browser context (tab).
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Ids of every open context, including ones the site spawned itself.
    async fn context_ids(&self) -> Result<Vec<String>>;
    /// Attach to an already-open context by id.
    async fn attach(&self, id: &str) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single browser context (tab).
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Stable id of this context within its renderer.
    fn id(&self) -> &str;
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Execute JavaScript in the page context and return the result.
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;
    /// Get the full page HTML.
    async fn get_html(&self) -> Result<String>;
    /// Get the current URL.
    async fn get_url(&self) -> Result<String>;
    /// Current session cookies as a `Cookie:` header value, if any.
    async fn cookie_header(&self) -> Result<Option<String>>;
    /// Start watching outgoing traffic for the first response whose
    /// content-type starts with `mime_prefix`.
    async fn arm_response_capture(&self, mime_prefix: &str) -> Result<()>;
    /// Wait (bounded) for a response captured by [`arm_response_capture`].
    /// `None` means nothing matching arrived within the budget.
    ///
    /// [`arm_response_capture`]: RenderContext::arm_response_capture
    async fn take_captured_response(&self, timeout_ms: u64)
        -> Result<Option<InterceptedResponse>>;
    /// Render the current view to PDF bytes.
    async fn print_pdf(&self) -> Result<Vec<u8>>;
    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// A no-op renderer used when Chromium is unavailable.
///
/// Lets the `doctor` command and pure-HTTP tooling run without a browser;
/// any attempt to open a context reports the missing engine.
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        Err(anyhow::anyhow!("browser not available"))
    }
    async fn context_ids(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
    async fn attach(&self, _id: &str) -> Result<Box<dyn RenderContext>> {
        Err(anyhow::anyhow!("browser not available"))
    }
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
    fn active_contexts(&self) -> usize {
        0
    }
}
