//! Chromium-based renderer using chromiumoxide.

use super::{InterceptedResponse, NavigationResult, RenderContext, Renderer};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetResponseBodyParams,
};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. DEEDHOUND_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("DEEDHOUND_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.deedhound/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".deedhound/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".deedhound/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".deedhound/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".deedhound/chromium/chrome-linux64/chrome"),
                home.join(".deedhound/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Browser,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch a headless Chromium instance.
    pub async fn new() -> Result<Self> {
        let chrome_path =
            find_chromium().context("Chromium not found. Run `deedhound doctor`.")?;

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // Drain CDP events so the connection stays alive
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self {
            browser,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn wrap(&self, page: Page) -> ChromiumContext {
        self.active_count.fetch_add(1, Ordering::Relaxed);
        ChromiumContext::new(page, Arc::clone(&self.active_count))
    }
}

/// The CDP target id as a plain string.
fn target_id_string(page: &Page) -> String {
    serde_json::to_value(page.target_id())
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default()
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;
        Ok(Box::new(self.wrap(page)))
    }

    async fn context_ids(&self) -> Result<Vec<String>> {
        let pages = self.browser.pages().await.context("failed to list pages")?;
        Ok(pages.iter().map(target_id_string).collect())
    }

    async fn attach(&self, id: &str) -> Result<Box<dyn RenderContext>> {
        let pages = self.browser.pages().await.context("failed to list pages")?;
        let page = pages
            .into_iter()
            .find(|p| target_id_string(p) == id)
            .with_context(|| format!("no open context with id {id}"))?;
        Ok(Box::new(self.wrap(page)))
    }

    async fn shutdown(&self) -> Result<()> {
        // Browser process exits when ChromiumRenderer is dropped
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// A single Chromium page context.
pub struct ChromiumContext {
    page: Page,
    id: String,
    active_count: Arc<AtomicUsize>,
    /// First matching response captured after arming, if any.
    captured: Arc<Mutex<Option<InterceptedResponse>>>,
    capture_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ChromiumContext {
    fn new(page: Page, active_count: Arc<AtomicUsize>) -> Self {
        let id = target_id_string(&page);
        Self {
            page,
            id,
            active_count,
            captured: Arc::new(Mutex::new(None)),
            capture_task: std::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();

        let result = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.page.goto(url),
        )
        .await;

        match result {
            Ok(Ok(_response)) => {
                // The load event gets the remainder of the budget; viewer
                // frames that stream content may never fire it, in which
                // case we proceed with the partially loaded page.
                let remaining = timeout_ms
                    .saturating_sub(start.elapsed().as_millis() as u64)
                    .max(1);
                let _ = tokio::time::timeout(
                    Duration::from_millis(remaining),
                    self.page.wait_for_navigation(),
                )
                .await;

                let final_url = self
                    .page
                    .url()
                    .await
                    .context("failed to read URL after navigation")?
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms: start.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;

        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }

    async fn get_html(&self) -> Result<String> {
        let result = self
            .page
            .evaluate("document.documentElement.outerHTML")
            .await
            .context("failed to get HTML")?;

        let html: String = result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert HTML result: {e:?}"))?;

        Ok(html)
    }

    async fn get_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .context("failed to get URL")?
            .unwrap_or_default();
        Ok(url)
    }

    async fn cookie_header(&self) -> Result<Option<String>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .context("failed to read cookies")?;
        if cookies.is_empty() {
            return Ok(None);
        }
        let header = cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        Ok(Some(header))
    }

    async fn arm_response_capture(&self, mime_prefix: &str) -> Result<()> {
        self.page
            .execute(EnableParams::default())
            .await
            .context("failed to enable network domain")?;

        let mut events = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .context("failed to install response listener")?;

        let page = self.page.clone();
        let slot = Arc::clone(&self.captured);
        let prefix = mime_prefix.to_string();

        slot.lock().await.take();

        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if !event.response.mime_type.starts_with(&prefix) {
                    continue;
                }
                // The body may not be retrievable until loading finishes;
                // retry briefly before giving up on this response.
                let mut body: Option<Vec<u8>> = None;
                for _ in 0..5 {
                    match page
                        .execute(GetResponseBodyParams::new(event.request_id.clone()))
                        .await
                    {
                        Ok(resp) => {
                            let decoded = if resp.base64_encoded {
                                base64::engine::general_purpose::STANDARD
                                    .decode(resp.body.as_bytes())
                                    .unwrap_or_default()
                            } else {
                                resp.body.clone().into_bytes()
                            };
                            body = Some(decoded);
                            break;
                        }
                        Err(_) => {
                            tokio::time::sleep(Duration::from_millis(200)).await;
                        }
                    }
                }
                if let Some(body) = body {
                    *slot.lock().await = Some(InterceptedResponse {
                        url: event.response.url.clone(),
                        content_type: event.response.mime_type.clone(),
                        body,
                    });
                    return;
                }
            }
        });

        if let Ok(mut guard) = self.capture_task.lock() {
            if let Some(old) = guard.replace(task) {
                old.abort();
            }
        }
        Ok(())
    }

    async fn take_captured_response(
        &self,
        timeout_ms: u64,
    ) -> Result<Option<InterceptedResponse>> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if let Some(resp) = self.captured.lock().await.take() {
                return Ok(Some(resp));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn print_pdf(&self) -> Result<Vec<u8>> {
        self.page
            .pdf(PrintToPdfParams::default())
            .await
            .context("failed to print page to PDF")
    }

    async fn close(self: Box<Self>) -> Result<()> {
        if let Ok(mut guard) = self.capture_task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        let _ = self.page.close().await;
        Ok(())
    }
}
