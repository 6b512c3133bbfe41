//! Scripted renderer/context fakes shared by the integration tests.
//!
//! A `ScriptedRenderer` serves fixture pages keyed by URL; each page
//! declares which selectors exist and whether they are visible, plus any
//! pre-staged intercepted response or cookie. The fakes answer the same JS
//! probes the real Chromium context would, so the locator, capture, and
//! pipeline code paths run unmodified.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use deedhound::renderer::{InterceptedResponse, NavigationResult, RenderContext, Renderer};

/// One fixture page.
#[derive(Clone, Default)]
pub struct PageFixture {
    pub html: String,
    /// selector -> (present, visible)
    pub dom: HashMap<String, (bool, bool)>,
}

impl PageFixture {
    pub fn new(html: &str, selectors: &[(&str, bool, bool)]) -> Self {
        Self {
            html: html.to_string(),
            dom: selectors
                .iter()
                .map(|(sel, p, v)| (sel.to_string(), (*p, *v)))
                .collect(),
        }
    }
}

/// A click on `trigger` opens a new window at `url` with context id `id`.
#[derive(Clone)]
pub struct PopupSpec {
    pub trigger: String,
    pub id: String,
    pub url: String,
}

/// Scripted world: fixture pages plus canned capture material.
#[derive(Default)]
pub struct World {
    pub routes: HashMap<String, PageFixture>,
    pub cookie: Option<String>,
    pub intercepted: Option<InterceptedResponse>,
    pub pdf: Vec<u8>,
    pub popup: Option<PopupSpec>,
}

/// Observable side effects of a run, for assertions.
#[derive(Default)]
pub struct Journal {
    pub navigations: Vec<String>,
    pub clicks: Vec<String>,
    pub typed: Vec<String>,
    pub closed_contexts: usize,
}

pub struct ScriptedContext {
    id: String,
    url: Mutex<String>,
    page: Mutex<PageFixture>,
    world: Arc<Mutex<World>>,
    journal: Arc<Mutex<Journal>>,
    spawned: Arc<Mutex<Vec<String>>>,
    armed: Mutex<bool>,
}

impl ScriptedContext {
    fn selector_of(script: &str) -> Option<String> {
        let start = script.find("querySelector('")? + "querySelector('".len();
        let end = script[start..].find("')")? + start;
        Some(script[start..end].to_string())
    }
}

#[async_trait]
impl RenderContext for ScriptedContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
        self.journal.lock().unwrap().navigations.push(url.to_string());
        let fixture = self
            .world
            .lock()
            .unwrap()
            .routes
            .get(url)
            .cloned()
            .unwrap_or_default();
        *self.page.lock().unwrap() = fixture;
        *self.url.lock().unwrap() = url.to_string();
        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: 1,
        })
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        let selector = Self::selector_of(script).unwrap_or_default();
        let (present, visible) = self
            .page
            .lock()
            .unwrap()
            .dom
            .get(&selector)
            .copied()
            .unwrap_or((false, false));

        if script.contains("present:") {
            return Ok(serde_json::json!({ "present": present, "visible": visible }));
        }
        if script.contains(".click()") {
            if present {
                self.journal.lock().unwrap().clicks.push(selector.clone());
                let popup = self.world.lock().unwrap().popup.clone();
                if let Some(popup) = popup {
                    if popup.trigger == selector {
                        let mut spawned = self.spawned.lock().unwrap();
                        if !spawned.contains(&popup.id) {
                            spawned.push(popup.id);
                        }
                    }
                }
            }
            return Ok(serde_json::json!({ "success": present }));
        }
        if script.contains("el.value") {
            if present {
                self.journal.lock().unwrap().typed.push(selector);
            }
            return Ok(serde_json::json!({ "success": present }));
        }
        Ok(serde_json::Value::Null)
    }

    async fn get_html(&self) -> Result<String> {
        Ok(self.page.lock().unwrap().html.clone())
    }

    async fn get_url(&self) -> Result<String> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn cookie_header(&self) -> Result<Option<String>> {
        Ok(self.world.lock().unwrap().cookie.clone())
    }

    async fn arm_response_capture(&self, _mime_prefix: &str) -> Result<()> {
        *self.armed.lock().unwrap() = true;
        Ok(())
    }

    async fn take_captured_response(
        &self,
        _timeout_ms: u64,
    ) -> Result<Option<InterceptedResponse>> {
        if !*self.armed.lock().unwrap() {
            return Ok(None);
        }
        Ok(self.world.lock().unwrap().intercepted.clone())
    }

    async fn print_pdf(&self) -> Result<Vec<u8>> {
        Ok(self.world.lock().unwrap().pdf.clone())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.journal.lock().unwrap().closed_contexts += 1;
        Ok(())
    }
}

#[derive(Clone)]
pub struct ScriptedRenderer {
    pub world: Arc<Mutex<World>>,
    pub journal: Arc<Mutex<Journal>>,
    counter: Arc<AtomicUsize>,
    spawned: Arc<Mutex<Vec<String>>>,
}

impl ScriptedRenderer {
    pub fn new(world: World) -> Self {
        Self {
            world: Arc::new(Mutex::new(world)),
            journal: Arc::new(Mutex::new(Journal::default())),
            counter: Arc::new(AtomicUsize::new(0)),
            spawned: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn make_context(&self, id: String, url: String, page: PageFixture) -> Box<dyn RenderContext> {
        Box::new(ScriptedContext {
            id,
            url: Mutex::new(url),
            page: Mutex::new(page),
            world: Arc::clone(&self.world),
            journal: Arc::clone(&self.journal),
            spawned: Arc::clone(&self.spawned),
            armed: Mutex::new(false),
        })
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(self.make_context(
            format!("ctx-{n}"),
            "about:blank".to_string(),
            PageFixture::default(),
        ))
    }

    async fn context_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = (0..self.counter.load(Ordering::SeqCst))
            .map(|n| format!("ctx-{n}"))
            .collect();
        ids.extend(self.spawned.lock().unwrap().iter().cloned());
        Ok(ids)
    }

    async fn attach(&self, id: &str) -> Result<Box<dyn RenderContext>> {
        if !self.spawned.lock().unwrap().iter().any(|s| s == id) {
            anyhow::bail!("no spawned context with id {id}");
        }
        let popup = self
            .world
            .lock()
            .unwrap()
            .popup
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no popup scripted"))?;
        let page = self
            .world
            .lock()
            .unwrap()
            .routes
            .get(&popup.url)
            .cloned()
            .unwrap_or_default();
        Ok(self.make_context(id.to_string(), popup.url, page))
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}
