//! Stage orchestrator.
//!
//! Runs the five stages in fixed order, owns the composite result, and
//! implements skip and short-circuit policy. The orchestrator never guesses
//! past a failure: the first stage that reports `success = false` ends the
//! run with a partial audit trail, and retry (if any) is the caller's
//! decision, outside `run`.

use std::sync::Arc;
use std::time::Instant;

use crate::adapter::SiteAdapter;
use crate::capture::{self, CaptureHint, CaptureStrategy, HttpClient};
use crate::config::RetrieverConfig;
use crate::error::{ConfigError, ErrorInfo};
use crate::events::{EventBus, RetrievalEvent};
use crate::extract::ExtractedReference;
use crate::locator::{self, CandidateSelector, LocateOutcome, ResolvedElement};
use crate::model::{
    CapturedDocument, RecordingReference, RetrievalRequest, RetrievalResult, Stage, StageResult,
};
use crate::pacing::{CancelToken, Pacing};
use crate::renderer::{NavigationResult, RenderContext, Renderer};
use crate::session::{PopupTracker, SessionPool, SpawnOutcome};

/// Mutable state threaded through the stages of one run.
///
/// Owned exclusively by the orchestrator; never shared across concurrent
/// requests. Adapters receive it by `&mut` and drive the shared components
/// through it. Only [`adopt_spawned`] changes which browser context is
/// active.
///
/// [`adopt_spawned`]: PipelineContext::adopt_spawned
pub struct PipelineContext {
    pub run_id: String,
    request: RetrievalRequest,
    identifier: Option<String>,
    references: Vec<ExtractedReference>,
    document: Option<CapturedDocument>,
    context: Option<Box<dyn RenderContext>>,
    renderer: Arc<dyn Renderer>,
    http: HttpClient,
    pacing: Pacing,
    cancel: CancelToken,
    events: EventBus,
    config: RetrieverConfig,
}

impl PipelineContext {
    /// The immutable request this run serves.
    pub fn request(&self) -> &RetrievalRequest {
        &self.request
    }

    pub fn address(&self) -> &str {
        &self.request.address
    }

    /// The site-specific identifier, once stage 1 resolved (or skipped
    /// into) it.
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn set_identifier(&mut self, identifier: impl Into<String>) {
        self.identifier = Some(identifier.into());
    }

    /// Extracted references, most recent first.
    pub fn references(&self) -> &[ExtractedReference] {
        &self.references
    }

    /// The selected recording reference: newest extracted entry.
    pub fn reference(&self) -> Option<&RecordingReference> {
        self.references.first().map(|r| &r.reference)
    }

    pub fn set_references(&mut self, references: Vec<ExtractedReference>) {
        self.references = references;
    }

    pub fn document(&self) -> Option<&CapturedDocument> {
        self.document.as_ref()
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// The active browser context. Fails as a network error when the
    /// session is already torn down.
    pub fn context_mut(&mut self) -> Result<&mut dyn RenderContext, ErrorInfo> {
        match self.context.as_mut() {
            Some(ctx) => Ok(ctx.as_mut()),
            None => Err(ErrorInfo::network("browser session is closed")),
        }
    }

    /// Navigate the active context. Timeouts and transport failures are
    /// classified into their respective error kinds.
    pub async fn navigate(&mut self, url: &str) -> Result<NavigationResult, ErrorInfo> {
        let timeout_ms = self.config.nav_timeout_ms;
        let ctx = self.context_mut()?;
        ctx.navigate(url, timeout_ms).await.map_err(|e| {
            let msg = format!("{e:#}");
            if msg.contains("timed out") {
                ErrorInfo::timeout(msg)
            } else {
                ErrorInfo::network(msg)
            }
        })
    }

    /// Resolve a logical UI target. `NotFound` is an expected outcome; a
    /// torn-down session is not, and surfaces as a network error rather
    /// than an exhausted candidate list.
    pub async fn locate(
        &mut self,
        candidates: &[CandidateSelector],
    ) -> Result<LocateOutcome, ErrorInfo> {
        let timeout_ms = self.config.locate_timeout_ms;
        let ctx = self.context_mut()?;
        Ok(locator::locate(ctx, candidates, timeout_ms).await)
    }

    /// Resolve a UI target the flow cannot proceed without. Exhausting
    /// every candidate means the site changed out from under the adapter.
    pub async fn locate_required(
        &mut self,
        what: &str,
        candidates: &[CandidateSelector],
    ) -> Result<ResolvedElement, ErrorInfo> {
        match self.locate(candidates).await? {
            LocateOutcome::Found(el) => Ok(el),
            LocateOutcome::NotFound => Err(ErrorInfo::structure_changed(format!(
                "all {} candidate selectors for {what} exhausted",
                candidates.len()
            ))),
        }
    }

    /// Politeness delay between UI actions. Fails only when cancelled.
    pub async fn polite_pause(&self) -> Result<(), ErrorInfo> {
        if self.pacing.pause(&self.cancel).await {
            Ok(())
        } else {
            Err(ErrorInfo::cancelled("cancelled during politeness delay"))
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Snapshot open contexts before a UI action that may spawn a window.
    pub async fn popup_snapshot(&mut self) -> Result<PopupTracker, ErrorInfo> {
        let renderer = Arc::clone(&self.renderer);
        let ctx = self.context_mut()?;
        PopupTracker::snapshot(renderer.as_ref(), &*ctx)
            .await
            .map_err(|e| ErrorInfo::from_plumbing(&e))
    }

    /// Follow the site to wherever it went after a UI action: a spawned
    /// window becomes the active context (the old one is closed), in-place
    /// navigation keeps it, and nothing happening is a `NotFound`.
    /// `timeout_ms: None` waits the configured popup budget.
    pub async fn adopt_spawned(
        &mut self,
        tracker: &PopupTracker,
        timeout_ms: Option<u64>,
    ) -> Result<&'static str, ErrorInfo> {
        let timeout_ms = timeout_ms.unwrap_or(self.config.popup_wait_ms);
        let renderer = Arc::clone(&self.renderer);
        let current = self.context_mut()?;
        let outcome = tracker
            .await_spawned(renderer.as_ref(), &*current, timeout_ms)
            .await
            .map_err(|e| ErrorInfo::from_plumbing(&e))?;

        match outcome {
            SpawnOutcome::Spawned(new_context) => {
                let url = new_context.get_url().await.unwrap_or_default();
                if let Some(old) = self.context.replace(new_context) {
                    let _ = old.close().await;
                }
                self.events.emit(RetrievalEvent::ContextAdopted {
                    run_id: self.run_id.clone(),
                    url,
                });
                Ok("spawned")
            }
            SpawnOutcome::NavigatedInPlace => Ok("navigatedInPlace"),
            SpawnOutcome::NotFound => Err(ErrorInfo::not_found(
                "no viewer window appeared and the page did not navigate",
            )),
        }
    }

    /// Capture the document per the hint, storing it on success. A hint
    /// without its own attempt budget gets the configured capture timeout.
    pub async fn capture(&mut self, hint: &CaptureHint) -> Result<serde_json::Value, ErrorInfo> {
        let hint = CaptureHint {
            timeout_ms: Some(hint.timeout_ms.unwrap_or(self.config.capture_timeout_ms)),
            ..hint.clone()
        };
        let http = self.http.clone();
        let run_id = self.run_id.clone();
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let mut last_attempted: Option<CaptureStrategy> = None;

        let ctx = self.context_mut()?;
        let outcome = capture::capture(ctx, &http, &hint, &cancel, |strategy| {
            last_attempted = Some(strategy);
            events.emit(RetrievalEvent::CaptureAttempt {
                run_id: run_id.clone(),
                strategy: strategy.name().to_string(),
            });
        })
        .await;

        match outcome {
            Ok(mut doc) => {
                doc.filename = Some(doc.suggested_filename(self.reference()));
                let data = serde_json::json!({
                    "strategy": last_attempted.map(|s| s.name()),
                    "byteLength": doc.byte_length,
                    "sourceUrl": doc.source_url,
                    "filename": doc.filename,
                });
                self.document = Some(doc);
                Ok(data)
            }
            Err(failure) => Err(failure.to_error_info()),
        }
    }

    /// Close the active browser context. Idempotent.
    async fn teardown(&mut self) {
        if let Some(ctx) = self.context.take() {
            if let Err(e) = ctx.close().await {
                tracing::warn!(error = %format!("{e:#}"), "context close failed");
            }
        }
    }
}

/// The retrieval pipeline. One instance serves many concurrent requests;
/// each `run` call owns its session and context exclusively.
pub struct Pipeline {
    renderer: Arc<dyn Renderer>,
    pool: SessionPool,
    http: HttpClient,
    config: RetrieverConfig,
    events: EventBus,
}

impl Pipeline {
    pub fn new(renderer: Arc<dyn Renderer>, config: RetrieverConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            pool: SessionPool::new(config.max_sessions),
            http: HttpClient::new(config.http_timeout_ms, config.user_agent.as_deref()),
            events: EventBus::default(),
            renderer,
            config,
        })
    }

    /// Subscribe to run/stage events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RetrievalEvent> {
        self.events.subscribe()
    }

    /// Execute one retrieval end to end.
    ///
    /// Stages run in fixed order; adapter-declared skips are recorded, the
    /// first failure halts the run, and the browser session is torn down
    /// whatever happens — including mid-stage cancellation.
    pub async fn run(
        &self,
        adapter: &dyn SiteAdapter,
        request: RetrievalRequest,
        cancel: CancelToken,
    ) -> RetrievalResult {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();

        self.events.emit(RetrievalEvent::RunStarted {
            run_id: run_id.clone(),
            address: request.address.clone(),
            jurisdiction: adapter.jurisdiction().to_string(),
        });
        tracing::info!(
            run_id = %run_id,
            jurisdiction = adapter.jurisdiction(),
            "retrieval started"
        );

        let mut lease = match self.pool.checkout(self.renderer.as_ref()).await {
            Ok(lease) => lease,
            Err(e) => {
                let error = ErrorInfo::network(format!("failed to open browser session: {e:#}"));
                return self.finish(&run_id, Vec::new(), None, Some(error), started);
            }
        };

        let mut cx = PipelineContext {
            run_id: run_id.clone(),
            request,
            identifier: None,
            references: Vec::new(),
            document: None,
            context: lease.take_context(),
            renderer: Arc::clone(&self.renderer),
            http: self.http.clone(),
            pacing: self.config.pacing(),
            cancel,
            events: self.events.clone(),
            config: self.config.clone(),
        };

        let mut steps: Vec<StageResult> = Vec::new();
        let mut error: Option<ErrorInfo> = None;

        for stage in Stage::ALL {
            if cx.is_cancelled() {
                error = Some(ErrorInfo::cancelled("run cancelled").at_stage(stage));
                break;
            }

            if let Some(reason) = adapter.skip_reason(stage) {
                tracing::debug!(stage = %stage, reason, "stage skipped");
                self.events.emit(RetrievalEvent::StageSkipped {
                    run_id: run_id.clone(),
                    stage,
                    reason: reason.to_string(),
                });
                steps.push(StageResult::skipped(stage, reason));
                continue;
            }

            // A populated reference is the precondition for re-locating the
            // record on the recorder side.
            if stage == Stage::LocateTargetRecord && cx.reference().is_none() {
                let info = ErrorInfo::not_found("no recording reference available")
                    .at_stage(stage);
                steps.push(StageResult::failed(stage, info.clone(), 0));
                error = Some(info);
                break;
            }

            self.events.emit(RetrievalEvent::StageStarted {
                run_id: run_id.clone(),
                stage,
            });
            let stage_started = Instant::now();

            let outcome = match stage {
                Stage::ResolveIdentifier => adapter.resolve_identifier(&mut cx).await,
                Stage::LocateSourceRecord => adapter.locate_source_record(&mut cx).await,
                Stage::ExtractReference => adapter.extract_reference(&mut cx).await,
                Stage::LocateTargetRecord => adapter.locate_target_record(&mut cx).await,
                Stage::CaptureDocument => adapter.capture_document(&mut cx).await,
            };

            let elapsed_ms = stage_started.elapsed().as_millis() as u64;
            match outcome {
                Ok(data) => {
                    self.events.emit(RetrievalEvent::StageComplete {
                        run_id: run_id.clone(),
                        stage,
                        success: true,
                        elapsed_ms,
                    });
                    steps.push(StageResult::succeeded(stage, data, elapsed_ms));
                }
                Err(info) => {
                    let info = info.at_stage(stage);
                    tracing::warn!(stage = %stage, error = %info, "stage failed");
                    self.events.emit(RetrievalEvent::StageComplete {
                        run_id: run_id.clone(),
                        stage,
                        success: false,
                        elapsed_ms,
                    });
                    steps.push(StageResult::failed(stage, info.clone(), elapsed_ms));
                    error = Some(info);
                    break;
                }
            }
        }

        let document = cx.document.take();
        cx.teardown().await;
        drop(lease);

        self.finish(&run_id, steps, document, error, started)
    }

    fn finish(
        &self,
        run_id: &str,
        steps: Vec<StageResult>,
        document: Option<CapturedDocument>,
        error: Option<ErrorInfo>,
        started: Instant,
    ) -> RetrievalResult {
        let duration_ms = started.elapsed().as_millis() as u64;
        let success = error.is_none();
        self.events.emit(RetrievalEvent::RunComplete {
            run_id: run_id.to_string(),
            success,
            duration_ms,
        });
        tracing::info!(run_id, success, duration_ms, "retrieval finished");
        RetrievalResult {
            success,
            steps,
            document,
            error,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::renderer::NoopRenderer;

    fn closed_session_context() -> PipelineContext {
        PipelineContext {
            run_id: "run-test".to_string(),
            request: RetrievalRequest::new("123 Main St"),
            identifier: None,
            references: Vec::new(),
            document: None,
            context: None,
            renderer: Arc::new(NoopRenderer),
            http: HttpClient::new(1_000, None),
            pacing: Pacing::none(),
            cancel: CancelToken::never(),
            events: EventBus::default(),
            config: RetrieverConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_locate_on_closed_session_is_a_network_error() {
        let candidates = [CandidateSelector::new("#search", 0.9)];
        let mut cx = closed_session_context();

        let err = cx.locate(&candidates).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NetworkError);

        // Must not be misreported as an exhausted candidate list.
        let err = cx.locate_required("search box", &candidates).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NetworkError);
        assert!(err.message.contains("session is closed"));
    }
}
