//! Document capture subsystem.
//!
//! Once a target record is open, the document itself can usually be had one
//! of three ways, and which works depends on the site. All three strategies
//! share one contract: produce bytes, then prove they are the expected
//! document type via a magic-byte signature check. A recorder site that
//! serves an HTML error page with a 200 status must never be reported as a
//! successful capture — the signature gate is what stands between the
//! pipeline and silently saving garbage.

pub mod http;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorInfo, ErrorKind};
use crate::locator::{self, CandidateSelector};
use crate::model::{CapturedDocument, DocumentKind};
use crate::pacing::CancelToken;
use crate::renderer::RenderContext;

pub use http::{BinaryResponse, HttpClient};

/// Attempt budget when neither the hint nor the pipeline config supplies one.
const DEFAULT_BUDGET_MS: u64 = 45_000;

/// How to obtain the document bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureStrategy {
    /// Re-request a known document URL with the session's cookies.
    DirectFetch,
    /// Watch network traffic while triggering the viewer's load action.
    InterceptResponse,
    /// Print the currently displayed view to PDF bytes.
    RenderedSnapshot,
}

impl CaptureStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            CaptureStrategy::DirectFetch => "directFetch",
            CaptureStrategy::InterceptResponse => "interceptResponse",
            CaptureStrategy::RenderedSnapshot => "renderedSnapshot",
        }
    }
}

/// Site-specific guidance for a capture attempt.
#[derive(Debug, Clone)]
pub struct CaptureHint {
    /// Strategies in preference order.
    pub strategies: Vec<CaptureStrategy>,
    /// Expected binary type of the document.
    pub kind: DocumentKind,
    /// Known document URL, required by [`CaptureStrategy::DirectFetch`].
    pub document_url: Option<String>,
    /// UI target whose click makes the site load the document, required by
    /// [`CaptureStrategy::InterceptResponse`].
    pub trigger: Vec<CandidateSelector>,
    /// Budget for one strategy attempt. `None` falls back to the pipeline's
    /// configured capture timeout.
    pub timeout_ms: Option<u64>,
}

/// Why a capture attempt produced no document. A value, not a panic.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureFailure {
    /// Bytes arrived but failed the signature check.
    Validation {
        strategy: CaptureStrategy,
        reason: String,
    },
    /// Transport failed.
    Network { message: String },
    /// The site demanded credentials we could not supply.
    AuthenticationRequired { status: u16 },
    /// Nothing to capture: missing URL, unresolvable trigger.
    NotFound { reason: String },
    /// No matching response arrived within budget.
    Timeout,
    /// The caller cancelled the run between strategy attempts.
    Cancelled,
}

impl CaptureFailure {
    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            CaptureFailure::Validation { strategy, reason } => ErrorInfo::new(
                ErrorKind::ValidationFailure,
                format!("{}: {reason}", strategy.name()),
            ),
            CaptureFailure::Network { message } => {
                ErrorInfo::new(ErrorKind::NetworkError, message.clone())
            }
            CaptureFailure::AuthenticationRequired { status } => ErrorInfo::new(
                ErrorKind::AuthenticationRequired,
                format!("document fetch rejected with status {status}"),
            ),
            CaptureFailure::NotFound { reason } => {
                ErrorInfo::new(ErrorKind::NotFound, reason.clone())
            }
            CaptureFailure::Timeout => {
                ErrorInfo::new(ErrorKind::Timeout, "no document response within budget")
            }
            CaptureFailure::Cancelled => {
                ErrorInfo::new(ErrorKind::Cancelled, "cancelled during capture")
            }
        }
    }
}

/// Run the signature gate over candidate bytes.
///
/// This is the single choke point every strategy funnels through: empty
/// bodies and wrong-type bodies are rejected here, never returned as
/// success.
pub fn validate(
    bytes: Vec<u8>,
    kind: DocumentKind,
    source_url: String,
    strategy: CaptureStrategy,
) -> Result<CapturedDocument, CaptureFailure> {
    if bytes.is_empty() {
        return Err(CaptureFailure::Validation {
            strategy,
            reason: "empty body".to_string(),
        });
    }
    if !kind.matches_signature(&bytes) {
        let lead: Vec<u8> = bytes.iter().take(8).copied().collect();
        return Err(CaptureFailure::Validation {
            strategy,
            reason: format!(
                "leading bytes {:?} do not match {} signature",
                String::from_utf8_lossy(&lead),
                kind.mime_prefix()
            ),
        });
    }
    Ok(CapturedDocument {
        byte_length: bytes.len(),
        mime_signature_valid: true,
        source_url,
        kind,
        bytes,
        filename: None,
    })
}

/// Run one strategy to completion, signature gate included.
pub async fn attempt(
    ctx: &mut dyn RenderContext,
    client: &HttpClient,
    hint: &CaptureHint,
    strategy: CaptureStrategy,
) -> Result<CapturedDocument, CaptureFailure> {
    let budget_ms = hint.timeout_ms.unwrap_or(DEFAULT_BUDGET_MS);
    match strategy {
        CaptureStrategy::DirectFetch => direct_fetch(ctx, client, hint, budget_ms).await,
        CaptureStrategy::InterceptResponse => intercept_response(ctx, hint, budget_ms).await,
        CaptureStrategy::RenderedSnapshot => rendered_snapshot(ctx, hint).await,
    }
}

/// Obtain and validate the document using the hint's strategies in order.
///
/// Each strategy either yields a validated [`CapturedDocument`] or a
/// [`CaptureFailure`]; on failure the next strategy is tried and the last
/// failure is reported when all are exhausted. Cancellation is checked
/// between attempts, and `on_attempt` fires before each strategy runs so
/// the caller can surface progress.
pub async fn capture(
    ctx: &mut dyn RenderContext,
    client: &HttpClient,
    hint: &CaptureHint,
    cancel: &CancelToken,
    mut on_attempt: impl FnMut(CaptureStrategy),
) -> Result<CapturedDocument, CaptureFailure> {
    let mut last_failure = CaptureFailure::NotFound {
        reason: "no capture strategy configured".to_string(),
    };

    for strategy in &hint.strategies {
        if cancel.is_cancelled() {
            return Err(CaptureFailure::Cancelled);
        }
        on_attempt(*strategy);
        tracing::debug!(strategy = strategy.name(), "capture attempt");
        match attempt(ctx, client, hint, *strategy).await {
            Ok(doc) => {
                tracing::info!(
                    strategy = strategy.name(),
                    bytes = doc.byte_length,
                    "document captured"
                );
                return Ok(doc);
            }
            Err(failure) => {
                tracing::debug!(strategy = strategy.name(), ?failure, "strategy failed");
                last_failure = failure;
            }
        }
    }

    Err(last_failure)
}

/// Authenticated direct fetch: replay the session's cookies against the
/// document URL and validate whatever comes back.
async fn direct_fetch(
    ctx: &dyn RenderContext,
    client: &HttpClient,
    hint: &CaptureHint,
    budget_ms: u64,
) -> Result<CapturedDocument, CaptureFailure> {
    let Some(url) = hint.document_url.as_deref() else {
        return Err(CaptureFailure::NotFound {
            reason: "direct fetch requires a document URL".to_string(),
        });
    };

    let mut headers: Vec<(String, String)> = Vec::new();
    match ctx.cookie_header().await {
        Ok(Some(cookie)) => headers.push(("Cookie".to_string(), cookie)),
        Ok(None) => {}
        Err(e) => {
            return Err(CaptureFailure::Network {
                message: format!("failed to read session cookies: {e:#}"),
            })
        }
    }

    let resp = client
        .get_bytes(url, &headers, budget_ms)
        .await
        .map_err(|e| CaptureFailure::Network {
            message: format!("{e:#}"),
        })?;

    if resp.status == 401 || resp.status == 403 {
        return Err(CaptureFailure::AuthenticationRequired {
            status: resp.status,
        });
    }
    if resp.status >= 400 {
        return Err(CaptureFailure::Network {
            message: format!("document fetch returned status {}", resp.status),
        });
    }

    validate(
        resp.body,
        hint.kind,
        resp.final_url,
        CaptureStrategy::DirectFetch,
    )
}

/// Response interception: arm the observer, click the trigger, and take the
/// first response whose content-type matches before the viewer eats it.
async fn intercept_response(
    ctx: &mut dyn RenderContext,
    hint: &CaptureHint,
    budget_ms: u64,
) -> Result<CapturedDocument, CaptureFailure> {
    if hint.trigger.is_empty() {
        return Err(CaptureFailure::NotFound {
            reason: "interception requires a trigger target".to_string(),
        });
    }

    ctx.arm_response_capture(hint.kind.mime_prefix())
        .await
        .map_err(|e| CaptureFailure::Network {
            message: format!("failed to arm response capture: {e:#}"),
        })?;

    let trigger_budget = (budget_ms / 4).max(1_000);
    let element = match locator::locate(ctx, &hint.trigger, trigger_budget).await {
        locator::LocateOutcome::Found(el) => el,
        locator::LocateOutcome::NotFound => {
            return Err(CaptureFailure::NotFound {
                reason: "trigger element did not resolve".to_string(),
            })
        }
    };

    let clicked = element
        .click(ctx)
        .await
        .map_err(|e| CaptureFailure::Network {
            message: format!("trigger click failed: {e:#}"),
        })?;
    if !clicked {
        return Err(CaptureFailure::NotFound {
            reason: "trigger element vanished before click".to_string(),
        });
    }

    let resp = ctx
        .take_captured_response(budget_ms)
        .await
        .map_err(|e| CaptureFailure::Network {
            message: format!("response capture failed: {e:#}"),
        })?;

    match resp {
        Some(resp) => validate(
            resp.body,
            hint.kind,
            resp.url,
            CaptureStrategy::InterceptResponse,
        ),
        None => Err(CaptureFailure::Timeout),
    }
}

/// Rendered snapshot: when no retrievable original exists, print the
/// current document view. Only meaningful for PDF targets — the printer
/// produces PDF bytes, so any other expected kind fails validation up front.
async fn rendered_snapshot(
    ctx: &dyn RenderContext,
    hint: &CaptureHint,
) -> Result<CapturedDocument, CaptureFailure> {
    if hint.kind != DocumentKind::Pdf {
        return Err(CaptureFailure::Validation {
            strategy: CaptureStrategy::RenderedSnapshot,
            reason: format!(
                "snapshot produces PDF, expected {}",
                hint.kind.mime_prefix()
            ),
        });
    }

    let bytes = ctx.print_pdf().await.map_err(|e| CaptureFailure::Network {
        message: format!("snapshot failed: {e:#}"),
    })?;

    let source_url = ctx.get_url().await.unwrap_or_default();

    validate(
        bytes,
        hint.kind,
        source_url,
        CaptureStrategy::RenderedSnapshot,
    )
}
