//! Trait seams for per-jurisdiction site adapters and external
//! collaborators.
//!
//! Every county pairs an assessor site with a recorder site, and every pair
//! has its own URLs, field labels, and DOM quirks. The pipeline stays
//! generic by delegating each stage to a [`SiteAdapter`]; the adapter in
//! turn drives the shared building blocks (locator, extractor, capture,
//! popup tracking) through the [`PipelineContext`] it is handed.

use async_trait::async_trait;
use scraper::Html;

use crate::error::ErrorInfo;
use crate::extract::{self, JurisdictionRules};
use crate::model::Stage;
use crate::pipeline::PipelineContext;

/// What a stage hook returns: optional audit data on success, a classified
/// failure otherwise. Failures are values — the orchestrator records them
/// and stops.
pub type StageOutcome = Result<Option<serde_json::Value>, ErrorInfo>;

/// Result of an external address → identifier lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    Resolved(String),
    NotFound,
    Failed(ErrorInfo),
}

/// External address → site-specific identifier lookup service.
///
/// A black box with its own timeout and failure mode, invoked only by
/// adapters that declare they need it (many assessor sites accept the
/// street address directly and skip this stage entirely).
#[async_trait]
pub trait IdentifierResolver: Send + Sync {
    async fn resolve(&self, address: &str, timeout_ms: u64) -> ResolveOutcome;
}

/// Per-jurisdiction implementation of the four non-skippable stages.
///
/// Adapters own the site knowledge: URLs, candidate selectors, which
/// stages can be skipped and why, and which document types count as
/// conveyances. The core never guesses at any of that.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Human-readable jurisdiction name ("Maricopa County, AZ").
    fn jurisdiction(&self) -> &str;

    /// Identifier shapes and doc-type filters for this jurisdiction.
    fn rules(&self) -> &JurisdictionRules;

    /// Declare a stage skippable, with the reason recorded in the audit
    /// trail. The default skips nothing.
    fn skip_reason(&self, stage: Stage) -> Option<&str> {
        let _ = stage;
        None
    }

    /// Stage 1: resolve the street address to a site-specific identifier
    /// (parcel id, account number).
    async fn resolve_identifier(&self, cx: &mut PipelineContext) -> StageOutcome;

    /// Stage 2: open the property record on the assessor site.
    async fn locate_source_record(&self, cx: &mut PipelineContext) -> StageOutcome;

    /// Stage 3: mine the recording reference from the open record.
    ///
    /// The default runs both extractor passes over the current page and
    /// selects the most recent reference; adapters with odd layouts
    /// override it.
    async fn extract_reference(&self, cx: &mut PipelineContext) -> StageOutcome {
        default_extract_reference(self.rules(), cx).await
    }

    /// Stage 4: re-locate the record on the recorder site using the
    /// extracted reference.
    async fn locate_target_record(&self, cx: &mut PipelineContext) -> StageOutcome;

    /// Stage 5: capture the document bytes.
    async fn capture_document(&self, cx: &mut PipelineContext) -> StageOutcome;
}

/// Shared stage-1 implementation for adapters backed by an external
/// resolver: look the address up, store the identifier on success.
pub async fn resolve_with(
    resolver: &dyn IdentifierResolver,
    cx: &mut PipelineContext,
) -> StageOutcome {
    let timeout_ms = cx.config().http_timeout_ms;
    match resolver.resolve(cx.address(), timeout_ms).await {
        ResolveOutcome::Resolved(identifier) => {
            let data = serde_json::json!({ "identifier": identifier });
            cx.set_identifier(identifier);
            Ok(Some(data))
        }
        ResolveOutcome::NotFound => Err(ErrorInfo::not_found(format!(
            "no identifier found for address `{}`",
            cx.address()
        ))),
        ResolveOutcome::Failed(info) => Err(info),
    }
}

/// Shared stage-3 implementation: scan tables, sweep the page text, filter
/// and rank, keep the newest reference.
pub async fn default_extract_reference(
    rules: &JurisdictionRules,
    cx: &mut PipelineContext,
) -> StageOutcome {
    let html = cx
        .context_mut()?
        .get_html()
        .await
        .map_err(|e| ErrorInfo::from_plumbing(&e))?;

    let rows = extract::scan_tables(&html);
    let text = page_text(&html);
    let references = extract::extract(&text, &rows, rules);

    if references.is_empty() {
        return Err(ErrorInfo::not_found(
            "no recording reference found on record page",
        ));
    }

    let data = serde_json::json!({
        "candidates": references.len(),
        "selected": references[0].reference,
        "selectedDate": references[0].date.map(|d| d.to_string()),
    });
    cx.set_references(references);
    Ok(Some(data))
}

/// Flatten HTML to visible text for the free-text extraction pass.
fn page_text(html: &str) -> String {
    let document = Html::parse_document(html);
    document
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
}
