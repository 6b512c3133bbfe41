//! Adaptive element locator.
//!
//! Government sites change markup across redesigns and A/B variants, so a
//! single hard-coded selector is fragile. A logical target ("the address
//! field", "the search button") is described as an ordered list of
//! [`CandidateSelector`]s; the locator tries each in descending confidence
//! order against the live page and returns the first that both exists and
//! is actually laid out. Hidden and detached matches never count.
//!
//! `NotFound` is an expected outcome, not an error — callers decide whether
//! it means "try the fallback flow" or "the site changed under us".

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::renderer::RenderContext;

/// Floor for the per-candidate polling slice. Below this the probe would
/// race page layout and produce false negatives.
const MIN_CANDIDATE_SLICE_MS: u64 = 100;

/// Interval between visibility probes of one candidate.
const PROBE_INTERVAL_MS: u64 = 100;

/// One way of addressing a logical UI target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSelector {
    /// CSS selector for the target.
    pub descriptor: String,
    /// How likely this descriptor is to be the right one, 0.0–1.0.
    pub confidence: f32,
}

impl CandidateSelector {
    pub fn new(descriptor: impl Into<String>, confidence: f32) -> Self {
        Self {
            descriptor: descriptor.into(),
            confidence,
        }
    }
}

/// Outcome of a locate call.
#[derive(Debug)]
pub enum LocateOutcome {
    Found(ResolvedElement),
    NotFound,
}

impl LocateOutcome {
    pub fn found(&self) -> Option<&ResolvedElement> {
        match self {
            LocateOutcome::Found(el) => Some(el),
            LocateOutcome::NotFound => None,
        }
    }
}

/// A candidate that resolved against the live page. Interaction helpers
/// re-query by descriptor, so a re-render between locate and click does not
/// leave us holding a stale node handle.
#[derive(Debug, Clone)]
pub struct ResolvedElement {
    pub descriptor: String,
    pub confidence: f32,
}

impl ResolvedElement {
    /// Click the element. `false` if it vanished since resolution.
    pub async fn click(&self, ctx: &dyn RenderContext) -> anyhow::Result<bool> {
        let js = format!(
            r#"(() => {{
                const el = document.querySelector('{}');
                if (el) {{ el.click(); return {{ success: true }}; }}
                return {{ success: false }};
            }})()"#,
            sanitize_js_string(&self.descriptor)
        );
        let result = ctx.execute_js(&js).await?;
        Ok(js_success(&result))
    }

    /// Type text into the element, firing the input/change events that
    /// framework-bound fields listen for.
    pub async fn type_text(&self, ctx: &dyn RenderContext, text: &str) -> anyhow::Result<bool> {
        let js = format!(
            r#"(() => {{
                const el = document.querySelector('{}');
                if (el) {{
                    el.focus();
                    el.value = '{}';
                    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                    return {{ success: true }};
                }}
                return {{ success: false }};
            }})()"#,
            sanitize_js_string(&self.descriptor),
            sanitize_js_string(text)
        );
        let result = ctx.execute_js(&js).await?;
        Ok(js_success(&result))
    }

    /// Read the element's visible text.
    pub async fn read_text(&self, ctx: &dyn RenderContext) -> anyhow::Result<Option<String>> {
        let js = format!(
            r#"(() => {{
                const el = document.querySelector('{}');
                return el ? el.textContent : null;
            }})()"#,
            sanitize_js_string(&self.descriptor)
        );
        let result = ctx.execute_js(&js).await?;
        Ok(result.as_str().map(|s| s.trim().to_string()))
    }
}

fn js_success(value: &serde_json::Value) -> bool {
    value
        .as_object()
        .and_then(|o| o.get("success"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Resolve a logical target against the live page.
///
/// Candidates are tried highest-confidence first, each with a bounded slice
/// of the overall `timeout_ms` budget. A candidate resolves only if its
/// element exists and is visible; the first resolution wins, so a matching
/// lower-confidence candidate is never returned over a matching higher one.
pub async fn locate(
    ctx: &dyn RenderContext,
    candidates: &[CandidateSelector],
    timeout_ms: u64,
) -> LocateOutcome {
    if candidates.is_empty() {
        return LocateOutcome::NotFound;
    }

    let mut ordered: Vec<&CandidateSelector> = candidates.iter().collect();
    ordered.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let deadline = Instant::now() + Duration::from_millis(timeout_ms);

    for (i, candidate) in ordered.iter().enumerate() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        // Split what's left of the budget evenly over untried candidates.
        let left = (ordered.len() - i) as u32;
        let slice = (remaining / left).max(Duration::from_millis(MIN_CANDIDATE_SLICE_MS));
        let slice_end = (Instant::now() + slice).min(deadline);

        loop {
            match probe(ctx, &candidate.descriptor).await {
                Probe::Visible => {
                    tracing::debug!(
                        descriptor = %candidate.descriptor,
                        confidence = candidate.confidence,
                        "element resolved"
                    );
                    return LocateOutcome::Found(ResolvedElement {
                        descriptor: candidate.descriptor.clone(),
                        confidence: candidate.confidence,
                    });
                }
                Probe::Hidden | Probe::Absent => {}
            }
            if Instant::now() >= slice_end {
                break;
            }
            tokio::time::sleep(Duration::from_millis(PROBE_INTERVAL_MS)).await;
        }
    }

    tracing::debug!(candidates = candidates.len(), "no candidate resolved");
    LocateOutcome::NotFound
}

enum Probe {
    Visible,
    Hidden,
    Absent,
}

/// One existence + visibility check. Layout is the arbiter: an element with
/// no box (display:none, zero rect, detached) does not count as resolved.
async fn probe(ctx: &dyn RenderContext, descriptor: &str) -> Probe {
    let js = format!(
        r#"(() => {{
            const el = document.querySelector('{}');
            if (!el) return {{ present: false, visible: false }};
            const style = window.getComputedStyle(el);
            const rect = el.getBoundingClientRect();
            const visible = el.isConnected
                && style.display !== 'none'
                && style.visibility !== 'hidden'
                && rect.width > 0 && rect.height > 0;
            return {{ present: true, visible }};
        }})()"#,
        sanitize_js_string(descriptor)
    );

    match ctx.execute_js(&js).await {
        Ok(value) => {
            let get = |key: &str| {
                value
                    .as_object()
                    .and_then(|o| o.get(key))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false)
            };
            if !get("present") {
                Probe::Absent
            } else if get("visible") {
                Probe::Visible
            } else {
                Probe::Hidden
            }
        }
        // A failed evaluate (mid-navigation, context detached) reads as
        // absent; the outer loop keeps polling within budget.
        Err(_) => Probe::Absent,
    }
}

/// Sanitize a string for safe injection into a JavaScript string literal.
///
/// Escapes everything that could break out of a JS string context:
/// backslashes, quotes, backticks, newlines, angle brackets, null bytes.
pub fn sanitize_js_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\'' => result.push_str("\\'"),
            '"' => result.push_str("\\\""),
            '`' => result.push_str("\\`"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\0' => {}
            '<' => result.push_str("\\x3c"),
            '>' => result.push_str("\\x3e"),
            _ => result.push(ch),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{InterceptedResponse, NavigationResult, RenderContext};
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Fake context whose DOM is a selector → (present, visible) table.
    struct TableContext {
        dom: HashMap<String, (bool, bool)>,
    }

    impl TableContext {
        fn new(entries: &[(&str, bool, bool)]) -> Self {
            Self {
                dom: entries
                    .iter()
                    .map(|(sel, p, v)| (sel.to_string(), (*p, *v)))
                    .collect(),
            }
        }

        fn selector_of(script: &str) -> Option<String> {
            let start = script.find("querySelector('")? + "querySelector('".len();
            let end = script[start..].find("')")? + start;
            Some(script[start..end].to_string())
        }
    }

    #[async_trait]
    impl RenderContext for TableContext {
        fn id(&self) -> &str {
            "fixture"
        }
        async fn navigate(
            &mut self,
            url: &str,
            _timeout_ms: u64,
        ) -> anyhow::Result<NavigationResult> {
            Ok(NavigationResult {
                final_url: url.to_string(),
                load_time_ms: 0,
            })
        }
        async fn execute_js(&self, script: &str) -> anyhow::Result<serde_json::Value> {
            let selector = Self::selector_of(script).unwrap_or_default();
            let (present, visible) = self.dom.get(&selector).copied().unwrap_or((false, false));
            if script.contains("\"present\"") || script.contains("present:") {
                Ok(serde_json::json!({ "present": present, "visible": visible }))
            } else {
                Ok(serde_json::json!({ "success": present }))
            }
        }
        async fn get_html(&self) -> anyhow::Result<String> {
            Ok(String::new())
        }
        async fn get_url(&self) -> anyhow::Result<String> {
            Ok("about:blank".to_string())
        }
        async fn cookie_header(&self) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
        async fn arm_response_capture(&self, _mime_prefix: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn take_captured_response(
            &self,
            _timeout_ms: u64,
        ) -> anyhow::Result<Option<InterceptedResponse>> {
            Ok(None)
        }
        async fn print_pdf(&self) -> anyhow::Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn close(self: Box<Self>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_highest_confidence_match_wins() {
        // Both candidates present and visible — confidence order decides.
        let ctx = TableContext::new(&[
            ("#address-input", true, true),
            ("input[name=addr]", true, true),
        ]);
        let candidates = vec![
            CandidateSelector::new("input[name=addr]", 0.6),
            CandidateSelector::new("#address-input", 0.9),
        ];
        let outcome = locate(&ctx, &candidates, 2_000).await;
        let el = outcome.found().expect("should resolve");
        assert_eq!(el.descriptor, "#address-input");
    }

    #[tokio::test]
    async fn test_hidden_match_falls_through_to_lower_confidence() {
        let ctx = TableContext::new(&[
            ("#search-btn", true, false), // present but display:none
            ("button[type=submit]", true, true),
        ]);
        let candidates = vec![
            CandidateSelector::new("#search-btn", 0.9),
            CandidateSelector::new("button[type=submit]", 0.5),
        ];
        let outcome = locate(&ctx, &candidates, 1_000).await;
        let el = outcome.found().expect("should fall through");
        assert_eq!(el.descriptor, "button[type=submit]");
    }

    #[tokio::test]
    async fn test_not_found_when_nothing_resolves() {
        let ctx = TableContext::new(&[]);
        let candidates = vec![
            CandidateSelector::new("#gone", 0.9),
            CandidateSelector::new(".also-gone", 0.5),
        ];
        let start = std::time::Instant::now();
        let outcome = locate(&ctx, &candidates, 500).await;
        assert!(outcome.found().is_none());
        // Bounded: the whole call respects the budget with slack for probes.
        assert!(start.elapsed() < Duration::from_millis(2_000));
    }

    #[tokio::test]
    async fn test_empty_candidate_list_is_not_found() {
        let ctx = TableContext::new(&[]);
        assert!(locate(&ctx, &[], 500).await.found().is_none());
    }

    #[tokio::test]
    async fn test_click_reports_vanished_element() {
        let ctx = TableContext::new(&[("#ok", true, true)]);
        let present = ResolvedElement {
            descriptor: "#ok".to_string(),
            confidence: 1.0,
        };
        assert!(present.click(&ctx).await.unwrap());

        let gone = ResolvedElement {
            descriptor: "#gone".to_string(),
            confidence: 1.0,
        };
        assert!(!gone.click(&ctx).await.unwrap());
    }

    #[test]
    fn test_sanitize_basic() {
        assert_eq!(sanitize_js_string("hello"), "hello");
        assert_eq!(sanitize_js_string("it's"), "it\\'s");
        assert_eq!(sanitize_js_string("a\"b"), "a\\\"b");
    }

    #[test]
    fn test_sanitize_script_breakout() {
        let malicious = r#"</script><script>alert(1)</script>"#;
        let sanitized = sanitize_js_string(malicious);
        assert!(!sanitized.contains("</script>"));
        assert!(sanitized.contains("\\x3c/script\\x3e"));
    }

    #[test]
    fn test_sanitize_null_bytes() {
        assert_eq!(sanitize_js_string("abc\0def"), "abcdef");
    }
}
