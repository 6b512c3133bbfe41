//! Capture strategies against a local mock recorder and scripted contexts.
//!
//! Exercises the cookie replay, the signature gate, the status-code
//! classification, the snapshot printer, and the strategy fallback chain.

mod common;

use common::{ScriptedRenderer, World};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use deedhound::capture::{self, CaptureFailure, CaptureHint, CaptureStrategy};
use deedhound::renderer::Renderer;
use deedhound::{cancel_pair, CancelToken, DocumentKind, HttpClient};

fn hint(url: String) -> CaptureHint {
    CaptureHint {
        strategies: vec![CaptureStrategy::DirectFetch],
        kind: DocumentKind::Pdf,
        document_url: Some(url),
        trigger: Vec::new(),
        timeout_ms: Some(5_000),
    }
}

fn snapshot_hint(kind: DocumentKind) -> CaptureHint {
    CaptureHint {
        strategies: vec![CaptureStrategy::RenderedSnapshot],
        kind,
        document_url: None,
        trigger: Vec::new(),
        timeout_ms: Some(5_000),
    }
}

async fn session_context() -> Box<dyn deedhound::renderer::RenderContext> {
    let renderer = ScriptedRenderer::new(World {
        cookie: Some("session=abc123".to_string()),
        ..World::default()
    });
    renderer.new_context().await.unwrap()
}

#[tokio::test]
async fn test_direct_fetch_replays_session_cookies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc.pdf"))
        .and(header("Cookie", "session=abc123"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(b"%PDF-1.7 recorded deed".to_vec()),
        )
        .mount(&server)
        .await;

    let mut ctx = session_context().await;
    let client = HttpClient::new(5_000, None);
    let url = format!("{}/doc.pdf", server.uri());

    let doc = capture::attempt(ctx.as_mut(), &client, &hint(url.clone()), CaptureStrategy::DirectFetch)
        .await
        .expect("cookie-authenticated fetch must succeed");

    assert_eq!(doc.kind, DocumentKind::Pdf);
    assert!(doc.mime_signature_valid);
    assert!(doc.bytes.starts_with(b"%PDF"));
    assert_eq!(doc.source_url, url);
}

#[tokio::test]
async fn test_html_error_page_with_200_fails_validation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html><body>Your session has expired.</body></html>"),
        )
        .mount(&server)
        .await;

    let mut ctx = session_context().await;
    let client = HttpClient::new(5_000, None);
    let url = format!("{}/doc.pdf", server.uri());

    let failure = capture::attempt(ctx.as_mut(), &client, &hint(url), CaptureStrategy::DirectFetch)
        .await
        .unwrap_err();

    match failure {
        CaptureFailure::Validation { strategy, .. } => {
            assert_eq!(strategy, CaptureStrategy::DirectFetch);
        }
        other => panic!("expected validation failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_forbidden_maps_to_authentication_required() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc.pdf"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let mut ctx = session_context().await;
    let client = HttpClient::new(5_000, None);
    let url = format!("{}/doc.pdf", server.uri());

    let failure = capture::attempt(ctx.as_mut(), &client, &hint(url), CaptureStrategy::DirectFetch)
        .await
        .unwrap_err();

    assert_eq!(failure, CaptureFailure::AuthenticationRequired { status: 403 });
}

#[tokio::test]
async fn test_transient_server_error_is_retried() {
    let server = MockServer::start().await;
    // First hit fails, the retry succeeds.
    Mock::given(method("GET"))
        .and(path("/doc.pdf"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/doc.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(b"%PDF-1.7 after retry".to_vec()),
        )
        .mount(&server)
        .await;

    let mut ctx = session_context().await;
    let client = HttpClient::new(5_000, None);
    let url = format!("{}/doc.pdf", server.uri());

    let doc = capture::attempt(ctx.as_mut(), &client, &hint(url), CaptureStrategy::DirectFetch)
        .await
        .expect("retry must recover from a transient 503");
    assert!(doc.bytes.ends_with(b"after retry"));
}

#[tokio::test]
async fn test_missing_document_is_a_network_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut ctx = session_context().await;
    let client = HttpClient::new(5_000, None);
    let url = format!("{}/doc.pdf", server.uri());

    let failure = capture::attempt(ctx.as_mut(), &client, &hint(url), CaptureStrategy::DirectFetch)
        .await
        .unwrap_err();

    match failure {
        CaptureFailure::Network { message } => assert!(message.contains("404")),
        other => panic!("expected network failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_snapshot_prints_current_view_as_pdf() {
    let renderer = ScriptedRenderer::new(World {
        pdf: b"%PDF-1.4 printed viewer frame".to_vec(),
        ..World::default()
    });
    let mut ctx = renderer.new_context().await.unwrap();
    let client = HttpClient::new(5_000, None);

    let doc = capture::attempt(
        ctx.as_mut(),
        &client,
        &snapshot_hint(DocumentKind::Pdf),
        CaptureStrategy::RenderedSnapshot,
    )
    .await
    .expect("printing a PDF view must pass the signature gate");

    assert!(doc.mime_signature_valid);
    assert!(doc.bytes.starts_with(b"%PDF"));
    assert_eq!(doc.kind, DocumentKind::Pdf);
    assert_eq!(doc.source_url, "about:blank");
}

#[tokio::test]
async fn test_snapshot_refuses_non_pdf_document_kinds() {
    // The printer only emits PDF bytes; asking it for a TIFF must fail
    // before anything is printed.
    let renderer = ScriptedRenderer::new(World {
        pdf: b"%PDF-1.4 would be mislabeled".to_vec(),
        ..World::default()
    });
    let mut ctx = renderer.new_context().await.unwrap();
    let client = HttpClient::new(5_000, None);

    let failure = capture::attempt(
        ctx.as_mut(),
        &client,
        &snapshot_hint(DocumentKind::Tiff),
        CaptureStrategy::RenderedSnapshot,
    )
    .await
    .unwrap_err();

    match failure {
        CaptureFailure::Validation { strategy, reason } => {
            assert_eq!(strategy, CaptureStrategy::RenderedSnapshot);
            assert!(reason.contains("snapshot produces PDF"));
        }
        other => panic!("expected validation failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_strategy_fallback_reaches_snapshot() {
    // Direct fetch has no URL to work with, so the chain falls through to
    // the snapshot printer.
    let renderer = ScriptedRenderer::new(World {
        pdf: b"%PDF-1.4 fallback capture".to_vec(),
        ..World::default()
    });
    let mut ctx = renderer.new_context().await.unwrap();
    let client = HttpClient::new(5_000, None);
    let hint = CaptureHint {
        strategies: vec![
            CaptureStrategy::DirectFetch,
            CaptureStrategy::RenderedSnapshot,
        ],
        kind: DocumentKind::Pdf,
        document_url: None,
        trigger: Vec::new(),
        timeout_ms: Some(5_000),
    };

    let mut attempted = Vec::new();
    let doc = capture::capture(ctx.as_mut(), &client, &hint, &CancelToken::never(), |s| {
        attempted.push(s)
    })
    .await
    .expect("second strategy must recover the document");

    assert_eq!(
        attempted,
        vec![
            CaptureStrategy::DirectFetch,
            CaptureStrategy::RenderedSnapshot,
        ]
    );
    assert!(doc.bytes.starts_with(b"%PDF"));
}

#[tokio::test]
async fn test_cancelled_capture_attempts_no_strategies() {
    let renderer = ScriptedRenderer::new(World {
        pdf: b"%PDF-1.4 never printed".to_vec(),
        ..World::default()
    });
    let mut ctx = renderer.new_context().await.unwrap();
    let client = HttpClient::new(5_000, None);
    let (handle, token) = cancel_pair();
    handle.cancel();

    let mut attempted = Vec::new();
    let failure = capture::capture(
        ctx.as_mut(),
        &client,
        &snapshot_hint(DocumentKind::Pdf),
        &token,
        |s| attempted.push(s),
    )
    .await
    .unwrap_err();

    assert_eq!(failure, CaptureFailure::Cancelled);
    assert!(attempted.is_empty());
}
