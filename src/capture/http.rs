//! Async HTTP client wrapping reqwest.
//!
//! Not a browser — used by the direct-fetch capture strategy to re-request
//! a document URL carrying the live browser session's cookies. Handles
//! redirects, timeouts, retry on 5xx, backoff on 429, and falls back to
//! HTTP/1.1 for sites that reject HTTP/2.

use anyhow::Result;
use std::time::Duration;

/// Response from a binary GET request.
#[derive(Debug, Clone)]
pub struct BinaryResponse {
    /// Original requested URL.
    pub url: String,
    /// Final URL after redirects.
    pub final_url: String,
    /// HTTP status code.
    pub status: u16,
    /// Content-Type header, if present.
    pub content_type: Option<String>,
    /// Raw response body.
    pub body: Vec<u8>,
}

const DEFAULT_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/131.0.0.0 Safari/537.36";

/// HTTP client for document capture.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    /// HTTP/1.1-only fallback client for sites that reject HTTP/2.
    h1_client: reqwest::Client,
}

impl HttpClient {
    /// Create a new HTTP client with a desktop Chrome user-agent.
    pub fn new(timeout_ms: u64, user_agent: Option<&str>) -> Self {
        let ua = user_agent.unwrap_or(DEFAULT_UA);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(ua)
            .build()
            .unwrap_or_default();

        let h1_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(ua)
            .http1_only()
            .build()
            .unwrap_or_default();

        Self { client, h1_client }
    }

    /// GET a binary body with optional extra headers (typically `Cookie`).
    ///
    /// Retries on 5xx, backs off on 429, and retries once over HTTP/1.1 when
    /// the error looks like a protocol mismatch.
    pub async fn get_bytes(
        &self,
        url: &str,
        extra_headers: &[(String, String)],
        timeout_ms: u64,
    ) -> Result<BinaryResponse> {
        match self
            .get_bytes_inner(&self.client, url, extra_headers, timeout_ms)
            .await
        {
            Ok(resp) => Ok(resp),
            Err(e) => {
                let err_str = format!("{e}");
                if err_str.contains("http2")
                    || err_str.contains("protocol")
                    || err_str.contains("connection closed")
                {
                    self.get_bytes_inner(&self.h1_client, url, extra_headers, timeout_ms)
                        .await
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn get_bytes_inner(
        &self,
        client: &reqwest::Client,
        url: &str,
        extra_headers: &[(String, String)],
        timeout_ms: u64,
    ) -> Result<BinaryResponse> {
        let mut retries = 0u32;
        let max_retries = 2;

        loop {
            let mut builder = client.get(url).timeout(Duration::from_millis(timeout_ms));
            for (name, value) in extra_headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            match builder.send().await {
                Ok(r) => {
                    let status = r.status().as_u16();
                    let final_url = r.url().to_string();

                    if status >= 500 && retries < max_retries {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if status == 429 && retries < max_retries {
                        retries += 1;
                        let retry_after = r
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(2);
                        tokio::time::sleep(Duration::from_secs(retry_after.min(10))).await;
                        continue;
                    }

                    let content_type = r
                        .headers()
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.to_string());

                    let body = r.bytes().await.map(|b| b.to_vec()).unwrap_or_default();

                    return Ok(BinaryResponse {
                        url: url.to_string(),
                        final_url,
                        status,
                        content_type,
                        body,
                    });
                }
                Err(e) => {
                    if retries < max_retries {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }
}
