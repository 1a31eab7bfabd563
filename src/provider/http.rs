//! HTTP plumbing shared by the provider adapters: one pooled client,
//! SSE line handling, and status-to-error mapping.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::error::ValetError;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Process-wide reqwest client. Adapters must not build their own;
/// connection pools are per-client.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(8)
            .build()
            .unwrap_or_default()
    })
}

/// Headers for Bearer-token APIs (OpenAI, Google's OpenAI-compatible
/// endpoint).
pub fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(AUTHORIZATION, value);
    }
    headers
}

/// Headers for the Anthropic messages API, which authenticates with
/// `x-api-key` and pins a dated API version.
pub fn anthropic_headers(api_key: &str, version: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(api_key) {
        headers.insert("x-api-key", value);
    }
    if let Ok(value) = HeaderValue::from_str(version) {
        headers.insert("anthropic-version", value);
    }
    headers
}

/// Payload of an SSE `data:` line, or `None` for non-data lines and
/// the `[DONE]` sentinel.
pub fn parse_sse_data(line: &str) -> Option<&str> {
    match line.strip_prefix("data: ") {
        Some("[DONE]") | None => None,
        Some(data) => Some(data),
    }
}

/// Turn a response byte stream into a stream of SSE data payloads.
///
/// Handles chunk boundaries that split lines, skips comments and
/// event-name lines, and drops the `[DONE]` sentinel. Transport errors
/// end the stream after being yielded.
pub fn sse_data_stream<B, S>(
    bytes: S,
) -> impl futures::Stream<Item = Result<String, ValetError>> + Send
where
    B: AsRef<[u8]> + Send,
    S: futures::Stream<Item = reqwest::Result<B>> + Send + 'static,
{
    use futures::StreamExt;

    async_stream::stream! {
        let mut buffer = String::new();
        futures::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(piece) => buffer.push_str(&String::from_utf8_lossy(piece.as_ref())),
                Err(err) => {
                    yield Err(ValetError::Network(err));
                    break;
                }
            }
            while let Some(end) = buffer.find('\n') {
                let line: String = buffer.drain(..=end).collect();
                if let Some(data) = parse_sse_data(line.trim()) {
                    yield Ok(data.to_string());
                }
            }
        }
    }
}

/// Classify a non-success HTTP response.
///
/// 401 and 403 both come back as authentication failures since
/// providers use them interchangeably for bad or revoked keys.
pub fn status_to_error(status: u16, body: &str) -> ValetError {
    match status {
        401 | 403 => ValetError::Authentication(body.to_string()),
        429 => ValetError::RateLimited {
            retry_after_ms: extract_retry_after(body),
        },
        _ => ValetError::api(status, body),
    }
}

/// Backoff hint from a 429 body, in milliseconds. Providers report
/// `error.retry_after` as fractional seconds.
fn extract_retry_after(body: &str) -> Option<u64> {
    let parsed: serde_json::Value = serde_json::from_str(body).ok()?;
    let seconds = parsed.get("error")?.get("retry_after")?.as_f64()?;
    if seconds.is_sign_negative() {
        return None;
    }
    Some((seconds * 1000.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn sse_data_line_strips_prefix() {
        assert_eq!(parse_sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(parse_sse_data("data: [DONE]"), None);
        assert_eq!(parse_sse_data("event: ping"), None);
    }

    #[test]
    fn statuses_map_to_error_kinds() {
        assert_eq!(
            status_to_error(401, "bad key").category(),
            ErrorCategory::Authentication
        );
        assert_eq!(
            status_to_error(429, "{}").category(),
            ErrorCategory::RateLimit
        );
        assert_eq!(status_to_error(500, "oops").category(), ErrorCategory::Server);
    }

    #[tokio::test]
    async fn data_stream_reassembles_split_lines_across_tasks() {
        use futures::StreamExt;

        let chunks: Vec<reqwest::Result<Vec<u8>>> = vec![
            Ok(b"data: {\"a\":".to_vec()),
            Ok(b"1}\n\ndata: [DONE]\n".to_vec()),
        ];
        let stream = sse_data_stream(futures::stream::iter(chunks));

        // Spawning requires the stream to be Send.
        let payloads = tokio::spawn(stream.collect::<Vec<_>>())
            .await
            .expect("join");

        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].as_deref().expect("payload"), "{\"a\":1}");
    }

    #[test]
    fn retry_after_hint_converts_to_millis() {
        let err = status_to_error(429, "{\"error\":{\"retry_after\":2.25}}");
        match err {
            ValetError::RateLimited { retry_after_ms } => {
                assert_eq!(retry_after_ms, Some(2250));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }
}
