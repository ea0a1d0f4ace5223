//! Request entry point and streaming forwarder
//!
//! Every path except `/stats` and `/health` lands here. The handler
//! resolves the active key set, picks a key, and relays the request to
//! the configured upstream. Responses are relayed byte-for-byte; the
//! only semantic action on the data is boundary detection for flush
//! timing on streaming content types.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::convert::Infallible;

use crate::config::parse_key_list;
use crate::error::ProxyError;
use crate::server::state::AppState;
use crate::utils::{mask_key, truncate_str};

/// Content types relayed line-by-line so event boundaries reach the
/// transport immediately
const STREAMING_CONTENT_TYPES: &[&str] = &[
    "text/event-stream",
    "application/x-ndjson",
    "application/jsonl",
];

/// Headers never copied between the two hops
///
/// Host and Authorization are overwritten by the forwarder; the framing
/// headers are recomputed because the body is re-framed (buffered on
/// the way in, re-chunked on the way out).
const SKIPPED_HEADERS: &[&str] = &[
    "host",
    "authorization",
    "content-length",
    "transfer-encoding",
    "connection",
];

/// Fallback handler: bind the request to a key and forward it
pub async fn proxy_handler(State(state): State<AppState>, req: Request) -> Response {
    match handle(state, req).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

async fn handle(state: AppState, req: Request) -> Result<Response, ProxyError> {
    // Static pool from config, or keys supplied by the caller.
    let keys = if state.settings.has_static_keys() {
        state.settings.api_keys.clone()
    } else {
        parse_keys_from_header(&req)?
    };

    state.key_pool.upsert_keys(&keys);

    let key = state
        .key_pool
        .select_key()
        .map_err(|_| ProxyError::NoAvailableKey)?;

    forward(&state, req, &key).await
}

/// Parse API keys from a caller-supplied Authorization header
///
/// Format: `Authorization: Bearer key1,key2,...`; entries are trimmed
/// and blanks dropped. Absence or emptiness is a caller input error
/// and no upstream call is made.
fn parse_keys_from_header(req: &Request) -> Result<Vec<String>, ProxyError> {
    let raw = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ProxyError::MissingApiKeys("Authorization header is missing".into()))?;

    let raw = raw.strip_prefix("Bearer ").unwrap_or(raw);
    let keys = parse_key_list(raw);
    if keys.is_empty() {
        return Err(ProxyError::MissingApiKeys(
            "No valid API keys in Authorization header".into(),
        ));
    }
    Ok(keys)
}

/// Relay one request to the upstream with the selected key
async fn forward(state: &AppState, req: Request, key: &str) -> Result<Response, ProxyError> {
    let (parts, body) = req.into_parts();

    // Buffer the inbound body so it is replayable and loggable; costs
    // memory proportional to request size, acceptable for typical API
    // payloads.
    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ProxyError::Internal(anyhow::anyhow!("failed to read request body: {e}")))?;

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!(
        "{}{}",
        state.settings.target_url.trim_end_matches('/'),
        path_and_query
    );

    tracing::info!(
        method = %parts.method,
        path = %parts.uri.path(),
        target = %url,
        key = %mask_key(key),
        "Forwarding request"
    );
    if tracing::enabled!(tracing::Level::DEBUG) && !body_bytes.is_empty() {
        let preview = String::from_utf8_lossy(&body_bytes);
        tracing::debug!(body = %truncate_str(&preview, 100), "Request body preview");
    }

    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .map_err(|e| ProxyError::Internal(anyhow::anyhow!("invalid method: {e}")))?;

    let mut outbound = state.client.request(method, &url);
    for (name, value) in parts.headers.iter() {
        if SKIPPED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        // reqwest and axum sit on different http crate versions, so
        // headers cross the boundary as raw bytes.
        if let (Ok(n), Ok(v)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            outbound = outbound.header(n, v);
        }
    }

    let upstream = outbound
        .bearer_auth(key)
        .body(body_bytes.to_vec())
        .send()
        .await
        .map_err(|e| {
            // Transport failure: gateway error to the caller, key
            // health untouched (only an upstream 401/403 cools a key).
            tracing::error!(error = %e, target = %url, "Upstream request failed");
            ProxyError::BadGateway(e.to_string())
        })?;

    let status = upstream.status();
    state.key_pool.report_outcome(key, status.as_u16());

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY));
    for (name, value) in upstream.headers().iter() {
        if matches!(name.as_str(), "content-length" | "transfer-encoding" | "connection") {
            continue;
        }
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            builder = builder.header(n, v);
        }
    }

    // Error responses are read whole, logged, and relayed atomically so
    // they can be inspected as a unit; they are never streamed.
    if status.as_u16() >= 400 {
        let error_body = match upstream.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read upstream error body");
                Bytes::new()
            }
        };
        let preview = String::from_utf8_lossy(&error_body);
        tracing::warn!(
            status = status.as_u16(),
            key = %mask_key(key),
            body = %truncate_str(&preview, 200),
            "Upstream returned error status"
        );
        return builder
            .body(Body::from(error_body))
            .map_err(|e| ProxyError::Internal(e.into()));
    }

    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body = if is_streaming_content_type(&content_type) {
        Body::from_stream(line_frames(upstream.bytes_stream()))
    } else {
        Body::from_stream(passthrough_frames(upstream.bytes_stream()))
    };

    builder.body(body).map_err(|e| ProxyError::Internal(e.into()))
}

/// Whether the upstream response should be relayed line-by-line
fn is_streaming_content_type(content_type: &str) -> bool {
    STREAMING_CONTENT_TYPES
        .iter()
        .any(|marker| content_type.contains(marker))
}

/// Re-frame an upstream byte stream on line boundaries
///
/// Each complete line (terminator included; the relay is
/// byte-transparent) becomes its own body frame, so every SSE/NDJSON
/// event boundary is written and flushed to the caller as soon as it
/// arrives. A trailing partial line is flushed at end of stream. A
/// read error logs and ends the stream, mirroring the pass-through
/// branch.
fn line_frames<S>(upstream: S) -> impl Stream<Item = Result<Bytes, Infallible>>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    async_stream::stream! {
        let mut upstream = upstream;
        let mut buf = Vec::new();
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    buf.extend_from_slice(&bytes);
                    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = buf.drain(..=pos).collect();
                        yield Ok(Bytes::from(line));
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream stream read failed");
                    break;
                }
            }
        }
        if !buf.is_empty() {
            yield Ok(Bytes::from(buf));
        }
    }
}

/// Relay an upstream byte stream chunk-for-chunk
///
/// Each chunk is written and flushed as it arrives; a read error is
/// logged and ends the stream. Dropping the stream (caller disconnect)
/// drops the upstream response and closes its connection.
fn passthrough_frames<S>(upstream: S) -> impl Stream<Item = Result<Bytes, Infallible>>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    async_stream::stream! {
        let mut upstream = upstream;
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => yield Ok(bytes),
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream stream read failed");
                    break;
                }
            }
        }
    }
}
