//! The request pipeline, outermost first: strip trailing slash, decrypt,
//! verify hash, decompress, log, compress, trusted subnet. The integrity
//! tag is verified before decompression so it covers the exact transmitted
//! bytes (post-gzip, pre-encryption), matching what the agent signs.

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::uri::PathAndQuery;
use axum::http::{header, HeaderValue, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use pulsemon_common::crypto;
use pulsemon_common::hash::body_tag;
use std::io::{Read, Write};
use std::net::Ipv4Addr;
use std::time::Instant;

use crate::state::AppState;

const ENCRYPTED_HEADER: &str = "X-Encrypted";
const HASH_HEADER: &str = "HashSHA256";
const REAL_IP_HEADER: &str = "X-Real-IP";

/// Rewrites `/update/` to `/update` so both spellings hit the same route.
pub async fn strip_trailing_slash(mut req: Request, next: Next) -> Response {
    let uri = req.uri();
    let path = uri.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
        let path_and_query = match uri.query() {
            Some(query) => format!("{trimmed}?{query}"),
            None => trimmed.to_string(),
        };
        if let Ok(path_and_query) = path_and_query.parse::<PathAndQuery>() {
            let mut parts = uri.clone().into_parts();
            parts.path_and_query = Some(path_and_query);
            if let Ok(new_uri) = Uri::from_parts(parts) {
                *req.uri_mut() = new_uri;
            }
        }
    }
    next.run(req).await
}

/// Opens hybrid-encrypted request bodies. With a private key configured,
/// an `X-Encrypted: v1` body is replaced by the inner gzipped JSON and the
/// headers rewritten; a missing envelope is rejected when encryption is
/// required.
pub async fn decrypt(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(private_key) = state.private_key.clone() else {
        return next.run(req).await;
    };

    let version = req
        .headers()
        .get(ENCRYPTED_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    match version.as_deref() {
        None => {
            if state.require_encryption {
                return (StatusCode::BAD_REQUEST, "encryption required").into_response();
            }
            next.run(req).await
        }
        Some("v1") => {
            let (mut parts, body) = req.into_parts();
            let envelope = match to_bytes(body, usize::MAX).await {
                Ok(bytes) => bytes,
                Err(_) => return (StatusCode::BAD_REQUEST, "read body failed").into_response(),
            };
            let plain = match crypto::open(&private_key, &envelope) {
                Ok(plain) => plain,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to open request envelope");
                    return (StatusCode::BAD_REQUEST, "decrypt failed").into_response();
                }
            };
            // The plaintext is the gzipped JSON the agent produced.
            parts
                .headers
                .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            parts.headers.remove(ENCRYPTED_HEADER);
            next.run(Request::from_parts(parts, Body::from(plain))).await
        }
        Some(_) => (StatusCode::BAD_REQUEST, "unsupported encryption version").into_response(),
    }
}

/// Verifies the request integrity tag over the body as transmitted and
/// stamps the response tag over the response bytes it observes.
pub async fn verify_hash(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(key) = state.integrity_key.clone() else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::BAD_REQUEST, "bad body").into_response(),
    };
    if let Some(tag) = parts.headers.get(HASH_HEADER).and_then(|v| v.to_str().ok()) {
        if !tag.is_empty() && tag != body_tag(&bytes, &key) {
            return (StatusCode::BAD_REQUEST, "invalid hash").into_response();
        }
    }

    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;

    let (mut parts, body) = response.into_parts();
    let response_bytes = to_bytes(body, usize::MAX).await.unwrap_or_default();
    if let Ok(value) = HeaderValue::from_str(&body_tag(&response_bytes, &key)) {
        parts.headers.insert(HASH_HEADER, value);
    }
    Response::from_parts(parts, Body::from(response_bytes))
}

/// Gunzips request bodies declared `Content-Encoding: gzip`. A body that
/// fails to decode is handed through untouched; the handler may still be
/// able to read it as plain JSON.
pub async fn decompress(req: Request, next: Next) -> Response {
    let is_gzip = req
        .headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "gzip")
        .unwrap_or(false);
    if !is_gzip {
        return next.run(req).await;
    }

    let (mut parts, body) = req.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::BAD_REQUEST, "bad body").into_response(),
    };

    let mut decoder = GzDecoder::new(&bytes[..]);
    let mut plain = Vec::new();
    let body = match decoder.read_to_end(&mut plain) {
        Ok(_) => {
            parts.headers.remove(header::CONTENT_ENCODING);
            Body::from(plain)
        }
        Err(_) => Body::from(bytes),
    };
    next.run(Request::from_parts(parts, body)).await
}

fn is_plain_ascii(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b != 0 && b < 128)
}

/// Logs method, URI, response status, response size and elapsed time. The
/// request body is included only when it is plain ASCII.
pub async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();

    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, usize::MAX).await.unwrap_or_default();
    let body_text = if !bytes.is_empty() && is_plain_ascii(&bytes) {
        String::from_utf8_lossy(&bytes).into_owned()
    } else {
        "<skipped>".to_string()
    };

    let start = Instant::now();
    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
    let elapsed = start.elapsed();

    let (parts, body) = response.into_parts();
    let response_bytes = to_bytes(body, usize::MAX).await.unwrap_or_default();
    tracing::info!(
        method = %method,
        uri = %uri,
        status = parts.status.as_u16(),
        size = response_bytes.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        body = %body_text,
        "request handled"
    );
    Response::from_parts(parts, Body::from(response_bytes))
}

/// Gzips the response when the client accepts it. An empty body stays
/// unencoded, mirroring a lazily-attached compressor that never saw a
/// first write.
pub async fn compress(req: Request, next: Next) -> Response {
    let accepts_gzip = req
        .headers()
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("gzip"))
        .unwrap_or(false);

    let response = next.run(req).await;
    if !accepts_gzip {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };
    if bytes.is_empty() {
        return Response::from_parts(parts, Body::from(bytes));
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    if encoder.write_all(&bytes).is_err() {
        return Response::from_parts(parts, Body::from(bytes));
    }
    match encoder.finish() {
        Ok(gzipped) => {
            parts
                .headers
                .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(gzipped))
        }
        Err(_) => Response::from_parts(parts, Body::from(bytes)),
    }
}

/// Rejects requests whose `X-Real-IP` is missing, unparsable or outside
/// the trusted subnet. A no-op when no subnet is configured.
pub async fn trusted_subnet(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(cidr) = state.trusted_subnet else {
        return next.run(req).await;
    };
    let allowed = req
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<Ipv4Addr>().ok())
        .map(|ip| cidr.contains(ip))
        .unwrap_or(false);
    if !allowed {
        return StatusCode::FORBIDDEN.into_response();
    }
    next.run(req).await
}
