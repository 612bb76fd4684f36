use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use pulsemon_common::model::{Metric, MetricType};
use pulsemon_common::retry::with_retry;
use pulsemon_storage::StorageError;
use std::time::Duration;

use crate::state::AppState;

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false)
}

/// Saves one metric under the retry wrapper and returns the stored form
/// (counters come back with the accumulated total).
async fn save_with_retry(state: &AppState, metric: &Metric) -> Result<Metric, StorageError> {
    let saved = with_retry(|| {
        let storage = state.storage.clone();
        let mut attempt = metric.clone();
        async move {
            storage.save(&mut attempt).await?;
            Ok::<_, StorageError>(attempt)
        }
    })
    .await?;
    snapshot_after_write(state).await;
    Ok(saved)
}

async fn save_batch_with_retry(state: &AppState, metrics: &[Metric]) -> Result<(), StorageError> {
    with_retry(|| {
        let storage = state.storage.clone();
        let mut attempt = metrics.to_vec();
        async move { storage.save_batch(&mut attempt).await }
    })
    .await?;
    snapshot_after_write(state).await;
    Ok(())
}

async fn get_with_retry(state: &AppState, id: &str) -> Result<Metric, StorageError> {
    with_retry(|| {
        let storage = state.storage.clone();
        let id = id.to_string();
        async move { storage.get(&id).await }
    })
    .await
}

/// With a zero store interval every successful write is followed by an
/// inline snapshot. Snapshot failures are logged, never surfaced.
async fn snapshot_after_write(state: &AppState) {
    let Some(policy) = &state.snapshot else {
        return;
    };
    if !policy.interval.is_zero() {
        return;
    }
    let Some(file_store) = state.storage.file_backed() else {
        return;
    };
    if let Err(err) = file_store.save_to_file(&policy.path).await {
        tracing::error!(path = %policy.path.display(), error = %err, "failed to save snapshot");
    }
}

/// `POST /update/{type}/{name}/{value}`
pub async fn update_metric(
    State(state): State<AppState>,
    Path((mtype, name, value)): Path<(String, String, String)>,
) -> Response {
    let metric = match Metric::from_url_parts(&mtype, &name, &value) {
        Ok(metric) => metric,
        Err(err) => {
            tracing::warn!(mtype = %mtype, name = %name, error = %err, "failed to build metric");
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
    };

    match save_with_retry(&state, &metric).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(err) => {
            tracing::error!(id = %metric.id, error = %err, "failed to save metric");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// `POST /update` — responds with the post-accumulation metric.
pub async fn update_metric_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_json(&headers) {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported content type").into_response();
    }
    let metric: Metric = match serde_json::from_slice(&body) {
        Ok(metric) => metric,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid JSON").into_response(),
    };
    if metric.validate().is_err() {
        return (StatusCode::BAD_REQUEST, "invalid JSON").into_response();
    }

    match save_with_retry(&state, &metric).await {
        Ok(saved) => Json(saved).into_response(),
        Err(err) => {
            tracing::error!(id = %metric.id, error = %err, "failed to save metric");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// `POST /updates` — batch form. An empty array is a bad request; any
/// element violating the model invariants fails the whole batch with 422.
pub async fn update_metrics_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_json(&headers) {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported content type").into_response();
    }
    let metrics: Vec<Metric> = match serde_json::from_slice(&body) {
        Ok(metrics) => metrics,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid JSON").into_response(),
    };
    if metrics.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    for metric in &metrics {
        if let Err(err) = metric.validate() {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("invalid JSON: {err}"),
            )
                .into_response();
        }
    }

    match save_batch_with_retry(&state, &metrics).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to save metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// `GET /value/{type}/{name}` — the textual value (gauge) or delta
/// (counter).
pub async fn get_metric(
    State(state): State<AppState>,
    Path((mtype, name)): Path<(String, String)>,
) -> Response {
    let mtype: MetricType = match mtype.parse() {
        Ok(mtype) => mtype,
        Err(err) => {
            tracing::warn!(name = %name, error = %err, "bad metric type");
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
    };

    let stored = match get_with_retry(&state, &name).await {
        Ok(stored) => stored,
        Err(StorageError::NotFound(_)) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            tracing::error!(name = %name, error = %err, "failed to get metric");
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response();
        }
    };

    match mtype {
        MetricType::Gauge => match stored.value {
            Some(value) => value.to_string().into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        MetricType::Counter => match stored.delta {
            Some(delta) => delta.to_string().into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
    }
}

/// `POST /value` — JSON lookup by `{id, type}`.
pub async fn get_metric_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_json(&headers) {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported content type").into_response();
    }
    let request: Metric = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid JSON").into_response(),
    };

    match get_with_retry(&state, &request.id).await {
        Ok(stored) => Json(stored).into_response(),
        Err(StorageError::NotFound(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            tracing::error!(id = %request.id, error = %err, "failed to get metric");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

/// `GET /` — a minimal HTML listing of every metric.
pub async fn list_metrics(State(state): State<AppState>) -> Response {
    let all = match with_retry(|| {
        let storage = state.storage.clone();
        async move { storage.get_all().await }
    })
    .await
    {
        Ok(all) => all,
        Err(err) => {
            tracing::error!(error = %err, "failed to list metrics");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };

    let mut ids: Vec<&String> = all.keys().collect();
    ids.sort();

    let mut html = String::from("<html><body><ul>\n");
    for id in ids {
        let metric = &all[id];
        let shown = match metric.mtype {
            MetricType::Gauge => metric.value.map(|v| v.to_string()),
            MetricType::Counter => metric.delta.map(|d| d.to_string()),
        }
        .unwrap_or_default();
        html.push_str(&format!("<li>{} ({}): {}</li>", metric.id, metric.mtype, shown));
    }
    html.push_str("</ul></body></html>\n");

    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response()
}

/// `GET /ping` — storage liveness under a 5-second deadline.
pub async fn ping(State(state): State<AppState>) -> Response {
    let probe = with_retry(|| {
        let storage = state.storage.clone();
        async move { storage.ping().await }
    });
    match tokio::time::timeout(Duration::from_secs(5), probe).await {
        Ok(Ok(())) => StatusCode::OK.into_response(),
        Ok(Err(err)) => {
            tracing::error!(error = %err, "storage ping failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "storage not available").into_response()
        }
        Err(_) => {
            tracing::error!("storage ping timed out");
            (StatusCode::INTERNAL_SERVER_ERROR, "storage not available").into_response()
        }
    }
}
