use std::{collections::BTreeMap, convert::Infallible, future::Future, time::Duration};

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{any, get},
    Json, Router,
};
use futures_util::stream;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::debug;

#[derive(Deserialize)]
pub struct StreamQuery {
    #[serde(default = "default_chunks")]
    pub chunks: usize,
    #[serde(default)]
    pub delay_ms: u64,
}

#[derive(Deserialize)]
pub struct DelayQuery {
    #[serde(default)]
    pub delay_ms: u64,
}

fn default_chunks() -> usize {
    3
}

pub fn app() -> Router {
    Router::new()
        .route("/json", get(sample_json))
        .route("/echo", any(echo))
        .route("/headers", get(request_headers))
        .route("/status/{code}", any(status))
        .route("/stream", get(chunked))
        .route("/slow", get(slow))
        .route("/redirect", get(redirect))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    serve(listener, std::future::pending()).await
}

/// Serve until `shutdown` resolves; in-flight requests are allowed to finish.
pub async fn serve<F>(listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app()).with_graceful_shutdown(shutdown).await
}

async fn sample_json() -> Json<serde_json::Value> {
    Json(json!({ "message": "hello", "items": [1, 2, 3] }))
}

/// Reflect the body and its content type; the method goes in `x-echo-method`.
async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> Response {
    debug!(%method, len = body.len(), "echo");
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    let mut response = body.into_response();
    response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    if let Ok(value) = HeaderValue::from_str(method.as_str()) {
        response.headers_mut().insert("x-echo-method", value);
    }
    response
}

/// Request headers as a JSON object with lower-case names.
async fn request_headers(headers: HeaderMap) -> Json<BTreeMap<String, String>> {
    let map = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    Json(map)
}

async fn status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

/// `chunks` lines of `chunk-<n>\n`, without a content length.
async fn chunked(Query(query): Query<StreamQuery>) -> Response {
    let delay = Duration::from_millis(query.delay_ms);
    let total = query.chunks;
    let lines = stream::unfold(0usize, move |n| async move {
        if n >= total {
            return None;
        }
        if n > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Some((Ok::<_, Infallible>(format!("chunk-{n}\n")), n + 1))
    });
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(lines),
    )
        .into_response()
}

async fn slow(Query(query): Query<DelayQuery>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(query.delay_ms)).await;
    "done"
}

async fn redirect() -> Redirect {
    Redirect::temporary("/json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_query_defaults_to_zero() {
        let query: DelayQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.delay_ms, 0);
    }

    #[test]
    fn stream_query_defaults() {
        let query: StreamQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.chunks, 3);
        assert_eq!(query.delay_ms, 0);
    }
}
