//! Grafana Tempo HTTP client.
//!
//! - `GET /api/traces/{id}` with `Accept: application/protobuf` returns
//!   the trace as an OTLP `TracesData` message.
//! - `GET /api/search?q=&start=&end=&limit=` returns JSON
//!   `{"traces": [{"traceID": "..."}]}`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{StatusCode, header};
use http_body_util::{BodyExt, Empty};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use prost::Message;
use serde::Deserialize;
use tracing::{debug, info};

use tracescale_proto::trace::TracesData;

use crate::error::{BackendError, BackendResult};
use crate::{TimeRange, TraceBackend};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const PROTOBUF: &str = "application/protobuf";

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    traces: Vec<SearchTrace>,
}

#[derive(Debug, Deserialize)]
struct SearchTrace {
    #[serde(rename = "traceID")]
    trace_id: String,
}

#[derive(Clone)]
pub struct TempoBackend {
    base_url: String,
    client: Client<HttpConnector, Empty<Bytes>>,
    timeout: Duration,
    token: Option<String>,
}

impl TempoBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            timeout: DEFAULT_TIMEOUT,
            token: None,
        }
    }

    /// Deadline applied to each request, body included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send `Authorization: Bearer <token>` on every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path_and_query: &str, accept: Option<&str>) -> BackendResult<(StatusCode, Bytes)> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let uri: hyper::Uri = url
            .parse()
            .map_err(|_| BackendError::InvalidUri(url.clone()))?;

        let mut builder = http::Request::builder().method(http::Method::GET).uri(uri);
        if let Some(accept) = accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        if let Some(token) = &self.token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = builder
            .body(Empty::<Bytes>::new())
            .map_err(|e| BackendError::Http(e.to_string()))?;

        let fut = async {
            let resp = self
                .client
                .request(req)
                .await
                .map_err(|e| BackendError::Http(e.to_string()))?;
            let status = resp.status();
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| BackendError::Http(e.to_string()))?
                .to_bytes();
            Ok::<_, BackendError>((status, body))
        };

        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%url, "backend request timed out");
                Err(BackendError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl TraceBackend for TempoBackend {
    async fn get_trace_by_id(&self, trace_id: &str) -> BackendResult<TracesData> {
        let (status, body) = self
            .get(&format!("/api/traces/{trace_id}"), Some(PROTOBUF))
            .await?;

        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(trace_id.to_string()));
        }
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let data = TracesData::decode(body).map_err(|e| BackendError::Decode(e.to_string()))?;
        if data.resource_spans.is_empty() {
            return Err(BackendError::NotFound(trace_id.to_string()));
        }
        Ok(data)
    }

    async fn search_traces(
        &self,
        range: TimeRange,
        limit: usize,
        query: &str,
    ) -> BackendResult<Vec<String>> {
        info!(limit, "searching backend for traces");
        let path = format!(
            "/api/search?q={}&start={}&end={}&limit={}",
            utf8_percent_encode(query, NON_ALPHANUMERIC),
            range.start_unix_secs,
            range.end_unix_secs,
            limit
        );
        let (status, body) = self.get(&path, None).await?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let response: SearchResponse =
            serde_json::from_slice(&body).map_err(|e| BackendError::Decode(e.to_string()))?;
        let ids: Vec<String> = response.traces.into_iter().map(|t| t.trace_id).collect();
        if ids.len() < limit {
            return Err(BackendError::InsufficientResults {
                requested: limit,
                received: ids.len(),
            });
        }
        debug!(received = ids.len(), "trace search complete");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tracescale_proto::trace::{ResourceSpans, ScopeSpans, Span};

    /// Serve one canned HTTP/1.1 response and hand back the request head.
    async fn serve_once(
        status: &'static str,
        body: Vec<u8>,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut head = Vec::new();
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                head.extend_from_slice(&buf[..n]);
                if n == 0 || head.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let _ = tx.send(String::from_utf8_lossy(&head).into_owned());

            let header = format!(
                "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(header.as_bytes()).await.unwrap();
            stream.write_all(&body).await.unwrap();
            stream.shutdown().await.unwrap();
        });

        (format!("http://{addr}"), rx)
    }

    fn sample_trace() -> TracesData {
        TracesData {
            resource_spans: vec![ResourceSpans {
                resource: None,
                scope_spans: vec![ScopeSpans {
                    scope: None,
                    spans: vec![Span {
                        trace_id: vec![1; 16],
                        span_id: vec![2; 8],
                        name: "GET /".into(),
                        ..Default::default()
                    }],
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        }
    }

    #[tokio::test]
    async fn fetches_trace_as_protobuf() {
        let (url, head) = serve_once("200 OK", sample_trace().encode_to_vec()).await;
        let backend = TempoBackend::new(url);

        let data = backend.get_trace_by_id("abc123").await.unwrap();
        assert_eq!(data, sample_trace());

        let head = head.await.unwrap().to_lowercase();
        assert!(head.starts_with("get /api/traces/abc123 http/1.1"));
        assert!(head.contains("accept: application/protobuf"));
    }

    #[tokio::test]
    async fn token_sent_as_bearer_authorization() {
        let (url, head) = serve_once("200 OK", sample_trace().encode_to_vec()).await;
        let backend = TempoBackend::new(url).with_token("s3cret");
        backend.get_trace_by_id("abc123").await.unwrap();

        let head = head.await.unwrap().to_lowercase();
        assert!(head.contains("authorization: bearer s3cret"));
    }

    #[tokio::test]
    async fn no_authorization_without_token() {
        let (url, head) = serve_once("200 OK", sample_trace().encode_to_vec()).await;
        TempoBackend::new(url).get_trace_by_id("abc123").await.unwrap();
        assert!(!head.await.unwrap().to_lowercase().contains("authorization"));
    }

    #[tokio::test]
    async fn missing_trace_is_not_found() {
        let (url, _head) = serve_once("404 Not Found", b"trace not found".to_vec()).await;
        let backend = TempoBackend::new(url);
        assert!(matches!(
            backend.get_trace_by_id("nope").await,
            Err(BackendError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn server_error_is_status() {
        let (url, _head) = serve_once("500 Internal Server Error", b"boom".to_vec()).await;
        let backend = TempoBackend::new(url);
        match backend.get_trace_by_id("x").await {
            Err(BackendError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn search_encodes_query_and_counts_results() {
        let body = br#"{"traces":[{"traceID":"a1"},{"traceID":"b2"}]}"#.to_vec();
        let (url, head) = serve_once("200 OK", body).await;
        let backend = TempoBackend::new(url);
        let range = TimeRange {
            start_unix_secs: 100,
            end_unix_secs: 200,
        };

        let ids = backend.search_traces(range, 2, r#"{trace:rootService != ""}"#).await.unwrap();
        assert_eq!(ids, vec!["a1", "b2"]);

        let head = head.await.unwrap();
        assert!(head.contains("q=%7Btrace%3ArootService%20%21%3D%20%22%22%7D"));
        assert!(head.contains("&start=100&end=200&limit=2"));
    }

    #[tokio::test]
    async fn short_search_is_insufficient() {
        let body = br#"{"traces":[{"traceID":"a1"}]}"#.to_vec();
        let (url, _head) = serve_once("200 OK", body).await;
        let backend = TempoBackend::new(url);
        let range = TimeRange::last(Duration::from_secs(60));

        assert!(matches!(
            backend.search_traces(range, 5, "{}").await,
            Err(BackendError::InsufficientResults {
                requested: 5,
                received: 1
            })
        ));
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let backend =
            TempoBackend::new(format!("http://{addr}")).with_timeout(Duration::from_millis(50));
        assert!(matches!(
            backend.get_trace_by_id("x").await,
            Err(BackendError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn invalid_base_url() {
        let backend = TempoBackend::new("not a url");
        assert!(matches!(
            backend.get_trace_by_id("x").await,
            Err(BackendError::InvalidUri(_))
        ));
    }
}
