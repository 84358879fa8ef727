//! Reverse proxy handler

use super::Director;
use crate::metrics::{self, Outcome};
use crate::sharding::ShardError;
use axum::{
    body::{Body, HttpBody},
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Shared state for the proxy handler
#[derive(Clone)]
pub struct ProxyState {
    pub director: Arc<Director>,
    pub client: reqwest::Client,
}

impl ProxyState {
    pub fn new(director: Arc<Director>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;
        Ok(Self { director, client })
    }
}

/// Forward one request to the backend owning its shard key.
///
/// Only the target scheme and authority change: method, path, query, the
/// inbound `Host` header and the body (streamed) go through as received.
/// An empty ring yields `503 Service Unavailable`; a failed upstream call
/// yields `502 Bad Gateway`.
pub async fn forward(State(state): State<ProxyState>, req: Request) -> Response {
    let started = Instant::now();
    let (parts, body) = req.into_parts();

    let (node, target) = match state.director.direct(&parts.uri).await {
        Ok(routed) => routed,
        Err(ShardError::NoNodesAvailable) => {
            warn!(path = %parts.uri.path(), "No shard backends available");
            metrics::record_request(Outcome::Unavailable, started.elapsed());
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                "no shard backends available\n",
            )
                .into_response();
        }
        Err(e) => {
            error!(error = %e, "Failed to direct request");
            metrics::record_request(Outcome::UpstreamError, started.elapsed());
            return (StatusCode::BAD_GATEWAY, "invalid shard target\n").into_response();
        }
    };

    debug!(node = %node, path = %parts.uri.path(), "Sending to shard");

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    if let Some(ConnectInfo(peer)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        append_forwarded_for(&mut headers, peer);
    }

    // Bodiless requests stay bodiless instead of going out chunked.
    let body = if body.is_end_stream() {
        reqwest::Body::from("")
    } else {
        reqwest::Body::wrap_stream(body.into_data_stream())
    };

    let upstream = state
        .client
        .request(parts.method, target.to_string())
        .headers(headers)
        .body(body)
        .send()
        .await;

    match upstream {
        Ok(resp) => {
            let status = resp.status();
            let mut headers = resp.headers().clone();
            strip_hop_by_hop(&mut headers);

            let mut response = Response::new(Body::from_stream(resp.bytes_stream()));
            *response.status_mut() = status;
            *response.headers_mut() = headers;

            metrics::record_request(Outcome::Forwarded, started.elapsed());
            response
        }
        Err(e) => {
            warn!(node = %node, error = %e, "Upstream request failed");
            metrics::record_request(Outcome::UpstreamError, started.elapsed());
            (StatusCode::BAD_GATEWAY, "upstream request failed\n").into_response()
        }
    }
}

/// Drop the fixed hop-by-hop set plus any header the `Connection` header names.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in &listed {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: &SocketAddr) {
    let ip = peer.ip().to_string();
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{prior}, {ip}"),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::create_router;
    use crate::sharding::{Membership, Node, ShardKeyExtractor};
    use axum::{
        extract::DefaultBodyLimit,
        http::{uri::Scheme, Method, Uri},
        Router,
    };
    use std::collections::BTreeSet;
    use tower::ServiceExt;

    async fn proxy_router(nodes: BTreeSet<Node>) -> Router {
        let membership = Arc::new(Membership::new(64));
        membership.set_members(nodes).await;
        let director = Arc::new(Director::new(
            ShardKeyExtractor::default(),
            membership,
            Scheme::HTTP,
        ));
        create_router(ProxyState::new(director).unwrap())
    }

    #[tokio::test]
    async fn test_empty_ring_returns_503() {
        let app = proxy_router(BTreeSet::new()).await;

        let resp = app
            .oneshot(axum::http::Request::builder().uri("/foo").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    /// Serve `backend` on a local port and return its node.
    async fn spawn_backend(backend: Router) -> Node {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, backend).await.unwrap();
        });
        Node::parse(&addr.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_forwards_request_unchanged() {
        let node = spawn_backend(Router::new().fallback(
            |method: Method, uri: Uri, headers: HeaderMap, body: String| async move {
                let host = headers
                    .get(header::HOST)
                    .and_then(|h| h.to_str().ok())
                    .unwrap_or("-")
                    .to_string();
                format!("{method} {uri} host={host} body={body}\n")
            },
        ))
        .await;
        let app = proxy_router(BTreeSet::from([node])).await;

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method(Method::POST)
                    .uri("/some/path?q=1")
                    .header(header::HOST, "shop.example.com")
                    .body(Body::from("payload"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        assert_eq!(
            &body[..],
            b"POST /some/path?q=1 host=shop.example.com body=payload\n"
        );
    }

    #[tokio::test]
    async fn test_large_body_streams_through() {
        let node = spawn_backend(
            Router::new()
                .fallback(|body: axum::body::Bytes| async move { body.len().to_string() })
                .layer(DefaultBodyLimit::disable()),
        )
        .await;
        let app = proxy_router(BTreeSet::from([node])).await;

        let size = 20 * 1024 * 1024;
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method(Method::PUT)
                    .uri("/blob")
                    .body(Body::from(vec![7u8; size]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        assert_eq!(String::from_utf8(body.to_vec()).unwrap(), size.to_string());
    }

    #[tokio::test]
    async fn test_dead_backend_returns_502() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let node = Node::parse(&addr.to_string()).unwrap();
        let app = proxy_router(BTreeSet::from([node])).await;

        let resp = app
            .oneshot(axum::http::Request::builder().uri("/x").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_connection_listed_headers_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, X-Session-Hint"));
        headers.insert("x-session-hint", HeaderValue::from_static("abc"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-request-id", HeaderValue::from_static("42"));

        strip_hop_by_hop(&mut headers);

        assert!(headers.get("x-session-hint").is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert_eq!(headers["x-request-id"], "42");
    }

    #[test]
    fn test_forwarded_for_appends() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "10.1.2.3:5555".parse().unwrap();
        append_forwarded_for(&mut headers, &peer);
        assert_eq!(headers[X_FORWARDED_FOR], "10.1.2.3");

        let other: SocketAddr = "10.9.9.9:1".parse().unwrap();
        append_forwarded_for(&mut headers, &other);
        assert_eq!(headers[X_FORWARDED_FOR], "10.1.2.3, 10.9.9.9");
    }
}
