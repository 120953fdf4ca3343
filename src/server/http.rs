//! Hyper-based HTTP server
//!
//! Direct Hyper service with manual routing, no framework overhead.
//! Endpoints:
//! - POST /embed  (auth required when a secret is configured)
//! - GET  /health (no auth, never blocks on loading or inference)
//! - GET  /       (no auth, service info)

use std::convert::Infallible;
use std::sync::Arc;

use hyper::body::to_bytes;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use tokio::net::TcpSocket;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::encoder::{EncoderHandle, TextEncoder};
use crate::pipeline::{EmbedError, EmbeddingPipeline};
use crate::protocol::http::{EmbedRequest, EmbedResponse, ErrorResponse, HealthResponse};
use crate::server::auth::{ApiKeyAuth, AuthError, API_KEY_HEADER};
use crate::server::config::ServerConfig;

/// Shared state for the Hyper service
#[derive(Clone)]
struct ServerState {
    pipeline: Arc<EmbeddingPipeline<EncoderHandle>>,
    encoder: Arc<EncoderHandle>,
    auth: Arc<ApiKeyAuth>,
}

/// Start the HTTP server; runs until the process exits
pub async fn start_http_server(
    config: Arc<ServerConfig>,
    encoder: Arc<EncoderHandle>,
) -> Result<(), Box<dyn std::error::Error>> {
    let bind_address = config.listen_address();

    let pipeline = Arc::new(EmbeddingPipeline::new(
        Arc::clone(&encoder),
        config.encoder.batch_size,
        config.limits.max_texts_per_request,
    ));
    let auth = Arc::new(ApiKeyAuth::new(config.auth.api_secret.clone()));

    let state = ServerState {
        pipeline,
        encoder,
        auth,
    };

    let make_svc = make_service_fn(move |_| {
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let state = state.clone();
                handle_request(req, state)
            }))
        }
    });

    let addr = bind_address.parse()?;

    // TCP_NODELAY: small JSON responses should not sit in Nagle's buffer
    let socket = TcpSocket::new_v4()?;
    socket.set_nodelay(true)?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    let listener = socket.listen(1024)?;

    let server = Server::from_tcp(listener.into_std()?)?
        .http1_keepalive(true)
        .tcp_nodelay(true)
        .serve(make_svc);

    info!("✅ HTTP server listening on {}", bind_address);
    info!("📍 Endpoints:");
    info!("   POST /embed      - Generate embeddings");
    info!("   GET  /health     - Health check");
    info!("   GET  /           - Server info");

    server.await?;

    Ok(())
}

/// Route requests; adds CORS headers to every response
async fn handle_request(
    req: Request<Body>,
    state: ServerState,
) -> Result<Response<Body>, Infallible> {
    let origin = req
        .headers()
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("*")
        .to_string();

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = match (&method, path.as_str()) {
        (&Method::POST, "/embed") => handle_embed(req, state).await,
        (&Method::GET, "/health") => handle_health(state),
        (&Method::GET, "/") => handle_root(state),
        (&Method::OPTIONS, _) => handle_options(),
        _ => handle_not_found(),
    };

    let headers = response.headers_mut();
    if let Ok(value) = origin.parse() {
        headers.insert("access-control-allow-origin", value);
    }
    headers.insert(
        "access-control-allow-methods",
        "GET, POST, OPTIONS".parse().expect("static header"),
    );
    headers.insert(
        "access-control-allow-headers",
        "content-type, x-api-key".parse().expect("static header"),
    );

    Ok(response)
}

fn handle_options() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::empty())
        .expect("static response")
}

fn handle_not_found() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("content-type", "application/json")
        .body(Body::from(r#"{"error":"Not Found"}"#))
        .expect("static response")
}

/// Service info payload
fn handle_root(state: ServerState) -> Response<Body> {
    let info = serde_json::json!({
        "name": "Embedding Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.encoder.model_name(),
        "endpoints": ["/embed", "/health", "/"],
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(info.to_string()))
        .expect("static response")
}

/// Health check; reads only atomics, so it answers instantly while the
/// model is loading or an inference is running
fn handle_health(state: ServerState) -> Response<Body> {
    debug!("health check requested");

    let response = HealthResponse::new(
        state.encoder.model_loaded(),
        state.encoder.device(),
        state.pipeline.batch_size(),
    );

    json_response(StatusCode::OK, &response)
}

/// Embedding endpoint
async fn handle_embed(req: Request<Body>, state: ServerState) -> Response<Body> {
    let request_id = Uuid::new_v4();
    let start_time = std::time::Instant::now();

    // Auth first, before the body is even read; raw bytes so a
    // non-UTF-8 header value counts as a wrong key, not a missing one
    let api_key = req
        .headers()
        .get(API_KEY_HEADER)
        .map(|v| v.as_bytes().to_vec());
    if let Err(e) = state.auth.check(api_key.as_deref()) {
        let (status, body) = match e {
            AuthError::MissingKey => (StatusCode::UNAUTHORIZED, ErrorResponse::missing_api_key()),
            AuthError::InvalidKey => (StatusCode::FORBIDDEN, ErrorResponse::invalid_api_key()),
        };
        return json_response(status, &body);
    }

    let body_bytes = match to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &ErrorResponse::invalid_input("Failed to read request body"),
            );
        }
    };

    let request: EmbedRequest = match serde_json::from_slice(&body_bytes) {
        Ok(req) => req,
        Err(e) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &ErrorResponse::invalid_input(format!("Invalid JSON: {e}")),
            );
        }
    };

    debug!(
        "[{request_id}] embed request: {} texts, task '{}'",
        request.texts.len(),
        request.task
    );

    let result = state.pipeline.embed(&request.texts, &request.task).await;

    // Transient compute resources are released at request end regardless
    // of outcome, so one failed request cannot leak into the next
    state.encoder.release_transient().await;

    match result {
        Ok(embeddings) => {
            info!(
                "[{request_id}] embedded {} texts in {:?}",
                embeddings.len(),
                start_time.elapsed()
            );
            let response = EmbedResponse::new(embeddings, state.encoder.model_name());
            json_response(StatusCode::OK, &response)
        }
        Err(EmbedError::InvalidInput { message }) => {
            json_response(StatusCode::BAD_REQUEST, &ErrorResponse::invalid_input(message))
        }
        Err(EmbedError::NotReady) => json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &ErrorResponse::model_not_ready(),
        ),
        Err(EmbedError::Encoding { message }) => {
            // full detail stays server-side; the caller gets a generic body
            error!("[{request_id}] embedding failed: {message}");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &ErrorResponse::internal_error(),
            )
        }
    }
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| r#"{"error":"serialization"}"#.into());
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(json))
        .expect("static response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{Embedding, EncodeResult, InferenceBackend};

    struct EchoBackend;

    impl InferenceBackend for EchoBackend {
        fn encode_batch(&mut self, texts: &[String]) -> EncodeResult<Vec<Embedding>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn release_transient(&mut self) {}
    }

    fn test_state(secret: Option<&str>, ready: bool) -> ServerState {
        let encoder = if ready {
            Arc::new(EncoderHandle::ready_with(
                "test-model",
                "cpu",
                Box::new(EchoBackend),
            ))
        } else {
            Arc::new(EncoderHandle::new("test-model", "cpu"))
        };
        ServerState {
            pipeline: Arc::new(EmbeddingPipeline::new(Arc::clone(&encoder), 4, 1000)),
            encoder,
            auth: Arc::new(ApiKeyAuth::new(secret.map(str::to_owned))),
        }
    }

    fn embed_request(body: &str, api_key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(Method::POST).uri("/embed");
        if let Some(key) = api_key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_embed_success() {
        let state = test_state(None, true);
        let req = embed_request(r#"{"texts": ["hello", "world"]}"#, None);

        let response = handle_embed(req, state).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["count"], 2);
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["embeddings"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_embed_missing_key_is_401() {
        let state = test_state(Some("s3cret"), true);
        let req = embed_request(r#"{"texts": ["hello"]}"#, None);

        let response = handle_embed(req, state).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_embed_wrong_key_is_403() {
        let state = test_state(Some("s3cret"), true);
        let req = embed_request(r#"{"texts": ["hello"]}"#, Some("wrong"));

        let response = handle_embed(req, state).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_embed_non_utf8_key_is_403() {
        let state = test_state(Some("s3cret"), true);
        let mut req = embed_request(r#"{"texts": ["hello"]}"#, None);
        req.headers_mut().insert(
            API_KEY_HEADER,
            hyper::header::HeaderValue::from_bytes(b"s3cret\xff").unwrap(),
        );

        let response = handle_embed(req, state).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_embed_correct_key_accepted() {
        let state = test_state(Some("s3cret"), true);
        let req = embed_request(r#"{"texts": ["hello"]}"#, Some("s3cret"));

        let response = handle_embed(req, state).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_embed_invalid_input_is_400() {
        let state = test_state(None, true);
        let req = embed_request(r#"{"texts": []}"#, None);

        let response = handle_embed(req, state).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_embed_while_loading_is_503() {
        let state = test_state(None, false);
        let req = embed_request(r#"{"texts": ["hello"]}"#, None);

        let response = handle_embed(req, state).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_reflects_loading_state() {
        let loading = handle_health(test_state(None, false));
        let json = body_json(loading).await;
        assert_eq!(json["status"], "loading");
        assert_eq!(json["model_loaded"], false);

        let healthy = handle_health(test_state(None, true));
        let json = body_json(healthy).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["model_loaded"], true);
        assert_eq!(json["device"], "cpu");
        assert_eq!(json["batch_size"], 4);
    }

    #[tokio::test]
    async fn test_root_lists_endpoints() {
        let response = handle_root(test_state(None, true));
        let json = body_json(response).await;
        assert_eq!(json["model"], "test-model");
        assert!(json["endpoints"]
            .as_array()
            .unwrap()
            .contains(&serde_json::json!("/embed")));
    }
}
