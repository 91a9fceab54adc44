// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

mod compute;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use aws_config::BehaviorVersion;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use compute::{ComputeResource, Ec2ComputeResource, ResourceState};
use gamehost_common::{
    BACKEND_ENDPOINT, DeferredQueue, InteractionRequest, InteractionResponse, SIGNATURE_HEADER,
    SignatureVerifier, SqsDeferredQueue, TIMESTAMP_HEADER, required_vars,
};
use lambda_http::run as lambda_run;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const STILL_STARTING_MESSAGE: &str = "Server is still starting up!";
const DEFAULT_BACKEND_PORT: u16 = 8080;
const DEFAULT_FORWARD_TIMEOUT_MS: u64 = 3000;

#[derive(Clone)]
struct AppState {
    /// `None` when startup configuration was invalid.
    gateway: Option<Arc<RequestGateway>>,
}

#[derive(Debug, Clone)]
struct GatewayConfig {
    public_key: String,
    instance_id: String,
    queue_url: String,
    backend_port: u16,
    forward_timeout: Duration,
}

impl GatewayConfig {
    fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: &F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let values = required_vars(lookup, &["PUBLIC_KEY", "INSTANCE_ID", "MESSAGE_QUEUE_URL"])?;
        let [public_key, instance_id, queue_url] = <[String; 3]>::try_from(values)
            .map_err(|_| anyhow::anyhow!("unexpected gateway configuration shape"))?;

        Ok(Self {
            public_key,
            instance_id,
            queue_url,
            backend_port: lookup("BACKEND_PORT")
                .and_then(|value| value.trim().parse::<u16>().ok())
                .unwrap_or(DEFAULT_BACKEND_PORT),
            forward_timeout: Duration::from_millis(
                lookup("FORWARD_TIMEOUT_MS")
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .filter(|value| *value > 0)
                    .unwrap_or(DEFAULT_FORWARD_TIMEOUT_MS),
            ),
        })
    }
}

/// Front door for chat interactions: verifies, classifies against the
/// compute resource state and either forwards, defers or answers directly.
struct RequestGateway {
    verifier: SignatureVerifier,
    compute: Arc<dyn ComputeResource>,
    queue: Arc<dyn DeferredQueue>,
    client: reqwest::Client,
    instance_id: String,
    queue_url: String,
    backend_port: u16,
}

impl RequestGateway {
    fn new(
        config: &GatewayConfig,
        compute: Arc<dyn ComputeResource>,
        queue: Arc<dyn DeferredQueue>,
    ) -> anyhow::Result<Self> {
        let verifier = SignatureVerifier::from_hex(&config.public_key)
            .context("invalid PUBLIC_KEY")?;
        let client = reqwest::Client::builder()
            .timeout(config.forward_timeout)
            .build()
            .context("failed to build backend HTTP client")?;

        Ok(Self {
            verifier,
            compute,
            queue,
            client,
            instance_id: config.instance_id.clone(),
            queue_url: config.queue_url.clone(),
            backend_port: config.backend_port,
        })
    }

    async fn handle(
        &self,
        signature: &str,
        timestamp: &str,
        body: &[u8],
    ) -> Result<GatewayReply, ApiError> {
        if !self.verifier.verify(timestamp, body, signature) {
            return Err(ApiError::unauthorized());
        }

        let raw_body = std::str::from_utf8(body)
            .map_err(|error| ApiError::bad_request(format!("body is not utf-8: {error}")))?;
        let request = InteractionRequest::parse(raw_body, timestamp, signature).map_err(|error| {
            ApiError::bad_request(format!("failed to parse interaction: {error}"))
        })?;

        if request.is_ping() {
            return Ok(GatewayReply::ok(&InteractionResponse::pong()));
        }

        let state = self
            .compute
            .state(&self.instance_id)
            .await
            .map_err(|error| ApiError::internal(format!("failed to get instance state: {error:#}")))?;
        info!(
            instance_id = %self.instance_id,
            state = ?state,
            command = %request.command_name,
            game = ?request.game_argument,
            "classified interaction"
        );

        match state {
            ResourceState::Running => self.forward_to_backend(&request).await,
            ResourceState::Pending => Ok(GatewayReply::ok(&InteractionResponse::message(
                STILL_STARTING_MESSAGE,
            ))),
            _ => self.start_and_defer(&request).await,
        }
    }

    async fn start_and_defer(&self, request: &InteractionRequest) -> Result<GatewayReply, ApiError> {
        self.compute
            .start(&self.instance_id)
            .await
            .map_err(|error| ApiError::internal(format!("failed to start instance: {error:#}")))?;

        self.queue
            .send(&self.queue_url, &request.raw_body)
            .await
            .map_err(|error| {
                ApiError::internal(format!(
                    "failed to send request to deferred message queue: {error:#}"
                ))
            })?;

        info!(
            instance_id = %self.instance_id,
            command = %request.command_name,
            "instance starting; interaction deferred"
        );
        Ok(GatewayReply::ok(&InteractionResponse::deferred()))
    }

    async fn forward_to_backend(
        &self,
        request: &InteractionRequest,
    ) -> Result<GatewayReply, ApiError> {
        let address = self
            .compute
            .address(&self.instance_id)
            .await
            .map_err(|error| {
                ApiError::internal(format!("failed to get instance address: {error:#}"))
            })?;
        let endpoint = format!("http://{}:{}{}", address, self.backend_port, BACKEND_ENDPOINT);

        let response = self
            .client
            .post(&endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, &request.signature)
            .header(TIMESTAMP_HEADER, &request.timestamp)
            .body(request.raw_body.clone())
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    ApiError::internal(format!("backend call to {endpoint} timed out: {error}"))
                } else {
                    ApiError::internal(format!("backend call to {endpoint} failed: {error}"))
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            ApiError::internal(format!("failed to read backend response: {error}"))
        })?;

        info!(endpoint = %endpoint, status = %status, "forwarded interaction to backend");
        Ok(GatewayReply { status, body })
    }
}

#[derive(Debug)]
struct GatewayReply {
    status: StatusCode,
    body: String,
}

impl GatewayReply {
    fn ok(response: &InteractionResponse) -> Self {
        Self {
            status: StatusCode::OK,
            body: response.to_json(),
        }
    }
}

impl IntoResponse for GatewayReply {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, "application/json")],
            self.body,
        )
            .into_response()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "gateway_service=debug,tower_http=info".to_string()),
        )
        .init();

    let gateway = match GatewayConfig::from_env() {
        Ok(config) => build_gateway(&config).await,
        Err(error) => Err(error),
    };
    let state = match gateway {
        Ok(gateway) => AppState {
            gateway: Some(Arc::new(gateway)),
        },
        Err(error) => {
            error!(error = %format!("{error:#}"), "gateway configuration invalid; interactions will fail");
            AppState { gateway: None }
        }
    };

    let app = build_router(state);

    if std::env::var("AWS_LAMBDA_RUNTIME_API").is_ok() {
        info!("AWS Lambda runtime detected; running gateway-service in lambda mode");
        lambda_run(app)
            .await
            .map_err(|e| anyhow::Error::msg(format!("lambda runtime error: {e}")))?;
        return Ok(());
    }

    let bind_addr = parse_bind_addr("GATEWAY_SERVICE_BIND", "0.0.0.0:8085")?;
    info!(%bind_addr, "gateway-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn build_gateway(config: &GatewayConfig) -> anyhow::Result<RequestGateway> {
    let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    info!(
        instance_id = %config.instance_id,
        backend_port = config.backend_port,
        forward_timeout_ms = config.forward_timeout.as_millis() as u64,
        "gateway configured"
    );
    RequestGateway::new(
        config,
        Arc::new(Ec2ComputeResource::new(&aws_config)),
        Arc::new(SqsDeferredQueue::new(&aws_config)),
    )
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", post(interactions_handler))
        .route("/interactions", post(interactions_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "service": "gateway-service",
        "configured": state.gateway.is_some()
    }))
}

async fn interactions_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<GatewayReply, ApiError> {
    let Some(gateway) = state.gateway.as_ref() else {
        return Err(ApiError::internal("gateway is not configured"));
    };
    let signature = header_value(&headers, SIGNATURE_HEADER);
    let timestamp = header_value(&headers, TIMESTAMP_HEADER);
    gateway.handle(signature, timestamp, &body).await
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: &'static str,
    detail: String,
}

impl ApiError {
    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "Invalid request signature",
            detail: "signature verification failed".to_string(),
        }
    }

    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: "Invalid request",
            detail: detail.into(),
        }
    }

    fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Internal server error",
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, detail = %self.detail, "interaction request failed");
        } else {
            warn!(status = %self.status, detail = %self.detail, "interaction request rejected");
        }
        (self.status, self.message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ed25519_dalek::{Signer, SigningKey};
    use gamehost_common::QueuedJob;
    use std::sync::Mutex;

    const TIMESTAMP: &str = "1718200000";
    const INSTANCE_ID: &str = "i-0123456789";
    const QUEUE_URL: &str = "https://sqs.local/000000000000/interactions.fifo";

    #[derive(Default)]
    struct RecordingCompute {
        state: Mutex<Option<ResourceState>>,
        address: String,
        fail_start: bool,
        calls: Mutex<Vec<&'static str>>,
    }

    impl RecordingCompute {
        fn with_state(state: ResourceState) -> Self {
            Self {
                state: Mutex::new(Some(state)),
                address: "127.0.0.1".to_string(),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, call: &str) -> usize {
            self.calls().iter().filter(|name| **name == call).count()
        }
    }

    #[async_trait]
    impl ComputeResource for RecordingCompute {
        async fn state(&self, instance_id: &str) -> anyhow::Result<ResourceState> {
            assert_eq!(instance_id, INSTANCE_ID);
            self.calls.lock().unwrap().push("state");
            let state = *self.state.lock().unwrap();
            state.ok_or_else(|| anyhow::anyhow!("forced describe error"))
        }

        async fn start(&self, _instance_id: &str) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("start");
            if self.fail_start {
                anyhow::bail!("forced start error");
            }
            Ok(())
        }

        async fn address(&self, _instance_id: &str) -> anyhow::Result<String> {
            self.calls.lock().unwrap().push("address");
            Ok(self.address.clone())
        }
    }

    #[derive(Default)]
    struct RecordingQueue {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl DeferredQueue for RecordingQueue {
        async fn send(&self, queue_url: &str, body: &str) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("forced queue error");
            }
            self.sent
                .lock()
                .unwrap()
                .push((queue_url.to_string(), body.to_string()));
            Ok(())
        }

        async fn receive(&self, _queue_url: &str) -> anyhow::Result<Option<QueuedJob>> {
            Ok(None)
        }

        async fn acknowledge(&self, _queue_url: &str, _receipt: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[11u8; 32])
    }

    fn sign(body: &str) -> String {
        let message = format!("{TIMESTAMP}{body}");
        hex::encode(signing_key().sign(message.as_bytes()).to_bytes())
    }

    fn config(backend_port: u16, forward_timeout: Duration) -> GatewayConfig {
        GatewayConfig {
            public_key: hex::encode(signing_key().verifying_key().to_bytes()),
            instance_id: INSTANCE_ID.to_string(),
            queue_url: QUEUE_URL.to_string(),
            backend_port,
            forward_timeout,
        }
    }

    fn gateway(
        compute: &Arc<RecordingCompute>,
        queue: &Arc<RecordingQueue>,
        backend_port: u16,
    ) -> RequestGateway {
        RequestGateway::new(
            &config(backend_port, Duration::from_millis(500)),
            compute.clone(),
            queue.clone(),
        )
        .unwrap()
    }

    fn command_body() -> String {
        serde_json::json!({
            "type": 2,
            "id": "1",
            "application_id": "app",
            "token": "interaction-token",
            "channel_id": "chan-1",
            "data": {
                "name": "start",
                "options": [{"name": "game", "type": 3, "value": "valheim"}]
            }
        })
        .to_string()
    }

    async fn spawn_backend(
        status: StatusCode,
        reply: &'static str,
        delay: Duration,
    ) -> (u16, Arc<Mutex<Vec<(HeaderMap, Bytes)>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let recorder = received.clone();
        let app = Router::new().route(
            BACKEND_ENDPOINT,
            post(move |headers: HeaderMap, body: Bytes| {
                let recorder = recorder.clone();
                async move {
                    tokio::time::sleep(delay).await;
                    recorder.lock().unwrap().push((headers, body));
                    (status, reply)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (port, received)
    }

    #[tokio::test]
    async fn ping_is_answered_without_touching_collaborators() {
        let compute = Arc::new(RecordingCompute::with_state(ResourceState::Stopped));
        let queue = Arc::new(RecordingQueue::default());
        let body = r#"{"type":1}"#;

        let reply = gateway(&compute, &queue, 0)
            .handle(&sign(body), TIMESTAMP, body.as_bytes())
            .await
            .unwrap();

        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body, r#"{"type":1}"#);
        assert!(compute.calls().is_empty());
        assert!(queue.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_or_missing_signature_is_unauthorized() {
        let compute = Arc::new(RecordingCompute::with_state(ResourceState::Running));
        let queue = Arc::new(RecordingQueue::default());
        let gateway = gateway(&compute, &queue, 0);
        let body = command_body();

        let tampered = gateway
            .handle(&sign(&body), "1718200001", body.as_bytes())
            .await
            .unwrap_err();
        let missing = gateway.handle("", "", body.as_bytes()).await.unwrap_err();

        assert_eq!(tampered.status, StatusCode::UNAUTHORIZED);
        assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
        assert!(compute.calls().is_empty());
    }

    #[tokio::test]
    async fn unparseable_body_is_bad_request() {
        let compute = Arc::new(RecordingCompute::with_state(ResourceState::Running));
        let queue = Arc::new(RecordingQueue::default());
        let body = "not json";

        let error = gateway(&compute, &queue, 0)
            .handle(&sign(body), TIMESTAMP, body.as_bytes())
            .await
            .unwrap_err();

        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.message, "Invalid request");
        assert!(compute.calls().is_empty());
    }

    #[tokio::test]
    async fn stopped_instance_is_started_and_request_deferred() {
        let compute = Arc::new(RecordingCompute::with_state(ResourceState::Stopped));
        let queue = Arc::new(RecordingQueue::default());
        let body = command_body();

        let reply = gateway(&compute, &queue, 0)
            .handle(&sign(&body), TIMESTAMP, body.as_bytes())
            .await
            .unwrap();

        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body, r#"{"type":5}"#);
        assert_eq!(compute.count("start"), 1);
        assert_eq!(compute.count("address"), 0);
        let sent = queue.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (QUEUE_URL.to_string(), body.clone()));
    }

    #[tokio::test]
    async fn every_inactive_state_starts_and_enqueues_exactly_once() {
        for state in [
            ResourceState::Unknown,
            ResourceState::Stopped,
            ResourceState::Stopping,
            ResourceState::ShuttingDown,
            ResourceState::Terminated,
        ] {
            let compute = Arc::new(RecordingCompute::with_state(state));
            let queue = Arc::new(RecordingQueue::default());
            let body = command_body();

            let reply = gateway(&compute, &queue, 0)
                .handle(&sign(&body), TIMESTAMP, body.as_bytes())
                .await
                .unwrap();

            assert_eq!(reply.body, r#"{"type":5}"#, "{state:?}");
            assert_eq!(compute.count("start"), 1, "{state:?}");
            assert_eq!(queue.sent.lock().unwrap().len(), 1, "{state:?}");
        }
    }

    #[tokio::test]
    async fn pending_instance_neither_starts_nor_enqueues() {
        let compute = Arc::new(RecordingCompute::with_state(ResourceState::Pending));
        let queue = Arc::new(RecordingQueue::default());
        let body = command_body();

        let reply = gateway(&compute, &queue, 0)
            .handle(&sign(&body), TIMESTAMP, body.as_bytes())
            .await
            .unwrap();

        assert_eq!(reply.status, StatusCode::OK);
        let response: InteractionResponse = serde_json::from_str(&reply.body).unwrap();
        assert_eq!(response, InteractionResponse::message(STILL_STARTING_MESSAGE));
        assert_eq!(compute.calls(), vec!["state"]);
        assert!(queue.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_failure_is_internal_error_and_skips_enqueue() {
        let compute = Arc::new(RecordingCompute {
            fail_start: true,
            ..RecordingCompute::with_state(ResourceState::Stopped)
        });
        let queue = Arc::new(RecordingQueue::default());
        let body = command_body();

        let error = gateway(&compute, &queue, 0)
            .handle(&sign(&body), TIMESTAMP, body.as_bytes())
            .await
            .unwrap_err();

        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.message, "Internal server error");
        assert!(queue.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn queue_failure_is_internal_error() {
        let compute = Arc::new(RecordingCompute::with_state(ResourceState::Stopped));
        let queue = Arc::new(RecordingQueue {
            fail: true,
            ..RecordingQueue::default()
        });
        let body = command_body();

        let error = gateway(&compute, &queue, 0)
            .handle(&sign(&body), TIMESTAMP, body.as_bytes())
            .await
            .unwrap_err();

        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(compute.count("start"), 1);
    }

    #[tokio::test]
    async fn state_lookup_failure_is_internal_error() {
        let compute = Arc::new(RecordingCompute::default());
        let queue = Arc::new(RecordingQueue::default());
        let body = command_body();

        let error = gateway(&compute, &queue, 0)
            .handle(&sign(&body), TIMESTAMP, body.as_bytes())
            .await
            .unwrap_err();

        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(compute.calls(), vec!["state"]);
    }

    #[tokio::test]
    async fn running_instance_receives_exact_request_and_reply_is_relayed() {
        let reply_body = r#"{"type":4,"data":{"content":"Starting valheim game server"}}"#;
        let (port, received) =
            spawn_backend(StatusCode::ACCEPTED, reply_body, Duration::ZERO).await;
        let compute = Arc::new(RecordingCompute::with_state(ResourceState::Running));
        let queue = Arc::new(RecordingQueue::default());
        let body = command_body();
        let signature = sign(&body);

        let reply = gateway(&compute, &queue, port)
            .handle(&signature, TIMESTAMP, body.as_bytes())
            .await
            .unwrap();

        assert_eq!(reply.status, StatusCode::ACCEPTED);
        assert_eq!(reply.body, reply_body);
        assert_eq!(compute.count("start"), 0);
        assert!(queue.sent.lock().unwrap().is_empty());

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let (headers, forwarded) = &received[0];
        assert_eq!(forwarded.as_ref(), body.as_bytes());
        assert_eq!(header_value(headers, SIGNATURE_HEADER), signature);
        assert_eq!(header_value(headers, TIMESTAMP_HEADER), TIMESTAMP);
    }

    #[tokio::test]
    async fn unreachable_backend_is_internal_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let compute = Arc::new(RecordingCompute::with_state(ResourceState::Running));
        let queue = Arc::new(RecordingQueue::default());
        let body = command_body();

        let error = gateway(&compute, &queue, port)
            .handle(&sign(&body), TIMESTAMP, body.as_bytes())
            .await
            .unwrap_err();

        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn slow_backend_times_out_as_internal_error() {
        let (port, _received) =
            spawn_backend(StatusCode::OK, "{}", Duration::from_secs(5)).await;
        let compute = Arc::new(RecordingCompute::with_state(ResourceState::Running));
        let queue: Arc<RecordingQueue> = Arc::new(RecordingQueue::default());
        let gateway = RequestGateway::new(
            &config(port, Duration::from_millis(100)),
            compute.clone(),
            queue.clone(),
        )
        .unwrap();
        let body = command_body();

        let started = std::time::Instant::now();
        let error = gateway
            .handle(&sign(&body), TIMESTAMP, body.as_bytes())
            .await
            .unwrap_err();

        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn unconfigured_gateway_answers_internal_error() {
        let state = AppState { gateway: None };

        let error = interactions_handler(State(state), HeaderMap::new(), Bytes::from("{}"))
            .await
            .unwrap_err();

        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn config_requires_key_instance_and_queue() {
        let error = GatewayConfig::from_lookup(&|key: &str| {
            (key == "INSTANCE_ID").then(|| "i-1".to_string())
        })
        .unwrap_err();

        assert_eq!(
            error.to_string(),
            "missing environment variables: [PUBLIC_KEY, MESSAGE_QUEUE_URL]"
        );
    }

    #[test]
    fn config_applies_defaults_for_optional_values() {
        let config = GatewayConfig::from_lookup(&|key: &str| match key {
            "PUBLIC_KEY" => Some("ab".to_string()),
            "INSTANCE_ID" => Some("i-1".to_string()),
            "MESSAGE_QUEUE_URL" => Some("q".to_string()),
            "BACKEND_PORT" => Some("not-a-port".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.backend_port, DEFAULT_BACKEND_PORT);
        assert_eq!(
            config.forward_timeout,
            Duration::from_millis(DEFAULT_FORWARD_TIMEOUT_MS)
        );
    }

    #[test]
    fn gateway_rejects_invalid_public_key() {
        let mut config = config(0, Duration::from_secs(1));
        config.public_key = "not-hex".to_string();

        let result = RequestGateway::new(
            &config,
            Arc::new(RecordingCompute::default()),
            Arc::new(RecordingQueue::default()),
        );

        assert!(result.is_err());
    }
}
