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

mod backup;
mod deferred;
mod discord;
mod dispatch;
mod monitor;
mod shutdown;
mod supervisor;

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use aws_config::BehaviorVersion;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use backup::{DisabledBackup, GameSaveBackup, S3SaveStore, SaveBackup};
use deferred::BackendRequestHandler;
use discord::{ChatClient, DEFAULT_API_BASE_URL, DiscordRestClient};
use dispatch::CommandDispatcher;
use gamehost_common::{
    BACKEND_ENDPOINT, GameCatalog, InteractionRequest, InteractionResponse, SIGNATURE_HEADER,
    SignatureVerifier, SqsDeferredQueue, TIMESTAMP_HEADER, required_vars,
};
use monitor::{InactivityMonitor, capture_opener};
use shutdown::ShutdownCoordinator;
use supervisor::{DEFAULT_LOG_MAX_LINES, GameServer, ProcessSupervisor, StopTimings};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct HostConfig {
    public_key: String,
    bot_token: String,
    queue_url: String,
    game_config_path: PathBuf,
    api_base_url: String,
    monitor_ports: Option<Vec<u16>>,
    monitor_device: String,
    idle_timeout: Duration,
    poll_interval: Duration,
    stop_timings: StopTimings,
    save_bucket: Option<String>,
    backup_frequency: Duration,
    log_max_lines: usize,
}

impl HostConfig {
    fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: &F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let values = required_vars(
            lookup,
            &[
                "DISCORD_PUBLIC_KEY",
                "DISCORD_BOT_TOKEN",
                "MESSAGE_QUEUE_URL",
                "GAME_CONFIG_PATH",
            ],
        )?;
        let [public_key, bot_token, queue_url, game_config_path] =
            <[String; 4]>::try_from(values)
                .map_err(|_| anyhow::anyhow!("unexpected host configuration shape"))?;

        let optional = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let seconds = |key: &str, default: u64| {
            Duration::from_secs(
                optional(key)
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(default),
            )
        };

        let monitor_ports = optional("MONITOR_PORTS")
            .map(|value| parse_ports(&value))
            .transpose()?;

        Ok(Self {
            public_key,
            bot_token,
            queue_url,
            game_config_path: PathBuf::from(game_config_path),
            api_base_url: optional("DISCORD_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            monitor_ports,
            monitor_device: optional("MONITOR_DEVICE").unwrap_or_else(|| "any".to_string()),
            idle_timeout: seconds("IDLE_TIMEOUT_SECONDS", 1800),
            poll_interval: Duration::from_millis(
                optional("MONITOR_POLL_INTERVAL_MS")
                    .and_then(|value| value.parse::<u64>().ok())
                    .filter(|value| *value > 0)
                    .unwrap_or(1000),
            ),
            stop_timings: StopTimings {
                warning_delay: seconds("SHUTDOWN_WARNING_SECONDS", 30),
                shutdown_timeout: seconds("SHUTDOWN_TIMEOUT_SECONDS", 10),
            },
            save_bucket: optional("GAME_SAVE_BUCKET"),
            backup_frequency: Duration::from_secs(
                optional("BACKUP_FREQUENCY_HOURS")
                    .and_then(|value| value.parse::<u64>().ok())
                    .and_then(|hours| hours.checked_mul(3600))
                    .unwrap_or(24 * 3600),
            ),
            log_max_lines: optional("GAME_LOG_MAX_LINES")
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(DEFAULT_LOG_MAX_LINES),
        })
    }
}

fn parse_ports(value: &str) -> anyhow::Result<Vec<u16>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|port| !port.is_empty())
        .map(|port| {
            port.parse::<u16>()
                .with_context(|| format!("invalid MONITOR_PORTS entry: {port}"))
        })
        .collect()
}

#[derive(Clone)]
struct AppState {
    verifier: Arc<SignatureVerifier>,
    dispatcher: Arc<CommandDispatcher>,
    games: Arc<dyn GameServer>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "host_service=debug,tower_http=info".to_string()),
        )
        .init();

    let config = HostConfig::from_env()?;
    let verifier = Arc::new(
        SignatureVerifier::from_hex(&config.public_key).context("invalid DISCORD_PUBLIC_KEY")?,
    );
    let catalog = Arc::new(GameCatalog::load(&config.game_config_path)?);
    let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;

    let supervisor = Arc::new(ProcessSupervisor::new(
        catalog.clone(),
        config.stop_timings,
        config.log_max_lines,
    ));
    let chat: Arc<dyn ChatClient> = Arc::new(DiscordRestClient::new(
        &config.api_base_url,
        &config.bot_token,
    ));
    let dispatcher = Arc::new(CommandDispatcher::new(supervisor.clone(), chat.clone()));

    let drain = BackendRequestHandler::new(
        Arc::new(SqsDeferredQueue::new(&aws_config)),
        config.queue_url.clone(),
        dispatcher.clone(),
        chat.clone(),
    );
    let drained = drain.drain_once().await;
    info!(outcome = ?drained, "startup drain finished");

    let monitor = Arc::new(InactivityMonitor::new(
        capture_opener(&config.monitor_device),
        config.idle_timeout,
        config.poll_interval,
    ));
    let ports = config
        .monitor_ports
        .clone()
        .unwrap_or_else(|| catalog.ports());
    let idle = match monitor.start(&ports) {
        Ok(done) => Some(done),
        Err(error) => {
            warn!(error = %error, ports = ?ports, "inactivity monitor unavailable; idle shutdown disabled");
            None
        }
    };

    let state = AppState {
        verifier,
        dispatcher: dispatcher.clone(),
        games: supervisor.clone(),
    };
    let app = build_router(state);

    let bind_addr = parse_bind_addr("HOST_SERVICE_BIND", "0.0.0.0:8080")?;
    info!(%bind_addr, "host-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let listener_stop = CancellationToken::new();
    let graceful = listener_stop.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await
    });

    tokio::select! {
        _ = wait_for_idle(idle) => info!("host idle; shutting down"),
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("interrupt received; shutting down");
        }
    }

    let backup: Arc<dyn SaveBackup> = match &config.save_bucket {
        Some(bucket) => Arc::new(GameSaveBackup::new(
            Arc::new(S3SaveStore::new(&aws_config, bucket.clone())),
            catalog.clone(),
            config.backup_frequency,
        )),
        None => Arc::new(DisabledBackup),
    };
    let failed = ShutdownCoordinator::new(dispatcher, supervisor, monitor, listener_stop, backup)
        .run()
        .await;
    if !failed.is_empty() {
        warn!(failed = ?failed, "some shutdown steps failed");
    }

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => warn!(error = %error, "listener stopped with error"),
        Err(error) => warn!(error = %error, "listener task failed"),
    }
    info!("host-service stopped");
    Ok(())
}

async fn wait_for_idle(idle: Option<CancellationToken>) {
    match idle {
        Some(done) => done.cancelled().await,
        None => std::future::pending().await,
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(BACKEND_ENDPOINT, post(interaction_handler))
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
        "service": "host-service",
        "running_game": state.games.running_game()
    }))
}

async fn interaction_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<InteractionResponse>, ApiError> {
    let signature = header_value(&headers, SIGNATURE_HEADER);
    let timestamp = header_value(&headers, TIMESTAMP_HEADER);
    if !state.verifier.verify(timestamp, &body, signature) {
        return Err(ApiError::unauthorized());
    }

    let raw_body = std::str::from_utf8(&body)
        .map_err(|error| ApiError::bad_request(format!("body is not utf-8: {error}")))?;
    let request = InteractionRequest::parse(raw_body, timestamp, signature)
        .map_err(|error| ApiError::bad_request(format!("failed to parse interaction: {error}")))?;

    let response = state
        .dispatcher
        .dispatch(&request)
        .await
        .map_err(|error| ApiError::unsupported(error.to_string()))?;
    Ok(Json(response))
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

    fn unsupported(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: "Unsupported interaction",
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, detail = %self.detail, "interaction request rejected");
        (self.status, self.message).into_response()
    }
}
