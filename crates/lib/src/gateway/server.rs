//! Gateway HTTP server (single port) and the top-level turn handler.

use crate::channels::{ChannelHandle, ChannelRegistry, TelegramChannel, TelegramUpdate};
use crate::config::{self, Config};
use crate::dispatch::{DispatchOptions, Dispatcher, TurnProcessor};
use crate::error::TurnError;
use crate::gateway::protocol::{TurnRequest, TurnResponse};
use crate::state::ConversationStates;
use crate::store;
use crate::telemetry::{self, Properties, TelemetrySink};
use crate::turn::Turn;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

/// The only reply a user sees when a turn fails.
pub const APOLOGY: &str = "Sorry, it looks like something went wrong.";

/// Shared state for the gateway (config, dispatcher, channels).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
    pub telemetry: Arc<dyn TelemetrySink>,
    /// In-process channel connector tasks; awaited during graceful shutdown.
    pub channel_tasks: Arc<tokio::sync::RwLock<Vec<JoinHandle<()>>>>,
    /// Sender for inbound channel turns (e.g. Telegram webhook POSTs). Processor task receives.
    pub inbound_tx: mpsc::Sender<Turn>,
    pub channel_registry: Arc<ChannelRegistry>,
}

/// Build the dispatcher and telemetry sink described by the config. The store is opened here
/// and shared by every turn.
pub async fn build_dispatcher(
    config: &Config,
    config_path: &Path,
) -> Result<(Arc<Dispatcher>, Arc<dyn TelemetrySink>)> {
    let store = store::open(&config.store, config_path).await?;
    let telemetry = telemetry::from_config(&config.telemetry);
    let dispatcher = Dispatcher::new(
        store,
        Arc::new(ConversationStates::new()),
        telemetry.clone(),
        DispatchOptions::from_config(config),
    );
    Ok((Arc::new(dispatcher), telemetry))
}

fn report_failure(
    telemetry: &dyn TelemetrySink,
    err: &TurnError,
    channel_id: &str,
    conversation_id: &str,
) {
    log::error!(
        "turn failed in conversation {} ({}): {}",
        conversation_id,
        channel_id,
        err
    );
    let mut props = Properties::new();
    props.insert("Channel".to_string(), channel_id.to_string());
    props.insert("ConversationId".to_string(), conversation_id.to_string());
    telemetry.track_exception(err, &props);
}

/// Top-level turn handler: run the processor and turn any failure into the apology reply.
/// The failure is logged and tracked; it never affects other turns.
pub async fn respond(
    processor: &dyn TurnProcessor,
    telemetry: &dyn TelemetrySink,
    turn: &Turn,
) -> String {
    match processor.process_turn(turn).await {
        Ok(reply) => reply,
        Err(e) => {
            report_failure(telemetry, &e, &turn.channel_id, &turn.conversation_id);
            APOLOGY.to_string()
        }
    }
}

/// Process one inbound channel turn and deliver the reply through its channel.
async fn process_inbound_turn(state: GatewayState, turn: Turn) {
    let reply = respond(state.dispatcher.as_ref(), state.telemetry.as_ref(), &turn).await;
    if reply.trim().is_empty() {
        return;
    }
    match state.channel_registry.get(&turn.channel_id).await {
        Some(handle) => {
            if let Err(e) = handle.send_message(&turn.conversation_id, &reply).await {
                log::warn!("inbound: send_message failed: {}", e);
            }
        }
        None => log::warn!("inbound: no channel registered for {}", turn.channel_id),
    }
}

/// Run each queued channel turn on its own task until `stop` fires or the queue closes.
/// Turns still in flight at that point are aborted; returns how many were.
async fn run_inbound_turns<F, Fut>(
    mut inbound_rx: mpsc::Receiver<Turn>,
    mut stop: oneshot::Receiver<()>,
    process: F,
) -> usize
where
    F: Fn(Turn) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut turns = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut stop => break,
            Some(res) = turns.join_next(), if !turns.is_empty() => {
                if let Err(e) = res {
                    log::warn!("inbound: turn task failed: {}", e);
                }
            }
            next = inbound_rx.recv() => match next {
                Some(turn) => {
                    turns.spawn(process(turn));
                }
                None => break,
            },
        }
    }
    let in_flight = turns.len();
    if in_flight > 0 {
        log::debug!("inbound: aborting {} in-flight turn(s) on shutdown", in_flight);
    }
    turns.shutdown().await;
    in_flight
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Blocks until shutdown (e.g. Ctrl+C).
/// `config_path` is the path to the config file (used to resolve a relative store path).
pub async fn run_gateway(config: Config, config_path: impl AsRef<Path>) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) {
        log::warn!(
            "gateway bound to non-loopback address {}; turns are accepted without authentication",
            bind
        );
    }

    let (dispatcher, telemetry) = build_dispatcher(&config, config_path.as_ref()).await?;
    let channel_tasks = Arc::new(tokio::sync::RwLock::new(Vec::new()));
    let (inbound_tx, inbound_rx) = mpsc::channel::<Turn>(64);

    let state = GatewayState {
        config: Arc::new(config.clone()),
        dispatcher,
        telemetry,
        channel_tasks: channel_tasks.clone(),
        inbound_tx: inbound_tx.clone(),
        channel_registry: Arc::new(ChannelRegistry::new()),
    };

    let (inbound_stop_tx, inbound_stop_rx) = oneshot::channel();
    let inbound_loop = {
        let state_inbound = state.clone();
        tokio::spawn(run_inbound_turns(inbound_rx, inbound_stop_rx, move |turn| {
            process_inbound_turn(state_inbound.clone(), turn)
        }))
    };

    let telegram_token = config::resolve_telegram_token(&config);
    let webhook_url = config.channels.telegram.webhook_url.clone();
    let telegram_webhook_for_shutdown: Option<Arc<TelegramChannel>> =
        if let Some(token) = telegram_token {
            let telegram = Arc::new(TelegramChannel::new(Some(token)));
            if let Some(ref url) = webhook_url {
                let secret = config.channels.telegram.webhook_secret.as_deref();
                if let Err(e) = telegram.set_webhook(url, secret).await {
                    log::warn!("telegram set_webhook failed: {}", e);
                } else {
                    log::info!("telegram channel registered (webhook mode): {}", url);
                }
                state
                    .channel_registry
                    .register(telegram.id().to_string(), telegram.clone())
                    .await;
                Some(telegram)
            } else {
                let handle = telegram.clone().start_inbound(inbound_tx);
                state.channel_tasks.write().await.push(handle);
                state
                    .channel_registry
                    .register(telegram.id().to_string(), telegram)
                    .await;
                log::info!("telegram channel registered and getUpdates loop started");
                None
            }
        } else {
            None
        };

    let channel_registry = state.channel_registry.clone();
    let app = Router::new()
        .route("/", get(health_http))
        .route("/api/messages", post(post_message))
        .route("/telegram/webhook", post(telegram_webhook))
        .with_state(state);

    let bind_addr = format!("{}:{}", bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            channel_registry,
            channel_tasks,
            telegram_webhook_for_shutdown,
        ))
        .await
        .context("gateway server exited")?;
    let _ = inbound_stop_tx.send(());
    if let Err(e) = inbound_loop.await {
        log::warn!("inbound turn loop failed: {}", e);
    }
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Stops channel connectors, removes the Telegram webhook if used, then awaits in-process channel tasks.
async fn shutdown_signal(
    channel_registry: Arc<ChannelRegistry>,
    channel_tasks: Arc<tokio::sync::RwLock<Vec<JoinHandle<()>>>>,
    telegram_webhook: Option<Arc<TelegramChannel>>,
) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::info!("shutdown signal received, stopping channels");
    for id in channel_registry.ids().await {
        if let Some(handle) = channel_registry.get(&id).await {
            handle.stop();
        }
    }
    if let Some(t) = telegram_webhook {
        if let Err(e) = t.delete_webhook().await {
            log::debug!("telegram delete_webhook on shutdown: {}", e);
        }
    }
    let handles = {
        let mut g = channel_tasks.write().await;
        std::mem::take(&mut *g)
    };
    futures_util::future::join_all(handles).await;
    log::info!("channel tasks finished");
}

/// POST /api/messages — one turn in, one reply out. Failures are answered with the apology.
async fn post_message(
    State(state): State<GatewayState>,
    Json(req): Json<TurnRequest>,
) -> Json<TurnResponse> {
    let channel_id = req.channel_id.clone();
    let conversation_id = req.conversation_id.clone();
    let reply = match Turn::try_from(req) {
        Ok(turn) => respond(state.dispatcher.as_ref(), state.telemetry.as_ref(), &turn).await,
        Err(e) => {
            report_failure(state.telemetry.as_ref(), &e, &channel_id, &conversation_id);
            APOLOGY.to_string()
        }
    };
    Json(TurnResponse { reply })
}

/// POST /telegram/webhook — receives Telegram update JSON; verifies optional secret, queues the turn.
async fn telegram_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(ref expected) = state.config.channels.telegram.webhook_secret {
        let provided = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            return StatusCode::FORBIDDEN;
        }
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    let Some(turn) = update.into_turn(TelegramChannel::ID) else {
        return StatusCode::OK;
    };
    if state.inbound_tx.send(turn).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let channels = state.channel_registry.ids().await;
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
        "channels": channels,
    }))
}
