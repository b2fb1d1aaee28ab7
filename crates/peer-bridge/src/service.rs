//! Bridge service: wires the components together and owns the background
//! tasks.
//!
//! Startup order: bind the peer listener, start the registry sweep,
//! optionally wait for the first peer, then serve the host stream until it
//! ends.

use crate::dispatch::RequestDispatcher;
use crate::domain::config::BridgeConfig;
use crate::domain::error::BridgeError;
use crate::domain::pending::{cleanup_task, RoundTripRegistry};
use crate::host::{HostFrame, HostOutbox, HostServer};
use crate::upstream::UpstreamAdapter;
use crate::ws::{ConnectionManager, PeerSocketHandler};
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Bridge service state
pub struct BridgeService {
    config: BridgeConfig,
    registry: Arc<RoundTripRegistry>,
    connections: Arc<ConnectionManager>,
    adapter: Arc<UpstreamAdapter>,
    outbox: HostOutbox,
    frames: mpsc::UnboundedReceiver<HostFrame>,
    peer_addr: Option<SocketAddr>,
    tasks: BackgroundTasks,
}

/// Background tasks, aborted when dropped
#[derive(Default)]
struct BackgroundTasks(Vec<JoinHandle<()>>);

impl BackgroundTasks {
    fn push(&mut self, task: JoinHandle<()>) {
        self.0.push(task);
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

impl BridgeService {
    /// Create a new bridge service
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;

        let registry = Arc::new(RoundTripRegistry::new());
        let (outbox, frames) = HostOutbox::channel();

        let connections = Arc::new(ConnectionManager::new(
            Arc::clone(&registry),
            Arc::new(outbox.clone()),
        ));

        let dispatcher = Arc::new(RequestDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&connections),
            config.timeouts.round_trip,
        ));

        let adapter = Arc::new(UpstreamAdapter::new(
            dispatcher,
            Arc::clone(&connections),
        ));

        Ok(Self {
            config,
            registry,
            connections,
            adapter,
            outbox,
            frames,
            peer_addr: None,
            tasks: BackgroundTasks::default(),
        })
    }

    /// Bind the peer listener and start background tasks.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when port 0 was requested. Calling it again is a no-op.
    pub async fn start(&mut self) -> Result<SocketAddr, BridgeError> {
        if let Some(addr) = self.peer_addr {
            return Ok(addr);
        }

        let bind_addr = self.config.peer_addr();
        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .map_err(|e| BridgeError::Bind(format!("{}: {}", bind_addr, e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| BridgeError::Bind(format!("{}: {}", bind_addr, e)))?;

        let router = self.peer_router();
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "Peer listener stopped");
            }
        }));

        self.start_cleanup_task();
        self.peer_addr = Some(addr);

        info!(addr = %addr, "Waiting for peer on ws://{}/", addr);
        Ok(addr)
    }

    /// Serve the host stream until it ends.
    ///
    /// Starts the peer listener first if [`BridgeService::start`] was not
    /// called. With `wait_for_peer` set, holds the host back until a peer
    /// attaches or the connection wait runs out; on timeout it carries on
    /// answering with fallbacks.
    pub async fn run<R, W>(mut self, reader: R, writer: W) -> Result<(), BridgeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.start().await?;

        if self.config.wait_for_peer {
            let timeout = self.config.timeouts.connection_wait;
            info!(timeout_ms = timeout.as_millis() as u64, "Waiting for first peer");
            if let Err(e) = self.connections.wait_for_attachment(timeout).await {
                warn!(error = %e, "Continuing without a peer, requests get fallback answers");
            }
        }

        let BridgeService {
            adapter,
            outbox,
            frames,
            tasks,
            ..
        } = self;

        let result = HostServer::new(adapter, outbox, frames)
            .run(reader, writer)
            .await;

        drop(tasks);
        info!("Bridge stopped");
        result
    }

    /// Router for the peer listener: WebSocket upgrade on `/`, status on
    /// `/health`.
    pub fn peer_router(&self) -> Router {
        let state = PeerState {
            connections: Arc::clone(&self.connections),
            registry: Arc::clone(&self.registry),
            max_message_size: self.config.peer.max_message_size,
        };

        Router::new()
            .route("/", get(peer_upgrade))
            .route("/health", get(health_check))
            .with_state(state)
    }

    fn start_cleanup_task(&mut self) {
        // Safety net only; the dispatcher's own timeout removes entries first
        let registry = Arc::clone(&self.registry);
        let interval = self.config.timeouts.sweep_interval;
        let max_age = self.config.timeouts.round_trip * 2;
        self.tasks.push(tokio::spawn(async move {
            cleanup_task(registry, interval, max_age).await;
        }));
    }

    /// Bound peer listener address, once started
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn registry(&self) -> Arc<RoundTripRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn connections(&self) -> Arc<ConnectionManager> {
        Arc::clone(&self.connections)
    }
}

/// Peer listener state
#[derive(Clone)]
struct PeerState {
    connections: Arc<ConnectionManager>,
    registry: Arc<RoundTripRegistry>,
    max_message_size: usize,
}

async fn peer_upgrade(ws: WebSocketUpgrade, State(state): State<PeerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let handler =
            PeerSocketHandler::with_max_message_size(state.connections, state.max_message_size);
        handler.handle(socket).await;
    })
}

/// Health check endpoint
async fn health_check(State(state): State<PeerState>) -> impl IntoResponse {
    let status = state.connections.status();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "attached": status.attached,
        "peer_id": status.peer_id,
        "attached_at": status.attached_at,
        "pending": state.registry.pending_count(),
        "stats": state.registry.stats().snapshot(),
    }))
}
