//! Line-delimited JSON-RPC server on the host stream.
//!
//! One JSON message per line in, one per line out. Forwarded operations run
//! on their own task so a slow peer never blocks unrelated requests; every
//! outgoing frame goes through a single writer task.

use crate::domain::error::{ApiError, BridgeError};
use crate::domain::operations::{Capability, PeerOperation};
use crate::host::protocol::{
    initialize_result, JsonRpcId, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};
use crate::ports::HostNotifier;
use crate::upstream::UpstreamAdapter;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{self, AbortHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Frame queued for the host writer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HostFrame {
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

/// Sending half of the host frame queue.
///
/// Also the [`HostNotifier`] handed to the connection manager, so
/// list-changed notifications share the writer with responses.
#[derive(Debug, Clone)]
pub struct HostOutbox {
    frames: mpsc::UnboundedSender<HostFrame>,
}

impl HostOutbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostFrame>) {
        let (frames, rx) = mpsc::unbounded_channel();
        (Self { frames }, rx)
    }

    pub fn send(&self, frame: HostFrame) {
        if self.frames.send(frame).is_err() {
            debug!("Host writer gone, dropping frame");
        }
    }
}

impl HostNotifier for HostOutbox {
    fn list_changed(&self, capability: Capability) {
        debug!(method = capability.list_changed_method(), "Notifying host");
        self.send(HostFrame::Notification(JsonRpcNotification::list_changed(capability)));
    }
}

/// `notifications/cancelled` parameters
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelledParams {
    request_id: JsonRpcId,
}

/// JSON-RPC server over an async reader/writer pair.
pub struct HostServer {
    adapter: Arc<UpstreamAdapter>,
    outbox: HostOutbox,
    frames: mpsc::UnboundedReceiver<HostFrame>,
}

impl HostServer {
    pub fn new(
        adapter: Arc<UpstreamAdapter>,
        outbox: HostOutbox,
        frames: mpsc::UnboundedReceiver<HostFrame>,
    ) -> Self {
        Self {
            adapter,
            outbox,
            frames,
        }
    }

    /// Serve requests from `reader` until it reaches end of input.
    ///
    /// Requests still in flight when input ends are allowed to finish and
    /// their responses are written before this returns.
    pub async fn run<R, W>(self, reader: R, writer: W) -> Result<(), BridgeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let HostServer {
            adapter,
            outbox,
            frames,
        } = self;

        let (stop_tx, stop_rx) = oneshot::channel();
        let writer_task = tokio::spawn(write_frames(writer, frames, stop_rx));

        let mut lines = BufReader::new(reader).lines();
        let mut in_flight: JoinSet<JsonRpcId> = JoinSet::new();
        let mut handles: HashMap<JsonRpcId, AbortHandle> = HashMap::new();

        info!("Host server started");

        let read_result = loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => break Ok(()),
                        Err(e) => break Err(BridgeError::HostIo(e)),
                    };
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    handle_line(line, &adapter, &outbox, &mut in_flight, &mut handles);
                }
                Some(joined) = in_flight.join_next_with_id(), if !in_flight.is_empty() => {
                    reap(joined, &mut handles);
                }
            }
        };

        if !in_flight.is_empty() {
            debug!(in_flight = in_flight.len(), "Host input ended, finishing in-flight requests");
        }
        while let Some(joined) = in_flight.join_next_with_id().await {
            reap(joined, &mut handles);
        }

        let _ = stop_tx.send(());
        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, "Host writer failed");
                return Err(BridgeError::HostIo(e));
            }
            Err(e) => return Err(BridgeError::Internal(format!("host writer task failed: {}", e))),
        }

        info!("Host server stopped");
        read_result
    }
}

/// Forget a finished task's abort handle, unless its id was already reused.
fn reap(
    joined: Result<(task::Id, JsonRpcId), task::JoinError>,
    handles: &mut HashMap<JsonRpcId, AbortHandle>,
) {
    match joined {
        Ok((task_id, id)) => {
            if handles.get(&id).is_some_and(|handle| handle.id() == task_id) {
                handles.remove(&id);
            }
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => error!(error = %e, "Request task panicked"),
    }
}

/// Parse one line and either answer it inline or spawn it.
fn handle_line(
    line: &str,
    adapter: &Arc<UpstreamAdapter>,
    outbox: &HostOutbox,
    in_flight: &mut JoinSet<JsonRpcId>,
    handles: &mut HashMap<JsonRpcId, AbortHandle>,
) {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Failed to parse host message");
            outbox.send(HostFrame::Response(JsonRpcResponse::error(
                None,
                ApiError::parse_error(e.to_string()),
            )));
            return;
        }
    };

    let request = match parse_request(value) {
        Ok(request) => request,
        Err((id, e)) => {
            warn!(error = %e, "Invalid host request");
            outbox.send(HostFrame::Response(JsonRpcResponse::error(id, e)));
            return;
        }
    };

    debug!(method = %request.method, id = ?request.id, "Host request received");

    if let Some(operation) = PeerOperation::from_host_method(&request.method) {
        let Some(id) = request.id else {
            debug!(method = %request.method, "Ignoring forwarded method sent as notification");
            return;
        };

        if handles.get(&id).is_some_and(|handle| !handle.is_finished()) {
            warn!(id = %id, "Rejecting request, id already in flight");
            let error = ApiError::invalid_request(format!("id {} is already in flight", id));
            outbox.send(HostFrame::Response(JsonRpcResponse::error(Some(id), error)));
            return;
        }

        let params = request.params;
        let adapter = Arc::clone(adapter);
        let outbox = outbox.clone();
        let task_id = id.clone();
        let handle = in_flight.spawn(async move {
            let started = Instant::now();
            let result = adapter.handle(operation, params).await;
            let response = JsonRpcResponse::from_result(Some(task_id.clone()), result);

            if response.is_error() {
                warn!(
                    method = operation.host_method(),
                    id = %task_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Host request completed with error"
                );
            } else {
                info!(
                    method = operation.host_method(),
                    id = %task_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Host request completed"
                );
            }

            outbox.send(HostFrame::Response(response));
            task_id
        });
        handles.insert(id, handle);
        return;
    }

    let result = match request.method.as_str() {
        "initialize" => {
            info!(
                client = ?request.params.get("clientInfo"),
                protocol_version = ?request.params.get("protocolVersion"),
                "Host initializing"
            );
            Ok(initialize_result(&request.params))
        }
        "notifications/initialized" | "initialized" => {
            info!("Host initialized");
            Ok(json!({}))
        }
        "notifications/cancelled" => {
            cancel(&request.params, handles);
            Ok(json!({}))
        }
        "ping" => Ok(json!({})),
        method => Err(ApiError::method_not_found(method)),
    };

    match request.id {
        Some(id) => outbox.send(HostFrame::Response(JsonRpcResponse::from_result(Some(id), result))),
        None => {
            if let Err(e) = result {
                debug!(method = %request.method, error = %e, "Ignoring unknown host notification");
            }
        }
    }
}

/// Validate the envelope; on failure returns the id to answer with (if any).
fn parse_request(value: Value) -> Result<JsonRpcRequest, (Option<JsonRpcId>, ApiError)> {
    let raw_id = value
        .get("id")
        .and_then(|id| serde_json::from_value::<JsonRpcId>(id.clone()).ok());

    let request: JsonRpcRequest = serde_json::from_value(value)
        .map_err(|e| (raw_id.clone(), ApiError::invalid_request(e.to_string())))?;

    if request.jsonrpc != "2.0" {
        return Err((
            raw_id,
            ApiError::invalid_request(format!("unsupported jsonrpc version '{}'", request.jsonrpc)),
        ));
    }
    if let Some(id) = &request.id {
        id.validate()
            .map_err(|reason| (None, ApiError::invalid_request(reason)))?;
    }
    Ok(request)
}

/// Abort the task serving the cancelled request; no response is sent for it.
fn cancel(params: &Value, handles: &mut HashMap<JsonRpcId, AbortHandle>) {
    let Ok(CancelledParams { request_id }) = CancelledParams::deserialize(params) else {
        debug!("Ignoring malformed cancellation");
        return;
    };

    match handles.remove(&request_id) {
        Some(handle) => {
            info!(id = %request_id, "Host cancelled request");
            handle.abort();
        }
        None => debug!(id = %request_id, "Cancellation for unknown or finished request"),
    }
}

/// Write queued frames until told to stop, then drain what is left.
async fn write_frames<W>(
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<HostFrame>,
    mut stop: oneshot::Receiver<()>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            frame = frames.recv() => match frame {
                Some(frame) => write_frame(&mut writer, &frame).await?,
                None => break,
            },
            _ = &mut stop => {
                while let Ok(frame) = frames.try_recv() {
                    write_frame(&mut writer, &frame).await?;
                }
                break;
            }
        }
    }
    writer.flush().await
}

async fn write_frame<W>(writer: &mut W, frame: &HostFrame) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = match serde_json::to_string(frame) {
        Ok(line) => line,
        Err(e) => {
            error!(error = %e, "Failed to encode host frame");
            return Ok(());
        }
    };
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
