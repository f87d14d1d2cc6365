//! WebSocket stream of published products and finished passes.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use modis_runner_core::{FailureKind, PassId, PassReport, Platform, ProductNotification};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS, WS_MESSAGES_SENT};
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket message sent to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// A product file was announced downstream.
    ProductPublished { notification: ProductNotification },
    /// A pass reached a terminal status.
    PassFinished {
        pass_id: PassId,
        platform: Platform,
        /// Terminal status ("succeeded", "failed", "aborted", "abandoned")
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        failure: Option<FailureKind>,
        stages_succeeded: u32,
        duration_ms: u64,
    },
    /// Sent periodically to keep idle connections open.
    Heartbeat { timestamp: i64 },
}

impl WsMessage {
    fn kind(&self) -> &'static str {
        match self {
            WsMessage::ProductPublished { .. } => "product_published",
            WsMessage::PassFinished { .. } => "pass_finished",
            WsMessage::Heartbeat { .. } => "heartbeat",
        }
    }
}

impl From<&PassReport> for WsMessage {
    fn from(report: &PassReport) -> Self {
        WsMessage::PassFinished {
            pass_id: report.pass_id.clone(),
            platform: report.platform,
            status: report.status.status_type().to_string(),
            failure: report.failure,
            stages_succeeded: report.stages_succeeded(),
            duration_ms: report.duration_ms(),
        }
    }
}

/// Fan-out of [`WsMessage`]s to every connected client.
#[derive(Debug, Clone)]
pub struct WsBroadcaster {
    sender: broadcast::Sender<WsMessage>,
}

impl WsBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn broadcast(&self, msg: WsMessage) {
        // No receivers just means no client is connected
        let _ = self.sender.send(msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsMessage> {
        self.sender.subscribe()
    }

    pub fn product_published(&self, notification: ProductNotification) {
        self.broadcast(WsMessage::ProductPublished { notification });
    }

    pub fn pass_finished(&self, report: &PassReport) {
        self.broadcast(WsMessage::from(report));
    }
}

impl Default for WsBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Forwards product notifications and pass reports to the broadcaster until
/// shutdown, with a heartbeat in between.
pub fn spawn_forwarder(
    broadcaster: WsBroadcaster,
    mut products: broadcast::Receiver<ProductNotification>,
    mut reports: broadcast::Receiver<PassReport>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                result = products.recv() => match result {
                    Ok(notification) => broadcaster.product_published(notification),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket forwarder skipped {} product notifications", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                result = reports.recv() => match result {
                    Ok(report) => broadcaster.pass_finished(&report),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket forwarder skipped {} pass reports", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = heartbeat.tick() => {
                    broadcaster.broadcast(WsMessage::Heartbeat {
                        timestamp: chrono::Utc::now().timestamp(),
                    });
                }
            }
        }
        debug!("WebSocket forwarder stopped");
    })
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.ws_broadcaster().subscribe();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();
    info!("WebSocket client connected");

    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    WS_MESSAGES_SENT.with_label_values(&[msg.kind()]).inc();
                    match serde_json::to_string(&msg) {
                        Ok(json) => {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                debug!("WebSocket send failed, client disconnected");
                                break;
                            }
                        }
                        Err(e) => error!("Failed to serialize WsMessage: {}", e),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("WebSocket client lagged, skipped {} messages", n);
                    WS_LAG_EVENTS.inc();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Broadcast channel closed");
                    break;
                }
            }
        }
    });

    // Clients only ever close; anything else is ignored.
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use modis_runner_core::PassStatus;
    use std::collections::BTreeMap;

    fn report(status: PassStatus) -> PassReport {
        let t = chrono::Utc.with_ymd_and_hms(2024, 12, 21, 1, 1, 0).unwrap();
        PassReport {
            pass_id: PassId::from("terra_202412210101"),
            platform: Platform::Terra,
            start_time: t,
            orbit_number: None,
            status,
            failure: None,
            stages: Vec::new(),
            artifacts: BTreeMap::new(),
            created_at: t,
            last_updated_at: t,
            finished_at: t + chrono::Duration::seconds(90),
        }
    }

    #[test]
    fn test_pass_finished_message_shape() {
        let msg = WsMessage::from(&report(PassStatus::Succeeded));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "pass_finished");
        assert_eq!(json["pass_id"], "terra_202412210101");
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["duration_ms"], 90_000);
        assert!(json.get("failure").is_none());
    }

    #[tokio::test]
    async fn test_forwarder_relays_reports() {
        let broadcaster = WsBroadcaster::new(16);
        let mut client = broadcaster.subscribe();
        let (_product_tx, product_rx) = broadcast::channel::<ProductNotification>(4);
        let (report_tx, report_rx) = broadcast::channel::<PassReport>(4);
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

        let task = spawn_forwarder(broadcaster.clone(), product_rx, report_rx, shutdown_rx);
        report_tx.send(report(PassStatus::Abandoned)).unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), client.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.kind(), "pass_finished");

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
