use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context};
use futures::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::feeds::messages::{parse_num, ExecutionData, OrderData, PositionData, WsEnvelope};
use crate::logger::{EventKind, EventLog};
use crate::state::order::{OrderStatus, Side};
use crate::state::SharedState;

type HmacSha256 = Hmac<Sha256>;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const AUTH_WINDOW_MS: u64 = 10_000;

/// Authenticated stream carrying execution, order, and position updates.
/// Sole writer of `Position`; merges venue-driven order transitions (fills,
/// cancels-by-match, rejections) into the local order store.
pub struct PrivateDataFeed {
    settings: Arc<Settings>,
    state: Arc<SharedState>,
    log: EventLog,
}

impl PrivateDataFeed {
    pub fn new(settings: Arc<Settings>, state: Arc<SharedState>, log: EventLog) -> Self {
        Self {
            settings,
            state,
            log,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Duration::from_secs(1);
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.session(&mut shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    self.state.set_private_connected(false);
                    warn!(error = %e, "private feed disconnected, reconnecting");
                    self.log
                        .publish(EventKind::ApiError, format!("private feed: {e}"));
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
        self.state.set_private_connected(false);
    }

    fn auth_request(&self) -> anyhow::Result<String> {
        let expires = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("clock before epoch")?
            .as_millis() as u64
            + AUTH_WINDOW_MS;
        let mut mac = HmacSha256::new_from_slice(self.settings.api_secret.as_bytes())
            .map_err(|e| anyhow!("bad api secret: {e}"))?;
        mac.update(format!("GET/realtime{expires}").as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(serde_json::json!({
            "op": "auth",
            "args": [self.settings.api_key, expires, signature],
        })
        .to_string())
    }

    async fn session(&self, shutdown: &mut watch::Receiver<bool>) -> anyhow::Result<()> {
        let (ws, _) = connect_async(&self.settings.ws_private_url)
            .await
            .context("private ws connect")?;
        let (mut write, mut read) = ws.split();

        write
            .send(Message::Text(self.auth_request()?))
            .await
            .context("private ws auth")?;
        let subscribe = serde_json::json!({
            "op": "subscribe",
            "args": ["execution", "order", "position"],
        });
        write
            .send(Message::Text(subscribe.to_string()))
            .await
            .context("private ws subscribe")?;

        info!(symbol = %self.settings.symbol, "private feed streaming");
        self.state.set_private_connected(true);

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
                _ = heartbeat.tick() => {
                    write
                        .send(Message::Text(r#"{"op":"ping"}"#.to_string()))
                        .await
                        .context("private ws heartbeat")?;
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text)?,
                        Some(Ok(Message::Ping(payload))) => {
                            write.send(Message::Pong(payload)).await.context("private ws pong")?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(anyhow!("stream closed by venue"));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) -> anyhow::Result<()> {
        let envelope: WsEnvelope = match serde_json::from_str(text) {
            Ok(env) => env,
            Err(e) => {
                debug!(error = %e, "unparseable private frame, ignoring");
                return Ok(());
            }
        };

        if let Some(success) = envelope.success {
            if !success {
                // failed auth will never recover by itself
                self.log
                    .publish(EventKind::ApiError, format!("private op refused: {text}"));
                if envelope.op.as_deref() == Some("auth") {
                    return Err(anyhow!("venue refused websocket auth"));
                }
            }
            return Ok(());
        }

        let (Some(topic), Some(data)) = (envelope.topic.as_deref(), envelope.data) else {
            return Ok(());
        };
        match topic {
            "execution" => {
                if let Ok(entries) = serde_json::from_value::<Vec<ExecutionData>>(data) {
                    for exec in entries {
                        self.on_execution(&exec);
                    }
                }
            }
            "order" => {
                if let Ok(entries) = serde_json::from_value::<Vec<OrderData>>(data) {
                    for order in entries {
                        self.on_order(&order);
                    }
                }
            }
            "position" => {
                if let Ok(entries) = serde_json::from_value::<Vec<PositionData>>(data) {
                    for position in entries {
                        self.on_position(&position);
                    }
                }
            }
            _ => {} // unknown topics ignored
        }
        Ok(())
    }

    pub(crate) fn on_execution(&self, exec: &ExecutionData) {
        if exec.symbol != self.settings.symbol {
            return;
        }
        match exec.exec_type.as_str() {
            "Trade" => {
                let (Some(price), Some(qty), Some(side)) = (
                    parse_num(&exec.exec_price),
                    parse_num(&exec.exec_qty),
                    Side::from_wire(&exec.side),
                ) else {
                    warn!(order_id = %exec.order_id, "malformed trade execution, skipping");
                    return;
                };

                self.state.position.write().apply_fill(side, price, qty);

                let mut orders = self.state.orders.write();
                if let Some(id) = orders.resolve(&exec.order_id, &exec.order_link_id) {
                    let fully_filled = orders
                        .get_mut(&id)
                        .map_or(false, |o| qty + 1e-12 >= o.qty);
                    if fully_filled {
                        orders.remove(&id);
                    } else if let Some(order) = orders.get_mut(&id) {
                        order.qty -= qty; // partial fill shrinks the resting size
                    }
                }

                self.log.publish(
                    EventKind::Fill,
                    format!(
                        "order {} {} {} @ {}",
                        exec.order_id,
                        exec.side,
                        exec.exec_qty,
                        exec.exec_price
                    ),
                );
            }
            "Rejected" => {
                let mut orders = self.state.orders.write();
                if let Some(id) = orders.resolve(&exec.order_id, &exec.order_link_id) {
                    if let Some(order) = orders.get_mut(&id) {
                        order.status = OrderStatus::Rejected;
                    }
                    orders.remove(&id);
                }
                self.log.publish(
                    EventKind::Rejection,
                    format!(
                        "order {}: {}",
                        exec.order_id,
                        exec.reject_reason.as_deref().unwrap_or("Unknown")
                    ),
                );
            }
            _ => {} // funding, settlements etc. are not ours to track
        }
    }

    pub(crate) fn on_order(&self, update: &OrderData) {
        if update.symbol != self.settings.symbol {
            return;
        }
        // The venue is authoritative for terminal transitions it initiated
        // (cancel-by-match, expiry). Fills and rejections already arrive on
        // the execution topic, so only cancellation is merged here.
        if matches!(update.order_status.as_str(), "Cancelled" | "Deactivated") {
            let mut orders = self.state.orders.write();
            if let Some(id) = orders.resolve(&update.order_id, &update.order_link_id) {
                orders.remove(&id);
                debug!(order_id = %update.order_id, "venue-side cancel merged");
            }
        }
    }

    pub(crate) fn on_position(&self, update: &PositionData) {
        if update.symbol != self.settings.symbol {
            return;
        }
        let Some(size) = parse_num(&update.size) else { return };
        let net_qty = match update.side.as_str() {
            "Sell" => -size,
            _ => size,
        };
        let entry_price = parse_num(&update.avg_price).unwrap_or(0.0);
        let mut position = self.state.position.write();
        position.net_qty = net_qty;
        position.entry_price = entry_price;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::order::Order;

    fn feed() -> (PrivateDataFeed, Arc<SharedState>) {
        let settings = Arc::new(Settings::for_tests());
        let state = Arc::new(SharedState::new(settings.tick_size));
        let log = EventLog::spawn(settings.log_path.clone(), 1 << 20, 1);
        (
            PrivateDataFeed::new(settings, state.clone(), log),
            state,
        )
    }

    fn open_order(state: &SharedState, side: Side, price: f64, qty: f64, xid: &str) -> String {
        let mut order = Order::pending_create(side, price, qty);
        order.mark_open();
        order.exchange_order_id = Some(xid.to_string());
        let id = order.client_order_id.clone();
        state.orders.write().insert(order);
        id
    }

    fn exec(xid: &str, exec_type: &str, side: &str, price: &str, qty: &str) -> ExecutionData {
        ExecutionData {
            symbol: "BTCUSDT".into(),
            order_id: xid.into(),
            order_link_id: String::new(),
            exec_type: exec_type.into(),
            side: side.into(),
            exec_price: price.into(),
            exec_qty: qty.into(),
            reject_reason: None,
        }
    }

    #[tokio::test]
    async fn test_full_fill_updates_position_and_removes_order() {
        let (feed, state) = feed();
        open_order(&state, Side::Buy, 100.0, 1.0, "x1");

        feed.on_execution(&exec("x1", "Trade", "Buy", "100.0", "1.0"));

        assert_eq!(state.position().net_qty, 1.0);
        assert_eq!(state.position().entry_price, 100.0);
        assert!(state.orders.read().is_empty());
    }

    #[tokio::test]
    async fn test_partial_fill_shrinks_order() {
        let (feed, state) = feed();
        let id = open_order(&state, Side::Buy, 100.0, 2.0, "x1");

        feed.on_execution(&exec("x1", "Trade", "Buy", "100.0", "0.5"));

        let mut orders = state.orders.write();
        let order = orders.get_mut(&id).unwrap();
        assert!((order.qty - 1.5).abs() < 1e-9);
        assert_eq!(order.status, OrderStatus::Open);
    }

    #[tokio::test]
    async fn test_rejection_removes_order() {
        let (feed, state) = feed();
        open_order(&state, Side::Sell, 101.0, 1.0, "x2");

        let mut e = exec("x2", "Rejected", "Sell", "", "");
        e.reject_reason = Some("PostOnlyWillTake".into());
        feed.on_execution(&e);

        assert!(state.orders.read().is_empty());
        assert_eq!(state.position().net_qty, 0.0);
    }

    #[tokio::test]
    async fn test_foreign_symbol_and_unknown_exec_type_ignored() {
        let (feed, state) = feed();
        open_order(&state, Side::Buy, 100.0, 1.0, "x1");

        let mut foreign = exec("x1", "Trade", "Buy", "100.0", "1.0");
        foreign.symbol = "ETHUSDT".into();
        feed.on_execution(&foreign);
        feed.on_execution(&exec("x1", "Funding", "Buy", "100.0", "1.0"));

        assert_eq!(state.orders.read().len(), 1);
        assert_eq!(state.position().net_qty, 0.0);
    }

    #[tokio::test]
    async fn test_venue_cancel_merged_from_order_topic() {
        let (feed, state) = feed();
        open_order(&state, Side::Buy, 100.0, 1.0, "x3");

        feed.on_order(&OrderData {
            symbol: "BTCUSDT".into(),
            order_id: "x3".into(),
            order_link_id: String::new(),
            order_status: "Cancelled".into(),
        });

        assert!(state.orders.read().is_empty());
    }

    #[tokio::test]
    async fn test_position_resync() {
        let (feed, state) = feed();
        feed.on_position(&PositionData {
            symbol: "BTCUSDT".into(),
            side: "Sell".into(),
            size: "0.7".into(),
            avg_price: "99.5".into(),
        });
        assert_eq!(state.position().net_qty, -0.7);
        assert_eq!(state.position().entry_price, 99.5);
    }
}
