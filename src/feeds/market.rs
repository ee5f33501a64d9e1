use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use futures::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::feeds::messages::{parse_levels, BookData, WsEnvelope};
use crate::logger::{EventKind, EventLog};
use crate::state::{MarketSnapshot, SharedState};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Primary is the trading venue's own stream; Secondary is an alternate
/// venue used as data source when configured (`MMX_PRIMARY_FEED=SECONDARY`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedRole {
    Primary,
    Secondary,
}

/// Public market data feed: Disconnected -> Connecting -> Subscribed ->
/// Streaming, back to Connecting on any error, with capped backoff.
pub struct MarketDataFeed {
    settings: Arc<Settings>,
    state: Arc<SharedState>,
    log: EventLog,
    role: FeedRole,
}

impl MarketDataFeed {
    pub fn new(
        settings: Arc<Settings>,
        state: Arc<SharedState>,
        log: EventLog,
        role: FeedRole,
    ) -> Self {
        Self {
            settings,
            state,
            log,
            role,
        }
    }

    fn url(&self) -> &str {
        match self.role {
            FeedRole::Primary => &self.settings.ws_public_url,
            FeedRole::Secondary => &self.settings.ws_secondary_url,
        }
    }

    /// Only the configured data source writes the snapshot other components
    /// quote from; the other feed just reports connectivity.
    fn is_data_source(&self) -> bool {
        match self.role {
            FeedRole::Primary => !self.settings.secondary_required(),
            FeedRole::Secondary => self.settings.secondary_required(),
        }
    }

    fn set_connected(&self, connected: bool) {
        match self.role {
            FeedRole::Primary => self.state.set_market_connected(connected),
            FeedRole::Secondary => self.state.set_secondary_connected(connected),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Duration::from_secs(1);
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.session(&mut shutdown).await {
                Ok(()) => break, // shutdown requested mid-session
                Err(e) => {
                    self.set_connected(false);
                    warn!(role = ?self.role, error = %e, "market feed disconnected, reconnecting");
                    self.log.publish(
                        EventKind::ApiError,
                        format!("market feed ({:?}): {e}", self.role),
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
        self.set_connected(false);
    }

    async fn session(&self, shutdown: &mut watch::Receiver<bool>) -> anyhow::Result<()> {
        let (ws, _) = connect_async(self.url())
            .await
            .context("market ws connect")?;
        let (mut write, mut read) = ws.split();

        let subscribe = serde_json::json!({
            "op": "subscribe",
            "args": [format!("orderbook.50.{}", self.settings.symbol)],
        });
        write
            .send(Message::Text(subscribe.to_string()))
            .await
            .context("market ws subscribe")?;

        info!(role = ?self.role, symbol = %self.settings.symbol, "market feed streaming");
        self.set_connected(true);

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await; // first tick fires immediately

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
                        .context("market ws heartbeat")?;
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text),
                        Some(Ok(Message::Ping(payload))) => {
                            write.send(Message::Pong(payload)).await.context("market ws pong")?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(anyhow!("stream closed by venue"));
                        }
                        Some(Ok(_)) => {} // binary/pong frames ignored
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        let envelope: WsEnvelope = match serde_json::from_str(text) {
            Ok(env) => env,
            Err(e) => {
                debug!(error = %e, "unparseable market frame, ignoring");
                return;
            }
        };

        if let Some(success) = envelope.success {
            if !success {
                self.log.publish(
                    EventKind::ApiError,
                    format!("market subscribe refused: {text}"),
                );
            }
            return;
        }

        let Some(topic) = envelope.topic.as_deref() else { return };
        if !topic.starts_with("orderbook.") {
            return; // unknown topics are forward-compatible noise
        }
        let Some(data) = envelope.data else { return };
        let book: BookData = match serde_json::from_value(data) {
            Ok(b) => b,
            Err(e) => {
                debug!(error = %e, "malformed book payload, ignoring");
                return;
            }
        };
        if book.s != self.settings.symbol {
            return;
        }
        if !self.is_data_source() {
            return;
        }

        let bids = parse_levels(&book.b);
        let asks = parse_levels(&book.a);
        let is_snapshot = envelope.msg_type.as_deref() == Some("snapshot");
        let ts_ms = envelope.ts.unwrap_or(0);

        // book + snapshot commit under one lock acquisition
        let mut market = self.state.market.write();
        if is_snapshot {
            market.book.apply_snapshot(&bids, &asks);
        } else {
            market.book.apply_delta(&bids, &asks);
        }
        if let (Some((bid, _)), Some((ask, _))) = market.book.bbo() {
            market.snapshot = Some(MarketSnapshot::from_bba(bid, ask, ts_ms));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Arc<Settings> {
        Arc::new(Settings::for_tests())
    }

    fn feed(settings: Arc<Settings>, state: Arc<SharedState>) -> MarketDataFeed {
        let log = EventLog::spawn(settings.log_path.clone(), 1 << 20, 1);
        MarketDataFeed::new(settings, state, log, FeedRole::Primary)
    }

    #[tokio::test]
    async fn test_snapshot_frame_updates_state() {
        let settings = settings();
        let state = Arc::new(SharedState::new(settings.tick_size));
        let feed = feed(settings, state.clone());

        feed.handle_text(
            r#"{"topic":"orderbook.50.BTCUSDT","type":"snapshot","ts":7,
                "data":{"s":"BTCUSDT","b":[["99.9","2"]],"a":[["100.1","1"]]}}"#,
        );

        let snap = state.snapshot().unwrap();
        assert_eq!(snap.best_bid, 99.9);
        assert_eq!(snap.best_ask, 100.1);
        assert_eq!(snap.ts_ms, 7);
    }

    #[tokio::test]
    async fn test_foreign_symbol_discarded() {
        let settings = settings();
        let state = Arc::new(SharedState::new(settings.tick_size));
        let feed = feed(settings, state.clone());

        feed.handle_text(
            r#"{"topic":"orderbook.50.ETHUSDT","type":"snapshot","ts":7,
                "data":{"s":"ETHUSDT","b":[["99.9","2"]],"a":[["100.1","1"]]}}"#,
        );
        assert!(state.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_delta_after_snapshot() {
        let settings = settings();
        let state = Arc::new(SharedState::new(settings.tick_size));
        let feed = feed(settings, state.clone());

        feed.handle_text(
            r#"{"topic":"orderbook.50.BTCUSDT","type":"snapshot","ts":1,
                "data":{"s":"BTCUSDT","b":[["99.9","2"]],"a":[["100.1","1"]]}}"#,
        );
        feed.handle_text(
            r#"{"topic":"orderbook.50.BTCUSDT","type":"delta","ts":2,
                "data":{"s":"BTCUSDT","b":[["99.9","0"],["99.8","4"]],"a":[]}}"#,
        );

        let snap = state.snapshot().unwrap();
        assert_eq!(snap.best_bid, 99.8);
        assert_eq!(snap.ts_ms, 2);
    }
}
