// Quoting loop: waits for the feeds to come up, then once per tick turns
// the current market snapshot and position into a quote ladder and hands
// it to the reconciler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::Settings;
use crate::gateway::VenueApi;
use crate::oms::{Oms, Quote};
use crate::state::order::Side;
use crate::state::{MarketSnapshot, Position, SharedState};

/// Rounds down to a multiple of `step`. Bid prices and quantities use this
/// so a quote never rounds onto the wrong side of the grid.
pub fn floor_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).floor() * step
}

/// Rounds up to a multiple of `step`, for ask prices.
pub fn ceil_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).ceil() * step
}

/// Turns market state into a desired quote set plus the spread it was
/// computed with (carried into the reconcile report for logging).
pub trait QuoteSource: Send {
    fn quotes(&self, snapshot: &MarketSnapshot, position: &Position) -> (Vec<Quote>, f64);
}

/// Symmetric ladder around mid, widened per level, with hard inventory
/// gates: at or beyond the limit the growing side goes dark and only
/// reducing quotes rest.
pub struct SpreadQuoter {
    tick_size: f64,
    lot_size: f64,
    base_spread_bps: f64,
    order_qty: f64,
    quote_levels: usize,
    inventory_limit: f64,
}

impl SpreadQuoter {
    pub fn new(settings: &Settings) -> Self {
        Self {
            tick_size: settings.tick_size,
            lot_size: settings.lot_size,
            base_spread_bps: settings.base_spread_bps,
            order_qty: settings.order_qty,
            quote_levels: settings.quote_levels,
            inventory_limit: settings.inventory_limit,
        }
    }
}

impl QuoteSource for SpreadQuoter {
    fn quotes(&self, snapshot: &MarketSnapshot, position: &Position) -> (Vec<Quote>, f64) {
        let half = snapshot.mid * self.base_spread_bps / 10_000.0;
        let qty = floor_step(self.order_qty, self.lot_size);
        if qty <= 0.0 {
            return (Vec::new(), half * 2.0);
        }

        let allow_buys = position.net_qty < self.inventory_limit;
        let allow_sells = position.net_qty > -self.inventory_limit;

        let mut quotes = Vec::with_capacity(self.quote_levels * 2);
        for level in 1..=self.quote_levels {
            let offset = half * level as f64;
            if allow_buys {
                quotes.push(Quote {
                    side: Side::Buy,
                    price: floor_step(snapshot.mid - offset, self.tick_size),
                    qty,
                });
            }
            if allow_sells {
                quotes.push(Quote {
                    side: Side::Sell,
                    price: ceil_step(snapshot.mid + offset, self.tick_size),
                    qty,
                });
            }
        }
        (quotes, half * 2.0)
    }
}

pub struct Strategy<C: VenueApi, S: QuoteSource> {
    state: Arc<SharedState>,
    oms: Oms<C>,
    quoter: S,
    tick_interval: Duration,
    needs_secondary: bool,
}

impl<C: VenueApi, S: QuoteSource> Strategy<C, S> {
    pub fn new(state: Arc<SharedState>, oms: Oms<C>, quoter: S, settings: &Settings) -> Self {
        Self {
            state,
            oms,
            quoter,
            tick_interval: settings.tick_interval,
            needs_secondary: settings.secondary_required(),
        }
    }

    fn feeds_ready(&self) -> bool {
        self.state.market_connected()
            && self.state.private_connected()
            && (!self.needs_secondary || self.state.secondary_connected())
    }

    /// Ticks until `shutdown` flips, then pulls all resting quotes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        self.wait_for_feeds(&mut shutdown).await;

        let mut ticks = interval(self.tick_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticks.tick() => self.on_tick().await,
            }
        }

        let report = self.oms.run(&[], 0.0).await;
        info!(cancelled = report.cancelled, "pulled quotes on shutdown");
    }

    async fn wait_for_feeds(&self, shutdown: &mut watch::Receiver<bool>) {
        let mut poll = interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = poll.tick() => {
                    if self.feeds_ready() {
                        info!("all feeds connected, quoting");
                        return;
                    }
                    debug!("waiting for feeds");
                }
            }
        }
    }

    async fn on_tick(&self) {
        // a feed drop mid-session means the snapshot may be stale; stop
        // quoting and pull any resting orders until it comes back
        if !self.feeds_ready() {
            self.oms.run(&[], 0.0).await;
            return;
        }
        let Some(snapshot) = self.state.snapshot() else {
            return;
        };
        let position = self.state.position();

        let (quotes, spread) = self.quoter.quotes(&snapshot, &position);
        let report = self.oms.run(&quotes, spread).await;
        debug!(
            created = report.created,
            amended = report.amended,
            cancelled = report.cancelled,
            rejected = report.rejected,
            failed = report.failed,
            skipped = report.skipped,
            net_qty = position.net_qty,
            "tick"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quoter() -> SpreadQuoter {
        SpreadQuoter::new(&Settings::for_tests())
    }

    fn snap(mid: f64) -> MarketSnapshot {
        MarketSnapshot::from_bba(mid - 0.05, mid + 0.05, 1)
    }

    #[test]
    fn test_step_rounding() {
        assert_eq!(floor_step(100.07, 0.1), 100.0);
        assert!((ceil_step(100.01, 0.1) - 100.1).abs() < 1e-9);
        assert_eq!(floor_step(5.0, 0.0), 5.0);
    }

    #[test]
    fn test_ladder_shape() {
        let (quotes, spread) = quoter().quotes(&snap(50_000.0), &Position::default());

        // two levels per side at the test settings
        assert_eq!(quotes.len(), 4);
        assert!(spread > 0.0);
        let bids: Vec<&Quote> = quotes.iter().filter(|q| q.side == Side::Buy).collect();
        let asks: Vec<&Quote> = quotes.iter().filter(|q| q.side == Side::Sell).collect();
        assert_eq!(bids.len(), 2);
        assert_eq!(asks.len(), 2);
        for bid in &bids {
            assert!(bid.price < 50_000.0);
        }
        for ask in &asks {
            assert!(ask.price > 50_000.0);
        }
        // level 2 rests further out than level 1
        assert!(bids[1].price < bids[0].price);
        assert!(asks[1].price > asks[0].price);
    }

    #[test]
    fn test_prices_on_tick_grid() {
        let (quotes, _) = quoter().quotes(&snap(49_999.987), &Position::default());
        for quote in &quotes {
            let ticks = quote.price / 0.1;
            assert!((ticks - ticks.round()).abs() < 1e-6, "off-grid: {}", quote.price);
        }
    }

    #[test]
    fn test_long_inventory_suppresses_bids() {
        let long = Position {
            net_qty: 1.0, // at the configured limit
            entry_price: 50_000.0,
        };
        let (quotes, _) = quoter().quotes(&snap(50_000.0), &long);
        assert!(quotes.iter().all(|q| q.side == Side::Sell));
        assert!(!quotes.is_empty());
    }

    #[test]
    fn test_short_inventory_suppresses_asks() {
        let short = Position {
            net_qty: -1.5,
            entry_price: 50_000.0,
        };
        let (quotes, _) = quoter().quotes(&snap(50_000.0), &short);
        assert!(quotes.iter().all(|q| q.side == Side::Buy));
        assert!(!quotes.is_empty());
    }
}
