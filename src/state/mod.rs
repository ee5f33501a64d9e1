// Shared, concurrently-read state: market snapshot, position, local orders.
//
// Each aggregate has a single writer (its owning feed, or the OMS for order
// status it initiated). Locks are parking_lot and never held across an
// await, so every inbound message applies atomically with respect to task
// switches.

pub mod order;

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::feeds::book::VenueBook;
use crate::state::order::{OrderStore, Side};

/// Best bid/ask view, replaced wholesale on every book update so a reader
/// never sees fields from two different updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketSnapshot {
    pub best_bid: f64,
    pub best_ask: f64,
    pub mid: f64,
    pub ts_ms: u64,
}

impl MarketSnapshot {
    pub fn from_bba(best_bid: f64, best_ask: f64, ts_ms: u64) -> Self {
        Self {
            best_bid,
            best_ask,
            mid: (best_bid + best_ask) / 2.0,
            ts_ms,
        }
    }
}

/// Net position, written only by the private feed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position {
    pub net_qty: f64,
    pub entry_price: f64,
}

impl Position {
    /// Applies one trade execution. Entry price is volume-weighted while the
    /// position grows and resets when the net flips sign.
    pub fn apply_fill(&mut self, side: Side, price: f64, qty: f64) {
        let signed = match side {
            Side::Buy => qty,
            Side::Sell => -qty,
        };
        let prev = self.net_qty;
        let next = prev + signed;

        if prev == 0.0 || prev.signum() != next.signum() {
            self.entry_price = if next == 0.0 { 0.0 } else { price };
        } else if next.abs() > prev.abs() {
            self.entry_price =
                (self.entry_price * prev.abs() + price * qty) / (prev.abs() + qty);
        }
        // reducing trades leave entry untouched
        self.net_qty = next;
    }
}

/// Depth + snapshot under one lock so both always describe the same update.
#[derive(Debug)]
pub struct MarketState {
    pub book: VenueBook,
    pub snapshot: Option<MarketSnapshot>,
}

pub struct SharedState {
    pub market: RwLock<MarketState>,
    pub position: RwLock<Position>,
    pub orders: RwLock<OrderStore>,
    market_connected: AtomicBool,
    private_connected: AtomicBool,
    secondary_connected: AtomicBool,
}

impl SharedState {
    pub fn new(tick_size: f64) -> Self {
        Self {
            market: RwLock::new(MarketState {
                book: VenueBook::new(tick_size),
                snapshot: None,
            }),
            position: RwLock::new(Position::default()),
            orders: RwLock::new(OrderStore::new()),
            market_connected: AtomicBool::new(false),
            private_connected: AtomicBool::new(false),
            secondary_connected: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> Option<MarketSnapshot> {
        self.market.read().snapshot
    }

    pub fn position(&self) -> Position {
        *self.position.read()
    }

    pub fn set_market_connected(&self, connected: bool) {
        self.market_connected.store(connected, Ordering::Relaxed);
    }

    pub fn set_private_connected(&self, connected: bool) {
        self.private_connected.store(connected, Ordering::Relaxed);
    }

    pub fn set_secondary_connected(&self, connected: bool) {
        self.secondary_connected.store(connected, Ordering::Relaxed);
    }

    pub fn market_connected(&self) -> bool {
        self.market_connected.load(Ordering::Relaxed)
    }

    pub fn private_connected(&self) -> bool {
        self.private_connected.load(Ordering::Relaxed)
    }

    pub fn secondary_connected(&self) -> bool {
        self.secondary_connected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_mid() {
        let snap = MarketSnapshot::from_bba(99.0, 101.0, 1);
        assert_eq!(snap.mid, 100.0);
    }

    #[test]
    fn test_position_grows_weighted() {
        let mut pos = Position::default();
        pos.apply_fill(Side::Buy, 100.0, 1.0);
        pos.apply_fill(Side::Buy, 110.0, 1.0);
        assert_eq!(pos.net_qty, 2.0);
        assert!((pos.entry_price - 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_position_reduce_keeps_entry() {
        let mut pos = Position::default();
        pos.apply_fill(Side::Buy, 100.0, 2.0);
        pos.apply_fill(Side::Sell, 120.0, 1.0);
        assert_eq!(pos.net_qty, 1.0);
        assert_eq!(pos.entry_price, 100.0);
    }

    #[test]
    fn test_position_flip_resets_entry() {
        let mut pos = Position::default();
        pos.apply_fill(Side::Buy, 100.0, 1.0);
        pos.apply_fill(Side::Sell, 90.0, 3.0);
        assert_eq!(pos.net_qty, -2.0);
        assert_eq!(pos.entry_price, 90.0);
    }

    #[test]
    fn test_connected_flags() {
        let state = SharedState::new(0.1);
        assert!(!state.market_connected());
        state.set_market_connected(true);
        state.set_private_connected(true);
        assert!(state.market_connected() && state.private_connected());
        state.set_market_connected(false);
        assert!(!state.market_connected());
    }
}
