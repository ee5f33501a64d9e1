use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::logger::{EventKind, EventLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "Buy" => Some(Side::Buy),
            "Sell" => Some(Side::Sell),
            _ => None,
        }
    }
}

/// Local order lifecycle. `Pending*` means a mutating request is in flight;
/// the reconciler must not touch such an order until it resolves or the
/// pending timeout reaps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    PendingCreate,
    Open,
    PendingAmend,
    PendingCancel,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            OrderStatus::PendingCreate | OrderStatus::PendingAmend | OrderStatus::PendingCancel
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// Local view of one resting (or in-flight) order.
#[derive(Debug, Clone)]
pub struct Order {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub side: Side,
    pub price: f64,
    pub qty: f64,
    pub status: OrderStatus,
    pub pending_since: Option<Instant>,
}

impl Order {
    pub fn pending_create(side: Side, price: f64, qty: f64) -> Self {
        Self {
            client_order_id: new_client_order_id(),
            exchange_order_id: None,
            side,
            price,
            qty,
            status: OrderStatus::PendingCreate,
            pending_since: Some(Instant::now()),
        }
    }

    pub fn mark_pending(&mut self, status: OrderStatus) {
        debug_assert!(status.is_pending());
        self.status = status;
        self.pending_since = Some(Instant::now());
    }

    pub fn mark_open(&mut self) {
        self.status = OrderStatus::Open;
        self.pending_since = None;
    }
}

pub fn new_client_order_id() -> String {
    let nonce: u64 = rand::thread_rng().gen();
    format!("mmx-{nonce:016x}")
}

/// All live local orders, keyed by client order id. Terminal orders are
/// removed as soon as their terminal status is applied.
#[derive(Debug, Default)]
pub struct OrderStore {
    orders: HashMap<String, Order>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, order: Order) {
        self.orders.insert(order.client_order_id.clone(), order);
    }

    pub fn get_mut(&mut self, client_order_id: &str) -> Option<&mut Order> {
        self.orders.get_mut(client_order_id)
    }

    pub fn remove(&mut self, client_order_id: &str) -> Option<Order> {
        self.orders.remove(client_order_id)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn find_by_exchange_id(&mut self, exchange_order_id: &str) -> Option<&mut Order> {
        self.orders
            .values_mut()
            .find(|o| o.exchange_order_id.as_deref() == Some(exchange_order_id))
    }

    /// Looks an order up by exchange id first, then by client (link) id, and
    /// returns its client order id. Feed events may carry either.
    pub fn resolve(&mut self, exchange_order_id: &str, link_id: &str) -> Option<String> {
        if let Some(order) = self.find_by_exchange_id(exchange_order_id) {
            return Some(order.client_order_id.clone());
        }
        self.orders.get(link_id).map(|o| o.client_order_id.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.orders.values().filter(|o| o.status.is_pending()).count()
    }

    /// Drops or reverts orders whose mutating request has been in flight for
    /// longer than `timeout`. A stale PendingCreate is forgotten locally; if
    /// the venue accepted it after all, the order resurfaces on the private
    /// feed and is cancelled as unmatched on a later tick. Stale amends and
    /// cancels revert to Open so the reconciler can retry.
    pub fn reap_stale_pending(&mut self, timeout: Duration, log: &EventLog) {
        let now = Instant::now();
        let stale: Vec<String> = self
            .orders
            .values()
            .filter(|o| {
                o.status.is_pending()
                    && o.pending_since.map_or(false, |t| now.duration_since(t) > timeout)
            })
            .map(|o| o.client_order_id.clone())
            .collect();

        for id in stale {
            let Some(order) = self.orders.get_mut(&id) else { continue };
            match order.status {
                OrderStatus::PendingCreate => {
                    log.publish(
                        EventKind::RuntimeError,
                        format!("create request timed out, dropping local order {id}"),
                    );
                    self.orders.remove(&id);
                }
                OrderStatus::PendingAmend | OrderStatus::PendingCancel => {
                    log.publish(
                        EventKind::RuntimeError,
                        format!("{:?} request timed out for order {id}, reverting to Open", order.status),
                    );
                    order.mark_open();
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_log() -> EventLog {
        EventLog::spawn(std::env::temp_dir().join("mmx-order-test.log"), 1 << 20, 1)
    }

    #[test]
    fn test_status_classes() {
        assert!(OrderStatus::PendingAmend.is_pending());
        assert!(!OrderStatus::Open.is_pending());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(!OrderStatus::PendingCancel.is_terminal());
    }

    #[test]
    fn test_client_order_ids_unique() {
        let a = new_client_order_id();
        let b = new_client_order_id();
        assert_ne!(a, b);
        assert!(a.starts_with("mmx-"));
    }

    #[tokio::test]
    async fn test_reap_reverts_amend_and_drops_create() {
        let log = test_log();
        let mut store = OrderStore::new();

        let mut amending = Order::pending_create(Side::Buy, 100.0, 1.0);
        amending.mark_open();
        amending.mark_pending(OrderStatus::PendingAmend);
        amending.pending_since = Some(Instant::now() - Duration::from_secs(60));
        let amend_id = amending.client_order_id.clone();
        store.insert(amending);

        let mut creating = Order::pending_create(Side::Sell, 101.0, 1.0);
        creating.pending_since = Some(Instant::now() - Duration::from_secs(60));
        let create_id = creating.client_order_id.clone();
        store.insert(creating);

        let mut fresh = Order::pending_create(Side::Sell, 102.0, 1.0);
        fresh.pending_since = Some(Instant::now());
        let fresh_id = fresh.client_order_id.clone();
        store.insert(fresh);

        store.reap_stale_pending(Duration::from_secs(5), &log);

        assert_eq!(store.get_mut(&amend_id).unwrap().status, OrderStatus::Open);
        assert!(store.get_mut(&create_id).is_none());
        assert_eq!(store.get_mut(&fresh_id).unwrap().status, OrderStatus::PendingCreate);
    }
}
