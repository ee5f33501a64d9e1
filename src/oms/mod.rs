// Reconciliation engine: diffs desired quotes against live local order
// state and issues the minimal set of create/amend/cancel instructions,
// batched and dispatched concurrently through the order gateway.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::config::Settings;
use crate::gateway::orders::{
    AmendReq, CancelReq, Correlated, CreateReq, ItemOutcome, OrderGateway,
};
use crate::gateway::VenueApi;
use crate::logger::EventLog;
use crate::state::order::{Order, OrderStatus, Side};
use crate::state::SharedState;

/// Desired resting order for one tick; recomputed every tick, never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub side: Side,
    pub price: f64,
    pub qty: f64,
}

/// What one reconciliation tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub amended: usize,
    pub cancelled: usize,
    pub rejected: usize,
    /// transport/protocol failures; the affected orders stay pending and
    /// retry after the pending timeout
    pub failed: usize,
    /// orders with an outstanding mutating request, untouched this tick
    pub skipped: usize,
}

struct TickPlan {
    creates: Vec<CreateReq>,
    amends: Vec<AmendReq>,
    cancels: Vec<CancelReq>,
    amend_targets: HashMap<String, (f64, f64)>,
    skipped: usize,
}

pub struct Oms<C: VenueApi> {
    state: Arc<SharedState>,
    gateway: OrderGateway<C>,
    tick_size: f64,
    qty_tolerance: f64,
    pending_timeout: Duration,
    log: EventLog,
}

impl<C: VenueApi> Oms<C> {
    pub fn new(
        state: Arc<SharedState>,
        gateway: OrderGateway<C>,
        settings: &Settings,
        log: EventLog,
    ) -> Self {
        Self {
            state,
            gateway,
            tick_size: settings.tick_size,
            qty_tolerance: settings.qty_tolerance,
            pending_timeout: settings.pending_timeout,
            log,
        }
    }

    fn bucket(&self, price: f64) -> i64 {
        (price / self.tick_size).round() as i64
    }

    /// Duplicate quotes at one (side, price bucket) collapse to the last
    /// occurrence. Last-wins is a deliberate policy choice.
    fn dedupe(&self, quotes: &[Quote]) -> Vec<Quote> {
        let mut by_bucket: HashMap<(Side, i64), Quote> = HashMap::new();
        for quote in quotes {
            by_bucket.insert((quote.side, self.bucket(quote.price)), *quote);
        }
        by_bucket.into_values().collect()
    }

    /// An existing order satisfies a quote if it is on the same side within
    /// one tick of the quoted price.
    fn satisfies(&self, order: &Order, quote: &Quote) -> bool {
        order.side == quote.side && (order.price - quote.price).abs() < self.tick_size
    }

    /// One reconciliation tick. Infallible by contract: every failure is
    /// contained to the order it concerns and reported in the counters.
    #[instrument(skip_all, fields(quotes = quotes.len()))]
    pub async fn run(&self, quotes: &[Quote], spread: f64) -> ReconcileReport {
        let desired = self.dedupe(quotes);
        let plan = self.plan_tick(&desired);

        debug!(
            creates = plan.creates.len(),
            amends = plan.amends.len(),
            cancels = plan.cancels.len(),
            skipped = plan.skipped,
            spread,
            "reconciliation plan"
        );

        // all three instruction kinds go out concurrently; ordering between
        // kinds within one tick is not guaranteed
        let (create_out, amend_out, cancel_out) = tokio::join!(
            self.gateway.create_batch(&plan.creates),
            self.gateway.amend_batch(&plan.amends),
            self.gateway.cancel_batch(&plan.cancels),
        );

        let mut report = ReconcileReport {
            skipped: plan.skipped,
            ..ReconcileReport::default()
        };
        self.apply_outcomes(create_out, amend_out, cancel_out, &plan.amend_targets, &mut report);
        report
    }

    /// Builds the instruction set and marks every touched order pending
    /// under a single lock acquisition, so no second request can be issued
    /// for the same order until these resolve.
    fn plan_tick(&self, desired: &[Quote]) -> TickPlan {
        let mut orders = self.state.orders.write();
        orders.reap_stale_pending(self.pending_timeout, &self.log);

        let skipped = orders.pending_count();
        let live: Vec<Order> = orders.iter().cloned().collect();

        let mut claimed: HashSet<String> = HashSet::new();
        let mut creates = Vec::new();
        let mut amends = Vec::new();
        let mut amend_targets = HashMap::new();

        for quote in desired {
            let satisfied = live.iter().find(|o| {
                !claimed.contains(&o.client_order_id) && self.satisfies(o, quote)
            });
            match satisfied {
                Some(existing) => {
                    claimed.insert(existing.client_order_id.clone());
                    // a pending match has a request in flight; leave it alone
                    if existing.status == OrderStatus::Open
                        && (existing.qty - quote.qty).abs() > self.qty_tolerance
                    {
                        amends.push(AmendReq {
                            client_order_id: existing.client_order_id.clone(),
                            price: quote.price,
                            qty: quote.qty,
                        });
                        amend_targets.insert(
                            existing.client_order_id.clone(),
                            (quote.price, quote.qty),
                        );
                    }
                }
                None => {
                    let order = Order::pending_create(quote.side, quote.price, quote.qty);
                    creates.push(CreateReq {
                        client_order_id: order.client_order_id.clone(),
                        side: quote.side,
                        price: quote.price,
                        qty: quote.qty,
                    });
                    orders.insert(order);
                }
            }
        }

        // everything open and unclaimed is stale; an empty desired set
        // therefore cancels all resting orders
        let cancels: Vec<CancelReq> = live
            .iter()
            .filter(|o| o.status == OrderStatus::Open && !claimed.contains(&o.client_order_id))
            .map(|o| CancelReq {
                client_order_id: o.client_order_id.clone(),
            })
            .collect();

        for amend in &amends {
            if let Some(order) = orders.get_mut(&amend.client_order_id) {
                order.mark_pending(OrderStatus::PendingAmend);
            }
        }
        for cancel in &cancels {
            if let Some(order) = orders.get_mut(&cancel.client_order_id) {
                order.mark_pending(OrderStatus::PendingCancel);
            }
        }

        TickPlan {
            creates,
            amends,
            cancels,
            amend_targets,
            skipped,
        }
    }

    fn apply_outcomes(
        &self,
        create_out: Vec<Correlated>,
        amend_out: Vec<Correlated>,
        cancel_out: Vec<Correlated>,
        amend_targets: &HashMap<String, (f64, f64)>,
        report: &mut ReconcileReport,
    ) {
        let mut orders = self.state.orders.write();

        for result in create_out {
            match result.outcome {
                ItemOutcome::Accepted { exchange_order_id } => {
                    if let Some(order) = orders.get_mut(&result.client_order_id) {
                        order.exchange_order_id = exchange_order_id;
                        order.mark_open();
                        report.created += 1;
                    }
                }
                ItemOutcome::Rejected { .. } => {
                    // already logged by the gateway; locally the order never existed
                    orders.remove(&result.client_order_id);
                    report.rejected += 1;
                }
                ItemOutcome::Failed(_) => report.failed += 1, // stays PendingCreate
            }
        }

        for result in amend_out {
            match result.outcome {
                ItemOutcome::Accepted { .. } => {
                    if let Some(order) = orders.get_mut(&result.client_order_id) {
                        if let Some(&(price, qty)) = amend_targets.get(&result.client_order_id) {
                            order.price = price;
                            order.qty = qty;
                        }
                        order.mark_open();
                        report.amended += 1;
                    }
                }
                ItemOutcome::Rejected { .. } => {
                    orders.remove(&result.client_order_id);
                    report.rejected += 1;
                }
                ItemOutcome::Failed(_) => report.failed += 1, // stays PendingAmend
            }
        }

        for result in cancel_out {
            match result.outcome {
                ItemOutcome::Accepted { .. } => {
                    orders.remove(&result.client_order_id);
                    report.cancelled += 1;
                }
                ItemOutcome::Rejected { .. } => {
                    // the venue refused the cancel (typically already gone);
                    // drop the local entry either way
                    orders.remove(&result.client_order_id);
                    report.rejected += 1;
                }
                ItemOutcome::Failed(_) => report.failed += 1, // stays PendingCancel
            }
        }
    }
}
