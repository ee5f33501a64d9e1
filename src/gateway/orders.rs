// Order operations over the venue API: singles plus chunked, concurrently
// dispatched batches with per-entry correlation back to client order ids.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;

use crate::config::Settings;
use crate::gateway::payload::{
    Payloads, VenueResponse, AMEND_BATCH, AMEND_ORDER, CANCEL_ALL, CANCEL_BATCH, CANCEL_ORDER,
    CREATE_BATCH, CREATE_ORDER,
};
use crate::gateway::{GatewayError, VenueApi};
use crate::logger::{EventKind, EventLog};
use crate::state::order::Side;

/// Venue cap on entries per batch call.
pub const MAX_BATCH: usize = 10;

#[derive(Debug, Clone)]
pub struct CreateReq {
    pub client_order_id: String,
    pub side: Side,
    pub price: f64,
    pub qty: f64,
}

#[derive(Debug, Clone)]
pub struct AmendReq {
    pub client_order_id: String,
    pub price: f64,
    pub qty: f64,
}

#[derive(Debug, Clone)]
pub struct CancelReq {
    pub client_order_id: String,
}

/// Outcome of one instruction, correlated back to its order.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Accepted { exchange_order_id: Option<String> },
    Rejected { code: i64, msg: String },
    Failed(GatewayError),
}

#[derive(Debug, Clone)]
pub struct Correlated {
    pub client_order_id: String,
    pub outcome: ItemOutcome,
}

pub struct OrderGateway<C: VenueApi> {
    api: Arc<C>,
    payloads: Payloads,
    log: EventLog,
}

impl<C: VenueApi> OrderGateway<C> {
    pub fn new(api: Arc<C>, settings: &Settings, log: EventLog) -> Self {
        Self {
            api,
            payloads: Payloads::new(&settings.symbol, &settings.category),
            log,
        }
    }

    // ---- single operations ----

    pub async fn create_limit(
        &self,
        link_id: &str,
        side: Side,
        price: f64,
        qty: f64,
    ) -> Result<VenueResponse, GatewayError> {
        let body = self.payloads.create_limit(link_id, side, price, qty);
        self.api.submit(CREATE_ORDER, &body).await
    }

    pub async fn create_market(
        &self,
        side: Side,
        qty: f64,
    ) -> Result<VenueResponse, GatewayError> {
        let body = self.payloads.create_market(side, qty);
        self.api.submit(CREATE_ORDER, &body).await
    }

    pub async fn amend(
        &self,
        link_id: &str,
        price: f64,
        qty: f64,
    ) -> Result<VenueResponse, GatewayError> {
        let body = self.payloads.amend(link_id, price, qty);
        self.api.submit(AMEND_ORDER, &body).await
    }

    pub async fn cancel(&self, link_id: &str) -> Result<VenueResponse, GatewayError> {
        let body = self.payloads.cancel(link_id);
        self.api.submit(CANCEL_ORDER, &body).await
    }

    pub async fn cancel_all(&self) -> Result<VenueResponse, GatewayError> {
        let body = self.payloads.cancel_all();
        self.api.submit(CANCEL_ALL, &body).await
    }

    // ---- batched operations ----

    pub async fn create_batch(&self, reqs: &[CreateReq]) -> Vec<Correlated> {
        self.dispatch(
            CREATE_BATCH,
            reqs,
            |r| {
                self.payloads
                    .create_limit(&r.client_order_id, r.side, r.price, r.qty)
            },
            |r| r.client_order_id.clone(),
        )
        .await
    }

    pub async fn amend_batch(&self, reqs: &[AmendReq]) -> Vec<Correlated> {
        self.dispatch(
            AMEND_BATCH,
            reqs,
            |r| self.payloads.amend(&r.client_order_id, r.price, r.qty),
            |r| r.client_order_id.clone(),
        )
        .await
    }

    pub async fn cancel_batch(&self, reqs: &[CancelReq]) -> Vec<Correlated> {
        self.dispatch(
            CANCEL_BATCH,
            reqs,
            |r| self.payloads.cancel(&r.client_order_id),
            |r| r.client_order_id.clone(),
        )
        .await
    }

    /// Chunks `reqs` into ≤10-entry batches, fires all wire calls at once,
    /// then awaits them all; one failed sub-batch never blocks or cancels
    /// the others. Every request comes back with exactly one outcome.
    async fn dispatch<T>(
        &self,
        endpoint: &'static str,
        reqs: &[T],
        to_entry: impl Fn(&T) -> Value,
        id_of: impl Fn(&T) -> String,
    ) -> Vec<Correlated> {
        if reqs.is_empty() {
            return Vec::new();
        }

        let chunks: Vec<&[T]> = reqs.chunks(MAX_BATCH).collect();
        let calls = chunks.iter().map(|chunk| {
            let body = self.payloads.batch(chunk.iter().map(&to_entry).collect());
            async move { self.api.submit(endpoint, &body).await }
        });
        let results = join_all(calls).await;

        let mut out = Vec::with_capacity(reqs.len());
        for (chunk, result) in chunks.iter().zip(results) {
            match result {
                Err(e) => {
                    for req in chunk.iter() {
                        out.push(Correlated {
                            client_order_id: id_of(req),
                            outcome: ItemOutcome::Failed(e.clone()),
                        });
                    }
                }
                Ok(response) if !response.is_ok() => {
                    // whole batch declined at the envelope level
                    for req in chunk.iter() {
                        out.push(Correlated {
                            client_order_id: id_of(req),
                            outcome: ItemOutcome::Rejected {
                                code: response.ret_code,
                                msg: response.ret_msg.clone(),
                            },
                        });
                    }
                }
                Ok(response) => {
                    let items = response.batch_items();
                    for req in chunk.iter() {
                        let id = id_of(req);
                        let item = items.iter().find(|i| i.order_link_id == id);
                        let outcome = match item {
                            Some(i) if i.is_ok() => ItemOutcome::Accepted {
                                exchange_order_id: i.exchange_order_id.clone(),
                            },
                            Some(i) => {
                                self.log.publish(
                                    EventKind::ApiError,
                                    format!(
                                        "{endpoint} entry {id}: code {} ({})",
                                        i.code, i.msg
                                    ),
                                );
                                ItemOutcome::Rejected {
                                    code: i.code,
                                    msg: i.msg.clone(),
                                }
                            }
                            // the venue answered but not for this entry
                            None => ItemOutcome::Failed(GatewayError::Protocol(format!(
                                "no batch item for {id}"
                            ))),
                        };
                        out.push(Correlated {
                            client_order_id: id,
                            outcome,
                        });
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::MockApi;
    use proptest::prelude::*;

    fn gateway(api: Arc<MockApi>) -> OrderGateway<MockApi> {
        let settings = Settings::for_tests();
        let log = EventLog::spawn(settings.log_path.clone(), 1 << 20, 1);
        OrderGateway::new(api, &settings, log)
    }

    fn creates(n: usize) -> Vec<CreateReq> {
        (0..n)
            .map(|i| CreateReq {
                client_order_id: format!("mmx-{i}"),
                side: Side::Buy,
                price: 100.0 + i as f64,
                qty: 1.0,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_25_creates_chunk_into_10_10_5() {
        let api = Arc::new(MockApi::default());
        let gateway = gateway(api.clone());

        let outcomes = gateway.create_batch(&creates(25)).await;

        let calls = api.calls.lock();
        assert_eq!(calls.len(), 3);
        let sizes: Vec<usize> = calls
            .iter()
            .map(|(_, body)| body["request"].as_array().unwrap().len())
            .collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert!(calls.iter().all(|(ep, _)| ep == CREATE_BATCH));

        assert_eq!(outcomes.len(), 25);
        assert!(outcomes
            .iter()
            .all(|c| matches!(c.outcome, ItemOutcome::Accepted { .. })));
    }

    #[tokio::test]
    async fn test_failed_sub_batch_does_not_block_others() {
        let api = Arc::new(MockApi::default());
        api.fail_call_indices.lock().insert(1); // second chunk dies on the wire
        let gateway = gateway(api.clone());

        let outcomes = gateway.create_batch(&creates(25)).await;

        assert_eq!(api.call_count(), 3);
        let failed: Vec<&str> = outcomes
            .iter()
            .filter(|c| matches!(c.outcome, ItemOutcome::Failed(_)))
            .map(|c| c.client_order_id.as_str())
            .collect();
        assert_eq!(failed.len(), 10);
        assert!(failed.iter().all(|id| {
            let n: usize = id.trim_start_matches("mmx-").parse().unwrap();
            (10..20).contains(&n)
        }));
        let accepted = outcomes
            .iter()
            .filter(|c| matches!(c.outcome, ItemOutcome::Accepted { .. }))
            .count();
        assert_eq!(accepted, 15);
    }

    #[tokio::test]
    async fn test_per_entry_rejection_is_correlated() {
        let api = Arc::new(MockApi::default());
        api.reject_links.lock().insert("mmx-3".to_string());
        let gateway = gateway(api.clone());

        let outcomes = gateway.create_batch(&creates(5)).await;

        for c in &outcomes {
            if c.client_order_id == "mmx-3" {
                assert!(matches!(c.outcome, ItemOutcome::Rejected { code: 110017, .. }));
            } else {
                assert!(matches!(c.outcome, ItemOutcome::Accepted { .. }));
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_batch_uses_cancel_endpoint() {
        let api = Arc::new(MockApi::default());
        let gateway = gateway(api.clone());
        let reqs: Vec<CancelReq> = (0..3)
            .map(|i| CancelReq {
                client_order_id: format!("mmx-{i}"),
            })
            .collect();

        let outcomes = gateway.cancel_batch(&reqs).await;
        assert_eq!(outcomes.len(), 3);
        assert!(api.calls.lock().iter().all(|(ep, _)| ep == CANCEL_BATCH));
    }

    #[tokio::test]
    async fn test_single_create_and_cancel_all() {
        let api = Arc::new(MockApi::default());
        let gateway = gateway(api.clone());

        let response = gateway
            .create_limit("mmx-s1", Side::Sell, 101.0, 0.5)
            .await
            .unwrap();
        assert!(response.is_ok());
        assert!(response.order_id().is_some());

        gateway.cancel_all().await.unwrap();

        let calls = api.calls.lock();
        assert_eq!(calls[0].0, CREATE_ORDER);
        assert_eq!(calls[1].0, CANCEL_ALL);
        assert_eq!(calls[1].1["symbol"], "BTCUSDT");
    }

    #[tokio::test]
    async fn test_empty_batch_issues_no_calls() {
        let api = Arc::new(MockApi::default());
        let gateway = gateway(api.clone());
        assert!(gateway.amend_batch(&[]).await.is_empty());
        assert_eq!(api.call_count(), 0);
    }

    proptest! {
        // ceil(N/10) wire calls, and every instruction appears in exactly
        // one batch with exactly one outcome.
        #[test]
        fn prop_chunking_is_exact(n in 0usize..60) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let api = Arc::new(MockApi::default());
                let gateway = gateway(api.clone());
                let reqs = creates(n);

                let outcomes = gateway.create_batch(&reqs).await;

                prop_assert_eq!(api.call_count(), n.div_ceil(10));
                prop_assert_eq!(outcomes.len(), n);

                let mut sent: Vec<String> = api
                    .calls
                    .lock()
                    .iter()
                    .flat_map(|(_, body)| {
                        body["request"]
                            .as_array()
                            .unwrap()
                            .iter()
                            .map(|e| e["orderLinkId"].as_str().unwrap().to_string())
                            .collect::<Vec<_>>()
                    })
                    .collect();
                sent.sort();
                let mut expected: Vec<String> =
                    reqs.iter().map(|r| r.client_order_id.clone()).collect();
                expected.sort();
                prop_assert_eq!(sent, expected);
                Ok(())
            })?;
        }
    }
}
