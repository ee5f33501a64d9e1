use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use mmx_rs::config::Settings;
use mmx_rs::feeds::market::{FeedRole, MarketDataFeed};
use mmx_rs::feeds::private::PrivateDataFeed;
use mmx_rs::gateway::client::GatewayClient;
use mmx_rs::gateway::orders::OrderGateway;
use mmx_rs::logger::EventLog;
use mmx_rs::oms::Oms;
use mmx_rs::state::SharedState;
use mmx_rs::strategy::{SpreadQuoter, Strategy};
use mmx_rs::telemetry;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing("info,mmx_rs=debug");
    telemetry::init_metrics();

    let settings = Arc::new(Settings::from_env()?);
    info!(symbol = %settings.symbol, category = %settings.category, "starting");

    let log = EventLog::spawn(
        settings.log_path.clone(),
        settings.log_max_bytes,
        settings.log_backups,
    );
    let state = Arc::new(SharedState::new(settings.tick_size));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut feeds = Vec::new();
    feeds.push(tokio::spawn(
        MarketDataFeed::new(
            settings.clone(),
            state.clone(),
            log.clone(),
            FeedRole::Primary,
        )
        .run(shutdown_rx.clone()),
    ));
    if settings.secondary_required() {
        feeds.push(tokio::spawn(
            MarketDataFeed::new(
                settings.clone(),
                state.clone(),
                log.clone(),
                FeedRole::Secondary,
            )
            .run(shutdown_rx.clone()),
        ));
    }
    feeds.push(tokio::spawn(
        PrivateDataFeed::new(settings.clone(), state.clone(), log.clone())
            .run(shutdown_rx.clone()),
    ));

    let client = Arc::new(GatewayClient::new(&settings, log.clone())?);
    let gateway = OrderGateway::new(client, &settings, log.clone());
    let oms = Oms::new(state.clone(), gateway, &settings, log.clone());
    let quoter = SpreadQuoter::new(&settings);
    let strategy = tokio::spawn(Strategy::new(state, oms, quoter, &settings).run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    // the strategy pulls its quotes before exiting; feeds just wind down
    strategy.await?;
    for feed in feeds {
        feed.await?;
    }
    info!("stopped");
    Ok(())
}
