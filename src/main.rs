//! Demo entrypoint: wire the full execution stack and run one end-to-end
//! order exercise against the configured (demo) environment.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use kalshi_exec::config::load_config;
use kalshi_exec::kalshi::KalshiClient;
use kalshi_exec::observability::{ObservabilityRecorder, SqliteSink};
use kalshi_exec::trading::models::{OrderAction, OrderRequest, OrderSide, OrderType, Venue};
use kalshi_exec::trading::{
    CommandBus, EventBus, ExecutionEngine, KalshiExecutionAdapter, PortfolioManager,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("loading configuration")?;

    let file_appender = tracing_appender::rolling::daily("logs", "kalshi-exec.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(file_writer.and(std::io::stdout))
        .init();

    info!(
        demo = config.kalshi.use_demo,
        base_url = config.kalshi.base_url(),
        "starting kalshi execution demo"
    );

    let sink = Arc::new(
        SqliteSink::open(&config.observability_db_path).context("opening observability store")?,
    );
    let recorder = Arc::new(ObservabilityRecorder::with_default_queue(sink));

    let command_bus = Arc::new(CommandBus::with_recorder(Some(recorder.clone())));
    let event_bus = Arc::new(EventBus::with_recorder(Some(recorder.clone())));

    let client = Arc::new(KalshiClient::new(&config.kalshi).context("building kalshi client")?);
    let adapter = Arc::new(KalshiExecutionAdapter::new(client));

    let engine = Arc::new(ExecutionEngine::new(
        adapter,
        command_bus.clone(),
        event_bus.clone(),
    ));
    let pm = Arc::new(PortfolioManager::new(command_bus.clone(), &event_bus));

    let mut logger_sub = event_bus.subscribe();
    let event_logger = tokio::spawn(async move {
        while let Some(event) = logger_sub.recv().await {
            info!(event_type = event.type_label(), "{event:?}");
        }
    });

    let engine_task = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run().await }
    });
    let pm_task = tokio::spawn({
        let pm = pm.clone();
        async move { pm.run().await }
    });

    // Minimal end-to-end exercise. The defaults will be rejected unless
    // DEMO_TICKER names a real open market; the rejection path is itself a
    // useful smoke test of the event stream.
    let trade_id = format!("demo-{}", uuid::Uuid::new_v4());
    let ticker = std::env::var("DEMO_TICKER").unwrap_or_else(|_| "ABC".to_string());
    let side = match std::env::var("DEMO_SIDE").as_deref() {
        Ok("no") => OrderSide::No,
        _ => OrderSide::Yes,
    };
    let price: f64 = std::env::var("DEMO_LIMIT_PRICE")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0.10);

    pm.submit_order(OrderRequest {
        trade_id: trade_id.clone(),
        venue: Venue::Kalshi,
        ticker,
        side,
        action: OrderAction::Buy,
        count: 1,
        order_type: OrderType::Limit,
        limit_price_dollars: Some(price),
        client_order_id: Some(trade_id.clone()),
    });

    match pm
        .wait_for_order_submitted(&trade_id, Duration::from_secs(10))
        .await
    {
        Ok(venue_order_id) => {
            info!(%venue_order_id, "order live; letting the pollers observe it");
            tokio::time::sleep(Duration::from_secs(30)).await;
            pm.cancel_order(&venue_order_id, Some("demo cancel"));
        }
        Err(err) => warn!("demo order was not accepted: {err}"),
    }

    tokio::time::sleep(Duration::from_secs(5)).await;

    event_logger.abort();
    pm_task.abort();
    engine_task.abort();
    recorder.close().await;
    Ok(())
}
