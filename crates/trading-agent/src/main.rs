use std::sync::Arc;
use std::time::Duration;

use advisory_client::{AdvisoryClient, AdvisoryConfig};
use anyhow::{bail, Result};
use tokio::signal::unix::SignalKind;
use trading_agent::{
    AgentConfig, EngineDeps, PaperBroker, SimulatedMarket, SimulationConfig, SqlitePersistence,
    TradingEngine,
};
use trading_core::AdvisoryProvider;

const METRICS_STATE_KEY: &str = "metrics";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting autonomous trading engine");

    let config = AgentConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Instruments: {}", config.instruments.join(", "));
    tracing::info!("  Cycle interval: {} seconds", config.cycle_interval_seconds);
    tracing::info!("  Leverage: {}x", config.leverage);
    tracing::info!("  Risk per trade: {:.1}%", config.risk_per_trade * 100.0);
    tracing::info!("  Max open positions: {}", config.max_open_positions);

    if !config.paper_trading {
        bail!("PAPER_TRADING=false requested but no live venue is configured in this build");
    }

    let store = Arc::new(SqlitePersistence::connect(&config.database_url).await?);
    match store.load_state(METRICS_STATE_KEY).await {
        Ok(Some(previous)) => tracing::info!("Previous run metrics: {}", previous),
        Ok(None) => {}
        Err(e) => tracing::warn!("Failed to load previous metrics: {}", e),
    }

    let market = SimulatedMarket::new(SimulationConfig::for_instruments(&config.instruments));
    let broker = PaperBroker::new(market.prices());

    let advisory: Option<Arc<dyn AdvisoryProvider>> = match &config.advisory_url {
        Some(url) => {
            let client = AdvisoryClient::new(AdvisoryConfig {
                base_url: url.clone(),
                timeout: Duration::from_millis(config.advisory_timeout_ms.max(1) * 10),
            })?;
            tracing::info!("Advisory service: {}", url);
            Some(Arc::new(client))
        }
        None => {
            tracing::info!("No advisory service configured, autonomous signals use fallback rules");
            None
        }
    };

    let (engine, handle) = TradingEngine::new(
        config,
        EngineDeps {
            market: Arc::new(market),
            sink: Arc::new(broker),
            persistence: store.clone(),
            advisory,
        },
    );
    let mut engine_task = tokio::spawn(engine.run());

    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let finished_early = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
            None
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
            None
        }
        result = &mut engine_task => Some(result),
    };

    let result = match finished_early {
        Some(result) => result,
        None => {
            tracing::info!("Shutdown signal received, stopping engine...");
            if let Err(e) = handle.stop().await {
                tracing::warn!("Engine already gone: {}", e);
            }
            engine_task.await
        }
    };

    let metrics = result??;
    match serde_json::to_string(&metrics) {
        Ok(json) => {
            if let Err(e) = store.save_state(METRICS_STATE_KEY, &json).await {
                tracing::warn!("Failed to persist final metrics: {}", e);
            }
        }
        Err(e) => tracing::warn!("Failed to serialize final metrics: {}", e),
    }

    tracing::info!("Trading engine shut down.");
    Ok(())
}
