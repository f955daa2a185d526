//! Autonomous trading engine: market data refresh, signal fusion, advisory
//! review, risk checks and execution in one control loop.

pub mod advisory_gate;
pub mod config;
pub mod engine;
pub mod events;
pub mod executor;
pub mod market_cache;
pub mod metrics;
pub mod paper;
pub mod persistence;
pub mod position_monitor;

#[cfg(test)]
mod test_support;

pub use config::AgentConfig;
pub use engine::{EngineCommand, EngineDeps, EngineHandle, EngineStatus, TradingEngine};
pub use events::{EngineEvent, EngineState, EventBus};
pub use metrics::{AgentMetrics, MetricsSnapshot};
pub use paper::{PaperBroker, SimulatedMarket, SimulationConfig};
pub use persistence::SqlitePersistence;
