//! Trading strategies: a common trait, a closed enum of the built-in
//! variants, and per-variant parameter sets.

pub mod error;
pub mod funding_arbitrage;
pub mod kind;
pub mod momentum;
pub mod orderbook_imbalance;
pub mod scalping;
pub mod spread_arbitrage;
pub mod strategy;

#[cfg(test)]
mod test_support;

pub use error::{StrategyError, StrategyResult};
pub use funding_arbitrage::{FundingArbitrageParams, FundingArbitrageStrategy};
pub use kind::{StrategyKind, STRATEGY_NAMES};
pub use momentum::{MomentumParams, MomentumStrategy};
pub use orderbook_imbalance::{OrderBookImbalanceParams, OrderBookImbalanceStrategy};
pub use scalping::{ScalpingParams, ScalpingStrategy};
pub use spread_arbitrage::{SpreadArbitrageParams, SpreadArbitrageStrategy};
pub use strategy::{Strategy, StrategyControls};
