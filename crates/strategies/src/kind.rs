use serde::de::DeserializeOwned;
use trading_core::{MarketSample, Position, Signal, StrategyConfig, TrendContext};

use crate::error::{StrategyError, StrategyResult};
use crate::funding_arbitrage::FundingArbitrageStrategy;
use crate::momentum::MomentumStrategy;
use crate::orderbook_imbalance::OrderBookImbalanceStrategy;
use crate::scalping::ScalpingStrategy;
use crate::spread_arbitrage::SpreadArbitrageStrategy;
use crate::strategy::{Strategy, StrategyControls};

/// Names of every built-in strategy, in default evaluation order.
pub const STRATEGY_NAMES: [&str; 5] = [
    ScalpingStrategy::NAME,
    MomentumStrategy::NAME,
    SpreadArbitrageStrategy::NAME,
    FundingArbitrageStrategy::NAME,
    OrderBookImbalanceStrategy::NAME,
];

/// Closed set of strategies run by the engine.
pub enum StrategyKind {
    Scalping(ScalpingStrategy),
    Momentum(MomentumStrategy),
    SpreadArbitrage(SpreadArbitrageStrategy),
    FundingArbitrage(FundingArbitrageStrategy),
    OrderBookImbalance(OrderBookImbalanceStrategy),
}

fn parse_params<P: DeserializeOwned + Default>(config: &StrategyConfig) -> StrategyResult<P> {
    if config.parameters.is_null() {
        return Ok(P::default());
    }
    serde_json::from_value(config.parameters.clone()).map_err(|source| {
        StrategyError::InvalidParameters {
            strategy: config.name.clone(),
            source,
        }
    })
}

impl StrategyKind {
    /// Build a strategy from its persisted configuration.
    pub fn from_config(config: &StrategyConfig) -> StrategyResult<Self> {
        let mut kind = match config.name.as_str() {
            ScalpingStrategy::NAME => Self::Scalping(ScalpingStrategy::new(parse_params(config)?)),
            MomentumStrategy::NAME => Self::Momentum(MomentumStrategy::new(parse_params(config)?)),
            SpreadArbitrageStrategy::NAME => {
                Self::SpreadArbitrage(SpreadArbitrageStrategy::new(parse_params(config)?))
            }
            FundingArbitrageStrategy::NAME => {
                Self::FundingArbitrage(FundingArbitrageStrategy::new(parse_params(config)?))
            }
            OrderBookImbalanceStrategy::NAME => {
                Self::OrderBookImbalance(OrderBookImbalanceStrategy::new(parse_params(config)?))
            }
            other => return Err(StrategyError::UnknownStrategy(other.to_string())),
        };
        kind.set_enabled(config.enabled);
        kind.set_weight(config.weight);
        Ok(kind)
    }

    /// All five strategies with default parameters.
    pub fn defaults() -> Vec<StrategyKind> {
        vec![
            Self::Scalping(ScalpingStrategy::default()),
            Self::Momentum(MomentumStrategy::default()),
            Self::SpreadArbitrage(SpreadArbitrageStrategy::default()),
            Self::FundingArbitrage(FundingArbitrageStrategy::default()),
            Self::OrderBookImbalance(OrderBookImbalanceStrategy::default()),
        ]
    }

    /// Default configuration rows matching `defaults()`.
    pub fn default_configs() -> Vec<StrategyConfig> {
        STRATEGY_NAMES.iter().map(|n| StrategyConfig::new(*n)).collect()
    }

    fn inner(&self) -> &dyn Strategy {
        match self {
            Self::Scalping(s) => s,
            Self::Momentum(s) => s,
            Self::SpreadArbitrage(s) => s,
            Self::FundingArbitrage(s) => s,
            Self::OrderBookImbalance(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Strategy {
        match self {
            Self::Scalping(s) => s,
            Self::Momentum(s) => s,
            Self::SpreadArbitrage(s) => s,
            Self::FundingArbitrage(s) => s,
            Self::OrderBookImbalance(s) => s,
        }
    }
}

impl Strategy for StrategyKind {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn required_history_length(&self) -> usize {
        self.inner().required_history_length()
    }

    fn analyze(
        &mut self,
        history: &[MarketSample],
        positions: &[Position],
        trend: Option<&TrendContext>,
    ) -> StrategyResult<Option<Signal>> {
        self.inner_mut().analyze(history, positions, trend)
    }

    fn controls(&self) -> &StrategyControls {
        self.inner().controls()
    }

    fn controls_mut(&mut self) -> &mut StrategyControls {
        self.inner_mut().controls_mut()
    }
}

impl std::fmt::Debug for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyKind")
            .field("name", &self.name())
            .field("controls", self.controls())
            .finish()
    }
}
