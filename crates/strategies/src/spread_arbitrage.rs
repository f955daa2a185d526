use serde::{Deserialize, Serialize};
use technical_analysis::{closes, mean, order_book_imbalance, std_dev};
use trading_core::{MarketSample, Position, Signal, SignalAction, TrendContext};

use crate::error::StrategyResult;
use crate::strategy::{close_signal, percent_levels, position_for, Strategy, StrategyControls};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpreadArbitrageParams {
    pub min_spread_percent: f64,
    pub max_spread_percent: f64,
    /// Closes used for the price-stability check
    pub stability_window: usize,
    /// Max std-dev of recent closes, as a percent of their mean
    pub max_price_std_percent: f64,
    /// Minimum |bid/ask size imbalance| to pick a side
    pub min_size_imbalance: f64,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
}

impl Default for SpreadArbitrageParams {
    fn default() -> Self {
        Self {
            min_spread_percent: 0.05,
            max_spread_percent: 0.5,
            stability_window: 10,
            max_price_std_percent: 0.2,
            min_size_imbalance: 0.1,
            stop_loss_percent: 0.2,
            take_profit_percent: 0.4,
        }
    }
}

/// Captures a wide-but-bounded bid/ask spread while price is stable,
/// leaning to the side with more resting size.
pub struct SpreadArbitrageStrategy {
    params: SpreadArbitrageParams,
    controls: StrategyControls,
}

impl SpreadArbitrageStrategy {
    pub const NAME: &'static str = "spread_arbitrage";

    pub fn new(params: SpreadArbitrageParams) -> Self {
        Self {
            params,
            controls: StrategyControls::default(),
        }
    }

    pub fn params(&self) -> &SpreadArbitrageParams {
        &self.params
    }

    fn price_std_percent(&self, history: &[MarketSample]) -> f64 {
        let recent = &history[history.len().saturating_sub(self.params.stability_window)..];
        let prices = closes(recent);
        let avg = mean(&prices);
        if avg <= 0.0 {
            return f64::INFINITY;
        }
        std_dev(&prices) / avg * 100.0
    }
}

impl Default for SpreadArbitrageStrategy {
    fn default() -> Self {
        Self::new(SpreadArbitrageParams::default())
    }
}

impl Strategy for SpreadArbitrageStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn required_history_length(&self) -> usize {
        self.params.stability_window.max(2)
    }

    fn analyze(
        &mut self,
        history: &[MarketSample],
        positions: &[Position],
        _trend: Option<&TrendContext>,
    ) -> StrategyResult<Option<Signal>> {
        if history.len() < self.required_history_length() {
            return Ok(None);
        }
        let p = &self.params;
        let last = &history[history.len() - 1];
        if !last.has_quote() {
            return Ok(None);
        }
        let spread_percent = last.spread_percent();
        let mid = last.mid();

        if let Some(position) = position_for(positions, &last.instrument) {
            if position.strategy == Self::NAME {
                if spread_percent < p.min_spread_percent {
                    return Ok(Some(close_signal(
                        Self::NAME,
                        position,
                        mid,
                        last.timestamp,
                        "spread collapsed",
                    )));
                }
                return Ok(None);
            }
        }

        if spread_percent < p.min_spread_percent || spread_percent > p.max_spread_percent {
            return Ok(None);
        }
        let std_percent = self.price_std_percent(history);
        if std_percent > p.max_price_std_percent {
            return Ok(None);
        }

        let imbalance = order_book_imbalance(last.bid_size, last.ask_size);
        if imbalance.abs() < p.min_size_imbalance {
            return Ok(None);
        }
        let action = if imbalance > 0.0 {
            SignalAction::Buy
        } else {
            SignalAction::Sell
        };

        let band = (p.max_spread_percent - p.min_spread_percent).max(f64::EPSILON);
        let edge = ((spread_percent - p.min_spread_percent) / band).clamp(0.0, 1.0);
        let stability = (1.0 - std_percent / p.max_price_std_percent).clamp(0.0, 1.0);
        let tightness = (1.0 - spread_percent / p.max_spread_percent).clamp(0.0, 1.0);
        let confidence = 0.4 * edge + 0.3 * stability + 0.3 * tightness;
        let strength = 0.4 + 0.6 * imbalance.abs();

        let (stop_loss, take_profit) =
            percent_levels(action, mid, p.stop_loss_percent, p.take_profit_percent);

        Ok(Some(
            Signal::new(
                last.instrument.clone(),
                action,
                Self::NAME,
                strength,
                confidence,
                last.timestamp,
            )
            .with_levels(mid, stop_loss, take_profit)
            .with_indicator("spread_percent", spread_percent)
            .with_indicator("price_std_percent", std_percent)
            .with_indicator("size_imbalance", imbalance)
            .with_reason(format!(
                "Spread {:.3}% with {:.2} size imbalance",
                spread_percent, imbalance
            )),
        ))
    }

    fn controls(&self) -> &StrategyControls {
        &self.controls
    }

    fn controls_mut(&mut self) -> &mut StrategyControls {
        &mut self.controls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{flat_history, open_position};
    use chrono::Duration;
    use trading_core::PositionSide;

    fn quoted(mut history: Vec<MarketSample>, spread: f64, bid_size: f64, ask_size: f64) -> Vec<MarketSample> {
        for s in history.iter_mut() {
            s.bid = s.close - spread / 2.0;
            s.ask = s.close + spread / 2.0;
            s.spread = spread;
            s.bid_size = bid_size;
            s.ask_size = ask_size;
        }
        history
    }

    #[test]
    fn test_buy_on_bid_heavy_book() {
        let history = quoted(flat_history(20, 100.0), 0.1, 3.0, 1.0);
        let mut strategy = SpreadArbitrageStrategy::default();
        let signal = strategy.analyze(&history, &[], None).unwrap().expect("signal");
        assert_eq!(signal.action, SignalAction::Buy);
        assert!(signal.confidence > 0.0 && signal.confidence <= 1.0);
        assert!((signal.reward_risk().unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_sell_on_ask_heavy_book() {
        let history = quoted(flat_history(20, 100.0), 0.1, 1.0, 3.0);
        let mut strategy = SpreadArbitrageStrategy::default();
        let signal = strategy.analyze(&history, &[], None).unwrap().expect("signal");
        assert_eq!(signal.action, SignalAction::Sell);
    }

    #[test]
    fn test_spread_outside_band_is_ignored() {
        let mut strategy = SpreadArbitrageStrategy::default();
        let wide = quoted(flat_history(20, 100.0), 1.0, 3.0, 1.0);
        assert!(strategy.analyze(&wide, &[], None).unwrap().is_none());
        let tight = quoted(flat_history(20, 100.0), 0.01, 3.0, 1.0);
        assert!(strategy.analyze(&tight, &[], None).unwrap().is_none());
    }

    #[test]
    fn test_unstable_prices_are_ignored() {
        let mut history = flat_history(20, 100.0);
        for (i, s) in history.iter_mut().enumerate() {
            s.close = if i % 2 == 0 { 99.0 } else { 101.0 };
        }
        let history = quoted(history, 0.1, 3.0, 1.0);
        let mut strategy = SpreadArbitrageStrategy::default();
        assert!(strategy.analyze(&history, &[], None).unwrap().is_none());
    }

    #[test]
    fn test_close_when_spread_collapses() {
        let history = quoted(flat_history(20, 100.0), 0.01, 3.0, 1.0);
        let now = history.last().unwrap().timestamp;
        let position = open_position(
            "spread_arbitrage",
            PositionSide::Long,
            100.0,
            now - Duration::minutes(2),
        );
        let mut strategy = SpreadArbitrageStrategy::default();
        let signal = strategy
            .analyze(&history, std::slice::from_ref(&position), None)
            .unwrap()
            .expect("close");
        assert_eq!(signal.action, SignalAction::Close);
        assert_eq!(signal.reason, "spread collapsed");
    }
}
