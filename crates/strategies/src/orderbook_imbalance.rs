use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use technical_analysis::weighted_depth;
use trading_core::{MarketSample, Position, PositionSide, Signal, SignalAction, TrendContext};

use crate::error::StrategyResult;
use crate::strategy::{
    close_signal, percent_levels, position_for, seconds_since, Strategy, StrategyControls,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderBookImbalanceParams {
    /// Book levels considered per side
    pub depth: usize,
    /// Exponential decay applied per level
    pub depth_decay: f64,
    /// bid/ask pressure ratio needed to buy (its inverse to sell)
    pub ratio_threshold: f64,
    pub max_spread_percent: f64,
    pub cooldown_seconds: i64,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
}

impl Default for OrderBookImbalanceParams {
    fn default() -> Self {
        Self {
            depth: 10,
            depth_decay: 0.3,
            ratio_threshold: 1.5,
            max_spread_percent: 0.5,
            cooldown_seconds: 30,
            stop_loss_percent: 0.3,
            take_profit_percent: 0.6,
        }
    }
}

pub struct OrderBookImbalanceStrategy {
    params: OrderBookImbalanceParams,
    controls: StrategyControls,
    last_trade: HashMap<String, DateTime<Utc>>,
}

impl OrderBookImbalanceStrategy {
    pub const NAME: &'static str = "orderbook_imbalance";

    pub fn new(params: OrderBookImbalanceParams) -> Self {
        Self {
            params,
            controls: StrategyControls::default(),
            last_trade: HashMap::new(),
        }
    }

    pub fn params(&self) -> &OrderBookImbalanceParams {
        &self.params
    }

    /// Depth-weighted bid pressure over ask pressure, if both sides have size.
    pub fn pressure_ratio(&self, sample: &MarketSample) -> Option<f64> {
        let book = sample.order_book.as_ref()?;
        let bids = weighted_depth(&book.bids, self.params.depth, self.params.depth_decay);
        let asks = weighted_depth(&book.asks, self.params.depth, self.params.depth_decay);
        if bids <= 0.0 || asks <= 0.0 {
            return None;
        }
        Some(bids / asks)
    }
}

impl Default for OrderBookImbalanceStrategy {
    fn default() -> Self {
        Self::new(OrderBookImbalanceParams::default())
    }
}

impl Strategy for OrderBookImbalanceStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn required_history_length(&self) -> usize {
        1
    }

    fn analyze(
        &mut self,
        history: &[MarketSample],
        positions: &[Position],
        _trend: Option<&TrendContext>,
    ) -> StrategyResult<Option<Signal>> {
        let Some(last) = history.last() else {
            return Ok(None);
        };
        let Some(ratio) = self.pressure_ratio(last) else {
            return Ok(None);
        };
        let p = &self.params;
        let price = last.mid();

        if let Some(position) = position_for(positions, &last.instrument) {
            if position.strategy == Self::NAME {
                let reversed = match position.side {
                    PositionSide::Long => ratio < 1.0,
                    PositionSide::Short => ratio > 1.0,
                };
                if reversed {
                    self.last_trade.insert(last.instrument.clone(), last.timestamp);
                    return Ok(Some(close_signal(
                        Self::NAME,
                        position,
                        price,
                        last.timestamp,
                        "book imbalance reversed",
                    )));
                }
                return Ok(None);
            }
        }

        let cooling = self
            .last_trade
            .get(&last.instrument)
            .map(|t| seconds_since(*t, last.timestamp) < p.cooldown_seconds)
            .unwrap_or(false);
        if cooling {
            return Ok(None);
        }

        let (action, edge) = if ratio >= p.ratio_threshold {
            (SignalAction::Buy, ratio / p.ratio_threshold)
        } else if ratio <= 1.0 / p.ratio_threshold {
            (SignalAction::Sell, (1.0 / ratio) / p.ratio_threshold)
        } else {
            return Ok(None);
        };

        let depth_quality = last
            .order_book
            .as_ref()
            .map(|b| b.depth().min(p.depth) as f64 / p.depth.max(1) as f64)
            .unwrap_or(0.0);
        let tightness = if last.has_quote() {
            (1.0 - last.spread_percent() / p.max_spread_percent).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let strength = 0.5 + (edge - 1.0) * 0.5;
        let confidence = 0.4 + 0.3 * depth_quality + 0.3 * tightness;

        let (stop_loss, take_profit) =
            percent_levels(action, price, p.stop_loss_percent, p.take_profit_percent);
        self.last_trade.insert(last.instrument.clone(), last.timestamp);

        Ok(Some(
            Signal::new(
                last.instrument.clone(),
                action,
                Self::NAME,
                strength,
                confidence,
                last.timestamp,
            )
            .with_levels(price, stop_loss, take_profit)
            .with_indicator("pressure_ratio", ratio)
            .with_indicator("depth_quality", depth_quality)
            .with_reason(format!("Depth-weighted bid/ask pressure {:.2}", ratio)),
        ))
    }

    fn controls(&self) -> &StrategyControls {
        &self.controls
    }

    fn controls_mut(&mut self) -> &mut StrategyControls {
        &mut self.controls
    }
}
