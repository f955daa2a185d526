//! VWAP breakout momentum with a trailing stop.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use technical_analysis::{average_volume, closes, highest_high, last_value, lowest_low, rsi, vwap};
use tracing::debug;
use trading_core::{MarketSample, Position, PositionSide, Signal, SignalAction, TrendContext};

use crate::error::{StrategyError, StrategyResult};
use crate::strategy::{
    apply_trend, close_signal, percent_levels, pnl_percent_at, position_for, seconds_since,
    Strategy, StrategyControls,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumParams {
    /// Minimum distance of price from VWAP, in percent
    pub vwap_threshold_percent: f64,
    pub volume_lookback: usize,
    pub volume_multiplier: f64,
    pub rsi_period: usize,
    pub rsi_buy_threshold: f64,
    pub rsi_sell_threshold: f64,
    pub breakout_lookback: usize,
    pub trailing_stop_percent: f64,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub cooldown_seconds: i64,
}

impl Default for MomentumParams {
    fn default() -> Self {
        Self {
            vwap_threshold_percent: 0.2,
            volume_lookback: 20,
            volume_multiplier: 1.5,
            rsi_period: 14,
            rsi_buy_threshold: 55.0,
            rsi_sell_threshold: 45.0,
            breakout_lookback: 20,
            trailing_stop_percent: 1.0,
            stop_loss_percent: 1.5,
            take_profit_percent: 3.0,
            cooldown_seconds: 300,
        }
    }
}

pub struct MomentumStrategy {
    params: MomentumParams,
    controls: StrategyControls,
    last_trade: HashMap<String, DateTime<Utc>>,
    /// Most favourable price seen per position id
    extremes: HashMap<String, f64>,
}

impl MomentumStrategy {
    pub const NAME: &'static str = "momentum";

    pub fn new(params: MomentumParams) -> Self {
        Self {
            params,
            controls: StrategyControls::default(),
            last_trade: HashMap::new(),
            extremes: HashMap::new(),
        }
    }

    pub fn params(&self) -> &MomentumParams {
        &self.params
    }

    fn check_exit(&mut self, position: &Position, price: f64, now: DateTime<Utc>) -> Option<Signal> {
        let pnl_percent = pnl_percent_at(position, price);
        if pnl_percent <= -self.params.stop_loss_percent {
            return Some(self.exit(position, price, now, "momentum stop loss"));
        }
        if pnl_percent >= self.params.take_profit_percent {
            return Some(self.exit(position, price, now, "momentum take profit"));
        }

        let extreme = self
            .extremes
            .entry(position.id.clone())
            .or_insert(position.entry_price);
        *extreme = match position.side {
            PositionSide::Long => extreme.max(price),
            PositionSide::Short => extreme.min(price),
        };
        let extreme = *extreme;

        // Trail only once price has moved in our favour
        let distance = self.params.trailing_stop_percent / 100.0;
        let hit = match position.side {
            PositionSide::Long => {
                extreme > position.entry_price && price <= extreme * (1.0 - distance)
            }
            PositionSide::Short => {
                extreme < position.entry_price && price >= extreme * (1.0 + distance)
            }
        };
        if hit {
            return Some(self.exit(position, price, now, "momentum trailing stop"));
        }
        None
    }

    fn exit(&mut self, position: &Position, price: f64, now: DateTime<Utc>, reason: &str) -> Signal {
        self.extremes.remove(&position.id);
        self.last_trade.insert(position.instrument.clone(), now);
        close_signal(Self::NAME, position, price, now, reason)
    }

    fn check_entry(
        &mut self,
        history: &[MarketSample],
        trend: Option<&TrendContext>,
    ) -> StrategyResult<Option<Signal>> {
        let p = &self.params;
        let last = &history[history.len() - 1];
        let price = last.close;
        let prior = &history[..history.len() - 1];

        let vwap_now = last_value(&vwap(history)).ok_or(StrategyError::IndicatorUnavailable("vwap"))?;
        if vwap_now <= 0.0 {
            return Err(StrategyError::InvalidData(format!("non-positive VWAP for {}", last.instrument)));
        }
        let rsi_now = last_value(&rsi(&closes(history), p.rsi_period))
            .ok_or(StrategyError::IndicatorUnavailable("rsi"))?;

        let avg_volume = average_volume(&prior[prior.len().saturating_sub(p.volume_lookback)..]);
        let volume_ratio = if avg_volume > 0.0 { last.volume / avg_volume } else { 0.0 };
        if volume_ratio < p.volume_multiplier {
            return Ok(None);
        }

        let breakout_window = &prior[prior.len().saturating_sub(p.breakout_lookback)..];
        let deviation = (price - vwap_now) / vwap_now * 100.0;

        let action = match (highest_high(breakout_window), lowest_low(breakout_window)) {
            (Some(high), _)
                if deviation >= p.vwap_threshold_percent
                    && rsi_now > p.rsi_buy_threshold
                    && price > high =>
            {
                SignalAction::Buy
            }
            (_, Some(low))
                if deviation <= -p.vwap_threshold_percent
                    && rsi_now < p.rsi_sell_threshold
                    && price < low =>
            {
                SignalAction::Sell
            }
            _ => return Ok(None),
        };

        let strength = 0.5
            + (deviation.abs() / 2.0).min(0.25)
            + ((volume_ratio - p.volume_multiplier) * 0.1).min(0.25);
        let rsi_edge = match action {
            SignalAction::Buy => rsi_now - p.rsi_buy_threshold,
            _ => p.rsi_sell_threshold - rsi_now,
        };
        let confidence = 0.55 + (rsi_edge / 100.0).min(0.3);
        let (strength, confidence) = apply_trend(strength, confidence, action, trend);

        let (stop_loss, take_profit) =
            percent_levels(action, price, p.stop_loss_percent, p.take_profit_percent);

        debug!(instrument = %last.instrument, action = %action, deviation, "Momentum breakout");
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
            .with_indicator("vwap", vwap_now)
            .with_indicator("vwap_deviation_percent", deviation)
            .with_indicator("rsi", rsi_now)
            .with_indicator("volume_ratio", volume_ratio)
            .with_reason(format!(
                "{} breakout {:.2}% from VWAP on {:.1}x volume",
                if action == SignalAction::Buy { "Upside" } else { "Downside" },
                deviation,
                volume_ratio
            )),
        ))
    }
}

impl Default for MomentumStrategy {
    fn default() -> Self {
        Self::new(MomentumParams::default())
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn required_history_length(&self) -> usize {
        let p = &self.params;
        p.breakout_lookback
            .max(p.volume_lookback)
            .max(p.rsi_period)
            + 1
    }

    fn analyze(
        &mut self,
        history: &[MarketSample],
        positions: &[Position],
        trend: Option<&TrendContext>,
    ) -> StrategyResult<Option<Signal>> {
        if history.len() < self.required_history_length() {
            return Ok(None);
        }
        self.extremes.retain(|id, _| positions.iter().any(|p| &p.id == id));

        let last = &history[history.len() - 1];
        if let Some(position) = position_for(positions, &last.instrument) {
            if position.strategy == Self::NAME {
                return Ok(self.check_exit(position, last.close, last.timestamp));
            }
        }

        let cooling = self
            .last_trade
            .get(&last.instrument)
            .map(|t| seconds_since(*t, last.timestamp) < self.params.cooldown_seconds)
            .unwrap_or(false);
        if cooling {
            return Ok(None);
        }
        self.check_entry(history, trend)
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

    fn breakout_history(up: bool) -> Vec<MarketSample> {
        let mut history = flat_history(40, 100.0);
        let last = history.last_mut().unwrap();
        if up {
            last.close = 102.0;
            last.high = 102.2;
            last.low = 100.8;
        } else {
            last.close = 98.0;
            last.high = 99.2;
            last.low = 97.8;
        }
        last.volume = 5000.0;
        history
    }

    #[test]
    fn test_upside_breakout_emits_buy() {
        let mut strategy = MomentumStrategy::default();
        let signal = strategy
            .analyze(&breakout_history(true), &[], None)
            .unwrap()
            .expect("breakout");
        assert_eq!(signal.action, SignalAction::Buy);
        assert!(signal.indicators["vwap_deviation_percent"] > 0.2);
        let rr = signal.reward_risk().unwrap();
        assert!((rr - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_downside_breakout_emits_sell() {
        let mut strategy = MomentumStrategy::default();
        let signal = strategy
            .analyze(&breakout_history(false), &[], None)
            .unwrap()
            .expect("breakdown");
        assert_eq!(signal.action, SignalAction::Sell);
        assert!(signal.stop_loss.unwrap() > signal.entry_price.unwrap());
    }

    #[test]
    fn test_breakout_without_volume_is_ignored() {
        let mut history = breakout_history(true);
        history.last_mut().unwrap().volume = 1000.0;
        let mut strategy = MomentumStrategy::default();
        assert!(strategy.analyze(&history, &[], None).unwrap().is_none());
    }

    #[test]
    fn test_trailing_stop_from_extreme() {
        let params = MomentumParams {
            take_profit_percent: 10.0,
            ..MomentumParams::default()
        };
        let mut strategy = MomentumStrategy::new(params);
        let mut history = flat_history(40, 100.0);
        let now = history.last().unwrap().timestamp;
        let position = open_position("momentum", PositionSide::Long, 100.0, now - Duration::minutes(30));

        history.last_mut().unwrap().close = 104.0;
        assert!(strategy
            .analyze(&history, std::slice::from_ref(&position), None)
            .unwrap()
            .is_none());

        // 1% below the 104 extreme is 102.96
        history.last_mut().unwrap().close = 102.5;
        let signal = strategy
            .analyze(&history, std::slice::from_ref(&position), None)
            .unwrap()
            .expect("trailing stop");
        assert_eq!(signal.action, SignalAction::Close);
        assert_eq!(signal.reason, "momentum trailing stop");
    }

    #[test]
    fn test_positions_of_other_strategies_are_not_managed() {
        let mut history = flat_history(40, 100.0);
        let now = history.last().unwrap().timestamp;
        let position = open_position("scalping", PositionSide::Long, 100.0, now - Duration::minutes(30));
        history.last_mut().unwrap().close = 95.0;

        let mut strategy = MomentumStrategy::default();
        let result = strategy
            .analyze(&history, std::slice::from_ref(&position), None)
            .unwrap();
        assert!(result.map(|s| s.action != SignalAction::Close).unwrap_or(true));
    }
}
