//! EMA-crossover scalping with tight fixed exits.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use technical_analysis::{average_volume, bollinger_bands, closes, ema, last_value, rsi, value_back};
use tracing::debug;
use trading_core::{MarketSample, Position, PositionSide, Signal, SignalAction, TrendContext};

use crate::error::{StrategyError, StrategyResult};
use crate::strategy::{
    apply_trend, close_signal, percent_levels, pnl_percent_at, position_for, seconds_since,
    Strategy, StrategyControls,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalpingParams {
    pub fast_ema: usize,
    pub slow_ema: usize,
    pub rsi_period: usize,
    pub rsi_buy_min: f64,
    pub rsi_buy_max: f64,
    pub rsi_sell_min: f64,
    pub rsi_sell_max: f64,
    pub volume_lookback: usize,
    pub volume_multiplier: f64,
    pub bb_period: usize,
    pub bb_std_dev: f64,
    /// Bollinger bandwidth under which the squeeze bonus applies
    pub squeeze_bandwidth: f64,
    pub take_profit_percent: f64,
    pub stop_loss_percent: f64,
    pub trailing_activation_percent: f64,
    pub trailing_distance_percent: f64,
    pub max_hold_minutes: i64,
    /// |pnl%| under which a position counts as flat for the time-boxed exit
    pub flat_threshold_percent: f64,
    pub min_hold_seconds: i64,
    pub cooldown_seconds: i64,
}

impl Default for ScalpingParams {
    fn default() -> Self {
        Self {
            fast_ema: 9,
            slow_ema: 21,
            rsi_period: 14,
            rsi_buy_min: 35.0,
            rsi_buy_max: 70.0,
            rsi_sell_min: 30.0,
            rsi_sell_max: 65.0,
            volume_lookback: 20,
            volume_multiplier: 1.2,
            bb_period: 20,
            bb_std_dev: 2.0,
            squeeze_bandwidth: 0.02,
            take_profit_percent: 0.6,
            stop_loss_percent: 0.3,
            trailing_activation_percent: 0.3,
            trailing_distance_percent: 0.15,
            max_hold_minutes: 30,
            flat_threshold_percent: 0.1,
            min_hold_seconds: 60,
            cooldown_seconds: 120,
        }
    }
}

pub struct ScalpingStrategy {
    params: ScalpingParams,
    controls: StrategyControls,
    /// Last emission per instrument
    last_trade: HashMap<String, DateTime<Utc>>,
    /// Trailing stop price per position id
    trailing_stops: HashMap<String, f64>,
}

impl ScalpingStrategy {
    pub const NAME: &'static str = "scalping";

    pub fn new(params: ScalpingParams) -> Self {
        Self {
            params,
            controls: StrategyControls::default(),
            last_trade: HashMap::new(),
            trailing_stops: HashMap::new(),
        }
    }

    pub fn params(&self) -> &ScalpingParams {
        &self.params
    }

    fn in_cooldown(&self, instrument: &str, now: DateTime<Utc>) -> bool {
        self.last_trade
            .get(instrument)
            .map(|t| seconds_since(*t, now) < self.params.cooldown_seconds)
            .unwrap_or(false)
    }

    fn check_exit(&mut self, position: &Position, price: f64, now: DateTime<Utc>) -> Option<Signal> {
        let p = self.params.clone();
        let pnl_percent = pnl_percent_at(position, price);
        let held_seconds = seconds_since(position.opened_at, now);

        // The stop is honoured even inside the minimum holding period
        if pnl_percent <= -p.stop_loss_percent {
            return Some(self.exit(position, price, now, "scalping stop loss"));
        }
        if held_seconds < p.min_hold_seconds {
            return None;
        }
        if pnl_percent >= p.take_profit_percent {
            return Some(self.exit(position, price, now, "scalping take profit"));
        }

        if pnl_percent >= p.trailing_activation_percent {
            let distance = p.trailing_distance_percent / 100.0;
            let candidate = match position.side {
                PositionSide::Long => price * (1.0 - distance),
                PositionSide::Short => price * (1.0 + distance),
            };
            let stop = self
                .trailing_stops
                .entry(position.id.clone())
                .or_insert(candidate);
            *stop = match position.side {
                PositionSide::Long => stop.max(candidate),
                PositionSide::Short => stop.min(candidate),
            };
        }
        if let Some(&stop) = self.trailing_stops.get(&position.id) {
            let hit = match position.side {
                PositionSide::Long => price <= stop,
                PositionSide::Short => price >= stop,
            };
            if hit {
                return Some(self.exit(position, price, now, "scalping trailing stop"));
            }
        }

        if held_seconds / 60 >= p.max_hold_minutes && pnl_percent.abs() < p.flat_threshold_percent {
            return Some(self.exit(position, price, now, "scalping time exit"));
        }
        None
    }

    fn exit(&mut self, position: &Position, price: f64, now: DateTime<Utc>, reason: &str) -> Signal {
        self.trailing_stops.remove(&position.id);
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
        let prices = closes(history);

        let fast = ema(&prices, p.fast_ema);
        let slow = ema(&prices, p.slow_ema);
        let (Some(fast_now), Some(slow_now), Some(fast_prev), Some(slow_prev)) = (
            value_back(&fast, 0),
            value_back(&slow, 0),
            value_back(&fast, 1),
            value_back(&slow, 1),
        ) else {
            return Err(StrategyError::IndicatorUnavailable("ema"));
        };
        let rsi_now =
            last_value(&rsi(&prices, p.rsi_period)).ok_or(StrategyError::IndicatorUnavailable("rsi"))?;

        let lookback_start = history.len().saturating_sub(p.volume_lookback + 1);
        let avg_volume = average_volume(&history[lookback_start..history.len() - 1]);
        let volume_ratio = if avg_volume > 0.0 { last.volume / avg_volume } else { 0.0 };
        if volume_ratio < p.volume_multiplier {
            return Ok(None);
        }

        let bullish_cross = fast_prev <= slow_prev && fast_now > slow_now;
        let bearish_cross = fast_prev >= slow_prev && fast_now < slow_now;

        let action = if bullish_cross && (p.rsi_buy_min..=p.rsi_buy_max).contains(&rsi_now) {
            SignalAction::Buy
        } else if bearish_cross && (p.rsi_sell_min..=p.rsi_sell_max).contains(&rsi_now) {
            SignalAction::Sell
        } else {
            return Ok(None);
        };

        let separation = if slow_now != 0.0 {
            (fast_now - slow_now).abs() / slow_now * 100.0
        } else {
            0.0
        };
        let mut strength = 0.5
            + (separation * 10.0).min(0.25)
            + ((volume_ratio - p.volume_multiplier) * 0.1).min(0.15);
        let mut confidence = 0.6;

        let bandwidth = bollinger_bands(&prices, p.bb_period, p.bb_std_dev).last_bandwidth();
        let squeeze = bandwidth.map(|b| b < p.squeeze_bandwidth).unwrap_or(false);
        if squeeze {
            strength *= 1.2;
            confidence += 0.1;
        }
        let (strength, confidence) = apply_trend(strength, confidence, action, trend);

        let price = last.close;
        let (stop_loss, take_profit) =
            percent_levels(action, price, p.stop_loss_percent, p.take_profit_percent);

        let signal = Signal::new(
            last.instrument.clone(),
            action,
            Self::NAME,
            strength,
            confidence,
            last.timestamp,
        )
        .with_levels(price, stop_loss, take_profit)
        .with_indicator("ema_fast", fast_now)
        .with_indicator("ema_slow", slow_now)
        .with_indicator("rsi", rsi_now)
        .with_indicator("volume_ratio", volume_ratio)
        .with_indicator("bb_bandwidth", bandwidth.unwrap_or(f64::NAN))
        .with_reason(format!(
            "EMA{}/{} {} crossover, RSI {:.1}, volume {:.1}x{}",
            p.fast_ema,
            p.slow_ema,
            if action == SignalAction::Buy { "bullish" } else { "bearish" },
            rsi_now,
            volume_ratio,
            if squeeze { ", squeeze" } else { "" }
        ));

        debug!(instrument = %last.instrument, action = %action, "Scalping entry");
        self.last_trade.insert(last.instrument.clone(), last.timestamp);
        Ok(Some(signal))
    }
}

impl Default for ScalpingStrategy {
    fn default() -> Self {
        Self::new(ScalpingParams::default())
    }
}

impl Strategy for ScalpingStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn required_history_length(&self) -> usize {
        let p = &self.params;
        p.slow_ema
            .max(p.bb_period)
            .max(p.rsi_period + 1)
            .max(p.volume_lookback + 1)
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
        self.trailing_stops
            .retain(|id, _| positions.iter().any(|p| &p.id == id));

        let last = &history[history.len() - 1];
        if let Some(position) = position_for(positions, &last.instrument) {
            if position.strategy == Self::NAME {
                return Ok(self.check_exit(position, last.close, last.timestamp));
            }
        }

        if self.in_cooldown(&last.instrument, last.timestamp) {
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
    use crate::test_support::{flat_history, open_position, sample_at};
    use chrono::Duration;

    /// Declining zig-zag followed by a rising zig-zag; EMA9 crosses EMA21
    /// somewhere in the rising leg.
    fn crossover_history() -> Vec<MarketSample> {
        let mut closes = Vec::new();
        let mut price = 120.0;
        for i in 0..40 {
            price += if i % 2 == 0 { -1.0 } else { 0.6 };
            closes.push(price);
        }
        for i in 0..40 {
            price += if i % 2 == 0 { 1.0 } else { -0.6 };
            closes.push(price);
        }
        closes
            .into_iter()
            .enumerate()
            .map(|(i, c)| sample_at(i, c, 1000.0))
            .collect()
    }

    #[test]
    fn test_bullish_crossover_with_volume_emits_buy() {
        let history = crossover_history();
        let prices = closes(&history);
        let fast = ema(&prices, 9);
        let slow = ema(&prices, 21);
        let cross = (41..history.len())
            .find(|&i| {
                fast[i - 1].unwrap() <= slow[i - 1].unwrap() && fast[i].unwrap() > slow[i].unwrap()
            })
            .expect("rising leg crosses");
        let rsi_at_cross = rsi(&prices, 14)[cross].unwrap();
        assert!((35.0..=70.0).contains(&rsi_at_cross));

        let mut window = history[..=cross].to_vec();
        window.last_mut().unwrap().volume = 5000.0;

        let mut strategy = ScalpingStrategy::default();
        let signal = strategy.analyze(&window, &[], None).unwrap().expect("signal");
        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.strategy, "scalping");
        assert!(signal.stop_loss.unwrap() < signal.entry_price.unwrap());
        assert!(signal.take_profit.unwrap() > signal.entry_price.unwrap());
        assert!(signal.strength <= 1.0 && signal.confidence <= 1.0);

        // Cooldown blocks an immediate second entry
        assert!(strategy.analyze(&window, &[], None).unwrap().is_none());
    }

    #[test]
    fn test_crossover_without_volume_is_ignored() {
        let history = crossover_history();
        let prices = closes(&history);
        let fast = ema(&prices, 9);
        let slow = ema(&prices, 21);
        let cross = (41..history.len())
            .find(|&i| {
                fast[i - 1].unwrap() <= slow[i - 1].unwrap() && fast[i].unwrap() > slow[i].unwrap()
            })
            .unwrap();
        let mut strategy = ScalpingStrategy::default();
        assert!(strategy.analyze(&history[..=cross], &[], None).unwrap().is_none());
    }

    #[test]
    fn test_short_history_emits_nothing() {
        let mut strategy = ScalpingStrategy::default();
        let history = flat_history(5, 100.0);
        assert!(strategy.analyze(&history, &[], None).unwrap().is_none());
    }

    #[test]
    fn test_take_profit_and_stop_loss_exits() {
        let mut history = flat_history(40, 100.0);
        let now = history.last().unwrap().timestamp;
        let position = open_position("scalping", PositionSide::Long, 100.0, now - Duration::minutes(10));

        history.last_mut().unwrap().close = 100.7;
        let mut strategy = ScalpingStrategy::default();
        let signal = strategy
            .analyze(&history, std::slice::from_ref(&position), None)
            .unwrap()
            .expect("take profit");
        assert_eq!(signal.action, SignalAction::Close);
        assert!(signal.position_context.is_some());

        history.last_mut().unwrap().close = 99.6;
        let mut strategy = ScalpingStrategy::default();
        let signal = strategy
            .analyze(&history, std::slice::from_ref(&position), None)
            .unwrap()
            .expect("stop loss");
        assert_eq!(signal.reason, "scalping stop loss");
    }

    #[test]
    fn test_minimum_hold_blocks_take_profit() {
        let mut history = flat_history(40, 100.0);
        let now = history.last().unwrap().timestamp;
        let position = open_position("scalping", PositionSide::Long, 100.0, now - Duration::seconds(30));
        history.last_mut().unwrap().close = 100.7;

        let mut strategy = ScalpingStrategy::default();
        assert!(strategy
            .analyze(&history, std::slice::from_ref(&position), None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_time_boxed_flat_exit() {
        let mut history = flat_history(40, 100.0);
        let now = history.last().unwrap().timestamp;
        let position = open_position("scalping", PositionSide::Long, 100.0, now - Duration::minutes(40));
        history.last_mut().unwrap().close = 100.05;

        let mut strategy = ScalpingStrategy::default();
        let signal = strategy
            .analyze(&history, std::slice::from_ref(&position), None)
            .unwrap()
            .expect("time exit");
        assert_eq!(signal.reason, "scalping time exit");
    }

    #[test]
    fn test_trailing_stop_after_profit() {
        let mut history = flat_history(40, 100.0);
        let now = history.last().unwrap().timestamp;
        let position = open_position("scalping", PositionSide::Long, 100.0, now - Duration::minutes(5));
        let mut strategy = ScalpingStrategy::default();

        // +0.5%: trailing armed at 100.5 * (1 - 0.0015)
        history.last_mut().unwrap().close = 100.5;
        assert!(strategy
            .analyze(&history, std::slice::from_ref(&position), None)
            .unwrap()
            .is_none());

        history.last_mut().unwrap().close = 100.3;
        let signal = strategy
            .analyze(&history, std::slice::from_ref(&position), None)
            .unwrap()
            .expect("trailing stop");
        assert_eq!(signal.reason, "scalping trailing stop");
    }

    #[test]
    fn test_params_deserialize_with_defaults() {
        let params: ScalpingParams =
            serde_json::from_value(serde_json::json!({ "fast_ema": 5 })).unwrap();
        assert_eq!(params.fast_ema, 5);
        assert_eq!(params.slow_ema, 21);
    }
}
