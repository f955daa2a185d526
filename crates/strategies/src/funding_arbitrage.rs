use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use trading_core::{MarketSample, Position, Signal, SignalAction, TrendContext};

use crate::error::StrategyResult;
use crate::strategy::{close_signal, percent_levels, position_for, Strategy, StrategyControls};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FundingArbitrageParams {
    /// Minimum |funding rate| per interval
    pub min_funding_rate: f64,
    /// Enter only this many minutes before the funding timestamp
    pub entry_window_minutes: i64,
    /// Spread above which quote quality is considered zero
    pub max_spread_percent: f64,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
}

impl Default for FundingArbitrageParams {
    fn default() -> Self {
        Self {
            min_funding_rate: 0.0005,
            entry_window_minutes: 60,
            max_spread_percent: 0.5,
            stop_loss_percent: 0.5,
            take_profit_percent: 1.0,
        }
    }
}

/// Takes the receiving side of an extreme funding rate shortly before it is
/// charged and exits once the funding timestamp has passed.
pub struct FundingArbitrageStrategy {
    params: FundingArbitrageParams,
    controls: StrategyControls,
    /// Funding timestamp targeted by the last entry, per instrument
    targets: HashMap<String, DateTime<Utc>>,
}

impl FundingArbitrageStrategy {
    pub const NAME: &'static str = "funding_arbitrage";

    pub fn new(params: FundingArbitrageParams) -> Self {
        Self {
            params,
            controls: StrategyControls::default(),
            targets: HashMap::new(),
        }
    }

    pub fn params(&self) -> &FundingArbitrageParams {
        &self.params
    }

    fn check_exit(&mut self, position: &Position, last: &MarketSample) -> Option<Signal> {
        let now = last.timestamp;
        let collected = match self.targets.get(&position.instrument) {
            Some(target) => now >= *target,
            // Unknown target (e.g. after restart): give up after one window
            None => now - position.opened_at > Duration::minutes(self.params.entry_window_minutes),
        };
        if !collected {
            return None;
        }
        self.targets.remove(&position.instrument);
        Some(close_signal(
            Self::NAME,
            position,
            last.close,
            now,
            "funding collected",
        ))
    }
}

impl Default for FundingArbitrageStrategy {
    fn default() -> Self {
        Self::new(FundingArbitrageParams::default())
    }
}

impl Strategy for FundingArbitrageStrategy {
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

        if let Some(position) = position_for(positions, &last.instrument) {
            if position.strategy == Self::NAME {
                return Ok(self.check_exit(position, last));
            }
        }

        let p = &self.params;
        let Some(funding) = last.funding else {
            return Ok(None);
        };
        if funding.rate.abs() < p.min_funding_rate {
            return Ok(None);
        }
        let minutes_left = (funding.next_funding_time - last.timestamp).num_seconds() as f64 / 60.0;
        if minutes_left <= 0.0 || minutes_left > p.entry_window_minutes as f64 {
            return Ok(None);
        }
        if self.targets.get(&last.instrument) == Some(&funding.next_funding_time) {
            return Ok(None);
        }

        // Longs pay shorts when the rate is positive
        let action = if funding.rate > 0.0 {
            SignalAction::Sell
        } else {
            SignalAction::Buy
        };

        let strength = (funding.rate.abs() / (p.min_funding_rate * 2.0)).min(1.0);
        let urgency = 1.0 - minutes_left / p.entry_window_minutes as f64;
        let quality = if last.has_quote() {
            (1.0 - last.spread_percent() / p.max_spread_percent).clamp(0.0, 1.0)
        } else {
            0.5
        };
        let confidence = 0.5 + 0.3 * urgency + 0.2 * quality;

        let price = last.close;
        let (stop_loss, take_profit) =
            percent_levels(action, price, p.stop_loss_percent, p.take_profit_percent);

        self.targets
            .insert(last.instrument.clone(), funding.next_funding_time);

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
            .with_indicator("funding_rate", funding.rate)
            .with_indicator("minutes_to_funding", minutes_left)
            .with_reason(format!(
                "Funding {:.4}% due in {:.0} min",
                funding.rate * 100.0,
                minutes_left
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
