use chrono::Duration;
use serde::{Deserialize, Serialize};
use technical_analysis::{atr, last_value};
use trading_core::{reward_risk_ratio, MarketSample, Signal, SignalAction};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryExitConfig {
    /// Reject entries when the quoted spread exceeds this percent of mid
    pub max_spread_percent: f64,
    /// Minimum traded volume over the trailing 24h window
    pub min_volume_24h: f64,
    pub min_reward_risk: f64,
    pub atr_period: usize,
    pub atr_multiplier: f64,
    /// Stop distance used when ATR is unavailable, in percent
    pub fallback_stop_percent: f64,
    /// Fraction of the spread an improved entry moves inside the touch
    pub spread_improvement: f64,
}

impl Default for EntryExitConfig {
    fn default() -> Self {
        Self {
            max_spread_percent: 0.5,
            min_volume_24h: 1000.0,
            min_reward_risk: 1.5,
            atr_period: 14,
            atr_multiplier: 1.5,
            fallback_stop_percent: 2.0,
            spread_improvement: 0.1,
        }
    }
}

/// Result of an entry check
#[derive(Debug, Clone, PartialEq)]
pub struct EntryValidation {
    pub is_valid: bool,
    pub reason: Option<String>,
    pub improved_entry: Option<f64>,
}

impl EntryValidation {
    fn accept(improved_entry: Option<f64>) -> Self {
        Self {
            is_valid: true,
            reason: None,
            improved_entry,
        }
    }

    fn reject(reason: String) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason),
            improved_entry: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntryExitValidator {
    config: EntryExitConfig,
}

impl EntryExitValidator {
    pub fn new(config: EntryExitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EntryExitConfig {
        &self.config
    }

    /// Check spread, liquidity and reward:risk for an entry signal. Non-entry
    /// actions pass through untouched.
    pub fn validate_entry(&self, signal: &Signal, history: &[MarketSample]) -> EntryValidation {
        if !signal.action.is_entry() {
            return EntryValidation::accept(None);
        }
        let Some(last) = history.last() else {
            return EntryValidation::accept(None);
        };

        let spread_percent = last.spread_percent();
        if spread_percent > self.config.max_spread_percent {
            return EntryValidation::reject(format!(
                "spread {:.3}% exceeds {:.3}%",
                spread_percent, self.config.max_spread_percent
            ));
        }

        let volume_24h = trailing_volume(history, Duration::hours(24));
        if volume_24h < self.config.min_volume_24h {
            return EntryValidation::reject(format!(
                "24h volume {:.0} below {:.0}",
                volume_24h, self.config.min_volume_24h
            ));
        }

        let entry = signal.entry_price.unwrap_or(last.close);
        let stop = signal
            .stop_loss
            .unwrap_or_else(|| self.atr_stop_loss(signal.action, entry, history));
        let target = signal
            .take_profit
            .unwrap_or_else(|| take_profit_ladder(signal.action, entry, stop)[1]);
        match reward_risk_ratio(entry, stop, target) {
            Some(rr) if rr >= self.config.min_reward_risk => {}
            Some(rr) => {
                return EntryValidation::reject(format!(
                    "reward:risk {:.2} below {:.2}",
                    rr, self.config.min_reward_risk
                ))
            }
            None => return EntryValidation::reject("zero stop distance".to_string()),
        }

        let improved = if last.has_quote() {
            let spread = last.ask - last.bid;
            match signal.action {
                SignalAction::Buy => Some(last.bid + spread * self.config.spread_improvement),
                _ => Some(last.ask - spread * self.config.spread_improvement),
            }
        } else {
            None
        };
        EntryValidation::accept(improved)
    }

    /// ATR-multiple stop, direction-aware, with a percentage fallback.
    pub fn atr_stop_loss(&self, action: SignalAction, entry: f64, history: &[MarketSample]) -> f64 {
        let distance = last_value(&atr(history, self.config.atr_period))
            .filter(|a| *a > 0.0)
            .map(|a| a * self.config.atr_multiplier)
            .unwrap_or(entry * self.config.fallback_stop_percent / 100.0);
        match action {
            SignalAction::Sell => entry + distance,
            _ => entry - distance,
        }
    }
}

/// Take-profit levels at 1:1, 2:1 and 3:1 reward:risk.
pub fn take_profit_ladder(action: SignalAction, entry: f64, stop_loss: f64) -> [f64; 3] {
    let risk = (entry - stop_loss).abs();
    let direction = if action == SignalAction::Sell { -1.0 } else { 1.0 };
    [1.0, 2.0, 3.0].map(|k| entry + direction * risk * k)
}

/// Volume traded within `window` of the latest sample.
fn trailing_volume(history: &[MarketSample], window: Duration) -> f64 {
    let Some(last) = history.last() else {
        return 0.0;
    };
    let cutoff = last.timestamp - window;
    history
        .iter()
        .rev()
        .take_while(|s| s.timestamp > cutoff)
        .map(|s| s.volume)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn history(n: usize, close: f64, spread: f64, volume: f64) -> Vec<MarketSample> {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| MarketSample {
                instrument: "ETHUSDT".to_string(),
                timestamp: start + Duration::minutes(i as i64),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume,
                bid: close - spread / 2.0,
                ask: close + spread / 2.0,
                spread,
                bid_size: 1.0,
                ask_size: 1.0,
                order_book: None,
                funding: None,
            })
            .collect()
    }

    fn buy(entry: f64, stop: f64, target: f64) -> Signal {
        Signal::new("ETHUSDT", SignalAction::Buy, "scalping", 0.7, 0.7, Utc::now())
            .with_levels(entry, stop, target)
    }

    #[test]
    fn test_accepts_and_improves_entry() {
        let validator = EntryExitValidator::default();
        let data = history(30, 100.0, 0.2, 100.0);
        let result = validator.validate_entry(&buy(100.0, 99.0, 102.0), &data);
        assert!(result.is_valid);
        // bid 99.9 + 10% of 0.2
        assert!((result.improved_entry.unwrap() - 99.92).abs() < 1e-9);

        let sell = Signal::new("ETHUSDT", SignalAction::Sell, "scalping", 0.7, 0.7, Utc::now())
            .with_levels(100.0, 101.0, 98.0);
        let result = validator.validate_entry(&sell, &data);
        assert!((result.improved_entry.unwrap() - 100.08).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_wide_spread() {
        let validator = EntryExitValidator::default();
        let data = history(30, 100.0, 1.0, 100.0);
        let result = validator.validate_entry(&buy(100.0, 99.0, 102.0), &data);
        assert!(!result.is_valid);
        assert!(result.reason.unwrap().starts_with("spread"));
    }

    #[test]
    fn test_rejects_thin_volume() {
        let validator = EntryExitValidator::default();
        let data = history(30, 100.0, 0.2, 1.0);
        let result = validator.validate_entry(&buy(100.0, 99.0, 102.0), &data);
        assert!(!result.is_valid);
        assert!(result.reason.unwrap().starts_with("24h volume"));
    }

    #[test]
    fn test_rejects_poor_reward_risk() {
        let validator = EntryExitValidator::default();
        let data = history(30, 100.0, 0.2, 100.0);
        let result = validator.validate_entry(&buy(100.0, 98.0, 101.0), &data);
        assert!(!result.is_valid);
        assert!(result.reason.unwrap().starts_with("reward:risk"));
    }

    #[test]
    fn test_close_signals_pass_through() {
        let validator = EntryExitValidator::default();
        let close = Signal::new("ETHUSDT", SignalAction::Close, "scalping", 1.0, 0.9, Utc::now());
        assert!(validator.validate_entry(&close, &[]).is_valid);
    }

    #[test]
    fn test_atr_stop_and_fallback() {
        let validator = EntryExitValidator::default();
        // high - low = 2 on every bar, flat closes
        let data = history(30, 100.0, 0.2, 100.0);
        assert!((validator.atr_stop_loss(SignalAction::Buy, 100.0, &data) - 97.0).abs() < 1e-9);
        assert!((validator.atr_stop_loss(SignalAction::Sell, 100.0, &data) - 103.0).abs() < 1e-9);
        assert!((validator.atr_stop_loss(SignalAction::Buy, 100.0, &data[..5]) - 98.0).abs() < 1e-9);
    }

    #[test]
    fn test_take_profit_ladder() {
        assert_eq!(take_profit_ladder(SignalAction::Buy, 100.0, 98.0), [102.0, 104.0, 106.0]);
        assert_eq!(take_profit_ladder(SignalAction::Sell, 100.0, 102.0), [98.0, 96.0, 94.0]);
    }
}
