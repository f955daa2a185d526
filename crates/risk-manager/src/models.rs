use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParameters {
    /// Daily realized loss, as a fraction of the day-start balance, that halts trading
    pub max_daily_loss: f64,
    /// Drawdown from peak balance, as a fraction, that halts trading
    pub max_drawdown: f64,
    pub max_open_positions: usize,
    pub min_reward_risk: f64,
    /// Fraction of available balance risked per trade
    pub risk_per_trade: f64,
    pub leverage: f64,
    /// Stop distance assumed when a signal carries no stop, in percent
    pub default_stop_percent: f64,
    pub stale_position_minutes: i64,
    /// |pnl%| under which an old position counts as stale
    pub stale_movement_percent: f64,
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            max_daily_loss: 0.05,
            max_drawdown: 0.15,
            max_open_positions: 5,
            min_reward_risk: 1.5,
            risk_per_trade: 0.02,
            leverage: 10.0,
            default_stop_percent: 2.0,
            stale_position_minutes: 60,
            stale_movement_percent: 0.1,
        }
    }
}

/// Daily risk window and halt flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub daily_start_balance: f64,
    /// Realized pnl since the last daily reset
    pub daily_pnl: f64,
    pub peak_balance: f64,
    /// Largest drawdown observed, as a fraction of peak
    pub max_drawdown: f64,
    pub current_drawdown: f64,
    pub trading_halted: bool,
    pub halt_reason: Option<String>,
    pub last_reset_date: NaiveDate,
}

impl RiskState {
    pub fn new(balance: f64, today: NaiveDate) -> Self {
        Self {
            daily_start_balance: balance,
            daily_pnl: 0.0,
            peak_balance: balance,
            max_drawdown: 0.0,
            current_drawdown: 0.0,
            trading_halted: false,
            halt_reason: None,
            last_reset_date: today,
        }
    }
}

/// Outcome of a signal check. A rejection is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCheck {
    pub valid: bool,
    pub reason: Option<String>,
}

impl RiskCheck {
    pub fn approve() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Which account-level rule fired for a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitTrigger {
    StopLoss,
    TakeProfit,
    Stale,
}

impl ExitTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitTrigger::StopLoss => "stop loss hit",
            ExitTrigger::TakeProfit => "take profit hit",
            ExitTrigger::Stale => "stale position",
        }
    }
}

/// Exit decision for an open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRiskCheck {
    pub should_close: bool,
    pub trigger: Option<ExitTrigger>,
    pub reason: Option<String>,
    /// Price the close should be booked at (the breached level for stops and targets)
    pub exit_price: Option<f64>,
}

impl PositionRiskCheck {
    pub fn hold() -> Self {
        Self {
            should_close: false,
            trigger: None,
            reason: None,
            exit_price: None,
        }
    }

    pub fn close(trigger: ExitTrigger, exit_price: f64) -> Self {
        Self {
            should_close: true,
            trigger: Some(trigger),
            reason: Some(trigger.as_str().to_string()),
            exit_price: Some(exit_price),
        }
    }
}
