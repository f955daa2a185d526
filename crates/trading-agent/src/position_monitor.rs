use chrono::{DateTime, Utc};
use risk_manager::{ExitTrigger, RiskManager};
use serde::{Deserialize, Serialize};
use trading_core::Position;

/// Exit rules applied after the risk manager's stop/target/stale checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitRules {
    /// Peak pnl% that arms the profit lock
    pub profit_lock_trigger_percent: f64,
    /// Close once pnl% gives back to this fraction of the peak
    pub profit_lock_retain_fraction: f64,
    /// Hard loss limit per position, in pnl%
    pub max_position_loss_percent: f64,
}

impl Default for ExitRules {
    fn default() -> Self {
        Self {
            profit_lock_trigger_percent: 1.5,
            profit_lock_retain_fraction: 0.5,
            max_position_loss_percent: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    StopLoss,
    TakeProfit,
    Stale,
    ProfitLock,
    MaxLoss,
}

impl ExitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitKind::StopLoss => "stop loss hit",
            ExitKind::TakeProfit => "take profit hit",
            ExitKind::Stale => "stale position",
            ExitKind::ProfitLock => "profit lock",
            ExitKind::MaxLoss => "max position loss",
        }
    }
}

impl From<ExitTrigger> for ExitKind {
    fn from(trigger: ExitTrigger) -> Self {
        match trigger {
            ExitTrigger::StopLoss => ExitKind::StopLoss,
            ExitTrigger::TakeProfit => ExitKind::TakeProfit,
            ExitTrigger::Stale => ExitKind::Stale,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitDecision {
    pub kind: ExitKind,
    pub exit_price: f64,
}

impl ExitDecision {
    pub fn reason(&self) -> &'static str {
        self.kind.as_str()
    }
}

/// First matching exit, in order: stop, target, stale, profit lock, max loss.
pub fn evaluate_exit(
    position: &Position,
    risk: &RiskManager,
    rules: &ExitRules,
    now: DateTime<Utc>,
) -> Option<ExitDecision> {
    let check = risk.check_position_risk(position, now);
    if check.should_close {
        if let Some(trigger) = check.trigger {
            return Some(ExitDecision {
                kind: trigger.into(),
                exit_price: check.exit_price.unwrap_or(position.current_price),
            });
        }
    }

    let price = position.current_price;

    if position.peak_pnl_percent >= rules.profit_lock_trigger_percent
        && position.pnl_percent <= position.peak_pnl_percent * rules.profit_lock_retain_fraction
    {
        return Some(ExitDecision {
            kind: ExitKind::ProfitLock,
            exit_price: price,
        });
    }

    if position.pnl_percent <= -rules.max_position_loss_percent {
        return Some(ExitDecision {
            kind: ExitKind::MaxLoss,
            exit_price: price,
        });
    }

    None
}
