use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};
use trading_core::{AccountInfo, Position, PositionSide, Signal, SignalAction};

use crate::models::*;

/// Account-level risk gate: daily loss and drawdown halts, position limits,
/// reward:risk floor and margin checks.
pub struct RiskManager {
    params: RiskParameters,
    state: RiskState,
}

impl RiskManager {
    pub fn new(params: RiskParameters, initial_balance: f64, today: NaiveDate) -> Self {
        Self {
            params,
            state: RiskState::new(initial_balance, today),
        }
    }

    pub fn params(&self) -> &RiskParameters {
        &self.params
    }

    /// Point-in-time copy of the risk state
    pub fn state(&self) -> RiskState {
        self.state.clone()
    }

    pub fn is_halted(&self) -> bool {
        self.state.trading_halted
    }

    /// Validate a signal against the account. Close signals always pass; halts
    /// are sticky until the next daily reset or an explicit resume.
    pub fn validate_signal(&mut self, signal: &Signal, account: &AccountInfo) -> RiskCheck {
        if signal.action == SignalAction::Close {
            return RiskCheck::approve();
        }

        self.update_equity(account.equity());
        if self.state.trading_halted {
            let reason = self
                .state
                .halt_reason
                .clone()
                .unwrap_or_else(|| "manual halt".to_string());
            return RiskCheck::reject(format!("Trading halted: {}", reason));
        }

        let Some(side) = signal.action.entry_side() else {
            return RiskCheck::reject("Hold signals are not executable");
        };

        let existing = account.position_for(&signal.instrument);
        if let Some(position) = existing {
            if position.side != side {
                return RiskCheck::approve();
            }
        }

        if existing.is_none() && account.open_positions.len() >= self.params.max_open_positions {
            return RiskCheck::reject(format!(
                "Max open positions reached ({}/{})",
                account.open_positions.len(),
                self.params.max_open_positions
            ));
        }

        if let Some(rr) = signal.reward_risk() {
            if rr < self.params.min_reward_risk {
                return RiskCheck::reject(format!(
                    "Reward:risk {:.2} below minimum {:.2}",
                    rr, self.params.min_reward_risk
                ));
            }
        }

        let required = self.required_margin(signal, account.available_balance);
        if required > account.available_balance {
            return RiskCheck::reject(format!(
                "Required margin {:.2} exceeds available balance {:.2}",
                required, account.available_balance
            ));
        }

        RiskCheck::approve()
    }

    /// Margin needed to take the signal at the configured risk per trade.
    pub fn required_margin(&self, signal: &Signal, available_balance: f64) -> f64 {
        let stop_distance_percent = match (signal.entry_price, signal.stop_loss) {
            (Some(entry), Some(stop)) if entry > 0.0 && entry != stop => {
                (entry - stop).abs() / entry * 100.0
            }
            _ => self.params.default_stop_percent,
        };
        let risk_amount = available_balance.max(0.0) * self.params.risk_per_trade;
        let notional = risk_amount / (stop_distance_percent / 100.0);
        notional / self.params.leverage.max(1.0)
    }

    /// Feed realized pnl from a closed trade into the daily window.
    pub fn record_realized_pnl(&mut self, pnl: f64) {
        self.state.daily_pnl += pnl;
    }

    /// Track peak balance and drawdown, halting when either limit is breached.
    /// Returns the current drawdown fraction.
    pub fn update_equity(&mut self, equity: f64) -> f64 {
        if equity > self.state.peak_balance {
            self.state.peak_balance = equity;
        }
        let drawdown = if self.state.peak_balance > 0.0 {
            ((self.state.peak_balance - equity) / self.state.peak_balance).max(0.0)
        } else {
            0.0
        };
        self.state.current_drawdown = drawdown;
        self.state.max_drawdown = self.state.max_drawdown.max(drawdown);

        if !self.state.trading_halted {
            let daily_limit = self.params.max_daily_loss * self.state.daily_start_balance;
            if self.state.daily_pnl < 0.0 && -self.state.daily_pnl >= daily_limit {
                self.halt(format!(
                    "daily loss {:.2} reached limit {:.2}",
                    -self.state.daily_pnl, daily_limit
                ));
            } else if drawdown >= self.params.max_drawdown {
                self.halt(format!(
                    "drawdown {:.1}% reached limit {:.1}%",
                    drawdown * 100.0,
                    self.params.max_drawdown * 100.0
                ));
            }
        }
        drawdown
    }

    /// Reset the daily window when the date changes. The new baseline is the
    /// peak balance. Returns true if a reset happened.
    pub fn check_daily_reset(&mut self, today: NaiveDate) -> bool {
        if today == self.state.last_reset_date {
            return false;
        }
        info!(
            "Daily risk reset: previous pnl {:.2}, new baseline {:.2}",
            self.state.daily_pnl, self.state.peak_balance
        );
        self.state.daily_start_balance = self.state.peak_balance;
        self.state.daily_pnl = 0.0;
        self.state.last_reset_date = today;
        self.resume_trading();
        true
    }

    pub fn halt(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Trading halted: {}", reason);
        self.state.trading_halted = true;
        self.state.halt_reason = Some(reason);
    }

    pub fn resume_trading(&mut self) {
        if self.state.trading_halted {
            info!("Trading resumed");
        }
        self.state.trading_halted = false;
        self.state.halt_reason = None;
    }

    /// Stop-loss, take-profit and stale-position check for one position.
    pub fn check_position_risk(&self, position: &Position, now: DateTime<Utc>) -> PositionRiskCheck {
        let price = position.current_price;

        if let Some(stop) = position.stop_loss {
            let breached = match position.side {
                PositionSide::Long => price <= stop,
                PositionSide::Short => price >= stop,
            };
            if breached {
                return PositionRiskCheck::close(ExitTrigger::StopLoss, stop);
            }
        }

        if let Some(target) = position.take_profit {
            let reached = match position.side {
                PositionSide::Long => price >= target,
                PositionSide::Short => price <= target,
            };
            if reached {
                return PositionRiskCheck::close(ExitTrigger::TakeProfit, target);
            }
        }

        if position.age_minutes(now) > self.params.stale_position_minutes
            && position.pnl_percent.abs() < self.params.stale_movement_percent
        {
            return PositionRiskCheck::close(ExitTrigger::Stale, price);
        }

        PositionRiskCheck::hold()
    }
}
