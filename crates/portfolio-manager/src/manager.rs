use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use trading_core::{AccountInfo, ClosedPosition, Position};
use uuid::Uuid;

use crate::error::{PositionError, PositionResult};
use crate::models::*;

/// Authoritative position book plus the running balance.
///
/// Available balance is never stored; it is derived from the balance and the
/// open positions on every `get_account_info` call so margin is not counted
/// twice across cycles.
pub struct PositionManager {
    config: PositionManagerConfig,
    balance: f64,
    positions: BTreeMap<String, Position>,
    closed: Vec<ClosedPosition>,
}

impl PositionManager {
    pub fn new(config: PositionManagerConfig, initial_balance: f64) -> Self {
        Self {
            config,
            balance: initial_balance.max(0.0),
            positions: BTreeMap::new(),
            closed: Vec::new(),
        }
    }

    pub fn config(&self) -> &PositionManagerConfig {
        &self.config
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    /// Host-driven balance update (deposit, withdrawal, venue sync).
    pub fn set_balance(&mut self, balance: f64) {
        if balance.is_finite() {
            info!("Balance updated: {:.2} -> {:.2}", self.balance, balance.max(0.0));
            self.balance = balance.max(0.0);
        }
    }

    /// Notional value to commit for an entry at `entry_price` with an optional
    /// stop. Risk per trade divided by the stop distance gives the notional;
    /// its margin is clamped to [min order size, 90% of available]. Returns 0
    /// when even the minimum order does not fit.
    pub fn calculate_position_size(&self, entry_price: f64, stop_loss: Option<f64>) -> f64 {
        let available = self.available_balance();
        let leverage = self.config.leverage.max(1.0);

        let stop_percent = match stop_loss {
            Some(stop) if entry_price > 0.0 && stop.is_finite() && stop != entry_price => {
                (entry_price - stop).abs() / entry_price * 100.0
            }
            _ => self.config.default_stop_percent,
        };
        if stop_percent <= 0.0 {
            return 0.0;
        }

        let risk_amount = available * self.config.risk_per_trade;
        let notional = risk_amount / (stop_percent / 100.0);

        let max_margin = available * self.config.max_balance_fraction;
        if max_margin < self.config.min_order_size {
            debug!(
                "Available {:.2} below minimum order {:.2}",
                available, self.config.min_order_size
            );
            return 0.0;
        }
        let margin = (notional / leverage)
            .max(self.config.min_order_size)
            .min(max_margin);
        margin * leverage
    }

    pub fn open_position(&mut self, new: NewPosition, now: DateTime<Utc>) -> PositionResult<Position> {
        if self.positions.contains_key(&new.instrument) {
            return Err(PositionError::AlreadyOpen(new.instrument));
        }
        if !new.entry_price.is_finite() || new.entry_price <= 0.0 {
            return Err(PositionError::InvalidPrice {
                instrument: new.instrument,
                price: new.entry_price,
            });
        }
        if !new.quantity.is_finite() || new.quantity <= 0.0 {
            return Err(PositionError::InvalidQuantity {
                instrument: new.instrument,
                quantity: new.quantity,
            });
        }

        let position = Position {
            id: Uuid::new_v4().to_string(),
            instrument: new.instrument.clone(),
            side: new.side,
            entry_price: new.entry_price,
            current_price: new.entry_price,
            quantity: new.quantity,
            value: new.entry_price * new.quantity,
            pnl: 0.0,
            pnl_percent: 0.0,
            stop_loss: new.stop_loss,
            take_profit: new.take_profit,
            opened_at: now,
            leverage: self.config.leverage.max(1.0),
            strategy: new.strategy,
            peak_pnl_percent: 0.0,
        };

        info!(
            "Opened {} {} qty {:.6} @ {:.4} ({})",
            position.side, position.instrument, position.quantity, position.entry_price, position.strategy
        );
        self.positions.insert(new.instrument, position.clone());
        Ok(position)
    }

    /// Mark a position to market. Returns the updated position, if any.
    pub fn update_price(&mut self, instrument: &str, price: f64) -> Option<&Position> {
        let position = self.positions.get_mut(instrument)?;
        position.update_price(price);
        Some(position)
    }

    pub fn close_position(
        &mut self,
        instrument: &str,
        exit_price: f64,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> PositionResult<ClosedPosition> {
        if !exit_price.is_finite() || exit_price <= 0.0 {
            return Err(PositionError::InvalidPrice {
                instrument: instrument.to_string(),
                price: exit_price,
            });
        }
        let mut position = self
            .positions
            .remove(instrument)
            .ok_or_else(|| PositionError::NotFound(instrument.to_string()))?;

        position.update_price(exit_price);
        let realized_pnl = position.pnl_at(exit_price);
        self.balance = (self.balance + realized_pnl).max(0.0);

        let closed = ClosedPosition {
            position,
            exit_price,
            realized_pnl,
            closed_at: now,
            reason: reason.into(),
        };
        info!(
            "Closed {} {} @ {:.4}: pnl {:.2} ({})",
            closed.position.side, instrument, exit_price, realized_pnl, closed.reason
        );
        self.closed.push(closed.clone());
        Ok(closed)
    }

    /// Undo a position whose order failed: close at entry with zero pnl.
    /// The position never traded, so it is kept out of the closed history
    /// and the win-rate statistics.
    pub fn rollback_position(&mut self, instrument: &str, now: DateTime<Utc>) -> PositionResult<ClosedPosition> {
        let mut position = self
            .positions
            .remove(instrument)
            .ok_or_else(|| PositionError::NotFound(instrument.to_string()))?;

        let entry = position.entry_price;
        position.update_price(entry);
        info!("Rolled back {} {} @ {:.4}", position.side, instrument, entry);
        Ok(ClosedPosition {
            position,
            exit_price: entry,
            realized_pnl: 0.0,
            closed_at: now,
            reason: "rollback: execution failed".to_string(),
        })
    }

    pub fn position(&self, instrument: &str) -> Option<&Position> {
        self.positions.get(instrument)
    }

    pub fn has_position(&self, instrument: &str) -> bool {
        self.positions.contains_key(instrument)
    }

    /// Open positions ordered by instrument
    pub fn positions(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    pub fn closed_positions(&self) -> &[ClosedPosition] {
        &self.closed
    }

    fn margin_used(&self) -> f64 {
        self.positions.values().map(Position::margin).sum()
    }

    fn available_balance(&self) -> f64 {
        (self.balance - self.margin_used()).max(0.0)
    }

    pub fn get_account_info(&self) -> AccountInfo {
        AccountInfo {
            total_balance: self.balance,
            available_balance: self.available_balance(),
            margin_used: self.margin_used(),
            unrealized_pnl: self.positions.values().map(|p| p.pnl).sum(),
            realized_pnl: self.closed.iter().map(|c| c.realized_pnl).sum(),
            open_positions: self.positions(),
            open_orders: 0,
        }
    }

    /// Fraction of closed positions that made money; 0 with no history.
    pub fn win_rate(&self) -> f64 {
        self.stats().win_rate
    }

    pub fn stats(&self) -> PortfolioStats {
        let mut stats = PortfolioStats {
            closed_positions: self.closed.len(),
            ..PortfolioStats::default()
        };
        for closed in &self.closed {
            let pnl = closed.realized_pnl;
            stats.realized_pnl += pnl;
            if pnl > 0.0 {
                stats.winning += 1;
                stats.largest_win = stats.largest_win.max(pnl);
            } else if pnl < 0.0 {
                stats.losing += 1;
                stats.largest_loss = stats.largest_loss.min(pnl);
            }
        }
        if stats.closed_positions > 0 {
            stats.win_rate = stats.winning as f64 / stats.closed_positions as f64;
        }
        stats
    }
}
