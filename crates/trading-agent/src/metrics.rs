use std::collections::VecDeque;
use std::time::Instant;

use serde::{Deserialize, Serialize};

const RECENT_WINDOW: usize = 20;

/// Per-cycle timing and running totals for the engine.
pub struct AgentMetrics {
    pub cycles_run: u64,
    pub signals_generated: u64,
    pub signals_filtered: u64,
    pub signals_advisory_approved: u64,
    pub signals_advisory_rejected: u64,
    pub signals_risk_rejected: u64,
    pub trades_executed: u64,
    pub trades_failed: u64,
    pub positions_closed: u64,
    pub total_pnl: f64,
    pub winning_trades: u64,
    pub losing_trades: u64,

    // Last cycle, per phase
    pub last_refresh_duration_ms: u64,
    pub last_exit_duration_ms: u64,
    pub last_fusion_duration_ms: u64,
    pub last_advisory_duration_ms: u64,
    pub last_execution_duration_ms: u64,
    pub last_total_duration_ms: u64,

    recent_pnls: VecDeque<f64>,
    log_interval_cycles: u64,
}

/// Serializable copy of the counters, published with engine status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub cycles_run: u64,
    pub signals_generated: u64,
    pub signals_filtered: u64,
    pub signals_advisory_approved: u64,
    pub signals_advisory_rejected: u64,
    pub signals_risk_rejected: u64,
    pub trades_executed: u64,
    pub trades_failed: u64,
    pub positions_closed: u64,
    pub total_pnl: f64,
    pub overall_win_rate: f64,
    pub recent_win_rate: f64,
    pub recent_avg_pnl: f64,
    pub last_cycle_ms: u64,
}

impl AgentMetrics {
    pub fn new(log_interval_cycles: u64) -> Self {
        Self {
            cycles_run: 0,
            signals_generated: 0,
            signals_filtered: 0,
            signals_advisory_approved: 0,
            signals_advisory_rejected: 0,
            signals_risk_rejected: 0,
            trades_executed: 0,
            trades_failed: 0,
            positions_closed: 0,
            total_pnl: 0.0,
            winning_trades: 0,
            losing_trades: 0,
            last_refresh_duration_ms: 0,
            last_exit_duration_ms: 0,
            last_fusion_duration_ms: 0,
            last_advisory_duration_ms: 0,
            last_execution_duration_ms: 0,
            last_total_duration_ms: 0,
            recent_pnls: VecDeque::with_capacity(RECENT_WINDOW),
            log_interval_cycles,
        }
    }

    pub fn start_timer() -> Instant {
        Instant::now()
    }

    pub fn record_refresh_duration(&mut self, start: Instant) {
        self.last_refresh_duration_ms = elapsed_ms(start);
    }

    pub fn record_exit_duration(&mut self, start: Instant) {
        self.last_exit_duration_ms = elapsed_ms(start);
    }

    pub fn record_fusion_duration(&mut self, start: Instant) {
        self.last_fusion_duration_ms = elapsed_ms(start);
    }

    pub fn record_advisory_duration(&mut self, start: Instant) {
        self.last_advisory_duration_ms = elapsed_ms(start);
    }

    pub fn record_execution_duration(&mut self, start: Instant) {
        self.last_execution_duration_ms = elapsed_ms(start);
    }

    /// Realized PnL of a closed position. Flat closes count as losses.
    pub fn record_trade_result(&mut self, pnl: f64) {
        self.positions_closed += 1;
        self.total_pnl += pnl;
        if pnl > 0.0 {
            self.winning_trades += 1;
        } else {
            self.losing_trades += 1;
        }

        self.recent_pnls.push_back(pnl);
        if self.recent_pnls.len() > RECENT_WINDOW {
            self.recent_pnls.pop_front();
        }
    }

    pub fn finish_cycle(&mut self, cycle_start: Instant) {
        self.last_total_duration_ms = elapsed_ms(cycle_start);
        self.cycles_run += 1;

        if self.log_interval_cycles > 0 && self.cycles_run.is_multiple_of(self.log_interval_cycles)
        {
            self.log_metrics();
        }
    }

    /// Rolling win rate over the last 20 closes (0-100%)
    pub fn recent_win_rate(&self) -> f64 {
        if self.recent_pnls.is_empty() {
            return 0.0;
        }
        let wins = self.recent_pnls.iter().filter(|pnl| **pnl > 0.0).count() as f64;
        (wins / self.recent_pnls.len() as f64) * 100.0
    }

    pub fn recent_avg_pnl(&self) -> f64 {
        if self.recent_pnls.is_empty() {
            return 0.0;
        }
        self.recent_pnls.iter().sum::<f64>() / self.recent_pnls.len() as f64
    }

    /// Overall win rate (0-100%)
    pub fn overall_win_rate(&self) -> f64 {
        let total = self.winning_trades + self.losing_trades;
        if total == 0 {
            return 0.0;
        }
        (self.winning_trades as f64 / total as f64) * 100.0
    }

    pub fn log_metrics(&self) {
        tracing::info!(
            cycles = self.cycles_run,
            signals_generated = self.signals_generated,
            signals_filtered = self.signals_filtered,
            signals_advisory_approved = self.signals_advisory_approved,
            signals_advisory_rejected = self.signals_advisory_rejected,
            signals_risk_rejected = self.signals_risk_rejected,
            trades_executed = self.trades_executed,
            trades_failed = self.trades_failed,
            total_pnl = format!("{:.2}", self.total_pnl),
            overall_win_rate = format!("{:.1}%", self.overall_win_rate()),
            recent_win_rate = format!("{:.1}%", self.recent_win_rate()),
            recent_avg_pnl = format!("{:.2}", self.recent_avg_pnl()),
            last_cycle_ms = self.last_total_duration_ms,
            last_refresh_ms = self.last_refresh_duration_ms,
            last_fusion_ms = self.last_fusion_duration_ms,
            last_advisory_ms = self.last_advisory_duration_ms,
            last_execution_ms = self.last_execution_duration_ms,
            "Engine metrics summary"
        );
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles_run: self.cycles_run,
            signals_generated: self.signals_generated,
            signals_filtered: self.signals_filtered,
            signals_advisory_approved: self.signals_advisory_approved,
            signals_advisory_rejected: self.signals_advisory_rejected,
            signals_risk_rejected: self.signals_risk_rejected,
            trades_executed: self.trades_executed,
            trades_failed: self.trades_failed,
            positions_closed: self.positions_closed,
            total_pnl: self.total_pnl,
            overall_win_rate: self.overall_win_rate(),
            recent_win_rate: self.recent_win_rate(),
            recent_avg_pnl: self.recent_avg_pnl(),
            last_cycle_ms: self.last_total_duration_ms,
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rolling_window_keeps_last_twenty() {
        let mut metrics = AgentMetrics::new(0);
        for _ in 0..20 {
            metrics.record_trade_result(-1.0);
        }
        assert_eq!(metrics.recent_win_rate(), 0.0);

        for _ in 0..10 {
            metrics.record_trade_result(3.0);
        }
        assert_relative_eq!(metrics.recent_win_rate(), 50.0);
        assert_relative_eq!(metrics.recent_avg_pnl(), 1.0);
        assert_relative_eq!(metrics.overall_win_rate(), 100.0 / 3.0, epsilon = 1e-9);
        assert_eq!(metrics.positions_closed, 30);
    }

    #[test]
    fn test_flat_close_counts_as_loss() {
        let mut metrics = AgentMetrics::new(0);
        metrics.record_trade_result(0.0);
        assert_eq!(metrics.losing_trades, 1);
        assert_eq!(metrics.snapshot().overall_win_rate, 0.0);
    }

    #[test]
    fn test_finish_cycle_counts() {
        let mut metrics = AgentMetrics::new(2);
        let start = AgentMetrics::start_timer();
        metrics.finish_cycle(start);
        metrics.finish_cycle(start);
        assert_eq!(metrics.snapshot().cycles_run, 2);
    }
}
