use chrono::{DateTime, Utc};
use trading_core::{MarketSample, Position, Signal, SignalAction, TrendContext};

use crate::error::StrategyResult;

/// Enable flag and sizing weight shared by every strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyControls {
    pub enabled: bool,
    /// Sizing weight in [0, 1]; never gates emission.
    pub weight: f64,
}

impl Default for StrategyControls {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: 1.0,
        }
    }
}

/// A trading strategy evaluated once per instrument per cycle.
///
/// `analyze` emits at most one signal. The only state a strategy may mutate is
/// its own cooldown / trailing-stop bookkeeping.
pub trait Strategy: Send {
    fn name(&self) -> &'static str;

    /// Minimum number of primary samples before `analyze` can emit.
    fn required_history_length(&self) -> usize;

    fn analyze(
        &mut self,
        history: &[MarketSample],
        positions: &[Position],
        trend: Option<&TrendContext>,
    ) -> StrategyResult<Option<Signal>>;

    fn controls(&self) -> &StrategyControls;

    fn controls_mut(&mut self) -> &mut StrategyControls;

    fn is_enabled(&self) -> bool {
        self.controls().enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.controls_mut().enabled = enabled;
    }

    fn weight(&self) -> f64 {
        self.controls().weight
    }

    fn set_weight(&mut self, weight: f64) {
        self.controls_mut().weight = if weight.is_finite() {
            weight.clamp(0.0, 1.0)
        } else {
            1.0
        };
    }
}

/// Open position on `instrument`, if any.
pub fn position_for<'a>(positions: &'a [Position], instrument: &str) -> Option<&'a Position> {
    positions.iter().find(|p| p.instrument == instrument)
}

/// Side-aware pnl% of `position` at `price`.
pub fn pnl_percent_at(position: &Position, price: f64) -> f64 {
    if position.entry_price <= 0.0 {
        return 0.0;
    }
    (price - position.entry_price) / position.entry_price * 100.0 * position.side.sign()
}

/// Multiply strength and confidence up when the primary trend agrees with
/// `action` and down when it disagrees. Values may exceed 1 here; `Signal::new`
/// clamps them.
pub fn apply_trend(
    strength: f64,
    confidence: f64,
    action: SignalAction,
    trend: Option<&TrendContext>,
) -> (f64, f64) {
    match trend {
        Some(t) if t.supports(action) => (strength * 1.15, confidence * 1.15),
        Some(t) if t.opposes(action) => (strength * 0.7, confidence * 0.7),
        _ => (strength, confidence),
    }
}

/// Entry levels at fixed percentages from `price`.
pub fn percent_levels(
    action: SignalAction,
    price: f64,
    stop_loss_percent: f64,
    take_profit_percent: f64,
) -> (f64, f64) {
    let sl = stop_loss_percent / 100.0;
    let tp = take_profit_percent / 100.0;
    match action {
        SignalAction::Sell => (price * (1.0 + sl), price * (1.0 - tp)),
        _ => (price * (1.0 - sl), price * (1.0 + tp)),
    }
}

/// Close signal for a position this strategy manages.
pub fn close_signal(
    strategy: &str,
    position: &Position,
    price: f64,
    now: DateTime<Utc>,
    reason: impl Into<String>,
) -> Signal {
    let mut signal = Signal::new(
        position.instrument.clone(),
        SignalAction::Close,
        strategy,
        1.0,
        0.9,
        now,
    )
    .with_entry(price)
    .with_indicator("pnl_percent", pnl_percent_at(position, price))
    .with_reason(reason);
    signal.position_context = Some(position.context());
    signal
}

/// Seconds elapsed since `since`, 0 if `since` is in the future.
pub fn seconds_since(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_seconds().max(0)
}
