//! Multi-strategy signal generation and filtering.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use strategies::{Strategy, StrategyKind, StrategyResult};
use tracing::{debug, warn};
use trading_core::{AccountInfo, MarketSample, Signal, SignalAction, StrategyConfig, TrendContext};

use crate::validator::EntryExitValidator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Ranked signals kept per cycle
    pub max_signals: usize,
    pub min_confidence: f64,
    pub duplicate_window_seconds: i64,
    pub conflict_window_seconds: i64,
    pub history_window_seconds: i64,
    /// Position slots used to split the available balance
    pub max_positions: usize,
    /// Per-signal cap as a fraction of available balance
    pub max_position_fraction: f64,
    /// Size reduction per open position
    pub open_position_penalty: f64,
    pub min_notional: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            max_signals: 5,
            min_confidence: 0.01,
            duplicate_window_seconds: 10,
            conflict_window_seconds: 30,
            history_window_seconds: 300,
            max_positions: 5,
            max_position_fraction: 0.02,
            open_position_penalty: 0.2,
            min_notional: 10.0,
        }
    }
}

/// Per-strategy execution policy flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyPolicy {
    pub follow_own_signals: bool,
    pub follow_ai_signals: bool,
    pub autonomous: bool,
}

impl Default for StrategyPolicy {
    fn default() -> Self {
        Self {
            follow_own_signals: true,
            follow_ai_signals: true,
            autonomous: false,
        }
    }
}

impl StrategyPolicy {
    /// Whether the strategy acts on this signal: advisory-enhanced signals
    /// need `follow_ai_signals`, raw strategy output needs `follow_own_signals`.
    pub fn follows(&self, signal: &Signal) -> bool {
        if signal.ai_enhanced {
            self.follow_ai_signals
        } else {
            self.follow_own_signals
        }
    }

    pub fn rejection_reason(signal: &Signal) -> &'static str {
        if signal.ai_enhanced {
            "strategy does not follow AI-enhanced signals"
        } else {
            "strategy does not follow its own signals"
        }
    }
}

impl From<&StrategyConfig> for StrategyPolicy {
    fn from(config: &StrategyConfig) -> Self {
        Self {
            follow_own_signals: config.follow_own_signals,
            follow_ai_signals: config.follow_ai_signals,
            autonomous: config.autonomous,
        }
    }
}

/// Market view of one instrument for a cycle.
#[derive(Debug, Clone, Copy)]
pub struct InstrumentSnapshot<'a> {
    pub instrument: &'a str,
    pub history: &'a [MarketSample],
    pub trend: Option<&'a TrendContext>,
}

#[derive(Debug, Clone)]
pub struct RejectedSignal {
    pub signal: Signal,
    pub reason: String,
}

/// Output of one fusion cycle
#[derive(Debug, Clone, Default)]
pub struct FusionOutcome {
    /// Ranked, best first
    pub signals: Vec<Signal>,
    pub rejected: Vec<RejectedSignal>,
    pub candidates: usize,
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    instrument: String,
    action: SignalAction,
    strategy: String,
    timestamp: DateTime<Utc>,
}

/// Rolling window of kept signals backing duplicate and conflict checks.
#[derive(Debug, Clone, Default)]
pub struct SignalHistory {
    entries: VecDeque<HistoryEntry>,
}

impl SignalHistory {
    pub fn record(&mut self, signal: &Signal) {
        self.entries.push_back(HistoryEntry {
            instrument: signal.instrument.clone(),
            action: signal.action,
            strategy: signal.strategy.clone(),
            timestamp: signal.timestamp,
        });
    }

    /// Drop entries older than `window` before `now`.
    pub fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        let cutoff = now - window;
        self.entries.retain(|e| e.timestamp >= cutoff);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Same instrument, action and strategy within `window`.
    pub fn is_duplicate(&self, signal: &Signal, window: Duration) -> bool {
        self.entries.iter().any(|e| {
            e.instrument == signal.instrument
                && e.action == signal.action
                && e.strategy == signal.strategy
                && (signal.timestamp - e.timestamp).abs() < window
        })
    }

    /// Opposing buy/sell on the same instrument within `window`.
    pub fn has_conflict(&self, signal: &Signal, window: Duration) -> bool {
        let Some(opposite) = signal.action.opposite() else {
            return false;
        };
        self.entries.iter().any(|e| {
            e.instrument == signal.instrument
                && e.action == opposite
                && (signal.timestamp - e.timestamp).abs() < window
        })
    }
}

/// Sort by confidence × strength, best first, and keep `limit`.
pub fn rank_signals(mut signals: Vec<Signal>, limit: usize) -> Vec<Signal> {
    signals.sort_by(compare_signals);
    signals.truncate(limit);
    signals
}

/// Higher score first; ties broken by strategy then instrument so the order
/// never depends on evaluation order.
fn compare_signals(a: &Signal, b: &Signal) -> Ordering {
    b.score()
        .total_cmp(&a.score())
        .then_with(|| a.strategy.cmp(&b.strategy))
        .then_with(|| a.instrument.cmp(&b.instrument))
}

/// Run a strategy call, turning errors and panics into "no signal".
pub(crate) fn evaluate_contained<F>(strategy: &str, instrument: &str, f: F) -> Option<Signal>
where
    F: FnOnce() -> StrategyResult<Option<Signal>>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(signal)) => signal,
        Ok(Err(e)) => {
            warn!(strategy, instrument, "Strategy failed: {}", e);
            None
        }
        Err(_) => {
            warn!(strategy, instrument, "Strategy panicked");
            None
        }
    }
}

pub struct SignalFusionEngine {
    config: FusionConfig,
    validator: EntryExitValidator,
    strategies: Vec<StrategyKind>,
    policies: HashMap<String, StrategyPolicy>,
    history: SignalHistory,
}

impl SignalFusionEngine {
    pub fn new(config: FusionConfig, validator: EntryExitValidator, strategies: Vec<StrategyKind>) -> Self {
        Self {
            config,
            validator,
            strategies,
            policies: HashMap::new(),
            history: SignalHistory::default(),
        }
    }

    /// Engine with all built-in strategies at default parameters.
    pub fn with_defaults(config: FusionConfig, validator: EntryExitValidator) -> Self {
        Self::new(config, validator, StrategyKind::defaults())
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn history(&self) -> &SignalHistory {
        &self.history
    }

    /// Replace the strategy set from configuration rows. Either every row
    /// builds or nothing changes.
    pub fn apply_configs(&mut self, configs: &[StrategyConfig]) -> StrategyResult<()> {
        let strategies = configs
            .iter()
            .map(StrategyKind::from_config)
            .collect::<StrategyResult<Vec<_>>>()?;
        self.strategies = strategies;
        self.policies = configs
            .iter()
            .map(|c| (c.name.clone(), StrategyPolicy::from(c)))
            .collect();
        Ok(())
    }

    /// Restore the built-in strategy set and default policies.
    pub fn reset_to_defaults(&mut self) {
        self.strategies = StrategyKind::defaults();
        self.policies.clear();
    }

    pub fn policy(&self, strategy: &str) -> StrategyPolicy {
        self.policies.get(strategy).copied().unwrap_or_default()
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn enabled_count(&self) -> usize {
        self.strategies.iter().filter(|s| s.is_enabled()).count()
    }

    /// Returns false when no strategy has that name.
    pub fn set_strategy_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.strategies.iter_mut().find(|s| s.name() == name) {
            Some(strategy) => {
                strategy.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// Run every enabled strategy over every instrument, then size, filter and
    /// rank the candidates.
    pub fn generate(
        &mut self,
        instruments: &[InstrumentSnapshot<'_>],
        account: &AccountInfo,
        now: DateTime<Utc>,
    ) -> FusionOutcome {
        self.history
            .prune(now, Duration::seconds(self.config.history_window_seconds));

        let positions = &account.open_positions;
        let config = &self.config;
        let per_strategy: Vec<Vec<Signal>> = self
            .strategies
            .par_iter_mut()
            .filter(|s| s.is_enabled())
            .map(|strategy| {
                let name = strategy.name();
                let required = strategy.required_history_length();
                let weight = strategy.weight();
                instruments
                    .iter()
                    .filter(|snap| snap.history.len() >= required)
                    .filter_map(|snap| {
                        evaluate_contained(name, snap.instrument, || {
                            strategy.analyze(snap.history, positions, snap.trend)
                        })
                    })
                    .map(|mut signal| {
                        signal.position_size = Some(size_for(config, account, &signal, weight));
                        signal
                    })
                    .collect()
            })
            .collect();
        let candidates: Vec<Signal> = per_strategy.into_iter().flatten().collect();
        let candidate_count = candidates.len();

        let (kept, mut rejected) = self.filter_candidates(candidates, instruments, account);

        let mut ranked = kept;
        ranked.sort_by(compare_signals);
        for dropped in ranked.split_off(ranked.len().min(self.config.max_signals)) {
            rejected.push(RejectedSignal {
                signal: dropped,
                reason: format!("outside top {}", self.config.max_signals),
            });
        }
        for signal in &ranked {
            self.history.record(signal);
        }

        debug!(
            candidates = candidate_count,
            kept = ranked.len(),
            rejected = rejected.len(),
            "Fusion cycle complete"
        );

        FusionOutcome {
            signals: ranked,
            rejected,
            candidates: candidate_count,
        }
    }

    /// Position size for a candidate.
    pub fn position_size(&self, account: &AccountInfo, signal: &Signal, weight: f64) -> f64 {
        size_for(&self.config, account, signal, weight)
    }

    /// Filter pipeline against the history as it stood before this cycle.
    /// Results do not depend on candidate order.
    pub fn filter_candidates(
        &self,
        candidates: Vec<Signal>,
        instruments: &[InstrumentSnapshot<'_>],
        account: &AccountInfo,
    ) -> (Vec<Signal>, Vec<RejectedSignal>) {
        let duplicate_window = Duration::seconds(self.config.duplicate_window_seconds);
        let conflict_window = Duration::seconds(self.config.conflict_window_seconds);
        let mut kept = Vec::new();
        let mut rejected = Vec::new();

        for mut signal in candidates {
            if let Some(position) = account.position_for(&signal.instrument) {
                signal.position_context = Some(position.context());
            }

            let history = instruments
                .iter()
                .find(|s| s.instrument == signal.instrument)
                .map(|s| s.history)
                .unwrap_or(&[]);
            if !history.is_empty() {
                let validation = self.validator.validate_entry(&signal, history);
                if !validation.is_valid {
                    let reason = validation.reason.unwrap_or_else(|| "entry rejected".to_string());
                    rejected.push(RejectedSignal { signal, reason });
                    continue;
                }
                if let Some(improved) = validation.improved_entry {
                    signal = signal.with_indicator("improved_entry", improved);
                    signal.entry_price = Some(improved);
                }
            }

            // Autonomous strategies are judged after advisory review, once it
            // is known whether the signal came back enhanced.
            let policy = self.policy(&signal.strategy);
            if !policy.autonomous && !policy.follows(&signal) {
                let reason = StrategyPolicy::rejection_reason(&signal).to_string();
                rejected.push(RejectedSignal { signal, reason });
                continue;
            }

            if signal.confidence < self.config.min_confidence {
                let reason = format!("confidence {:.3} below floor", signal.confidence);
                rejected.push(RejectedSignal { signal, reason });
                continue;
            }
            if self.history.is_duplicate(&signal, duplicate_window) {
                rejected.push(RejectedSignal {
                    signal,
                    reason: "duplicate signal".to_string(),
                });
                continue;
            }
            if self.history.has_conflict(&signal, conflict_window) {
                rejected.push(RejectedSignal {
                    signal,
                    reason: "conflicts with recent opposing signal".to_string(),
                });
                continue;
            }
            kept.push(signal);
        }

        // Opposing candidates on one instrument in the same batch: best score wins
        let mut winners: HashMap<String, SignalAction> = HashMap::new();
        let mut passthrough = Vec::new();
        let mut sorted = kept;
        sorted.sort_by(compare_signals);
        for signal in sorted {
            if !signal.action.is_entry() {
                passthrough.push(signal);
                continue;
            }
            match winners.get(&signal.instrument) {
                Some(best) if *best != signal.action => rejected.push(RejectedSignal {
                    signal,
                    reason: "conflicts with stronger signal in this cycle".to_string(),
                }),
                _ => {
                    winners.insert(signal.instrument.clone(), signal.action);
                    passthrough.push(signal);
                }
            }
        }

        (passthrough, rejected)
    }
}

fn size_for(config: &FusionConfig, account: &AccountInfo, signal: &Signal, weight: f64) -> f64 {
    let available = account.available_balance.max(0.0);
    let open = account.open_positions.len();
    let remaining_slots = config.max_positions.saturating_sub(open).max(1);

    let base = (available / remaining_slots as f64).min(available * config.max_position_fraction);
    let penalty = (1.0 - config.open_position_penalty * open as f64).max(0.0);
    let raw = base * signal.strength * signal.confidence * penalty * weight.clamp(0.0, 1.0);
    let size = raw.max(config.min_notional);

    Decimal::from_f64(size)
        .map(|d| d.round_dp(2))
        .and_then(|d| d.to_f64())
        .unwrap_or(config.min_notional)
}
