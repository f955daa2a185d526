use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use multi_timeframe::{HigherTimeframes, TrendAnalyzer, TrendAnalyzerConfig};
use portfolio_manager::PositionManager;
use risk_manager::{RiskManager, RiskState};
use serde::Serialize;
use signal_engine::{
    EntryExitConfig, EntryExitValidator, InstrumentSnapshot, SignalFusionEngine, StrategyPolicy,
};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use trading_core::{
    AdvisoryContext, AdvisoryProvider, ClosedPosition, ExecutionSink, MarketDataSource,
    Persistence, Position, Signal, SignalAction, StreamEvent, Timeframe, TrendContext,
};

use crate::advisory_gate::{AdvisoryGate, GateVerdict};
use crate::config::AgentConfig;
use crate::events::{EngineEvent, EngineState, EventBus};
use crate::executor::TradeExecutor;
use crate::market_cache::MarketCache;
use crate::metrics::{AgentMetrics, MetricsSnapshot};
use crate::position_monitor::{evaluate_exit, ExitRules};

/// Collaborators the engine drives.
pub struct EngineDeps {
    pub market: Arc<dyn MarketDataSource>,
    pub sink: Arc<dyn ExecutionSink>,
    pub persistence: Arc<dyn Persistence>,
    pub advisory: Option<Arc<dyn AdvisoryProvider>>,
}

/// Host requests, applied between cycles.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    UpdateBalance(f64),
    SetStrategyEnabled { name: String, enabled: bool },
    ReloadConfig,
    Stop,
}

/// Point-in-time view of the engine for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub state: EngineState,
    pub cycle: u64,
    pub balance: f64,
    pub equity: f64,
    pub available_balance: f64,
    pub open_positions: usize,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub win_rate: f64,
    pub halted: bool,
    pub halt_reason: Option<String>,
    pub positions: Vec<Position>,
    pub last_signals: Vec<Signal>,
    pub metrics: MetricsSnapshot,
    pub updated_at: DateTime<Utc>,
}

impl EngineStatus {
    fn initial(balance: f64) -> Self {
        Self {
            running: false,
            state: EngineState::Stopped,
            cycle: 0,
            balance,
            equity: balance,
            available_balance: balance,
            open_positions: 0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            win_rate: 0.0,
            halted: false,
            halt_reason: None,
            positions: Vec::new(),
            last_signals: Vec::new(),
            metrics: MetricsSnapshot::default(),
            updated_at: Utc::now(),
        }
    }
}

/// Host side of a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    status: watch::Receiver<EngineStatus>,
    events: EventBus,
}

impl EngineHandle {
    pub async fn send(&self, command: EngineCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .context("engine is no longer running")
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(EngineCommand::Stop).await
    }

    pub async fn update_balance(&self, balance: f64) -> Result<()> {
        self.send(EngineCommand::UpdateBalance(balance)).await
    }

    pub async fn set_strategy_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.send(EngineCommand::SetStrategyEnabled {
            name: name.to_string(),
            enabled,
        })
        .await
    }

    pub async fn reload_config(&self) -> Result<()> {
        self.send(EngineCommand::ReloadConfig).await
    }

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

/// The control loop. One task owns every piece of mutable trading state;
/// hosts talk to it through an [`EngineHandle`].
pub struct TradingEngine {
    config: AgentConfig,
    market: Arc<dyn MarketDataSource>,
    persistence: Arc<dyn Persistence>,
    executor: TradeExecutor,
    fusion: SignalFusionEngine,
    trend: TrendAnalyzer,
    risk: RiskManager,
    positions: PositionManager,
    gate: AdvisoryGate,
    cache: MarketCache,
    metrics: AgentMetrics,
    exit_rules: ExitRules,
    events: EventBus,
    status_tx: watch::Sender<EngineStatus>,
    commands: mpsc::Receiver<EngineCommand>,
    streams: Vec<mpsc::Receiver<StreamEvent>>,
    state: EngineState,
    cycle: u64,
    last_signals: Vec<Signal>,
    stop_requested: bool,
}

impl TradingEngine {
    pub fn new(config: AgentConfig, deps: EngineDeps) -> (Self, EngineHandle) {
        let events = EventBus::default();
        let (command_tx, command_rx) = mpsc::channel(32);
        let (status_tx, status_rx) = watch::channel(EngineStatus::initial(config.initial_balance));

        let validator = EntryExitValidator::new(EntryExitConfig {
            min_reward_risk: config.min_reward_risk,
            ..EntryExitConfig::default()
        });
        let engine = Self {
            market: deps.market,
            persistence: deps.persistence.clone(),
            executor: TradeExecutor::new(deps.sink, deps.persistence, events.clone()),
            fusion: SignalFusionEngine::with_defaults(config.fusion_config(), validator),
            trend: TrendAnalyzer::new(TrendAnalyzerConfig::default()),
            risk: RiskManager::new(
                config.risk_parameters(),
                config.initial_balance,
                Utc::now().date_naive(),
            ),
            positions: PositionManager::new(config.position_config(), config.initial_balance),
            gate: AdvisoryGate::new(deps.advisory, config.advisory_gate_config()),
            cache: MarketCache::new(),
            metrics: AgentMetrics::new(config.metrics_log_interval_cycles),
            exit_rules: config.exit_rules(),
            events: events.clone(),
            status_tx,
            commands: command_rx,
            streams: Vec::new(),
            state: EngineState::Stopped,
            cycle: 0,
            last_signals: Vec::new(),
            stop_requested: false,
            config,
        };
        let handle = EngineHandle {
            commands: command_tx,
            status: status_rx,
            events,
        };
        (engine, handle)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    pub fn risk_state(&self) -> RiskState {
        self.risk.state()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn last_signals(&self) -> &[Signal] {
        &self.last_signals
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.fusion.strategy_names()
    }

    pub fn enabled_strategies(&self) -> usize {
        self.fusion.enabled_count()
    }

    /// Initialize, loop until stopped, then shut down. Returns the final
    /// metrics.
    pub async fn run(mut self) -> Result<MetricsSnapshot> {
        if let Err(e) = self.initialize().await {
            self.set_state(EngineState::Stopped);
            return Err(e);
        }

        let mut interval = tokio::time::interval(self.config.cycle_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !self.stop_requested {
            let command = tokio::select! {
                _ = interval.tick() => None,
                command = self.commands.recv() => Some(command),
            };
            match command {
                None => self.run_cycle(Utc::now()).await,
                Some(Some(command)) => self.handle_command(command).await,
                Some(None) => {
                    info!("All engine handles dropped, stopping");
                    self.stop_requested = true;
                }
            }
        }

        self.shutdown().await;
        Ok(self.metrics.snapshot())
    }

    /// Connect, load strategy settings, warm the caches and open the
    /// streams. Only a failed connection is fatal.
    pub async fn initialize(&mut self) -> Result<()> {
        self.set_state(EngineState::Initializing);
        info!(
            "Initializing engine: {} instruments, source={}, venue={}{}",
            self.config.instruments.len(),
            self.market.source_name(),
            self.executor.venue_name(),
            if self.executor.is_paper() { " (paper)" } else { "" }
        );

        self.market
            .connect()
            .await
            .with_context(|| format!("failed to connect to {}", self.market.source_name()))?;

        self.load_strategies(false).await;
        self.warm_up().await;

        for instrument in &self.config.instruments {
            match self.market.subscribe(instrument).await {
                Ok(rx) => self.streams.push(rx),
                Err(e) => warn!("Streaming unavailable for {}: {}", instrument, e),
            }
        }

        self.set_state(EngineState::Running);
        info!(
            "Engine running with {} strategies enabled",
            self.fusion.enabled_count()
        );
        Ok(())
    }

    async fn warm_up(&mut self) {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.warmup_timeout_seconds);
        loop {
            self.cache
                .refresh(
                    self.market.as_ref(),
                    &self.config.instruments,
                    self.config.candle_limit,
                    self.config.order_book_depth,
                )
                .await;
            if self.cache.is_warm(&self.config.instruments) {
                info!("Market data caches warm");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("Warm-up timed out, continuing with partial market data");
                return;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// At startup a failed load falls back to the built-in strategies; a
    /// failed reload keeps whatever is running.
    async fn load_strategies(&mut self, reload: bool) {
        let loaded = self
            .persistence
            .load_strategy_config(&self.config.account_id)
            .await;
        match loaded {
            Ok(configs) if configs.is_empty() => {
                info!(
                    "No strategy configuration for account {}, using defaults",
                    self.config.account_id
                );
                self.fusion.reset_to_defaults();
            }
            Ok(configs) => match self.fusion.apply_configs(&configs) {
                Ok(()) => info!(
                    "Loaded {} strategy configs for account {}",
                    configs.len(),
                    self.config.account_id
                ),
                Err(e) if reload => warn!("Invalid strategy configuration, keeping current: {}", e),
                Err(e) => {
                    warn!("Invalid strategy configuration, using defaults: {}", e);
                    self.fusion.reset_to_defaults();
                }
            },
            Err(e) if reload => warn!("Failed to reload strategy configuration: {}", e),
            Err(e) => {
                warn!("Failed to load strategy configuration, using defaults: {}", e);
                self.fusion.reset_to_defaults();
            }
        }
    }

    pub async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::UpdateBalance(balance) => {
                self.positions.set_balance(balance);
                info!("Balance updated to {:.2}", self.positions.balance());
            }
            EngineCommand::SetStrategyEnabled { name, enabled } => {
                if self.fusion.set_strategy_enabled(&name, enabled) {
                    info!("Strategy {} {}", name, if enabled { "enabled" } else { "disabled" });
                } else {
                    warn!("Unknown strategy {}", name);
                }
            }
            EngineCommand::ReloadConfig => self.load_strategies(true).await,
            EngineCommand::Stop => {
                info!("Stop requested");
                self.stop_requested = true;
            }
        }
        self.publish_status();
    }

    /// One pass of the control loop.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) {
        let cycle_start = AgentMetrics::start_timer();
        self.cycle += 1;

        if self.risk.check_daily_reset(now.date_naive()) {
            info!("Daily risk window reset");
            self.events.publish(EngineEvent::DailyReset(now));
        }

        let timer = AgentMetrics::start_timer();
        let refreshed = self
            .cache
            .refresh(
                self.market.as_ref(),
                &self.config.instruments,
                self.config.candle_limit,
                self.config.order_book_depth,
            )
            .await;
        self.drain_streams();
        self.metrics.record_refresh_duration(timer);

        self.mark_to_market().await;

        let was_halted = self.risk.is_halted();
        let equity = self.positions.get_account_info().equity();
        let drawdown = self.risk.update_equity(equity);
        if !was_halted && self.risk.is_halted() {
            let reason = self.risk.state().halt_reason.unwrap_or_default();
            error!("Trading halted: {} (drawdown {:.2}%)", reason, drawdown * 100.0);
            self.events.publish(EngineEvent::TradingHalted { reason, at: now });
        }

        let timer = AgentMetrics::start_timer();
        self.service_exits(now).await;
        self.metrics.record_exit_duration(timer);

        if self.risk.is_halted() {
            debug!("Trading halted, skipping signal generation");
            self.last_signals.clear();
            self.finish_cycle(cycle_start);
            return;
        }

        let timer = AgentMetrics::start_timer();
        let trends = self.trend_contexts(&refreshed);
        let account = self.positions.get_account_info();
        let snapshots: Vec<InstrumentSnapshot<'_>> = refreshed
            .iter()
            .filter_map(|instrument| {
                Some(InstrumentSnapshot {
                    instrument,
                    history: self.cache.primary(instrument)?,
                    trend: trends.get(instrument),
                })
            })
            .collect();
        let outcome = self.fusion.generate(&snapshots, &account, now);
        self.metrics.record_fusion_duration(timer);

        self.metrics.signals_generated += outcome.candidates as u64;
        self.metrics.signals_filtered += outcome.rejected.len() as u64;
        for rejected in &outcome.rejected {
            debug!(
                "Filtered {} {} from {}: {}",
                rejected.signal.action,
                rejected.signal.instrument,
                rejected.signal.strategy,
                rejected.reason
            );
        }

        for signal in &outcome.signals {
            if let Err(e) = self.persistence.save_signal(signal).await {
                warn!("Failed to persist signal {}: {}", signal.id, e);
            }
        }
        self.last_signals = outcome.signals.clone();
        self.events.publish(EngineEvent::Signals {
            cycle: self.cycle,
            signals: outcome.signals.clone(),
        });

        let timer = AgentMetrics::start_timer();
        let reviewed = self.review_signals(outcome.signals, &trends, now).await;
        self.metrics.record_advisory_duration(timer);

        let timer = AgentMetrics::start_timer();
        self.execute_signals(reviewed, now).await;
        self.metrics.record_execution_duration(timer);

        self.finish_cycle(cycle_start);
    }

    fn finish_cycle(&mut self, cycle_start: std::time::Instant) {
        self.metrics.finish_cycle(cycle_start);
        self.publish_status();
    }

    fn drain_streams(&mut self) {
        let cache = &mut self.cache;
        self.streams.retain_mut(|rx| loop {
            match rx.try_recv() {
                Ok(event) => cache.apply_stream_event(event),
                Err(TryRecvError::Empty) => break true,
                Err(TryRecvError::Disconnected) => break false,
            }
        });
    }

    async fn mark_to_market(&mut self) {
        for position in self.positions.positions() {
            let Some(price) = self.cache.latest_price(&position.instrument) else {
                continue;
            };
            if let Some(updated) = self.positions.update_price(&position.instrument, price) {
                if let Err(e) = self.persistence.update_position(updated).await {
                    warn!("Failed to persist position {}: {}", updated.id, e);
                }
            }
        }
    }

    fn trend_contexts(&self, instruments: &[String]) -> HashMap<String, TrendContext> {
        instruments
            .iter()
            .filter_map(|instrument| {
                let data = self.cache.data(instrument)?;
                let primary = data.get(Timeframe::Min1)?;
                let trend = self
                    .trend
                    .analyze_trend(primary, HigherTimeframes::from_data(data));
                Some((instrument.clone(), trend))
            })
            .collect()
    }

    /// Close positions whose exit rules fire. Runs even while halted.
    async fn service_exits(&mut self, now: DateTime<Utc>) {
        for position in self.positions.positions() {
            let Some(exit) = evaluate_exit(&position, &self.risk, &self.exit_rules, now) else {
                continue;
            };
            match self
                .executor
                .close_position(
                    &mut self.positions,
                    &position.instrument,
                    exit.exit_price,
                    exit.reason(),
                    now,
                )
                .await
            {
                Ok(closed) => self.record_close(&closed),
                Err(e) => warn!("Exit for {} failed: {}", position.instrument, e),
            }
        }
    }

    /// Run autonomous candidates past the advisory gate, then apply the
    /// strategy's follow policy to whatever came back. Other signals pass
    /// through untouched.
    pub(crate) async fn review_signals(
        &mut self,
        signals: Vec<Signal>,
        trends: &HashMap<String, TrendContext>,
        now: DateTime<Utc>,
    ) -> Vec<Signal> {
        let available_balance = self.positions.get_account_info().available_balance;
        let mut out = Vec::with_capacity(signals.len());

        for signal in signals {
            let policy = self.fusion.policy(&signal.strategy);
            if !policy.autonomous {
                out.push(signal);
                continue;
            }

            let price = self
                .cache
                .latest_price(&signal.instrument)
                .or(signal.entry_price)
                .unwrap_or(0.0);
            let context = AdvisoryContext {
                instrument: signal.instrument.clone(),
                price,
                trend: trends.get(&signal.instrument).cloned(),
                position: signal.position_context.clone(),
                available_balance,
                signal,
            };
            match self.gate.review(context, now).await {
                GateVerdict::Approved { signal, source } => {
                    debug!("Advisory approved {} {} ({:?})", signal.action, signal.instrument, source);
                    self.metrics.signals_advisory_approved += 1;
                    if policy.follows(&signal) {
                        out.push(signal);
                    } else {
                        debug!(
                            "Dropping {} {} from {}: {}",
                            signal.action,
                            signal.instrument,
                            signal.strategy,
                            StrategyPolicy::rejection_reason(&signal)
                        );
                        self.metrics.signals_filtered += 1;
                    }
                }
                GateVerdict::Rejected { reason, source } => {
                    debug!("Advisory rejected candidate ({:?}): {}", source, reason);
                    self.metrics.signals_advisory_rejected += 1;
                }
            }
        }
        out
    }

    /// Execute signals in rank order against the venue.
    pub(crate) async fn execute_signals(&mut self, signals: Vec<Signal>, now: DateTime<Utc>) {
        for signal in signals {
            match signal.action {
                SignalAction::Hold => continue,
                SignalAction::Close => {
                    self.close_for_signal(&signal, now).await;
                    continue;
                }
                SignalAction::Buy | SignalAction::Sell => {}
            }

            if signal.strength < self.config.min_execution_strength
                || signal.confidence < self.config.min_execution_confidence
            {
                debug!(
                    "{} {} below execution floors (strength {:.2}, confidence {:.2})",
                    signal.action, signal.instrument, signal.strength, signal.confidence
                );
                continue;
            }

            if let Some(existing) = self.positions.position(&signal.instrument).cloned() {
                if signal.action.entry_side() == Some(existing.side) {
                    debug!("Already {} {}, ignoring {}", existing.side, signal.instrument, signal.action);
                    continue;
                }
                if signal.strength < self.config.reversal_strength_threshold {
                    debug!(
                        "Reversal on {} too weak ({:.2} < {:.2})",
                        signal.instrument, signal.strength, self.config.reversal_strength_threshold
                    );
                    continue;
                }
                if !self.risk_approves(&signal) {
                    continue;
                }
                let exit_price = self
                    .cache
                    .latest_price(&signal.instrument)
                    .unwrap_or(existing.current_price);
                match self
                    .executor
                    .close_position(&mut self.positions, &signal.instrument, exit_price, "reversal", now)
                    .await
                {
                    Ok(closed) => self.record_close(&closed),
                    Err(e) => {
                        warn!("Reversal close failed for {}: {}", signal.instrument, e);
                        continue;
                    }
                }
            }

            if !self.risk_approves(&signal) {
                continue;
            }

            let Some(price) = self
                .cache
                .latest_price(&signal.instrument)
                .or(signal.entry_price)
            else {
                warn!("No price for {}, skipping", signal.instrument);
                continue;
            };
            match self
                .executor
                .open_position(&mut self.positions, &signal, price, now)
                .await
            {
                Ok(_) => self.metrics.trades_executed += 1,
                Err(e) => {
                    warn!("Failed to open {} {}: {}", signal.action, signal.instrument, e);
                    self.metrics.trades_failed += 1;
                }
            }
        }
    }

    async fn close_for_signal(&mut self, signal: &Signal, now: DateTime<Utc>) {
        let Some(position) = self.positions.position(&signal.instrument).cloned() else {
            debug!("Close signal for {} with no open position", signal.instrument);
            return;
        };
        let price = self
            .cache
            .latest_price(&signal.instrument)
            .unwrap_or(position.current_price);
        let reason = if signal.reason.is_empty() {
            format!("{} close", signal.strategy)
        } else {
            signal.reason.clone()
        };
        match self
            .executor
            .close_position(&mut self.positions, &signal.instrument, price, &reason, now)
            .await
        {
            Ok(closed) => self.record_close(&closed),
            Err(e) => warn!("Close failed for {}: {}", signal.instrument, e),
        }
    }

    fn risk_approves(&mut self, signal: &Signal) -> bool {
        let account = self.positions.get_account_info();
        let check = self.risk.validate_signal(signal, &account);
        if !check.valid {
            debug!(
                "Risk rejected {} {}: {}",
                signal.action,
                signal.instrument,
                check.reason.as_deref().unwrap_or("no reason")
            );
            self.metrics.signals_risk_rejected += 1;
        }
        check.valid
    }

    fn record_close(&mut self, closed: &ClosedPosition) {
        self.risk.record_realized_pnl(closed.realized_pnl);
        self.metrics.record_trade_result(closed.realized_pnl);
    }

    /// Close everything best-effort, then release the streams.
    pub async fn shutdown(&mut self) {
        self.set_state(EngineState::Stopping);
        let now = Utc::now();
        for position in self.positions.positions() {
            let price = self
                .cache
                .latest_price(&position.instrument)
                .unwrap_or(position.current_price);
            match self
                .executor
                .close_position(&mut self.positions, &position.instrument, price, "shutdown", now)
                .await
            {
                Ok(closed) => self.record_close(&closed),
                Err(e) => error!("Failed to close {} on shutdown: {}", position.instrument, e),
            }
        }

        self.streams.clear();
        self.market.disconnect().await;
        self.metrics.log_metrics();
        self.set_state(EngineState::Stopped);
        info!("Engine stopped");
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state != state {
            debug!("Engine state {} -> {}", self.state.as_str(), state.as_str());
            self.state = state;
            self.events.publish(EngineEvent::StateChanged(state));
        }
        self.publish_status();
    }

    fn publish_status(&self) {
        let account = self.positions.get_account_info();
        let stats = self.positions.stats();
        let risk = self.risk.state();
        self.status_tx.send_replace(EngineStatus {
            running: self.state == EngineState::Running,
            state: self.state,
            cycle: self.cycle,
            balance: account.total_balance,
            equity: account.equity(),
            available_balance: account.available_balance,
            open_positions: account.open_positions.len(),
            realized_pnl: stats.realized_pnl,
            unrealized_pnl: account.unrealized_pnl,
            win_rate: stats.win_rate,
            halted: risk.trading_halted,
            halt_reason: risk.halt_reason,
            positions: account.open_positions,
            last_signals: self.last_signals.clone(),
            metrics: self.metrics.snapshot(),
            updated_at: Utc::now(),
        });
    }
}
