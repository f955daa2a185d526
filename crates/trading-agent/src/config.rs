use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use portfolio_manager::PositionManagerConfig;
use risk_manager::RiskParameters;
use serde::{Deserialize, Serialize};
use signal_engine::FusionConfig;

use crate::advisory_gate::AdvisoryGateConfig;
use crate::position_monitor::ExitRules;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub account_id: String,
    pub instruments: Vec<String>,

    // Cycle
    pub cycle_interval_seconds: u64,      // 5
    pub candle_limit: usize,              // 200
    pub order_book_depth: usize,          // 20
    pub warmup_timeout_seconds: u64,      // 30

    // Account and risk
    pub initial_balance: f64,             // 10000
    pub leverage: f64,                    // 10x
    pub risk_per_trade: f64,              // 0.02
    pub max_daily_loss: f64,              // 0.05 of day-start balance
    pub max_drawdown: f64,                // 0.15 of peak
    pub max_open_positions: usize,        // 5
    pub min_reward_risk: f64,             // 1.5

    // Execution gate (coarser than the fusion filters)
    pub min_execution_strength: f64,      // 0.3
    pub min_execution_confidence: f64,    // 0.3
    pub reversal_strength_threshold: f64, // 0.8

    // Position exits
    pub profit_lock_trigger_percent: f64, // 1.5
    pub profit_lock_retain_fraction: f64, // 0.5
    pub max_position_loss_percent: f64,   // 5.0

    // Advisory service
    pub advisory_url: Option<String>,
    pub advisory_timeout_ms: u64,         // 100
    pub advisory_cache_ttl_seconds: u64,  // 5
    pub advisory_fallback_confidence: f64, // 0.6

    // Storage
    pub database_url: String,

    pub paper_trading: bool,
    pub metrics_log_interval_cycles: u64, // 10
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, falling back to defaults for
    /// anything missing. Validates the result.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            account_id: lookup("ACCOUNT_ID").unwrap_or_else(|| "paper".to_string()),
            instruments: lookup("INSTRUMENTS")
                .unwrap_or_else(|| "BTCUSDT,ETHUSDT,SOLUSDT".to_string())
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),

            cycle_interval_seconds: parse_or(&lookup, "CYCLE_INTERVAL_SECONDS", 5)?,
            candle_limit: parse_or(&lookup, "CANDLE_LIMIT", 200)?,
            order_book_depth: parse_or(&lookup, "ORDER_BOOK_DEPTH", 20)?,
            warmup_timeout_seconds: parse_or(&lookup, "WARMUP_TIMEOUT_SECONDS", 30)?,

            initial_balance: parse_or(&lookup, "INITIAL_BALANCE", 10_000.0)?,
            leverage: parse_or(&lookup, "LEVERAGE", 10.0)?,
            risk_per_trade: parse_or(&lookup, "RISK_PER_TRADE", 0.02)?,
            max_daily_loss: parse_or(&lookup, "MAX_DAILY_LOSS", 0.05)?,
            max_drawdown: parse_or(&lookup, "MAX_DRAWDOWN", 0.15)?,
            max_open_positions: parse_or(&lookup, "MAX_OPEN_POSITIONS", 5)?,
            min_reward_risk: parse_or(&lookup, "MIN_REWARD_RISK", 1.5)?,

            min_execution_strength: parse_or(&lookup, "MIN_EXECUTION_STRENGTH", 0.3)?,
            min_execution_confidence: parse_or(&lookup, "MIN_EXECUTION_CONFIDENCE", 0.3)?,
            reversal_strength_threshold: parse_or(&lookup, "REVERSAL_STRENGTH_THRESHOLD", 0.8)?,

            profit_lock_trigger_percent: parse_or(&lookup, "PROFIT_LOCK_TRIGGER_PERCENT", 1.5)?,
            profit_lock_retain_fraction: parse_or(&lookup, "PROFIT_LOCK_RETAIN_FRACTION", 0.5)?,
            max_position_loss_percent: parse_or(&lookup, "MAX_POSITION_LOSS_PERCENT", 5.0)?,

            advisory_url: lookup("ADVISORY_URL").filter(|s| !s.trim().is_empty()),
            advisory_timeout_ms: parse_or(&lookup, "ADVISORY_TIMEOUT_MS", 100)?,
            advisory_cache_ttl_seconds: parse_or(&lookup, "ADVISORY_CACHE_TTL_SECONDS", 5)?,
            advisory_fallback_confidence: parse_or(&lookup, "ADVISORY_FALLBACK_CONFIDENCE", 0.6)?,

            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite:trading.db?mode=rwc".to_string()),

            paper_trading: parse_or(&lookup, "PAPER_TRADING", true)?,
            metrics_log_interval_cycles: parse_or(&lookup, "METRICS_LOG_INTERVAL_CYCLES", 10)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings before anything starts.
    pub fn validate(&self) -> Result<()> {
        if self.instruments.is_empty() {
            bail!("INSTRUMENTS must name at least one instrument");
        }
        if self.cycle_interval_seconds == 0 {
            bail!("CYCLE_INTERVAL_SECONDS must be positive");
        }
        if self.candle_limit < multi_timeframe::MIN_TREND_SAMPLES {
            bail!(
                "CANDLE_LIMIT must be at least {}",
                multi_timeframe::MIN_TREND_SAMPLES
            );
        }
        if !(self.initial_balance.is_finite() && self.initial_balance > 0.0) {
            bail!("INITIAL_BALANCE must be positive");
        }
        if !(self.leverage.is_finite() && self.leverage >= 1.0) {
            bail!("LEVERAGE must be at least 1");
        }
        for (name, value) in [
            ("RISK_PER_TRADE", self.risk_per_trade),
            ("MAX_DAILY_LOSS", self.max_daily_loss),
            ("MAX_DRAWDOWN", self.max_drawdown),
            ("MIN_EXECUTION_STRENGTH", self.min_execution_strength),
            ("MIN_EXECUTION_CONFIDENCE", self.min_execution_confidence),
            ("REVERSAL_STRENGTH_THRESHOLD", self.reversal_strength_threshold),
            ("PROFIT_LOCK_RETAIN_FRACTION", self.profit_lock_retain_fraction),
            ("ADVISORY_FALLBACK_CONFIDENCE", self.advisory_fallback_confidence),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                bail!("{} must be in (0, 1], got {}", name, value);
            }
        }
        if self.max_open_positions == 0 {
            bail!("MAX_OPEN_POSITIONS must be positive");
        }
        if self.min_reward_risk <= 0.0 {
            bail!("MIN_REWARD_RISK must be positive");
        }
        if self.profit_lock_trigger_percent <= 0.0 || self.max_position_loss_percent <= 0.0 {
            bail!("profit-lock trigger and max position loss must be positive");
        }
        if self.advisory_timeout_ms == 0 {
            bail!("ADVISORY_TIMEOUT_MS must be positive");
        }
        Ok(())
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_seconds)
    }

    pub fn risk_parameters(&self) -> RiskParameters {
        RiskParameters {
            max_daily_loss: self.max_daily_loss,
            max_drawdown: self.max_drawdown,
            max_open_positions: self.max_open_positions,
            min_reward_risk: self.min_reward_risk,
            risk_per_trade: self.risk_per_trade,
            leverage: self.leverage,
            ..RiskParameters::default()
        }
    }

    pub fn position_config(&self) -> PositionManagerConfig {
        PositionManagerConfig {
            leverage: self.leverage,
            risk_per_trade: self.risk_per_trade,
            ..PositionManagerConfig::default()
        }
    }

    pub fn fusion_config(&self) -> FusionConfig {
        FusionConfig {
            max_positions: self.max_open_positions,
            ..FusionConfig::default()
        }
    }

    pub fn exit_rules(&self) -> ExitRules {
        ExitRules {
            profit_lock_trigger_percent: self.profit_lock_trigger_percent,
            profit_lock_retain_fraction: self.profit_lock_retain_fraction,
            max_position_loss_percent: self.max_position_loss_percent,
        }
    }

    pub fn advisory_gate_config(&self) -> AdvisoryGateConfig {
        AdvisoryGateConfig {
            timeout: Duration::from_millis(self.advisory_timeout_ms),
            cache_ttl_seconds: self.advisory_cache_ttl_seconds as i64,
            fallback_min_confidence: self.advisory_fallback_confidence,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        _ => Ok(default),
    }
}
