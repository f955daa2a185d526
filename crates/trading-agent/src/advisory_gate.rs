use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use trading_core::{AdvisoryContext, AdvisoryDecision, AdvisoryProvider, Signal, SignalAction};

#[derive(Debug, Clone)]
pub struct AdvisoryGateConfig {
    /// Upper bound on one advisory call
    pub timeout: Duration,
    pub cache_ttl_seconds: i64,
    /// Local rule: minimum confidence when the service is unavailable
    pub fallback_min_confidence: f64,
}

impl Default for AdvisoryGateConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(100),
            cache_ttl_seconds: 5,
            fallback_min_confidence: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    Advisory,
    Cached,
    Fallback,
}

#[derive(Debug, Clone)]
pub enum GateVerdict {
    /// Signal to execute, possibly rewritten by the advisory decision
    Approved { signal: Signal, source: DecisionSource },
    Rejected { reason: String, source: DecisionSource },
}

impl GateVerdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, GateVerdict::Approved { .. })
    }

    pub fn source(&self) -> DecisionSource {
        match self {
            GateVerdict::Approved { source, .. } | GateVerdict::Rejected { source, .. } => *source,
        }
    }
}

struct CachedDecision {
    decision: AdvisoryDecision,
    cached_at: DateTime<Utc>,
}

/// Reviews autonomous execution candidates with the advisory service.
/// Each call is raced against a timeout; on timeout or error a local
/// confidence/trend rule decides instead.
pub struct AdvisoryGate {
    provider: Option<Arc<dyn AdvisoryProvider>>,
    config: AdvisoryGateConfig,
    cache: HashMap<String, CachedDecision>,
}

impl AdvisoryGate {
    pub fn new(provider: Option<Arc<dyn AdvisoryProvider>>, config: AdvisoryGateConfig) -> Self {
        Self {
            provider,
            config,
            cache: HashMap::new(),
        }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    pub async fn review(&mut self, context: AdvisoryContext, now: DateTime<Utc>) -> GateVerdict {
        let ttl = chrono::Duration::seconds(self.config.cache_ttl_seconds);
        self.cache.retain(|_, c| now - c.cached_at < ttl);

        let Some(provider) = self.provider.clone() else {
            return self.fallback(&context);
        };

        let key = cache_key(&context.instrument, context.price);
        if let Some(cached) = self.cache.get(&key) {
            debug!("Advisory cache hit for {}", key);
            return apply_decision(context.signal, &cached.decision, DecisionSource::Cached);
        }

        match tokio::time::timeout(self.config.timeout, provider.get_decision(&context)).await {
            Ok(Ok(decision)) => {
                let verdict = apply_decision(context.signal, &decision, DecisionSource::Advisory);
                self.cache.insert(
                    key,
                    CachedDecision {
                        decision,
                        cached_at: now,
                    },
                );
                verdict
            }
            Ok(Err(e)) => {
                warn!("Advisory unavailable ({}), using local rule", e);
                self.fallback(&context)
            }
            Err(_) => {
                warn!(
                    "Advisory timed out after {}ms, using local rule",
                    self.config.timeout.as_millis()
                );
                self.fallback(&context)
            }
        }
    }

    /// Approve when confidence clears the floor and the primary trend does
    /// not point against the signal.
    fn fallback(&self, context: &AdvisoryContext) -> GateVerdict {
        let signal = &context.signal;
        if signal.confidence < self.config.fallback_min_confidence {
            return GateVerdict::Rejected {
                reason: format!(
                    "fallback: confidence {:.2} < {:.2}",
                    signal.confidence, self.config.fallback_min_confidence
                ),
                source: DecisionSource::Fallback,
            };
        }
        if context
            .trend
            .as_ref()
            .map(|t| t.opposes(signal.action))
            .unwrap_or(false)
        {
            return GateVerdict::Rejected {
                reason: "fallback: trend opposes signal".to_string(),
                source: DecisionSource::Fallback,
            };
        }
        GateVerdict::Approved {
            signal: signal.clone(),
            source: DecisionSource::Fallback,
        }
    }
}

fn cache_key(instrument: &str, price: f64) -> String {
    format!("{}:{:.2}", instrument, price)
}

fn apply_decision(mut signal: Signal, decision: &AdvisoryDecision, source: DecisionSource) -> GateVerdict {
    if decision.action == SignalAction::Hold {
        return GateVerdict::Rejected {
            reason: format!("advisory hold: {}", decision.reasoning),
            source,
        };
    }

    signal.action = decision.action;
    signal.confidence = decision.confidence;
    signal.ai_enhanced = true;
    if let Some(entry) = decision.suggested_entry {
        signal.entry_price = Some(entry);
    }
    if let Some(stop) = decision.stop_loss {
        signal.stop_loss = Some(stop);
    }
    if let Some(target) = decision.take_profit {
        signal.take_profit = Some(target);
    }
    if !decision.reasoning.is_empty() {
        signal.reason = format!("{} | advisory: {}", signal.reason, decision.reasoning);
    }
    signal.clamp();

    GateVerdict::Approved { signal, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeAdvisory;
    use trading_core::{Trend, TrendContext};

    fn context(confidence: f64, trend: Option<TrendContext>) -> AdvisoryContext {
        let signal = Signal::new("BTCUSDT", SignalAction::Buy, "momentum", 0.7, confidence, Utc::now())
            .with_levels(100.0, 98.0, 104.0);
        AdvisoryContext {
            instrument: "BTCUSDT".to_string(),
            price: 100.0,
            signal,
            trend,
            position: None,
            available_balance: 10_000.0,
        }
    }

    fn decision(action: SignalAction, confidence: f64) -> AdvisoryDecision {
        AdvisoryDecision {
            action,
            confidence,
            reasoning: "looks good".to_string(),
            suggested_entry: None,
            stop_loss: Some(97.5),
            take_profit: None,
        }
    }

    fn gate(provider: FakeAdvisory) -> (AdvisoryGate, Arc<FakeAdvisory>) {
        let provider = Arc::new(provider);
        let gate = AdvisoryGate::new(
            Some(provider.clone() as Arc<dyn AdvisoryProvider>),
            AdvisoryGateConfig {
                timeout: Duration::from_millis(50),
                ..AdvisoryGateConfig::default()
            },
        );
        (gate, provider)
    }

    #[tokio::test]
    async fn test_decision_overrides_signal() {
        let (mut gate, _) = gate(FakeAdvisory::responding(decision(SignalAction::Buy, 0.9)));
        match gate.review(context(0.5, None), Utc::now()).await {
            GateVerdict::Approved { signal, source } => {
                assert_eq!(source, DecisionSource::Advisory);
                assert!(signal.ai_enhanced);
                assert_eq!(signal.confidence, 0.9);
                assert_eq!(signal.stop_loss, Some(97.5));
                assert_eq!(signal.take_profit, Some(104.0));
            }
            other => panic!("expected approval, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hold_rejects() {
        let (mut gate, _) = gate(FakeAdvisory::responding(decision(SignalAction::Hold, 0.9)));
        let verdict = gate.review(context(0.9, None), Utc::now()).await;
        assert!(!verdict.is_approved());
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_local_rule() {
        let (mut gate, _) = gate(
            FakeAdvisory::responding(decision(SignalAction::Hold, 0.9))
                .with_delay(Duration::from_millis(500)),
        );
        let verdict = gate.review(context(0.8, None), Utc::now()).await;
        assert!(verdict.is_approved());
        assert_eq!(verdict.source(), DecisionSource::Fallback);

        let verdict = gate.review(context(0.4, None), Utc::now()).await;
        assert!(!verdict.is_approved());
    }

    #[tokio::test]
    async fn test_error_falls_back_and_respects_trend() {
        let (mut gate, _) = gate(FakeAdvisory::failing());
        let mut bearish = TrendContext::neutral();
        bearish.primary_trend = Trend::Bearish;
        let verdict = gate.review(context(0.9, Some(bearish)), Utc::now()).await;
        assert_eq!(verdict.source(), DecisionSource::Fallback);
        assert!(!verdict.is_approved());
    }

    #[tokio::test]
    async fn test_cache_reused_within_ttl() {
        let (mut gate, provider) = gate(FakeAdvisory::responding(decision(SignalAction::Buy, 0.9)));
        let now = Utc::now();
        gate.review(context(0.5, None), now).await;
        let verdict = gate.review(context(0.5, None), now + chrono::Duration::seconds(2)).await;
        assert_eq!(verdict.source(), DecisionSource::Cached);
        assert_eq!(provider.calls(), 1);

        let verdict = gate.review(context(0.5, None), now + chrono::Duration::seconds(6)).await;
        assert_eq!(verdict.source(), DecisionSource::Advisory);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_without_provider_uses_local_rule() {
        let mut gate = AdvisoryGate::new(None, AdvisoryGateConfig::default());
        assert!(!gate.has_provider());
        let verdict = gate.review(context(0.65, None), Utc::now()).await;
        assert_eq!(verdict.source(), DecisionSource::Fallback);
        assert!(verdict.is_approved());
    }
}
