use async_trait::async_trait;
use tracing::debug;
use trading_core::{AdvisoryContext, AdvisoryDecision, AdvisoryProvider, TradingResult};

use crate::error::{AdvisoryError, AdvisoryResult};
use crate::AdvisoryConfig;

/// HTTP client for the advisory decision service.
#[derive(Clone)]
pub struct AdvisoryClient {
    client: reqwest::Client,
    base_url: String,
}

impl AdvisoryClient {
    pub fn new(config: AdvisoryConfig) -> AdvisoryResult<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the service what to do with a candidate signal
    pub async fn decide(&self, context: &AdvisoryContext) -> AdvisoryResult<AdvisoryDecision> {
        let response = self
            .client
            .post(format!("{}/decision", self.base_url))
            .json(context)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AdvisoryError::ServiceUnavailable(format!(
                "Status: {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        let decision = parse_decision(&body)?;
        debug!(
            "Advisory decision for {}: {} ({:.2})",
            context.instrument, decision.action, decision.confidence
        );
        Ok(decision)
    }

    /// Check service health
    pub async fn health(&self) -> AdvisoryResult<bool> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;

        Ok(response.status().is_success())
    }
}

/// Decode a decision body, rejecting confidences outside [0, 1].
pub fn parse_decision(body: &str) -> AdvisoryResult<AdvisoryDecision> {
    let decision: AdvisoryDecision = serde_json::from_str(body)?;
    if !decision.confidence.is_finite() || !(0.0..=1.0).contains(&decision.confidence) {
        return Err(AdvisoryError::InvalidResponse(format!(
            "confidence {} out of range",
            decision.confidence
        )));
    }
    Ok(decision)
}

#[async_trait]
impl AdvisoryProvider for AdvisoryClient {
    async fn get_decision(&self, context: &AdvisoryContext) -> TradingResult<AdvisoryDecision> {
        Ok(self.decide(context).await?)
    }

    fn provider_name(&self) -> &str {
        "http"
    }
}
