use thiserror::Error;
use trading_core::TradingError;

#[derive(Error, Debug)]
pub enum AdvisoryError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type AdvisoryResult<T> = Result<T, AdvisoryError>;

impl From<AdvisoryError> for TradingError {
    fn from(err: AdvisoryError) -> Self {
        TradingError::Advisory(err.to_string())
    }
}
