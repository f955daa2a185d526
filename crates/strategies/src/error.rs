use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid parameters for {strategy}: {source}")]
    InvalidParameters {
        strategy: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Indicator {0} unavailable")]
    IndicatorUnavailable(&'static str),

    #[error("Invalid market data: {0}")]
    InvalidData(String),
}

pub type StrategyResult<T> = Result<T, StrategyError>;
