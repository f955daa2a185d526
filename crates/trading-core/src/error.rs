use thiserror::Error;

#[derive(Error, Debug)]
pub enum TradingError {
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Advisory error: {0}")]
    Advisory(String),

    #[error("Advisory timed out after {0}ms")]
    AdvisoryTimeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

pub type TradingResult<T> = Result<T, TradingError>;
