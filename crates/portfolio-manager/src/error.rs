use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PositionError {
    #[error("Position already open for {0}")]
    AlreadyOpen(String),

    #[error("No open position for {0}")]
    NotFound(String),

    #[error("Invalid price {price} for {instrument}")]
    InvalidPrice { instrument: String, price: f64 },

    #[error("Invalid quantity {quantity} for {instrument}")]
    InvalidQuantity { instrument: String, quantity: f64 },
}

pub type PositionResult<T> = Result<T, PositionError>;
