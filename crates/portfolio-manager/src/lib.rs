pub mod error;
pub mod manager;
pub mod models;

pub use error::{PositionError, PositionResult};
pub use manager::PositionManager;
pub use models::*;
