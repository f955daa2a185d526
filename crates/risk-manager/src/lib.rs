pub mod manager;
pub mod models;
#[cfg(test)]
mod tests;

pub use manager::RiskManager;
pub use models::*;
