pub mod client;
pub mod error;

pub use client::AdvisoryClient;
pub use error::{AdvisoryError, AdvisoryResult};

use std::time::Duration;

/// Configuration for the advisory service
#[derive(Debug, Clone)]
pub struct AdvisoryConfig {
    pub base_url: String,
    /// Transport-level ceiling; callers apply their own tighter decision timeout
    pub timeout: Duration,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("ADVISORY_URL")
                .unwrap_or_else(|_| "http://localhost:8010".to_string()),
            timeout: Duration::from_secs(2),
        }
    }
}
