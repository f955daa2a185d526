use serde::{Deserialize, Serialize};
use trading_core::PositionSide;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionManagerConfig {
    pub leverage: f64,
    /// Fraction of available balance risked per trade
    pub risk_per_trade: f64,
    /// Smallest margin commitment worth placing, in quote currency
    pub min_order_size: f64,
    /// Cap on margin for a single position, as a fraction of available balance
    pub max_balance_fraction: f64,
    /// Stop distance used when the caller has no stop, in percent
    pub default_stop_percent: f64,
}

impl Default for PositionManagerConfig {
    fn default() -> Self {
        Self {
            leverage: 10.0,
            risk_per_trade: 0.02,
            min_order_size: 10.0,
            max_balance_fraction: 0.9,
            default_stop_percent: 2.0,
        }
    }
}

/// Everything needed to open a position.
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub instrument: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub strategy: String,
}

/// Outcome counts over closed positions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioStats {
    pub closed_positions: usize,
    pub winning: usize,
    pub losing: usize,
    /// Fraction of closed positions with positive realized pnl
    pub win_rate: f64,
    pub realized_pnl: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
}
