use chrono::{DateTime, Duration, TimeZone, Utc};
use trading_core::{MarketSample, Position, PositionSide};

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn sample_at(i: usize, close: f64, volume: f64) -> MarketSample {
    MarketSample {
        instrument: "BTCUSDT".to_string(),
        timestamp: start_time() + Duration::minutes(i as i64),
        open: close,
        high: close + 0.5,
        low: close - 0.5,
        close,
        volume,
        bid: 0.0,
        ask: 0.0,
        spread: 0.0,
        bid_size: 0.0,
        ask_size: 0.0,
        order_book: None,
        funding: None,
    }
}

pub fn flat_history(n: usize, price: f64) -> Vec<MarketSample> {
    (0..n).map(|i| sample_at(i, price, 1000.0)).collect()
}

pub fn open_position(
    strategy: &str,
    side: PositionSide,
    entry: f64,
    opened_at: DateTime<Utc>,
) -> Position {
    Position {
        id: format!("{}-pos", strategy),
        instrument: "BTCUSDT".to_string(),
        side,
        entry_price: entry,
        current_price: entry,
        quantity: 1.0,
        value: entry,
        pnl: 0.0,
        pnl_percent: 0.0,
        stop_loss: None,
        take_profit: None,
        opened_at,
        leverage: 1.0,
        strategy: strategy.to_string(),
        peak_pnl_percent: 0.0,
    }
}
