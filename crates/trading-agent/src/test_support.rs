//! In-memory collaborators for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use trading_core::*;

use crate::config::AgentConfig;

pub fn test_config(instruments: &str) -> AgentConfig {
    let vars: HashMap<&str, &str> = [
        ("INSTRUMENTS", instruments),
        ("CANDLE_LIMIT", "60"),
        ("WARMUP_TIMEOUT_SECONDS", "1"),
        ("CYCLE_INTERVAL_SECONDS", "1"),
        ("ADVISORY_TIMEOUT_MS", "50"),
    ]
    .into_iter()
    .collect();
    AgentConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap()
}

pub fn flat_candles(instrument: &str, timeframe: Timeframe, price: f64, limit: usize) -> Vec<MarketSample> {
    let now = Utc::now();
    (0..limit)
        .map(|i| {
            let timestamp = now - timeframe.to_duration() * (limit - 1 - i) as i32;
            MarketSample {
                instrument: instrument.to_string(),
                timestamp,
                open: price,
                high: price * 1.0005,
                low: price * 0.9995,
                close: price,
                volume: 100.0,
                bid: price * 0.99995,
                ask: price * 1.00005,
                spread: price * 0.0001,
                bid_size: 5.0,
                ask_size: 5.0,
                order_book: None,
                funding: None,
            }
        })
        .collect()
}

/// Market with one settable price per instrument and flat candles.
#[derive(Default)]
pub struct FakeMarket {
    prices: Mutex<HashMap<String, f64>>,
    failing: Mutex<HashSet<String>>,
    failing_timeframes: Mutex<HashSet<Timeframe>>,
    refuse_connect: AtomicBool,
    connected: AtomicBool,
    streams: Mutex<Vec<mpsc::Sender<StreamEvent>>>,
}

impl FakeMarket {
    pub fn new(prices: &[(&str, f64)]) -> Self {
        let market = Self::default();
        for (instrument, price) in prices {
            market.set_price(instrument, *price);
        }
        market
    }

    pub fn set_price(&self, instrument: &str, price: f64) {
        self.prices.lock().unwrap().insert(instrument.to_string(), price);
    }

    pub fn fail_instrument(&self, instrument: &str) {
        self.failing.lock().unwrap().insert(instrument.to_string());
    }

    pub fn fail_timeframe(&self, timeframe: Timeframe, failing: bool) {
        let mut set = self.failing_timeframes.lock().unwrap();
        if failing {
            set.insert(timeframe);
        } else {
            set.remove(&timeframe);
        }
    }

    pub fn refuse_connect(&self) {
        self.refuse_connect.store(true, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.streams.lock().unwrap().len()
    }

    /// Push an event to every open subscription.
    pub fn push_event(&self, event: StreamEvent) {
        for tx in self.streams.lock().unwrap().iter() {
            let _ = tx.try_send(event.clone());
        }
    }

    fn price(&self, instrument: &str) -> TradingResult<f64> {
        if self.failing.lock().unwrap().contains(instrument) {
            return Err(TradingError::DataUnavailable(format!("{} unavailable", instrument)));
        }
        self.prices
            .lock()
            .unwrap()
            .get(instrument)
            .copied()
            .ok_or_else(|| TradingError::DataUnavailable(instrument.to_string()))
    }
}

#[async_trait]
impl MarketDataSource for FakeMarket {
    async fn connect(&self) -> TradingResult<()> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(TradingError::Connection("refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_candles(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> TradingResult<Vec<MarketSample>> {
        let price = self.price(instrument)?;
        if self.failing_timeframes.lock().unwrap().contains(&timeframe) {
            return Err(TradingError::DataUnavailable(format!("{} {} unavailable", instrument, timeframe.name())));
        }
        Ok(flat_candles(instrument, timeframe, price, limit))
    }

    async fn fetch_order_book(&self, instrument: &str, depth: usize) -> TradingResult<OrderBookSnapshot> {
        let price = self.price(instrument)?;
        let level = |i: usize, sign: f64| BookLevel {
            price: price * (1.0 + sign * 0.00005 * (i + 1) as f64),
            size: 5.0,
        };
        Ok(OrderBookSnapshot {
            timestamp: Utc::now(),
            bids: (0..depth).map(|i| level(i, -1.0)).collect(),
            asks: (0..depth).map(|i| level(i, 1.0)).collect(),
        })
    }

    async fn fetch_funding_rate(&self, instrument: &str) -> TradingResult<Option<FundingInfo>> {
        self.price(instrument)?;
        Ok(Some(FundingInfo {
            rate: 0.0001,
            next_funding_time: Utc::now() + chrono::Duration::hours(4),
        }))
    }

    async fn subscribe(&self, _instrument: &str) -> TradingResult<mpsc::Receiver<StreamEvent>> {
        let (tx, rx) = mpsc::channel(16);
        self.streams.lock().unwrap().push(tx);
        Ok(rx)
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.streams.lock().unwrap().clear();
    }

    fn source_name(&self) -> &str {
        "fake"
    }
}

/// Records every order; fills immediately unless told to fail.
#[derive(Default)]
pub struct FakeSink {
    orders: Mutex<Vec<OrderRequest>>,
    failing: AtomicBool,
}

impl FakeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionSink for FakeSink {
    async fn place_order(&self, order: OrderRequest) -> TradingResult<Order> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TradingError::Execution("venue rejected order".to_string()));
        }
        let filled_qty: Decimal = order.quantity;
        self.orders.lock().unwrap().push(order);
        Ok(Order {
            id: uuid::Uuid::new_v4().to_string(),
            status: OrderStatus::Filled,
            filled_qty,
            avg_price: None,
        })
    }

    fn is_paper(&self) -> bool {
        true
    }

    fn venue_name(&self) -> &str {
        "fake"
    }
}

#[derive(Default)]
pub struct MemoryPersistence {
    trades: Mutex<Vec<TradeRecord>>,
    open: Mutex<HashMap<String, Position>>,
    closed: Mutex<Vec<ClosedPosition>>,
    configs: Mutex<Vec<StrategyConfig>>,
    failing: AtomicBool,
    config_error: AtomicBool,
}

impl MemoryPersistence {
    pub fn with_configs(configs: Vec<StrategyConfig>) -> Self {
        let store = Self::default();
        *store.configs.lock().unwrap() = configs;
        store
    }

    pub fn set_configs(&self, configs: Vec<StrategyConfig>) {
        *self.configs.lock().unwrap() = configs;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_config_error(&self, error: bool) {
        self.config_error.store(error, Ordering::SeqCst);
    }

    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().unwrap().clone()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.open.lock().unwrap().values().cloned().collect()
    }

    pub fn closed_positions(&self) -> Vec<ClosedPosition> {
        self.closed.lock().unwrap().clone()
    }

    fn check(&self) -> TradingResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(TradingError::Persistence("disk full".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn save_signal(&self, _signal: &Signal) -> TradingResult<()> {
        self.check()
    }

    async fn save_trade(&self, trade: &TradeRecord) -> TradingResult<()> {
        self.check()?;
        self.trades.lock().unwrap().push(trade.clone());
        Ok(())
    }

    async fn update_position(&self, position: &Position) -> TradingResult<()> {
        self.check()?;
        self.open
            .lock()
            .unwrap()
            .insert(position.id.clone(), position.clone());
        Ok(())
    }

    async fn close_position(&self, closed: &ClosedPosition) -> TradingResult<()> {
        self.check()?;
        self.open.lock().unwrap().remove(&closed.position.id);
        self.closed.lock().unwrap().push(closed.clone());
        Ok(())
    }

    async fn load_strategy_config(&self, _account_id: &str) -> TradingResult<Vec<StrategyConfig>> {
        if self.config_error.load(Ordering::SeqCst) {
            return Err(TradingError::Persistence("config table missing".to_string()));
        }
        Ok(self.configs.lock().unwrap().clone())
    }
}

/// Advisory stub returning a fixed decision, optionally slow or failing.
pub struct FakeAdvisory {
    decision: Option<AdvisoryDecision>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeAdvisory {
    pub fn responding(decision: AdvisoryDecision) -> Self {
        Self {
            decision: Some(decision),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            decision: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdvisoryProvider for FakeAdvisory {
    async fn get_decision(&self, _context: &AdvisoryContext) -> TradingResult<AdvisoryDecision> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.decision
            .clone()
            .ok_or_else(|| TradingError::Advisory("service down".to_string()))
    }

    fn provider_name(&self) -> &str {
        "fake"
    }
}
