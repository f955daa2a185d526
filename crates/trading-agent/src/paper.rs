//! Paper venue and simulated market data for running without an exchange.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, Utc};
use rand::prelude::*;
use rust_decimal::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, info};
use trading_core::{
    BookLevel, ExecutionSink, FundingInfo, MarketDataSource, MarketSample, Order, OrderBookSnapshot,
    OrderRequest, OrderStatus, StreamEvent, Timeframe, TradingError, TradingResult,
};

const MAX_HISTORY: usize = 1_000;

/// Last traded price per instrument, shared by the simulated feed and the
/// paper venue.
#[derive(Clone, Default)]
pub struct PriceBook {
    prices: Arc<Mutex<HashMap<String, f64>>>,
}

impl PriceBook {
    pub fn get(&self, instrument: &str) -> Option<f64> {
        lock(&self.prices).get(instrument).copied()
    }

    pub fn set(&self, instrument: &str, price: f64) {
        if price.is_finite() && price > 0.0 {
            lock(&self.prices).insert(instrument.to_string(), price);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Fills every order immediately at the limit price or the last price.
pub struct PaperBroker {
    prices: PriceBook,
    orders_filled: AtomicU64,
}

impl PaperBroker {
    pub fn new(prices: PriceBook) -> Self {
        Self {
            prices,
            orders_filled: AtomicU64::new(0),
        }
    }

    pub fn orders_filled(&self) -> u64 {
        self.orders_filled.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ExecutionSink for PaperBroker {
    async fn place_order(&self, order: OrderRequest) -> TradingResult<Order> {
        if order.quantity <= Decimal::ZERO {
            return Err(TradingError::Execution(format!(
                "non-positive quantity {} for {}",
                order.quantity, order.instrument
            )));
        }
        let price = match order.price {
            Some(limit) => limit,
            None => self
                .prices
                .get(&order.instrument)
                .and_then(Decimal::from_f64)
                .ok_or_else(|| {
                    TradingError::Execution(format!("no price for {}", order.instrument))
                })?,
        };

        self.orders_filled.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Paper fill: {} {} {} @ {}",
            order.side.as_str(),
            order.quantity,
            order.instrument,
            price
        );
        Ok(Order {
            id: uuid::Uuid::new_v4().to_string(),
            status: OrderStatus::Filled,
            filled_qty: order.quantity,
            avg_price: Some(price),
        })
    }

    fn is_paper(&self) -> bool {
        true
    }

    fn venue_name(&self) -> &str {
        "paper"
    }
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub initial_prices: HashMap<String, f64>,
    /// Standard deviation of a one-minute return
    pub volatility: f64,
    pub spread_percent: f64,
    pub ticker_interval: Duration,
    pub seed: Option<u64>,
}

impl SimulationConfig {
    pub fn for_instruments(instruments: &[String]) -> Self {
        let initial_prices = instruments
            .iter()
            .map(|i| (i.clone(), default_price(i)))
            .collect();
        Self {
            initial_prices,
            volatility: 0.002,
            spread_percent: 0.02,
            ticker_interval: Duration::from_secs(1),
            seed: None,
        }
    }
}

fn default_price(instrument: &str) -> f64 {
    match instrument {
        i if i.starts_with("BTC") => 60_000.0,
        i if i.starts_with("ETH") => 3_000.0,
        i if i.starts_with("SOL") => 150.0,
        _ => 100.0,
    }
}

struct SimState {
    rng: StdRng,
    history: HashMap<(String, Timeframe), VecDeque<MarketSample>>,
}

struct SimInner {
    config: SimulationConfig,
    prices: PriceBook,
    connected: AtomicBool,
    state: Mutex<SimState>,
}

/// Random-walk market data. Every 1m fetch advances the walk by one candle.
#[derive(Clone)]
pub struct SimulatedMarket {
    inner: Arc<SimInner>,
}

impl SimulatedMarket {
    pub fn new(config: SimulationConfig) -> Self {
        let prices = PriceBook::default();
        for (instrument, price) in &config.initial_prices {
            prices.set(instrument, *price);
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            inner: Arc::new(SimInner {
                config,
                prices,
                connected: AtomicBool::new(false),
                state: Mutex::new(SimState {
                    rng,
                    history: HashMap::new(),
                }),
            }),
        }
    }

    pub fn prices(&self) -> PriceBook {
        self.inner.prices.clone()
    }

    fn current_price(&self, instrument: &str) -> TradingResult<f64> {
        self.inner
            .prices
            .get(instrument)
            .ok_or_else(|| TradingError::DataUnavailable(format!("unknown instrument {}", instrument)))
    }

    fn quote(&self, price: f64) -> (f64, f64) {
        let half = price * self.inner.config.spread_percent / 100.0 / 2.0;
        (price - half, price + half)
    }

    fn sample(
        &self,
        instrument: &str,
        timestamp: DateTime<Utc>,
        open: f64,
        close: f64,
        rng: &mut StdRng,
    ) -> MarketSample {
        let wick = close * self.inner.config.volatility * rng.gen_range(0.0..0.5);
        let (bid, ask) = self.quote(close);
        MarketSample {
            instrument: instrument.to_string(),
            timestamp,
            open,
            high: open.max(close) + wick,
            low: (open.min(close) - wick).max(f64::MIN_POSITIVE),
            close,
            volume: rng.gen_range(50.0..150.0),
            bid,
            ask,
            spread: ask - bid,
            bid_size: rng.gen_range(1.0..10.0),
            ask_size: rng.gen_range(1.0..10.0),
            order_book: None,
            funding: None,
        }
    }

    /// Closes of `len` candles walking backwards from `last`, oldest first.
    fn backfill(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        len: usize,
        last: f64,
        rng: &mut StdRng,
    ) -> VecDeque<MarketSample> {
        let step_vol = self.inner.config.volatility * (timeframe.to_duration().num_minutes() as f64).sqrt();
        let mut closes = vec![last];
        for _ in 1..len {
            let prev = closes[closes.len() - 1] / (1.0 + rng.gen_range(-step_vol..step_vol));
            closes.push(prev);
        }
        closes.reverse();

        let end = Utc::now()
            .duration_trunc(timeframe.to_duration())
            .unwrap_or_else(|_| Utc::now());
        let mut out = VecDeque::with_capacity(len);
        let mut open = closes[0];
        for (i, close) in closes.iter().enumerate() {
            let timestamp = end - timeframe.to_duration() * (len - 1 - i) as i32;
            out.push_back(self.sample(instrument, timestamp, open, *close, rng));
            open = *close;
        }
        out
    }
}

#[async_trait]
impl MarketDataSource for SimulatedMarket {
    async fn connect(&self) -> TradingResult<()> {
        self.inner.connected.store(true, Ordering::SeqCst);
        info!(
            "Simulated market connected ({} instruments)",
            self.inner.config.initial_prices.len()
        );
        Ok(())
    }

    async fn fetch_candles(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> TradingResult<Vec<MarketSample>> {
        let price = self.current_price(instrument)?;
        let mut guard = lock(&self.inner.state);
        let state = &mut *guard;
        let key = (instrument.to_string(), timeframe);

        if !state.history.contains_key(&key) {
            let history = self.backfill(instrument, timeframe, limit.max(1), price, &mut state.rng);
            state.history.insert(key.clone(), history);
        } else if timeframe == Timeframe::Min1 {
            let step = self.inner.config.volatility * state.rng.gen_range(-1.0..1.0);
            let next = (price * (1.0 + step)).max(f64::MIN_POSITIVE);
            let timestamp = Utc::now();
            let sample = self.sample(instrument, timestamp, price, next, &mut state.rng);
            if let Some(history) = state.history.get_mut(&key) {
                history.push_back(sample);
                while history.len() > MAX_HISTORY {
                    history.pop_front();
                }
            }
            self.inner.prices.set(instrument, next);
        } else if let Some(last) = state.history.get_mut(&key).and_then(|h| h.back_mut()) {
            // Higher timeframes track the walk in their open candle
            last.close = price;
            last.high = last.high.max(price);
            last.low = last.low.min(price);
        }

        let history = state
            .history
            .get(&key)
            .ok_or_else(|| TradingError::DataUnavailable(format!("no history for {}", instrument)))?;
        let skip = history.len().saturating_sub(limit);
        Ok(history.iter().skip(skip).cloned().collect())
    }

    async fn fetch_order_book(&self, instrument: &str, depth: usize) -> TradingResult<OrderBookSnapshot> {
        let price = self.current_price(instrument)?;
        let (bid, ask) = self.quote(price);
        let tick = (ask - bid).max(price * 1e-5);
        let mut state = lock(&self.inner.state);
        let bids: Vec<BookLevel> = (0..depth.max(1))
            .map(|i| BookLevel {
                price: bid - tick * i as f64,
                size: state.rng.gen_range(0.5..20.0),
            })
            .collect();
        let asks: Vec<BookLevel> = (0..depth.max(1))
            .map(|i| BookLevel {
                price: ask + tick * i as f64,
                size: state.rng.gen_range(0.5..20.0),
            })
            .collect();
        Ok(OrderBookSnapshot {
            timestamp: Utc::now(),
            bids,
            asks,
        })
    }

    async fn fetch_funding_rate(&self, instrument: &str) -> TradingResult<Option<FundingInfo>> {
        self.current_price(instrument)?;
        let rate = lock(&self.inner.state).rng.gen_range(-0.0008..0.0008);
        let period = chrono::Duration::hours(8);
        let next_funding_time = Utc::now()
            .duration_trunc(period)
            .map(|t| t + period)
            .unwrap_or_else(|_| Utc::now() + period);
        Ok(Some(FundingInfo {
            rate,
            next_funding_time,
        }))
    }

    async fn subscribe(&self, instrument: &str) -> TradingResult<mpsc::Receiver<StreamEvent>> {
        self.current_price(instrument)?;
        let (tx, rx) = mpsc::channel(64);
        let market = self.clone();
        let instrument = instrument.to_string();
        let interval = self.inner.config.ticker_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !market.inner.connected.load(Ordering::SeqCst) {
                    break;
                }
                let Some(last) = market.inner.prices.get(&instrument) else {
                    break;
                };
                let (bid, ask) = market.quote(last);
                let event = StreamEvent::Ticker {
                    instrument: instrument.clone(),
                    bid,
                    ask,
                    last,
                    timestamp: Utc::now(),
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("Ticker stream for {} closed", instrument);
        });

        Ok(rx)
    }

    async fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        info!("Simulated market disconnected");
    }

    fn source_name(&self) -> &str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trading_core::OrderSide;

    fn market() -> SimulatedMarket {
        let mut config = SimulationConfig::for_instruments(&["BTCUSDT".to_string()]);
        config.seed = Some(7);
        config.ticker_interval = Duration::from_millis(10);
        SimulatedMarket::new(config)
    }

    #[tokio::test]
    async fn test_candles_backfill_then_advance() {
        let market = market();
        let first = market.fetch_candles("BTCUSDT", Timeframe::Min1, 100).await.unwrap();
        assert_eq!(first.len(), 100);
        assert_eq!(first.last().unwrap().close, 60_000.0);
        assert!(first.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

        let second = market.fetch_candles("BTCUSDT", Timeframe::Min1, 100).await.unwrap();
        assert_eq!(second.len(), 100);
        let latest = second.last().unwrap().close;
        assert_eq!(market.prices().get("BTCUSDT"), Some(latest));

        let h4 = market.fetch_candles("BTCUSDT", Timeframe::Hour4, 60).await.unwrap();
        assert_eq!(h4.last().unwrap().close, latest);

        assert!(market.fetch_candles("DOGEUSDT", Timeframe::Min1, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_order_book_is_sorted_best_first() {
        let book = market().fetch_order_book("BTCUSDT", 5).await.unwrap();
        assert_eq!(book.depth(), 5);
        assert!(book.best_bid().unwrap().price < book.best_ask().unwrap().price);
        assert!(book.bids.windows(2).all(|w| w[0].price > w[1].price));
        assert!(book.asks.windows(2).all(|w| w[0].price < w[1].price));
    }

    #[tokio::test]
    async fn test_ticker_stream_stops_on_disconnect() {
        let market = market();
        market.connect().await.unwrap();
        let mut rx = market.subscribe("BTCUSDT").await.unwrap();
        assert!(matches!(rx.recv().await, Some(StreamEvent::Ticker { .. })));

        market.disconnect().await;
        // Drains whatever was buffered, then the sender is dropped
        while rx.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn test_paper_broker_fills_at_last_price() {
        let market = market();
        let broker = PaperBroker::new(market.prices());
        let order = broker
            .place_order(OrderRequest::market("BTCUSDT", OrderSide::Buy, Decimal::new(5, 1)))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.avg_price, Decimal::from_f64(60_000.0));
        assert_eq!(broker.orders_filled(), 1);

        assert!(broker
            .place_order(OrderRequest::market("XRPUSDT", OrderSide::Buy, Decimal::ONE))
            .await
            .is_err());
        assert!(broker
            .place_order(OrderRequest::market("BTCUSDT", OrderSide::Sell, Decimal::ZERO))
            .await
            .is_err());
    }
}
