use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    AdvisoryContext, AdvisoryDecision, ClosedPosition, FundingInfo, MarketSample, Order,
    OrderBookSnapshot, OrderRequest, Position, Signal, StrategyConfig, StreamEvent, Timeframe,
    TradeRecord, TradingResult,
};

/// Source of candles, order books and streaming updates.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Establish the connection. Called once at startup.
    async fn connect(&self) -> TradingResult<()>;

    /// Most recent `limit` candles, oldest first.
    async fn fetch_candles(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> TradingResult<Vec<MarketSample>>;

    async fn fetch_order_book(&self, instrument: &str, depth: usize)
        -> TradingResult<OrderBookSnapshot>;

    /// `None` for instruments without funding (spot).
    async fn fetch_funding_rate(&self, instrument: &str) -> TradingResult<Option<FundingInfo>>;

    /// Subscribe to order-book/trade/ticker events. Reconnects are the source's concern.
    async fn subscribe(&self, instrument: &str) -> TradingResult<mpsc::Receiver<StreamEvent>>;

    /// Release the streaming connection
    async fn disconnect(&self);

    fn source_name(&self) -> &str;
}

/// Order-execution venue.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    async fn place_order(&self, order: OrderRequest) -> TradingResult<Order>;

    /// Whether this is a paper/simulated venue
    fn is_paper(&self) -> bool;

    fn venue_name(&self) -> &str;
}

/// Narrow save/load interface to the storage layer.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save_signal(&self, signal: &Signal) -> TradingResult<()>;

    async fn save_trade(&self, trade: &TradeRecord) -> TradingResult<()>;

    async fn update_position(&self, position: &Position) -> TradingResult<()>;

    async fn close_position(&self, closed: &ClosedPosition) -> TradingResult<()>;

    async fn load_strategy_config(&self, account_id: &str) -> TradingResult<Vec<StrategyConfig>>;
}

/// Optional advisory service. Callers bound each call with a timeout.
#[async_trait]
pub trait AdvisoryProvider: Send + Sync {
    async fn get_decision(&self, context: &AdvisoryContext) -> TradingResult<AdvisoryDecision>;

    fn provider_name(&self) -> &str;
}
