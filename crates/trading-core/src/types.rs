use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Candle timeframes cached per instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    Min1,
    Min15,
    Hour1,
    Hour4,
}

impl Timeframe {
    pub fn name(&self) -> &'static str {
        match self {
            Timeframe::Min1 => "1m",
            Timeframe::Min15 => "15m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour4 => "4h",
        }
    }

    /// Duration covered by one candle
    pub fn to_duration(&self) -> Duration {
        match self {
            Timeframe::Min1 => Duration::minutes(1),
            Timeframe::Min15 => Duration::minutes(15),
            Timeframe::Hour1 => Duration::hours(1),
            Timeframe::Hour4 => Duration::hours(4),
        }
    }

    pub fn all() -> Vec<Timeframe> {
        vec![
            Timeframe::Min1,
            Timeframe::Min15,
            Timeframe::Hour1,
            Timeframe::Hour4,
        ]
    }

    pub fn higher() -> Vec<Timeframe> {
        vec![Timeframe::Min15, Timeframe::Hour1, Timeframe::Hour4]
    }

    pub fn parse(s: &str) -> Option<Timeframe> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" | "1min" => Some(Timeframe::Min1),
            "15m" | "15min" => Some(Timeframe::Min15),
            "1h" | "1hour" | "60m" => Some(Timeframe::Hour1),
            "4h" | "4hour" | "240m" => Some(Timeframe::Hour4),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One price level of an order book
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Order book snapshot, best levels first on both sides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub timestamp: DateTime<Utc>,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks.first().copied()
    }

    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b.price + a.price) / 2.0),
            _ => None,
        }
    }

    pub fn depth(&self) -> usize {
        self.bids.len().min(self.asks.len())
    }
}

/// Funding rate of a perpetual contract and the time it is next charged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundingInfo {
    pub rate: f64,
    pub next_funding_time: DateTime<Utc>,
}

/// OHLCV candle enriched with top-of-book data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSample {
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub bid: f64,
    #[serde(default)]
    pub ask: f64,
    #[serde(default)]
    pub spread: f64,
    #[serde(default)]
    pub bid_size: f64,
    #[serde(default)]
    pub ask_size: f64,
    #[serde(default)]
    pub order_book: Option<OrderBookSnapshot>,
    #[serde(default)]
    pub funding: Option<FundingInfo>,
}

impl MarketSample {
    /// Mid price, falling back to the close when no quote is attached.
    pub fn mid(&self) -> f64 {
        if self.bid > 0.0 && self.ask > 0.0 {
            (self.bid + self.ask) / 2.0
        } else {
            self.close
        }
    }

    /// Quoted spread as a percentage of mid (0 when no quote is attached).
    pub fn spread_percent(&self) -> f64 {
        let spread = if self.spread > 0.0 {
            self.spread
        } else {
            (self.ask - self.bid).max(0.0)
        };
        let mid = self.mid();
        if mid > 0.0 && self.bid > 0.0 && self.ask > 0.0 {
            spread / mid * 100.0
        } else {
            0.0
        }
    }

    pub fn has_quote(&self) -> bool {
        self.bid > 0.0 && self.ask > 0.0 && self.ask >= self.bid
    }

    /// Overwrite top-of-book fields from an order book snapshot.
    pub fn apply_order_book(&mut self, book: OrderBookSnapshot) {
        if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
            self.bid = bid.price;
            self.ask = ask.price;
            self.bid_size = bid.size;
            self.ask_size = ask.size;
            self.spread = (ask.price - bid.price).max(0.0);
        }
        self.order_book = Some(book);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Volatility {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingConditions {
    Excellent,
    Good,
    Fair,
    Poor,
}

/// Qualitative market verdict for one instrument, recomputed every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendContext {
    pub primary_trend: Trend,
    pub strength: f64,
    pub higher_timeframe_trend: Trend,
    pub higher_timeframe_strength: f64,
    pub trend_alignment: bool,
    pub volatility: Volatility,
    pub trading_conditions: TradingConditions,
}

impl TrendContext {
    pub fn neutral() -> Self {
        Self {
            primary_trend: Trend::Neutral,
            strength: 0.0,
            higher_timeframe_trend: Trend::Neutral,
            higher_timeframe_strength: 0.0,
            trend_alignment: false,
            volatility: Volatility::Medium,
            trading_conditions: TradingConditions::Poor,
        }
    }

    /// Whether the primary trend points the same way as `action`.
    pub fn supports(&self, action: SignalAction) -> bool {
        matches!(
            (self.primary_trend, action),
            (Trend::Bullish, SignalAction::Buy) | (Trend::Bearish, SignalAction::Sell)
        )
    }

    /// Whether the primary trend points against `action`.
    pub fn opposes(&self, action: SignalAction) -> bool {
        matches!(
            (self.primary_trend, action),
            (Trend::Bullish, SignalAction::Sell) | (Trend::Bearish, SignalAction::Buy)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
    Close,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
            SignalAction::Hold => "hold",
            SignalAction::Close => "close",
        }
    }

    /// Opposite trading direction; hold/close have none.
    pub fn opposite(&self) -> Option<SignalAction> {
        match self {
            SignalAction::Buy => Some(SignalAction::Sell),
            SignalAction::Sell => Some(SignalAction::Buy),
            _ => None,
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, SignalAction::Buy | SignalAction::Sell)
    }

    /// Position side an entry action would open.
    pub fn entry_side(&self) -> Option<PositionSide> {
        match self {
            SignalAction::Buy => Some(PositionSide::Long),
            SignalAction::Sell => Some(PositionSide::Short),
            _ => None,
        }
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live position summary attached to a signal for the same instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionContext {
    pub position_id: String,
    pub side: PositionSide,
    pub unrealized_pnl: f64,
}

/// A strategy's proposed action for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub instrument: String,
    pub action: SignalAction,
    pub strength: f64,
    pub strategy: String,
    pub indicators: BTreeMap<String, f64>,
    pub confidence: f64,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub position_size: Option<f64>,
    pub position_context: Option<PositionContext>,
    #[serde(default)]
    pub ai_enhanced: bool,
    #[serde(default)]
    pub reason: String,
}

impl Signal {
    /// Strength and confidence are clamped into [0, 1]; callers may stack
    /// boosts freely before construction.
    pub fn new(
        instrument: impl Into<String>,
        action: SignalAction,
        strategy: impl Into<String>,
        strength: f64,
        confidence: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            instrument: instrument.into(),
            action,
            strength: clamp_unit(strength),
            strategy: strategy.into(),
            indicators: BTreeMap::new(),
            confidence: clamp_unit(confidence),
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            position_size: None,
            position_context: None,
            ai_enhanced: false,
            reason: String::new(),
        }
    }

    pub fn with_levels(mut self, entry: f64, stop_loss: f64, take_profit: f64) -> Self {
        self.entry_price = Some(entry);
        self.stop_loss = Some(stop_loss);
        self.take_profit = Some(take_profit);
        self
    }

    pub fn with_entry(mut self, entry: f64) -> Self {
        self.entry_price = Some(entry);
        self
    }

    pub fn with_indicator(mut self, key: impl Into<String>, value: f64) -> Self {
        if value.is_finite() {
            self.indicators.insert(key.into(), value);
        }
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Ranking score used by fusion and execution ordering.
    pub fn score(&self) -> f64 {
        self.confidence * self.strength
    }

    /// Re-apply the [0, 1] bounds after in-place adjustments.
    pub fn clamp(&mut self) {
        self.strength = clamp_unit(self.strength);
        self.confidence = clamp_unit(self.confidence);
    }

    /// |take-profit − entry| / |entry − stop-loss|, when all three levels are known.
    pub fn reward_risk(&self) -> Option<f64> {
        let (entry, stop, target) = (self.entry_price?, self.stop_loss?, self.take_profit?);
        reward_risk_ratio(entry, stop, target)
    }
}

pub fn reward_risk_ratio(entry: f64, stop_loss: f64, take_profit: f64) -> Option<f64> {
    let risk = (entry - stop_loss).abs();
    if risk <= f64::EPSILON || !risk.is_finite() {
        return None;
    }
    Some((take_profit - entry).abs() / risk)
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }

    /// +1 for long, -1 for short
    pub fn sign(&self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }

    /// Signal action that would open a position on this side.
    pub fn entry_action(&self) -> SignalAction {
        match self {
            PositionSide::Long => SignalAction::Buy,
            PositionSide::Short => SignalAction::Sell,
        }
    }

    /// Order side that opens this position.
    pub fn open_order_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Order side that flattens this position.
    pub fn close_order_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open position. At most one per instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub instrument: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub current_price: f64,
    pub quantity: f64,
    pub value: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub opened_at: DateTime<Utc>,
    pub leverage: f64,
    pub strategy: String,
    /// Best pnl% observed since open
    #[serde(default)]
    pub peak_pnl_percent: f64,
}

impl Position {
    /// Mark the position to `price`, recomputing value and pnl.
    pub fn update_price(&mut self, price: f64) {
        if !price.is_finite() || price <= 0.0 {
            return;
        }
        self.current_price = price;
        self.value = (price * self.quantity).max(0.0);
        self.pnl = self.pnl_at(price);
        let cost = self.entry_price * self.quantity;
        self.pnl_percent = if cost > 0.0 { self.pnl / cost * 100.0 } else { 0.0 };
        if self.pnl_percent > self.peak_pnl_percent {
            self.peak_pnl_percent = self.pnl_percent;
        }
    }

    /// Unrealized pnl if the position were closed at `price`.
    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity * self.side.sign()
    }

    /// Margin reserved by this position.
    pub fn margin(&self) -> f64 {
        if self.leverage > 0.0 {
            self.value / self.leverage
        } else {
            self.value
        }
    }

    pub fn context(&self) -> PositionContext {
        PositionContext {
            position_id: self.id.clone(),
            side: self.side,
            unrealized_pnl: self.pnl,
        }
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.opened_at).num_minutes()
    }
}

/// Snapshot of a position taken when it was closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub position: Position,
    pub exit_price: f64,
    pub realized_pnl: f64,
    pub closed_at: DateTime<Utc>,
    pub reason: String,
}

/// Account view derived from the position set and the running balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub total_balance: f64,
    pub available_balance: f64,
    pub margin_used: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub open_positions: Vec<Position>,
    pub open_orders: usize,
}

impl AccountInfo {
    pub fn position_for(&self, instrument: &str) -> Option<&Position> {
        self.open_positions.iter().find(|p| p.instrument == instrument)
    }

    pub fn equity(&self) -> f64 {
        self.total_balance + self.unrealized_pnl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub instrument: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
}

impl OrderRequest {
    pub fn market(instrument: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            instrument: instrument.into(),
            order_type: OrderType::Market,
            side,
            quantity,
            price: None,
        }
    }

    pub fn limit(
        instrument: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            order_type: OrderType::Limit,
            side,
            quantity,
            price: Some(price),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub status: OrderStatus,
    pub filled_qty: Decimal,
    pub avg_price: Option<Decimal>,
}

/// Executed fill, persisted for history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    pub realized_pnl: Option<f64>,
    pub strategy: String,
    pub order_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-account strategy settings loaded from persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub follow_own_signals: bool,
    #[serde(default = "default_true")]
    pub follow_ai_signals: bool,
    /// Opt-in to advisory review before autonomous execution
    #[serde(default)]
    pub autonomous: bool,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

fn default_true() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

impl StrategyConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            weight: 1.0,
            follow_own_signals: true,
            follow_ai_signals: true,
            autonomous: false,
            parameters: serde_json::Value::Null,
        }
    }
}

/// Event pushed by a streaming market-data subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    OrderBook {
        instrument: String,
        book: OrderBookSnapshot,
    },
    Trade {
        instrument: String,
        price: f64,
        size: f64,
        timestamp: DateTime<Utc>,
    },
    Ticker {
        instrument: String,
        bid: f64,
        ask: f64,
        last: f64,
        timestamp: DateTime<Utc>,
    },
}

/// Input handed to the advisory collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryContext {
    pub instrument: String,
    pub price: f64,
    pub signal: Signal,
    pub trend: Option<TrendContext>,
    pub position: Option<PositionContext>,
    pub available_balance: f64,
}

/// Recommendation returned by the advisory collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryDecision {
    pub action: SignalAction,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub suggested_entry: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_position(entry: f64, quantity: f64) -> Position {
        Position {
            id: "p1".to_string(),
            instrument: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            entry_price: entry,
            current_price: entry,
            quantity,
            value: entry * quantity,
            pnl: 0.0,
            pnl_percent: 0.0,
            stop_loss: None,
            take_profit: None,
            opened_at: Utc::now(),
            leverage: 1.0,
            strategy: "scalping".to_string(),
            peak_pnl_percent: 0.0,
        }
    }

    #[test]
    fn test_signal_clamps_strength_and_confidence() {
        let s = Signal::new("ETHUSDT", SignalAction::Buy, "momentum", 1.4, -0.2, Utc::now());
        assert_eq!(s.strength, 1.0);
        assert_eq!(s.confidence, 0.0);

        let nan = Signal::new("ETHUSDT", SignalAction::Buy, "momentum", f64::NAN, 0.5, Utc::now());
        assert_eq!(nan.strength, 0.0);
    }

    #[test]
    fn test_reward_risk_ratio() {
        let s = Signal::new("ETHUSDT", SignalAction::Buy, "scalping", 0.5, 0.5, Utc::now())
            .with_levels(100.0, 98.0, 106.0);
        assert!((s.reward_risk().unwrap() - 3.0).abs() < 1e-9);
        assert!(reward_risk_ratio(100.0, 100.0, 106.0).is_none());
    }

    #[test]
    fn test_position_pnl_percent() {
        let mut p = long_position(100.0, 2.0);
        p.update_price(105.0);
        assert!((p.pnl - 10.0).abs() < 1e-9);
        assert!((p.pnl_percent - 5.0).abs() < 1e-9);
        assert!((p.value - 210.0).abs() < 1e-9);

        p.update_price(101.0);
        assert!((p.peak_pnl_percent - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_position_pnl() {
        let mut p = long_position(100.0, 1.0);
        p.side = PositionSide::Short;
        p.update_price(90.0);
        assert!((p.pnl - 10.0).abs() < 1e-9);
        // Invalid prices leave the mark untouched
        p.update_price(-1.0);
        assert_eq!(p.current_price, 90.0);
    }

    #[test]
    fn test_spread_percent_without_quote() {
        let sample = MarketSample {
            instrument: "X".to_string(),
            timestamp: Utc::now(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
            bid: 0.0,
            ask: 0.0,
            spread: 0.0,
            bid_size: 0.0,
            ask_size: 0.0,
            order_book: None,
            funding: None,
        };
        assert_eq!(sample.spread_percent(), 0.0);
        assert_eq!(sample.mid(), 1.0);
    }
}
