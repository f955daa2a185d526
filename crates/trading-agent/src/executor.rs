use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use portfolio_manager::{NewPosition, PositionManager};
use rust_decimal::prelude::*;
use tracing::{error, info, warn};
use trading_core::{
    ClosedPosition, ExecutionSink, Order, OrderRequest, OrderSide, Persistence, Position, Signal,
    TradeRecord, TradingResult,
};

use crate::events::{EngineEvent, EventBus};

const QUANTITY_DP: u32 = 6;

/// Places orders for position opens and closes and keeps the position
/// book in step with the venue.
pub struct TradeExecutor {
    sink: Arc<dyn ExecutionSink>,
    persistence: Arc<dyn Persistence>,
    events: EventBus,
}

impl TradeExecutor {
    pub fn new(sink: Arc<dyn ExecutionSink>, persistence: Arc<dyn Persistence>, events: EventBus) -> Self {
        Self {
            sink,
            persistence,
            events,
        }
    }

    pub fn venue_name(&self) -> &str {
        self.sink.venue_name()
    }

    pub fn is_paper(&self) -> bool {
        self.sink.is_paper()
    }

    /// Open a position for an entry signal at `price`. The position is
    /// booked first and rolled back (closed at entry, zero PnL) if the order
    /// fails.
    pub async fn open_position(
        &self,
        positions: &mut PositionManager,
        signal: &Signal,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<Position> {
        let side = signal
            .action
            .entry_side()
            .ok_or_else(|| anyhow!("{} is not an entry action", signal.action))?;
        if !(price.is_finite() && price > 0.0) {
            bail!("no usable price for {}", signal.instrument);
        }

        let notional = order_notional(positions, signal, price);
        let quantity = Decimal::from_f64(notional / price)
            .map(|q| q.round_dp(QUANTITY_DP))
            .unwrap_or(Decimal::ZERO);
        if quantity <= Decimal::ZERO {
            bail!("position size too small for {}", signal.instrument);
        }
        let quantity_f64 = quantity.to_f64().unwrap_or(0.0);

        let position = positions.open_position(
            NewPosition {
                instrument: signal.instrument.clone(),
                side,
                entry_price: price,
                quantity: quantity_f64,
                stop_loss: signal.stop_loss,
                take_profit: signal.take_profit,
                strategy: signal.strategy.clone(),
            },
            now,
        )?;

        let request = OrderRequest::market(&signal.instrument, side.open_order_side(), quantity);
        let order = match self.sink.place_order(request).await {
            Ok(order) => order,
            Err(e) => {
                error!("Order failed for {}: {}, rolling back", signal.instrument, e);
                let rolled_back = positions.rollback_position(&signal.instrument, now)?;
                log_persist(
                    self.persistence.close_position(&rolled_back).await,
                    "rolled-back position",
                );
                self.events.publish(EngineEvent::OrderFailed {
                    instrument: signal.instrument.clone(),
                    error: e.to_string(),
                });
                return Err(e.into());
            }
        };

        info!(
            "Opened {} {} qty={} @ {:.4} (strategy={}, order={})",
            side, signal.instrument, quantity, price, signal.strategy, order.id
        );

        log_persist(self.persistence.update_position(&position).await, "position");
        log_persist(
            self.persistence
                .save_trade(&trade_record(
                    &signal.instrument,
                    side.open_order_side(),
                    quantity_f64,
                    fill_price(&order, price),
                    None,
                    &signal.strategy,
                    &order,
                    now,
                ))
                .await,
            "trade",
        );
        self.events.publish(EngineEvent::PositionOpened(position.clone()));
        Ok(position)
    }

    /// Flatten the position on `instrument`. The position stays booked if
    /// the order fails.
    pub async fn close_position(
        &self,
        positions: &mut PositionManager,
        instrument: &str,
        exit_price: f64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ClosedPosition> {
        let position = positions
            .position(instrument)
            .cloned()
            .ok_or_else(|| anyhow!("no open position on {}", instrument))?;

        let quantity = Decimal::from_f64(position.quantity)
            .map(|q| q.round_dp(QUANTITY_DP))
            .unwrap_or(Decimal::ZERO);
        let side = position.side.close_order_side();
        let order = match self
            .sink
            .place_order(OrderRequest::market(instrument, side, quantity))
            .await
        {
            Ok(order) => order,
            Err(e) => {
                self.events.publish(EngineEvent::OrderFailed {
                    instrument: instrument.to_string(),
                    error: e.to_string(),
                });
                return Err(anyhow!("close order failed for {}: {}", instrument, e));
            }
        };

        let closed = positions.close_position(instrument, exit_price, reason, now)?;
        info!(
            "Closed {} {} @ {:.4}: {} (pnl={:.2})",
            position.side, instrument, exit_price, reason, closed.realized_pnl
        );

        log_persist(self.persistence.close_position(&closed).await, "closed position");
        log_persist(
            self.persistence
                .save_trade(&trade_record(
                    instrument,
                    side,
                    position.quantity,
                    exit_price,
                    Some(closed.realized_pnl),
                    &position.strategy,
                    &order,
                    now,
                ))
                .await,
            "trade",
        );
        self.events.publish(EngineEvent::PositionClosed(closed.clone()));
        Ok(closed)
    }
}

/// Risk-based notional, capped by the fusion size scaled to leverage.
fn order_notional(positions: &PositionManager, signal: &Signal, price: f64) -> f64 {
    let risk_based = positions.calculate_position_size(price, signal.stop_loss);
    match signal.position_size {
        Some(margin) if margin > 0.0 => risk_based.min(margin * positions.config().leverage),
        _ => risk_based,
    }
}

fn fill_price(order: &Order, fallback: f64) -> f64 {
    order
        .avg_price
        .and_then(|p| p.to_f64())
        .filter(|p| *p > 0.0)
        .unwrap_or(fallback)
}

#[allow(clippy::too_many_arguments)]
fn trade_record(
    instrument: &str,
    side: OrderSide,
    quantity: f64,
    price: f64,
    realized_pnl: Option<f64>,
    strategy: &str,
    order: &Order,
    now: DateTime<Utc>,
) -> TradeRecord {
    TradeRecord {
        id: uuid::Uuid::new_v4().to_string(),
        instrument: instrument.to_string(),
        side,
        quantity,
        price,
        realized_pnl,
        strategy: strategy.to_string(),
        order_id: Some(order.id.clone()),
        timestamp: now,
    }
}

/// Persistence failures never block trading.
fn log_persist(result: TradingResult<()>, what: &str) {
    if let Err(e) = result {
        warn!("Failed to persist {}: {}", what, e);
    }
}
