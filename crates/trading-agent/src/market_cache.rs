use std::collections::HashMap;

use chrono::Utc;
use futures::future::join_all;
use multi_timeframe::{fetch_timeframes, MultiTimeframeData};
use tracing::{debug, warn};
use trading_core::{
    FundingInfo, MarketDataSource, MarketSample, OrderBookSnapshot, StreamEvent, Timeframe,
    TradingError, TradingResult,
};

/// Latest candles, order book and funding for every traded instrument.
#[derive(Default)]
pub struct MarketCache {
    instruments: HashMap<String, MultiTimeframeData>,
}

impl MarketCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh every instrument concurrently. Returns the instruments whose
    /// primary candles came back this time; the rest keep their previous data
    /// and are skipped by the caller for this cycle.
    pub async fn refresh(
        &mut self,
        source: &dyn MarketDataSource,
        instruments: &[String],
        candle_limit: usize,
        book_depth: usize,
    ) -> Vec<String> {
        let timeframes = Timeframe::all();
        let futures = instruments.iter().map(|instrument| {
            let timeframes = &timeframes;
            async move {
                let result =
                    fetch_instrument(source, instrument, timeframes, candle_limit, book_depth).await;
                (instrument.clone(), result)
            }
        });

        let mut refreshed = Vec::new();
        for (instrument, result) in join_all(futures).await {
            match result {
                Ok(mut data) => {
                    // A higher timeframe that failed this round keeps its last good candles.
                    if let Some(previous) = self.instruments.remove(&instrument) {
                        for (timeframe, history) in previous.data {
                            data.data.entry(timeframe).or_insert(history);
                        }
                    }
                    self.instruments.insert(instrument.clone(), data);
                    refreshed.push(instrument);
                }
                Err(e) => warn!("Skipping {} this cycle: {}", instrument, e),
            }
        }
        refreshed
    }

    pub fn data(&self, instrument: &str) -> Option<&MultiTimeframeData> {
        self.instruments.get(instrument)
    }

    /// Primary (1m) history, oldest first.
    pub fn primary(&self, instrument: &str) -> Option<&[MarketSample]> {
        self.instruments
            .get(instrument)
            .and_then(|d| d.get(Timeframe::Min1))
    }

    pub fn latest_sample(&self, instrument: &str) -> Option<&MarketSample> {
        self.primary(instrument).and_then(|h| h.last())
    }

    pub fn latest_price(&self, instrument: &str) -> Option<f64> {
        self.latest_sample(instrument)
            .map(|s| s.close)
            .filter(|p| p.is_finite() && *p > 0.0)
    }

    /// Every instrument has candles on every timeframe.
    pub fn is_warm(&self, instruments: &[String]) -> bool {
        instruments.iter().all(|i| {
            self.instruments
                .get(i)
                .map(|d| d.is_populated(&Timeframe::all(), 1))
                .unwrap_or(false)
        })
    }

    /// Fold a streamed update into the newest primary sample.
    pub fn apply_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::OrderBook { instrument, book } => {
                if let Some(sample) = self.latest_mut(&instrument) {
                    sample.apply_order_book(book);
                }
            }
            StreamEvent::Trade {
                instrument, price, ..
            } => {
                if let Some(sample) = self.latest_mut(&instrument) {
                    apply_last_price(sample, price);
                }
            }
            StreamEvent::Ticker {
                instrument,
                bid,
                ask,
                last,
                ..
            } => {
                if let Some(sample) = self.latest_mut(&instrument) {
                    if bid > 0.0 && ask >= bid {
                        sample.bid = bid;
                        sample.ask = ask;
                        sample.spread = ask - bid;
                    }
                    apply_last_price(sample, last);
                }
            }
        }
    }

    fn latest_mut(&mut self, instrument: &str) -> Option<&mut MarketSample> {
        self.instruments
            .get_mut(instrument)
            .and_then(|d| d.data.get_mut(&Timeframe::Min1))
            .and_then(|h| h.last_mut())
    }
}

fn apply_last_price(sample: &mut MarketSample, price: f64) {
    if !price.is_finite() || price <= 0.0 {
        return;
    }
    sample.close = price;
    sample.high = sample.high.max(price);
    sample.low = sample.low.min(price);
}

async fn fetch_instrument(
    source: &dyn MarketDataSource,
    instrument: &str,
    timeframes: &[Timeframe],
    candle_limit: usize,
    book_depth: usize,
) -> TradingResult<MultiTimeframeData> {
    let (mut data, book, funding) = futures::join!(
        fetch_timeframes(source, instrument, timeframes, candle_limit),
        source.fetch_order_book(instrument, book_depth),
        source.fetch_funding_rate(instrument),
    );

    let primary = data
        .data
        .get_mut(&Timeframe::Min1)
        .and_then(|h| h.last_mut())
        .ok_or_else(|| TradingError::DataUnavailable(format!("no 1m candles for {}", instrument)))?;

    attach_book(primary, instrument, book);
    attach_funding(primary, instrument, funding);
    data.last_updated = Utc::now();
    Ok(data)
}

fn attach_book(sample: &mut MarketSample, instrument: &str, book: TradingResult<OrderBookSnapshot>) {
    match book {
        Ok(book) => sample.apply_order_book(book),
        Err(e) => debug!("No order book for {}: {}", instrument, e),
    }
}

fn attach_funding(
    sample: &mut MarketSample,
    instrument: &str,
    funding: TradingResult<Option<FundingInfo>>,
) {
    match funding {
        Ok(funding) => sample.funding = funding,
        Err(e) => debug!("No funding rate for {}: {}", instrument, e),
    }
}
