use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use technical_analysis::{closes, ema, last_value, realized_volatility, rsi};
use trading_core::{
    MarketDataSource, MarketSample, Timeframe, TradingConditions, Trend, TrendContext,
    Volatility,
};

/// Minimum samples for a per-timeframe verdict
pub const MIN_TREND_SAMPLES: usize = 50;

/// Weight of each higher timeframe in the combined verdict
pub fn timeframe_weight(timeframe: Timeframe) -> f64 {
    match timeframe {
        Timeframe::Min1 => 0.0,
        Timeframe::Min15 => 0.2,
        Timeframe::Hour1 => 0.3,
        Timeframe::Hour4 => 0.5,
    }
}

/// Multi-timeframe candles for an instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiTimeframeData {
    pub instrument: String,
    pub data: HashMap<Timeframe, Vec<MarketSample>>,
    pub last_updated: DateTime<Utc>,
}

impl MultiTimeframeData {
    pub fn get(&self, timeframe: Timeframe) -> Option<&[MarketSample]> {
        self.data.get(&timeframe).map(Vec::as_slice)
    }

    /// Whether every requested timeframe has at least `min_len` candles.
    pub fn is_populated(&self, timeframes: &[Timeframe], min_len: usize) -> bool {
        timeframes
            .iter()
            .all(|tf| self.data.get(tf).map(|v| v.len() >= min_len).unwrap_or(false))
    }
}

/// Fetch the requested timeframes concurrently. A failed or empty timeframe is
/// left out of the result rather than failing the whole fetch.
pub async fn fetch_timeframes(
    source: &dyn MarketDataSource,
    instrument: &str,
    timeframes: &[Timeframe],
    limit: usize,
) -> MultiTimeframeData {
    let futures: Vec<_> = timeframes
        .iter()
        .map(|&timeframe| async move {
            match source.fetch_candles(instrument, timeframe, limit).await {
                Ok(samples) if !samples.is_empty() => Some((timeframe, samples)),
                Ok(_) => {
                    debug!("No {} data for {}", timeframe.name(), instrument);
                    None
                }
                Err(e) => {
                    debug!("Failed to fetch {} data for {}: {}", timeframe.name(), instrument, e);
                    None
                }
            }
        })
        .collect();

    let results = futures::future::join_all(futures).await;
    let data: HashMap<Timeframe, Vec<MarketSample>> = results.into_iter().flatten().collect();

    MultiTimeframeData {
        instrument: instrument.to_string(),
        data,
        last_updated: Utc::now(),
    }
}

/// Trend verdict for one timeframe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeframeVerdict {
    pub trend: Trend,
    pub strength: f64,
}

impl TimeframeVerdict {
    pub fn neutral() -> Self {
        Self {
            trend: Trend::Neutral,
            strength: 0.0,
        }
    }
}

/// Higher-timeframe candles handed to the analyzer
#[derive(Debug, Clone, Copy, Default)]
pub struct HigherTimeframes<'a> {
    pub m15: Option<&'a [MarketSample]>,
    pub h1: Option<&'a [MarketSample]>,
    pub h4: Option<&'a [MarketSample]>,
}

impl<'a> HigherTimeframes<'a> {
    pub fn from_data(data: &'a MultiTimeframeData) -> Self {
        Self {
            m15: data.get(Timeframe::Min15),
            h1: data.get(Timeframe::Hour1),
            h4: data.get(Timeframe::Hour4),
        }
    }

    fn iter(&self) -> impl Iterator<Item = (Timeframe, &'a [MarketSample])> + '_ {
        [
            (Timeframe::Min15, self.m15),
            (Timeframe::Hour1, self.h1),
            (Timeframe::Hour4, self.h4),
        ]
        .into_iter()
        .filter_map(|(tf, samples)| samples.map(|s| (tf, s)))
    }
}

/// Thresholds used by the trend analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendAnalyzerConfig {
    /// Dominant higher-timeframe score needed for a non-neutral verdict
    pub min_higher_score: f64,
    /// Strength at or above which a timeframe counts as "strong"
    pub high_strength: f64,
    /// Strength at or above which conditions are "good"
    pub good_strength: f64,
    /// Return std-dev below which volatility is low
    pub low_volatility: f64,
    /// Return std-dev above which volatility is high
    pub high_volatility: f64,
    pub volatility_window: usize,
}

impl Default for TrendAnalyzerConfig {
    fn default() -> Self {
        Self {
            min_higher_score: 0.3,
            high_strength: 0.5,
            good_strength: 0.3,
            low_volatility: 0.002,
            high_volatility: 0.01,
            volatility_window: 20,
        }
    }
}

/// Fuses single- and multi-timeframe indicators into a `TrendContext`.
#[derive(Debug, Clone, Default)]
pub struct TrendAnalyzer {
    config: TrendAnalyzerConfig,
}

impl TrendAnalyzer {
    pub fn new(config: TrendAnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrendAnalyzerConfig {
        &self.config
    }

    pub fn analyze_trend(
        &self,
        primary: &[MarketSample],
        higher: HigherTimeframes<'_>,
    ) -> TrendContext {
        let primary_verdict = timeframe_trend(primary);
        let higher_verdict = self.combine_higher(higher);
        let volatility = self.classify_volatility(primary);

        let trend_alignment = primary_verdict.trend != Trend::Neutral
            && primary_verdict.trend == higher_verdict.trend;

        let trading_conditions = self.trading_conditions(
            trend_alignment,
            primary_verdict.strength,
            higher_verdict.strength,
            volatility,
        );

        debug!(
            "Trend: primary={:?}({:.2}) higher={:?}({:.2}) aligned={} vol={:?} conditions={:?}",
            primary_verdict.trend,
            primary_verdict.strength,
            higher_verdict.trend,
            higher_verdict.strength,
            trend_alignment,
            volatility,
            trading_conditions
        );

        TrendContext {
            primary_trend: primary_verdict.trend,
            strength: primary_verdict.strength,
            higher_timeframe_trend: higher_verdict.trend,
            higher_timeframe_strength: higher_verdict.strength,
            trend_alignment,
            volatility,
            trading_conditions,
        }
    }

    /// Weighted vote of the higher timeframes (15m: 0.2, 1h: 0.3, 4h: 0.5).
    pub fn combine_higher(&self, higher: HigherTimeframes<'_>) -> TimeframeVerdict {
        let mut bullish_score = 0.0;
        let mut bearish_score = 0.0;

        for (timeframe, samples) in higher.iter() {
            let verdict = timeframe_trend(samples);
            let weight = timeframe_weight(timeframe);
            match verdict.trend {
                Trend::Bullish => bullish_score += weight * verdict.strength,
                Trend::Bearish => bearish_score += weight * verdict.strength,
                Trend::Neutral => {}
            }
        }

        if bullish_score > bearish_score && bullish_score > self.config.min_higher_score {
            TimeframeVerdict {
                trend: Trend::Bullish,
                strength: bullish_score.min(1.0),
            }
        } else if bearish_score > bullish_score && bearish_score > self.config.min_higher_score {
            TimeframeVerdict {
                trend: Trend::Bearish,
                strength: bearish_score.min(1.0),
            }
        } else {
            TimeframeVerdict::neutral()
        }
    }

    /// Short histories are treated as medium volatility.
    pub fn classify_volatility(&self, samples: &[MarketSample]) -> Volatility {
        if samples.len() < 20 {
            return Volatility::Medium;
        }
        let vol = realized_volatility(&closes(samples), self.config.volatility_window);
        if vol < self.config.low_volatility {
            Volatility::Low
        } else if vol > self.config.high_volatility {
            Volatility::High
        } else {
            Volatility::Medium
        }
    }

    /// Deterministic lookup over alignment, the strength pair and volatility.
    pub fn trading_conditions(
        &self,
        aligned: bool,
        primary_strength: f64,
        higher_strength: f64,
        volatility: Volatility,
    ) -> TradingConditions {
        if !aligned || volatility == Volatility::High {
            return TradingConditions::Poor;
        }
        let high = self.config.high_strength;
        if primary_strength >= high && higher_strength >= high && volatility == Volatility::Medium {
            return TradingConditions::Excellent;
        }
        let good = self.config.good_strength;
        if primary_strength >= good && higher_strength >= good {
            TradingConditions::Good
        } else {
            TradingConditions::Fair
        }
    }
}

/// Verdict for one timeframe from price, EMA20, EMA50 and RSI14.
pub fn timeframe_trend(samples: &[MarketSample]) -> TimeframeVerdict {
    if samples.len() < MIN_TREND_SAMPLES {
        return TimeframeVerdict::neutral();
    }

    let prices = closes(samples);
    let (Some(ema20), Some(ema50), Some(rsi14)) = (
        last_value(&ema(&prices, 20)),
        last_value(&ema(&prices, 50)),
        last_value(&rsi(&prices, 14)),
    ) else {
        return TimeframeVerdict::neutral();
    };
    let price = prices[prices.len() - 1];
    if ema50 <= 0.0 {
        return TimeframeVerdict::neutral();
    }
    let separation = (ema20 - ema50).abs() / ema50;

    if price > ema20 && ema20 > ema50 && rsi14 > 50.0 {
        let strength = ((rsi14 - 50.0) / 25.0) * (1.0 + separation * 10.0);
        return TimeframeVerdict {
            trend: Trend::Bullish,
            strength: strength.min(1.0),
        };
    }
    if price < ema20 && ema20 < ema50 && rsi14 < 50.0 {
        let strength = ((50.0 - rsi14) / 25.0) * (1.0 + separation * 10.0);
        return TimeframeVerdict {
            trend: Trend::Bearish,
            strength: strength.min(1.0),
        };
    }

    // Weaker agreement: price vs EMA20 with a looser RSI band
    if price > ema20 && rsi14 > 45.0 {
        return TimeframeVerdict {
            trend: Trend::Bullish,
            strength: 0.3,
        };
    }
    if price < ema20 && rsi14 < 55.0 {
        return TimeframeVerdict {
            trend: Trend::Bearish,
            strength: 0.3,
        };
    }

    TimeframeVerdict::neutral()
}
