//! Stateless indicator functions.
//!
//! Every series function returns a vector aligned index-for-index with its
//! input. Positions before the warm-up period hold `None`. Inputs that are
//! too short yield an all-`None` vector rather than an error.

use trading_core::{BookLevel, MarketSample};

/// Latest defined value of an aligned series.
pub fn last_value(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten()
}

/// Value `back` steps before the end (0 = last).
pub fn value_back(series: &[Option<f64>], back: usize) -> Option<f64> {
    if back >= series.len() {
        return None;
    }
    series[series.len() - 1 - back]
}

/// Simple Moving Average
pub fn sma(data: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; data.len()];
    if period == 0 || data.len() < period {
        return result;
    }

    let mut window_sum: f64 = data[..period].iter().sum();
    result[period - 1] = Some(window_sum / period as f64);
    for i in period..data.len() {
        window_sum += data[i] - data[i - period];
        result[i] = Some(window_sum / period as f64);
    }
    result
}

/// Exponential Moving Average, seeded with the SMA of the first `period` values.
pub fn ema(data: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; data.len()];
    if period == 0 || data.len() < period {
        return result;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut prev = data[..period].iter().sum::<f64>() / period as f64;
    result[period - 1] = Some(prev);

    for i in period..data.len() {
        prev = (data[i] - prev) * multiplier + prev;
        result[i] = Some(prev);
    }

    result
}

/// Relative Strength Index with Wilder smoothing.
pub fn rsi(data: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; data.len()];
    if period == 0 || data.len() < period + 1 {
        return result;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    result[period] = Some(rsi_from_averages(avg_gain, avg_loss));

    for i in period + 1..data.len() {
        let change = data[i] - data[i - 1];
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
        result[i] = Some(rsi_from_averages(avg_gain, avg_loss));
    }

    result
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            return 50.0;
        }
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// Bollinger Bands
pub struct BollingerBands {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

impl BollingerBands {
    /// (upper - lower) / middle at the last index
    pub fn last_bandwidth(&self) -> Option<f64> {
        let (u, m, l) = (
            last_value(&self.upper)?,
            last_value(&self.middle)?,
            last_value(&self.lower)?,
        );
        if m == 0.0 {
            return None;
        }
        Some((u - l) / m)
    }
}

pub fn bollinger_bands(data: &[f64], period: usize, std_dev: f64) -> BollingerBands {
    let middle = sma(data, period);
    let mut upper = vec![None; data.len()];
    let mut lower = vec![None; data.len()];

    for i in 0..data.len() {
        let Some(mean) = middle[i] else { continue };
        let slice = &data[i + 1 - period..=i];
        let variance: f64 = slice.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
        let std = variance.sqrt();

        upper[i] = Some(mean + std_dev * std);
        lower[i] = Some(mean - std_dev * std);
    }

    BollingerBands {
        upper,
        middle,
        lower,
    }
}

/// True range of each sample; the first sample has no previous close.
pub fn true_range(samples: &[MarketSample]) -> Vec<f64> {
    samples
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let high_low = s.high - s.low;
            if i == 0 {
                return high_low;
            }
            let prev_close = samples[i - 1].close;
            high_low
                .max((s.high - prev_close).abs())
                .max((s.low - prev_close).abs())
        })
        .collect()
}

/// Average True Range with Wilder smoothing.
pub fn atr(samples: &[MarketSample], period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; samples.len()];
    if period == 0 || samples.len() < period + 1 {
        return result;
    }

    let tr = true_range(samples);
    let mut atr = tr[1..=period].iter().sum::<f64>() / period as f64;
    result[period] = Some(atr);

    for i in period + 1..samples.len() {
        atr = (atr * (period - 1) as f64 + tr[i]) / period as f64;
        result[i] = Some(atr);
    }

    result
}

/// Volume-Weighted Average Price over the whole input, using typical price.
pub fn vwap(samples: &[MarketSample]) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(samples.len());
    let mut cumulative_pv = 0.0;
    let mut cumulative_volume = 0.0;

    for s in samples {
        let typical_price = (s.high + s.low + s.close) / 3.0;
        cumulative_pv += typical_price * s.volume;
        cumulative_volume += s.volume;

        result.push(if cumulative_volume > 0.0 {
            Some(cumulative_pv / cumulative_volume)
        } else {
            None
        });
    }

    result
}

/// Stochastic Oscillator
pub struct StochasticResult {
    pub k: Vec<Option<f64>>,
    pub d: Vec<Option<f64>>,
}

pub fn stochastic(samples: &[MarketSample], k_period: usize, d_period: usize) -> StochasticResult {
    let mut k = vec![None; samples.len()];
    let mut d = vec![None; samples.len()];
    if k_period == 0 || samples.len() < k_period {
        return StochasticResult { k, d };
    }

    for i in k_period - 1..samples.len() {
        let slice = &samples[i + 1 - k_period..=i];
        let highest = slice.iter().map(|s| s.high).fold(f64::NEG_INFINITY, f64::max);
        let lowest = slice.iter().map(|s| s.low).fold(f64::INFINITY, f64::min);

        k[i] = Some(if highest == lowest {
            50.0
        } else {
            100.0 * (samples[i].close - lowest) / (highest - lowest)
        });
    }

    // %D is the SMA of the defined part of %K
    if d_period > 0 {
        let first_k = k_period - 1;
        let defined: Vec<f64> = k[first_k..].iter().flatten().copied().collect();
        for (offset, value) in sma(&defined, d_period).into_iter().enumerate() {
            d[first_k + offset] = value;
        }
    }

    StochasticResult { k, d }
}

/// Top-of-book imbalance in [-1, 1]: positive when bids outweigh asks.
pub fn order_book_imbalance(bid_size: f64, ask_size: f64) -> f64 {
    let total = bid_size + ask_size;
    if total <= 0.0 {
        return 0.0;
    }
    (bid_size - ask_size) / total
}

/// Depth-weighted book pressure: sum of level sizes discounted by
/// `exp(-decay * level_index)` over the first `depth` levels.
pub fn weighted_depth(levels: &[BookLevel], depth: usize, decay: f64) -> f64 {
    levels
        .iter()
        .take(depth)
        .enumerate()
        .map(|(i, level)| level.size.max(0.0) * (-decay * i as f64).exp())
        .sum()
}

/// Standard deviation of close-to-close returns over the last `window` samples.
/// Returns 0.0 when fewer than 20 closes are available.
pub fn realized_volatility(closes: &[f64], window: usize) -> f64 {
    if closes.len() < 20 || window < 2 {
        return 0.0;
    }
    let start = closes.len().saturating_sub(window + 1);
    let returns: Vec<f64> = closes[start..]
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    std_dev(&returns)
}

/// Population standard deviation
pub fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let mean = mean(data);
    let variance = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / data.len() as f64;
    variance.sqrt()
}

pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Mean volume of the given samples
pub fn average_volume(samples: &[MarketSample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.volume).sum::<f64>() / samples.len() as f64
}

pub fn highest_high(samples: &[MarketSample]) -> Option<f64> {
    samples.iter().map(|s| s.high).reduce(f64::max)
}

pub fn lowest_low(samples: &[MarketSample]) -> Option<f64> {
    samples.iter().map(|s| s.low).reduce(f64::min)
}

/// Closing prices of a sample slice
pub fn closes(samples: &[MarketSample]) -> Vec<f64> {
    samples.iter().map(|s| s.close).collect()
}
