#[cfg(test)]
mod tests {
    use super::super::indicators::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};
    use trading_core::{BookLevel, MarketSample};

    // Classic Wilder RSI reference series
    fn sample_prices() -> Vec<f64> {
        vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08,
            45.89, 46.03, 45.61, 46.28, 46.28, 46.00, 46.03, 46.41, 46.22, 45.64,
        ]
    }

    fn sample(i: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> MarketSample {
        MarketSample {
            instrument: "BTCUSDT".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + Duration::minutes(i as i64),
            open,
            high,
            low,
            close,
            volume,
            bid: close - 0.05,
            ask: close + 0.05,
            spread: 0.1,
            bid_size: 1.0,
            ask_size: 1.0,
            order_book: None,
            funding: None,
        }
    }

    fn sample_bars() -> Vec<MarketSample> {
        (0..15)
            .map(|i| {
                let base = 100.0 + i as f64;
                sample(i, base, base + 2.0, base - 1.0, base + 1.0, 1_000_000.0)
            })
            .collect()
    }

    #[test]
    fn test_sma_basic() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&data, 3);

        assert_eq!(result.len(), 5);
        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        assert_relative_eq!(result[2].unwrap(), 2.0, epsilon = 1e-9);
        assert_relative_eq!(result[3].unwrap(), 3.0, epsilon = 1e-9);
        assert_relative_eq!(result[4].unwrap(), 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sma_insufficient_data() {
        let result = sma(&[1.0, 2.0], 5);
        assert_eq!(result, vec![None, None]);
    }

    #[test]
    fn test_ema_seeded_with_sma() {
        let data = vec![2.0, 4.0, 6.0, 8.0, 10.0];
        let result = ema(&data, 3);

        assert_eq!(result.len(), data.len());
        assert!(result[0].is_none() && result[1].is_none());
        // Seed = SMA(2, 4, 6) = 4
        assert_relative_eq!(result[2].unwrap(), 4.0, epsilon = 1e-9);
        // multiplier = 0.5 -> (8 - 4) * 0.5 + 4 = 6
        assert_relative_eq!(result[3].unwrap(), 6.0, epsilon = 1e-9);
        assert_relative_eq!(result[4].unwrap(), 8.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ema_does_not_mutate_input() {
        let data = sample_prices();
        let copy = data.clone();
        let _ = ema(&data, 5);
        assert_eq!(data, copy);
    }

    #[test]
    fn test_indicators_are_bit_identical_on_rerun() {
        let prices = sample_prices();
        assert_eq!(ema(&prices, 10), ema(&prices, 10));
        assert_eq!(rsi(&prices, 14), rsi(&prices, 14));

        let bars = sample_bars();
        let first = atr(&bars, 5);
        let second = atr(&bars, 5);
        let first_bits: Vec<Option<u64>> = first.iter().map(|v| v.map(f64::to_bits)).collect();
        let second_bits: Vec<Option<u64>> = second.iter().map(|v| v.map(f64::to_bits)).collect();
        assert_eq!(first_bits, second_bits);
    }

    #[test]
    fn test_rsi_wilder_reference() {
        let result = rsi(&sample_prices(), 14);

        assert_eq!(result.len(), 20);
        assert!(result[..14].iter().all(Option::is_none));
        assert_relative_eq!(result[14].unwrap(), 70.464, epsilon = 0.01);
        assert_relative_eq!(result[19].unwrap(), 57.915, epsilon = 0.01);
    }

    #[test]
    fn test_rsi_all_gains_and_flat() {
        let rising: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert_eq!(last_value(&rsi(&rising, 14)), Some(100.0));

        let flat = vec![10.0; 20];
        assert_eq!(last_value(&rsi(&flat, 14)), Some(50.0));
    }

    #[test]
    fn test_rsi_short_input_is_empty() {
        let result = rsi(&[1.0, 2.0, 3.0], 14);
        assert_eq!(result.len(), 3);
        assert!(result.iter().all(Option::is_none));
    }

    #[test]
    fn test_bollinger_bands_flat_series_collapse() {
        let data = vec![10.0; 25];
        let bands = bollinger_bands(&data, 20, 2.0);

        assert_eq!(bands.upper.len(), 25);
        assert!(bands.middle[18].is_none());
        assert_relative_eq!(bands.upper[24].unwrap(), 10.0, epsilon = 1e-9);
        assert_relative_eq!(bands.lower[24].unwrap(), 10.0, epsilon = 1e-9);
        assert_relative_eq!(bands.last_bandwidth().unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_bollinger_bands_symmetric() {
        let prices = sample_prices();
        let bands = bollinger_bands(&prices, 10, 2.0);
        let (u, m, l) = (
            last_value(&bands.upper).unwrap(),
            last_value(&bands.middle).unwrap(),
            last_value(&bands.lower).unwrap(),
        );
        assert!(u > m && m > l);
        assert_relative_eq!(u - m, m - l, epsilon = 1e-9);
    }

    #[test]
    fn test_true_range_uses_previous_close() {
        let bars = vec![
            sample(0, 10.0, 11.0, 9.0, 10.0, 1.0),
            // Gap up: high-low = 1, |high - prev close| = 5
            sample(1, 14.0, 15.0, 14.0, 14.5, 1.0),
        ];
        let tr = true_range(&bars);
        assert_relative_eq!(tr[0], 2.0, epsilon = 1e-9);
        assert_relative_eq!(tr[1], 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_atr_constant_range() {
        let bars = sample_bars();
        let result = atr(&bars, 5);

        assert_eq!(result.len(), bars.len());
        assert!(result[..5].iter().all(Option::is_none));
        // Every bar: high - low = 3, |high - prev close| = 2, |low - prev close| = 1
        assert_relative_eq!(result[5].unwrap(), 3.0, epsilon = 1e-9);
        assert_relative_eq!(last_value(&result).unwrap(), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_vwap_weights_by_volume() {
        let bars = vec![
            sample(0, 10.0, 10.0, 10.0, 10.0, 1.0),
            sample(1, 20.0, 20.0, 20.0, 20.0, 3.0),
        ];
        let result = vwap(&bars);
        assert_relative_eq!(result[0].unwrap(), 10.0, epsilon = 1e-9);
        assert_relative_eq!(result[1].unwrap(), 17.5, epsilon = 1e-9);
    }

    #[test]
    fn test_vwap_zero_volume_is_absent() {
        let bars = vec![sample(0, 10.0, 10.0, 10.0, 10.0, 0.0)];
        assert_eq!(vwap(&bars), vec![None]);
    }

    #[test]
    fn test_stochastic_bounds() {
        let bars = sample_bars();
        let result = stochastic(&bars, 5, 3);

        assert_eq!(result.k.len(), bars.len());
        assert!(result.k[3].is_none());
        for k in result.k.iter().flatten() {
            assert!((0.0..=100.0).contains(k));
        }
        assert!(result.d[5].is_none());
        assert!(result.d[6].is_some());
    }

    #[test]
    fn test_order_book_imbalance() {
        assert_relative_eq!(order_book_imbalance(3.0, 1.0), 0.5, epsilon = 1e-9);
        assert_relative_eq!(order_book_imbalance(1.0, 3.0), -0.5, epsilon = 1e-9);
        assert_eq!(order_book_imbalance(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_weighted_depth_decays() {
        let levels = vec![
            BookLevel { price: 100.0, size: 1.0 },
            BookLevel { price: 99.0, size: 1.0 },
            BookLevel { price: 98.0, size: 1.0 },
        ];
        let undecayed = weighted_depth(&levels, 10, 0.0);
        let decayed = weighted_depth(&levels, 10, 0.5);
        assert_relative_eq!(undecayed, 3.0, epsilon = 1e-9);
        assert_relative_eq!(decayed, 1.0 + (-0.5f64).exp() + (-1.0f64).exp(), epsilon = 1e-9);
        assert_relative_eq!(weighted_depth(&levels, 1, 0.5), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_realized_volatility_short_input_is_zero() {
        let closes: Vec<f64> = (0..19).map(|i| 100.0 + (i % 3) as f64).collect();
        assert_eq!(realized_volatility(&closes, 20), 0.0);

        let longer: Vec<f64> = (0..40).map(|i| 100.0 + (i % 3) as f64).collect();
        assert!(realized_volatility(&longer, 20) > 0.0);
    }

    #[test]
    fn test_value_back() {
        let series = vec![None, Some(1.0), Some(2.0)];
        assert_eq!(value_back(&series, 0), Some(2.0));
        assert_eq!(value_back(&series, 1), Some(1.0));
        assert_eq!(value_back(&series, 2), None);
        assert_eq!(value_back(&series, 5), None);
    }
}
