//! Average volume and display formatting.

use crate::domain::BarSeries;

/// Trailing window for average volume.
pub const DEFAULT_VOLUME_WINDOW: usize = 20;

/// Mean volume of the last `window` bars (all bars if fewer), rounded.
pub fn average_volume(series: &BarSeries, window: usize) -> u64 {
    let bars = series.bars();
    let tail = &bars[bars.len().saturating_sub(window)..];
    if tail.is_empty() {
        return 0;
    }
    let sum: u128 = tail.iter().map(|b| u128::from(b.volume)).sum();
    (sum as f64 / tail.len() as f64).round() as u64
}

/// `"12.3M"` from one million up, `"850k"` from one thousand up, plain integer below.
pub fn format_volume(volume: u64) -> String {
    if volume >= 1_000_000 {
        format!("{:.1}M", volume as f64 / 1_000_000.0)
    } else if volume >= 1_000 {
        format!("{:.0}k", volume as f64 / 1_000.0)
    } else {
        volume.to_string()
    }
}

/// Fractional return as a one-decimal percentage: 0.1234 → "12.3%".
pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bar, Timeframe};

    fn series(volumes: &[u64]) -> BarSeries {
        let bars = volumes
            .iter()
            .enumerate()
            .map(|(i, &v)| Bar::new(i as i64, 1.0, 1.0, 1.0, 1.0, v).unwrap())
            .collect();
        BarSeries::from_bars("X", Timeframe::Daily, bars).unwrap()
    }

    #[test]
    fn uses_trailing_window() {
        let mut volumes = vec![1_000_000; 10];
        volumes.extend(vec![100; 20]);
        assert_eq!(average_volume(&series(&volumes), 20), 100);
    }

    #[test]
    fn short_series_uses_all_bars() {
        assert_eq!(average_volume(&series(&[10, 20, 30]), 20), 20);
        assert_eq!(average_volume(&series(&[]), 20), 0);
    }

    #[test]
    fn formatting_thresholds() {
        assert_eq!(format_volume(12_345_678), "12.3M");
        assert_eq!(format_volume(1_000_000), "1.0M");
        assert_eq!(format_volume(850_400), "850k");
        assert_eq!(format_volume(1_000), "1k");
        assert_eq!(format_volume(999), "999");
        assert_eq!(format_volume(0), "0");
    }

    #[test]
    fn percent() {
        assert_eq!(format_percent(0.1234), "12.3%");
        assert_eq!(format_percent(-0.05), "-5.0%");
    }
}
