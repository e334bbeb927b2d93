//! Shard contents and their on-disk JSON form.

use super::error::StoreError;
use super::index::ShardDescriptor;
use crate::domain::{Bar, BarSeries, Timeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Persisted layout of one shard file.
#[derive(Debug, Serialize, Deserialize)]
struct ShardFile {
    last_updated: Option<DateTime<Utc>>,
    file_index: usize,
    range_start: String,
    range_end: String,
    symbol_count: usize,
    timeframes: Vec<Timeframe>,
    data: BTreeMap<String, BTreeMap<Timeframe, Vec<Bar>>>,
}

/// One partition of the universe with every member's series.
///
/// Only the shard store reads and writes these; everything else asks the
/// store for a shard by id.
#[derive(Debug, Clone, PartialEq)]
pub struct Shard {
    pub file_index: usize,
    pub range_start: String,
    pub range_end: String,
    pub last_updated: Option<DateTime<Utc>>,
    pub timeframes: Vec<Timeframe>,
    series: BTreeMap<String, BTreeMap<Timeframe, BarSeries>>,
}

impl Shard {
    /// A shard holding the descriptor's members with empty series.
    pub fn empty(descriptor: &ShardDescriptor, timeframes: &[Timeframe]) -> Self {
        let series = descriptor
            .symbols
            .iter()
            .map(|symbol| {
                let by_tf = timeframes
                    .iter()
                    .map(|&tf| (tf, BarSeries::empty(symbol.clone(), tf)))
                    .collect();
                (symbol.clone(), by_tf)
            })
            .collect();
        Self {
            file_index: descriptor.file_index,
            range_start: descriptor.range_start.clone(),
            range_end: descriptor.range_end.clone(),
            last_updated: None,
            timeframes: timeframes.to_vec(),
            series,
        }
    }

    /// Member symbols in sorted order.
    pub fn members(&self) -> Vec<String> {
        self.series.keys().cloned().collect()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.series.contains_key(symbol)
    }

    pub fn series(&self, symbol: &str, timeframe: Timeframe) -> Option<&BarSeries> {
        self.series.get(symbol)?.get(&timeframe)
    }

    /// Mutable series for a member, created empty if the timeframe is absent.
    /// `None` when `symbol` is not a member of this shard.
    pub fn series_mut(&mut self, symbol: &str, timeframe: Timeframe) -> Option<&mut BarSeries> {
        self.series
            .get_mut(symbol)
            .map(|by_tf| {
                by_tf
                    .entry(timeframe)
                    .or_insert_with(|| BarSeries::empty(symbol, timeframe))
            })
    }

    /// Replace a member's series. Returns false (and stores nothing) for non-members.
    pub fn set_series(&mut self, series: BarSeries) -> bool {
        match self.series.get_mut(series.symbol()) {
            Some(by_tf) => {
                by_tf.insert(series.timeframe(), series);
                true
            }
            None => false,
        }
    }

    /// Iterate every member's series for one timeframe.
    pub fn iter_timeframe(&self, timeframe: Timeframe) -> impl Iterator<Item = &BarSeries> {
        self.series.values().filter_map(move |by_tf| by_tf.get(&timeframe))
    }

    /// Compact JSON, keys in sorted order so unchanged members serialize identically.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let file = ShardFile {
            last_updated: self.last_updated,
            file_index: self.file_index,
            range_start: self.range_start.clone(),
            range_end: self.range_end.clone(),
            symbol_count: self.series.len(),
            timeframes: self.timeframes.clone(),
            data: self
                .series
                .iter()
                .map(|(symbol, by_tf)| {
                    let bars = by_tf
                        .iter()
                        .map(|(tf, s)| (*tf, s.bars().to_vec()))
                        .collect();
                    (symbol.clone(), bars)
                })
                .collect(),
        };
        serde_json::to_vec(&file)
    }

    /// Parse a stored shard. `key` is only used for error context.
    pub fn from_bytes(key: &str, bytes: &[u8]) -> Result<Self, StoreError> {
        let file: ShardFile =
            serde_json::from_slice(bytes).map_err(|source| StoreError::Serialization {
                key: key.to_string(),
                source,
            })?;

        let mut series = BTreeMap::new();
        for (symbol, by_tf) in file.data {
            let mut parsed = BTreeMap::new();
            for (tf, bars) in by_tf {
                let s = BarSeries::from_bars(symbol.clone(), tf, bars).map_err(|source| {
                    StoreError::CorruptSeries {
                        key: key.to_string(),
                        symbol: symbol.clone(),
                        source,
                    }
                })?;
                parsed.insert(tf, s);
            }
            series.insert(symbol, parsed);
        }

        Ok(Self {
            file_index: file.file_index,
            range_start: file.range_start,
            range_end: file.range_end,
            last_updated: file.last_updated,
            timeframes: file.timeframes,
            series,
        })
    }
}
