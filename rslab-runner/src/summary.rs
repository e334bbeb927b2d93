//! Run summaries: what a rebuild or an update did, in counts and bytes.

use rslab_core::shard::ShardWrite;
use serde::Serialize;
use std::fmt;

pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Size delta with an explicit sign: `+1.2 KB`, `-300 B`, `0 B`.
pub fn format_size_delta(delta: i64) -> String {
    let magnitude = format_size(delta.unsigned_abs());
    match delta.signum() {
        1 => format!("+{magnitude}"),
        -1 => format!("-{magnitude}"),
        _ => magnitude,
    }
}

/// Outcome counts of an incremental update.
///
/// `merged = replaced + appended`; every processed symbol lands in exactly
/// one of `merged`, `not_indexed`, `no_new_data`, `fetch_failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    pub symbols: usize,
    pub merged: usize,
    pub replaced: usize,
    pub appended: usize,
    /// Bars dropped from the front of series to honor the retention cap.
    pub evicted: usize,
    pub not_indexed: usize,
    pub no_new_data: usize,
    pub fetch_failed: usize,
    pub shards_written: usize,
    /// Shards with no merged symbol, left untouched.
    pub shards_skipped: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

impl UpdateSummary {
    pub fn failed(&self) -> usize {
        self.not_indexed + self.no_new_data + self.fetch_failed
    }

    pub fn size_delta(&self) -> i64 {
        self.bytes_after as i64 - self.bytes_before as i64
    }

    pub fn record_write(&mut self, write: &ShardWrite) {
        self.shards_written += 1;
        self.bytes_before += write.previous_size;
        self.bytes_after += write.file_size;
    }

    /// Fold a per-shard summary into the run total.
    pub fn absorb(&mut self, other: &UpdateSummary) {
        self.symbols += other.symbols;
        self.merged += other.merged;
        self.replaced += other.replaced;
        self.appended += other.appended;
        self.evicted += other.evicted;
        self.not_indexed += other.not_indexed;
        self.no_new_data += other.no_new_data;
        self.fetch_failed += other.fetch_failed;
        self.shards_written += other.shards_written;
        self.shards_skipped += other.shards_skipped;
        self.bytes_before += other.bytes_before;
        self.bytes_after += other.bytes_after;
    }
}

impl fmt::Display for UpdateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Update Summary ===")?;
        writeln!(f, "Symbols:        {}", self.symbols)?;
        writeln!(
            f,
            "Merged:         {} ({} appended, {} replaced, {} evicted)",
            self.merged, self.appended, self.replaced, self.evicted
        )?;
        writeln!(
            f,
            "Failed:         {} ({} not indexed, {} no new data, {} fetch errors)",
            self.failed(),
            self.not_indexed,
            self.no_new_data,
            self.fetch_failed
        )?;
        writeln!(
            f,
            "Shards:         {} written, {} unchanged",
            self.shards_written, self.shards_skipped
        )?;
        write!(
            f,
            "Size:           {} -> {} ({})",
            format_size(self.bytes_before),
            format_size(self.bytes_after),
            format_size_delta(self.size_delta())
        )
    }
}

/// Outcome of a full rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildSummary {
    pub symbols: usize,
    pub shards_written: usize,
    /// Symbols with at least one bar in some timeframe.
    pub symbols_with_data: usize,
    /// Symbol/timeframe pairs the provider had nothing for.
    pub no_data: usize,
    /// Symbol/timeframe pairs that failed to fetch.
    pub fetch_failed: usize,
    pub bars_stored: usize,
    pub total_bytes: u64,
    pub orphans_removed: usize,
}

impl fmt::Display for RebuildSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Rebuild Summary ===")?;
        writeln!(f, "Symbols:        {} ({} with data)", self.symbols, self.symbols_with_data)?;
        writeln!(
            f,
            "Fetches:        {} empty, {} failed",
            self.no_data, self.fetch_failed
        )?;
        writeln!(f, "Bars stored:    {}", self.bars_stored)?;
        writeln!(
            f,
            "Shards:         {} written, {} orphaned removed",
            self.shards_written, self.orphans_removed
        )?;
        write!(f, "Size:           {}", format_size(self.total_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn sizes() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
        assert_eq!(format_size_delta(1536), "+1.5 KB");
        assert_eq!(format_size_delta(-300), "-300 B");
        assert_eq!(format_size_delta(0), "0 B");
    }

    #[test]
    fn record_write_tracks_bytes() {
        let mut summary = UpdateSummary::default();
        summary.record_write(&ShardWrite {
            file_index: 0,
            filename: "ohlc_000.json".into(),
            previous_size: 1_000,
            file_size: 1_200,
            data_hash: String::new(),
            written_at: Utc::now(),
        });
        assert_eq!(summary.shards_written, 1);
        assert_eq!(summary.size_delta(), 200);
    }

    #[test]
    fn absorb_adds_counts() {
        let mut total = UpdateSummary {
            merged: 2,
            appended: 2,
            ..UpdateSummary::default()
        };
        total.absorb(&UpdateSummary {
            merged: 1,
            replaced: 1,
            fetch_failed: 3,
            ..UpdateSummary::default()
        });
        assert_eq!(total.merged, 3);
        assert_eq!(total.failed(), 3);
    }

    #[test]
    fn display_mentions_counts() {
        let summary = UpdateSummary {
            symbols: 5,
            merged: 4,
            appended: 4,
            no_new_data: 1,
            shards_written: 1,
            ..UpdateSummary::default()
        };
        let text = summary.to_string();
        assert!(text.contains("Merged:         4"));
        assert!(text.contains("1 no new data"));
    }
}
