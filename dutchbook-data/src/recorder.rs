//! Book snapshot recorder for debugging and replay.
//!
//! Writes the unified book to a JSON file after every N published updates
//! per market. Enable via `RECORD_BOOKS=true`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, error, info};

use crate::books::MarketBook;

/// Records published book snapshots to disk.
pub struct BookRecorder {
    /// Number of updates between snapshots per market.
    interval: u32,
    /// Per-market update counter.
    counts: HashMap<String, u32>,
    output_dir: PathBuf,
    total_written: u64,
}

impl BookRecorder {
    pub fn new(interval: u32, output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        if let Err(e) = std::fs::create_dir_all(&output_dir) {
            error!(?output_dir, %e, "failed to create book snapshot directory");
        } else {
            info!(?output_dir, interval, "book recorder enabled");
        }
        Self {
            interval,
            counts: HashMap::new(),
            output_dir,
            total_written: 0,
        }
    }

    /// Build from environment variables.
    ///
    /// Returns `Some` when `RECORD_BOOKS=true`, using:
    /// - `RECORD_BOOKS_INTERVAL` (default 100)
    /// - `RECORD_BOOKS_DIR` (default `./book-snapshots`)
    pub fn from_env() -> Option<Self> {
        let enabled = std::env::var("RECORD_BOOKS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        if !enabled {
            return None;
        }

        let interval = std::env::var("RECORD_BOOKS_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);
        let dir = std::env::var("RECORD_BOOKS_DIR")
            .unwrap_or_else(|_| "./book-snapshots".to_string());

        Some(Self::new(interval, dir))
    }

    /// Called by the normalizer on every published update.
    pub fn on_book_update(&mut self, book: &MarketBook) {
        let key = format!("{}_{}", book.venue, book.market_id);
        let count = self.counts.entry(key).or_insert(0);
        *count += 1;
        if *count >= self.interval {
            *count = 0;
            self.write_snapshot(book);
        }
    }

    fn write_snapshot(&mut self, book: &MarketBook) {
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let safe_name: String = book
            .market_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let filename = format!("{}_{}_{}.json", book.venue, safe_name, timestamp);
        let path = self.output_dir.join(&filename);

        match serde_json::to_string_pretty(book) {
            Ok(json) => match std::fs::write(&path, json) {
                Ok(()) => {
                    self.total_written += 1;
                    debug!(market = %book.market_id, ?path, total = self.total_written, "book snapshot written");
                }
                Err(e) => error!(?path, %e, "failed to write book snapshot"),
            },
            Err(e) => error!(market = %book.market_id, %e, "failed to serialize book"),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn total_written(&self) -> u64 {
        self.total_written
    }
}
