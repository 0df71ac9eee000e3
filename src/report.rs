use crate::assembler::GameChunks;
use crate::errors::{ChunkWarning, ChunkerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A game or source that produced no chunks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub source_id: String,
    /// `None` when the whole source could not be read
    pub game_index: Option<usize>,
    pub kind: String,
    pub reason: String,
}

/// Counters and failures of one batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub sources_total: usize,
    pub sources_processed: usize,
    /// Already completed according to the checkpoint
    pub sources_skipped: usize,
    pub sources_cancelled: usize,
    pub sources_failed: usize,
    pub games_processed: usize,
    pub games_failed: usize,
    pub chunks_produced: usize,
    pub chunks_merged: usize,
    pub chunks_compressed: usize,
    pub chunks_lossy: usize,
    pub warnings_by_kind: BTreeMap<String, usize>,
    pub errors_by_kind: BTreeMap<String, usize>,
    pub failures: Vec<FailureRecord>,
}

impl RunSummary {
    pub fn new(sources_total: usize) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            sources_total,
            sources_processed: 0,
            sources_skipped: 0,
            sources_cancelled: 0,
            sources_failed: 0,
            games_processed: 0,
            games_failed: 0,
            chunks_produced: 0,
            chunks_merged: 0,
            chunks_compressed: 0,
            chunks_lossy: 0,
            warnings_by_kind: BTreeMap::new(),
            errors_by_kind: BTreeMap::new(),
            failures: Vec::new(),
        }
    }

    pub fn record_game(&mut self, game: &GameChunks) {
        self.games_processed += 1;
        self.chunks_produced += game.chunks.len();
        self.chunks_merged += game.merged;
        self.chunks_compressed += game.compressed;
        self.chunks_lossy += game.chunks.iter().filter(|c| c.metadata.lossy).count();
        for warning in &game.warnings {
            self.record_warning(warning);
        }
    }

    pub fn record_warning(&mut self, warning: &ChunkWarning) {
        *self.warnings_by_kind.entry(warning.kind().to_string()).or_insert(0) += 1;
    }

    pub fn record_game_failure(&mut self, source_id: &str, game_index: usize, error: &ChunkerError) {
        self.games_failed += 1;
        self.push_failure(source_id, Some(game_index), error);
    }

    pub fn record_source_failure(&mut self, source_id: &str, error: &ChunkerError) {
        self.sources_failed += 1;
        self.push_failure(source_id, None, error);
    }

    fn push_failure(&mut self, source_id: &str, game_index: Option<usize>, error: &ChunkerError) {
        *self.errors_by_kind.entry(error.kind().to_string()).or_insert(0) += 1;
        self.failures.push(FailureRecord {
            source_id: source_id.to_string(),
            game_index,
            kind: error.kind().to_string(),
            reason: error.to_string(),
        });
    }

    pub fn total_warnings(&self) -> usize {
        self.warnings_by_kind.values().sum()
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}
