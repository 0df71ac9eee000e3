use crate::config_error;
use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the game tree builder reacts to an illegal move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    /// Any illegal move skips the whole game
    Strict,
    /// Truncate the offending branch at its last legal node
    BestEffort,
}

/// Chunking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Token budget every non-lossy chunk must respect
    pub target_token_budget: usize,
    /// Absolute ceiling for lossy chunks, as a multiple of the budget
    pub hard_ceiling_multiplier: f64,
    /// Fraction of the budget below which sibling chunks get merged
    pub min_merge_threshold_fraction: f64,
    /// Deepest branch nesting a chunk may have. The main line is depth 0; a
    /// subtree at this depth that still overflows is compressed, never split
    /// into deeper chunks.
    pub max_recursion_depth: usize,
    /// Plies into a unit after which tail summarization elides the rest
    pub tail_summary_ply_threshold: u32,
    /// Evaluation swing (pawns) that keeps an annotation during pruning
    pub eval_change_threshold: f32,
    /// Floor for pruning: one evaluation kept every N plies
    pub eval_keep_every_n_plies: u32,
    /// Plies of context shown before a variation's first move
    pub breadcrumb_max_plies: usize,
    /// Optional cap on units per game; further branches are compressed instead of split
    pub max_chunks_per_game: Option<usize>,
    /// Number of worker threads
    pub worker_pool_size: usize,
    /// Completed sources between checkpoint writes
    pub checkpoint_interval: usize,
    /// Reaction to illegal moves
    pub build_mode: BuildMode,
    /// Track issued ids to detect truncated-hash collisions
    pub detect_id_collisions: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_token_budget: 8000,
            hard_ceiling_multiplier: 1.05,
            min_merge_threshold_fraction: 0.25,
            max_recursion_depth: 4,
            tail_summary_ply_threshold: 40,
            eval_change_threshold: 0.5,
            eval_keep_every_n_plies: 10,
            breadcrumb_max_plies: 40,
            max_chunks_per_game: None,
            worker_pool_size: num_cpus::get().min(16), // Use available cores (max 16)
            checkpoint_interval: 50,
            build_mode: BuildMode::BestEffort,
            detect_id_collisions: true,
        }
    }
}

impl ChunkingConfig {
    /// Load configuration from a TOML file; missing keys fall back to defaults
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            config_error!("Failed to read config file {}: {}", path.display(), e)
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ChunkingConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the token budget
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.target_token_budget = budget;
        self
    }

    /// Set the worker pool size
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.worker_pool_size = workers;
        self
    }

    /// Set the build mode
    pub fn with_build_mode(mut self, mode: BuildMode) -> Self {
        self.build_mode = mode;
        self
    }

    /// Hard ceiling for lossy chunks, in tokens
    pub fn hard_ceiling(&self) -> usize {
        (self.target_token_budget as f64 * self.hard_ceiling_multiplier).floor() as usize
    }

    /// Reject configurations that cannot produce valid chunks
    pub fn validate(&self) -> Result<()> {
        if self.target_token_budget == 0 {
            return Err(config_error!("target_token_budget must be > 0"));
        }
        if !self.hard_ceiling_multiplier.is_finite() || self.hard_ceiling_multiplier < 1.0 {
            return Err(config_error!(
                "hard_ceiling_multiplier must be >= 1.0, got {}",
                self.hard_ceiling_multiplier
            ));
        }
        if !(0.0..1.0).contains(&self.min_merge_threshold_fraction) {
            return Err(config_error!(
                "min_merge_threshold_fraction must be in [0.0, 1.0), got {}",
                self.min_merge_threshold_fraction
            ));
        }
        if self.tail_summary_ply_threshold == 0 {
            return Err(config_error!("tail_summary_ply_threshold must be > 0"));
        }
        if !self.eval_change_threshold.is_finite() || self.eval_change_threshold < 0.0 {
            return Err(config_error!("eval_change_threshold must be >= 0"));
        }
        if self.eval_keep_every_n_plies == 0 {
            return Err(config_error!("eval_keep_every_n_plies must be > 0"));
        }
        if self.worker_pool_size == 0 {
            return Err(config_error!("worker_pool_size must be > 0"));
        }
        if self.checkpoint_interval == 0 {
            return Err(config_error!("checkpoint_interval must be > 0"));
        }
        if self.max_chunks_per_game == Some(0) {
            return Err(config_error!("max_chunks_per_game must be > 0 when set"));
        }
        Ok(())
    }
}
