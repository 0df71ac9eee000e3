//! # PGN Chunker
//!
//! Turns collections of annotated chess games into bounded-size text chunks
//! for embedding and retrieval. A game tree (main line, nested variations,
//! comments, evaluations, glyphs) is split along its variations until every
//! piece fits a token budget, so that no move, comment or branch is lost and
//! every chunk stays a legal, replayable move sequence.
//!
//! ## Features
//!
//! - **Budget-driven splitting**: subtrees that fit stay whole; larger ones
//!   split along their first-level branches, most significant first
//! - **Provenance**: every chunk carries its variation path, breadcrumb,
//!   parent/sibling ids and source hierarchy
//! - **Embedded games**: model games quoted inside annotations become games
//!   of their own
//! - **Lossy fallback**: evaluation pruning, tail summaries and truncation,
//!   always flagged in the chunk metadata
//! - **Batch runs**: parallel processing, streaming JSONL output, checkpoints
//!   and cancellation
//!
//! ## Quick Start
//!
//! ```rust
//! use pgn_chunker::{ChunkingConfig, PgnChunker};
//!
//! let config = ChunkingConfig::default().with_budget(2000);
//! let chunker = PgnChunker::new(config).unwrap();
//!
//! let pgn = "[White \"Morphy\"]\n[Black \"Duke Karl\"]\n\n1. e4 e5 2. Nf3 d6 *";
//! let outcome = chunker.chunk_pgn("opera.pgn", pgn).unwrap();
//! assert_eq!(outcome.chunks.len(), 1);
//! assert!(outcome.chunks[0].content.contains("Morphy - Duke Karl"));
//! ```

pub mod aggregation;
pub mod annotations;
pub mod assembler;
pub mod batch;
pub mod chunk;
pub mod compression;
pub mod config;
pub mod errors;
pub mod game_tree;
pub mod ids;
pub mod move_validator;
pub mod pgn_loader;
pub mod pipeline;
pub mod render;
pub mod report;
pub mod splitter;
pub mod token_budget;
pub mod utils;

pub use assembler::{ChunkAssembler, GameChunks};
pub use batch::{BatchOrchestrator, CancellationToken, Checkpoint, ChunkSink, JsonlSink, VecSink};
pub use chunk::{Chunk, ChunkMetadata, LossyReason, Role, Segment};
pub use config::{BuildMode, ChunkingConfig};
pub use errors::{ChunkWarning, ChunkerError, Result};
pub use game_tree::{GameRecord, GameTree, Hierarchy, NodeId, VariationNode};
pub use ids::IdRegistry;
pub use move_validator::{ChessRulesValidator, MoveValidator};
pub use pipeline::{ChunkingContext, PgnText, SourceChunks, SourceInput};
pub use report::RunSummary;
pub use token_budget::{CachedCounter, HeuristicCounter, TokenCounter, WhitespaceCounter};

/// Default number of token counts kept by [`PgnChunker`]
pub const DEFAULT_COUNT_CACHE: usize = 10_000;

/// Ready-to-use chunker: configuration, validator, token counter and id registry
pub struct PgnChunker {
    config: ChunkingConfig,
    counter: Box<dyn TokenCounter>,
    validator: ChessRulesValidator,
    ids: IdRegistry,
}

impl PgnChunker {
    /// Create a chunker using the character heuristic for token counts
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        Self::with_counter(config, CachedCounter::new(HeuristicCounter, DEFAULT_COUNT_CACHE))
    }

    /// Create a chunker with a model-specific token counter
    pub fn with_counter<C: TokenCounter + 'static>(config: ChunkingConfig, counter: C) -> Result<Self> {
        config.validate()?;
        let ids = IdRegistry::new(config.detect_id_collisions);
        Ok(Self {
            config,
            counter: Box::new(counter),
            validator: ChessRulesValidator::new(),
            ids,
        })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    pub fn context(&self) -> ChunkingContext<'_, ChessRulesValidator> {
        ChunkingContext::new(&self.config, self.counter.as_ref(), &self.validator, &self.ids)
    }

    /// Chunk one PGN text sequentially
    pub fn chunk_pgn(&self, source_id: &str, pgn: &str) -> Result<SourceChunks> {
        self.context().process_source(&SourceInput::new(source_id, pgn))
    }

    /// Batch orchestrator over this chunker's context
    pub fn orchestrator(&self) -> BatchOrchestrator<'_, ChessRulesValidator> {
        BatchOrchestrator::new(self.context())
    }
}
