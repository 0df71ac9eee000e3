//! Single-source chunking: PGN text → detected games → chunks.
//!
//! Everything a game needs is passed in a [`ChunkingContext`]; there is no
//! global state, so the same context can be shared by every worker.

use crate::aggregation::detect_embedded_games;
use crate::assembler::{ChunkAssembler, GameChunks};
use crate::chunk::Chunk;
use crate::config::ChunkingConfig;
use crate::errors::{ChunkWarning, ChunkerError, Result};
use crate::game_tree::{GameOrigin, GameTreeBuilder, Hierarchy};
use crate::ids::IdRegistry;
use crate::move_validator::MoveValidator;
use crate::pgn_loader::{read_records, RawGame};
use crate::splitter::Splitter;
use crate::token_budget::{TokenBudgetPlanner, TokenCounter};
use std::borrow::Cow;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Where a source's PGN text comes from
#[derive(Debug, Clone)]
pub enum PgnText {
    Inline(String),
    /// Read by the worker that processes the source
    File(PathBuf),
}

/// One input source: an identifier, its PGN text and optional hierarchy
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub source_id: String,
    pub pgn: PgnText,
    pub hierarchy: Option<Hierarchy>,
}

impl SourceInput {
    pub fn new(source_id: impl Into<String>, pgn: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            pgn: PgnText::Inline(pgn.into()),
            hierarchy: None,
        }
    }

    /// A `.pgn` file, read only when the source is processed; the path becomes the source id
    pub fn from_path<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        Self {
            source_id: path.display().to_string(),
            pgn: PgnText::File(path),
            hierarchy: None,
        }
    }

    pub fn with_hierarchy(mut self, hierarchy: Hierarchy) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    pub fn load(&self) -> Result<Cow<'_, str>> {
        match &self.pgn {
            PgnText::Inline(text) => Ok(Cow::Borrowed(text.as_str())),
            PgnText::File(path) => std::fs::read_to_string(path)
                .map(Cow::Owned)
                .map_err(|e| ChunkerError::Io(format!("{}: {}", path.display(), e))),
        }
    }
}

/// An independent game ready for tree building
#[derive(Debug, Clone)]
pub struct PreparedGame {
    pub game_index: usize,
    pub raw: RawGame,
    pub embedded_from: Option<usize>,
    pub warnings: Vec<ChunkWarning>,
}

/// Games of a source, plus the records that could not be read
#[derive(Debug, Default)]
pub struct PreparedSource {
    pub games: Vec<PreparedGame>,
    /// Game index given to each unreadable record, with the reason
    pub unreadable: Vec<(usize, ChunkerError)>,
}

/// Read a source and split every record into its independent games.
///
/// Game indices run consecutively over the whole source, so an extracted
/// game's `embedded_from` is the index of its host within the same source.
/// An unreadable record takes one index and is reported in `unreadable`.
pub fn prepare_source(input: &SourceInput) -> Result<PreparedSource> {
    let text = input.load()?;
    let mut prepared = PreparedSource::default();
    let mut next_index = 0;

    for record in read_records(&text) {
        let raws = match record {
            Ok(raws) => raws,
            Err(e) => {
                warn!(source = %input.source_id, game = next_index, "Unreadable record: {}", e);
                prepared.unreadable.push((next_index, e));
                next_index += 1;
                continue;
            }
        };
        for raw in raws {
            let base = next_index;
            let aggregation = detect_embedded_games(raw);
            if aggregation.games.len() > 1 {
                debug!(
                    source = %input.source_id,
                    host = base,
                    extracted = aggregation.games.len() - 1,
                    "Extracted embedded games"
                );
            }
            for detected in aggregation.games {
                prepared.games.push(PreparedGame {
                    game_index: next_index,
                    raw: detected.raw,
                    embedded_from: detected.embedded_from.map(|position| base + position),
                    warnings: detected.warnings,
                });
                next_index += 1;
            }
        }
    }

    Ok(prepared)
}

/// Outcome of chunking one source sequentially
#[derive(Debug, Default)]
pub struct SourceChunks {
    pub chunks: Vec<Chunk>,
    pub warnings: Vec<ChunkWarning>,
    pub games: usize,
    pub merged: usize,
    pub compressed: usize,
    /// Games that produced no chunks, with the reason
    pub failures: Vec<(usize, ChunkerError)>,
}

/// Capabilities and settings shared by every game of a run
pub struct ChunkingContext<'a, V: MoveValidator> {
    pub config: &'a ChunkingConfig,
    pub counter: &'a dyn TokenCounter,
    pub validator: &'a V,
    pub ids: &'a IdRegistry,
}

impl<'a, V: MoveValidator> Clone for ChunkingContext<'a, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, V: MoveValidator> Copy for ChunkingContext<'a, V> {}

impl<'a, V: MoveValidator> ChunkingContext<'a, V> {
    pub fn new(
        config: &'a ChunkingConfig,
        counter: &'a dyn TokenCounter,
        validator: &'a V,
        ids: &'a IdRegistry,
    ) -> Self {
        Self {
            config,
            counter,
            validator,
            ids,
        }
    }

    /// Build, split and assemble one game
    pub fn chunk_game(&self, input: &SourceInput, game: &PreparedGame) -> Result<GameChunks> {
        let origin = GameOrigin {
            source_id: &input.source_id,
            game_index: game.game_index,
            hierarchy: input.hierarchy.as_ref(),
            embedded_from: game.embedded_from,
        };
        let record = GameTreeBuilder::new(self.validator, self.config.build_mode).build(&game.raw, &origin)?;

        let planner = TokenBudgetPlanner::new(self.counter, self.config);
        let units = Splitter::new(self.config, &planner).split(&record);
        let mut assembled = ChunkAssembler::new(&planner, self.ids).assemble(&record, units);

        let mut warnings = game.warnings.clone();
        warnings.extend(record.warnings.iter().cloned());
        warnings.append(&mut assembled.warnings);
        assembled.warnings = warnings;
        Ok(assembled)
    }

    /// Chunk every game of a source in order; failing games are recorded, not fatal
    pub fn process_source(&self, input: &SourceInput) -> Result<SourceChunks> {
        self.config.validate()?;
        let prepared = prepare_source(input)?;
        let mut outcome = SourceChunks {
            games: prepared.games.len() + prepared.unreadable.len(),
            failures: prepared.unreadable,
            ..SourceChunks::default()
        };

        for game in &prepared.games {
            match self.chunk_game(input, game) {
                Ok(mut chunks) => {
                    outcome.merged += chunks.merged;
                    outcome.compressed += chunks.compressed;
                    outcome.warnings.append(&mut chunks.warnings);
                    outcome.chunks.append(&mut chunks.chunks);
                }
                Err(e) => {
                    warn!(source = %input.source_id, game = game.game_index, "Game skipped: {}", e);
                    outcome.failures.push((game.game_index, e));
                }
            }
        }
        outcome.failures.sort_by_key(|(index, _)| *index);

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Role;
    use crate::move_validator::ChessRulesValidator;
    use crate::token_budget::WhitespaceCounter;

    #[test]
    fn test_embedded_games_get_consecutive_indices() {
        let pgn = r#"[Event "First"]

1. d4 d5 *

[Event "Lesson"]
[White "Coach"]
[Black "Student"]

1. e4 e5 2. Nf3 ({Model game: Spassky - Bronstein, Leningrad 1960} 2. f4 exf4 3. Nf3 d5) 2... Nc6 *
"#;
        let games = prepare_source(&SourceInput::new("lesson.pgn", pgn)).unwrap().games;
        assert_eq!(games.len(), 3);
        assert_eq!(games[0].embedded_from, None);
        assert_eq!(games[1].game_index, 1);
        assert_eq!(games[2].game_index, 2);
        assert_eq!(games[2].embedded_from, Some(1));
    }

    #[test]
    fn test_process_source_isolates_bad_games() {
        let pgn = r#"[Event "Good"]

1. e4 e5 2. Nf3 *

[Event "Bad"]
[FEN "not a position"]

1. e4 *
"#;
        let config = ChunkingConfig::default().with_budget(200);
        let ids = IdRegistry::default();
        let validator = ChessRulesValidator::new();
        let context = ChunkingContext::new(&config, &WhitespaceCounter, &validator, &ids);
        let outcome = context.process_source(&SourceInput::new("mixed.pgn", pgn)).unwrap();

        assert_eq!(outcome.games, 2);
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(outcome.chunks[0].metadata.role, Role::MainLine);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, 1);
    }

    #[test]
    fn test_unreadable_record_is_a_game_failure() {
        let pgn = format!(
            "[Event \"Good\"]\n\n1. e4 e5 *\n\n[Annotator \"{}\"]\n\n1. d4 *\n\n[Event \"Later\"]\n\n1. c4 {{{}}} e5 *\n",
            "x".repeat(40_000),
            vec!["plan"; 3500].join(" ")
        );
        let config = ChunkingConfig::default();
        let ids = IdRegistry::default();
        let validator = ChessRulesValidator::new();
        let context = ChunkingContext::new(&config, &WhitespaceCounter, &validator, &ids);
        let outcome = context.process_source(&SourceInput::new("long.pgn", pgn)).unwrap();

        assert_eq!(outcome.games, 3);
        assert_eq!(outcome.chunks.len(), 2);
        assert_eq!(outcome.chunks[1].metadata.game_index, 2);
        assert!(outcome.chunks[1].token_count > 3500);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, 1);
        assert_eq!(outcome.failures[0].1.kind(), "malformed_record");
    }

    #[test]
    fn test_missing_file_fails_the_source() {
        let input = SourceInput::from_path("/nonexistent/dir/games.pgn");
        assert_eq!(input.source_id, "/nonexistent/dir/games.pgn");
        assert!(matches!(prepare_source(&input), Err(ChunkerError::Io(_))));
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let config = ChunkingConfig::default().with_budget(0);
        let ids = IdRegistry::default();
        let validator = ChessRulesValidator::new();
        let context = ChunkingContext::new(&config, &WhitespaceCounter, &validator, &ids);
        let result = context.process_source(&SourceInput::new("a.pgn", "1. e4 *"));
        assert!(matches!(result, Err(ChunkerError::Configuration(_))));
    }
}
