#![allow(dead_code)]

use pgn_chunker::move_validator::{MoveOutcome, START_FEN};
use pgn_chunker::{
    BuildMode, ChunkerError, ChunkingConfig, MoveValidator, PgnChunker, SourceChunks, TokenCounter,
    WhitespaceCounter,
};

/// `n` filler words for comment text
pub fn words(n: usize) -> String {
    vec!["idea"; n].join(" ")
}

/// Counter that is always unavailable
pub struct FailingCounter;

impl TokenCounter for FailingCounter {
    fn count(&self, _text: &str) -> pgn_chunker::Result<usize> {
        Err(ChunkerError::TokenCountUnavailable("tokenizer offline".to_string()))
    }
}

/// Accepts any move; positions are the move list itself
pub struct PermissiveValidator;

impl MoveValidator for PermissiveValidator {
    type State = Vec<String>;

    fn initial_state(&self, fen: Option<&str>) -> Result<MoveOutcome<Vec<String>>, String> {
        Ok(MoveOutcome {
            state: Vec::new(),
            fen: fen.unwrap_or(START_FEN).to_string(),
        })
    }

    fn apply_move(&self, state: &Vec<String>, san: &str) -> Result<MoveOutcome<Vec<String>>, String> {
        let mut moves = state.clone();
        moves.push(san.to_string());
        Ok(MoveOutcome {
            fen: format!("{} w - -", moves.join("_")),
            state: moves,
        })
    }
}

pub fn strict_config(budget: usize) -> ChunkingConfig {
    ChunkingConfig::default()
        .with_budget(budget)
        .with_build_mode(BuildMode::Strict)
        .with_workers(2)
}

/// Chunk `pgn` counting one token per word
pub fn chunk_words(pgn: &str, config: ChunkingConfig) -> SourceChunks {
    PgnChunker::with_counter(config, WhitespaceCounter)
        .unwrap()
        .chunk_pgn("scenario.pgn", pgn)
        .unwrap()
}

pub const OPERA_GAME: &str = "[Event \"Paris\"]\n[White \"Morphy\"]\n[Black \"Duke Karl\"]\n[Result \"1-0\"]\n\n\
1. e4 e5 2. Nf3 d6 3. d4 Bg4 4. dxe5 Bxf3 5. Qxf3 dxe5 6. Bc4 Nf6 7. Qb3 Qe7 \
8. Nc3 c6 9. Bg5 b5 10. Nxb5 cxb5 11. Bxb5+ Nbd7 12. O-O-O Rd8 13. Rxd7 Rxd7 \
14. Rd1 Qe6 15. Bxd7+ Nxd7 16. Qb8+ Nxb8 17. Rd8# 1-0\n";

/// Main line of 2000 words, two 2200-word branches and a 9000-word branch that splits again
pub fn three_branch_game() -> String {
    format!(
        "[White \"Alpha\"]\n[Black \"Beta\"]\n\n\
         1. e4 {{{}}} e5 (1... c5 {{{}}} 2. Nf3) (1... e6 {{{}}} 2. d4) \
         (1... d5 {{{}}} 2. exd5 Qxd5 (2... Nf6 {{{}}} 3. d4)) 2. Nf3 *\n",
        words(2000),
        words(2200),
        words(2200),
        words(4500),
        words(4500)
    )
}
