use chess::{Board, ChessMove};
use std::str::FromStr;

/// Standard starting position
pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Result of applying one move
#[derive(Debug, Clone)]
pub struct MoveOutcome<S> {
    pub state: S,
    pub fen: String,
}

/// Move legality capability injected into tree building.
///
/// Implementations must be deterministic: the same state and move text always
/// give the same outcome.
pub trait MoveValidator: Send + Sync {
    type State: Clone + Send;

    /// Parse a starting position (`None` = standard start)
    fn initial_state(&self, fen: Option<&str>) -> Result<MoveOutcome<Self::State>, String>;

    /// Apply SAN move text, returning the new state or the reason it is illegal
    fn apply_move(&self, state: &Self::State, san: &str) -> Result<MoveOutcome<Self::State>, String>;
}

/// Validator backed by the `chess` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ChessRulesValidator;

impl ChessRulesValidator {
    pub fn new() -> Self {
        Self
    }
}

impl MoveValidator for ChessRulesValidator {
    type State = Board;

    fn initial_state(&self, fen: Option<&str>) -> Result<MoveOutcome<Board>, String> {
        let board = match fen {
            Some(fen) => Board::from_str(fen).map_err(|e| format!("invalid FEN '{}': {}", fen, e))?,
            None => Board::default(),
        };
        Ok(MoveOutcome {
            fen: board.to_string(),
            state: board,
        })
    }

    fn apply_move(&self, state: &Board, san: &str) -> Result<MoveOutcome<Board>, String> {
        let cleaned = strip_san_suffix(san);
        if cleaned.is_empty() {
            return Err("empty move text".to_string());
        }

        let chess_move = ChessMove::from_san(state, cleaned)
            .map_err(|e| format!("cannot parse '{}': {}", san, e))?;

        // from_san resolves notation only; legality is checked separately
        if !state.legal(chess_move) {
            return Err(format!("'{}' is not legal in {}", san, state));
        }

        let board = state.make_move_new(chess_move);
        Ok(MoveOutcome {
            fen: board.to_string(),
            state: board,
        })
    }
}

/// Drop check/mate markers and annotation glyphs glued to SAN
pub fn strip_san_suffix(san: &str) -> &str {
    san.trim()
        .trim_end_matches(|c| matches!(c, '+' | '#' | '!' | '?'))
}

/// Replay a move list from a starting FEN, returning the final FEN
pub fn replay_line<V: MoveValidator>(
    validator: &V,
    start_fen: Option<&str>,
    moves: &[String],
) -> Result<String, String> {
    let mut current = validator.initial_state(start_fen)?;
    for (i, san) in moves.iter().enumerate() {
        current = validator
            .apply_move(&current.state, san)
            .map_err(|e| format!("move {} ({}): {}", i + 1, san, e))?;
    }
    Ok(current.fen)
}

/// Piece placement, side, castling and en passant: the fields that identify a position
pub fn position_key(fen: &str) -> String {
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

/// Side to move and fullmove number from a FEN (defaults: white, move 1)
pub fn fen_side_and_fullmove(fen: &str) -> (bool, u32) {
    let fields: Vec<&str> = fen.split_whitespace().collect();
    let white = fields.get(1).map(|s| *s != "b").unwrap_or(true);
    let fullmove = fields
        .get(5)
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(1);
    (white, fullmove)
}
