//! Validated game trees.
//!
//! A game is an arena of [`VariationNode`]s indexed by [`NodeId`]; the root
//! (index 0) is the starting position and carries no move. The first child of
//! a node continues its line, later children are alternatives to that
//! continuation.

use crate::annotations::{detect_significance, parse_eval, strip_commands, Evaluation, Significance};
use crate::config::BuildMode;
use crate::errors::{ChunkWarning, ChunkerError, Result};
use crate::malformed_record;
use crate::move_validator::{fen_side_and_fullmove, MoveOutcome, MoveValidator};
use crate::pgn_loader::{RawGame, RawNodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

pub type NodeId = usize;

pub const ROOT: NodeId = 0;

/// Source hierarchy a game belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hierarchy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl Hierarchy {
    pub fn new(collection: Option<&str>, chapter: Option<&str>, section: Option<&str>) -> Self {
        let owned = |s: Option<&str>| s.map(str::trim).filter(|s| !s.is_empty()).map(String::from);
        Self {
            collection: owned(collection),
            chapter: owned(chapter),
            section: owned(section),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.collection.is_none() && self.chapter.is_none() && self.section.is_none()
    }

    /// Read `Collection`/`Chapter`/`Section` tags (lichess study tags as fallback)
    pub fn from_raw_headers(raw: &RawGame) -> Self {
        Self::new(
            raw.header("Collection").or_else(|| raw.header("StudyName")),
            raw.header("Chapter").or_else(|| raw.header("ChapterName")),
            raw.header("Section"),
        )
    }

    /// One-line rendering, `None` when empty
    pub fn render(&self) -> Option<String> {
        let parts: Vec<String> = [
            ("Collection", &self.collection),
            ("Chapter", &self.chapter),
            ("Section", &self.section),
        ]
        .iter()
        .filter_map(|(name, value)| value.as_ref().map(|v| format!("{}: {}", name, v)))
        .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" | "))
        }
    }
}

/// One ply of a validated game
#[derive(Debug, Clone)]
pub struct VariationNode {
    pub san: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Comment written before the move (first move of a variation)
    pub pre_comment: Option<String>,
    pub comment: Option<String>,
    pub eval: Option<Evaluation>,
    pub nags: Vec<u8>,
    pub significance: BTreeSet<Significance>,
    /// Position after the move
    pub fen: String,
    /// Plies from the root
    pub ply: u32,
    pub move_number: u32,
    pub white: bool,
    /// Branch label such as `15...Nf6`, unique among siblings
    pub label: String,
}

impl VariationNode {
    pub fn is_branch_point(&self) -> bool {
        self.children.len() > 1
    }

    /// Move number prefix; black moves only get one when `force` is set
    pub fn move_prefix(&self, force: bool) -> Option<String> {
        if self.white {
            Some(format!("{}.", self.move_number))
        } else if force {
            Some(format!("{}...", self.move_number))
        } else {
            None
        }
    }

    pub fn significance_score(&self) -> u32 {
        self.significance.iter().map(|s| s.weight()).sum()
    }
}

/// Arena-backed game tree
#[derive(Debug, Clone)]
pub struct GameTree {
    nodes: Vec<VariationNode>,
}

impl GameTree {
    pub fn node(&self, id: NodeId) -> &VariationNode {
        &self.nodes[id]
    }

    pub fn root(&self) -> &VariationNode {
        &self.nodes[ROOT]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Number of moves (root excluded)
    pub fn move_count(&self) -> usize {
        self.nodes.len() - 1
    }

    /// `start` followed by its first-child continuation to the end of the line
    pub fn line(&self, start: NodeId) -> Vec<NodeId> {
        let mut line = vec![start];
        let mut current = start;
        while let Some(next) = self.nodes[current].children.first() {
            line.push(*next);
            current = *next;
        }
        line
    }

    /// `start` and all of its descendants in pre-order
    pub fn subtree(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            order.push(id);
            for child in self.nodes[id].children.iter().rev() {
                stack.push(*child);
            }
        }
        order
    }

    /// Nodes from the root (exclusive) down to `node` (inclusive)
    pub fn path_to(&self, node: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut current = node;
        while let Some(parent) = self.nodes[current].parent {
            path.push(current);
            current = parent;
        }
        path.reverse();
        path
    }

    /// Whether `node` is an alternative rather than a continuation
    pub fn is_branch_start(&self, node: NodeId) -> bool {
        match self.nodes[node].parent {
            Some(parent) => self.nodes[parent].children.first() != Some(&node),
            None => false,
        }
    }

    /// Labels of every branch start from the root down to `node`
    pub fn variation_path(&self, node: NodeId) -> Vec<String> {
        self.path_to(node)
            .into_iter()
            .filter(|id| self.is_branch_start(*id))
            .map(|id| self.nodes[id].label.clone())
            .collect()
    }

    /// SAN of every move from the root up to and including `node`
    pub fn moves_to(&self, node: NodeId) -> Vec<String> {
        self.path_to(node)
            .into_iter()
            .map(|id| self.nodes[id].san.clone())
            .collect()
    }

    /// First-level branches of the line starting at `start`
    pub fn line_branches(&self, start: NodeId) -> Vec<NodeId> {
        self.line(start)
            .into_iter()
            .flat_map(|id| self.nodes[id].children.iter().skip(1).copied())
            .collect()
    }
}

/// One independent game ready for splitting
#[derive(Debug, Clone)]
pub struct GameRecord {
    pub source_id: String,
    pub game_index: usize,
    pub headers: Vec<(String, String)>,
    pub hierarchy: Hierarchy,
    pub tree: GameTree,
    pub start_fen: String,
    /// Game index of the enclosing game for extracted embedded games
    pub embedded_from: Option<usize>,
    /// Non-fatal issues met while building
    pub warnings: Vec<ChunkWarning>,
}

impl GameRecord {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Compact one-line description: players, event, date, result, opening
    pub fn describe(&self) -> String {
        let known = |key: &str| self.header(key).filter(|v| !v.is_empty() && !v.contains('?'));
        let mut line = match (known("White"), known("Black")) {
            (Some(w), Some(b)) => format!("{} - {}", w, b),
            (Some(w), None) => w.to_string(),
            (None, Some(b)) => b.to_string(),
            (None, None) => "Unknown players".to_string(),
        };
        for key in ["Event", "Date"] {
            if let Some(value) = known(key) {
                line.push_str(", ");
                line.push_str(value);
            }
        }
        if let Some(result) = self.header("Result").filter(|r| *r != "*") {
            line.push_str(", ");
            line.push_str(result);
        }
        match (known("ECO"), known("Opening")) {
            (Some(eco), Some(name)) => line.push_str(&format!(" [{} {}]", eco, name)),
            (Some(eco), None) => line.push_str(&format!(" [{}]", eco)),
            (None, Some(name)) => line.push_str(&format!(" [{}]", name)),
            (None, None) => {}
        }
        line
    }
}

/// Where a game comes from
#[derive(Debug, Clone)]
pub struct GameOrigin<'a> {
    pub source_id: &'a str,
    pub game_index: usize,
    /// Hierarchy from upstream ingestion, preferred over PGN tags
    pub hierarchy: Option<&'a Hierarchy>,
    pub embedded_from: Option<usize>,
}

/// Validates raw trees through a [`MoveValidator`]
pub struct GameTreeBuilder<'v, V: MoveValidator> {
    validator: &'v V,
    mode: BuildMode,
}

impl<'v, V: MoveValidator> GameTreeBuilder<'v, V> {
    pub fn new(validator: &'v V, mode: BuildMode) -> Self {
        Self { validator, mode }
    }

    pub fn build(&self, raw: &RawGame, origin: &GameOrigin<'_>) -> Result<GameRecord> {
        if let Some(reason) = &raw.malformed {
            return Err(malformed_record!("{}", reason));
        }
        if raw.headers.is_empty() && raw.move_count() == 0 {
            return Err(malformed_record!("record has neither headers nor moves"));
        }

        let mut headers = raw.headers.clone();
        let header_fen = raw.header("FEN").map(str::to_string);
        let initial = self
            .validator
            .initial_state(header_fen.as_deref())
            .map_err(|e| malformed_record!("invalid FEN header: {}", e))?;
        let (mut white, mut fullmove) = header_fen
            .as_deref()
            .map(fen_side_and_fullmove)
            .unwrap_or((true, 1));

        // Embedded games start where their setup moves lead
        let mut start = initial;
        for (i, san) in raw.setup_moves.iter().enumerate() {
            start = self
                .validator
                .apply_move(&start.state, san)
                .map_err(|reason| ChunkerError::IllegalMove {
                    path: format!("setup/{}", i + 1),
                    san: san.clone(),
                    reason,
                })?;
            if !white {
                fullmove += 1;
            }
            white = !white;
        }

        let start_fen = with_move_counters(&start.fen, white, fullmove);
        if !raw.setup_moves.is_empty() {
            set_header(&mut headers, "SetUp", "1");
            set_header(&mut headers, "FEN", &start_fen);
        }

        let root_comment = raw.nodes[0].comment.as_deref();
        let mut nodes = vec![VariationNode {
            san: String::new(),
            parent: None,
            children: Vec::new(),
            pre_comment: None,
            comment: root_comment.map(strip_commands).filter(|c| !c.is_empty()),
            eval: root_comment.and_then(parse_eval),
            nags: Vec::new(),
            significance: BTreeSet::new(),
            fen: start_fen.clone(),
            ply: 0,
            move_number: fullmove,
            white: false,
            label: String::new(),
        }];
        let mut warnings = Vec::new();

        // (raw node, new parent, position before the raw node's move)
        let mut stack: Vec<(RawNodeId, NodeId, MoveOutcome<V::State>)> = Vec::new();
        for child in raw.nodes[0].children.iter().rev() {
            stack.push((*child, ROOT, start.clone()));
        }

        while let Some((raw_id, parent, before)) = stack.pop() {
            let raw_node = &raw.nodes[raw_id];
            let parent_node = &nodes[parent];
            let (move_white, move_number) = next_move(parent_node, white, fullmove);
            let label = sibling_unique_label(&nodes, parent, move_white, move_number, &raw_node.san);

            let after = match self.validator.apply_move(&before.state, &raw_node.san) {
                Ok(after) => after,
                Err(reason) => {
                    let mut path = path_labels(&nodes, parent);
                    path.push(label.clone());
                    let path = path.join("/");
                    match self.mode {
                        BuildMode::Strict => {
                            return Err(ChunkerError::IllegalMove {
                                path,
                                san: raw_node.san.clone(),
                                reason,
                            })
                        }
                        BuildMode::BestEffort => {
                            warn!(
                                source = origin.source_id,
                                game = origin.game_index,
                                path = %path,
                                "Truncating branch at illegal move {}: {}",
                                raw_node.san,
                                reason
                            );
                            warnings.push(ChunkWarning::IllegalMoveTruncated {
                                path,
                                san: raw_node.san.clone(),
                                reason,
                            });
                            continue;
                        }
                    }
                }
            };

            let raw_comments = [raw_node.pre_comment.as_deref(), raw_node.comment.as_deref()];
            let significance = detect_significance(&raw_node.nags, raw_comments.iter().flatten().copied());
            let id = nodes.len();
            nodes.push(VariationNode {
                san: raw_node.san.clone(),
                parent: Some(parent),
                children: Vec::new(),
                pre_comment: raw_node
                    .pre_comment
                    .as_deref()
                    .map(strip_commands)
                    .filter(|c| !c.is_empty()),
                comment: raw_node
                    .comment
                    .as_deref()
                    .map(strip_commands)
                    .filter(|c| !c.is_empty()),
                eval: raw_node.comment.as_deref().and_then(parse_eval),
                nags: raw_node.nags.clone(),
                significance,
                fen: after.fen.clone(),
                ply: nodes[parent].ply + 1,
                move_number,
                white: move_white,
                label,
            });
            nodes[parent].children.push(id);

            for child in raw_node.children.iter().rev() {
                stack.push((*child, id, after.clone()));
            }
        }

        let hierarchy = match origin.hierarchy {
            Some(h) if !h.is_empty() => h.clone(),
            _ => Hierarchy::from_raw_headers(raw),
        };

        debug!(
            source = origin.source_id,
            game = origin.game_index,
            moves = nodes.len() - 1,
            "Built game tree"
        );

        Ok(GameRecord {
            source_id: origin.source_id.to_string(),
            game_index: origin.game_index,
            headers,
            hierarchy,
            tree: GameTree { nodes },
            start_fen,
            embedded_from: origin.embedded_from,
            warnings,
        })
    }
}

/// Side and move number of the move played after `parent`
fn next_move(parent: &VariationNode, start_white: bool, start_fullmove: u32) -> (bool, u32) {
    if parent.parent.is_none() {
        return (start_white, start_fullmove);
    }
    if parent.white {
        (false, parent.move_number)
    } else {
        (true, parent.move_number + 1)
    }
}

fn sibling_unique_label(
    nodes: &[VariationNode],
    parent: NodeId,
    white: bool,
    move_number: u32,
    san: &str,
) -> String {
    let base = if white {
        format!("{}.{}", move_number, san)
    } else {
        format!("{}...{}", move_number, san)
    };
    let duplicates = nodes[parent]
        .children
        .iter()
        .filter(|c| nodes[**c].label == base || nodes[**c].label.starts_with(&format!("{}#", base)))
        .count();
    if duplicates == 0 {
        base
    } else {
        format!("{}#{}", base, duplicates + 1)
    }
}

fn path_labels(nodes: &[VariationNode], node: NodeId) -> Vec<String> {
    let mut labels = Vec::new();
    let mut current = node;
    while let Some(parent) = nodes[current].parent {
        labels.push(nodes[current].label.clone());
        current = parent;
    }
    labels.reverse();
    labels
}

fn set_header(headers: &mut Vec<(String, String)>, key: &str, value: &str) {
    match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
        Some(entry) => entry.1 = value.to_string(),
        None => headers.push((key.to_string(), value.to_string())),
    }
}

/// Rewrite side, halfmove and fullmove fields of a FEN
fn with_move_counters(fen: &str, white: bool, fullmove: u32) -> String {
    let fields: Vec<&str> = fen.split_whitespace().collect();
    if fields.len() < 4 {
        return fen.to_string();
    }
    let halfmove = fields.get(4).copied().unwrap_or("0");
    format!(
        "{} {} {} {} {} {}",
        fields[0],
        if white { "w" } else { "b" },
        fields[2],
        fields[3],
        halfmove,
        fullmove
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::move_validator::ChessRulesValidator;
    use crate::pgn_loader::read_games;

    fn origin() -> GameOrigin<'static> {
        GameOrigin {
            source_id: "test.pgn",
            game_index: 0,
            hierarchy: None,
            embedded_from: None,
        }
    }

    fn build(pgn: &str, mode: BuildMode) -> Result<GameRecord> {
        let raw = read_games(pgn).unwrap().remove(0);
        let validator = ChessRulesValidator::new();
        GameTreeBuilder::new(&validator, mode).build(&raw, &origin())
    }

    #[test]
    fn test_builds_labels_and_move_numbers() {
        let record = build(
            "[Chapter \"Open Games\"]\n\n1. e4 e5 (1... c5 2. Nf3) 2. Nf3 {[%eval 0.3] Develops.} Nc6 *",
            BuildMode::Strict,
        )
        .unwrap();
        let tree = &record.tree;
        assert_eq!(tree.move_count(), 6);
        assert_eq!(record.hierarchy.chapter.as_deref(), Some("Open Games"));

        let main = tree.line(ROOT);
        let labels: Vec<&str> = main.iter().skip(1).map(|id| tree.node(*id).label.as_str()).collect();
        assert_eq!(labels, vec!["1.e4", "1...e5", "2.Nf3", "2...Nc6"]);

        let nf3 = main[3];
        assert_eq!(tree.node(nf3).eval, Some(Evaluation::Pawns(0.3)));
        assert_eq!(tree.node(nf3).comment.as_deref(), Some("Develops."));

        let branches = tree.line_branches(ROOT);
        assert_eq!(branches.len(), 1);
        assert_eq!(tree.variation_path(branches[0]), vec!["1...c5".to_string()]);
        assert_eq!(tree.moves_to(tree.line(branches[0])[1]), vec!["e4", "c5", "Nf3"]);
    }

    #[test]
    fn test_strict_mode_rejects_illegal_move() {
        let err = build("1. e4 e5 (1... e4 2. Nf3) 2. Nf3 *", BuildMode::Strict).unwrap_err();
        match err {
            ChunkerError::IllegalMove { path, san, .. } => {
                assert_eq!(san, "e4");
                assert_eq!(path, "1.e4/1...e4");
            }
            other => panic!("Expected IllegalMove, got {:?}", other),
        }
    }

    #[test]
    fn test_best_effort_truncates_branch() {
        let record = build("1. e4 e5 (1... e4 2. Nf3) 2. Nf3 *", BuildMode::BestEffort).unwrap();
        assert_eq!(record.tree.move_count(), 3);
        assert_eq!(record.warnings.len(), 1);
        assert_eq!(record.warnings[0].kind(), "illegal_move_truncated");
    }

    #[test]
    fn test_malformed_fen_header() {
        let err = build(
            "[SetUp \"1\"]\n[FEN \"not a fen\"]\n\n1. e4 *",
            BuildMode::BestEffort,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "malformed_record");
    }

    #[test]
    fn test_setup_moves_continue_numbering() {
        let mut raw = read_games("1. Nf3 *").unwrap().remove(0);
        raw.setup_moves = vec!["e4".to_string(), "e5".to_string()];
        let validator = ChessRulesValidator::new();
        let record = GameTreeBuilder::new(&validator, BuildMode::Strict)
            .build(&raw, &origin())
            .unwrap();
        assert!(record.start_fen.contains(" w KQkq "));
        assert!(record.start_fen.ends_with(" 2"));
        assert_eq!(record.header("SetUp"), Some("1"));
        assert_eq!(record.tree.node(record.tree.line(ROOT)[1]).label, "2.Nf3");
    }

    #[test]
    fn test_duplicate_sibling_labels_are_disambiguated() {
        let record = build("1. e4 (1. e4) (1. d4) e5 *", BuildMode::Strict).unwrap();
        let labels: Vec<&str> = record
            .tree
            .root()
            .children
            .iter()
            .map(|c| record.tree.node(*c).label.as_str())
            .collect();
        assert_eq!(labels, vec!["1.e4", "1.e4#2", "1.d4"]);
    }

    #[test]
    fn test_describe() {
        let record = build(
            "[White \"Carlsen\"]\n[Black \"Anand\"]\n[Event \"WCh\"]\n[Date \"2013.11.22\"]\n[Result \"1-0\"]\n[ECO \"C65\"]\n\n1. e4 1-0",
            BuildMode::Strict,
        )
        .unwrap();
        assert_eq!(record.describe(), "Carlsen - Anand, WCh, 2013.11.22, 1-0 [C65]");
    }
}
