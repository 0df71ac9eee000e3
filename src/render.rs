//! Chunk text rendering.
//!
//! A chunk reads as a short header (hierarchy and game description), then per
//! covered unit the variation path, a compact move context leading to the
//! divergence point, and the payload as PGN movetext with comments,
//! evaluations and glyphs.

use crate::annotations::nag_glyph;
use crate::game_tree::{GameRecord, GameTree, NodeId, ROOT};
use crate::move_validator::{position_key, START_FEN};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How much of the tree under a unit's start node is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    /// The start node and everything below it
    Subtree,
    /// The start node's own line; alternatives become pointers
    Line,
}

/// Rendering switches; compression narrows these down step by step
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub breadcrumb_max_plies: usize,
    pub include_context: bool,
    pub include_comments: bool,
    /// Evaluations to print; `None` prints all of them
    pub kept_evals: Option<HashSet<NodeId>>,
    /// Nodes to print; `None` prints the whole coverage
    pub visible: Option<HashSet<NodeId>>,
    /// Printed after the payload when nodes were elided
    pub summary: Option<String>,
}

impl RenderOptions {
    pub fn full(breadcrumb_max_plies: usize) -> Self {
        Self {
            breadcrumb_max_plies,
            include_context: true,
            include_comments: true,
            kept_evals: None,
            visible: None,
            summary: None,
        }
    }

    fn shows(&self, id: NodeId) -> bool {
        self.visible.as_ref().map_or(true, |v| v.contains(&id))
    }

    fn shows_eval(&self, id: NodeId) -> bool {
        self.kept_evals.as_ref().map_or(true, |k| k.contains(&id))
    }
}

/// Move nodes covered by a unit starting at `start`
pub fn covered_nodes(tree: &GameTree, start: NodeId, coverage: Coverage) -> Vec<NodeId> {
    let nodes = match coverage {
        Coverage::Subtree => tree.subtree(start),
        Coverage::Line => tree.line(start),
    };
    nodes.into_iter().filter(|id| *id != ROOT).collect()
}

/// Hierarchy and game description lines shared by every unit of a game
pub fn game_header(record: &GameRecord) -> String {
    let mut lines = Vec::new();
    if let Some(hierarchy) = record.hierarchy.render() {
        lines.push(hierarchy);
    }
    lines.push(format!("Game: {}", record.describe()));
    if position_key(&record.start_fen) != position_key(START_FEN) {
        lines.push(format!("Start: {}", record.start_fen));
    }
    lines.join("\n")
}

/// Variation line, context line and payload of one unit
pub fn section(record: &GameRecord, start: NodeId, coverage: Coverage, options: &RenderOptions) -> String {
    let tree = &record.tree;
    let mut lines = Vec::new();
    if start != ROOT {
        lines.push(format!("Variation: {}", tree.variation_path(start).join(" > ")));
        if options.include_context {
            if let Some(context) = context_line(tree, start, options.breadcrumb_max_plies) {
                lines.push(format!("Context: {}", context));
            }
        }
    }
    lines.push(movetext(tree, start, coverage, options));
    lines.join("\n")
}

/// Full text of a single-unit chunk
pub fn render_unit(record: &GameRecord, start: NodeId, coverage: Coverage, options: &RenderOptions) -> String {
    format!("{}\n{}", game_header(record), section(record, start, coverage, options))
}

/// Full text of a chunk holding several merged units
pub fn render_group(record: &GameRecord, members: &[(NodeId, Coverage, &RenderOptions)]) -> String {
    let sections: Vec<String> = members
        .iter()
        .map(|(start, coverage, options)| section(record, *start, *coverage, options))
        .collect();
    format!("{}\n{}", game_header(record), sections.join("\n\n"))
}

/// Last `max_plies` moves leading to the position where `start` is played
pub fn context_line(tree: &GameTree, start: NodeId, max_plies: usize) -> Option<String> {
    let parent = tree.node(start).parent?;
    let path = tree.path_to(parent);
    if path.is_empty() || max_plies == 0 {
        return None;
    }
    let skip = path.len().saturating_sub(max_plies);
    let moves = compact_moves(tree, &path[skip..]);
    if skip > 0 {
        Some(format!("... {}", moves))
    } else {
        Some(moves)
    }
}

/// SAN with move numbers, no annotations
pub fn compact_moves(tree: &GameTree, nodes: &[NodeId]) -> String {
    let mut out = Vec::with_capacity(nodes.len());
    for (i, id) in nodes.iter().enumerate() {
        let node = tree.node(*id);
        match node.move_prefix(i == 0) {
            Some(prefix) => out.push(format!("{} {}", prefix, node.san)),
            None => out.push(node.san.clone()),
        }
    }
    out.join(" ")
}

/// PGN movetext of a unit
pub fn movetext(tree: &GameTree, start: NodeId, coverage: Coverage, options: &RenderOptions) -> String {
    let mut writer = MoveWriter {
        tree,
        coverage,
        options,
        out: String::new(),
        force_number: true,
    };

    if start == ROOT {
        if options.include_comments {
            if let Some(comment) = &tree.root().comment {
                writer.push_token(&format!("{{{}}}", comment));
            }
        }
        if let Some(first) = tree.root().children.first() {
            writer.write_line(*first, true);
        }
    } else {
        writer.write_line(start, false);
    }

    if let Some(summary) = &options.summary {
        writer.push_token(summary);
    }
    writer.out
}

struct MoveWriter<'a> {
    tree: &'a GameTree,
    coverage: Coverage,
    options: &'a RenderOptions,
    out: String,
    /// Next move gets a number even when Black plays it
    force_number: bool,
}

impl MoveWriter<'_> {
    fn push_token(&mut self, token: &str) {
        if !self.out.is_empty() && !self.out.ends_with(' ') && !self.out.ends_with('(') {
            self.out.push(' ');
        }
        self.out.push_str(token);
    }

    fn write_move(&mut self, id: NodeId) {
        let node = self.tree.node(id);

        if self.options.include_comments {
            if let Some(pre) = &node.pre_comment {
                self.push_token(&format!("{{{}}}", pre));
                self.force_number = true;
            }
        }

        let mut text = match node.move_prefix(self.force_number) {
            Some(prefix) => format!("{} {}", prefix, node.san),
            None => node.san.clone(),
        };
        for nag in &node.nags {
            let glyph = nag_glyph(*nag);
            if glyph.starts_with('$') {
                text.push(' ');
            }
            text.push_str(&glyph);
        }
        self.push_token(&text);
        self.force_number = false;

        let comment = node.comment.as_deref().filter(|_| self.options.include_comments);
        let eval = node.eval.filter(|_| self.options.shows_eval(id));
        let annotation = match (comment, eval) {
            (Some(c), Some(e)) => Some(format!("{{{} [{}]}}", c, e)),
            (Some(c), None) => Some(format!("{{{}}}", c)),
            (None, Some(e)) => Some(format!("{{[{}]}}", e)),
            (None, None) => None,
        };
        if let Some(annotation) = annotation {
            self.push_token(&annotation);
            self.force_number = true;
        }
    }

    /// Follow first children from `first`; alternatives come right after the move they replace
    fn write_line(&mut self, first: NodeId, alternatives_of_first: bool) {
        let mut current = first;
        let mut is_first = true;
        loop {
            if !self.options.shows(current) {
                break;
            }
            self.write_move(current);

            let node = self.tree.node(current);
            if let Some(parent) = node.parent {
                if !is_first || alternatives_of_first {
                    for alt in self.tree.node(parent).children.iter().skip(1) {
                        match self.coverage {
                            Coverage::Subtree => {
                                if !self.options.shows(*alt) {
                                    continue;
                                }
                                self.push_token("(");
                                self.force_number = true;
                                self.write_line(*alt, false);
                                self.out.push(')');
                            }
                            Coverage::Line => {
                                let label = &self.tree.node(*alt).label;
                                self.push_token(&format!("[see variation {}]", label));
                            }
                        }
                        self.force_number = true;
                    }
                }
            }

            is_first = false;
            match node.children.first() {
                Some(next) => current = *next,
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildMode;
    use crate::game_tree::{GameOrigin, GameTreeBuilder};
    use crate::move_validator::ChessRulesValidator;
    use crate::pgn_loader::read_games;

    fn record(pgn: &str) -> GameRecord {
        let raw = read_games(pgn).unwrap().remove(0);
        let validator = ChessRulesValidator::new();
        let origin = GameOrigin {
            source_id: "render.pgn",
            game_index: 0,
            hierarchy: None,
            embedded_from: None,
        };
        GameTreeBuilder::new(&validator, BuildMode::Strict)
            .build(&raw, &origin)
            .unwrap()
    }

    const PGN: &str = "[White \"Alpha\"]\n[Black \"Beta\"]\n[Chapter \"Sicilian\"]\n\n\
        {Intro} 1. e4 c5 $1 (1... e5 2. Nf3 {[%eval 0.3] Natural.}) 2. Nf3 d6 *";

    #[test]
    fn test_subtree_movetext_nests_alternatives() {
        let record = record(PGN);
        let text = movetext(&record.tree, ROOT, Coverage::Subtree, &RenderOptions::full(40));
        assert_eq!(
            text,
            "{Intro} 1. e4 c5! (1... e5 2. Nf3 {Natural. [+0.30]}) 2. Nf3 d6"
        );
    }

    #[test]
    fn test_line_movetext_points_at_branches() {
        let record = record(PGN);
        let text = movetext(&record.tree, ROOT, Coverage::Line, &RenderOptions::full(40));
        assert_eq!(text, "{Intro} 1. e4 c5! [see variation 1...e5] 2. Nf3 d6");
    }

    #[test]
    fn test_variation_section_has_context() {
        let record = record(PGN);
        let e5 = record.tree.line_branches(ROOT)[0];
        let text = render_unit(&record, e5, Coverage::Subtree, &RenderOptions::full(40));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Chapter: Sicilian");
        assert_eq!(lines[1], "Game: Alpha - Beta");
        assert_eq!(lines[2], "Variation: 1...e5");
        assert_eq!(lines[3], "Context: 1. e4");
        assert_eq!(lines[4], "1... e5 2. Nf3 {Natural. [+0.30]}");
    }

    #[test]
    fn test_options_hide_comments_evals_and_tail() {
        let record = record(PGN);
        let main = record.tree.line(ROOT);
        let mut options = RenderOptions::full(40);
        options.include_comments = false;
        options.kept_evals = Some(HashSet::new());
        options.visible = Some(main[1..3].iter().copied().collect());
        options.summary = Some("[2 plies elided]".to_string());
        let text = movetext(&record.tree, ROOT, Coverage::Subtree, &options);
        assert_eq!(text, "1. e4 c5! [2 plies elided]");
    }

    #[test]
    fn test_context_is_capped() {
        let record = record("1. e4 e5 2. Nf3 Nc6 3. Bb5 a6 (3... Nf6) *");
        let nf6 = record.tree.line_branches(ROOT)[0];
        assert_eq!(
            context_line(&record.tree, nf6, 2).as_deref(),
            Some("... 2... Nc6 3. Bb5")
        );
        assert_eq!(
            context_line(&record.tree, nf6, 40).as_deref(),
            Some("1. e4 e5 2. Nf3 Nc6 3. Bb5")
        );
    }
}
