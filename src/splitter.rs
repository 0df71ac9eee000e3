//! Recursive, budget-driven decomposition of a game tree into split units.
//!
//! A (sub)tree that fits the budget becomes one [`Coverage::Subtree`] unit.
//! Otherwise its own line becomes a [`Coverage::Line`] unit pointing at the
//! line's first-level branches, and each branch is split in turn. Units that
//! cannot be split any further (recursion depth, chunk cap, a line that is
//! too long by itself) go through the compression engine.

use crate::chunk::{LossyReason, Role};
use crate::compression::CompressionEngine;
use crate::config::ChunkingConfig;
use crate::errors::ChunkWarning;
use crate::game_tree::{GameRecord, GameTree, NodeId, ROOT};
use crate::render::{covered_nodes, render_unit, Coverage, RenderOptions};
use crate::token_budget::{Estimate, TokenBudgetPlanner};
use std::cmp::Reverse;
use tracing::{debug, warn};

/// A piece of the tree selected for one chunk
#[derive(Debug, Clone)]
pub struct SplitUnit {
    pub start: NodeId,
    pub coverage: Coverage,
    pub role: Role,
    pub depth: usize,
    /// Index of the unit this one branches from
    pub parent_unit: Option<usize>,
    pub variation_path: Vec<String>,
    /// First-level branches referenced by a `Line` unit
    pub branches: Vec<NodeId>,
    pub options: RenderOptions,
    pub content: String,
    pub estimate: Estimate,
    pub compression_method: Option<&'static str>,
    pub lossy_reasons: Vec<LossyReason>,
    pub warnings: Vec<ChunkWarning>,
}

impl SplitUnit {
    pub fn is_lossy(&self) -> bool {
        !self.lossy_reasons.is_empty()
    }

    /// Move nodes this unit's payload is responsible for
    pub fn nodes(&self, tree: &GameTree) -> Vec<NodeId> {
        covered_nodes(tree, self.start, self.coverage)
    }
}

/// Path label used in logs and warnings
pub fn path_label(tree: &GameTree, start: NodeId) -> String {
    let path = tree.variation_path(start);
    if path.is_empty() {
        "main".to_string()
    } else {
        path.join("/")
    }
}

/// Order branches: significance, size, earliest divergence, then original order
pub fn prioritize_branches(tree: &GameTree, branches: &[NodeId]) -> Vec<NodeId> {
    let mut keyed: Vec<(Reverse<u32>, Reverse<usize>, u32, NodeId)> = branches
        .iter()
        .map(|b| {
            let subtree = tree.subtree(*b);
            let score: u32 = subtree.iter().map(|id| tree.node(*id).significance_score()).sum();
            (Reverse(score), Reverse(subtree.len()), tree.node(*b).ply, *b)
        })
        .collect();
    // Stable: equal keys keep their line order
    keyed.sort_by_key(|(score, size, ply, _)| (*score, *size, *ply));
    keyed.into_iter().map(|(_, _, _, b)| b).collect()
}

pub struct Splitter<'a> {
    config: &'a ChunkingConfig,
    planner: &'a TokenBudgetPlanner<'a>,
    compression: CompressionEngine<'a>,
}

impl<'a> Splitter<'a> {
    pub fn new(config: &'a ChunkingConfig, planner: &'a TokenBudgetPlanner<'a>) -> Self {
        Self {
            config,
            planner,
            compression: CompressionEngine::new(config, planner),
        }
    }

    /// Split a game into units; the first unit is the game's top-level unit
    pub fn split(&self, record: &GameRecord) -> Vec<SplitUnit> {
        let role = if record.embedded_from.is_some() {
            Role::EmbeddedGame
        } else {
            Role::MainLine
        };
        let mut units = Vec::new();
        self.split_node(record, ROOT, None, 0, role, 0, &mut units);

        debug!(
            source = %record.source_id,
            game = record.game_index,
            units = units.len(),
            "Split game"
        );
        units
    }

    /// `pending` counts branches queued at ancestor levels that still need a unit
    #[allow(clippy::too_many_arguments)]
    fn split_node(
        &self,
        record: &GameRecord,
        start: NodeId,
        parent_unit: Option<usize>,
        depth: usize,
        role: Role,
        pending: usize,
        units: &mut Vec<SplitUnit>,
    ) {
        let tree = &record.tree;
        let options = RenderOptions::full(self.config.breadcrumb_max_plies);
        let content = render_unit(record, start, Coverage::Subtree, &options);
        let estimate = self.planner.estimate(&content);

        if self.planner.fits(&estimate) {
            units.push(self.unit(record, start, Coverage::Subtree, role, depth, parent_unit, options, content, estimate));
            return;
        }

        let branches = prioritize_branches(tree, &tree.line_branches(start));
        let over_depth = depth >= self.config.max_recursion_depth;
        let over_cap = self
            .config
            .max_chunks_per_game
            .is_some_and(|cap| units.len() + 1 + branches.len() + pending > cap);

        if branches.is_empty() || over_depth || over_cap {
            if over_depth || over_cap {
                debug!(
                    path = %path_label(tree, start),
                    depth,
                    over_cap,
                    "Compressing subtree instead of splitting"
                );
            }
            units.push(self.compressed_unit(record, start, Coverage::Subtree, role, depth, parent_unit));
            return;
        }

        let line_options = RenderOptions::full(self.config.breadcrumb_max_plies);
        let line_content = render_unit(record, start, Coverage::Line, &line_options);
        let line_estimate = self.planner.estimate(&line_content);
        let mut line_unit = if self.planner.fits(&line_estimate) {
            self.unit(record, start, Coverage::Line, role, depth, parent_unit, line_options, line_content, line_estimate)
        } else {
            self.compressed_unit(record, start, Coverage::Line, role, depth, parent_unit)
        };
        line_unit.branches = branches.clone();
        let index = units.len();
        units.push(line_unit);

        let total = branches.len();
        for (i, branch) in branches.into_iter().enumerate() {
            let queued_after = total - i - 1;
            self.split_node(
                record,
                branch,
                Some(index),
                depth + 1,
                Role::Variation,
                pending + queued_after,
                units,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn unit(
        &self,
        record: &GameRecord,
        start: NodeId,
        coverage: Coverage,
        role: Role,
        depth: usize,
        parent_unit: Option<usize>,
        options: RenderOptions,
        content: String,
        estimate: Estimate,
    ) -> SplitUnit {
        let mut unit = SplitUnit {
            start,
            coverage,
            role,
            depth,
            parent_unit,
            variation_path: record.tree.variation_path(start),
            branches: Vec::new(),
            options,
            content,
            estimate,
            compression_method: None,
            lossy_reasons: Vec::new(),
            warnings: Vec::new(),
        };
        flag_estimate(&mut unit, &record.tree);
        unit
    }

    fn compressed_unit(
        &self,
        record: &GameRecord,
        start: NodeId,
        coverage: Coverage,
        role: Role,
        depth: usize,
        parent_unit: Option<usize>,
    ) -> SplitUnit {
        let path = path_label(&record.tree, start);
        let compressed = self.compression.compress(record, start, coverage, &path);
        debug!(
            path = %path,
            method = compressed.method,
            tokens = compressed.estimate.tokens,
            "Compressed unit"
        );
        let mut unit = SplitUnit {
            start,
            coverage,
            role,
            depth,
            parent_unit,
            variation_path: record.tree.variation_path(start),
            branches: Vec::new(),
            options: compressed.options,
            content: compressed.content,
            estimate: compressed.estimate,
            compression_method: Some(compressed.method),
            lossy_reasons: compressed.reasons,
            warnings: compressed.warnings,
        };
        flag_estimate(&mut unit, &record.tree);
        unit
    }
}

/// A heuristic token count makes the unit lossy
fn flag_estimate(unit: &mut SplitUnit, tree: &GameTree) {
    if let Some(reason) = &unit.estimate.fallback_reason {
        let path = path_label(tree, unit.start);
        warn!(path = %path, "Token count estimated: {}", reason);
        unit.lossy_reasons.insert(0, LossyReason::Estimated);
        unit.warnings.push(ChunkWarning::TokenCountUnavailable {
            path,
            reason: reason.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildMode;
    use crate::game_tree::{GameOrigin, GameTreeBuilder};
    use crate::move_validator::ChessRulesValidator;
    use crate::pgn_loader::read_games;
    use crate::token_budget::WhitespaceCounter;
    use std::collections::HashSet;

    fn record(pgn: &str) -> GameRecord {
        let raw = read_games(pgn).unwrap().remove(0);
        let validator = ChessRulesValidator::new();
        let origin = GameOrigin {
            source_id: "split.pgn",
            game_index: 0,
            hierarchy: None,
            embedded_from: None,
        };
        GameTreeBuilder::new(&validator, BuildMode::Strict)
            .build(&raw, &origin)
            .unwrap()
    }

    fn config(budget: usize) -> ChunkingConfig {
        ChunkingConfig::default().with_budget(budget)
    }

    const BRANCHY: &str = "1. e4 e5 (1... c5 2. Nf3 d6 3. d4 cxd4 4. Nxd4 Nf6 5. Nc3 a6) \
        (1... e6 2. d4 d5 3. Nc3 Bb4 4. e5 c5) 2. Nf3 Nc6 3. Bb5 a6 *";

    #[test]
    fn test_fitting_game_is_one_subtree_unit() {
        let record = record(BRANCHY);
        let config = config(1000);
        let planner = TokenBudgetPlanner::new(&WhitespaceCounter, &config);
        let units = Splitter::new(&config, &planner).split(&record);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].coverage, Coverage::Subtree);
        assert_eq!(units[0].role, Role::MainLine);
        assert!(!units[0].is_lossy());
    }

    #[test]
    fn test_overflow_splits_by_first_level_branches() {
        let record = record(BRANCHY);
        let config = config(30);
        let planner = TokenBudgetPlanner::new(&WhitespaceCounter, &config);
        let units = Splitter::new(&config, &planner).split(&record);

        assert_eq!(units.len(), 3);
        assert_eq!(units[0].coverage, Coverage::Line);
        assert_eq!(units[0].branches.len(), 2);
        assert!(units[0].content.contains("[see variation 1...c5]"));
        for unit in &units[1..] {
            assert_eq!(unit.role, Role::Variation);
            assert_eq!(unit.parent_unit, Some(0));
            assert_eq!(unit.depth, 1);
        }
        // Bigger branch first
        assert_eq!(units[1].variation_path, vec!["1...c5".to_string()]);
        assert_eq!(units[2].variation_path, vec!["1...e6".to_string()]);
        for unit in &units {
            assert!(unit.estimate.tokens <= 30);
        }
    }

    #[test]
    fn test_units_cover_every_node_once() {
        let record = record(BRANCHY);
        let config = config(30);
        let planner = TokenBudgetPlanner::new(&WhitespaceCounter, &config);
        let units = Splitter::new(&config, &planner).split(&record);

        let mut seen = HashSet::new();
        for unit in &units {
            for id in unit.nodes(&record.tree) {
                assert!(seen.insert(id), "node {} covered twice", id);
            }
        }
        assert_eq!(seen.len(), record.tree.move_count());
    }

    #[test]
    fn test_significance_outranks_size() {
        let record = record("1. e4 e5 (1... c5 2. Nf3 d6 3. d4) (1... e6 $3 2. d4) 2. Nf3 *");
        let branches = record.tree.line_branches(ROOT);
        let ordered = prioritize_branches(&record.tree, &branches);
        assert_eq!(record.tree.node(ordered[0]).label, "1...e6");
        assert_eq!(record.tree.node(ordered[1]).label, "1...c5");
    }

    #[test]
    fn test_chunk_cap_compresses_remaining_branches() {
        let record = record(BRANCHY);
        let mut config = config(30);
        config.max_chunks_per_game = Some(2);
        let planner = TokenBudgetPlanner::new(&WhitespaceCounter, &config);
        let units = Splitter::new(&config, &planner).split(&record);
        assert_eq!(units.len(), 1);
        assert!(units[0].is_lossy());
        assert_eq!(units[0].coverage, Coverage::Subtree);
    }

    #[test]
    fn test_depth_limit_compresses() {
        let record = record(BRANCHY);
        let mut config = config(30);
        config.max_recursion_depth = 0;
        let planner = TokenBudgetPlanner::new(&WhitespaceCounter, &config);
        let units = Splitter::new(&config, &planner).split(&record);
        assert_eq!(units.len(), 1);
        assert!(units[0].compression_method.is_some());
        assert!(units[0].estimate.tokens <= config.hard_ceiling());
    }
}
