//! Last-resort size reduction for units that cannot be split any further.
//!
//! Steps run in a fixed order and the planner is consulted after each one:
//! annotation pruning, tail summarization, then truncation. Every step that
//! changes the text is recorded as a [`LossyReason`].

use crate::annotations::Significance;
use crate::chunk::LossyReason;
use crate::config::ChunkingConfig;
use crate::errors::ChunkWarning;
use crate::game_tree::{GameRecord, GameTree, NodeId, ROOT};
use crate::render::{covered_nodes, render_unit, Coverage, RenderOptions};
use crate::token_budget::{Estimate, TokenBudgetPlanner};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// Outcome of compressing one unit
#[derive(Debug, Clone)]
pub struct Compressed {
    pub options: RenderOptions,
    pub content: String,
    pub estimate: Estimate,
    /// Last step applied
    pub method: &'static str,
    pub reasons: Vec<LossyReason>,
    pub warnings: Vec<ChunkWarning>,
}

pub struct CompressionEngine<'a> {
    config: &'a ChunkingConfig,
    planner: &'a TokenBudgetPlanner<'a>,
}

impl<'a> CompressionEngine<'a> {
    pub fn new(config: &'a ChunkingConfig, planner: &'a TokenBudgetPlanner<'a>) -> Self {
        Self { config, planner }
    }

    pub fn compress(&self, record: &GameRecord, start: NodeId, coverage: Coverage, path: &str) -> Compressed {
        let tree = &record.tree;
        let nodes = covered_nodes(tree, start, coverage);
        let base = base_ply(tree, start);
        let mut options = RenderOptions::full(self.config.breadcrumb_max_plies);
        let mut reasons = Vec::new();

        // 1. Annotation pruning
        let kept = prune_evaluations(
            tree,
            &nodes,
            base,
            self.config.eval_change_threshold,
            self.config.eval_keep_every_n_plies,
        );
        let with_eval = nodes.iter().filter(|id| tree.node(**id).eval.is_some()).count();
        if kept.len() < with_eval {
            options.kept_evals = Some(kept);
            reasons.push(LossyReason::AnnotationPruning);
            let content = render_unit(record, start, coverage, &options);
            let estimate = self.planner.estimate(&content);
            debug!(path, tokens = estimate.tokens, "After annotation pruning");
            if self.planner.fits(&estimate) {
                return finish(options, content, estimate, "annotation_pruning", reasons, Vec::new());
            }
        }

        // 2. Tail summarization
        let threshold = self.config.tail_summary_ply_threshold;
        let elided: Vec<NodeId> = nodes
            .iter()
            .copied()
            .filter(|id| tree.node(*id).ply - base > threshold)
            .collect();
        if !elided.is_empty() {
            options.visible = Some(
                nodes
                    .iter()
                    .copied()
                    .filter(|id| tree.node(*id).ply - base <= threshold)
                    .collect(),
            );
            options.summary = Some(summarize(tree, start, &elided, "Tail summary"));
            reasons.push(LossyReason::TailSummary);
            let content = render_unit(record, start, coverage, &options);
            let estimate = self.planner.estimate(&content);
            debug!(path, tokens = estimate.tokens, elided = elided.len(), "After tail summary");
            if self.planner.fits(&estimate) {
                return finish(options, content, estimate, "tail_summary", reasons, Vec::new());
            }
        }

        // 3. Truncation
        reasons.retain(|r| *r != LossyReason::TailSummary);
        reasons.push(LossyReason::Truncated);
        let max_ply = nodes.iter().map(|id| tree.node(*id).ply - base).max().unwrap_or(0);
        let attempt = |limit: u32| {
            let mut attempt_options = RenderOptions::full(self.config.breadcrumb_max_plies);
            attempt_options.include_context = false;
            attempt_options.include_comments = false;
            attempt_options.kept_evals = Some(HashSet::new());
            attempt_options.visible = Some(
                nodes
                    .iter()
                    .copied()
                    .filter(|id| tree.node(*id).ply - base <= limit)
                    .collect(),
            );
            let cut: Vec<NodeId> = nodes
                .iter()
                .copied()
                .filter(|id| tree.node(*id).ply - base > limit)
                .collect();
            if !cut.is_empty() {
                attempt_options.summary = Some(summarize(tree, start, &cut, "Truncated"));
            }
            let content = render_unit(record, start, coverage, &attempt_options);
            let estimate = self.planner.estimate(&content);
            (attempt_options, content, estimate)
        };

        // Whole unit without comments and context first, then search the ply limit
        let mut best = Some(attempt(max_ply)).filter(|a| self.planner.fits(&a.2));
        if best.is_none() {
            let (mut lo, mut hi) = (0u32, max_ply.saturating_sub(1));
            while lo <= hi {
                let mid = lo + (hi - lo) / 2;
                let candidate = attempt(mid);
                if self.planner.fits(&candidate.2) {
                    best = Some(candidate);
                    lo = mid + 1;
                } else if mid == 0 {
                    break;
                } else {
                    hi = mid - 1;
                }
            }
        }
        if let Some((options, content, estimate)) = best {
            debug!(path, tokens = estimate.tokens, "Truncated to fit");
            return finish(options, content, estimate, "truncated", reasons, Vec::new());
        }

        let (options, content, estimate) = attempt(0);
        if self.planner.within_ceiling(&estimate) {
            warn!(
                path,
                tokens = estimate.tokens,
                budget = self.planner.budget(),
                "Unit still oversize after compression"
            );
            reasons.push(LossyReason::Oversize);
            let warning = ChunkWarning::OversizeAfterCompression {
                path: path.to_string(),
                token_count: estimate.tokens,
                budget: self.planner.budget(),
            };
            return finish(options, content, estimate, "truncated", reasons, vec![warning]);
        }

        // Even the bare header overflows: cut the text itself
        let (content, estimate) = self.hard_cut(&content);
        warn!(path, tokens = estimate.tokens, "Hard-cut unit text to the budget");
        finish(options, content, estimate, "truncated", reasons, Vec::new())
    }

    /// Longest prefix of `text` (plus a marker) that fits the budget
    fn hard_cut(&self, text: &str) -> (String, Estimate) {
        const MARKER: &str = " [truncated]";
        let boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        let render = |chars: usize| {
            let end = boundaries.get(chars).copied().unwrap_or(text.len());
            format!("{}{}", &text[..end], MARKER)
        };

        let (mut lo, mut hi) = (0usize, boundaries.len());
        let mut best = render(0);
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            let candidate = render(mid);
            if self.planner.fits(&self.planner.estimate(&candidate)) {
                best = candidate;
                lo = mid + 1;
            } else if mid == 0 {
                break;
            } else {
                hi = mid - 1;
            }
        }
        let estimate = self.planner.estimate(&best);
        (best, estimate)
    }
}

fn finish(
    options: RenderOptions,
    content: String,
    estimate: Estimate,
    method: &'static str,
    reasons: Vec<LossyReason>,
    warnings: Vec<ChunkWarning>,
) -> Compressed {
    Compressed {
        options,
        content,
        estimate,
        method,
        reasons,
        warnings,
    }
}

/// Ply of the position a unit starts from
fn base_ply(tree: &GameTree, start: NodeId) -> u32 {
    if start == ROOT {
        0
    } else {
        tree.node(start).ply - 1
    }
}

/// Evaluations that survive pruning.
///
/// Kept: evaluations at branch points, evaluations that moved by more than
/// `threshold` pawns since the last kept one on the same line, and one every
/// `keep_every` plies.
pub fn prune_evaluations(
    tree: &GameTree,
    nodes: &[NodeId],
    base: u32,
    threshold: f32,
    keep_every: u32,
) -> HashSet<NodeId> {
    let mut kept = HashSet::new();
    // Last kept evaluation and its ply, per node, inherited down each line
    let mut state: HashMap<NodeId, (Option<f32>, u32)> = HashMap::new();

    for id in nodes {
        let node = tree.node(*id);
        let inherited = node
            .parent
            .and_then(|p| state.get(&p).copied())
            .unwrap_or((None, base));

        let current = match node.eval {
            Some(eval) => {
                let value = eval.as_pawns();
                let keep = node.is_branch_point()
                    || inherited.0.map_or(true, |last| (value - last).abs() > threshold)
                    || node.ply - inherited.1 >= keep_every;
                if keep {
                    kept.insert(*id);
                    (Some(value), node.ply)
                } else {
                    inherited
                }
            }
            None => inherited,
        };
        state.insert(*id, current);
    }

    kept
}

/// Flagged one-line description of elided plies
pub fn summarize(tree: &GameTree, start: NodeId, elided: &[NodeId], title: &str) -> String {
    let line = tree.line(start);
    let last = line.last().copied().filter(|id| *id != ROOT);
    let mut parts = vec![format!("{} plies elided", elided.len())];

    if let Some(last) = last {
        parts.push(format!("last move {}", tree.node(last).label));
    }
    if let Some(eval) = line.iter().rev().find_map(|id| tree.node(*id).eval) {
        parts.push(format!("final eval {}", eval));
    }

    let significance: BTreeSet<Significance> = elided
        .iter()
        .flat_map(|id| tree.node(*id).significance.iter().copied())
        .collect();
    if !significance.is_empty() {
        let names: Vec<&str> = significance.iter().map(|s| s.name()).collect();
        parts.push(format!("themes: {}", names.join(", ")));
    } else if let Some(sentence) = elided
        .iter()
        .find_map(|id| tree.node(*id).comment.as_deref())
        .map(first_sentence)
    {
        parts.push(format!("theme: {}", sentence));
    }

    if let Some(last) = last {
        parts.push(format!("final position {}", tree.node(last).fen));
    }

    format!("[{}: {}]", title, parts.join("; "))
}

fn first_sentence(text: &str) -> String {
    let end = text
        .char_indices()
        .find(|(i, c)| matches!(c, '.' | '!' | '?') && text[*i + 1..].starts_with(' '))
        .map(|(i, _)| i + 1)
        .unwrap_or(text.len());
    text[..end].chars().take(120).collect()
}
