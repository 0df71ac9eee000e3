//! Turns a game's split units into final chunks.
//!
//! Undersized sibling units are merged first; ids, parent links, sibling
//! lists and transposition links are only assigned once the set of chunks is
//! final, so no link can point at a unit that was merged away.

use crate::chunk::{Chunk, ChunkMetadata, LossyReason, Role, Segment};
use crate::errors::ChunkWarning;
use crate::game_tree::{GameRecord, NodeId, ROOT};
use crate::ids::{serialize_path, IdRegistry};
use crate::move_validator::position_key;
use crate::render::{render_group, Coverage, RenderOptions};
use crate::splitter::SplitUnit;
use crate::token_budget::{Estimate, TokenBudgetPlanner};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Chunks of one game plus what happened while assembling them
#[derive(Debug, Clone, Default)]
pub struct GameChunks {
    pub chunks: Vec<Chunk>,
    pub warnings: Vec<ChunkWarning>,
    /// Units absorbed into another unit's chunk
    pub merged: usize,
    /// Chunks produced by the compression engine
    pub compressed: usize,
}

/// Units sharing one chunk
#[derive(Debug, Clone)]
struct Group {
    members: Vec<usize>,
    content: String,
    estimate: Estimate,
}

pub struct ChunkAssembler<'a> {
    planner: &'a TokenBudgetPlanner<'a>,
    ids: &'a IdRegistry,
}

impl<'a> ChunkAssembler<'a> {
    pub fn new(planner: &'a TokenBudgetPlanner<'a>, ids: &'a IdRegistry) -> Self {
        Self { planner, ids }
    }

    pub fn assemble(&self, record: &GameRecord, units: Vec<SplitUnit>) -> GameChunks {
        let mut groups: Vec<Group> = units
            .iter()
            .enumerate()
            .map(|(i, unit)| Group {
                members: vec![i],
                content: unit.content.clone(),
                estimate: unit.estimate.clone(),
            })
            .collect();

        self.merge_siblings(record, &units, &mut groups);
        let merged = units.len() - groups.len();

        let mut warnings: Vec<ChunkWarning> = units.iter().flat_map(|u| u.warnings.iter().cloned()).collect();

        // Ids once merging is final
        let ids: Vec<String> = groups
            .iter()
            .map(|group| {
                let paths: Vec<Vec<String>> = group
                    .members
                    .iter()
                    .map(|m| units[*m].variation_path.clone())
                    .collect();
                let issued = self
                    .ids
                    .issue(&record.source_id, record.game_index, &serialize_path(&paths));
                warnings.extend(issued.collision);
                issued.id
            })
            .collect();

        let transpositions = transposition_links(record, &units, &groups, &ids);
        let top_id = ids.first().cloned();
        let variation_ids: Vec<&String> = ids.iter().skip(1).collect();

        let mut compressed = 0;
        let chunks: Vec<Chunk> = groups
            .into_iter()
            .enumerate()
            .map(|(g, group)| {
                let members: Vec<&SplitUnit> = group.members.iter().map(|m| &units[*m]).collect();
                let first = members[0];
                let is_top = first.parent_unit.is_none();

                let mut lossy_reasons: BTreeSet<LossyReason> =
                    members.iter().flat_map(|u| u.lossy_reasons.iter().copied()).collect();
                if group.estimate.is_estimated() {
                    lossy_reasons.insert(LossyReason::Estimated);
                }
                let compression_method = first.compression_method.map(str::to_string);
                if compression_method.is_some() {
                    compressed += 1;
                }

                let variation_path = if members.len() == 1 {
                    first.variation_path.clone()
                } else {
                    members.iter().map(|u| u.variation_path.join(" > ")).collect()
                };

                let metadata = ChunkMetadata {
                    source_id: record.source_id.clone(),
                    game_index: record.game_index,
                    parent_id: if is_top { None } else { top_id.clone() },
                    role: if members.len() == 1 { first.role } else { Role::Variation },
                    variation_path,
                    segments: members.iter().map(|u| segment(record, u)).collect(),
                    sibling_ids: if is_top {
                        Vec::new()
                    } else {
                        variation_ids
                            .iter()
                            .filter(|id| ***id != ids[g])
                            .map(|id| (*id).clone())
                            .collect()
                    },
                    hierarchy: record.hierarchy.clone(),
                    headers: record.headers.clone(),
                    game_start_fen: record.start_fen.clone(),
                    depth: members.iter().map(|u| u.depth).min().unwrap_or(0),
                    lossy: !lossy_reasons.is_empty(),
                    compression_method,
                    lossy_reasons: lossy_reasons.into_iter().collect(),
                    token_count_estimated: group.estimate.is_estimated(),
                    transposition_of: transpositions[g].clone(),
                    embedded_from: record.embedded_from,
                };

                Chunk {
                    chunk_id: ids[g].clone(),
                    content: group.content,
                    token_count: group.estimate.tokens,
                    metadata,
                }
            })
            .collect();

        debug!(
            source = %record.source_id,
            game = record.game_index,
            chunks = chunks.len(),
            merged,
            compressed,
            "Assembled chunks"
        );

        GameChunks {
            chunks,
            warnings,
            merged,
            compressed,
        }
    }

    /// Merge undersized siblings in splitter order until no pair applies
    fn merge_siblings(&self, record: &GameRecord, units: &[SplitUnit], groups: &mut Vec<Group>) {
        let threshold = self.planner.min_merge_threshold();
        let mergeable = |group: &Group| {
            group.estimate.tokens < threshold
                && !group.estimate.is_estimated()
                && group.members.iter().all(|m| {
                    let unit = &units[*m];
                    unit.parent_unit.is_some() && !unit.is_lossy()
                })
        };
        let parent_of = |group: &Group| units[group.members[0]].parent_unit;

        loop {
            let mut applied = None;
            'scan: for i in 0..groups.len() {
                if !mergeable(&groups[i]) {
                    continue;
                }
                for j in (i + 1)..groups.len() {
                    if !mergeable(&groups[j]) || parent_of(&groups[j]) != parent_of(&groups[i]) {
                        continue;
                    }
                    let members: Vec<usize> = groups[i]
                        .members
                        .iter()
                        .chain(groups[j].members.iter())
                        .copied()
                        .collect();
                    let views: Vec<(NodeId, Coverage, &RenderOptions)> = members
                        .iter()
                        .map(|m| (units[*m].start, units[*m].coverage, &units[*m].options))
                        .collect();
                    let content = render_group(record, &views);
                    let estimate = self.planner.estimate(&content);
                    if estimate.is_estimated() || !self.planner.fits(&estimate) {
                        continue;
                    }
                    applied = Some((i, j, Group {
                        members,
                        content,
                        estimate,
                    }));
                    break 'scan;
                }
            }

            match applied {
                Some((i, j, group)) => {
                    debug!(
                        first = ?units[group.members[0]].variation_path,
                        tokens = group.estimate.tokens,
                        "Merged undersized siblings"
                    );
                    groups[i] = group;
                    groups.remove(j);
                }
                None => break,
            }
        }
    }
}

fn segment(record: &GameRecord, unit: &SplitUnit) -> Segment {
    let tree = &record.tree;
    let before = if unit.start == ROOT {
        ROOT
    } else {
        tree.node(unit.start).parent.unwrap_or(ROOT)
    };
    Segment {
        variation_path: unit.variation_path.clone(),
        start_fen: tree.node(before).fen.clone(),
        breadcrumb: tree.moves_to(before),
        first_ply: tree.node(before).ply + 1,
        ply_count: unit.nodes(tree).len(),
    }
}

/// For each group, ids of other groups whose printed moves reach a shared position
fn transposition_links(
    record: &GameRecord,
    units: &[SplitUnit],
    groups: &[Group],
    ids: &[String],
) -> Vec<Vec<String>> {
    let tree = &record.tree;
    let positions: Vec<HashSet<String>> = groups
        .iter()
        .map(|group| {
            group
                .members
                .iter()
                .flat_map(|m| {
                    let unit = &units[*m];
                    unit.nodes(tree)
                        .into_iter()
                        .filter(move |id| unit.options.visible.as_ref().map_or(true, |v| v.contains(id)))
                })
                .map(|id| position_key(&tree.node(id).fen))
                .collect()
        })
        .collect();

    let mut owners: HashMap<&str, BTreeSet<usize>> = HashMap::new();
    for (g, keys) in positions.iter().enumerate() {
        for key in keys {
            owners.entry(key.as_str()).or_default().insert(g);
        }
    }

    (0..groups.len())
        .map(|g| {
            let linked: BTreeSet<usize> = positions[g]
                .iter()
                .flat_map(|key| owners[key.as_str()].iter().copied())
                .filter(|other| *other != g)
                .collect();
            let mut linked_ids: Vec<String> = linked.into_iter().map(|o| ids[o].clone()).collect();
            linked_ids.sort();
            linked_ids
        })
        .collect()
}
