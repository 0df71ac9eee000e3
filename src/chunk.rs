use crate::game_tree::Hierarchy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structural role of a chunk within its game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    MainLine,
    Variation,
    EmbeddedGame,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::MainLine => "main_line",
            Role::Variation => "variation",
            Role::EmbeddedGame => "embedded_game",
        };
        f.write_str(name)
    }
}

/// Why a chunk does not carry its content verbatim or exactly counted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossyReason {
    /// Token count comes from the character heuristic
    Estimated,
    AnnotationPruning,
    TailSummary,
    Truncated,
    /// Above the budget but within the hard ceiling
    Oversize,
}

impl LossyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LossyReason::Estimated => "estimated",
            LossyReason::AnnotationPruning => "annotation_pruning",
            LossyReason::TailSummary => "tail_summary",
            LossyReason::Truncated => "truncated",
            LossyReason::Oversize => "oversize",
        }
    }
}

/// Where one unit of a chunk sits in its game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub variation_path: Vec<String>,
    /// Position before the segment's first move
    pub start_fen: String,
    /// SAN from the game's start position to `start_fen`
    pub breadcrumb: Vec<String>,
    pub first_ply: u32,
    pub ply_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_id: String,
    pub game_index: usize,
    /// `None` only for a game's top-level chunk
    pub parent_id: Option<String>,
    pub role: Role,
    /// Branch labels root → divergence; one ` > `-joined entry per member when merged
    pub variation_path: Vec<String>,
    pub segments: Vec<Segment>,
    pub sibling_ids: Vec<String>,
    pub hierarchy: Hierarchy,
    pub headers: Vec<(String, String)>,
    pub game_start_fen: String,
    pub depth: usize,
    pub lossy: bool,
    pub compression_method: Option<String>,
    pub lossy_reasons: Vec<LossyReason>,
    pub token_count_estimated: bool,
    /// Chunks of the same game whose payload reaches a shared position
    pub transposition_of: Vec<String>,
    pub embedded_from: Option<usize>,
}

/// One emitted unit, ready for embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub content: String,
    pub token_count: usize,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn is_top_level(&self) -> bool {
        self.metadata.parent_id.is_none()
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_json_shape() {
        let chunk = Chunk {
            chunk_id: "abc".to_string(),
            content: "Game: A - B\n1. e4".to_string(),
            token_count: 5,
            metadata: ChunkMetadata {
                source_id: "s".to_string(),
                game_index: 0,
                parent_id: None,
                role: Role::MainLine,
                variation_path: Vec::new(),
                segments: Vec::new(),
                sibling_ids: Vec::new(),
                hierarchy: Hierarchy::default(),
                headers: vec![("White".to_string(), "A".to_string())],
                game_start_fen: String::new(),
                depth: 0,
                lossy: true,
                compression_method: Some("tail_summary".to_string()),
                lossy_reasons: vec![LossyReason::AnnotationPruning, LossyReason::TailSummary],
                token_count_estimated: false,
                transposition_of: Vec::new(),
                embedded_from: None,
            },
        };
        let value: serde_json::Value = serde_json::from_str(&chunk.to_json_line().unwrap()).unwrap();
        assert_eq!(value["metadata"]["role"], "main_line");
        assert_eq!(value["metadata"]["lossy_reasons"][1], "tail_summary");
        assert!(value["metadata"]["parent_id"].is_null());
        assert!(chunk.is_top_level());

        let back: Chunk = serde_json::from_str(&chunk.to_json_line().unwrap()).unwrap();
        assert_eq!(back, chunk);
    }
}
