//! End-to-end chunking scenarios at the default 8000-token budget,
//! counting one token per word.

mod common;

use common::{chunk_words, strict_config, three_branch_game, words};
use pgn_chunker::Role;

const BUDGET: usize = 8000;

#[test]
fn single_line_game_is_one_chunk() {
    let pgn = format!(
        "[White \"Alpha\"]\n[Black \"Beta\"]\n\n1. e4 {{{}}} e5 2. Nf3 Nc6 *\n",
        words(3000)
    );
    let outcome = chunk_words(&pgn, strict_config(BUDGET));

    assert_eq!(outcome.chunks.len(), 1);
    let chunk = &outcome.chunks[0];
    assert!(chunk.token_count > 3000 && chunk.token_count <= BUDGET);
    assert!(!chunk.metadata.lossy);
    assert_eq!(chunk.metadata.role, Role::MainLine);
    assert!(chunk.metadata.parent_id.is_none());
    assert_eq!(chunk.metadata.segments[0].first_ply, 1);
    assert_eq!(chunk.metadata.segments[0].ply_count, 4);
    assert!(chunk.content.starts_with("Game: Alpha - Beta"));
}

#[test]
fn one_overflowing_branch_gives_two_linked_chunks() {
    let pgn = format!(
        "1. e4 {{{}}} e5 (1... c5 {{{}}} 2. Nf3) 2. Nf3 *\n",
        words(5000),
        words(3500)
    );
    let outcome = chunk_words(&pgn, strict_config(BUDGET));

    assert_eq!(outcome.chunks.len(), 2);
    let (main, branch) = (&outcome.chunks[0], &outcome.chunks[1]);
    assert!(main.content.contains("[see variation 1...c5]"));
    assert_eq!(branch.metadata.parent_id.as_deref(), Some(main.chunk_id.as_str()));
    assert_eq!(branch.metadata.role, Role::Variation);
    assert_eq!(branch.metadata.variation_path, vec!["1...c5".to_string()]);
    assert!(branch.content.contains("Context: 1. e4"));
    for chunk in &outcome.chunks {
        assert!(chunk.token_count <= BUDGET);
        assert!(!chunk.metadata.lossy);
    }
}

#[test]
fn oversized_branch_splits_and_every_chunk_points_at_the_main_line() {
    let outcome = chunk_words(&three_branch_game(), strict_config(BUDGET));

    assert_eq!(outcome.chunks.len(), 5);
    let main = &outcome.chunks[0];
    assert!(main.metadata.parent_id.is_none());
    for chunk in &outcome.chunks[1..] {
        assert_eq!(chunk.metadata.parent_id.as_deref(), Some(main.chunk_id.as_str()));
        assert_eq!(chunk.metadata.sibling_ids.len(), 3);
        assert!(chunk.token_count <= BUDGET);
        assert!(!chunk.metadata.lossy);
    }

    // Largest branch first, then its own sub-branch
    assert_eq!(outcome.chunks[1].metadata.variation_path, vec!["1...d5".to_string()]);
    assert!(outcome.chunks[1].content.contains("[see variation 2...Nf6]"));
    assert_eq!(
        outcome.chunks[2].metadata.variation_path,
        vec!["1...d5".to_string(), "2...Nf6".to_string()]
    );
    assert_eq!(outcome.chunks[2].metadata.depth, 2);
    assert_eq!(outcome.merged, 0);
}

#[test]
fn small_siblings_share_one_chunk() {
    let pgn = format!(
        "1. e4 {{{}}} e5 (1... c5 {{{}}} 2. Nf3) (1... e6 {{{}}} 2. d4) 2. Nf3 *\n",
        words(7500),
        words(900),
        words(1100)
    );
    let outcome = chunk_words(&pgn, strict_config(BUDGET));

    assert_eq!(outcome.chunks.len(), 2);
    assert_eq!(outcome.merged, 1);
    let merged = &outcome.chunks[1];
    assert_eq!(
        merged.metadata.variation_path,
        vec!["1...c5".to_string(), "1...e6".to_string()]
    );
    assert_eq!(merged.metadata.segments.len(), 2);
    assert_eq!(merged.metadata.segments[1].variation_path, vec!["1...e6".to_string()]);
    assert!(merged.token_count > 2000 && merged.token_count <= BUDGET);
    assert_eq!(merged.metadata.parent_id.as_deref(), Some(outcome.chunks[0].chunk_id.as_str()));
}

#[test]
fn rerun_produces_identical_chunks() {
    let pgn = three_branch_game();
    let first = chunk_words(&pgn, strict_config(BUDGET));
    let second = chunk_words(&pgn, strict_config(BUDGET));

    let lines = |outcome: &pgn_chunker::SourceChunks| -> Vec<String> {
        outcome
            .chunks
            .iter()
            .map(|c| c.to_json_line().unwrap())
            .collect()
    };
    assert_eq!(lines(&first), lines(&second));
}

#[test]
fn long_line_without_branches_is_compressed() {
    let pgn = common::OPERA_GAME.replace("5. Qxf3 dxe5", &format!("5. Qxf3 {{{}}} dxe5", words(200)));
    let mut config = strict_config(100);
    config.tail_summary_ply_threshold = 10;
    let outcome = chunk_words(&pgn, config.clone());

    assert_eq!(outcome.chunks.len(), 1);
    let chunk = &outcome.chunks[0];
    assert!(chunk.metadata.lossy);
    assert!(chunk.metadata.compression_method.is_some());
    assert!(!chunk.metadata.lossy_reasons.is_empty());
    assert!(chunk.token_count <= config.hard_ceiling());
    assert_eq!(outcome.compressed, 1);
}

#[test]
fn depth_limit_bounds_chunk_nesting() {
    let mut config = strict_config(BUDGET);
    config.max_recursion_depth = 1;
    let outcome = chunk_words(&three_branch_game(), config);

    assert_eq!(outcome.chunks.len(), 4);
    assert!(outcome.chunks.iter().all(|c| c.metadata.depth <= 1));
    let lossy: Vec<_> = outcome.chunks.iter().filter(|c| c.metadata.lossy).collect();
    assert_eq!(lossy.len(), 1);
    assert_eq!(lossy[0].metadata.variation_path, vec!["1...d5".to_string()]);
    assert!(lossy[0].content.contains("Nf6"));
    assert!(outcome.chunks.iter().all(|c| !c.content.contains("[see variation 2...Nf6]")));
}

#[test]
fn long_annotation_keeps_every_game_of_the_source() {
    let pgn = format!(
        "[Event \"Short\"]\n\n1. e4 e5 *\n\n[Event \"Essay\"]\n\n1. d4 {{{}}} d5 *\n",
        words(3500)
    );
    let outcome = chunk_words(&pgn, strict_config(BUDGET));

    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.games, 2);
    assert_eq!(outcome.chunks.len(), 2);
    let essay = &outcome.chunks[1];
    assert_eq!(essay.content.matches("idea").count(), 3500);
    assert!(!essay.metadata.lossy);
}
