use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pgn_chunker::config::BuildMode;
use pgn_chunker::game_tree::{GameOrigin, GameRecord, GameTreeBuilder};
use pgn_chunker::pgn_loader::read_games;
use pgn_chunker::splitter::Splitter;
use pgn_chunker::token_budget::TokenBudgetPlanner;
use pgn_chunker::{CachedCounter, ChessRulesValidator, ChunkingConfig, PgnChunker, WhitespaceCounter};

/// Annotated game with one commented branch per move pair
fn generate_game(comment_words: usize) -> String {
    let comment = vec!["plan"; comment_words].join(" ");
    let main = [
        ("e4", "e5", "c5"),
        ("Nf3", "Nc6", "d6"),
        ("Bb5", "a6", "Nf6"),
        ("Ba4", "Nf6", "b5"),
        ("O-O", "Be7", "b5"),
    ];
    let mut pgn = String::from("[White \"Bench\"]\n[Black \"Mark\"]\n\n");
    for (i, (white, black, alternative)) in main.iter().enumerate() {
        let n = i + 1;
        pgn.push_str(&format!(
            "{}. {} {{{}}} {} ({}... {} {{{}}}) ",
            n, white, comment, black, n, alternative, comment
        ));
    }
    pgn.push_str("*\n");
    pgn
}

fn build(pgn: &str) -> GameRecord {
    let raw = read_games(pgn).unwrap().remove(0);
    let validator = ChessRulesValidator::new();
    let origin = GameOrigin {
        source_id: "bench.pgn",
        game_index: 0,
        hierarchy: None,
        embedded_from: None,
    };
    GameTreeBuilder::new(&validator, BuildMode::Strict)
        .build(&raw, &origin)
        .unwrap()
}

fn benchmark_split(c: &mut Criterion) {
    let record = build(&generate_game(300));
    let config = ChunkingConfig::default().with_budget(1000);

    c.bench_function("split_without_cache", |b| {
        b.iter(|| {
            let planner = TokenBudgetPlanner::new(&WhitespaceCounter, &config);
            black_box(Splitter::new(&config, &planner).split(&record).len())
        })
    });

    let counter = CachedCounter::new(WhitespaceCounter, 1000);
    c.bench_function("split_with_cached_counter", |b| {
        b.iter(|| {
            let planner = TokenBudgetPlanner::new(&counter, &config);
            black_box(Splitter::new(&config, &planner).split(&record).len())
        })
    });
}

fn benchmark_end_to_end(c: &mut Criterion) {
    let pgn = generate_game(300);
    let chunker = PgnChunker::with_counter(ChunkingConfig::default().with_budget(1000), WhitespaceCounter).unwrap();

    c.bench_function("chunk_pgn_end_to_end", |b| {
        b.iter(|| black_box(chunker.chunk_pgn("bench.pgn", &pgn).unwrap().chunks.len()))
    });
}

criterion_group!(benches, benchmark_split, benchmark_end_to_end);
criterion_main!(benches);
