use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pgn_chunker::{
    BatchOrchestrator, BuildMode, CachedCounter, ChessRulesValidator, ChunkSink, ChunkingConfig,
    ChunkingContext, HeuristicCounter, IdRegistry, JsonlSink, RunSummary, SourceInput, TokenCounter,
    WhitespaceCounter, DEFAULT_COUNT_CACHE,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about = "Split annotated PGN collections into retrieval chunks", long_about = None)]
struct Args {
    /// PGN files or directories (searched recursively for .pgn files)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// JSONL output file (appended to); stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the target token budget
    #[arg(short, long)]
    budget: Option<usize>,

    /// Override the worker pool size
    #[arg(short, long)]
    workers: Option<usize>,

    /// Override the maximum recursion depth
    #[arg(long)]
    max_depth: Option<usize>,

    /// Cap the number of chunks per game
    #[arg(long)]
    max_chunks: Option<usize>,

    /// Reject games with illegal moves instead of truncating the branch
    #[arg(long)]
    strict: bool,

    /// Count tokens as whitespace-separated words instead of the character heuristic
    #[arg(long)]
    words: bool,

    /// Checkpoint file; completed sources are skipped on restart
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Write the run summary as JSON to this file
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(long)]
    quiet: bool,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    // Logs go to stderr; stdout may carry the chunk stream
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ChunkingConfig::from_toml_file(path)?,
        None => ChunkingConfig::default(),
    };
    if let Some(budget) = args.budget {
        config = config.with_budget(budget);
    }
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if let Some(depth) = args.max_depth {
        config.max_recursion_depth = depth;
    }
    if args.max_chunks.is_some() {
        config.max_chunks_per_game = args.max_chunks;
    }
    if args.strict {
        config = config.with_build_mode(BuildMode::Strict);
    }
    config.validate()?;

    let mut files = Vec::new();
    for input in &args.inputs {
        collect_pgn_files(input, &mut files)?;
    }
    files.sort();
    files.dedup();
    if files.is_empty() {
        return Err("no .pgn files found".into());
    }

    // Files are read by the workers; unreadable ones are reported in the summary
    let sources: Vec<SourceInput> = files.into_iter().map(SourceInput::from_path).collect();

    let counter: Box<dyn TokenCounter> = if args.words {
        Box::new(CachedCounter::new(WhitespaceCounter, DEFAULT_COUNT_CACHE))
    } else {
        Box::new(CachedCounter::new(HeuristicCounter, DEFAULT_COUNT_CACHE))
    };
    let validator = ChessRulesValidator::new();
    let ids = IdRegistry::new(config.detect_id_collisions);
    let context = ChunkingContext::new(&config, counter.as_ref(), &validator, &ids);

    let mut orchestrator = BatchOrchestrator::new(context);
    if let Some(path) = &args.checkpoint {
        orchestrator = orchestrator.with_checkpoint(path);
    }
    let progress = (!args.quiet).then(|| {
        let pb = ProgressBar::new(sources.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("Chunking [{elapsed_precise}] [{bar:40.green/blue}] {pos}/{len} sources {msg}")
        {
            pb.set_style(style.progress_chars("██░"));
        }
        pb
    });
    if let Some(pb) = &progress {
        orchestrator = orchestrator.with_progress(pb.clone());
    }

    info!(files = sources.len(), budget = config.target_token_budget, "Chunking PGN sources");
    let started = Instant::now();
    let summary = match &args.output {
        Some(path) => run(&orchestrator, sources, JsonlSink::append_to(path)?)?,
        None => run(&orchestrator, sources, JsonlSink::new(std::io::stdout()))?,
    };
    if let Some(pb) = &progress {
        pb.finish_with_message(format!("{} chunks", summary.chunks_produced));
    }

    if summary.sources_failed > 0 {
        warn!(failed = summary.sources_failed, "Some sources could not be read");
    }
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        games = summary.games_processed,
        failed = summary.games_failed,
        chunks = summary.chunks_produced,
        lossy = summary.chunks_lossy,
        "Done"
    );
    match &args.summary {
        Some(path) => summary.write_to(path)?,
        None => eprintln!("{}", summary.to_json_pretty()?),
    }
    Ok(())
}

fn run<S: ChunkSink>(
    orchestrator: &BatchOrchestrator<'_, ChessRulesValidator>,
    sources: Vec<SourceInput>,
    sink: S,
) -> pgn_chunker::Result<RunSummary> {
    let (summary, _) = orchestrator.run(sources, sink)?;
    Ok(summary)
}

fn collect_pgn_files(path: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            collect_pgn_files(&entry?.path(), out)?;
        }
    } else if path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pgn"))
    {
        out.push(path.to_path_buf());
    }
    Ok(())
}
