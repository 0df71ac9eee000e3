//! Parallel batch processing over many sources.
//!
//! Sources, and the games inside each source, run on a dedicated rayon pool.
//! A single writer thread owns the sink, the checkpoint and the run summary;
//! workers only talk to it through a bounded channel, so chunks stream out as
//! games finish.

use crate::assembler::GameChunks;
use crate::chunk::Chunk;
use crate::errors::{ChunkerError, Result};
use crate::move_validator::MoveValidator;
use crate::pipeline::{prepare_source, ChunkingContext, SourceInput};
use crate::report::RunSummary;
use chrono::{DateTime, Utc};
use crossbeam::channel::{bounded, Receiver, Sender};
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Destination for emitted chunks
pub trait ChunkSink: Send {
    fn write_chunk(&mut self, chunk: &Chunk) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One JSON object per line
pub struct JsonlSink<W: Write + Send> {
    writer: BufWriter<W>,
    written: usize,
}

impl<W: Write + Send> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            written: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| ChunkerError::Io(e.to_string()))
    }
}

impl JsonlSink<File> {
    /// Open `path` for appending so a resumed run extends earlier output
    pub fn append_to<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file))
    }
}

impl<W: Write + Send> ChunkSink for JsonlSink<W> {
    fn write_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        serde_json::to_writer(&mut self.writer, chunk)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Collects chunks in memory
#[derive(Debug, Default)]
pub struct VecSink {
    pub chunks: Vec<Chunk>,
}

impl ChunkSink for VecSink {
    fn write_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        self.chunks.push(chunk.clone());
        Ok(())
    }
}

/// Sources fully processed by earlier runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub completed_sources: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            completed_sources: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }
}

impl Checkpoint {
    /// Load a checkpoint; a missing file is an empty checkpoint
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write through a temporary file and rename, so a crash never leaves a torn checkpoint
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.updated_at = Utc::now();
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn is_completed(&self, source_id: &str) -> bool {
        self.completed_sources.contains(source_id)
    }

    pub fn mark_completed(&mut self, source_id: &str) {
        self.completed_sources.insert(source_id.to_string());
    }
}

/// Cooperative cancellation shared between the caller and the workers
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum Event {
    Game {
        source_id: String,
        game_index: usize,
        outcome: Result<GameChunks>,
    },
    SourceFailed {
        source_id: String,
        error: ChunkerError,
    },
    SourceDone {
        source_id: String,
    },
    SourceCancelled,
}

/// Run `f`, turning a panic into an error
fn isolate<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(ChunkerError::Internal(format!("worker panicked: {}", message)))
    })
}

pub struct BatchOrchestrator<'a, V: MoveValidator> {
    context: ChunkingContext<'a, V>,
    checkpoint_path: Option<PathBuf>,
    cancellation: CancellationToken,
    progress: Option<ProgressBar>,
}

impl<'a, V: MoveValidator> BatchOrchestrator<'a, V> {
    pub fn new(context: ChunkingContext<'a, V>) -> Self {
        Self {
            context,
            checkpoint_path: None,
            cancellation: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_checkpoint<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Advance `progress` once per finished source
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Chunk every input into `sink`; only sink, checkpoint and pool failures abort the run
    pub fn run<S: ChunkSink>(&self, inputs: Vec<SourceInput>, sink: S) -> Result<(RunSummary, S)> {
        let config = self.context.config;
        config.validate()?;
        let mut summary = RunSummary::new(inputs.len());

        let checkpoint = match &self.checkpoint_path {
            Some(path) => Some((Checkpoint::load(path)?, path.clone())),
            None => None,
        };
        let pending: Vec<SourceInput> = match &checkpoint {
            Some((done, _)) => inputs
                .into_iter()
                .filter(|input| {
                    let skip = done.is_completed(&input.source_id);
                    if skip {
                        debug!(source = %input.source_id, "Skipping completed source");
                    }
                    !skip
                })
                .collect(),
            None => inputs,
        };
        summary.sources_skipped = summary.sources_total - pending.len();

        info!(
            sources = pending.len(),
            skipped = summary.sources_skipped,
            workers = config.worker_pool_size,
            budget = config.target_token_budget,
            "Starting chunking run"
        );
        if let Some(progress) = &self.progress {
            progress.set_length(pending.len() as u64);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_pool_size)
            .build()
            .map_err(|e| ChunkerError::Configuration(format!("worker pool: {}", e)))?;

        let (tx, rx) = bounded::<Event>(config.worker_pool_size.max(1) * 4);
        let writer = Writer {
            checkpoint,
            interval: config.checkpoint_interval.max(1),
            progress: self.progress.clone(),
        };

        let (mut summary, sink) = std::thread::scope(|scope| {
            let handle = scope.spawn(move || writer.drain(rx, sink, summary));
            pool.install(|| {
                pending
                    .par_iter()
                    .for_each_with(tx, |tx, input| self.process_source(input, tx));
            });
            handle
                .join()
                .unwrap_or_else(|_| Err(ChunkerError::Internal("writer thread panicked".to_string())))
        })?;

        summary.finish();
        info!(
            processed = summary.sources_processed,
            cancelled = summary.sources_cancelled,
            games = summary.games_processed,
            failed = summary.games_failed,
            chunks = summary.chunks_produced,
            warnings = summary.total_warnings(),
            "Chunking run finished"
        );
        Ok((summary, sink))
    }

    fn process_source(&self, input: &SourceInput, tx: &mut Sender<Event>) {
        if self.cancellation.is_cancelled() {
            let _ = tx.send(Event::SourceCancelled);
            return;
        }

        let prepared = match isolate(|| prepare_source(input)) {
            Ok(prepared) => prepared,
            Err(error) => {
                error!(source = %input.source_id, "Source failed: {}", error);
                let _ = tx.send(Event::SourceFailed {
                    source_id: input.source_id.clone(),
                    error,
                });
                return;
            }
        };

        for (game_index, error) in prepared.unreadable {
            error!(source = %input.source_id, game = game_index, "Game failed: {}", error);
            let _ = tx.send(Event::Game {
                source_id: input.source_id.clone(),
                game_index,
                outcome: Err(error),
            });
        }

        prepared.games.par_iter().for_each_with(tx.clone(), |tx, game| {
            let outcome = isolate(|| self.context.chunk_game(input, game));
            if let Err(e) = &outcome {
                error!(source = %input.source_id, game = game.game_index, "Game failed: {}", e);
            }
            let _ = tx.send(Event::Game {
                source_id: input.source_id.clone(),
                game_index: game.game_index,
                outcome,
            });
        });

        let _ = tx.send(Event::SourceDone {
            source_id: input.source_id.clone(),
        });
    }
}

/// State owned by the writer thread
struct Writer {
    checkpoint: Option<(Checkpoint, PathBuf)>,
    interval: usize,
    progress: Option<ProgressBar>,
}

impl Writer {
    fn drain<S: ChunkSink>(mut self, rx: Receiver<Event>, mut sink: S, mut summary: RunSummary) -> Result<(RunSummary, S)> {
        let mut since_save = 0;

        for event in rx {
            match event {
                Event::Game {
                    outcome: Ok(game), ..
                } => {
                    for chunk in &game.chunks {
                        sink.write_chunk(chunk)?;
                    }
                    summary.record_game(&game);
                }
                Event::Game {
                    source_id,
                    game_index,
                    outcome: Err(error),
                } => summary.record_game_failure(&source_id, game_index, &error),
                Event::SourceFailed { source_id, error } => {
                    summary.record_source_failure(&source_id, &error);
                    self.advance();
                }
                Event::SourceDone { source_id } => {
                    summary.sources_processed += 1;
                    if let Some((checkpoint, path)) = &mut self.checkpoint {
                        checkpoint.mark_completed(&source_id);
                        since_save += 1;
                        if since_save >= self.interval {
                            sink.flush()?;
                            checkpoint.save(path.as_path())?;
                            since_save = 0;
                        }
                    }
                    self.advance();
                }
                Event::SourceCancelled => {
                    summary.sources_cancelled += 1;
                    self.advance();
                }
            }
        }

        sink.flush()?;
        if let Some((checkpoint, path)) = &mut self.checkpoint {
            checkpoint.save(path.as_path())?;
        }
        Ok((summary, sink))
    }

    fn advance(&self) {
        if let Some(progress) = &self.progress {
            progress.inc(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;
    use crate::ids::IdRegistry;
    use crate::move_validator::ChessRulesValidator;
    use crate::token_budget::WhitespaceCounter;

    fn inputs() -> Vec<SourceInput> {
        vec![
            SourceInput::new("a.pgn", "[Event \"A\"]\n\n1. e4 e5 2. Nf3 Nc6 *\n"),
            SourceInput::new("b.pgn", "[Event \"B\"]\n\n1. d4 d5 *\n\n[Event \"C\"]\n\n1. c4 e5 *\n"),
        ]
    }

    #[test]
    fn test_run_streams_all_games() {
        let config = ChunkingConfig::default().with_budget(500).with_workers(2);
        let ids = IdRegistry::default();
        let validator = ChessRulesValidator::new();
        let context = ChunkingContext::new(&config, &WhitespaceCounter, &validator, &ids);

        let (summary, sink) = BatchOrchestrator::new(context)
            .run(inputs(), VecSink::default())
            .unwrap();
        assert_eq!(summary.sources_processed, 2);
        assert_eq!(summary.games_processed, 3);
        assert_eq!(summary.chunks_produced, 3);
        assert_eq!(sink.chunks.len(), 3);
    }

    #[test]
    fn test_cancelled_run_dispatches_nothing() {
        let config = ChunkingConfig::default().with_budget(500).with_workers(1);
        let ids = IdRegistry::default();
        let validator = ChessRulesValidator::new();
        let context = ChunkingContext::new(&config, &WhitespaceCounter, &validator, &ids);

        let orchestrator = BatchOrchestrator::new(context);
        orchestrator.cancellation().cancel();
        let (summary, sink) = orchestrator.run(inputs(), VecSink::default()).unwrap();
        assert_eq!(summary.sources_cancelled, 2);
        assert!(sink.chunks.is_empty());
    }

    #[test]
    fn test_panics_are_isolated() {
        let result: Result<()> = isolate(|| panic!("boom"));
        match result {
            Err(ChunkerError::Internal(message)) => assert!(message.contains("boom")),
            other => panic!("Expected Internal, got {:?}", other),
        }
    }

    #[test]
    fn test_jsonl_sink_writes_lines() {
        let config = ChunkingConfig::default().with_budget(500).with_workers(1);
        let ids = IdRegistry::default();
        let validator = ChessRulesValidator::new();
        let context = ChunkingContext::new(&config, &WhitespaceCounter, &validator, &ids);

        let (_, sink) = BatchOrchestrator::new(context)
            .run(inputs(), JsonlSink::new(Vec::new()))
            .unwrap();
        assert_eq!(sink.written(), 3);
        let bytes = sink.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        for line in text.lines() {
            let chunk: Chunk = serde_json::from_str(line).unwrap();
            assert!(chunk.metadata.parent_id.is_none());
        }
    }
}
