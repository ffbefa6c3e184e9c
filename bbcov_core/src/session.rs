//! Sequential batch driver: run each input, decode its trace, merge it.
//!
//! A run that fails in any way is logged and skipped; it never aborts the
//! batch. Crashed and timed-out runs still contribute whatever partial trace
//! they managed to write.

use crate::corpus::{CorpusEntry, InputCorpus};
use crate::error::CoverageError;
use crate::executor::{ExecutionStatus, Executor};
use crate::model::{CoverageModel, FunctionKey, MergeStats};
use crate::observer::TraceFileObserver;
use crate::trace::{self, TraceMode, TraceRecord};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// What happened to one input.
#[derive(Debug)]
pub struct RunOutcome {
    pub origin: String,
    pub status: ExecutionStatus,
    /// `false` if no trace could be obtained or decoded.
    pub traced: bool,
    pub stats: MergeStats,
    pub merge_errors: Vec<CoverageError>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub runs: usize,
    pub merged: usize,
    pub untraced: usize,
    /// Runs that ended on a signal or a non-zero exit code. Both coverage
    /// runtimes exit with status 255 after dumping their trace, so against a
    /// real instrumented target every run is counted here.
    pub crashes: usize,
    pub timeouts: usize,
    pub merge_failures: usize,
    pub blocks_newly_hit: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: &RunOutcome) {
        self.runs += 1;
        match outcome.status {
            ExecutionStatus::Crash(_) => self.crashes += 1,
            ExecutionStatus::Timeout => self.timeouts += 1,
            _ => {}
        }
        if !outcome.traced {
            self.untraced += 1;
        } else if outcome.merge_errors.is_empty() {
            self.merged += 1;
        } else {
            self.merge_failures += 1;
        }
        self.blocks_newly_hit += outcome.stats.blocks_newly_hit;
    }
}

pub struct CoverageSession<E: Executor> {
    model: CoverageModel,
    mode: TraceMode,
    executor: E,
    observer: TraceFileObserver,
    trace_context: Option<FunctionKey>,
}

impl<E: Executor> CoverageSession<E> {
    /// `trace_file` must be the path the executor hands to the target as
    /// `BC_COV_FILE`.
    pub fn new(model: CoverageModel, mode: TraceMode, executor: E, trace_file: PathBuf) -> Self {
        Self {
            model,
            mode,
            executor,
            observer: TraceFileObserver::new(trace_file),
            trace_context: None,
        }
    }

    /// Sends trace-mode ids to `function`. Without it, trace-mode runs only
    /// merge into a model holding a single function.
    pub fn with_trace_context(mut self, function: FunctionKey) -> Self {
        self.trace_context = Some(function);
        self
    }

    pub fn model(&self) -> &CoverageModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut CoverageModel {
        &mut self.model
    }

    pub fn into_model(self) -> CoverageModel {
        self.model
    }

    pub fn mode(&self) -> TraceMode {
        self.mode
    }

    /// Runs the target on `input` and merges the resulting trace under `origin`.
    pub fn run_input(&mut self, origin: &str, input: &[u8]) -> RunOutcome {
        let status = self.executor.execute_sync(input, &mut [&mut self.observer]);

        let mut outcome = RunOutcome {
            origin: origin.to_string(),
            status,
            traced: false,
            stats: MergeStats::default(),
            merge_errors: Vec::new(),
        };

        if !outcome.status.target_ran() {
            warn!(origin, status = ?outcome.status, "run failed, skipping");
            return outcome;
        }
        let Some(bytes) = self.observer.take_bytes() else {
            warn!(origin, status = ?outcome.status, "target wrote no trace file, skipping");
            return outcome;
        };
        match trace::decode(self.mode, Cursor::new(bytes)) {
            Ok(record) => {
                outcome.traced = true;
                let context = self.trace_context.as_ref();
                let (stats, errors) = merge_record(&mut self.model, &record, context, origin);
                for e in &errors {
                    warn!(origin, "merge failed: {e}");
                }
                outcome.stats = stats;
                outcome.merge_errors = errors;
            }
            Err(e) => warn!(origin, "failed to decode trace: {e}"),
        }
        outcome
    }

    /// Decodes an already-written trace file and merges it like a run's trace.
    pub fn merge_trace_file(
        &mut self,
        path: &Path,
        origin: &str,
    ) -> Result<(MergeStats, Vec<CoverageError>), CoverageError> {
        let context = self.trace_context.as_ref();
        ingest_trace_file(&mut self.model, self.mode, context, path, origin)
    }

    fn run_entry(&mut self, entry: &CorpusEntry) -> RunOutcome {
        let origin = entry.origin();
        match std::fs::read(&entry.path) {
            Ok(data) => self.run_input(&origin, &data),
            Err(e) => {
                warn!(origin, "failed to read input: {e}");
                RunOutcome {
                    origin,
                    status: ExecutionStatus::Other(format!("Failed to read input: {e}")),
                    traced: false,
                    stats: MergeStats::default(),
                    merge_errors: Vec::new(),
                }
            }
        }
    }

    /// Replays every corpus entry in order.
    pub fn run_corpus(&mut self, corpus: &InputCorpus) -> BatchReport {
        let total = corpus.len();
        let progress_every = (total / 100).max(1);
        let start_time = Instant::now();
        let mut report = BatchReport::default();

        info!(inputs = total, mode = %self.mode, "starting coverage run");
        for (i, entry) in corpus.iter().enumerate() {
            let outcome = self.run_entry(entry);
            report.record(&outcome);

            if (i + 1) % progress_every == 0 || i + 1 == total {
                let covered = self.model.hit_blocks().len();
                info!(
                    "Run: {}/{}, Covered blocks: {}, Crashes: {}, Timeouts: {}",
                    i + 1,
                    total,
                    covered,
                    report.crashes,
                    report.timeouts
                );
            }
        }
        info!(elapsed = ?start_time.elapsed(), ?report, "coverage run finished");
        report
    }
}

/// Decodes an already-written trace file and merges it into `model`.
///
/// Trace-mode ids go to `trace_context` when given; see
/// [`CoverageSession::with_trace_context`].
pub fn ingest_trace_file(
    model: &mut CoverageModel,
    mode: TraceMode,
    trace_context: Option<&FunctionKey>,
    path: &Path,
    origin: &str,
) -> Result<(MergeStats, Vec<CoverageError>), CoverageError> {
    let record = trace::decode_file(mode, path)?;
    Ok(merge_record(model, &record, trace_context, origin))
}

fn merge_record(
    model: &mut CoverageModel,
    record: &TraceRecord,
    trace_context: Option<&FunctionKey>,
    origin: &str,
) -> (MergeStats, Vec<CoverageError>) {
    match (record, trace_context) {
        (TraceRecord::Trace(ids), Some(key)) => match model.merge_trace_into(key, ids, origin) {
            Ok(stats) => (stats, Vec::new()),
            Err(e) => (MergeStats::default(), vec![e]),
        },
        _ => model.merge_lenient(record, origin),
    }
}
