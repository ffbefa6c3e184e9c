pub mod config;
pub mod corpus;
pub mod error;
pub mod executor;
pub mod highlight;
pub mod model;
pub mod observer;
pub mod query;
pub mod session;
pub mod snapshot;
pub mod source;
pub mod static_map;
pub mod trace;

pub use config::BbcovConfig;
pub use corpus::{CorpusEntry, CorpusError, InputCorpus};
pub use error::{CoverageError, Result};
pub use executor::{
    CommandExecutor, CommandExecutorConfig, ExecutionStatus, Executor, InProcessExecutor,
    InputDelivery, TRACE_FILE_ENV,
};
pub use highlight::highlight;
pub use model::{BasicBlock, CoverageModel, FunctionKey, MergeStats, SourceLocation};
pub use observer::{Observer, TraceFileObserver};
pub use query::{CoverageSummary, FunctionSummary, LineClass, LineClassification};
pub use session::{BatchReport, CoverageSession, RunOutcome, ingest_trace_file};
pub use snapshot::{SnapshotBlock, SnapshotDocument, SnapshotOptions};
pub use source::{DeclaredSpanSource, FunctionSource, SourceLine};
pub use static_map::{StaticMap, load_static_map_file};
pub use trace::{ProfileRecord, TraceMode, TraceRecord};
