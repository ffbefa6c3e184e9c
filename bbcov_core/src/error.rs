use crate::model::FunctionKey;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, merging, or querying coverage.
///
/// Merge failures (`UnknownFunction`, `UnknownBlockId`, `BlockCountMismatch`,
/// `BlockIdMismatch`, `AmbiguousTraceContext`) never leave a partially applied
/// record behind: the model is exactly as it was before the call.
#[derive(Error, Debug)]
pub enum CoverageError {
    /// The static map is not valid JSON of the expected nested shape.
    #[error("Malformed static map: {0}")]
    MalformedStaticMap(String),

    /// A snapshot document could not be parsed.
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    /// A trace or query references a function the static map never declared.
    #[error("Function '{name}' (file: {file}) not found in coverage model")]
    UnknownFunction { name: String, file: String },

    /// A name lookup matched more than one `(name, file)` entry.
    #[error("Function name '{name}' is ambiguous, candidates: {candidates:?}")]
    AmbiguousFunction {
        name: String,
        candidates: Vec<FunctionKey>,
    },

    /// A trace-mode id lies outside the function's declared blocks.
    #[error("Block id {id} not declared for {function} ({block_count} blocks)")]
    UnknownBlockId {
        function: FunctionKey,
        id: u32,
        block_count: usize,
    },

    /// The dynamic trace and the static map disagree on a function's block count.
    #[error(
        "Block count mismatch for {function}: trace has {actual}, static map declares {expected}"
    )]
    BlockCountMismatch {
        function: FunctionKey,
        expected: usize,
        actual: usize,
    },

    /// The static map declared block ids that do not match their position.
    #[error(
        "Coverage index mismatch for {function} at index {position}: block id is {id}"
    )]
    BlockIdMismatch {
        function: FunctionKey,
        position: usize,
        id: u32,
    },

    /// Trace-mode ids carry no function name; the model must hold exactly one function.
    #[error(
        "Trace-mode merge needs a single-function model, found {function_count} functions"
    )]
    AmbiguousTraceContext { function_count: usize },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CoverageError {
    pub(crate) fn unknown_function(key: &FunctionKey) -> Self {
        CoverageError::UnknownFunction {
            name: key.name.clone(),
            file: key.file.clone(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoverageError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoverageError>;
