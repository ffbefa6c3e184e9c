use crate::executor::ExecutionStatus;
use std::path::{Path, PathBuf};
use tracing::debug;

/// An `Observer` collects data about one execution of the target.
///
/// Executors call `pre_exec` right before the target runs and `post_exec`
/// right after it finishes, whatever the outcome (crash and timeout included).
pub trait Observer {
    /// Name used in log messages and error reports.
    fn name(&self) -> &'static str;

    /// Prepares for a run, typically by calling `reset`.
    fn pre_exec(&mut self) -> Result<(), anyhow::Error>;

    /// Collects data once the target has stopped.
    fn post_exec(&mut self, status: &ExecutionStatus) -> Result<(), anyhow::Error>;

    /// Drops everything collected for the previous run.
    fn reset(&mut self) -> Result<(), anyhow::Error>;
}

/// Owns the trace file the coverage runtime writes (`BC_COV_FILE`).
///
/// Before each run the stale file is removed so a target that dies before
/// writing anything cannot leave the previous run's evidence behind. After
/// the run the raw bytes are picked up for decoding.
#[derive(Debug, Clone)]
pub struct TraceFileObserver {
    path: PathBuf,
    bytes: Option<Vec<u8>>,
}

impl TraceFileObserver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            bytes: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw trace bytes of the last run; `None` if the target wrote no file.
    pub fn take_bytes(&mut self) -> Option<Vec<u8>> {
        self.bytes.take()
    }
}

impl Observer for TraceFileObserver {
    fn name(&self) -> &'static str {
        "TraceFileObserver"
    }

    fn pre_exec(&mut self) -> Result<(), anyhow::Error> {
        self.reset()?;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::anyhow!(
                "Failed to remove stale trace file {:?}: {}",
                self.path,
                e
            )),
        }
    }

    fn post_exec(&mut self, status: &ExecutionStatus) -> Result<(), anyhow::Error> {
        match std::fs::read(&self.path) {
            Ok(bytes) => {
                debug!(path = ?self.path, len = bytes.len(), ?status, "collected trace file");
                self.bytes = Some(bytes);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.bytes = None;
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!("Failed to read trace file {:?}: {}", self.path, e)),
        }
    }

    fn reset(&mut self) -> Result<(), anyhow::Error> {
        self.bytes = None;
        Ok(())
    }
}
