use crate::observer::Observer;
use std::fs::File;
use std::io::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Environment variable naming the trace file the coverage runtime writes.
pub const TRACE_FILE_ENV: &str = "BC_COV_FILE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Ok,
    Timeout,
    Crash(String),
    ObserverError(String),
    Other(String),
}

impl ExecutionStatus {
    /// Whether the target ran at all, so a trace (possibly partial) may exist.
    pub fn target_ran(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Ok | ExecutionStatus::Timeout | ExecutionStatus::Crash(_)
        )
    }
}

pub trait Executor {
    fn execute_sync(&mut self, input: &[u8], obs: &mut [&mut dyn Observer]) -> ExecutionStatus;
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn execute_sync(
        &mut self,
        input: &[u8],
        observers: &mut [&mut dyn Observer],
    ) -> ExecutionStatus {
        (**self).execute_sync(input, observers)
    }
}

fn run_pre_exec(observers: &mut [&mut dyn Observer]) -> Result<(), ExecutionStatus> {
    for obs in observers.iter_mut() {
        if let Err(e) = obs.pre_exec() {
            let error_msg = format!("Observer '{}' pre_exec failed: {}", obs.name(), e);
            error!("{error_msg}");
            return Err(ExecutionStatus::ObserverError(error_msg));
        }
    }
    Ok(())
}

/// Runs `post_exec` on every observer. An observer failure only replaces an
/// `Ok` status; crashes and timeouts are reported as such.
fn run_post_exec(observers: &mut [&mut dyn Observer], status: ExecutionStatus) -> ExecutionStatus {
    let mut post_exec_error: Option<String> = None;
    for obs in observers.iter_mut() {
        if let Err(e) = obs.post_exec(&status) {
            let error_msg = format!("Observer '{}' post_exec failed: {}", obs.name(), e);
            error!("{error_msg}");
            if post_exec_error.is_none() {
                post_exec_error = Some(error_msg);
            }
        }
    }
    match (status, post_exec_error) {
        (ExecutionStatus::Ok, Some(msg)) => ExecutionStatus::ObserverError(msg),
        (status, _) => status,
    }
}

/// Runs a harness function in the current process, treating a panic as a crash.
pub struct InProcessExecutor<F>
where
    F: Fn(&[u8]),
{
    harness_fn: F,
}

impl<F> InProcessExecutor<F>
where
    F: Fn(&[u8]),
{
    pub fn new(harness_fn: F) -> Self {
        Self { harness_fn }
    }
}

impl<F> Executor for InProcessExecutor<F>
where
    F: Fn(&[u8]),
{
    fn execute_sync(
        &mut self,
        input: &[u8],
        observers: &mut [&mut dyn Observer],
    ) -> ExecutionStatus {
        if let Err(status) = run_pre_exec(observers) {
            return status;
        }

        let result = catch_unwind(AssertUnwindSafe(|| {
            (self.harness_fn)(input);
        }));

        let execution_status = match result {
            Ok(_) => ExecutionStatus::Ok,
            Err(panic_payload) => {
                let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic type".to_string()
                };
                ExecutionStatus::Crash(msg)
            }
        };

        run_post_exec(observers, execution_status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputDelivery {
    StdIn,
    /// Writes the input to a temp file; `{}` in the template is replaced by its path.
    File(String),
}

#[derive(Debug, Clone)]
pub struct CommandExecutorConfig {
    pub command: Vec<String>,
    pub input_delivery: InputDelivery,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
}

/// Runs the instrumented binary as a child process with a bounded timeout.
pub struct CommandExecutor {
    config: CommandExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: CommandExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandExecutorConfig {
        &self.config
    }

    fn run_and_wait_with_timeout(
        &self,
        mut child: Child,
        timeout: Duration,
    ) -> Result<std::process::ExitStatus, ExecutionStatus> {
        let start_time = Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if start_time.elapsed() > timeout {
                        warn!(?timeout, "target timed out, killing");
                        if let Err(e) = child.kill() {
                            error!("Failed to kill child process: {e}");
                            return Err(ExecutionStatus::Other(format!(
                                "Failed to kill timed-out process: {e}",
                            )));
                        }
                        let _ = child.wait();
                        return Err(ExecutionStatus::Timeout);
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    error!("Error waiting for child process: {e}");
                    return Err(ExecutionStatus::Other(format!("Error waiting for child: {e}")));
                }
            }
        }
    }
}

fn describe_exit(status: std::process::ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("Exited with code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("Terminated by signal {signal}");
        }
    }
    "Exited abnormally".to_string()
}

impl Executor for CommandExecutor {
    fn execute_sync(
        &mut self,
        input: &[u8],
        observers: &mut [&mut dyn Observer],
    ) -> ExecutionStatus {
        if let Err(status) = run_pre_exec(observers) {
            return status;
        }

        let Some((program, args)) = self.config.command.split_first() else {
            return run_post_exec(
                observers,
                ExecutionStatus::Other("Empty target command".to_string()),
            );
        };
        let mut cmd = Command::new(program);
        cmd.args(args);
        for (key, value) in &self.config.envs {
            cmd.env(key, value);
        }

        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }

        // Held until the child has exited so the file outlives the run.
        let mut _temp_file_handle: Option<tempfile::NamedTempFile> = None;

        match &self.config.input_delivery {
            InputDelivery::StdIn => {
                cmd.stdin(Stdio::piped());
            }
            InputDelivery::File(arg_template) => {
                let named_temp_file = match tempfile::NamedTempFile::new() {
                    Ok(f) => f,
                    Err(e) => {
                        return run_post_exec(
                            observers,
                            ExecutionStatus::Other(format!("Failed to create temp file: {e}")),
                        );
                    }
                };
                if let Err(e) = File::create(named_temp_file.path())
                    .and_then(|mut f| f.write_all(input))
                {
                    return run_post_exec(
                        observers,
                        ExecutionStatus::Other(format!(
                            "Failed to write to temp file {:?}: {}",
                            named_temp_file.path(),
                            e
                        )),
                    );
                }

                let Some(path_str) = named_temp_file.path().to_str().map(str::to_string) else {
                    return run_post_exec(
                        observers,
                        ExecutionStatus::Other("Temp file path is not valid UTF-8".to_string()),
                    );
                };

                // Templates are split on whitespace, e.g. "--input {}" or "{}".
                let final_arg = arg_template.replace("{}", &path_str);
                for part in final_arg.split_whitespace() {
                    cmd.arg(part);
                }
                cmd.stdin(Stdio::null());
                _temp_file_handle = Some(named_temp_file);
            }
        }

        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        let mut child_process = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let error_msg =
                    format!("Failed to spawn command '{:?}': {}", self.config.command, e);
                error!("{error_msg}");
                return run_post_exec(observers, ExecutionStatus::Other(error_msg));
            }
        };

        // A target that exits without draining stdin closes the pipe; that is
        // its own business, not a failed run.
        if let InputDelivery::StdIn = self.config.input_delivery
            && let Some(mut child_stdin) = child_process.stdin.take()
            && let Err(e) = child_stdin.write_all(input)
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            warn!("Error writing to child stdin: {e}. Killing child.");
            let _ = child_process.kill();
            let _ = child_process.wait();
            return run_post_exec(
                observers,
                ExecutionStatus::Other(format!("Failed to write to stdin: {e}")),
            );
        }

        let timeout = self.config.timeout;
        let final_status = match self.run_and_wait_with_timeout(child_process, timeout) {
            Ok(status) if status.success() => ExecutionStatus::Ok,
            Ok(status) => ExecutionStatus::Crash(describe_exit(status)),
            Err(exec_status_from_wait) => exec_status_from_wait,
        };

        run_post_exec(observers, final_status)
    }
}
