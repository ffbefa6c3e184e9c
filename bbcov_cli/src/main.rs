mod report;
mod shell;

use bbcov_core::config::{BbcovConfig, ConfigInputDelivery, ExecutorSettings};
use bbcov_core::executor::{
    CommandExecutor, CommandExecutorConfig, ExecutionStatus, Executor,
    InputDelivery as CoreInputDelivery, TRACE_FILE_ENV,
};
use bbcov_core::observer::Observer;
use bbcov_core::{
    CoverageModel, CoverageSession, FunctionKey, InputCorpus, SnapshotOptions, TraceMode,
    load_static_map_file, snapshot,
};

use clap::Parser;
use shell::Shell;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Static basic-block map emitted by the instrumentation pass.
    #[clap(long)]
    static_map: Option<PathBuf>,
    /// Trace format written by the instrumented binary: `profile` or `trace`.
    #[clap(long)]
    mode: Option<TraceMode>,
    /// Instrumented binary to run; replaces the configured command.
    #[clap(long)]
    target_command: Option<String>,
    /// Input files or directories to replay.
    #[clap(short, long)]
    input: Vec<PathBuf>,
    /// AFL output directories; `queue/` and `crashes/` are replayed.
    #[clap(long)]
    afl_dir: Vec<PathBuf>,
    /// Trace files written by earlier runs, merged without running anything.
    #[clap(long)]
    merge_trace: Vec<PathBuf>,
    /// Report coverage of this function.
    #[clap(short, long)]
    function: Option<String>,
    /// Source file of `--function`, when the name is ambiguous.
    #[clap(long)]
    file: Option<String>,
    /// With `--function`: list the inputs that covered this line.
    #[clap(long, requires = "function")]
    line: Option<u32>,
    /// Root that static map source paths are relative to.
    #[clap(long, default_value = ".")]
    source_dir: PathBuf,
    /// Start from a snapshot instead of the static map.
    #[clap(long)]
    resume: Option<PathBuf>,
    /// Write a snapshot when done.
    #[clap(long)]
    dump: Option<PathBuf>,
    /// Open the interactive query shell after the batch run.
    #[clap(long)]
    shell: bool,
    #[clap(short, long)]
    verbose: bool,
}

/// Stands in when no target command is configured, so the model can still be
/// queried and fed from existing trace files.
struct NoTargetExecutor;

impl Executor for NoTargetExecutor {
    fn execute_sync(
        &mut self,
        _input: &[u8],
        _observers: &mut [&mut dyn Observer],
    ) -> ExecutionStatus {
        ExecutionStatus::Other("No target command configured".to_string())
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(config_file: Option<PathBuf>) -> Result<BbcovConfig, anyhow::Error> {
    match config_file {
        Some(config_path) => {
            info!("Loading configuration from specified path: {config_path:?}");
            BbcovConfig::load_from_file(&config_path)
        }
        None => {
            let default_config_path = PathBuf::from("bbcov.toml");
            if default_config_path.exists() {
                info!("No config file specified via CLI, loading default: {default_config_path:?}");
                BbcovConfig::load_from_file(&default_config_path)
            } else {
                info!("No config file given and no bbcov.toml found, using built-in defaults");
                Ok(BbcovConfig::default())
            }
        }
    }
}

fn apply_overrides(config: &mut BbcovConfig, cli: &Cli) {
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(static_map) = &cli.static_map {
        config.static_map = Some(static_map.clone());
    }
    if let Some(target_cmd_str) = &cli.target_command {
        let command: Vec<String> = target_cmd_str
            .split_whitespace()
            .map(str::to_string)
            .collect();
        match config.executor.as_mut() {
            Some(settings) => settings.command = command,
            None => {
                config.executor = Some(ExecutorSettings {
                    command,
                    input_delivery: ConfigInputDelivery::StdIn,
                    timeout_ms: 2000,
                    working_dir: None,
                })
            }
        }
    }
    let corpus = &mut config.corpus;
    corpus.input_paths.extend_from_slice(&cli.input);
    corpus.afl_output_dirs.extend_from_slice(&cli.afl_dir);
    if cli.dump.is_some() {
        config.snapshot.output = cli.dump.clone();
    }
}

fn load_model(
    config: &BbcovConfig,
    resume: Option<&PathBuf>,
) -> Result<CoverageModel, anyhow::Error> {
    if let Some(snapshot_path) = resume {
        return Ok(snapshot::read_snapshot(snapshot_path)?);
    }
    let Some(static_map) = &config.static_map else {
        anyhow::bail!("No static map given (use --static-map, static-map in config, or --resume)");
    };
    Ok(load_static_map_file(static_map)?)
}

/// The function named by `--function`/`--file`, resolved against `model`.
fn target_function(cli: &Cli, model: &CoverageModel) -> Result<Option<FunctionKey>, anyhow::Error> {
    let Some(function) = &cli.function else {
        return Ok(None);
    };
    Ok(Some(model.resolve(function, cli.file.as_deref())?))
}

fn build_executor(config: &BbcovConfig) -> Option<Box<dyn Executor>> {
    let cmd_settings = config.executor.as_ref()?;
    let core_input_delivery = match &cmd_settings.input_delivery {
        ConfigInputDelivery::StdIn => CoreInputDelivery::StdIn,
        ConfigInputDelivery::File { template } => CoreInputDelivery::File(template.clone()),
    };
    let exec_config = CommandExecutorConfig {
        command: cmd_settings.command.clone(),
        input_delivery: core_input_delivery,
        timeout: Duration::from_millis(cmd_settings.timeout_ms),
        working_dir: cmd_settings.working_dir.clone(),
        envs: vec![(
            TRACE_FILE_ENV.to_string(),
            config.trace_file.to_string_lossy().into_owned(),
        )],
    };
    Some(Box::new(CommandExecutor::new(exec_config)))
}

fn build_corpus(config: &BbcovConfig) -> Result<InputCorpus, anyhow::Error> {
    let mut corpus = InputCorpus::new();
    corpus.load_paths(&config.corpus.input_paths)?;
    for afl_dir in &config.corpus.afl_output_dirs {
        corpus.load_afl_output(afl_dir)?;
    }
    if corpus.duplicates_skipped() > 0 {
        info!(
            duplicates = corpus.duplicates_skipped(),
            "skipped inputs with duplicate content"
        );
    }
    Ok(corpus)
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = load_config(cli.config_file.clone())?;
    apply_overrides(&mut config, &cli);
    tracing::debug!("Effective configuration: {config:#?}");

    let model = load_model(&config, cli.resume.as_ref())?;
    let target = target_function(&cli, &model)?;
    let corpus = build_corpus(&config)?;

    let executor: Box<dyn Executor> = match build_executor(&config) {
        Some(executor) => executor,
        None if !corpus.is_empty() => {
            anyhow::bail!("Inputs given but no target command configured (see --target-command)")
        }
        None => Box::new(NoTargetExecutor),
    };
    let mut session = CoverageSession::new(model, config.mode, executor, config.trace_file.clone());
    if let (TraceMode::Trace, Some(key)) = (config.mode, &target) {
        session = session.with_trace_context(key.clone());
    }

    let mut stdout = std::io::stdout().lock();

    if !corpus.is_empty() {
        let batch = session.run_corpus(&corpus);
        report::write_batch_report(&mut stdout, &batch)?;
    }

    for trace in &cli.merge_trace {
        let origin = trace.display().to_string();
        match session.merge_trace_file(trace, &origin) {
            Ok((_, errors)) => {
                for e in errors {
                    warn!(origin, "merge failed: {e}");
                }
            }
            Err(e) => warn!(origin, "skipping trace file: {e}"),
        }
    }

    if let Some(key) = &target {
        match cli.line {
            Some(line) => report::write_line_origins(&mut stdout, session.model(), key, line)?,
            None => report::write_function(&mut stdout, session.model(), key, &cli.source_dir)?,
        }
    } else if !cli.shell {
        report::write_summary(&mut stdout, &session.model().summarize())?;
    }

    let snapshot_options = SnapshotOptions {
        denylist: config.snapshot.denylist.clone(),
    };

    if cli.shell {
        let stdin = std::io::stdin().lock();
        let source_dir = cli.source_dir.clone();
        let mut shell = Shell::new(&mut session, source_dir, snapshot_options.clone());
        shell.run(stdin, &mut stdout)?;
    }

    if let Some(output) = &config.snapshot.output {
        snapshot::write_snapshot(session.model(), &snapshot_options, output)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config() {
        let cli = Cli::parse_from([
            "bbcov",
            "--mode",
            "trace",
            "--static-map",
            "map.json",
            "--target-command",
            "./final_binary -q",
            "--input",
            "seeds",
            "--dump",
            "out.json",
        ]);
        let mut config = BbcovConfig::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(config.mode, TraceMode::Trace);
        assert_eq!(config.static_map, Some(PathBuf::from("map.json")));
        assert_eq!(
            config.executor.as_ref().unwrap().command,
            vec!["./final_binary".to_string(), "-q".to_string()]
        );
        assert_eq!(config.corpus.input_paths, vec![PathBuf::from("seeds")]);
        assert_eq!(config.snapshot.output, Some(PathBuf::from("out.json")));
    }

    #[test]
    fn line_requires_function() {
        assert!(Cli::try_parse_from(["bbcov", "--line", "3"]).is_err());
        let cli = Cli::try_parse_from(["bbcov", "--function", "parse", "--line", "3"]).unwrap();
        assert_eq!(cli.line, Some(3));
    }

    #[test]
    fn target_function_resolves_with_file_hint() {
        let model = bbcov_core::StaticMap::parse(
            r#"{ "a.c": [ { "Function": "init", "BasicBlocks": [ { "Id": 0 } ] } ],
                 "b.c": [ { "Function": "init", "BasicBlocks": [ { "Id": 0 } ] } ] }"#,
        )
        .unwrap()
        .to_model();

        let cli = Cli::parse_from(["bbcov"]);
        assert_eq!(target_function(&cli, &model).unwrap(), None);

        let cli = Cli::parse_from(["bbcov", "--function", "init"]);
        assert!(target_function(&cli, &model).is_err());

        let cli = Cli::parse_from(["bbcov", "--function", "init", "--file", "b.c"]);
        let key = target_function(&cli, &model).unwrap();
        assert_eq!(key, Some(FunctionKey::new("init", "b.c")));
    }

    #[test]
    fn missing_static_map_is_an_error() {
        let err = load_model(&BbcovConfig::default(), None).unwrap_err();
        assert!(err.to_string().contains("No static map"));
    }

    #[test]
    fn executor_gets_trace_file_env() {
        let mut config = BbcovConfig::default();
        assert!(build_executor(&config).is_none());
        config.executor = Some(ExecutorSettings {
            command: vec!["true".to_string()],
            input_delivery: ConfigInputDelivery::StdIn,
            timeout_ms: 100,
            working_dir: None,
        });
        assert!(build_executor(&config).is_some());
    }
}
