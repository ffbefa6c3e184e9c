//! Interactive query shell over a live coverage session.
//!
//! ```text
//! bbcov> summary
//! bbcov> ratio parse src/parse.c
//! bbcov> show parse
//! bbcov> line parse 42
//! bbcov> where src/parse.c 42
//! bbcov> run inputs/seed1
//! ```

use crate::report;
use anyhow::{Result, bail};
use bbcov_core::{CoverageSession, Executor, SnapshotOptions, snapshot};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

const HELP: &str = "\
Commands:
  summary                          per-function block coverage
  functions [name]                 list known functions
  blocks <function> [file]         block ids, hit counts and lines
  ratio <function> [file]          covered block ratio
  show <function> [file]           ratio and highlighted source
  line <function> <line> [file]    inputs that covered a line
  where <file> <line>              functions with a block on a source line
  run <input>                      run the target on an input file and merge
  merge <trace-file>               merge an existing trace file
  reset                            clear all hit state
  dump <path>                      write a snapshot
  help
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Summary,
    Functions { filter: Option<String> },
    Blocks { function: String, file: Option<String> },
    Ratio { function: String, file: Option<String> },
    Show { function: String, file: Option<String> },
    Line { function: String, line: u32, file: Option<String> },
    Where { file: String, line: u32 },
    Run { input: PathBuf },
    Merge { trace: PathBuf },
    Reset,
    Dump { path: PathBuf },
    Help,
    Quit,
}

impl Command {
    /// Parses one shell line. Only the verb is case-insensitive; function
    /// names and paths are taken as written.
    pub fn parse(input: &str) -> Result<Self> {
        let tokens: Vec<&str> = input.split_whitespace().collect();
        let Some((verb, args)) = tokens.split_first() else {
            bail!("Empty command. Try: help");
        };

        match verb.to_lowercase().as_str() {
            "summary" => Ok(Command::Summary),
            "functions" | "list" => Ok(Command::Functions {
                filter: args.first().map(|s| s.to_string()),
            }),
            "blocks" => {
                let (function, file) = Self::function_args(verb, args)?;
                Ok(Command::Blocks { function, file })
            }
            "ratio" => {
                let (function, file) = Self::function_args(verb, args)?;
                Ok(Command::Ratio { function, file })
            }
            "show" => {
                let (function, file) = Self::function_args(verb, args)?;
                Ok(Command::Show { function, file })
            }
            "line" => Self::parse_line(args),
            "where" => Self::parse_where(args),
            "run" => Ok(Command::Run {
                input: Self::path_arg(verb, args)?,
            }),
            "merge" => Ok(Command::Merge {
                trace: Self::path_arg(verb, args)?,
            }),
            "reset" => Ok(Command::Reset),
            "dump" => Ok(Command::Dump {
                path: Self::path_arg(verb, args)?,
            }),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            other => bail!("Unknown command '{}'. Try: help", other),
        }
    }

    fn function_args(verb: &str, args: &[&str]) -> Result<(String, Option<String>)> {
        match args {
            [function] => Ok((function.to_string(), None)),
            [function, file] => Ok((function.to_string(), Some(file.to_string()))),
            _ => bail!("Usage: {} <function> [file]", verb),
        }
    }

    fn path_arg(verb: &str, args: &[&str]) -> Result<PathBuf> {
        match args {
            [path] => Ok(PathBuf::from(path)),
            _ => bail!("Usage: {} <path>", verb),
        }
    }

    fn parse_line(args: &[&str]) -> Result<Self> {
        let (function, line, file) = match args {
            [function, line] => (function, line, None),
            [function, line, file] => (function, line, Some(file.to_string())),
            _ => bail!("Usage: line <function> <line> [file]"),
        };
        Ok(Command::Line {
            function: function.to_string(),
            line: Self::line_number(line)?,
            file,
        })
    }

    fn parse_where(args: &[&str]) -> Result<Self> {
        let [file, line] = args else {
            bail!("Usage: where <file> <line>");
        };
        Ok(Command::Where {
            file: file.to_string(),
            line: Self::line_number(line)?,
        })
    }

    fn line_number(text: &str) -> Result<u32> {
        match text.parse() {
            Ok(line) => Ok(line),
            Err(_) => bail!("Invalid line number: {text}"),
        }
    }
}

pub struct Shell<'a, E: Executor> {
    session: &'a mut CoverageSession<E>,
    source_dir: PathBuf,
    snapshot_options: SnapshotOptions,
}

impl<'a, E: Executor> Shell<'a, E> {
    pub fn new(
        session: &'a mut CoverageSession<E>,
        source_dir: PathBuf,
        snapshot_options: SnapshotOptions,
    ) -> Self {
        Self {
            session,
            source_dir,
            snapshot_options,
        }
    }

    /// Reads commands until `quit` or end of input. Command errors are
    /// printed and the loop continues.
    pub fn run(&mut self, input: impl BufRead, out: &mut impl Write) -> Result<()> {
        let mut lines = input.lines();
        loop {
            write!(out, "bbcov> ")?;
            out.flush()?;
            let Some(line) = lines.next() else {
                writeln!(out)?;
                return Ok(());
            };
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let outcome = Command::parse(&line).and_then(|cmd| self.execute(&cmd, out));
            match outcome {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(e) => writeln!(out, "error: {e:#}")?,
            }
        }
    }

    /// Runs one command. Returns `false` when the shell should exit.
    pub fn execute(&mut self, command: &Command, out: &mut impl Write) -> Result<bool> {
        match command {
            Command::Summary => report::write_summary(out, &self.session.model().summarize())?,
            Command::Functions { filter } => {
                for (key, blocks) in self.session.model().functions() {
                    if filter.as_deref().is_none_or(|f| key.name.contains(f)) {
                        writeln!(out, "{key} ({} blocks)", blocks.len())?;
                    }
                }
            }
            Command::Blocks { function, file } => {
                let key = self.session.model().resolve(function, file.as_deref())?;
                report::write_blocks(out, self.session.model(), &key)?;
            }
            Command::Ratio { function, file } => {
                let key = self.session.model().resolve(function, file.as_deref())?;
                report::write_ratio(out, self.session.model(), &key)?;
            }
            Command::Show { function, file } => {
                let key = self.session.model().resolve(function, file.as_deref())?;
                report::write_function(out, self.session.model(), &key, &self.source_dir)?;
            }
            Command::Line {
                function,
                line,
                file,
            } => {
                let key = self.session.model().resolve(function, file.as_deref())?;
                report::write_line_origins(out, self.session.model(), &key, *line)?;
            }
            Command::Where { file, line } => {
                report::write_functions_at(out, self.session.model(), file, *line)?;
            }
            Command::Run { input } => self.run_input(input, out)?,
            Command::Merge { trace } => self.merge_trace(trace, out)?,
            Command::Reset => {
                self.session.model_mut().reset();
                writeln!(out, "Coverage state cleared")?;
            }
            Command::Dump { path } => {
                snapshot::write_snapshot(self.session.model(), &self.snapshot_options, path)?;
                writeln!(out, "Snapshot written to {}", path.display())?;
            }
            Command::Help => writeln!(out, "{HELP}")?,
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn run_input(&mut self, input: &Path, out: &mut impl Write) -> Result<()> {
        let data = std::fs::read(input)
            .map_err(|e| anyhow::anyhow!("Failed to read input {:?}: {}", input, e))?;
        let origin = input.display().to_string();
        let outcome = self.session.run_input(&origin, &data);
        if !outcome.traced {
            bail!("Run produced no usable trace ({:?})", outcome.status);
        }
        writeln!(
            out,
            "Status: {:?}, new blocks: {}, merge errors: {}",
            outcome.status,
            outcome.stats.blocks_newly_hit,
            outcome.merge_errors.len()
        )?;
        Ok(())
    }

    fn merge_trace(&mut self, trace: &Path, out: &mut impl Write) -> Result<()> {
        let origin = trace.display().to_string();
        let (stats, errors) = self.session.merge_trace_file(trace, &origin)?;
        for e in &errors {
            warn!(trace = ?trace, "merge failed: {e}");
        }
        writeln!(
            out,
            "New blocks: {}, merge errors: {}",
            stats.blocks_newly_hit,
            errors.len()
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbcov_core::{InProcessExecutor, StaticMap, TraceMode};

    #[test]
    fn parse_commands() {
        assert_eq!(Command::parse("summary").unwrap(), Command::Summary);
        assert_eq!(
            Command::parse("  RATIO parse src/parse.c ").unwrap(),
            Command::Ratio {
                function: "parse".to_string(),
                file: Some("src/parse.c".to_string()),
            }
        );
        assert_eq!(
            Command::parse("line Parse 12").unwrap(),
            Command::Line {
                function: "Parse".to_string(),
                line: 12,
                file: None,
            }
        );
        assert_eq!(
            Command::parse("functions").unwrap(),
            Command::Functions { filter: None }
        );
        assert_eq!(Command::parse("exit").unwrap(), Command::Quit);
        assert_eq!(
            Command::parse("where src/parse.c 42").unwrap(),
            Command::Where {
                file: "src/parse.c".to_string(),
                line: 42,
            }
        );
    }

    #[test]
    fn parse_errors() {
        assert!(Command::parse("").is_err());
        assert!(Command::parse("frobnicate").is_err());
        assert!(Command::parse("ratio").is_err());
        assert!(Command::parse("line parse twelve").is_err());
        assert!(Command::parse("dump").is_err());
        assert!(Command::parse("where parse.c").is_err());
        assert!(Command::parse("where parse.c x").is_err());
    }

    fn session() -> CoverageSession<InProcessExecutor<fn(&[u8])>> {
        let model = StaticMap::parse(
            r#"{ "parse.c": [ { "Function": "parse", "BasicBlocks": [
                { "Id": 0, "Coverage": [ { "File": "parse.c", "Line": 1 } ] },
                { "Id": 1, "Coverage": [ { "File": "parse.c", "Line": 2 } ] } ] } ] }"#,
        )
        .unwrap()
        .to_model();
        let noop: fn(&[u8]) = |_| {};
        CoverageSession::new(
            model,
            TraceMode::Profile,
            InProcessExecutor::new(noop),
            PathBuf::from("/nonexistent/bbcov/target.bc_cov"),
        )
    }

    fn profile_bytes(counters: &[u64]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&7u32.to_ne_bytes());
        buf.extend_from_slice(b"parse.c");
        buf.extend_from_slice(&1u32.to_ne_bytes());
        buf.extend_from_slice(&5u32.to_ne_bytes());
        buf.extend_from_slice(b"parse");
        buf.extend_from_slice(&(counters.len() as u32).to_ne_bytes());
        for c in counters {
            buf.extend_from_slice(&c.to_ne_bytes());
        }
        buf
    }

    #[test]
    fn scripted_session() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("run.bc_cov");
        std::fs::write(&trace, profile_bytes(&[0, 1])).unwrap();
        let snapshot_path = dir.path().join("snap.json");

        let script = format!(
            "merge {}\nline parse 2\nbogus\ndump {}\nquit\nsummary\n",
            trace.display(),
            snapshot_path.display()
        );
        let mut session = session();
        let mut out = Vec::new();
        let source_dir = dir.path().to_path_buf();
        let mut shell = Shell::new(&mut session, source_dir, SnapshotOptions::default());
        shell.run(script.as_bytes(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("New blocks: 1, merge errors: 0"));
        assert!(text.contains(&format!("  {}\n", trace.display())));
        assert!(text.contains("error: Unknown command 'bogus'"));
        assert!(snapshot_path.exists());
        assert!(!text.contains("Total:"), "commands after quit must not run");
        assert_eq!(session.model().hit_blocks().len(), 1);
    }

    #[test]
    fn run_without_trace_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("seed");
        std::fs::write(&input, b"x").unwrap();

        let mut session = session();
        let source_dir = dir.path().to_path_buf();
        let mut shell = Shell::new(&mut session, source_dir, SnapshotOptions::default());
        let mut out = Vec::new();
        let err = shell
            .execute(&Command::Run { input }, &mut out)
            .unwrap_err();
        assert!(err.to_string().contains("no usable trace"));
    }

    #[test]
    fn where_names_functions_on_a_line() {
        let mut session = session();
        let mut shell = Shell::new(&mut session, PathBuf::new(), SnapshotOptions::default());
        let mut out = Vec::new();
        let script = "where parse.c 2\nwhere parse.c 7\n";
        shell.run(script.as_bytes(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Functions declaring parse.c:2:\n  parse.c | parse\n"));
        assert!(text.contains("No function declares parse.c:7"));
    }
}
