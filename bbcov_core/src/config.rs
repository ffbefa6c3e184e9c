use crate::snapshot::DEFAULT_DENYLIST;
use crate::trace::TraceMode;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigInputDelivery {
    #[default]
    StdIn,
    File {
        template: String,
    },
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ExecutorSettings {
    pub command: Vec<String>,
    #[serde(default)]
    pub input_delivery: ConfigInputDelivery,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub working_dir: Option<PathBuf>,
}

fn default_timeout_ms() -> u64 {
    2000
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CorpusSettings {
    #[serde(default)]
    pub input_paths: Vec<PathBuf>,
    /// AFL output directories; their `queue/` and `crashes/` folders are read.
    #[serde(default)]
    pub afl_output_dirs: Vec<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SnapshotSettings {
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,
    pub output: Option<PathBuf>,
}

pub fn default_denylist() -> Vec<String> {
    DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect()
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            denylist: default_denylist(),
            output: None,
        }
    }
}

pub fn default_trace_file() -> PathBuf {
    PathBuf::from("/tmp/target.bc_cov")
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct BbcovConfig {
    #[serde(default)]
    pub mode: TraceMode,
    pub static_map: Option<PathBuf>,
    #[serde(default = "default_trace_file")]
    pub trace_file: PathBuf,
    #[serde(default)]
    pub executor: Option<ExecutorSettings>,
    #[serde(default)]
    pub corpus: CorpusSettings,
    #[serde(default)]
    pub snapshot: SnapshotSettings,
}

impl BbcovConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: BbcovConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}

impl Default for BbcovConfig {
    fn default() -> Self {
        Self {
            mode: TraceMode::default(),
            static_map: None,
            trace_file: default_trace_file(),
            executor: None,
            corpus: CorpusSettings::default(),
            snapshot: SnapshotSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_parses() {
        let config: BbcovConfig = toml::from_str(
            r#"
            mode = "trace"
            static-map = "cov_info.json"
            trace-file = "/tmp/run.bc_cov"

            [executor]
            command = ["./final_binary", "-q"]
            input-delivery = { file = { template = "--input={}" } }
            timeout-ms = 500

            [corpus]
            input-paths = ["inputs"]
            afl-output-dirs = ["afl_out"]

            [snapshot]
            denylist = []
            output = "snapshot.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.mode, TraceMode::Trace);
        assert_eq!(config.static_map, Some(PathBuf::from("cov_info.json")));
        let executor = config.executor.unwrap();
        assert_eq!(executor.timeout_ms, 500);
        assert_eq!(
            executor.input_delivery,
            ConfigInputDelivery::File {
                template: "--input={}".to_string(),
            }
        );
        assert_eq!(
            config.corpus.afl_output_dirs,
            vec![PathBuf::from("afl_out")]
        );
        assert!(config.snapshot.denylist.is_empty());
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: BbcovConfig = toml::from_str("").unwrap();
        assert_eq!(config, BbcovConfig::default());
        assert_eq!(config.mode, TraceMode::Profile);
        assert_eq!(config.snapshot.denylist, default_denylist());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<BbcovConfig>("iterations = 5").is_err());
    }

    #[test]
    fn load_from_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("bbcov.toml");
        let err = BbcovConfig::load_from_file(&missing).unwrap_err();
        assert!(err.to_string().contains("bbcov.toml"));
    }
}
