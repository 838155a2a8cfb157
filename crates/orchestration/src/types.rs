use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use bgtask_common::TRANSPORT_NAME;

pub const DEFAULT_WORKER_PROGRAM: &str = "bgtask-worker";
pub const DEFAULT_WORKER_COMMAND: &str = "consume-single-message";
/// Overrides the configured worker program.
pub const WORKER_BIN_ENV: &str = "BGTASK_WORKER_BIN";

/// Transport configuration loaded from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_transport_name")]
    pub name: String,
    #[serde(default)]
    pub worker: WorkerCommandConfig,
}

/// How to launch one worker. The encoded envelope and its tag are appended
/// after `args`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommandConfig {
    #[serde(default = "default_worker_program")]
    pub program: PathBuf,
    #[serde(default = "default_worker_args")]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            name: default_transport_name(),
            worker: WorkerCommandConfig::default(),
        }
    }
}

impl Default for WorkerCommandConfig {
    fn default() -> Self {
        Self {
            program: default_worker_program(),
            args: default_worker_args(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }
}

impl TransportConfig {
    pub fn for_program(program: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.worker.program = program.into();
        config
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.worker.env.insert(key.into(), value.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.worker.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Applies `BGTASK_WORKER_BIN` when it is set and non-empty.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(program) = std::env::var_os(WORKER_BIN_ENV).filter(|p| !p.is_empty()) {
            self.worker.program = PathBuf::from(program);
        }
        self
    }
}

pub fn default_transport_name() -> String {
    TRANSPORT_NAME.to_string()
}

pub fn default_worker_program() -> PathBuf {
    PathBuf::from(DEFAULT_WORKER_PROGRAM)
}

pub fn default_worker_args() -> Vec<String> {
    vec![DEFAULT_WORKER_COMMAND.to_string()]
}

pub fn parse_transport_config(text: &str) -> Result<TransportConfig> {
    toml::from_str(text).context("invalid transport configuration")
}

pub fn load_transport_config(path: &Path) -> Result<TransportConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read transport config {}", path.display()))?;
    let config = parse_transport_config(&text)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(config.apply_env_overrides())
}
