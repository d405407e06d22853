//! Shipwright configuration.
//!
//! Read from `~/.shipwright/config.toml`, or the file named by
//! `SHIPWRIGHT_CONFIG`. Every section is optional and every missing field
//! falls back to the runtime default.
//!
//! ```toml
//! [context]
//! max_chars = 400000
//! prewarm_paths = ["src/App.tsx"]
//!
//! [execution]
//! stream_sample_ms = 100
//! deploy_command = ["npm", "run", "deploy"]
//!
//! [sync]
//! backend_url = "https://sync.example.com/${SHIPWRIGHT_TEAM}"
//!
//! [files]
//! ignored_prefixes = ["node_modules", ".git", "dist"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use serde::Deserialize;
use shipwright_context::ContextLimits;
use shipwright_engine::{DEFAULT_IGNORED_PREFIXES, TurnOptions, WorkbenchOptions};
use shipwright_sync::{BackoffConfig, MAX_JITTER_FACTOR, SyncConfig};
use thiserror::Error;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "SHIPWRIGHT_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShipwrightConfig {
    pub context: Option<ContextConfig>,
    pub execution: Option<ExecutionConfig>,
    pub sync: Option<SyncSection>,
    pub files: Option<FilesConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextConfig {
    pub max_chars: Option<usize>,
    pub max_relevant_files: Option<usize>,
    pub max_relevant_files_chars: Option<usize>,
    pub collapse: Option<bool>,
    pub max_collapsed_history_chars: Option<usize>,
    pub min_collapsed_history_chars: Option<usize>,
    /// Files that rank as relevant before anything writes them.
    #[serde(default)]
    pub prewarm_paths: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    pub stream_sample_ms: Option<u64>,
    pub max_consecutive_tool_failures: Option<u32>,
    pub install_on_package_json: Option<bool>,
    pub deploy_command: Option<Vec<String>>,
    pub max_tool_output_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncSection {
    /// Base URL of the persistence service. `${VAR}` references are expanded.
    pub backend_url: Option<String>,
    pub min_sync_interval_ms: Option<u64>,
    pub warning_failure_threshold: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    /// Clamped to `[0, MAX_JITTER_FACTOR]`.
    pub jitter_factor: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesConfig {
    pub ignored_prefixes: Option<Vec<String>>,
}

impl ShipwrightConfig {
    /// Load the config file. `Ok(None)` when there is no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!(path = %path.display(), "Failed to read config: {source}");
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::parse(&content).map_err(|source| {
            tracing::warn!(path = %path.display(), "Failed to parse config: {source}");
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    #[must_use]
    pub fn context_limits(&self) -> ContextLimits {
        let defaults = ContextLimits::default();
        let Some(c) = &self.context else {
            return defaults;
        };
        ContextLimits {
            max_chars: c.max_chars.unwrap_or(defaults.max_chars),
            max_relevant_files: c.max_relevant_files.unwrap_or(defaults.max_relevant_files),
            max_relevant_files_chars: c
                .max_relevant_files_chars
                .unwrap_or(defaults.max_relevant_files_chars),
            collapse: c.collapse.unwrap_or(defaults.collapse),
            max_collapsed_history_chars: c
                .max_collapsed_history_chars
                .unwrap_or(defaults.max_collapsed_history_chars),
            min_collapsed_history_chars: c
                .min_collapsed_history_chars
                .unwrap_or(defaults.min_collapsed_history_chars),
        }
    }

    #[must_use]
    pub fn prewarm_paths(&self) -> &[String] {
        self.context
            .as_ref()
            .map_or(&[], |c| c.prewarm_paths.as_slice())
    }

    #[must_use]
    pub fn workbench_options(&self) -> WorkbenchOptions {
        let defaults = WorkbenchOptions::default();
        let Some(e) = &self.execution else {
            return defaults;
        };
        WorkbenchOptions {
            install_on_package_json: e
                .install_on_package_json
                .unwrap_or(defaults.install_on_package_json),
            max_consecutive_tool_failures: e
                .max_consecutive_tool_failures
                .unwrap_or(defaults.max_consecutive_tool_failures),
            max_tool_output_bytes: e
                .max_tool_output_bytes
                .unwrap_or(defaults.max_tool_output_bytes),
            deploy_command: e
                .deploy_command
                .clone()
                .filter(|cmd| !cmd.is_empty())
                .unwrap_or(defaults.deploy_command),
        }
    }

    /// Turn options; the system prompt is left for the caller.
    #[must_use]
    pub fn turn_options(&self) -> TurnOptions {
        let defaults = TurnOptions::default();
        let stream_sample = self
            .execution
            .as_ref()
            .and_then(|e| e.stream_sample_ms)
            .map_or(defaults.stream_sample, Duration::from_millis);
        TurnOptions {
            stream_sample,
            ..defaults
        }
    }

    #[must_use]
    pub fn sync_config(&self) -> SyncConfig {
        let defaults = SyncConfig::default();
        let Some(s) = &self.sync else {
            return defaults;
        };
        SyncConfig {
            min_sync_interval: s
                .min_sync_interval_ms
                .map_or(defaults.min_sync_interval, Duration::from_millis),
            warning_failure_threshold: s
                .warning_failure_threshold
                .unwrap_or(defaults.warning_failure_threshold),
            backoff: BackoffConfig {
                initial_delay: s
                    .initial_backoff_ms
                    .map_or(defaults.backoff.initial_delay, Duration::from_millis),
                max_delay: s
                    .max_backoff_ms
                    .map_or(defaults.backoff.max_delay, Duration::from_millis),
                jitter_factor: s
                    .jitter_factor
                    .map_or(defaults.backoff.jitter_factor, |j| {
                        j.clamp(0.0, MAX_JITTER_FACTOR)
                    }),
            },
        }
    }

    /// Backend URL with `${VAR}` references expanded.
    #[must_use]
    pub fn backend_url(&self) -> Option<String> {
        self.sync
            .as_ref()
            .and_then(|s| s.backend_url.as_deref())
            .map(expand_env_vars)
            .filter(|url| !url.trim().is_empty())
    }

    #[must_use]
    pub fn ignored_prefixes(&self) -> Vec<String> {
        self.files
            .as_ref()
            .and_then(|f| f.ignored_prefixes.clone())
            .unwrap_or_else(|| {
                DEFAULT_IGNORED_PREFIXES
                    .iter()
                    .map(ToString::to_string)
                    .collect()
            })
    }
}

/// Replace `${VAR}` with the variable's value. Unset variables become empty;
/// an unclosed `${` is kept as written.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".shipwright").join("config.toml"))
}
