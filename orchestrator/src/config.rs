// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files for the orchestrator

use camino::Utf8Path;
use camino::Utf8PathBuf;
use dropshot::ConfigLogging;
use serde::Deserialize;
use serde::Serialize;
use serde_with::serde_as;
use serde_with::DurationSeconds;
use slog_error_chain::SlogInlineError;
use std::time::Duration;
use thiserror::Error;

/// Configuration for an operator process
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Config {
    /// Process-wide logging configuration.
    pub log: ConfigLogging,
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    /// Load a `Config` from the given TOML file
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        let file_contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.into(), err })?;
        let config_parsed: Config = toml::from_str(&file_contents)
            .map_err(|err| LoadError::Parse { path: path.into(), err })?;
        Ok(config_parsed)
    }

    /// Build the root logger described by `log`.
    pub fn root_logger(&self, name: &str) -> Result<slog::Logger, std::io::Error> {
        self.log.to_logger(name)
    }
}

/// Settings for every cluster orchestrator in this process
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrchestratorConfig {
    /// Image of the operator itself.
    pub operator_image: String,
    #[serde(default)]
    pub version_probe: VersionProbeConfig,
    /// How long to wait for one role's workloads to converge.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(
        rename = "role_ready_timeout_secs",
        default = "default_role_ready_timeout"
    )]
    pub role_ready_timeout: Duration,
    /// Where to keep the cluster identity record, if on local disk.
    #[serde(default)]
    pub identity_ledger: Option<Utf8PathBuf>,
    #[serde(default)]
    pub upgrade: UpgradeConfig,
}

fn default_role_ready_timeout() -> Duration {
    Duration::from_secs(600)
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct VersionProbeConfig {
    /// Container runtime used to run the probe.
    #[serde(default = "default_container_runtime")]
    pub container_runtime: Utf8PathBuf,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "timeout_secs", default = "default_probe_timeout")]
    pub timeout: Duration,
}

fn default_container_runtime() -> Utf8PathBuf {
    Utf8PathBuf::from("podman")
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

impl Default for VersionProbeConfig {
    fn default() -> Self {
        VersionProbeConfig {
            container_runtime: default_container_runtime(),
            timeout: default_probe_timeout(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct UpgradeConfig {
    /// When the running versions cannot be determined, still require a
    /// healthy cluster before rolling out an image whose version differs
    /// from the one last recorded for the cluster.
    #[serde(default)]
    pub require_health_on_unknown_versions: bool,
}

#[derive(Debug, Error, SlogInlineError)]
pub enum LoadError {
    #[error("error reading \"{path}\"")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\"")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
}
