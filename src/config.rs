//! Sync configuration: CLI flags over environment over config file over
//! defaults.

use crate::adapter::DEFAULT_NAMESPACE;
use crate::summary::{ChannelLimits, ConfigurationError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_PROJECT: &str = "TBSYNC_PROJECT";
pub const ENV_API_TOKEN: &str = "TBSYNC_API_TOKEN";
pub const ENV_STORAGE: &str = "TBSYNC_STORAGE";

pub const DEFAULT_STORAGE: &str = ".tbsync";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("no project given; pass --project or set TBSYNC_PROJECT")]
    MissingProject,
    #[error("namespace must not be empty")]
    EmptyNamespace,
    #[error(transparent)]
    Invalid(#[from] ConfigurationError),
}

/// Optional JSON config file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub project: Option<String>,
    pub api_token: Option<String>,
    pub storage: Option<PathBuf>,
    pub namespace: Option<String>,
    pub limits: ChannelLimits,
    /// Seed for numeric eviction sampling; entropy when absent.
    pub seed: Option<u64>,
}

pub fn load_config_file(path: impl AsRef<Path>) -> Result<ConfigFile, ConfigError> {
    let path_ref = path.as_ref();
    let payload = fs::read_to_string(path_ref).map_err(|source| ConfigError::ReadError {
        path: path_ref.to_path_buf(),
        source,
    })?;
    let config = serde_json::from_str(&payload).map_err(|source| ConfigError::ParseError {
        path: path_ref.to_path_buf(),
        source,
    })?;
    Ok(config)
}

/// Values given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub project: Option<String>,
    pub api_token: Option<String>,
    pub storage: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

/// Resolved settings for one sync invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub project: String,
    pub api_token: Option<String>,
    pub storage: PathBuf,
    pub namespace: String,
    pub limits: ChannelLimits,
    pub seed: Option<u64>,
}

impl SyncConfig {
    /// Resolves against the process environment.
    pub fn from_env(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        Self::resolve(overrides, |key| std::env::var(key).ok())
    }

    /// Resolves with `env` standing in for the process environment.
    pub fn resolve<F>(overrides: &ConfigOverrides, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match &overrides.config {
            Some(path) => load_config_file(path)?,
            None => ConfigFile::default(),
        };
        let env = |key: &str| env(key).filter(|value| !value.trim().is_empty());

        let project = overrides
            .project
            .clone()
            .or_else(|| env(ENV_PROJECT))
            .or(file.project)
            .filter(|project| !project.trim().is_empty())
            .ok_or(ConfigError::MissingProject)?;
        let api_token = overrides
            .api_token
            .clone()
            .or_else(|| env(ENV_API_TOKEN))
            .or(file.api_token);
        let storage = overrides
            .storage
            .clone()
            .or_else(|| env(ENV_STORAGE).map(PathBuf::from))
            .or(file.storage)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE));
        let namespace = file
            .namespace
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        if namespace.trim_matches('/').is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }
        file.limits.validate()?;

        Ok(Self {
            project,
            api_token,
            storage,
            namespace,
            limits: file.limits,
            seed: file.seed,
        })
    }
}
