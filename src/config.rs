//! Service configuration.
//!
//! The model fleet is described by a YAML file loaded from `CONFIG_PATH`
//! (default `config.yaml`). Everything except the model list has a default,
//! so a minimal file is just:
//!
//! ```yaml
//! models:
//!   - name: resnet
//!     path: /models/resnet.onnx
//!     handler: image_handler.py
//!     workers: 2
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HubError;

/// Name of a configured model, as clients address it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelName(String);

impl ModelName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of the `models` list.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Model name, unique across the configuration.
    pub name: ModelName,

    /// Model artifact path, handed to the worker binary verbatim.
    pub path: String,

    /// Handler identifier selecting the worker's inference entry point.
    pub handler: String,

    /// Number of worker processes to run for this model.
    pub workers: usize,
}

/// Top-level service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Configured models, in order. Order determines port assignment.
    pub models: Vec<ModelConfig>,

    /// Exec template for worker processes. The worker id, model path, port
    /// and handler are appended as arguments.
    #[serde(default = "default_worker_command")]
    pub worker_command: Vec<String>,

    /// First loopback port handed to a worker; each worker gets the next one.
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Delay between observing a worker exit and relaunching it.
    #[serde(default = "default_restart_cooldown_secs")]
    pub restart_cooldown_secs: u64,

    /// Outer deadline on a single forwarded prediction.
    #[serde(default = "default_forward_timeout_secs")]
    pub forward_timeout_secs: u64,
}

fn default_worker_command() -> Vec<String> {
    vec!["python3".to_string(), "worker.py".to_string()]
}

fn default_base_port() -> u16 {
    7778
}

fn default_restart_cooldown_secs() -> u64 {
    5
}

fn default_forward_timeout_secs() -> u64 {
    300
}

impl HubConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HubError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HubError::ConfigInvalid(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: HubConfig = serde_yaml::from_str(&raw).map_err(|e| {
            HubError::ConfigInvalid(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the path named by `CONFIG_PATH` (default `config.yaml`).
    pub fn load_from_env() -> Result<Self, HubError> {
        let path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load(path)
    }

    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_secs(self.restart_cooldown_secs)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }

    /// Total number of workers across all models.
    pub fn total_workers(&self) -> usize {
        self.models.iter().map(|m| m.workers).sum()
    }

    fn validate(&self) -> Result<(), HubError> {
        if self.models.is_empty() {
            return Err(HubError::ConfigInvalid("no models configured".into()));
        }
        if self.worker_command.is_empty() {
            return Err(HubError::ConfigInvalid("worker_command is empty".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for model in &self.models {
            if model.workers == 0 {
                return Err(HubError::ConfigInvalid(format!(
                    "model {} must have at least one worker",
                    model.name
                )));
            }
            if !seen.insert(&model.name) {
                return Err(HubError::ConfigInvalid(format!(
                    "duplicate model name: {}",
                    model.name
                )));
            }
        }
        let total = self.total_workers();
        if usize::from(self.base_port) + total > usize::from(u16::MAX) {
            return Err(HubError::ConfigInvalid(format!(
                "base_port {} leaves no room for {} workers",
                self.base_port, total
            )));
        }
        Ok(())
    }
}
