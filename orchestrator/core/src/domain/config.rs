// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Negotiator Configuration
//!
//! Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing one
//! negotiator process:
//! - negotiation bounds (risk threshold, mutation budget)
//! - enabled mutation strategies and the capability table
//! - selection policy and oracle separation parameters
//! - stage transport, release topic and storage window

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::gate::DEFAULT_RISK_THRESHOLD;
use crate::domain::iteration::DEFAULT_MAX_MUTATIONS;
use crate::domain::mutation::{CapabilityTable, MissingProfilePolicy, DEFAULT_SPEED_REDUCTION};
use crate::domain::oracle::SeparationParams;
use crate::domain::release::DEFAULT_RELEASE_TOPIC;
use crate::domain::selection::SelectionPolicyKind;

pub const API_VERSION: &str = "deconflict/v1";
pub const KIND: &str = "NegotiatorConfig";
pub const CONFIG_PATH_ENV: &str = "DECONFLICT_CONFIG_PATH";

/// Top-level negotiator configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiatorConfigManifest {
    /// API version (must be "deconflict/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "NegotiatorConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: NegotiatorSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NegotiatorSpec {
    #[serde(default)]
    pub negotiation: NegotiationConfig,

    #[serde(default)]
    pub mutation: MutationConfig,

    #[serde(default)]
    pub selection: SelectionConfig,

    #[serde(default)]
    pub separation: SeparationParams,

    /// Inline capability profiles keyed by `uav_type`
    #[serde(default, skip_serializing_if = "CapabilityTable::is_empty")]
    pub capabilities: CapabilityTable,

    /// JSON capability table; entries override inline profiles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities_file: Option<PathBuf>,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub release: ReleaseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationConfig {
    /// Risk strictly above this value is unsafe
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    #[serde(default = "default_max_mutations")]
    pub max_mutations: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    TargetedDeescalation,
    ExploratoryPerturbation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationConfig {
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategyKind>,

    /// Fraction removed from the yielding vehicle's speed
    #[serde(default = "default_speed_reduction")]
    pub speed_reduction: f64,

    #[serde(default)]
    pub missing_profile: MissingProfilePolicy,

    /// Fixed RNG seed for exploratory perturbation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionConfig {
    #[serde(default)]
    pub policy: SelectionPolicyKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Base URL the stage paths are appended to
    #[serde(default = "default_dispatch_url")]
    pub base_url: String,

    #[serde(default = "default_dispatch_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Ask the receiving stage to acknowledge before processing
    #[serde(default = "default_true")]
    pub async_header: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    #[serde(default = "default_release_topic")]
    pub topic: String,

    #[serde(default = "default_flush_timeout", with = "humantime_serde")]
    pub flush_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// How far back `trigger` looks for reported trajectories
    #[serde(default = "default_recent_ttl", with = "humantime_serde")]
    pub recent_ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_threshold() -> f64 {
    DEFAULT_RISK_THRESHOLD
}

fn default_max_mutations() -> u32 {
    DEFAULT_MAX_MUTATIONS
}

fn default_strategies() -> Vec<StrategyKind> {
    vec![StrategyKind::TargetedDeescalation]
}

fn default_speed_reduction() -> f64 {
    DEFAULT_SPEED_REDUCTION
}

fn default_dispatch_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_dispatch_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_release_topic() -> String {
    DEFAULT_RELEASE_TOPIC.to_string()
}

fn default_flush_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_recent_ttl() -> Duration {
    Duration::from_secs(100)
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            max_mutations: default_max_mutations(),
        }
    }
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            strategies: default_strategies(),
            speed_reduction: default_speed_reduction(),
            missing_profile: MissingProfilePolicy::default(),
            seed: None,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_url: default_dispatch_url(),
            timeout: default_dispatch_timeout(),
            async_header: true,
        }
    }
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            topic: default_release_topic(),
            flush_timeout: default_flush_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            recent_ttl: default_recent_ttl(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for NegotiatorConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "deconflict".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: NegotiatorSpec::default(),
        }
    }
}

impl NegotiatorConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_yaml_str(&content).with_context(|| format!("Failed to parse config file {:?}", path))
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. DECONFLICT_CONFIG_PATH environment variable
    /// 2. ./deconflict-config.yaml (working directory)
    /// 3. ~/.deconflict/config.yaml (user home)
    /// 4. /etc/deconflict/config.yaml (system, Unix) or C:\ProgramData\Deconflict\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./deconflict-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".deconflict").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/deconflict/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Deconflict\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(config_path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", config_path);
                Self::from_yaml_file(config_path)?
            }
            None => {
                tracing::warn!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Unparseable values are
    /// logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("DECONFLICT_THRESHOLD") {
            match val.parse::<f64>() {
                Ok(threshold) => {
                    tracing::info!("Environment override: DECONFLICT_THRESHOLD={}", threshold);
                    self.spec.negotiation.threshold = threshold;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for DECONFLICT_THRESHOLD: '{}'. Expected a number. Ignoring.",
                    val
                ),
            }
        }

        if let Some(val) = lookup("DECONFLICT_MAX_MUTATIONS") {
            match val.parse::<u32>() {
                Ok(max) => {
                    tracing::info!("Environment override: DECONFLICT_MAX_MUTATIONS={}", max);
                    self.spec.negotiation.max_mutations = max;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for DECONFLICT_MAX_MUTATIONS: '{}'. Expected an integer. Ignoring.",
                    val
                ),
            }
        }

        if let Some(val) = lookup("DECONFLICT_DISPATCH_URL") {
            tracing::info!("Environment override: DECONFLICT_DISPATCH_URL={}", val);
            self.spec.dispatch.base_url = val;
        }
    }

    /// Effective capability table: inline profiles, overridden by the file.
    pub fn load_capabilities(&self) -> anyhow::Result<CapabilityTable> {
        let Some(path) = &self.spec.capabilities_file else {
            return Ok(self.spec.capabilities.clone());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read capabilities file {:?}", path))?;
        let from_file: CapabilityTable = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse capabilities file {:?}", path))?;

        let merged = self
            .spec
            .capabilities
            .iter()
            .chain(from_file.iter())
            .map(|(uav_type, profile)| (uav_type.clone(), *profile))
            .collect();
        Ok(merged)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let negotiation = &self.spec.negotiation;
        if !(0.0..=1.0).contains(&negotiation.threshold) {
            anyhow::bail!(
                "spec.negotiation.threshold must be within [0, 1], got {}",
                negotiation.threshold
            );
        }
        if negotiation.max_mutations == 0 {
            anyhow::bail!("spec.negotiation.max_mutations must be greater than 0");
        }

        let mutation = &self.spec.mutation;
        if mutation.strategies.is_empty() {
            anyhow::bail!("spec.mutation.strategies must enable at least one strategy");
        }
        if !(mutation.speed_reduction > 0.0 && mutation.speed_reduction < 1.0) {
            anyhow::bail!(
                "spec.mutation.speed_reduction must be within (0, 1), got {}",
                mutation.speed_reduction
            );
        }

        self.spec
            .separation
            .validate()
            .map_err(|e| anyhow::anyhow!("spec.{}", e))?;

        self.spec
            .capabilities
            .validate()
            .map_err(|e| anyhow::anyhow!("spec.capabilities: {}", e))?;

        if self.spec.dispatch.base_url.trim().is_empty() {
            anyhow::bail!("spec.dispatch.base_url cannot be empty");
        }

        if self.spec.release.topic.is_empty() {
            anyhow::bail!("spec.release.topic cannot be empty");
        }

        Ok(())
    }
}
