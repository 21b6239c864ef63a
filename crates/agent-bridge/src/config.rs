//! Configuration for the bridge server.
//!
//! Sources, lowest precedence first: built-in defaults, the TOML config file,
//! `AGENT_BRIDGE__SECTION__KEY` environment variables, then CLI overrides
//! applied by the binary.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::backend::{
    BackendProvider, LocalProvider, RemoteProvider, RemoteTarget, WebSocketConnector,
    local_agent_factory,
};
use crate::error::{BridgeError, BridgeResult};
use crate::session::SessionSettings;
use crate::supervisor::RetryPolicy;

pub const APP_NAME: &str = "agent-bridge";

/// Location used when neither the config nor the engine resource name has one.
pub const DEFAULT_LOCATION: &str = "us-central1";

const ENGINE_ENDPOINT_PATH: &str = "/ws/google.cloud.aiplatform.v1beta1.ReasoningEngineExecutionService/BidiQueryReasoningEngine";

static RESOURCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"projects/([^/]+)/locations/([^/]+)/reasoningEngines/")
        .expect("Invalid regex pattern for engine resource names")
});

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub retry: RetryConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
        }
    }
}

/// Where agents run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// In-process agent.
    #[default]
    Local,
    /// Remote agent engine over WebSocket.
    Remote,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub mode: BackendMode,
    pub local: LocalConfig,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Name of the in-process agent.
    pub agent: String,
    /// Pause before the handshake of each local session.
    pub warmup_ms: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            agent: "loopback".to_string(),
            warmup_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Bare engine id or `projects/<P>/locations/<L>/reasoningEngines/<ID>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub call_type: String,
    /// JSON file with a `remote_agent_engine_id` written at deploy time.
    pub deployment_metadata: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            engine_id: None,
            project_id: None,
            location: None,
            endpoint: None,
            access_token: None,
            call_type: "bidi_stream_query".to_string(),
            deployment_metadata: "deployment_metadata.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            jitter_ratio: 0.2,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_ratio: self.jitter_ratio,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub queue_warn_depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_warn_depth: 1024,
            idle_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load from `path` (optional) and the process environment.
    pub fn load(path: &Path) -> Result<Self> {
        let built = Config::builder()
            .add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(&env_prefix())
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("loading configuration from {}", path.display()))?;

        let config: AppConfig = built
            .try_deserialize()
            .context("parsing configuration")?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            queue_warn_depth: self.session.queue_warn_depth,
            idle_timeout: self.session.idle_timeout_secs.map(Duration::from_secs),
            retry: self.retry.policy(),
        }
    }

    /// Resolve the backend provider every session will use.
    pub fn build_provider(&self) -> BridgeResult<BackendProvider> {
        match self.backend.mode {
            BackendMode::Local => {
                let local = &self.backend.local;
                let factory = local_agent_factory(&local.agent)?;
                info!("Using local agent '{}'", local.agent);
                Ok(BackendProvider::Local(LocalProvider::new(
                    factory,
                    Duration::from_millis(local.warmup_ms),
                )))
            }
            BackendMode::Remote => {
                let resolved = self.backend.remote.resolve()?;
                info!(
                    "Using remote agent engine {}",
                    resolved.target.resource_name()
                );
                let connector = WebSocketConnector::new(resolved.access_token);
                Ok(BackendProvider::Remote(RemoteProvider::new(
                    Arc::new(connector),
                    resolved.target,
                )))
            }
        }
    }

    /// Copy safe to print: secrets are masked.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.backend.remote.access_token.is_some() {
            config.backend.remote.access_token = Some("********".to_string());
        }
        config
    }
}

// ============================================================================
// Remote target resolution
// ============================================================================

/// A remote target plus the credentials to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRemote {
    pub target: RemoteTarget,
    pub access_token: Option<String>,
}

impl RemoteConfig {
    /// Resolve against the process environment.
    pub fn resolve(&self) -> BridgeResult<ResolvedRemote> {
        self.resolve_with(|key| env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Resolve with an explicit environment lookup.
    pub fn resolve_with<F>(&self, env_var: F) -> BridgeResult<ResolvedRemote>
    where
        F: Fn(&str) -> Option<String>,
    {
        let engine_id = match non_empty(&self.engine_id) {
            Some(id) => id.to_string(),
            None => self.metadata_engine_id()?.ok_or_else(|| {
                BridgeError::Config(format!(
                    "no remote agent engine configured: set backend.remote.engine_id \
                     or deploy one so {} exists",
                    self.deployment_metadata
                ))
            })?,
        };

        let parsed = RESOURCE_PATTERN
            .captures(&engine_id)
            .map(|caps| (caps[1].to_string(), caps[2].to_string()));
        let explicit_location = non_empty(&self.location).map(str::to_string);

        let (project_id, location) = match (non_empty(&self.project_id), parsed) {
            (Some(project), _) => (
                project.to_string(),
                explicit_location.unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            ),
            (None, Some((project, location))) => (project, explicit_location.unwrap_or(location)),
            (None, None) => match env_var("GOOGLE_CLOUD_PROJECT") {
                Some(project) => (
                    project,
                    explicit_location.unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
                ),
                None => {
                    return Err(BridgeError::Config(
                        "could not determine the project: set backend.remote.project_id, \
                         use a full engine resource name or set GOOGLE_CLOUD_PROJECT"
                            .to_string(),
                    ));
                }
            },
        };

        let endpoint = match non_empty(&self.endpoint) {
            Some(endpoint) => endpoint.to_string(),
            None => format!("wss://{location}-aiplatform.googleapis.com{ENGINE_ENDPOINT_PATH}"),
        };
        let access_token = non_empty(&self.access_token)
            .map(str::to_string)
            .or_else(|| env_var("GOOGLE_ACCESS_TOKEN"));

        Ok(ResolvedRemote {
            target: RemoteTarget {
                engine_id,
                project_id,
                location,
                endpoint,
                call_type: self.call_type.clone(),
            },
            access_token,
        })
    }

    fn metadata_engine_id(&self) -> BridgeResult<Option<String>> {
        let path = expand_str_path(&self.deployment_metadata)?;
        if !path.exists() {
            debug!("No deployment metadata at {}", path.display());
            return Ok(None);
        }
        let body = fs::read_to_string(&path).map_err(|e| {
            BridgeError::Config(format!("reading {}: {e}", path.display()))
        })?;
        let metadata: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            BridgeError::Config(format!("parsing {}: {e}", path.display()))
        })?;
        Ok(metadata
            .get("remote_agent_engine_id")
            .and_then(|id| id.as_str())
            .filter(|id| !id.is_empty())
            .map(str::to_string))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// ============================================================================
// Paths
// ============================================================================

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Config file path: `explicit` when given, else the XDG default.
pub fn config_file_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => expand_path(path),
        None => Ok(default_config_dir()?.join("config.toml")),
    }
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    match path.to_str() {
        Some(text) => {
            let expanded = shellexpand::full(text).context("expanding path")?;
            Ok(PathBuf::from(expanded.as_ref()))
        }
        None => Ok(path.to_path_buf()),
    }
}

fn expand_str_path(text: &str) -> BridgeResult<PathBuf> {
    let expanded = shellexpand::full(text)
        .map_err(|e| BridgeError::Config(format!("expanding {text}: {e}")))?;
    Ok(PathBuf::from(expanded.as_ref()))
}
