//! TOML configuration parsing.
//!
//! Every component receives its settings from a [`Config`] loaded once at
//! startup; nothing below this module reads the environment directly. The
//! only environment lookup is `${VAR}` expansion inside string values, which
//! is how the oracle credential is normally supplied.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Allowed browser origins. `["*"]` permits any origin.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:3000".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct OracleConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Credential; `${VAR}` references are expanded from the environment.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_oracle_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on attachment text forwarded to the oracle.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_key: None,
            base_url: None,
            timeout_secs: default_oracle_timeout_secs(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_oracle_timeout_secs() -> u64 {
    60
}
fn default_max_context_chars() -> usize {
    20_000
}

impl OracleConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Model id, falling back to the provider's default.
    pub fn model_name(&self) -> String {
        match &self.model {
            Some(m) => m.clone(),
            None => match self.provider.as_str() {
                "openai" => "gpt-4o-mini".to_string(),
                _ => "gemini-2.5-flash".to_string(),
            },
        }
    }

    /// The credential with `${VAR}` references expanded.
    ///
    /// When no key is configured the provider's conventional variable
    /// (`GEMINI_API_KEY` or `OPENAI_API_KEY`) is consulted.
    pub fn resolved_api_key(&self) -> Option<String> {
        let raw = match &self.api_key {
            Some(k) => k.clone(),
            None => match self.provider.as_str() {
                "openai" => "${OPENAI_API_KEY}".to_string(),
                _ => "${GEMINI_API_KEY}".to_string(),
            },
        };
        let expanded = expand_env_vars(&raw);
        if expanded.trim().is_empty() {
            None
        } else {
            Some(expanded)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    /// Interval of the background cleanup sweep; `0` disables it.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            retention_hours: default_retention_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./generated_files")
}
fn default_retention_hours() -> u64 {
    24
}
fn default_sweep_interval_secs() -> u64 {
    3600
}
fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl StorageConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_memory_limit_bytes")]
    pub memory_limit_bytes: usize,
    /// Ceiling on text accumulated by the document adapter.
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_sandbox_timeout_secs(),
            memory_limit_bytes: default_memory_limit_bytes(),
            max_document_bytes: default_max_document_bytes(),
        }
    }
}

fn default_sandbox_timeout_secs() -> u64 {
    10
}
fn default_memory_limit_bytes() -> usize {
    64 * 1024 * 1024
}
fn default_max_document_bytes() -> usize {
    8 * 1024 * 1024
}

impl Config {
    /// Defaults for commands that can run without a config file.
    pub fn minimal() -> Self {
        Self {
            server: ServerConfig::default(),
            oracle: OracleConfig::default(),
            storage: StorageConfig::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    match config.oracle.provider.as_str() {
        "disabled" | "gemini" | "openai" => {}
        other => anyhow::bail!(
            "Unknown oracle provider: '{}'. Must be disabled, gemini, or openai.",
            other
        ),
    }

    if config.oracle.is_enabled() && config.oracle.timeout_secs == 0 {
        anyhow::bail!("oracle.timeout_secs must be > 0");
    }

    if config.storage.max_upload_bytes == 0 {
        anyhow::bail!("storage.max_upload_bytes must be > 0");
    }

    if config.sandbox.timeout_secs == 0 {
        anyhow::bail!("sandbox.timeout_secs must be > 0");
    }
    if config.sandbox.memory_limit_bytes < 1024 * 1024 {
        anyhow::bail!("sandbox.memory_limit_bytes must be at least 1 MiB");
    }
    if config.sandbox.max_document_bytes == 0 {
        anyhow::bail!("sandbox.max_document_bytes must be > 0");
    }

    Ok(())
}

/// Expand `${VAR_NAME}` patterns in a string from the process environment.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        let end = match result[start..].find('}') {
            Some(pos) => start + pos,
            None => break,
        };
        let var_name = &result[start + 2..end];
        let value = std::env::var(var_name).unwrap_or_default();
        result = format!("{}{}{}", &result[..start], value, &result[end + 1..]);
    }
    result
}

/// Example configuration written by `docforge init`.
pub const EXAMPLE_CONFIG: &str = r#"[server]
bind = "127.0.0.1:8000"
cors_origins = ["http://localhost:3000", "http://127.0.0.1:3000"]

[oracle]
provider = "gemini"              # gemini | openai | disabled
model = "gemini-2.5-flash"
api_key = "${GEMINI_API_KEY}"
timeout_secs = 60
max_context_chars = 20000

[storage]
dir = "./generated_files"
retention_hours = 24
sweep_interval_secs = 3600
max_upload_bytes = 10485760

[sandbox]
timeout_secs = 10
memory_limit_bytes = 67108864
max_document_bytes = 8388608
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_config_parses_and_validates() {
        let config: Config = toml::from_str(EXAMPLE_CONFIG).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.oracle.model_name(), "gemini-2.5-flash");
        assert_eq!(config.storage.retention(), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8000");
        assert_eq!(config.oracle.provider, "gemini");
        assert_eq!(config.sandbox.timeout_secs, 10);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config: Config = toml::from_str("[oracle]\nprovider = \"magic\"\n").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("Unknown oracle provider"));
    }

    #[test]
    fn expands_env_references() {
        std::env::set_var("DOCFORGE_TEST_KEY", "sekrit");
        assert_eq!(expand_env_vars("k-${DOCFORGE_TEST_KEY}-x"), "k-sekrit-x");
        assert_eq!(expand_env_vars("${DOCFORGE_TEST_MISSING}"), "");
        assert_eq!(expand_env_vars("no refs"), "no refs");
    }

    #[test]
    fn blank_credential_resolves_to_none() {
        let oracle = OracleConfig {
            api_key: Some("${DOCFORGE_TEST_UNSET_VAR}".to_string()),
            ..OracleConfig::default()
        };
        assert!(oracle.resolved_api_key().is_none());
    }
}
