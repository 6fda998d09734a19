use crate::error::{ProxyError, Result};
use crate::translate::request::{ToolChoicePolicy, TOOL_CHOICE_UNSUPPORTED_PREFIXES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest accepted request body. Inline base64 images count against it.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub bedrock: BedrockConfig,
    #[serde(default)]
    pub translate: TranslateConfig,
}

/// Where the Bedrock runtime client connects. Unset fields fall back to the
/// AWS default chain (environment, profile, instance metadata).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BedrockConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    /// Model id prefixes whose models reject a `toolChoice`.
    #[serde(default = "default_tool_choice_unsupported_prefixes")]
    pub tool_choice_unsupported_prefixes: Vec<String>,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            tool_choice_unsupported_prefixes: default_tool_choice_unsupported_prefixes(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_tool_choice_unsupported_prefixes() -> Vec<String> {
    TOOL_CHOICE_UNSUPPORTED_PREFIXES
        .iter()
        .map(|p| p.to_string())
        .collect()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
            bedrock: BedrockConfig::default(),
            translate: TranslateConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Load config from a TOML file. Missing sections take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn tool_choice_policy(&self) -> ToolChoicePolicy {
        ToolChoicePolicy::new(self.translate.tool_choice_unsupported_prefixes.iter().cloned())
    }
}

/// Candidate config files in search order.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("bedrock-proxy.toml")];

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("bedrock-proxy").join("config.toml"));
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("bedrock-proxy").join("config.toml"));
        paths.push(home.join(".bedrock-proxy.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
