//! Preview engine configuration
//!
//! Every field has a default so a partial (or missing) config file is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::constants::{defaults, hosts, timeouts};
use crate::error::ConfigError;

const CONFIG_FILE: &str = "preview.json";

/// How the assembler treats documents that already carry style/script blocks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InjectionPolicy {
    /// Skip injecting CSS when a `<style>` block exists, and JS when a
    /// `<script>` block exists
    #[default]
    SkipIfPresent,
    /// Always inject non-empty CSS/JS, even next to existing blocks
    AlwaysInject,
}

/// Bundle assembly settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AssemblyConfig {
    #[serde(default)]
    pub injection_policy: InjectionPolicy,
}

/// Capabilities granted to the embedded frame in fallback mode.
///
/// Top-level navigation is never grantable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameConfig {
    #[serde(default = "default_true")]
    pub allow_scripts: bool,
    #[serde(default = "default_true")]
    pub allow_same_origin: bool,
    #[serde(default = "default_true")]
    pub allow_forms: bool,
    #[serde(default)]
    pub allow_modals: bool,
    #[serde(default)]
    pub allow_popups: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            allow_scripts: true,
            allow_same_origin: true,
            allow_forms: true,
            allow_modals: false,
            allow_popups: false,
        }
    }
}

/// Node sandbox settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SandboxConfig {
    #[serde(default = "default_node_command")]
    pub node_command: String,
    #[serde(default = "default_npm_command")]
    pub npm_command: String,
    /// Arguments after `<npm> install`
    #[serde(default = "default_install_args")]
    pub install_args: Vec<String>,
    #[serde(default = "default_server_package")]
    pub server_package: String,
    #[serde(default = "default_server_version")]
    pub server_version: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
    /// Probe the announced URL over HTTP before declaring ready
    #[serde(default = "default_true")]
    pub verify_http: bool,
    #[serde(default = "default_http_verify_timeout")]
    pub http_verify_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_node_command() -> String {
    defaults::NODE_COMMAND.to_string()
}

fn default_npm_command() -> String {
    defaults::NPM_COMMAND.to_string()
}

fn default_install_args() -> Vec<String> {
    vec![
        "--no-audit".to_string(),
        "--no-fund".to_string(),
        "--loglevel=error".to_string(),
    ]
}

fn default_server_package() -> String {
    defaults::SERVER_PACKAGE.to_string()
}

fn default_server_version() -> String {
    defaults::SERVER_VERSION.to_string()
}

fn default_host() -> String {
    hosts::LOCAL.to_string()
}

fn default_install_timeout() -> u64 {
    timeouts::INSTALL_SECS
}

fn default_ready_timeout() -> u64 {
    timeouts::SERVER_READY_SECS
}

fn default_http_verify_timeout() -> u64 {
    timeouts::HTTP_VERIFY_MS
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            node_command: default_node_command(),
            npm_command: default_npm_command(),
            install_args: default_install_args(),
            server_package: default_server_package(),
            server_version: default_server_version(),
            host: default_host(),
            install_timeout_secs: default_install_timeout(),
            ready_timeout_secs: default_ready_timeout(),
            verify_http: true,
            http_verify_timeout_ms: default_http_verify_timeout(),
        }
    }
}

/// Full preview engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PreviewConfig {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub frame: FrameConfig,
    #[serde(default)]
    pub assembly: AssemblyConfig,
}

impl PreviewConfig {
    /// Load configuration from `dir`, falling back to defaults when absent
    pub async fn load(dir: &Path) -> Result<Self, ConfigError> {
        let config_path = dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path).await?;
        serde_json::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save configuration into `dir`
    pub async fn save(&self, dir: &Path) -> Result<(), ConfigError> {
        fs::create_dir_all(dir).await?;

        let config_path = dir.join(CONFIG_FILE);
        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(&config_path, contents).await?;

        log::info!("Preview configuration saved to {:?}", config_path);
        Ok(())
    }
}
