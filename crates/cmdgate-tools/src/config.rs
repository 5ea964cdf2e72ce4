use std::path::PathBuf;

use serde::Deserialize;

use crate::executor::DEFAULT_TIMEOUT_MS;

fn default_blocked_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("/blocked")]
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_output_lines() -> usize {
    10_000
}

fn default_max_line_bytes() -> usize {
    16 * 1024
}

fn default_progress_buffer() -> usize {
    256
}

fn default_progress_timeout_ms() -> u64 {
    1_000
}

/// Top-level configuration for the command gateway.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub response: ResponseConfig,
}

/// Deny-lists. `blocked_env_keys` extends the built-in list, it never replaces it.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_blocked_paths")]
    pub blocked_paths: Vec<PathBuf>,
    #[serde(default)]
    pub blocked_env_keys: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            blocked_paths: default_blocked_paths(),
            blocked_env_keys: Vec::new(),
        }
    }
}

/// Process supervision limits.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    /// Used when a request does not carry `timeout_ms`.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_output_lines")]
    pub max_output_lines: usize,
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Capacity of the per-call progress channel.
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
    /// Upper bound for delivering one progress notification to the client.
    #[serde(default = "default_progress_timeout_ms")]
    pub progress_timeout_ms: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_output_lines: default_max_output_lines(),
            max_line_bytes: default_max_line_bytes(),
            progress_buffer: default_progress_buffer(),
            progress_timeout_ms: default_progress_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseConfig {
    /// Include output lines in the response even when no transformation was requested.
    #[serde(default)]
    pub always_include_output: bool,
}
