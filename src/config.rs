use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use cmdgate_tools::ToolsConfig;
use serde::Deserialize;

/// Server configuration: a TOML file overlaid with `CMDGATE_*` environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or if
    /// the resulting limits are unusable.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content)
                .with_context(|| format!("failed to parse config file {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CMDGATE_BLOCKED_PATHS") {
            self.tools.security.blocked_paths = v
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Ok(v) = std::env::var("CMDGATE_BLOCKED_ENV_KEYS") {
            self.tools.security.blocked_env_keys.extend(
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned),
            );
        }
        if let Ok(v) = std::env::var("CMDGATE_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>()
                && ms > 0
            {
                self.tools.shell.timeout_ms = ms;
            } else {
                tracing::warn!("ignoring invalid CMDGATE_TIMEOUT_MS value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CMDGATE_MAX_OUTPUT_LINES") {
            if let Ok(n) = v.parse::<usize>()
                && n > 0
            {
                self.tools.shell.max_output_lines = n;
            } else {
                tracing::warn!("ignoring invalid CMDGATE_MAX_OUTPUT_LINES value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CMDGATE_ALWAYS_INCLUDE_OUTPUT") {
            if let Ok(enabled) = v.parse::<bool>() {
                self.tools.response.always_include_output = enabled;
            } else {
                tracing::warn!("ignoring invalid CMDGATE_ALWAYS_INCLUDE_OUTPUT value: {v}");
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        let shell = &self.tools.shell;
        if shell.timeout_ms == 0 {
            bail!("shell.timeout_ms must be greater than zero");
        }
        if shell.max_output_lines == 0 {
            bail!("shell.max_output_lines must be greater than zero");
        }
        if shell.max_line_bytes == 0 {
            bail!("shell.max_line_bytes must be greater than zero");
        }
        if shell.progress_buffer == 0 {
            bail!("shell.progress_buffer must be greater than zero");
        }
        Ok(())
    }
}
