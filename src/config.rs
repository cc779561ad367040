//! Session configuration
//!
//! Window sizing, thread sizing, sampler chain and prompt templates.
//! Loaded from JSON; any missing field takes its default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inference::{ContextParams, SamplerParams};
use crate::platform::{PlatformAdapter, PlatformError};

/// Environment variable naming a config file to load at init
pub const CONFIG_ENV_VAR: &str = "LLAMACHAT_CONFIG";

/// Placeholder replaced by the caller's text in prompt templates
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config directory: {0}")]
    ConfigDir(String),
    #[error("Failed to read config: {0}")]
    Read(#[from] PlatformError),
    #[error("Config is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("Failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Thread count bounds for the engine's internal pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    pub min: i32,
    pub max: i32,
    /// Cores left free for the host application
    pub headroom: i32,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            min: 2,
            max: 4,
            headroom: 2,
        }
    }
}

/// Sampler chain settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub top_k: i32,
    pub top_p: f32,
    pub min_keep: usize,
    pub temperature: f32,
    /// `u32::MAX` lets llama.cpp pick a random seed
    pub seed: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            top_k: 40,
            top_p: 0.95,
            min_keep: 1,
            temperature: 0.7,
            seed: u32::MAX,
        }
    }
}

impl From<&SamplerConfig> for SamplerParams {
    fn from(c: &SamplerConfig) -> Self {
        SamplerParams {
            top_k: c.top_k,
            top_p: c.top_p,
            min_keep: c.min_keep,
            temperature: c.temperature,
            seed: c.seed,
        }
    }
}

/// Session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Window capacity in tokens
    pub context_size: u32,
    /// Slots kept free at the top of the window
    pub overflow_headroom: u32,
    /// Tokens per decode call
    pub batch_size: u32,
    pub threads: ThreadConfig,
    pub sampler: SamplerConfig,
    /// Wraps the system prompt; must contain `{prompt}`
    pub system_template: String,
    /// Wraps each user prompt; must contain `{prompt}`
    pub user_template: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            context_size: 256,
            overflow_headroom: 4,
            batch_size: 1,
            threads: ThreadConfig::default(),
            sampler: SamplerConfig::default(),
            system_template: "System: {prompt}\n".to_string(),
            user_template: "User: {prompt}\nAssistant: ".to_string(),
        }
    }
}

impl SessionConfig {
    /// Validate settings values
    ///
    /// Ensures all parameters are within acceptable ranges
    pub fn validate(&mut self) {
        let defaults = SessionConfig::default();

        if self.context_size <= self.overflow_headroom {
            self.context_size = defaults.context_size;
            self.overflow_headroom = defaults.overflow_headroom;
        }

        // A batch can never be larger than the usable window
        self.batch_size = self.batch_size.clamp(1, self.usable_capacity());

        self.threads.min = self.threads.min.max(1);
        if self.threads.max < self.threads.min {
            self.threads.max = self.threads.min;
        }
        self.threads.headroom = self.threads.headroom.max(0);

        if self.sampler.top_k <= 0 {
            self.sampler.top_k = defaults.sampler.top_k;
        }
        self.sampler.top_p = self.sampler.top_p.clamp(0.0, 1.0);
        self.sampler.min_keep = self.sampler.min_keep.max(1);
        self.sampler.temperature = self.sampler.temperature.clamp(0.0, 2.0);

        if !self.system_template.contains(PROMPT_PLACEHOLDER) {
            self.system_template = defaults.system_template;
        }
        if !self.user_template.contains(PROMPT_PLACEHOLDER) {
            self.user_template = defaults.user_template;
        }
    }

    /// Highest position a decode may reach
    pub fn usable_capacity(&self) -> u32 {
        self.context_size.saturating_sub(self.overflow_headroom)
    }

    pub fn format_system_prompt(&self, prompt: &str) -> String {
        self.system_template.replace(PROMPT_PLACEHOLDER, prompt)
    }

    pub fn format_user_prompt(&self, prompt: &str) -> String {
        self.user_template.replace(PROMPT_PLACEHOLDER, prompt)
    }

    /// Engine context parameters for the given thread count
    pub fn context_params(&self, n_threads: i32) -> ContextParams {
        ContextParams {
            n_ctx: self.context_size,
            n_batch: self.batch_size,
            n_threads,
            sampler: SamplerParams::from(&self.sampler),
        }
    }
}

/// Default config file location
///
/// - Linux: `/home/{user}/.config/llamachat/session.json`
/// - macOS: `/Users/{user}/Library/Application Support/com.llamachat.llamachat/session.json`
/// - Windows: `C:\Users\{user}\AppData\Roaming\llamachat\llamachat\config\session.json`
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    directories::ProjectDirs::from("com", "llamachat", "llamachat")
        .map(|dirs| dirs.config_dir().join("session.json"))
        .ok_or_else(|| ConfigError::ConfigDir("Could not determine config directory".to_string()))
}

/// Load config through the platform adapter
///
/// Returns defaults if the file doesn't exist or is corrupted
pub fn load_config(platform: &dyn PlatformAdapter, path: &Path) -> SessionConfig {
    if !platform.file_exists(path) {
        tracing::info!("Config file {} not found, using defaults", path.display());
        return SessionConfig::default();
    }

    match load_config_internal(platform, path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            SessionConfig::default()
        }
    }
}

fn load_config_internal(
    platform: &dyn PlatformAdapter,
    path: &Path,
) -> Result<SessionConfig, ConfigError> {
    let bytes = platform.file_read(path)?;
    let json = String::from_utf8(bytes)?;
    let mut config: SessionConfig = serde_json::from_str(&json)?;

    config.validate();

    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Resolves which config to use at startup: `LLAMACHAT_CONFIG` first, then
/// the default location.
pub fn load_startup_config(platform: &dyn PlatformAdapter) -> SessionConfig {
    let path = match std::env::var_os(CONFIG_ENV_VAR) {
        Some(path) => PathBuf::from(path),
        None => match default_config_path() {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!("{}", e);
                return SessionConfig::default();
            }
        },
    };
    load_config(platform, &path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::NativePlatform;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.context_size, 256);
        assert_eq!(config.overflow_headroom, 4);
        assert_eq!(config.usable_capacity(), 252);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.sampler.top_k, 40);
        assert_eq!(config.sampler.seed, u32::MAX);
    }

    #[test]
    fn test_config_validation() {
        let mut config = SessionConfig::default();

        config.sampler.temperature = 5.0;
        config.sampler.top_p = 2.0;
        config.sampler.top_k = 0;
        config.validate();
        assert_eq!(config.sampler.temperature, 2.0);
        assert_eq!(config.sampler.top_p, 1.0);
        assert_eq!(config.sampler.top_k, 40);

        config.batch_size = 10_000;
        config.validate();
        assert_eq!(config.batch_size, 252);

        config.batch_size = 0;
        config.validate();
        assert_eq!(config.batch_size, 1);

        config.threads.min = 6;
        config.threads.max = 2;
        config.validate();
        assert_eq!(config.threads.max, 6);

        config.user_template = "no placeholder".to_string();
        config.validate();
        assert_eq!(config.user_template, SessionConfig::default().user_template);
    }

    #[test]
    fn test_headroom_larger_than_window_resets() {
        let mut config = SessionConfig {
            context_size: 4,
            overflow_headroom: 8,
            ..SessionConfig::default()
        };
        config.validate();
        assert_eq!(config.context_size, 256);
        assert_eq!(config.overflow_headroom, 4);
    }

    #[test]
    fn test_prompt_templates() {
        let config = SessionConfig::default();
        assert_eq!(
            config.format_system_prompt("You are helpful."),
            "System: You are helpful.\n"
        );
        assert_eq!(config.format_user_prompt("Hi"), "User: Hi\nAssistant: ");
    }

    #[test]
    fn test_load_partial_config() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"context_size": 512, "sampler": {"temperature": 0.2}}"#)
            .unwrap();
        file.flush().unwrap();

        let config = load_config(&NativePlatform, file.path());
        assert_eq!(config.context_size, 512);
        assert!((config.sampler.temperature - 0.2).abs() < 0.001);
        assert_eq!(config.sampler.top_k, 40);
        assert_eq!(config.overflow_headroom, 4);
    }

    #[test]
    fn test_load_corrupt_config_falls_back() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(b"{not json").unwrap();
        file.flush().unwrap();

        let config = load_config(&NativePlatform, file.path());
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn test_load_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&NativePlatform, &dir.path().join("missing.json"));
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn test_context_params() {
        let config = SessionConfig::default();
        let params = config.context_params(3);
        assert_eq!(params.n_ctx, 256);
        assert_eq!(params.n_batch, 1);
        assert_eq!(params.n_threads, 3);
        assert_eq!(params.sampler.top_k, 40);
    }
}
