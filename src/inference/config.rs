//! Model endpoint configuration.
//!
//! Settings come from the environment (optionally seeded from a `.env`
//! file by the binary). Any OpenAI-compatible chat completions endpoint
//! works; the defaults target Groq.

use std::time::Duration;

use super::errors::InferenceError;

// ─── Defaults ────────────────────────────────────────────────────────────────

pub const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MAX_COMPLETION_TOKENS: u32 = 4096;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variable names.
pub mod env_keys {
    pub const MODEL: &str = "CLIENT_MODEL";
    pub const BASE_URL: &str = "MODEL_BASE_URL";
    pub const API_KEY: &str = "GROQ_API_KEY";
}

// ─── ModelConfig ─────────────────────────────────────────────────────────────

/// Everything needed to call the model endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Model identifier sent with every request.
    pub model: String,
    /// Base URL; `/chat/completions` is appended.
    pub base_url: String,
    /// Bearer token. Requests go out unauthenticated when absent.
    pub api_key: Option<String>,
    pub max_completion_tokens: u32,
    pub request_timeout: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            max_completion_tokens: DEFAULT_MAX_COMPLETION_TOKENS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ModelConfig {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, InferenceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, InferenceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();
        if let Some(model) = get(env_keys::MODEL) {
            config.model = model;
        }
        if let Some(base_url) = get(env_keys::BASE_URL) {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        config.api_key = get(env_keys::API_KEY);

        config.validate()?;
        Ok(config)
    }

    /// Override the model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.model.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "model identifier is empty".into(),
            });
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(InferenceError::ConfigError {
                reason: format!("base URL must be http(s): '{}'", self.base_url),
            });
        }
        Ok(())
    }

    /// Full URL of the chat completions endpoint.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
