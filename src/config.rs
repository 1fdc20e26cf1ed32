use crate::error::{InvoiceError, Result};
use serde::Deserialize;
use std::{fs, path::Path};
use tracing::info;

pub const API_KEY_VAR: &str = "GROQ_API_KEY";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub session: SessionSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_model() -> String {
    "meta-llama/llama-4-scout-17b-16e-instruct".to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// Invoice language hint passed to the model.
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_secrets_path")]
    pub secrets_path: String,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            language: default_language(),
            secrets_path: default_secrets_path(),
        }
    }
}

fn default_language() -> String {
    "English".to_string()
}

fn default_secrets_path() -> String {
    ".streamlit/secrets.toml".to_string()
}

/// Where the API key comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CredentialSource {
    /// A TOML secrets file.
    Cloud,
    /// `.env` / process environment.
    Local,
}

#[derive(Deserialize)]
struct Secrets {
    #[serde(rename = "GROQ_API_KEY")]
    groq_api_key: Option<String>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Like `load`, but a missing file just means defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| InvoiceError::Config(e.to_string()))?;
        if config.llm.max_retries == 0 {
            return Err(InvoiceError::Config(
                "llm.max_retries must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn resolve_api_key(&self, source: CredentialSource) -> Result<String> {
        match source {
            CredentialSource::Cloud => {
                let content = fs::read_to_string(&self.session.secrets_path).map_err(|e| {
                    InvoiceError::Config(format!(
                        "cannot read secrets file {}: {e}",
                        self.session.secrets_path
                    ))
                })?;
                api_key_from_secrets(&content).ok_or_else(|| {
                    InvoiceError::Config(format!(
                        "{API_KEY_VAR} not found in {}",
                        self.session.secrets_path
                    ))
                })
            }
            CredentialSource::Local => {
                let _ = dotenvy::dotenv();
                std::env::var(API_KEY_VAR)
                    .ok()
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| {
                        InvoiceError::Config(format!(
                            "{API_KEY_VAR} not found in environment variables"
                        ))
                    })
            }
        }
    }
}

fn api_key_from_secrets(content: &str) -> Option<String> {
    toml::from_str::<Secrets>(content)
        .ok()?
        .groq_api_key
        .filter(|k| !k.trim().is_empty())
}
