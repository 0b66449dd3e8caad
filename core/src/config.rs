use std::path::PathBuf;

use tracing::info;

use crate::error::{CrewError, Result};

const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_ALLOWED_MODELS: &str = "gpt-3.5-turbo,gpt-4";
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-pro";
const DEFAULT_BIND: &str = "0.0.0.0:3000";
const DEFAULT_CREWS_DIR: &str = "crews";
pub const DEFAULT_SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

/// Process-wide settings, read once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_api_base: Option<String>,
    pub default_model: String,
    pub summary_model: String,
    pub allowed_models: Vec<String>,
    pub gemini: Option<GeminiSettings>,
    pub bind_addr: String,
    pub crews_dir: PathBuf,
    pub search_url: String,
}

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub model: String,
}

impl Config {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let openai_api_key = var("OPENAI_API_KEY").ok_or_else(|| {
            CrewError::MissingConfig("OPENAI_API_KEY must be set in the environment or .env".into())
        })?;

        let allowed_models: Vec<String> = var("IRONCREW_ALLOWED_MODELS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_MODELS.to_string())
            .split(',')
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if allowed_models.is_empty() {
            return Err(CrewError::MissingConfig(
                "IRONCREW_ALLOWED_MODELS lists no models".into(),
            ));
        }

        let gemini = var("GEMINI_API_KEY").map(|api_key| GeminiSettings {
            api_key,
            model: var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
        });
        if gemini.is_none() {
            info!("GEMINI_API_KEY not set; video assistant disabled");
        }

        Ok(Self {
            openai_api_key,
            openai_api_base: var("OPENAI_API_BASE"),
            default_model: var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            summary_model: var("IRONCREW_SUMMARY_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            allowed_models,
            gemini,
            bind_addr: var("IRONCREW_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            crews_dir: PathBuf::from(
                var("IRONCREW_CREWS_DIR").unwrap_or_else(|| DEFAULT_CREWS_DIR.to_string()),
            ),
            search_url: var("IRONCREW_SEARCH_URL").unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string()),
        })
    }

    /// Validates a user-selected model against the allowed list.
    pub fn resolve_model(&self, choice: Option<&str>) -> Result<String> {
        match choice.map(str::trim).filter(|c| !c.is_empty()) {
            None => Ok(self.default_model.clone()),
            Some(model) if self.allowed_models.iter().any(|m| m == model) => Ok(model.to_string()),
            Some(model) => Err(CrewError::UnknownModel(model.to_string())),
        }
    }
}
