use crate::config::Config;
use crate::providers::OpenAICompatibleProvider;
use crate::traits::Provider;
use anyhow::{Result, anyhow};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAI,
    OpenRouter,
    Ollama,
    Glm,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [Self::OpenAI, Self::OpenRouter, Self::Ollama, Self::Glm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::OpenRouter => "openrouter",
            Self::Ollama => "ollama",
            Self::Glm => "glm",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAI => "https://api.openai.com/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::Ollama => "http://localhost:11434/v1",
            Self::Glm => "https://api.z.ai/api/paas/v4",
        }
    }

    pub fn api_key_env_vars(&self) -> &'static [&'static str] {
        match self {
            Self::OpenAI => &["OPENAI_API_KEY", "TABULA_OPENAI_API_KEY"],
            Self::OpenRouter => &["OPENROUTER_API_KEY", "TABULA_OPENROUTER_API_KEY"],
            Self::Ollama => &[],
            Self::Glm => &["ZAI_API_KEY", "GLM_API_KEY", "TABULA_GLM_API_KEY"],
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "openrouter" => Ok(Self::OpenRouter),
            "ollama" => Ok(Self::Ollama),
            "glm" | "zai" => Ok(Self::Glm),
            other => Err(anyhow!(
                "Unknown provider: {}. Available: openai, openrouter, ollama, glm/zai",
                other
            )),
        }
    }
}

pub fn create_provider(config: &Config) -> Result<Arc<dyn Provider>> {
    let kind: ProviderKind = config.provider.as_deref().unwrap_or("openai").parse()?;

    let api_key = match resolve_api_key_with_fallback(kind.api_key_env_vars(), &config.api_key) {
        Some(key) => key,
        None if kind.requires_api_key() => {
            return Err(anyhow!(
                "No API key found for {}. Set {} or run 'tabula onboard'.",
                kind.as_str(),
                kind.api_key_env_vars().join(" / ")
            ));
        }
        None => String::new(),
    };

    let base_url = config
        .base_url
        .clone()
        .unwrap_or_else(|| kind.default_base_url().to_string());

    let provider = OpenAICompatibleProvider::new(api_key)
        .with_label(kind.as_str())
        .with_model(config.model.clone())
        .with_base_url(base_url);

    tracing::debug!(provider = kind.as_str(), model = %config.model, "Created reasoning provider");
    Ok(Arc::new(provider))
}

fn resolve_api_key_with_fallback(env_vars: &[&str], config_key: &str) -> Option<String> {
    env_vars
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|key| !key.trim().is_empty())
        .or_else(|| (!config_key.is_empty()).then(|| config_key.to_string()))
}
