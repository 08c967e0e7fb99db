//! Model seam: the [`NotesModel`] trait and its edgequake-llm adapter.
//!
//! Generation and figure analysis only ever talk to `Arc<dyn NotesModel>`.
//! Production code wraps an `edgequake_llm::LLMProvider` in
//! [`ProviderModel`]; tests inject scripted models. Models are resolved once
//! per pipeline by [`ModelSet::resolve`] and handed down explicitly.
//!
//! This module does not retry. The only retry in the system is the
//! single-pass fallback, which lives in [`crate::pipeline::notes`] because
//! it targets a *different* model.

use crate::config::NotesConfig;
use crate::error::NotesError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::{timeout, Duration};
use tracing::debug;

/// One request to a text or vision model.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub prompt: String,
    /// Images attached to the user turn; empty for text-only calls.
    pub images: Vec<ImageData>,
}

impl ModelRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(prompt: impl Into<String>, image: ImageData) -> Self {
        Self {
            prompt: prompt.into(),
            images: vec![image],
        }
    }
}

/// Failure of a single model call.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("model call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("{0}")]
    Provider(String),
}

/// A text-generating model, optionally vision-capable.
#[async_trait]
pub trait NotesModel: Send + Sync {
    /// Model identifier, used in logs and error reports.
    fn name(&self) -> &str;

    /// Run one prompt and return the generated text.
    async fn generate(&self, request: &ModelRequest) -> Result<String, ModelError>;
}

/// [`NotesModel`] backed by an edgequake-llm provider.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
    model: String,
    options: CompletionOptions,
    timeout_secs: u64,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>, config: &NotesConfig) -> Self {
        Self {
            provider,
            model: model.into(),
            options: build_options(config),
            timeout_secs: config.api_timeout_secs,
        }
    }
}

#[async_trait]
impl NotesModel for ProviderModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let start = Instant::now();
        let message = if request.images.is_empty() {
            ChatMessage::user(request.prompt.as_str())
        } else {
            ChatMessage::user_with_images(request.prompt.as_str(), request.images.clone())
        };
        let messages = vec![message];

        let call = self.provider.chat(&messages, Some(&self.options));
        let response = timeout(Duration::from_secs(self.timeout_secs), call)
            .await
            .map_err(|_| ModelError::Timeout {
                secs: self.timeout_secs,
            })?
            .map_err(|e| ModelError::Provider(format!("{}", e)))?;

        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            self.model,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

/// Build `CompletionOptions` from the notes config.
fn build_options(config: &NotesConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// The three model roles a pipeline needs.
#[derive(Clone)]
pub struct ModelSet {
    pub primary: Arc<dyn NotesModel>,
    pub fallback: Arc<dyn NotesModel>,
    pub vision: Arc<dyn NotesModel>,
}

impl ModelSet {
    /// Resolve every role, from most-specific to least-specific:
    ///
    /// 1. **Injected model** (`config.primary` / `fallback` / `vision`).
    /// 2. **Named provider** (`config.provider_name`) with the configured
    ///    model id, or the provider's default for that role.
    /// 3. **`EDGEQUAKE_LLM_PROVIDER`** from the environment.
    /// 4. **First provider with an API key** among `OPENAI_API_KEY`,
    ///    `GEMINI_API_KEY`, `ANTHROPIC_API_KEY`.
    ///
    /// The environment is only consulted when at least one role is missing.
    pub fn resolve(config: &NotesConfig) -> Result<Self, NotesError> {
        if let (Some(p), Some(f), Some(v)) = (&config.primary, &config.fallback, &config.vision) {
            return Ok(Self {
                primary: Arc::clone(p),
                fallback: Arc::clone(f),
                vision: Arc::clone(v),
            });
        }

        let provider = resolve_provider_name(config)?;
        let defaults = default_models(&provider);

        let primary = match &config.primary {
            Some(m) => Arc::clone(m),
            None => {
                let id = config.primary_model.as_deref().unwrap_or(defaults.primary);
                create_model(&provider, id, config)?
            }
        };
        let fallback = match &config.fallback {
            Some(m) => Arc::clone(m),
            None => {
                let id = config.fallback_model.as_deref().unwrap_or(defaults.fallback);
                create_model(&provider, id, config)?
            }
        };
        let vision = match &config.vision {
            Some(m) => Arc::clone(m),
            None => {
                let id = config.vision_model.as_deref().unwrap_or(defaults.vision);
                create_model(&provider, id, config)?
            }
        };

        Ok(Self {
            primary,
            fallback,
            vision,
        })
    }
}

/// Default model ids per provider, by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultModels {
    pub primary: &'static str,
    pub fallback: &'static str,
    pub vision: &'static str,
}

pub fn default_models(provider: &str) -> DefaultModels {
    match provider {
        "gemini" | "google" => DefaultModels {
            primary: "gemini-2.5-pro",
            fallback: "gemini-2.0-flash",
            vision: "gemini-2.0-flash",
        },
        "anthropic" => DefaultModels {
            primary: "claude-sonnet-4-20250514",
            fallback: "claude-haiku-4-20250514",
            vision: "claude-haiku-4-20250514",
        },
        "ollama" | "lmstudio" => DefaultModels {
            primary: "llama3.2",
            fallback: "llama3.2",
            vision: "llava",
        },
        _ => DefaultModels {
            primary: "gpt-4.1",
            fallback: "gpt-4.1-mini",
            vision: "gpt-4.1-mini",
        },
    }
}

fn resolve_provider_name(config: &NotesConfig) -> Result<String, NotesError> {
    if let Some(ref name) = config.provider_name {
        return Ok(name.clone());
    }

    if let Ok(prov) = std::env::var("EDGEQUAKE_LLM_PROVIDER") {
        if !prov.is_empty() {
            return Ok(prov);
        }
    }

    for (var, provider) in [
        ("OPENAI_API_KEY", "openai"),
        ("GEMINI_API_KEY", "gemini"),
        ("ANTHROPIC_API_KEY", "anthropic"),
    ] {
        if std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false) {
            return Ok(provider.to_string());
        }
    }

    Err(NotesError::ProviderNotConfigured {
        provider: "auto".to_string(),
        hint: "No LLM provider could be auto-detected from environment.\n\
               Set OPENAI_API_KEY, GEMINI_API_KEY or ANTHROPIC_API_KEY, or pass --provider."
            .to_string(),
    })
}

fn create_model(
    provider_name: &str,
    model: &str,
    config: &NotesConfig,
) -> Result<Arc<dyn NotesModel>, NotesError> {
    let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        NotesError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(Arc::new(ProviderModel::new(provider, model, config)))
}


#[cfg(test)]
mod tests {
    use super::scripted::ScriptedModel;
    use super::*;

    #[test]
    fn build_options_defaults() {
        let config = NotesConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.2));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn injected_models_skip_provider_resolution() {
        let config = NotesConfig::builder()
            .primary(ScriptedModel::replying("p", "x"))
            .fallback(ScriptedModel::replying("f", "x"))
            .vision(ScriptedModel::replying("v", "x"))
            .build()
            .unwrap();
        let set = ModelSet::resolve(&config).expect("injected models resolve");
        assert_eq!(set.primary.name(), "p");
        assert_eq!(set.fallback.name(), "f");
        assert_eq!(set.vision.name(), "v");
    }

    #[test]
    fn default_models_have_a_lower_fallback_tier() {
        let d = default_models("gemini");
        assert_ne!(d.primary, d.fallback);
        let d = default_models("something-else");
        assert_eq!(d.primary, "gpt-4.1");
    }

    #[tokio::test]
    async fn scripted_model_records_prompts() {
        let m = ScriptedModel::replying("m", "ok");
        let out = m.generate(&ModelRequest::text("hello")).await.unwrap();
        assert_eq!(out, "ok");
        assert_eq!(m.calls(), 1);
        assert_eq!(m.prompts(), vec!["hello".to_string()]);
    }
}
