pub mod extract;
pub mod models;
pub mod prompt;
pub mod providers;

use crate::config::LlmConfig;
use crate::db::introspect::SchemaDescription;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use self::models::GeneratedQuery;
use self::prompt::PromptBuilder;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    ConnectionError(String),
    #[error("LLM response error: {0}")]
    ResponseError(String),
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
    #[error("Prompt rendering error: {0}")]
    PromptError(String),
    #[error("No valid SQL query extracted.")]
    NoExtractableQuery,
}

/// A text-generation endpoint: prompt in, raw completion out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Prompt construction, one model call, and statement extraction.
pub struct LlmManager {
    generator: Box<dyn TextGenerator>,
    prompts: PromptBuilder,
    backend: String,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let generator: Box<dyn TextGenerator> = match config.backend.as_str() {
            "gemini" => Box::new(providers::gemini::GeminiProvider::new(config)?),
            "remote" => Box::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        Self::with_generator(config.backend.clone(), generator)
    }

    pub fn with_generator(backend: impl Into<String>, generator: Box<dyn TextGenerator>) -> Result<Self, LlmError> {
        Ok(Self {
            generator,
            prompts: PromptBuilder::new()?,
            backend: backend.into(),
        })
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub async fn generate_sql(
        &self,
        question: &str,
        schema: &SchemaDescription,
    ) -> Result<GeneratedQuery, LlmError> {
        let prompt = self.prompts.render(question, schema)?;

        info!("Requesting SQL from {} backend", self.backend);
        let raw = self.generator.generate(&prompt).await?;
        debug!("Raw model output: {}", raw);

        let sql = extract::extract_sql(Some(&raw)).ok_or(LlmError::NoExtractableQuery)?;
        Ok(GeneratedQuery {
            question: question.to_string(),
            sql,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Replays a canned completion and remembers the prompts it was given.
    #[derive(Clone, Default)]
    pub struct CannedGenerator {
        pub reply: Option<String>,
        pub prompts: Arc<Mutex<Vec<String>>>,
    }

    impl CannedGenerator {
        pub fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                prompts: Arc::default(),
            }
        }

        pub fn failing() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply
                .clone()
                .ok_or_else(|| LlmError::ResponseError("API responded with status code: 503".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::CannedGenerator;
    use super::*;

    fn schema() -> SchemaDescription {
        [("users", vec!["id".to_string(), "email".to_string()])].into_iter().collect()
    }

    #[tokio::test]
    async fn pipeline_builds_prompt_and_extracts_statement() {
        let generator = CannedGenerator::replying("```sql\nSELECT email FROM users;\n```");
        let prompts = generator.prompts.clone();
        let manager = LlmManager::with_generator("test", Box::new(generator)).unwrap();

        let generated = manager.generate_sql("list emails", &schema()).await.unwrap();
        assert_eq!(generated.sql, "SELECT email FROM users;");
        assert_eq!(generated.question, "list emails");

        let seen = prompts.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("users(id, email)"));
        assert!(seen[0].contains("\"list emails\""));
    }

    #[tokio::test]
    async fn refusal_is_an_extraction_error() {
        let manager = LlmManager::with_generator("test", Box::new(CannedGenerator::replying("I cannot help"))).unwrap();
        let err = manager.generate_sql("drop everything", &schema()).await.unwrap_err();
        assert!(matches!(err, LlmError::NoExtractableQuery));
    }

    #[tokio::test]
    async fn upstream_failure_is_not_retried() {
        let generator = CannedGenerator::failing();
        let prompts = generator.prompts.clone();
        let manager = LlmManager::with_generator("test", Box::new(generator)).unwrap();

        assert!(matches!(
            manager.generate_sql("anything", &schema()).await,
            Err(LlmError::ResponseError(_))
        ));
        assert_eq!(prompts.lock().unwrap().len(), 1);
    }

    #[test]
    fn unknown_backend_is_a_config_error() {
        let config = LlmConfig {
            backend: "local".to_string(),
            model: "sqlcoder".to_string(),
            api_key: None,
            api_url: None,
        };
        assert!(matches!(LlmManager::new(&config), Err(LlmError::ConfigError(_))));
    }
}
