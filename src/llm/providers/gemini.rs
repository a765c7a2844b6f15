use crate::config::LlmConfig;
use crate::llm::{LlmError, TextGenerator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Google Generative Language `generateContent`.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

#[derive(Serialize, Debug)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Debug)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

impl GeminiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            LlmError::ConfigError("API key is required for the gemini backend".to_string())
        })?;

        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| format!("{}/{}:generateContent", DEFAULT_API_BASE, config.model));

        Ok(Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
        })
    }
}

fn first_text(response: GenerateResponse) -> Option<String> {
    response
        .candidates
        .into_iter()
        .next()?
        .content
        .parts
        .into_iter()
        .next()?
        .text
        .map(|t| t.trim().to_string())
}

#[async_trait]
impl TextGenerator for GeminiProvider {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        info!("Sending request to Gemini");
        debug!("API URL: {}", self.api_url);

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
        };

        let response = self
            .client
            .post(&self.api_url)
            .query(&[("key", &self.api_key)])
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            error!("Gemini API responded with status code: {} - {}", status, error_body);
            return Err(LlmError::ResponseError(format!(
                "Gemini API responded with status code: {}",
                status
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseError(e.to_string()))?;

        // An empty candidate list is passed on as empty text; extraction reports it
        Ok(first_text(body).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_first_candidate_part() {
        let body: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"  SELECT 1 FROM t;\n"}],"role":"model"}}]}"#,
        )
        .unwrap();
        assert_eq!(first_text(body), Some("SELECT 1 FROM t;".to_string()));

        let empty: GenerateResponse = serde_json::from_str(r#"{"promptFeedback":{}}"#).unwrap();
        assert_eq!(first_text(empty), None);
    }

    #[test]
    fn default_url_uses_model_name() {
        let provider = GeminiProvider::new(&LlmConfig {
            backend: "gemini".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key: Some("k".to_string()),
            api_url: None,
        })
        .unwrap();
        assert!(provider.api_url.ends_with("/models/gemini-2.0-flash:generateContent"));
    }

    #[test]
    fn missing_key_is_rejected() {
        let result = GeminiProvider::new(&LlmConfig {
            backend: "gemini".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key: None,
            api_url: None,
        });
        assert!(matches!(result, Err(LlmError::ConfigError(_))));
    }
}
