use crate::config::LlmConfig;
use crate::llm::{LlmError, TextGenerator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

pub struct OllamaProvider {
    client: reqwest::Client,
    api_url: String,
    model: String,
}

#[derive(Serialize, Debug)]
struct OllamaRequest {
    model: String,
    prompt: String,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    response: String,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434/api/generate".to_string());

        Ok(Self {
            client: reqwest::Client::new(),
            api_url,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaProvider {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        info!("Sending request to Ollama with model: {}", self.model);
        debug!("API URL: {}", self.api_url);

        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            temperature: 0.1,
            stream: false,
        };

        let response = self
            .client
            .post(&self.api_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            error!("Ollama API responded with status code: {} - {}", status, error_body);
            return Err(LlmError::ResponseError(format!(
                "Ollama API responded with status code: {}",
                status
            )));
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| LlmError::ResponseError(format!("Failed to read response body: {}", e)))?;

        let ollama_response: OllamaResponse = serde_json::from_str(&response_text).map_err(|e| {
            error!("Failed to parse Ollama response: {} - Response was: {}", e, response_text);
            LlmError::ResponseError(format!("Failed to parse Ollama response: {}", e))
        })?;

        Ok(ollama_response.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_local_endpoint() {
        let provider = OllamaProvider::new(&LlmConfig {
            backend: "ollama".to_string(),
            model: "sqlcoder".to_string(),
            api_key: None,
            api_url: None,
        })
        .unwrap();
        assert_eq!(provider.api_url, "http://localhost:11434/api/generate");
    }

    #[test]
    fn ignores_extra_response_fields() {
        let parsed: OllamaResponse = serde_json::from_str(
            r#"{"model":"sqlcoder","created_at":"2024-01-01T00:00:00Z","response":"SELECT 1 FROM t;","done":true}"#,
        )
        .unwrap();
        assert_eq!(parsed.response, "SELECT 1 FROM t;");
    }

    #[test]
    fn streaming_is_disabled() {
        let request = OllamaRequest {
            model: "m".to_string(),
            prompt: "p".to_string(),
            temperature: 0.1,
            stream: false,
        };
        assert_eq!(serde_json::to_value(&request).unwrap()["stream"], false);
    }
}
