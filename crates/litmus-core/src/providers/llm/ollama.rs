use super::LlmClient;
use crate::model::LlmResponse;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

pub struct OllamaClient {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: 0.0,
            client,
        }
    }

    fn request_body(&self, prompt: &str, system: Option<&str>) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": self.temperature },
        });
        if let Some(sys) = system {
            body["system"] = json!(sys);
        }
        body
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, prompt: &str, system: Option<&str>) -> anyhow::Result<LlmResponse> {
        let url = format!("{}/api/generate", self.base_url);
        tracing::debug!(event = "ollama.generate", model = %self.model, prompt_len = prompt.len());

        let resp = self
            .client
            .post(&url)
            .json(&self.request_body(prompt, system))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ollama generate API error ({}): {}", status, error_text);
        }

        let json: serde_json::Value = resp.json().await?;
        let text = json
            .get("response")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Ollama API response missing 'response' field"))?
            .to_string();

        Ok(LlmResponse {
            text,
            provider: "ollama".to_string(),
            model: self.model.clone(),
            meta: json!({
                "eval_count": json.get("eval_count"),
                "total_duration": json.get("total_duration"),
            }),
        })
    }

    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_is_non_streaming_and_carries_system() {
        let c = OllamaClient::new("http://localhost:11434/", "llama3");
        assert_eq!(c.base_url, "http://localhost:11434");
        let body = c.request_body("hi", Some("judge"));
        assert_eq!(body["stream"], false);
        assert_eq!(body["system"], "judge");
        assert!(c.request_body("hi", None).get("system").is_none());
    }
}
