use async_trait::async_trait;
use serde_json::json;

/// Remote GPU microservice hosting the language models the fluency,
/// grammar and safety scorers need.
#[async_trait]
pub trait GpuService: Send + Sync {
    async fn perplexity(&self, text: &str, language: &str) -> anyhow::Result<f64>;
    async fn slor(&self, text: &str, language: &str) -> anyhow::Result<f64>;
    /// Per-token hidden states of the final layer.
    async fn hidden(&self, text: &str, language: &str) -> anyhow::Result<Vec<Vec<f64>>>;
    /// Probability that the exchange is unsafe.
    async fn safety_eval(&self, prompt: &str, response: &str) -> anyhow::Result<f64>;
    async fn translate(&self, text: &str, source: &str, target: &str) -> anyhow::Result<String>;
}

pub struct HttpGpuService {
    pub base_url: String,
    pub client: reqwest::Client,
}

impl HttpGpuService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("GPU service {} error: {}", path, error_text);
        }
        Ok(resp.json().await?)
    }
}

fn number_field(v: &serde_json::Value, key: &str, path: &str) -> anyhow::Result<f64> {
    v.get(key)
        .and_then(|x| x.as_f64())
        .ok_or_else(|| anyhow::anyhow!("GPU service {} response missing '{}'", path, key))
}

#[async_trait]
impl GpuService for HttpGpuService {
    async fn perplexity(&self, text: &str, language: &str) -> anyhow::Result<f64> {
        let v = self
            .post("/perplexity", json!({ "text": text, "language": language }))
            .await?;
        number_field(&v, "perplexity", "/perplexity")
    }

    async fn slor(&self, text: &str, language: &str) -> anyhow::Result<f64> {
        let v = self
            .post("/slor", json!({ "text": text, "language": language }))
            .await?;
        number_field(&v, "slor", "/slor")
    }

    async fn hidden(&self, text: &str, language: &str) -> anyhow::Result<Vec<Vec<f64>>> {
        let v = self
            .post("/hidden", json!({ "text": text, "language": language }))
            .await?;
        let states = v
            .get("hidden_states")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("GPU service /hidden response missing 'hidden_states'"))?;
        Ok(serde_json::from_value(states)?)
    }

    async fn safety_eval(&self, prompt: &str, response: &str) -> anyhow::Result<f64> {
        let v = self
            .post("/safety_eval", json!({ "prompt": prompt, "response": response }))
            .await?;
        number_field(&v, "unsafe_probability", "/safety_eval")
    }

    async fn translate(&self, text: &str, source: &str, target: &str) -> anyhow::Result<String> {
        let v = self
            .post(
                "/translate",
                json!({ "text": text, "source": source, "target": target }),
            )
            .await?;
        v.get("translation")
            .and_then(|x| x.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("GPU service /translate response missing 'translation'"))
    }
}
