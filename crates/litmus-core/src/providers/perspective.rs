use async_trait::async_trait;
use serde_json::json;

#[async_trait]
pub trait ToxicityScorer: Send + Sync {
    /// Toxicity probability in [0, 1].
    async fn toxicity(&self, text: &str) -> anyhow::Result<f64>;
}

pub const PERSPECTIVE_URL: &str =
    "https://commentanalyzer.googleapis.com/v1alpha1/comments:analyze";

pub struct PerspectiveClient {
    pub api_key: String,
    pub url: String,
    pub client: reqwest::Client,
}

impl PerspectiveClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            url: PERSPECTIVE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

pub fn parse_toxicity(v: &serde_json::Value) -> anyhow::Result<f64> {
    v.pointer("/attributeScores/TOXICITY/summaryScore/value")
        .and_then(|x| x.as_f64())
        .ok_or_else(|| anyhow::anyhow!("Perspective response missing TOXICITY summary score"))
}

#[async_trait]
impl ToxicityScorer for PerspectiveClient {
    async fn toxicity(&self, text: &str) -> anyhow::Result<f64> {
        let body = json!({
            "comment": { "text": text },
            "languages": ["en"],
            "requestedAttributes": { "TOXICITY": {} },
        });
        let resp = self
            .client
            .post(&self.url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Perspective API error: {}", error_text);
        }
        let json: serde_json::Value = resp.json().await?;
        parse_toxicity(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_summary_score() {
        let v = json!({"attributeScores": {"TOXICITY": {"summaryScore": {"value": 0.42, "type": "PROBABILITY"}}}});
        assert_eq!(parse_toxicity(&v).unwrap(), 0.42);
        assert!(parse_toxicity(&json!({})).is_err());
    }
}
