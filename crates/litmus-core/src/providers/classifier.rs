use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

#[async_trait]
pub trait TextClassifier: Send + Sync {
    /// Scores for every label, highest first.
    async fn classify(&self, model: &str, text: &str) -> anyhow::Result<Vec<LabelScore>>;
}

/// Probability assigned to any of `labels` (case-insensitive), 0.0 if absent.
pub fn probability_of(scores: &[LabelScore], labels: &[&str]) -> f64 {
    scores
        .iter()
        .filter(|s| labels.iter().any(|l| s.label.eq_ignore_ascii_case(l)))
        .map(|s| s.score)
        .fold(0.0, f64::max)
}

pub fn top_label(scores: &[LabelScore]) -> Option<&LabelScore> {
    scores
        .iter()
        .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
}

/// Hosted text-classification endpoint in the HuggingFace inference shape:
/// `POST {base}/{model}` with `{"inputs": text}`.
pub struct HttpClassifier {
    pub base_url: String,
    pub token: Option<String>,
    pub client: reqwest::Client,
}

impl HttpClassifier {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }
}

/// Accepts both `[[{label, score}]]` and `[{label, score}]`.
pub fn parse_classification(v: &serde_json::Value) -> anyhow::Result<Vec<LabelScore>> {
    let inner = match v.as_array().and_then(|a| a.first()) {
        Some(serde_json::Value::Array(_)) => &v[0],
        _ => v,
    };
    let mut out: Vec<LabelScore> = serde_json::from_value(inner.clone())
        .map_err(|e| anyhow::anyhow!("malformed classifier output: {}", e))?;
    out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(out)
}

#[async_trait]
impl TextClassifier for HttpClassifier {
    async fn classify(&self, model: &str, text: &str) -> anyhow::Result<Vec<LabelScore>> {
        let mut req = self
            .client
            .post(format!("{}/{}", self.base_url, model))
            .json(&json!({ "inputs": text, "options": { "wait_for_model": true } }));
        if let Some(t) = &self.token {
            req = req.header("Authorization", format!("Bearer {}", t));
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("classifier API error ({}): {}", model, error_text);
        }
        let json: serde_json::Value = resp.json().await?;
        parse_classification(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_and_flat_shapes() -> anyhow::Result<()> {
        let nested = json!([[{"label": "a", "score": 0.2}, {"label": "b", "score": 0.8}]]);
        let flat = json!([{"label": "a", "score": 0.2}, {"label": "b", "score": 0.8}]);
        let n = parse_classification(&nested)?;
        let f = parse_classification(&flat)?;
        assert_eq!(n, f);
        assert_eq!(n[0].label, "b");
        assert!(parse_classification(&json!({"error": "loading"})).is_err());
        Ok(())
    }

    #[test]
    fn probability_lookup() {
        let s = vec![
            LabelScore { label: "BIASED".into(), score: 0.7 },
            LabelScore { label: "neutral".into(), score: 0.3 },
        ];
        assert_eq!(probability_of(&s, &["biased"]), 0.7);
        assert_eq!(probability_of(&s, &["toxic"]), 0.0);
        assert_eq!(top_label(&s).map(|l| l.label.as_str()), Some("BIASED"));
    }
}
