use async_trait::async_trait;
use serde_json::json;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
    fn model_id(&self) -> &str;
}

pub struct OllamaEmbedder {
    pub base_url: String,
    pub model: String,
    pub client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let resp = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&json!({ "model": self.model, "prompt": text }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ollama embeddings API error: {}", error_text);
        }

        let json: serde_json::Value = resp.json().await?;
        let arr = json
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow::anyhow!("Ollama embeddings response missing 'embedding'"))?;
        arr.iter()
            .map(|x| {
                x.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| anyhow::anyhow!("embedding contains non-numeric value"))
            })
            .collect()
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> anyhow::Result<f64> {
    let af: Vec<f64> = a.iter().map(|x| *x as f64).collect();
    let bf: Vec<f64> = b.iter().map(|x| *x as f64).collect();
    cosine_similarity_f64(&af, &bf)
}

pub fn cosine_similarity_f64(a: &[f64], b: &[f64]) -> anyhow::Result<f64> {
    if a.is_empty() || a.len() != b.len() {
        anyhow::bail!("embedding dims mismatch (a={}, b={})", a.len(), b.len());
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        anyhow::bail!("zero-norm embedding");
    }
    Ok(dot / denom)
}

/// Element-wise mean of token vectors.
pub fn mean_pool(rows: &[Vec<f64>]) -> Option<Vec<f64>> {
    let first = rows.first()?;
    let mut out = vec![0.0; first.len()];
    for r in rows {
        if r.len() != out.len() {
            return None;
        }
        for (o, v) in out.iter_mut().zip(r) {
            *o += v;
        }
    }
    let n = rows.len() as f64;
    out.iter_mut().for_each(|o| *o /= n);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_is_one() -> anyhow::Result<()> {
        let s = cosine_similarity(&[1.0, 2.0, 0.0], &[1.0, 2.0, 0.0])?;
        assert!((s - 1.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn cosine_rejects_mismatch_and_zero() {
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).is_err());
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).is_err());
    }

    #[test]
    fn mean_pool_averages_rows() {
        let m = mean_pool(&[vec![1.0, 3.0], vec![3.0, 5.0]]).unwrap();
        assert_eq!(m, vec![2.0, 4.0]);
        assert!(mean_pool(&[]).is_none());
        assert!(mean_pool(&[vec![1.0], vec![1.0, 2.0]]).is_none());
    }
}
