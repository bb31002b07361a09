use crate::text::normalize_answer;
use async_trait::async_trait;
use litmus_core::model::{Conversation, TestCase};
use litmus_core::providers::embedder::{cosine_similarity, Embedder};
use litmus_core::strategy_api::{Strategy, StrategyScore};
use std::sync::Arc;

/// Embedding cosine between reply and expected response.
pub struct Similarity {
    embedder: Arc<dyn Embedder>,
}

impl Similarity {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl Strategy for Similarity {
    fn name(&self) -> &'static str {
        "similarity"
    }

    async fn evaluate(&self, tc: &TestCase, conv: &Conversation) -> anyhow::Result<StrategyScore> {
        let expected = tc
            .expected_text()
            .ok_or_else(|| anyhow::anyhow!("similarity needs an expected response"))?;
        let a = self.embedder.embed(&conv.agent_response).await?;
        let b = self.embedder.embed(expected).await?;
        let score = cosine_similarity(&a, &b)?.clamp(0.0, 1.0);
        Ok(StrategyScore::new(score, format!("cosine similarity {:.3}", score)).with_details(
            serde_json::json!({ "model": self.embedder.model_id(), "dims": a.len() }),
        ))
    }
}

/// Normalised equality with the expected response.
pub struct ExactMatch;

#[async_trait]
impl Strategy for ExactMatch {
    fn name(&self) -> &'static str {
        "exact_match"
    }

    async fn evaluate(&self, tc: &TestCase, conv: &Conversation) -> anyhow::Result<StrategyScore> {
        let expected = tc
            .expected_text()
            .ok_or_else(|| anyhow::anyhow!("exact_match needs an expected response"))?;
        if normalize_answer(&conv.agent_response) == normalize_answer(expected) {
            Ok(StrategyScore::pass("exact match"))
        } else {
            Ok(StrategyScore::fail(format!("expected '{}'", expected)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{case, conv, CharEmbedder};

    #[tokio::test]
    async fn similarity_bounds() {
        let s = Similarity::new(Arc::new(CharEmbedder));
        let tc = case("q", Some("abc"));
        let same = s.evaluate(&tc, &conv("cab")).await.unwrap();
        assert!((same.score - 1.0).abs() < 1e-6);
        let diff = s.evaluate(&tc, &conv("xyz")).await.unwrap();
        assert_eq!(diff.score, 0.0);
    }

    #[tokio::test]
    async fn exact_match_ignores_case_and_punctuation() {
        let tc = case("q", Some("The Paris"));
        assert_eq!(ExactMatch.evaluate(&tc, &conv("paris!")).await.unwrap().score, 1.0);
        assert_eq!(ExactMatch.evaluate(&tc, &conv("london")).await.unwrap().score, 0.0);
        assert!(ExactMatch.evaluate(&case("q", None), &conv("x")).await.is_err());
    }
}
