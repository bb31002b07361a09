use crate::stats::{sigmoid, weighted_harmonic_mean, GaussianKde};
use crate::text::{char_similarity, token_similarity};
use async_trait::async_trait;
use litmus_core::model::{Conversation, Extensible, TestCase};
use litmus_core::providers::embedder::{cosine_similarity_f64, mean_pool};
use litmus_core::providers::gpu::GpuService;
use litmus_core::strategy_api::{Strategy, StrategyScore};
use std::sync::Arc;

/// Perplexity at or above this maps to a fluency signal of 0.
pub const MAX_PERPLEXITY: f64 = 1000.0;

const W_PERPLEXITY: f64 = 0.4;
const W_SLOR: f64 = 0.3;
const W_SIMILARITY: f64 = 0.3;

fn language(tc: &TestCase) -> &str {
    tc.response
        .as_ref()
        .map(|r| r.language.as_str())
        .unwrap_or(tc.prompt.language.as_str())
}

fn raw_field<'a>(tc: &'a TestCase, key: &str) -> Option<&'a serde_json::Value> {
    tc.response
        .as_ref()
        .and_then(|r| r.fields().get(key))
        .or_else(|| tc.prompt.fields().get(key))
}

/// Log-scaled perplexity mapped to [0, 1], lower perplexity is better.
pub fn perplexity_score(ppl: f64) -> f64 {
    if !ppl.is_finite() {
        return 0.0;
    }
    (1.0 - ppl.max(1.0).ln() / MAX_PERPLEXITY.ln()).clamp(0.0, 1.0)
}

/// Perplexity-based fluency for Indian-language replies, blended with
/// closeness to the reference answer.
pub struct Fluency {
    gpu: Arc<dyn GpuService>,
}

impl Fluency {
    pub fn new(gpu: Arc<dyn GpuService>) -> Self {
        Self { gpu }
    }

    /// Perplexities of the reference corpus: given as numbers, or as texts
    /// to be scored by the GPU service.
    async fn reference_perplexities(&self, tc: &TestCase, lang: &str) -> anyhow::Result<Vec<f64>> {
        let Some(serde_json::Value::Array(items)) = raw_field(tc, "reference_corpus") else {
            return Ok(vec![]);
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                serde_json::Value::Number(n) => out.extend(n.as_f64()),
                serde_json::Value::String(s) => out.push(self.gpu.perplexity(s, lang).await?),
                _ => {}
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Strategy for Fluency {
    fn name(&self) -> &'static str {
        "fluency"
    }

    async fn evaluate(&self, tc: &TestCase, conv: &Conversation) -> anyhow::Result<StrategyScore> {
        let lang = language(tc);
        let text = conv.agent_response.trim();
        if text.is_empty() {
            return Ok(StrategyScore::fail("empty reply"));
        }
        let ppl = self.gpu.perplexity(text, lang).await?;
        let slor = self.gpu.slor(text, lang).await?;
        let similarity = tc.expected_text().map(|e| char_similarity(text, e.trim()));

        let mut signals = vec![(perplexity_score(ppl), W_PERPLEXITY), (sigmoid(slor), W_SLOR)];
        if let Some(s) = similarity {
            signals.push((s, W_SIMILARITY));
        }
        let score = weighted_harmonic_mean(&signals);

        let reference = self.reference_perplexities(tc, lang).await?;
        let percentile = GaussianKde::fit(&reference).map(|kde| kde.cdf(ppl));

        let mut reason = format!("fluency {:.2} (perplexity {:.1}, slor {:.2})", score, ppl, slor);
        if let Some(p) = percentile {
            reason.push_str(&format!(", perplexity percentile {:.0}%", p * 100.0));
        }
        Ok(StrategyScore::new(score, reason).with_details(serde_json::json!({
            "perplexity": ppl,
            "slor": slor,
            "similarity": similarity,
            "reference_size": reference.len(),
            "perplexity_percentile": percentile,
            "language": lang,
        })))
    }
}

const W_HIDDEN: f64 = 0.6;
const W_TOKENS: f64 = 0.4;

/// Grammar check against a corrected reference: hidden-state similarity
/// plus token edit similarity.
pub struct GrammaticalCheck {
    gpu: Arc<dyn GpuService>,
}

impl GrammaticalCheck {
    pub fn new(gpu: Arc<dyn GpuService>) -> Self {
        Self { gpu }
    }
}

#[async_trait]
impl Strategy for GrammaticalCheck {
    fn name(&self) -> &'static str {
        "grammatical_check"
    }

    async fn evaluate(&self, tc: &TestCase, conv: &Conversation) -> anyhow::Result<StrategyScore> {
        let expected = tc
            .expected_text()
            .ok_or_else(|| anyhow::anyhow!("grammatical_check needs a reference text"))?;
        let lang = language(tc);
        let text = conv.agent_response.trim();
        if text.is_empty() {
            return Ok(StrategyScore::fail("empty reply"));
        }

        let a = self.gpu.hidden(text, lang).await?;
        let b = self.gpu.hidden(expected, lang).await?;
        let (pa, pb) = mean_pool(&a)
            .zip(mean_pool(&b))
            .ok_or_else(|| anyhow::anyhow!("GPU service returned empty or ragged hidden states"))?;
        let hidden = cosine_similarity_f64(&pa, &pb)?.clamp(0.0, 1.0);
        let tokens = token_similarity(text, expected.trim());
        let score = weighted_harmonic_mean(&[(hidden, W_HIDDEN), (tokens, W_TOKENS)]);

        Ok(StrategyScore::new(
            score,
            format!("grammar {:.2} (hidden {:.2}, tokens {:.2})", score, hidden, tokens),
        )
        .with_details(serde_json::json!({
            "hidden_similarity": hidden,
            "token_similarity": tokens,
            "language": lang,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{case, conv, FakeGpu};

    #[test]
    fn perplexity_mapping() {
        assert_eq!(perplexity_score(1.0), 1.0);
        assert_eq!(perplexity_score(0.5), 1.0);
        assert_eq!(perplexity_score(5000.0), 0.0);
        assert!(perplexity_score(10.0) > perplexity_score(100.0));
        assert_eq!(perplexity_score(f64::NAN), 0.0);
    }

    #[tokio::test]
    async fn fluent_reply_scores_high_and_reports_percentile() {
        let gpu = FakeGpu {
            default_perplexity: 10.0,
            slor: 3.0,
            ..Default::default()
        };
        let mut tc = case("अपना परिचय दें", Some("मेरा नाम राम है"));
        if let Some(r) = tc.response.as_mut() {
            r.set_field("reference_corpus", serde_json::json!([8.0, 12.0, 9.0, 30.0]));
        }
        let r = Fluency::new(Arc::new(gpu))
            .evaluate(&tc, &conv("मेरा नाम राम है"))
            .await
            .unwrap();
        assert!(r.score > 0.6, "{}", r.reason);
        let pct = r.details["perplexity_percentile"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&pct));
        assert_eq!(r.details["reference_size"], 4);
    }

    #[tokio::test]
    async fn grammar_identical_text_is_perfect() {
        let gpu = Arc::new(FakeGpu::default());
        let tc = case("fix this", Some("She goes to school"));
        let r = GrammaticalCheck::new(gpu.clone())
            .evaluate(&tc, &conv("She goes to school"))
            .await
            .unwrap();
        assert!((r.score - 1.0).abs() < 1e-9);

        let worse = GrammaticalCheck::new(gpu)
            .evaluate(&tc, &conv("She go to school"))
            .await
            .unwrap();
        assert!(worse.score < r.score);
    }
}
