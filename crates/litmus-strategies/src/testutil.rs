use async_trait::async_trait;
use litmus_core::model::{Conversation, Prompt, Response, TestCase};
use litmus_core::providers::classifier::{LabelScore, TextClassifier};
use litmus_core::providers::embedder::Embedder;
use litmus_core::providers::gpu::GpuService;
use litmus_core::providers::perspective::ToxicityScorer;
use std::collections::BTreeMap;

pub fn case(prompt: &str, expected: Option<&str>) -> TestCase {
    TestCase {
        id: Some(1),
        name: "case".into(),
        prompt: Prompt::new(prompt),
        response: expected.map(Response::new),
        ..Default::default()
    }
}

pub fn conv(text: &str) -> Conversation {
    Conversation::with_response(text)
}

pub struct FixedClassifier(pub Vec<(&'static str, f64)>);

#[async_trait]
impl TextClassifier for FixedClassifier {
    async fn classify(&self, _model: &str, _text: &str) -> anyhow::Result<Vec<LabelScore>> {
        Ok(self
            .0
            .iter()
            .map(|(l, s)| LabelScore {
                label: l.to_string(),
                score: *s,
            })
            .collect())
    }
}

pub struct FixedToxicity(pub f64);

#[async_trait]
impl ToxicityScorer for FixedToxicity {
    async fn toxicity(&self, _text: &str) -> anyhow::Result<f64> {
        Ok(self.0)
    }
}

/// Perplexity keyed by exact text; hidden states are per-character one-hot-ish.
#[derive(Default)]
pub struct FakeGpu {
    pub perplexity: BTreeMap<String, f64>,
    pub default_perplexity: f64,
    pub slor: f64,
    pub unsafe_probability: f64,
}

#[async_trait]
impl GpuService for FakeGpu {
    async fn perplexity(&self, text: &str, _language: &str) -> anyhow::Result<f64> {
        Ok(self
            .perplexity
            .get(text)
            .copied()
            .unwrap_or(self.default_perplexity))
    }

    async fn slor(&self, _text: &str, _language: &str) -> anyhow::Result<f64> {
        Ok(self.slor)
    }

    async fn hidden(&self, text: &str, _language: &str) -> anyhow::Result<Vec<Vec<f64>>> {
        Ok(text.split_whitespace().map(bag_of_chars).collect())
    }

    async fn safety_eval(&self, _prompt: &str, _response: &str) -> anyhow::Result<f64> {
        Ok(self.unsafe_probability)
    }

    async fn translate(&self, text: &str, _source: &str, _target: &str) -> anyhow::Result<String> {
        Ok(text.to_string())
    }
}

fn bag_of_chars(text: &str) -> Vec<f64> {
    let mut v = vec![0.0; 27];
    for c in text.to_lowercase().chars() {
        let i = if c.is_ascii_lowercase() { (c as u8 - b'a') as usize } else { 26 };
        v[i] += 1.0;
    }
    v
}

pub struct CharEmbedder;

#[async_trait]
impl Embedder for CharEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(bag_of_chars(text).into_iter().map(|x| x as f32).collect())
    }

    fn model_id(&self) -> &str {
        "chars"
    }
}
