use super::LlmClient;
use crate::model::LlmResponse;
use async_trait::async_trait;
use std::sync::Mutex;

/// Scripted client: replies are returned in order, the last one repeats.
pub struct FakeClient {
    replies: Vec<String>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeClient {
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: replies.into_iter().map(str::to_string).collect(),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LlmClient for FakeClient {
    async fn complete(&self, prompt: &str, _system: Option<&str>) -> anyhow::Result<LlmResponse> {
        let mut seen = self.prompts.lock().unwrap_or_else(|e| e.into_inner());
        seen.push(prompt.to_string());
        let idx = (seen.len() - 1).min(self.replies.len().saturating_sub(1));
        let text = self
            .replies
            .get(idx)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("fake client has no scripted replies"))?;
        Ok(LlmResponse {
            text,
            provider: "fake".into(),
            model: "fake".into(),
            meta: serde_json::json!({}),
        })
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }

    fn model(&self) -> &str {
        "fake"
    }
}
