use crate::model::LlmResponse;
use async_trait::async_trait;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, system: Option<&str>) -> anyhow::Result<LlmResponse>;
    fn provider_name(&self) -> &'static str;
    fn model(&self) -> &str;
}

/// Pulls the first JSON object out of model output that may wrap it in
/// prose or a fenced block.
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_str = false;
    let mut escaped = false;
    for (i, ch) in text[start..].char_indices() {
        if in_str {
            match ch {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => in_str = false,
                _ => escaped = false,
            }
            continue;
        }
        match ch {
            '"' => in_str = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&text[start..start + i + 1]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

pub mod fake;
pub mod ollama;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_from_prose() {
        let v = extract_json_object("Sure! ```json\n{\"score\": 7, \"reason\": \"ok {fine}\"}\n``` done")
            .unwrap();
        assert_eq!(v["score"], 7);
        assert_eq!(v["reason"], "ok {fine}");
    }

    #[test]
    fn no_json_is_none() {
        assert!(extract_json_object("no braces here").is_none());
        assert!(extract_json_object("{ unterminated").is_none());
    }
}
