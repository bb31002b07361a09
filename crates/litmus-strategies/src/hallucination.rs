use crate::text::normalize_answer;
use async_trait::async_trait;
use litmus_core::model::{Conversation, TestCase};
use litmus_core::strategy_api::{Strategy, StrategyScore};
use regex::Regex;
use std::sync::OnceLock;

pub const DEFAULT_SOURCE_TYPE: &str = "halu_qa";

fn choice_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:answer\s*(?:is)?\s*[:\-]?\s*)?\(?([a-e])(?:[\).:\s]|$)").unwrap()
    })
}

fn yes_no(response: &str) -> String {
    let lowered = response.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    match words.first() {
        Some(&"yes") => return "yes".into(),
        Some(&"no") => return "no".into(),
        _ => {}
    }
    match (words.contains(&"yes"), words.contains(&"no")) {
        (true, false) => "yes".into(),
        (false, true) => "no".into(),
        _ => String::new(),
    }
}

/// Reads the model's verdict out of its reply. Yes/no datasets
/// (`halu_qa`, `halu_dialogue`, `halu_summary`) yield "yes", "no" or "";
/// `mc` yields the lowercase choice letter; anything else the normalised text.
pub fn extract_prediction(response: &str, source_type: &str) -> String {
    match source_type {
        "halu_qa" | "halu_dialogue" | "halu_summary" => yes_no(response),
        "mc" => choice_re()
            .captures(response)
            .map(|c| c[1].to_lowercase())
            .unwrap_or_default(),
        _ => normalize_answer(response),
    }
}

pub struct Hallucination;

#[async_trait]
impl Strategy for Hallucination {
    fn name(&self) -> &'static str {
        "hallucination"
    }

    async fn evaluate(&self, tc: &TestCase, conv: &Conversation) -> anyhow::Result<StrategyScore> {
        let source_type = tc.field_str("source_type").unwrap_or(DEFAULT_SOURCE_TYPE);
        let expected = tc
            .expected_text()
            .ok_or_else(|| anyhow::anyhow!("hallucination needs an expected response"))?;
        let prediction = extract_prediction(&conv.agent_response, source_type);
        let gold = match source_type {
            "mc" => expected.trim().to_lowercase(),
            _ => normalize_answer(expected),
        };
        let score = if !prediction.is_empty() && prediction == gold { 1.0 } else { 0.0 };
        Ok(StrategyScore::new(
            score,
            format!("prediction '{}' vs expected '{}' ({})", prediction, gold, source_type),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{case, conv};
    use litmus_core::model::Extensible;

    #[test]
    fn yes_no_extraction() {
        assert_eq!(extract_prediction("Yes", "halu_qa"), "yes");
        assert_eq!(extract_prediction("  no, that's made up", "halu_dialogue"), "no");
        assert_eq!(extract_prediction("I would say yes.", "halu_summary"), "yes");
        assert_eq!(extract_prediction("yes and no", "halu_qa"), "yes");
        assert_eq!(extract_prediction("unsure", "halu_qa"), "");
    }

    #[test]
    fn multiple_choice_extraction() {
        assert_eq!(extract_prediction("(B) because...", "mc"), "b");
        assert_eq!(extract_prediction("Answer: c", "mc"), "c");
        assert_eq!(extract_prediction("because", "mc"), "");
    }

    #[tokio::test]
    async fn yes_matches_lowercase_expected() {
        let mut tc = case("Is this made up?", Some("yes"));
        tc.prompt.set_field("source_type", serde_json::json!("halu_qa"));
        let r = Hallucination.evaluate(&tc, &conv("Yes")).await.unwrap();
        assert_eq!(r.score, 1.0);
    }
}
