use async_trait::async_trait;
use litmus_core::model::{Conversation, TestCase};
use litmus_core::providers::llm::{extract_json_object, LlmClient};
use litmus_core::strategy_api::{Strategy, StrategyScore};
use std::sync::Arc;

pub const MAX_JUDGE_SCORE: f64 = 10.0;

const JUDGE_SYSTEM: &str = "You are a strict evaluator. Judge the assistant output against the \
criteria. Respond only with JSON: {\"score\": <integer 0-10>, \"reason\": \"<one sentence>\"}.";

/// G-Eval style rubric scoring by a judge model.
pub struct LlmJudge {
    llm: Arc<dyn LlmClient>,
}

impl LlmJudge {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub fn judge_prompt(criteria: &str, tc: &TestCase, actual: &str) -> String {
        let mut p = format!(
            "Criteria:\n{}\n\nInput:\n{}\n\nActual output:\n{}\n",
            criteria.trim(),
            tc.prompt.full_text(),
            actual
        );
        if let Some(expected) = tc.expected_text() {
            p.push_str(&format!("\nExpected output:\n{}\n", expected));
        }
        p
    }
}

/// `(normalised score, reason)` from the judge's JSON reply.
pub fn parse_verdict(text: &str) -> anyhow::Result<(f64, String)> {
    let v = extract_json_object(text)
        .ok_or_else(|| anyhow::anyhow!("judge reply has no JSON object: {}", text.trim()))?;
    let raw = v
        .get("score")
        .and_then(|s| s.as_f64().or_else(|| s.as_str().and_then(|x| x.trim().parse().ok())))
        .ok_or_else(|| anyhow::anyhow!("judge reply has no numeric score"))?;
    let reason = v
        .get("reason")
        .and_then(|r| r.as_str())
        .unwrap_or("")
        .to_string();
    Ok(((raw / MAX_JUDGE_SCORE).clamp(0.0, 1.0), reason))
}

#[async_trait]
impl Strategy for LlmJudge {
    fn name(&self) -> &'static str {
        "llm_judge"
    }

    async fn evaluate(&self, tc: &TestCase, conv: &Conversation) -> anyhow::Result<StrategyScore> {
        let criteria = tc
            .judge_prompt
            .as_ref()
            .map(|j| j.prompt.as_str())
            .or_else(|| tc.field_str("criteria"))
            .ok_or_else(|| anyhow::anyhow!("llm_judge needs a judge prompt"))?;
        let prompt = Self::judge_prompt(criteria, tc, &conv.agent_response);
        let out = self.llm.complete(&prompt, Some(JUDGE_SYSTEM)).await?;
        let (raw, reason) = parse_verdict(&out.text)?;

        // negative rubrics score the presence of something undesirable
        let negative = tc
            .field_str("eval_type")
            .is_some_and(|t| t.eq_ignore_ascii_case("negative"));
        let score = if negative { 1.0 - raw } else { raw };

        Ok(StrategyScore::new(score, reason).with_details(serde_json::json!({
            "raw_score": raw,
            "negative": negative,
            "judge_model": out.model,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{case, conv};
    use litmus_core::model::{Extensible, LlmJudgePrompt};
    use litmus_core::providers::llm::fake::FakeClient;

    fn judged(eval_type: Option<&str>) -> TestCase {
        let mut tc = case("Explain photosynthesis", None);
        tc.judge_prompt = Some(LlmJudgePrompt {
            id: None,
            prompt: "Is the explanation accurate?".into(),
        });
        if let Some(t) = eval_type {
            tc.prompt.set_field("eval_type", serde_json::json!(t));
        }
        tc
    }

    #[test]
    fn verdict_parsing() {
        let (s, r) = parse_verdict("```json\n{\"score\": 7, \"reason\": \"ok\"}\n```").unwrap();
        assert!((s - 0.7).abs() < 1e-9);
        assert_eq!(r, "ok");
        assert_eq!(parse_verdict(r#"{"score": "12"}"#).unwrap().0, 1.0);
        assert!(parse_verdict("seven").is_err());
    }

    #[tokio::test]
    async fn negative_eval_inverts() {
        let llm = Arc::new(FakeClient::new(vec![r#"{"score": 8, "reason": "mostly"}"#]));
        let s = LlmJudge::new(llm.clone());
        let pos = s.evaluate(&judged(None), &conv("Plants use light")).await.unwrap();
        assert!((pos.score - 0.8).abs() < 1e-9);
        let neg = s.evaluate(&judged(Some("negative")), &conv("Plants use light")).await.unwrap();
        assert!((neg.score - 0.2).abs() < 1e-9);
        assert!(llm.prompts.lock().unwrap()[0].contains("Is the explanation accurate?"));
    }

    #[tokio::test]
    async fn missing_criteria_is_an_error() {
        let s = LlmJudge::new(Arc::new(FakeClient::new(vec!["{}"])));
        assert!(s.evaluate(&case("q", None), &conv("a")).await.is_err());
    }
}
