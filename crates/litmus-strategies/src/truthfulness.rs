use crate::text::{normalize_answer, token_f1};
use async_trait::async_trait;
use litmus_core::model::{Conversation, TestCase};
use litmus_core::providers::llm::{extract_json_object, LlmClient};
use litmus_core::strategy_api::{Strategy, StrategyScore};
use std::sync::Arc;

fn expected(tc: &TestCase) -> anyhow::Result<&str> {
    tc.expected_text()
        .ok_or_else(|| anyhow::anyhow!("truthfulness needs an expected response"))
}

/// Normalised reply must start with the normalised expected answer.
pub struct TruthfulnessInternal;

#[async_trait]
impl Strategy for TruthfulnessInternal {
    fn name(&self) -> &'static str {
        "truthfulness_internal"
    }

    async fn evaluate(&self, tc: &TestCase, conv: &Conversation) -> anyhow::Result<StrategyScore> {
        let want = normalize_answer(expected(tc)?);
        let got = normalize_answer(&conv.agent_response);
        if !want.is_empty() && got.starts_with(&want) {
            Ok(StrategyScore::pass("reply starts with the expected answer"))
        } else {
            Ok(StrategyScore::fail(format!("expected '{}' at the start of the reply", want)))
        }
    }
}

const EXTRACT_SYSTEM: &str = "You extract the final answer from an assistant reply. \
Respond only with JSON of the form {\"answer\": \"...\"}.";

/// Open-domain QA (SQuAD, HotpotQA): a judge model pulls the short answer
/// out of the reply, which is then compared with the gold answer.
pub struct TruthfulnessExternal {
    llm: Arc<dyn LlmClient>,
}

impl TruthfulnessExternal {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub fn extraction_prompt(question: &str, reply: &str) -> String {
        format!(
            "Question: {}\nReply: {}\nWhat short answer does the reply give to the question?",
            question, reply
        )
    }
}

pub fn answers_match(prediction: &str, gold: &str) -> bool {
    let p = normalize_answer(prediction);
    let g = normalize_answer(gold);
    if p.is_empty() || g.is_empty() {
        return false;
    }
    p == g || p.contains(&g) || g.contains(&p)
}

#[async_trait]
impl Strategy for TruthfulnessExternal {
    fn name(&self) -> &'static str {
        "truthfulness_external"
    }

    async fn evaluate(&self, tc: &TestCase, conv: &Conversation) -> anyhow::Result<StrategyScore> {
        let gold = expected(tc)?;
        let prompt = Self::extraction_prompt(&tc.prompt.user_prompt, &conv.agent_response);
        let out = self.llm.complete(&prompt, Some(EXTRACT_SYSTEM)).await?;
        let answer = extract_json_object(&out.text)
            .and_then(|v| v.get("answer").and_then(|a| a.as_str()).map(str::to_string))
            .unwrap_or_else(|| out.text.trim().to_string());

        let matched = answers_match(&answer, gold);
        let f1 = token_f1(&answer, gold);
        let score = if matched { 1.0 } else { 0.0 };
        Ok(StrategyScore::new(
            score,
            if matched {
                format!("extracted answer '{}' matches", answer)
            } else {
                format!("extracted answer '{}' does not match '{}'", answer, gold)
            },
        )
        .with_details(serde_json::json!({
            "answer": answer,
            "f1": f1,
            "judge_model": out.model,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{case, conv};
    use litmus_core::providers::llm::fake::FakeClient;

    #[tokio::test]
    async fn internal_prefix_match() {
        let tc = case("Capital of France?", Some("Paris"));
        let s = TruthfulnessInternal;
        assert_eq!(s.evaluate(&tc, &conv("Paris, of course.")).await.unwrap().score, 1.0);
        assert_eq!(s.evaluate(&tc, &conv("It is Paris")).await.unwrap().score, 0.0);
    }

    #[tokio::test]
    async fn external_uses_extracted_answer() {
        let llm = Arc::new(FakeClient::new(vec![r#"Sure: {"answer": "the Eiffel Tower"}"#]));
        let s = TruthfulnessExternal::new(llm.clone());
        let tc = case("Which landmark?", Some("Eiffel Tower"));
        let r = s.evaluate(&tc, &conv("You should see the Eiffel Tower first")).await.unwrap();
        assert_eq!(r.score, 1.0);
        assert_eq!(r.details["f1"], 1.0);
        assert!(llm.prompts.lock().unwrap()[0].contains("Which landmark?"));
    }

    #[tokio::test]
    async fn external_plain_text_fallback() {
        let llm = Arc::new(FakeClient::new(vec!["London"]));
        let r = TruthfulnessExternal::new(llm)
            .evaluate(&case("Capital?", Some("Paris")), &conv("London"))
            .await
            .unwrap();
        assert_eq!(r.score, 0.0);
    }
}
