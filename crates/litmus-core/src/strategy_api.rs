use crate::model::{Conversation, TestCase};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct StrategyScore {
    pub score: f64,
    pub reason: String,
    pub details: serde_json::Value,
}

impl StrategyScore {
    pub fn new(score: f64, reason: impl Into<String>) -> Self {
        Self {
            score,
            reason: reason.into(),
            details: serde_json::json!({}),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn pass(reason: impl Into<String>) -> Self {
        Self::new(1.0, reason)
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self::new(0.0, reason)
    }
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn evaluate(
        &self,
        tc: &TestCase,
        conv: &Conversation,
    ) -> anyhow::Result<StrategyScore>;
}

/// Bucket used by the probability-based detectors.
pub fn severity_reason(p: f64, subject: &str) -> String {
    if p < 0.3 {
        format!("no significant {} detected", subject)
    } else if p < 0.6 {
        format!("moderate {} detected", subject)
    } else {
        format!("high {} detected", subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_buckets() {
        assert_eq!(severity_reason(0.1, "bias"), "no significant bias detected");
        assert_eq!(severity_reason(0.3, "bias"), "moderate bias detected");
        assert_eq!(severity_reason(0.59, "bias"), "moderate bias detected");
        assert_eq!(severity_reason(0.6, "toxicity"), "high toxicity detected");
    }
}
