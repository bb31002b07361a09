use async_trait::async_trait;
use litmus_core::model::{Conversation, TestCase};
use litmus_core::providers::embedder::{cosine_similarity, Embedder};
use litmus_core::strategy_api::{Strategy, StrategyScore};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

pub const TAG_SIMILARITY_THRESHOLD: f64 = 0.7;

pub type Entity = (String, String);

/// F1 over a confusion count. Both denominators zero means nothing was
/// expected and nothing predicted, which scores 0.0.
pub fn scoring(tp: usize, fp: usize, fn_: usize) -> f64 {
    if tp + fp == 0 && tp + fn_ == 0 {
        return 0.0;
    }
    let precision = if tp + fp == 0 { 0.0 } else { tp as f64 / (tp + fp) as f64 };
    let recall = if tp + fn_ == 0 { 0.0 } else { tp as f64 / (tp + fn_) as f64 };
    if precision + recall == 0.0 {
        return 0.0;
    }
    2.0 * precision * recall / (precision + recall)
}

fn patterns() -> &'static [Regex; 3] {
    static RE: OnceLock<[Regex; 3]> = OnceLock::new();
    RE.get_or_init(|| {
        [
            // [Paris](LOC)
            Regex::new(r"\[([^\]]+)\]\(\s*([A-Za-z][A-Za-z_\-]*)\s*\)").unwrap(),
            // Macron (PERSON)
            Regex::new(r"([^,;\n:()\[\]]+?)\s*\(\s*([A-Z][A-Z_\-]*)\s*\)").unwrap(),
            // Paris: LOCATION
            Regex::new(r"([^,;\n:()\[\]]+?)\s*:\s*([A-Z][A-Z_\-]*)\b").unwrap(),
        ]
    })
}

/// Pulls `(entity, TAG)` pairs out of loosely formatted model output.
/// Entities are lowercased and trimmed; tags are uppercased.
pub fn extract_entities(text: &str) -> Vec<Entity> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    let mut rest = text.to_string();
    for re in patterns() {
        for cap in re.captures_iter(&rest) {
            let entity = cap[1]
                .trim()
                .trim_matches(|c: char| c == '-' || c == '*' || c == '"')
                .trim()
                .to_lowercase();
            let tag = cap[2].trim().to_uppercase();
            if entity.is_empty() {
                continue;
            }
            if seen.insert((entity.clone(), tag.clone())) {
                out.push((entity, tag));
            }
        }
        rest = re.replace_all(&rest, " ").into_owned();
    }
    out
}

/// Folds common tag spellings to one canonical name.
pub fn canonical_tag(tag: &str) -> String {
    let t = tag.trim().to_uppercase().replace('-', "_");
    let canonical = match t.as_str() {
        "PER" | "PERSON" | "PEOPLE" | "B_PER" | "I_PER" => "PERSON",
        "LOC" | "LOCATION" | "GPE" | "PLACE" | "B_LOC" | "I_LOC" => "LOCATION",
        "ORG" | "ORGANIZATION" | "ORGANISATION" | "COMPANY" | "B_ORG" | "I_ORG" => "ORGANIZATION",
        "DATE" | "TIME" | "DATETIME" => "DATE",
        "MISC" | "MISCELLANEOUS" | "OTHER" => "MISC",
        "NORP" | "NATIONALITY" => "NORP",
        "MONEY" | "CURRENCY" => "MONEY",
        _ => return t,
    };
    canonical.to_string()
}

pub struct EntityRecognition {
    embedder: Option<Arc<dyn Embedder>>,
}

impl EntityRecognition {
    pub fn new(embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self { embedder }
    }

    async fn tags_match(&self, a: &str, b: &str) -> bool {
        if canonical_tag(a) == canonical_tag(b) {
            return true;
        }
        let Some(embedder) = &self.embedder else {
            return false;
        };
        let (ea, eb) = match (embedder.embed(a).await, embedder.embed(b).await) {
            (Ok(ea), Ok(eb)) => (ea, eb),
            _ => return false,
        };
        cosine_similarity(&ea, &eb)
            .map(|s| s >= TAG_SIMILARITY_THRESHOLD)
            .unwrap_or(false)
    }

    /// `(tp, fp, fn)`; each expected entity is matched at most once.
    pub async fn confusion(&self, predicted: &[Entity], expected: &[Entity]) -> (usize, usize, usize) {
        let mut used = vec![false; expected.len()];
        let mut tp = 0;
        for (pe, pt) in predicted {
            for (i, (ee, et)) in expected.iter().enumerate() {
                if used[i] || pe != ee {
                    continue;
                }
                if self.tags_match(pt, et).await {
                    used[i] = true;
                    tp += 1;
                    break;
                }
            }
        }
        (tp, predicted.len() - tp, expected.len() - tp)
    }
}

#[async_trait]
impl Strategy for EntityRecognition {
    fn name(&self) -> &'static str {
        "entity_recognition"
    }

    async fn evaluate(&self, tc: &TestCase, conv: &Conversation) -> anyhow::Result<StrategyScore> {
        let expected_text = tc
            .expected_text()
            .ok_or_else(|| anyhow::anyhow!("entity_recognition needs an expected response"))?;
        let expected = extract_entities(expected_text);
        let predicted = extract_entities(&conv.agent_response);
        let (tp, fp, fn_) = self.confusion(&predicted, &expected).await;
        let f1 = scoring(tp, fp, fn_);
        Ok(StrategyScore::new(
            f1,
            format!("entity F1 {:.2} (tp={}, fp={}, fn={})", f1, tp, fp, fn_),
        )
        .with_details(serde_json::json!({
            "tp": tp,
            "fp": fp,
            "fn": fn_,
            "predicted": predicted,
            "expected": expected,
        })))
    }
}
