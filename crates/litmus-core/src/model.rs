use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Open-ended dataset fields carried next to the typed ones.
pub type AdditionalFields = BTreeMap<String, serde_json::Value>;

/// Typed access to an entity's `additional_fields`.
pub trait Extensible {
    fn fields(&self) -> &AdditionalFields;
    fn fields_mut(&mut self) -> &mut AdditionalFields;

    fn field_str(&self, key: &str) -> Option<&str> {
        self.fields().get(key).and_then(|v| v.as_str())
    }

    fn field_f64(&self, key: &str) -> Option<f64> {
        let v = self.fields().get(key)?;
        v.as_f64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
    }

    fn field_bool(&self, key: &str) -> Option<bool> {
        let v = self.fields().get(key)?;
        v.as_bool().or_else(|| match v.as_str()? {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        })
    }

    fn field_str_list(&self, key: &str) -> Vec<String> {
        match self.fields().get(key) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(serde_json::Value::String(s)) => vec![s.clone()],
            _ => vec![],
        }
    }

    fn set_field(&mut self, key: &str, value: serde_json::Value) {
        self.fields_mut().insert(key.to_string(), value);
    }
}

macro_rules! extensible {
    ($t:ty) => {
        impl Extensible for $t {
            fn fields(&self) -> &AdditionalFields {
                &self.additional_fields
            }
            fn fields_mut(&mut self) -> &mut AdditionalFields {
                &mut self.additional_fields
            }
        }
    };
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Language {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Domain {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Prompt {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_fields: AdditionalFields,
}

extensible!(Prompt);

impl Prompt {
    pub fn new(user_prompt: impl Into<String>) -> Self {
        Self {
            id: None,
            system_prompt: None,
            user_prompt: user_prompt.into(),
            language: default_language(),
            domain: default_domain(),
            additional_fields: AdditionalFields::new(),
        }
    }

    /// Content address used to de-duplicate prompts in the store. Covers the
    /// dataset fields too, so two cases asking the same question with
    /// different fields get separate rows.
    pub fn digest(&self) -> String {
        crate::fingerprint::content_address(&[
            self.system_prompt.as_deref().unwrap_or(""),
            &self.user_prompt,
            &self.language,
            &self.domain,
            &fields_canonical(&self.additional_fields),
        ])
    }

    /// Text sent to the agent.
    pub fn full_text(&self) -> String {
        match self.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(sys) => format!("{}\n{}", sys, self.user_prompt),
            None => self.user_prompt.clone(),
        }
    }
}

/// Keys are ordered (`BTreeMap`, and serde_json maps without
/// `preserve_order`), so equal fields serialise identically.
fn fields_canonical(fields: &AdditionalFields) -> String {
    if fields.is_empty() {
        return String::new();
    }
    serde_json::to_string(fields).unwrap_or_default()
}

fn default_language() -> String {
    "english".to_string()
}

fn default_domain() -> String {
    "general".to_string()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResponseType {
    #[default]
    #[serde(rename = "GT")]
    Gt,
    #[serde(rename = "GT_DESC")]
    GtDesc,
    #[serde(rename = "NA")]
    Na,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Gt => "GT",
            ResponseType::GtDesc => "GT_DESC",
            ResponseType::Na => "NA",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "GT_DESC" | "GTDesc" => ResponseType::GtDesc,
            "NA" => ResponseType::Na,
            _ => ResponseType::Gt,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Response {
    #[serde(default)]
    pub id: Option<i64>,
    pub text: String,
    #[serde(default)]
    pub response_type: ResponseType,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_fields: AdditionalFields,
}

extensible!(Response);

impl Response {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
            response_type: ResponseType::Gt,
            language: default_language(),
            additional_fields: AdditionalFields::new(),
        }
    }

    pub fn digest(&self) -> String {
        crate::fingerprint::content_address(&[
            &self.text,
            self.response_type.as_str(),
            &self.language,
            &fields_canonical(&self.additional_fields),
        ])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmJudgePrompt {
    #[serde(default)]
    pub id: Option<i64>,
    pub prompt: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    pub prompt: Prompt,
    #[serde(default)]
    pub response: Option<Response>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub judge_prompt: Option<LlmJudgePrompt>,
    /// Metric names this case belongs to (dataset import only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<String>,
}

impl TestCase {
    pub fn expected_text(&self) -> Option<&str> {
        self.response.as_ref().map(|r| r.text.as_str())
    }

    /// Looks a field up on the expected response first, then on the prompt.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.response
            .as_ref()
            .and_then(|r| r.field_str(key))
            .or_else(|| self.prompt.field_str(key))
    }

    pub fn field_f64(&self, key: &str) -> Option<f64> {
        self.response
            .as_ref()
            .and_then(|r| r.field_f64(key))
            .or_else(|| self.prompt.field_f64(key))
    }

    pub fn field_str_list(&self, key: &str) -> Vec<String> {
        let from_response = self
            .response
            .as_ref()
            .map(|r| r.field_str_list(key))
            .unwrap_or_default();
        if from_response.is_empty() {
            self.prompt.field_str_list(key)
        } else {
            from_response
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub strategies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyRecord {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestPlan {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Metric names (dataset import) resolved to ids by the store.
    #[serde(default)]
    pub metrics: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    WhatsappWeb,
    WebApp,
    OpenUi,
    Cpgrams,
    Api,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::WhatsappWeb => "WHATSAPP_WEB",
            TargetType::WebApp => "WEB_APP",
            TargetType::OpenUi => "OPEN_UI",
            TargetType::Cpgrams => "CPGRAMS",
            TargetType::Api => "API",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "WHATSAPP_WEB" | "WHATSAPP" => Some(TargetType::WhatsappWeb),
            "WEB_APP" | "WEBAPP" => Some(TargetType::WebApp),
            "OPEN_UI" | "OPENUI" => Some(TargetType::OpenUi),
            "CPGRAMS" => Some(TargetType::Cpgrams),
            "API" => Some(TargetType::Api),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Target {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    pub target_type: TargetType,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    New,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::New => "NEW",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "NEW" => RunStatus::New,
            "RUNNING" => RunStatus::Running,
            "COMPLETED" => RunStatus::Completed,
            _ => RunStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub name: String,
    pub target_id: i64,
    pub status: RunStatus,
    pub start_ts: Option<String>,
    pub end_ts: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetail {
    pub id: i64,
    pub run_id: i64,
    pub plan_id: i64,
    pub metric_id: i64,
    pub testcase_id: i64,
    pub status: RunStatus,
    pub score: Option<f64>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub run_detail_id: Option<i64>,
    #[serde(default)]
    pub testcase_id: Option<i64>,
    #[serde(default)]
    pub target_id: Option<i64>,
    pub agent_response: String,
    #[serde(default)]
    pub prompt_ts: Option<String>,
    #[serde(default)]
    pub response_ts: Option<String>,
}

impl Conversation {
    pub fn with_response(agent_response: impl Into<String>) -> Self {
        Self {
            agent_response: agent_response.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// Seed file loaded by `litmus --import`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub strategies: Vec<StrategyRecord>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub plans: Vec<TestPlan>,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub testcases: Vec<TestCase>,
}
