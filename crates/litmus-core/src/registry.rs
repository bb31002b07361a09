use crate::errors::RegistryError;
use crate::model::{Conversation, TestCase};
use crate::providers::classifier::TextClassifier;
use crate::providers::embedder::Embedder;
use crate::providers::gpu::GpuService;
use crate::providers::llm::LlmClient;
use crate::providers::perspective::ToxicityScorer;
use crate::strategy_api::{Strategy, StrategyScore};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Collaborators a strategy may need. Absent handles make the strategies that
/// depend on them fail at construction, not at registration.
#[derive(Clone, Default)]
pub struct StrategyContext {
    pub llm: Option<Arc<dyn LlmClient>>,
    pub classifier: Option<Arc<dyn TextClassifier>>,
    pub gpu: Option<Arc<dyn GpuService>>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub toxicity: Option<Arc<dyn ToxicityScorer>>,
    pub log_dir: Option<PathBuf>,
    /// Classifier model ids keyed by purpose ("bias", "toxicity", "stereotype").
    pub classifier_models: BTreeMap<String, String>,
}

impl StrategyContext {
    pub fn classifier_model(&self, purpose: &str, default: &str) -> String {
        self.classifier_models
            .get(purpose)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn require_llm(&self) -> anyhow::Result<Arc<dyn LlmClient>> {
        self.llm
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no LLM client configured"))
    }

    pub fn require_classifier(&self) -> anyhow::Result<Arc<dyn TextClassifier>> {
        self.classifier
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no text classifier configured"))
    }

    pub fn require_gpu(&self) -> anyhow::Result<Arc<dyn GpuService>> {
        self.gpu
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no GPU service configured"))
    }

    pub fn require_embedder(&self) -> anyhow::Result<Arc<dyn Embedder>> {
        self.embedder
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no embedder configured"))
    }
}

pub type StrategyFactory =
    Box<dyn Fn(&StrategyContext) -> anyhow::Result<Arc<dyn Strategy>> + Send + Sync>;

/// Name to factory table. Instances are built on first use and memoised.
pub struct StrategyRegistry {
    ctx: StrategyContext,
    factories: BTreeMap<String, StrategyFactory>,
    aliases: BTreeMap<String, String>,
    instances: Mutex<BTreeMap<String, Arc<dyn Strategy>>>,
}

/// Lowercase, with `-` and spaces folded to `_`.
pub fn normalize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

impl StrategyRegistry {
    pub fn new(ctx: StrategyContext) -> Self {
        Self {
            ctx,
            factories: BTreeMap::new(),
            aliases: BTreeMap::new(),
            instances: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn context(&self) -> &StrategyContext {
        &self.ctx
    }

    pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&StrategyContext) -> anyhow::Result<Arc<dyn Strategy>> + Send + Sync + 'static,
    {
        self.factories.insert(normalize(name), Box::new(factory));
        self
    }

    /// Makes `alias` resolve to the already registered `target`.
    pub fn alias(&mut self, alias: &str, target: &str) -> &mut Self {
        self.aliases.insert(normalize(alias), normalize(target));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.canonical(name).is_some()
    }

    /// Registered names and aliases, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .factories
            .keys()
            .chain(self.aliases.keys())
            .cloned()
            .collect();
        out.sort();
        out
    }

    fn canonical(&self, name: &str) -> Option<String> {
        let n = normalize(name);
        let n = self.aliases.get(&n).cloned().unwrap_or(n);
        self.factories.contains_key(&n).then_some(n)
    }

    pub fn resolve(&self, name: &str) -> anyhow::Result<Arc<dyn Strategy>> {
        let key = self
            .canonical(name)
            .ok_or_else(|| RegistryError::UnknownStrategy(name.to_string()))?;

        let mut instances = self.instances.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(s) = instances.get(&key) {
            return Ok(s.clone());
        }
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| RegistryError::UnknownStrategy(name.to_string()))?;
        let strategy = factory(&self.ctx)?;
        tracing::debug!(event = "strategy.instantiated", strategy = %key);
        instances.insert(key, strategy.clone());
        Ok(strategy)
    }

    pub async fn evaluate(
        &self,
        name: &str,
        tc: &TestCase,
        conv: &Conversation,
    ) -> anyhow::Result<StrategyScore> {
        let strategy = self.resolve(name)?;
        let res = strategy.evaluate(tc, conv).await?;
        tracing::debug!(
            event = "strategy.scored",
            strategy = strategy.name(),
            testcase = %tc.name,
            score = res.score,
        );
        Ok(res)
    }
}
