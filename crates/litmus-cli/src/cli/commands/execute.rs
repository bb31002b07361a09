use super::exit_codes;
use crate::cli::args::Cli;
use litmus_core::config::{HarnessConfig, ServicesConfig};
use litmus_core::engine::{ExecuteRequest, Executor};
use litmus_core::interface::{retry_on_internet, HttpInterfaceClient, InterfaceClient, RetryPolicy, SessionManager};
use litmus_core::providers::classifier::{HttpClassifier, TextClassifier};
use litmus_core::providers::embedder::{Embedder, OllamaEmbedder};
use litmus_core::providers::gpu::{GpuService, HttpGpuService};
use litmus_core::providers::llm::ollama::OllamaClient;
use litmus_core::providers::perspective::{PerspectiveClient, ToxicityScorer};
use litmus_core::registry::StrategyContext;
use litmus_core::report::console;
use litmus_core::storage::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn cmd_execute(cfg: &HarnessConfig, store: Store, cli: &Cli) -> anyhow::Result<i32> {
    let Some(run_name) = cli.run_name.clone() else {
        tracing::error!(event = "cli.missing_run_name", "--execute needs a run name (-r)");
        return Ok(exit_codes::CONFIG_ERROR);
    };
    let target = cfg.target.to_target()?;

    let registry = Arc::new(litmus_strategies::default_registry(strategy_context(&cfg.services)));
    let iface = cfg.interface.clone();
    let sessions = SessionManager::new(move || {
        let iface = iface.clone();
        async move { HttpInterfaceClient::new(&iface) }
    });
    let client = Arc::new(sessions.acquire().await?);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });
    let policy = RetryPolicy {
        max_attempts: cfg.interface.max_retries.max(1),
        initial_delay: Duration::from_millis(cfg.interface.retry_delay_ms.max(100)),
        ..RetryPolicy::default()
    };
    let probe = client.probe(Duration::from_secs(cfg.interface.timeout_seconds.min(10)))?;
    if !retry_on_internet(&policy, &probe, &cancel).await {
        if cancel.is_cancelled() {
            release(&sessions).await;
            return Ok(exit_codes::RUN_FAILED);
        }
        tracing::warn!(event = "interface.unreachable", addr = %probe.addr, "interface manager not reachable, prompts will fail");
    }

    let target_json = serde_json::to_value(&cfg.target)?;
    if let Err(e) = client.sync_config(&target_json).await {
        tracing::warn!(event = "interface.sync_failed", error = %e, "continuing with interface defaults");
    }

    let mut executor = Executor::new(store.clone(), client.clone(), registry);
    executor.chat_id = cfg.interface.chat_id.clone();
    executor.cancel = cancel;

    let req = ExecuteRequest {
        run_name,
        continue_run: cli.run_continue,
        plan_id: cli.testplan_id,
        metric_id: cli.metric_id,
        testcase_id: cli.testcase_id,
        max_testcases: Some(cli.max_testcases),
        target,
    };
    let result = executor.execute(&req).await;

    release(&sessions).await;
    let summary = result?;
    console::print_run_summary(&store, &summary)?;

    if summary.interrupted || summary.failed > 0 {
        Ok(exit_codes::RUN_FAILED)
    } else {
        Ok(exit_codes::OK)
    }
}

async fn release(sessions: &SessionManager<HttpInterfaceClient>) {
    if let Err(e) = sessions.release().await {
        tracing::warn!(event = "interface.close_failed", error = %e);
    }
}

fn strategy_context(services: &ServicesConfig) -> StrategyContext {
    let embedder = services
        .embedding_model
        .as_ref()
        .map(|m| Arc::new(OllamaEmbedder::new(&services.ollama_url, m)) as Arc<dyn Embedder>);

    StrategyContext {
        llm: Some(Arc::new(OllamaClient::new(&services.ollama_url, &services.judge_model))),
        classifier: services
            .classifier_url
            .as_ref()
            .map(|u| Arc::new(HttpClassifier::new(u, services.classifier_token.clone())) as Arc<dyn TextClassifier>),
        gpu: services
            .gpu_url
            .as_ref()
            .map(|u| Arc::new(HttpGpuService::new(u)) as Arc<dyn GpuService>),
        embedder,
        toxicity: services
            .perspective_api_key
            .as_ref()
            .map(|k| Arc::new(PerspectiveClient::new(k)) as Arc<dyn ToxicityScorer>),
        log_dir: services.log_dir.clone(),
        classifier_models: services.classifier_models.clone(),
    }
}
