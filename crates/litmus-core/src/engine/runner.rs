use crate::errors::{ConfigError, StoreError};
use crate::interface::{split_message, InterfaceClient, CHAT_ERROR_SENTINEL, DEFAULT_MAX_MESSAGE_LEN};
use crate::model::{Conversation, Metric, RunDetail, RunStatus, Target, TestCase, TestPlan};
use crate::registry::StrategyRegistry;
use crate::storage::store::{now_rfc3339, Store};
use crate::strategy_api::StrategyScore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub run_name: String,
    pub continue_run: bool,
    pub plan_id: Option<i64>,
    pub metric_id: Option<i64>,
    pub testcase_id: Option<i64>,
    /// Per metric.
    pub max_testcases: Option<usize>,
    pub target: Target,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: i64,
    pub run_name: String,
    pub executed: usize,
    pub skipped: usize,
    pub completed: usize,
    pub failed: usize,
    /// Stopped by cancellation; the run is left RUNNING so it can resume.
    pub interrupted: bool,
}

pub struct Executor {
    pub store: Store,
    pub client: Arc<dyn InterfaceClient>,
    pub registry: Arc<StrategyRegistry>,
    pub chat_id: Option<String>,
    pub max_message_len: usize,
    /// Checked between details and while a chat is in flight.
    pub cancel: CancellationToken,
}

type Selection = Vec<(TestPlan, Metric, Vec<TestCase>)>;

enum DetailOutcome {
    Skipped,
    Completed,
    Failed,
    Interrupted,
}

impl Executor {
    pub fn new(store: Store, client: Arc<dyn InterfaceClient>, registry: Arc<StrategyRegistry>) -> Self {
        Self {
            store,
            client,
            registry,
            chat_id: None,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            cancel: CancellationToken::new(),
        }
    }

    pub async fn execute(&self, req: &ExecuteRequest) -> anyhow::Result<RunSummary> {
        let selection = self.select(req)?;
        let target_id = self.store.get_or_create_target(&req.target)?;
        let run = self.open_run(req, target_id)?;
        tracing::info!(
            event = "run.opened",
            run_id = run.id,
            run = %run.name,
            status = run.status.as_str(),
            target = %req.target.name,
        );

        match self.run_loop(req, selection, run.id, target_id).await {
            Ok(mut summary) if summary.interrupted => {
                summary.run_name = run.name;
                tracing::warn!(
                    event = "run.interrupted",
                    run_id = summary.run_id,
                    executed = summary.executed,
                    "run left RUNNING; rerun with the same name to resume"
                );
                Ok(summary)
            }
            Ok(mut summary) => {
                self.store.set_run_status(run.id, RunStatus::Completed)?;
                summary.run_name = run.name;
                tracing::info!(
                    event = "run.completed",
                    run_id = summary.run_id,
                    executed = summary.executed,
                    skipped = summary.skipped,
                    completed = summary.completed,
                    failed = summary.failed,
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(event = "run.failed", run_id = run.id, error = %e);
                if let Err(mark) = self.store.set_run_status(run.id, RunStatus::Failed) {
                    tracing::warn!(event = "run.mark_failed_error", run_id = run.id, error = %mark);
                }
                Err(e.into())
            }
        }
    }

    fn open_run(&self, req: &ExecuteRequest, target_id: i64) -> anyhow::Result<crate::model::Run> {
        let Some(existing) = self.store.find_run_by_name(&req.run_name)? else {
            return Ok(self.store.create_run(&req.run_name, target_id)?);
        };
        match existing.status {
            RunStatus::New | RunStatus::Running | RunStatus::Failed => Ok(existing),
            RunStatus::Completed if req.continue_run => {
                tracing::info!(event = "run.reopened", run_id = existing.id, run = %existing.name);
                Ok(self.store.reopen_run(existing.id)?)
            }
            RunStatus::Completed => Err(ConfigError(format!(
                "run '{}' is already completed; pass --run-continue to resume it",
                existing.name
            ))
            .into()),
        }
    }

    /// Plans, their metrics and the metrics' test cases. `metric_id` only
    /// matches plans containing that metric and `testcase_id` only the
    /// metrics the case is mapped to; a filter matching nothing is a config
    /// error.
    fn select(&self, req: &ExecuteRequest) -> anyhow::Result<Selection> {
        let plans = match req.plan_id {
            Some(id) => vec![self.store.get_plan(id)?],
            None => self.store.list_plans()?,
        };
        let case = req
            .testcase_id
            .map(|id| -> anyhow::Result<_> {
                Ok((self.store.get_testcase(id)?, self.store.testcase_metric_ids(id)?))
            })
            .transpose()?;

        let mut out = Vec::new();
        for plan in plans {
            let metrics = self
                .store
                .plan_metrics(plan.id.unwrap_or_default())?
                .into_iter()
                .filter(|m| req.metric_id.map_or(true, |id| m.id == Some(id)));
            for metric in metrics {
                let cases = match &case {
                    Some((tc, mapped)) => {
                        if !metric.id.is_some_and(|id| mapped.contains(&id)) {
                            continue;
                        }
                        vec![tc.clone()]
                    }
                    None => self
                        .store
                        .list_testcases(None, metric.id, req.max_testcases)?,
                };
                out.push((plan.clone(), metric, cases));
            }
        }

        if out.is_empty() && (req.metric_id.is_some() || req.testcase_id.is_some()) {
            return Err(ConfigError(format!(
                "nothing to run: metric {:?} / test case {:?} not found in the selected plans",
                req.metric_id, req.testcase_id
            ))
            .into());
        }
        Ok(out)
    }

    async fn run_loop(
        &self,
        req: &ExecuteRequest,
        selection: Selection,
        run_id: i64,
        target_id: i64,
    ) -> Result<RunSummary, StoreError> {
        let mut summary = RunSummary {
            run_id,
            ..Default::default()
        };
        let mut started = false;

        'plans: for (plan, metric, cases) in selection {
            tracing::debug!(
                event = "run.metric",
                plan = %plan.name,
                metric = %metric.name,
                testcases = cases.len(),
            );
            for tc in cases {
                if self.cancel.is_cancelled() {
                    summary.interrupted = true;
                    break 'plans;
                }
                let detail = self.store.get_or_create_run_detail(
                    run_id,
                    plan.id.unwrap_or_default(),
                    metric.id.unwrap_or_default(),
                    tc.id.unwrap_or_default(),
                )?;
                if detail.status != RunStatus::Completed && !started {
                    self.store.set_run_status(run_id, RunStatus::Running)?;
                    started = true;
                }
                match self.run_detail(&detail, &metric, &tc, &req.target, target_id).await? {
                    DetailOutcome::Skipped => summary.skipped += 1,
                    DetailOutcome::Completed => {
                        summary.executed += 1;
                        summary.completed += 1;
                    }
                    DetailOutcome::Failed => {
                        summary.executed += 1;
                        summary.failed += 1;
                    }
                    DetailOutcome::Interrupted => {
                        summary.interrupted = true;
                        break 'plans;
                    }
                }
            }
        }
        Ok(summary)
    }

    async fn run_detail(
        &self,
        detail: &RunDetail,
        metric: &Metric,
        tc: &TestCase,
        target: &Target,
        target_id: i64,
    ) -> Result<DetailOutcome, StoreError> {
        if detail.status == RunStatus::Completed {
            tracing::debug!(event = "detail.skipped", detail_id = detail.id, testcase = %tc.name);
            return Ok(DetailOutcome::Skipped);
        }
        self.store.set_run_detail_status(detail.id, RunStatus::Running, None)?;

        let chat_id = self
            .chat_id
            .clone()
            .or_else(|| target.agent_name.clone())
            .unwrap_or_else(|| target.name.clone());

        let prompt_ts = now_rfc3339();
        let chat = tokio::select! {
            _ = self.cancel.cancelled() => {
                tracing::info!(event = "detail.interrupted", detail_id = detail.id, testcase = %tc.name);
                return Ok(DetailOutcome::Interrupted);
            }
            chat = self.converse(&chat_id, tc) => chat,
        };
        let agent_response = match chat {
            Ok(text) => text,
            Err(e) => return self.fail_detail(detail, tc, &format!("chat failed: {}", e)),
        };

        self.store.upsert_conversation(&Conversation {
            id: None,
            run_detail_id: Some(detail.id),
            testcase_id: tc.id,
            target_id: Some(target_id),
            agent_response: agent_response.clone(),
            prompt_ts: Some(prompt_ts),
            response_ts: Some(now_rfc3339()),
        })?;

        if agent_response == CHAT_ERROR_SENTINEL {
            return self.fail_detail(detail, tc, "interface manager gave no response after retries");
        }

        let Some(strategy) = tc.strategy.clone().or_else(|| metric.strategies.first().cloned()) else {
            return self.fail_detail(detail, tc, &format!("no strategy for metric '{}'", metric.name));
        };

        let conv = self
            .store
            .get_conversation_for_detail(detail.id)?
            .unwrap_or_else(|| Conversation::with_response(agent_response));

        match self.registry.evaluate(&strategy, tc, &conv).await {
            Ok(StrategyScore { score, reason, .. }) => {
                self.store.record_score(detail.id, score, &reason)?;
                self.store.set_run_detail_status(detail.id, RunStatus::Completed, None)?;
                tracing::info!(
                    event = "detail.completed",
                    detail_id = detail.id,
                    testcase = %tc.name,
                    strategy = %strategy,
                    score,
                );
                Ok(DetailOutcome::Completed)
            }
            Err(e) => self.fail_detail(detail, tc, &format!("{} failed: {}", strategy, e)),
        }
    }

    /// Sends the prompt (split when long) and returns the reply to the final
    /// chunk, or the error sentinel when any chunk went unanswered.
    async fn converse(&self, chat_id: &str, tc: &TestCase) -> anyhow::Result<String> {
        let chunks = split_message(&tc.prompt.full_text(), self.max_message_len);
        if chunks.is_empty() {
            anyhow::bail!("test case '{}' has an empty prompt", tc.name);
        }
        let exchanges = self.client.chat(chat_id, &chunks).await?;
        if exchanges.iter().any(|x| x.response == CHAT_ERROR_SENTINEL) {
            return Ok(CHAT_ERROR_SENTINEL.to_string());
        }
        exchanges
            .into_iter()
            .last()
            .map(|x| x.response)
            .ok_or_else(|| anyhow::anyhow!("interface returned no exchanges"))
    }

    fn fail_detail(
        &self,
        detail: &RunDetail,
        tc: &TestCase,
        reason: &str,
    ) -> Result<DetailOutcome, StoreError> {
        tracing::warn!(
            event = "detail.failed",
            detail_id = detail.id,
            testcase = %tc.name,
            reason = %reason,
        );
        self.store
            .set_run_detail_status(detail.id, RunStatus::Failed, Some(reason))?;
        Ok(DetailOutcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::ChatExchange;
    use crate::model::{Prompt, Response, TargetType};
    use crate::registry::StrategyContext;
    use crate::strategy_api::Strategy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct EchoClient {
        calls: AtomicUsize,
        sent: Mutex<Vec<Vec<String>>>,
        /// Cancelled once the first chat returns.
        cancel_after_first: Option<CancellationToken>,
    }

    impl EchoClient {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                sent: Mutex::new(vec![]),
                cancel_after_first: None,
            }
        }
    }

    #[async_trait]
    impl InterfaceClient for EchoClient {
        async fn chat(&self, chat_id: &str, prompts: &[String]) -> anyhow::Result<Vec<ChatExchange>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sent.lock().unwrap().push(prompts.to_vec());
            if let Some(token) = &self.cancel_after_first {
                token.cancel();
            }
            if prompts.iter().any(|p| p.contains("explode")) {
                anyhow::bail!("socket closed");
            }
            Ok(prompts
                .iter()
                .map(|p| ChatExchange {
                    chat_id: chat_id.into(),
                    prompt: p.clone(),
                    response: if p.contains("dropped") {
                        CHAT_ERROR_SENTINEL.into()
                    } else if p.contains("capital") {
                        "Paris".into()
                    } else {
                        "dunno".into()
                    },
                })
                .collect())
        }
        async fn sync_config(&self, _cfg: &serde_json::Value) -> anyhow::Result<()> {
            Ok(())
        }
        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Exact;

    #[async_trait]
    impl Strategy for Exact {
        fn name(&self) -> &'static str {
            "exact"
        }
        async fn evaluate(&self, tc: &TestCase, conv: &Conversation) -> anyhow::Result<StrategyScore> {
            let expected = tc.expected_text().unwrap_or_default();
            Ok(if conv.agent_response == expected {
                StrategyScore::pass("match")
            } else {
                StrategyScore::fail("mismatch")
            })
        }
    }

    fn store() -> Store {
        let s = Store::memory().unwrap();
        s.init_schema().unwrap();
        s
    }

    fn target() -> Target {
        Target {
            id: None,
            name: "bot".into(),
            target_type: TargetType::Api,
            url: None,
            domain: "general".into(),
            languages: vec![],
            agent_name: None,
        }
    }

    fn seed(store: &Store, prompts: &[(&str, &str, &str)]) -> i64 {
        store
            .insert_metric(&Metric {
                id: None,
                name: "qa".into(),
                domain: "general".into(),
                description: None,
                strategies: vec!["exact".into()],
            })
            .unwrap();
        for (name, q, a) in prompts {
            store
                .insert_testcase(&TestCase {
                    name: (*name).into(),
                    prompt: Prompt::new(*q),
                    response: Some(Response::new(*a)),
                    metrics: vec!["qa".into()],
                    ..Default::default()
                })
                .unwrap();
        }
        store
            .insert_plan(&TestPlan {
                id: None,
                name: "plan".into(),
                description: None,
                metrics: vec!["qa".into()],
            })
            .unwrap()
    }

    fn executor(store: Store, client: Arc<EchoClient>) -> Executor {
        let mut reg = StrategyRegistry::new(StrategyContext::default());
        reg.register("exact", |_| Ok(Arc::new(Exact) as Arc<dyn Strategy>));
        Executor::new(store, client, Arc::new(reg))
    }

    fn request(name: &str, continue_run: bool) -> ExecuteRequest {
        ExecuteRequest {
            run_name: name.into(),
            continue_run,
            plan_id: None,
            metric_id: None,
            testcase_id: None,
            max_testcases: Some(10),
            target: target(),
        }
    }

    #[tokio::test]
    async fn executes_and_scores_every_case() {
        let store = store();
        seed(&store, &[("c1", "capital of France?", "Paris"), ("c2", "2+2?", "4")]);
        let client = Arc::new(EchoClient::new());
        let ex = executor(store.clone(), client.clone());

        let s = ex.execute(&request("r1", false)).await.unwrap();
        assert_eq!((s.executed, s.completed, s.failed, s.skipped), (2, 2, 0, 0));

        let run = store.get_run(s.run_id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.start_ts.is_some() && run.end_ts.is_some());

        let details = store.list_run_details(s.run_id).unwrap();
        let scores: Vec<_> = details.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![Some(1.0), Some(0.0)]);
        let conv = store.get_conversation_for_detail(details[0].id).unwrap().unwrap();
        assert_eq!(conv.agent_response, "Paris");
    }

    #[tokio::test]
    async fn completed_run_requires_continue_and_skips_done_details() {
        let store = store();
        seed(&store, &[("c1", "capital of France?", "Paris")]);
        let client = Arc::new(EchoClient::new());
        let ex = executor(store.clone(), client.clone());

        ex.execute(&request("r1", false)).await.unwrap();
        let err = ex.execute(&request("r1", false)).await.unwrap_err();
        assert!(crate::errors::is_config_error(&err));

        let s = ex.execute(&request("r1", true)).await.unwrap();
        assert_eq!((s.executed, s.skipped), (0, 1));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_detail_does_not_fail_the_run() {
        let store = store();
        seed(
            &store,
            &[("boom", "please explode", "x"), ("ok", "capital?", "Paris")],
        );
        let client = Arc::new(EchoClient::new());
        let ex = executor(store.clone(), client);

        let s = ex.execute(&request("r2", false)).await.unwrap();
        assert_eq!((s.completed, s.failed), (1, 1));
        assert_eq!(store.get_run(s.run_id).unwrap().status, RunStatus::Completed);

        let details = store.list_run_details(s.run_id).unwrap();
        let failed = details.iter().find(|d| d.status == RunStatus::Failed).unwrap();
        assert!(failed.reason.as_deref().unwrap().contains("socket closed"));
    }

    #[tokio::test]
    async fn failed_details_are_retried_on_resume() {
        let store = store();
        seed(&store, &[("boom", "please explode", "x")]);
        let ex = executor(store.clone(), Arc::new(EchoClient::new()));
        let first = ex.execute(&request("r3", false)).await.unwrap();
        assert_eq!(first.failed, 1);

        let again = ex.execute(&request("r3", true)).await.unwrap();
        assert_eq!((again.executed, again.skipped), (1, 0));
    }

    #[tokio::test]
    async fn long_prompts_are_split() {
        let store = store();
        let long = format!("{} capital", "word ".repeat(500));
        seed(&store, &[("long", long.as_str(), "Paris")]);
        let client = Arc::new(EchoClient::new());
        let mut ex = executor(store, client.clone());
        ex.max_message_len = 1000;

        let s = ex.execute(&request("r4", false)).await.unwrap();
        assert_eq!(s.completed, 1);
        let sent = client.sent.lock().unwrap();
        assert!(sent[0].len() >= 3);
        assert_eq!(sent[0].concat(), long);
    }

    #[tokio::test]
    async fn unanswered_early_chunk_fails_the_detail() {
        let store = store();
        let long = format!("dropped {} capital", "word ".repeat(500));
        seed(&store, &[("long", long.as_str(), "Paris")]);
        let client = Arc::new(EchoClient::new());
        let mut ex = executor(store.clone(), client.clone());
        ex.max_message_len = 1000;

        let s = ex.execute(&request("r5", false)).await.unwrap();
        assert_eq!((s.completed, s.failed), (0, 1));
        let details = store.list_run_details(s.run_id).unwrap();
        assert_eq!(details[0].status, RunStatus::Failed);
        assert_eq!(details[0].score, None);
    }

    fn add_plan(store: &Store, plan: &str, metric: &str, cases: &[(&str, &str, &str)]) -> (i64, i64) {
        let metric_id = store
            .insert_metric(&Metric {
                id: None,
                name: metric.into(),
                domain: "general".into(),
                description: None,
                strategies: vec!["exact".into()],
            })
            .unwrap();
        for (name, q, a) in cases {
            store
                .insert_testcase(&TestCase {
                    name: (*name).into(),
                    prompt: Prompt::new(*q),
                    response: Some(Response::new(*a)),
                    metrics: vec![metric.into()],
                    ..Default::default()
                })
                .unwrap();
        }
        let plan_id = store
            .insert_plan(&TestPlan {
                id: None,
                name: plan.into(),
                description: None,
                metrics: vec![metric.into()],
            })
            .unwrap();
        (plan_id, metric_id)
    }

    #[tokio::test]
    async fn metric_and_case_filters_respect_plan_membership() {
        let store = store();
        let (_, geo) = add_plan(&store, "geo-plan", "geo", &[("capital", "capital of France?", "Paris")]);
        let (_, math) = add_plan(&store, "math-plan", "math", &[("sum", "2+2?", "4")]);
        let client = Arc::new(EchoClient::new());
        let ex = executor(store.clone(), client.clone());

        let mut req = request("by-metric", false);
        req.metric_id = Some(geo);
        let s = ex.execute(&req).await.unwrap();
        assert_eq!(s.executed, 1);
        let details = store.list_run_details(s.run_id).unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].metric_id, geo);

        let sum_id = store
            .list_testcases(None, Some(math), None)
            .unwrap()[0]
            .id
            .unwrap();
        let mut req = request("by-case", false);
        req.testcase_id = Some(sum_id);
        let s = ex.execute(&req).await.unwrap();
        let details = store.list_run_details(s.run_id).unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].metric_id, math);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);

        let mut req = request("mismatch", false);
        req.metric_id = Some(geo);
        req.testcase_id = Some(sum_id);
        let err = ex.execute(&req).await.unwrap_err();
        assert!(crate::errors::is_config_error(&err));
        assert!(store.find_run_by_name("mismatch").unwrap().is_none());
    }

    #[tokio::test]
    async fn cancellation_leaves_run_resumable() {
        let store = store();
        seed(
            &store,
            &[("c1", "capital?", "Paris"), ("c2", "2+2?", "4"), ("c3", "sky?", "blue")],
        );
        let cancel = CancellationToken::new();
        let client = Arc::new(EchoClient {
            cancel_after_first: Some(cancel.clone()),
            ..EchoClient::new()
        });
        let mut ex = executor(store.clone(), client);
        ex.cancel = cancel;

        let s = ex.execute(&request("r6", false)).await.unwrap();
        assert!(s.interrupted);
        assert_eq!(s.completed, 1);
        assert_eq!(store.get_run(s.run_id).unwrap().status, RunStatus::Running);

        let ex = executor(store.clone(), Arc::new(EchoClient::new()));
        let again = ex.execute(&request("r6", false)).await.unwrap();
        assert!(!again.interrupted);
        assert_eq!((again.skipped, again.executed), (1, 2));
        assert_eq!(store.get_run(s.run_id).unwrap().status, RunStatus::Completed);
    }
}
