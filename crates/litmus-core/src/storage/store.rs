use crate::errors::StoreError;
use crate::model::{
    AdditionalFields, Conversation, Dataset, LlmJudgePrompt, Metric, Prompt, Response,
    ResponseType, Run, RunDetail, RunStatus, StrategyRecord, Target, TargetType, TestCase,
    TestPlan,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub testcases: Option<u64>,
    pub prompts: Option<u64>,
    pub judge_prompts: Option<u64>,
    pub runs: Option<u64>,
    pub run_details: Option<u64>,
    pub last_run: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub strategies: usize,
    pub metrics: usize,
    pub plans: usize,
    pub targets: usize,
    pub testcases: usize,
    pub skipped: usize,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        if path.as_os_str() == ":memory:" {
            return Self::memory();
        }
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        use anyhow::Context;
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute_batch(crate::storage::schema::DDL)?;
        migrate_v02(&conn)?;
        Ok(())
    }

    // --- reference data ---

    pub fn get_or_create_language(&self, name: &str) -> StoreResult<i64> {
        lookup_or_insert(&self.lock(), "languages", name)
    }

    pub fn get_or_create_domain(&self, name: &str) -> StoreResult<i64> {
        lookup_or_insert(&self.lock(), "domains", name)
    }

    // --- strategies ---

    pub fn insert_strategy(&self, s: &StrategyRecord) -> StoreResult<i64> {
        insert_strategy(&self.lock(), s)
    }

    pub fn list_strategies(&self) -> StoreResult<Vec<StrategyRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT id, name, description FROM strategies ORDER BY id")?;
        let rows = stmt.query_map([], |r| {
            Ok(StrategyRecord {
                id: Some(r.get(0)?),
                name: r.get(1)?,
                description: r.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // --- metrics ---

    pub fn insert_metric(&self, m: &Metric) -> StoreResult<i64> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let id = insert_metric(&tx, m)?;
        tx.commit()?;
        Ok(id)
    }

    pub fn get_metric(&self, id: i64) -> StoreResult<Metric> {
        load_metric(&self.lock(), id)
    }

    pub fn list_metrics(&self) -> StoreResult<Vec<Metric>> {
        let conn = self.lock();
        let ids = ids_of(&conn, "SELECT id FROM metrics ORDER BY id", [])?;
        ids.into_iter().map(|id| load_metric(&conn, id)).collect()
    }

    // --- prompts / responses ---

    /// Inserts a prompt; a prompt with the same digest is `AlreadyExists`.
    pub fn insert_prompt(&self, p: &Prompt) -> StoreResult<i64> {
        insert_prompt(&self.lock(), p)
    }

    pub fn get_or_insert_prompt(&self, p: &Prompt) -> StoreResult<i64> {
        get_or_insert_prompt(&self.lock(), p)
    }

    pub fn insert_response(&self, r: &Response) -> StoreResult<i64> {
        insert_response(&self.lock(), r)
    }

    pub fn get_or_insert_response(&self, r: &Response) -> StoreResult<i64> {
        get_or_insert_response(&self.lock(), r)
    }

    // --- test cases ---

    pub fn insert_testcase(&self, tc: &TestCase) -> StoreResult<i64> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let id = insert_testcase(&tx, tc)?;
        tx.commit()?;
        Ok(id)
    }

    /// Ids of the metrics a test case is mapped to.
    pub fn testcase_metric_ids(&self, testcase_id: i64) -> StoreResult<Vec<i64>> {
        let conn = self.lock();
        ids_of(
            &conn,
            "SELECT metric_id FROM metric_testcase WHERE testcase_id = ?1 ORDER BY metric_id",
            params![testcase_id],
        )
    }

    pub fn get_testcase(&self, id: i64) -> StoreResult<TestCase> {
        load_testcase(&self.lock(), id)
    }

    /// Test cases filtered by plan and/or metric, ordered by id.
    pub fn list_testcases(
        &self,
        plan_id: Option<i64>,
        metric_id: Option<i64>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<TestCase>> {
        let conn = self.lock();
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let ids = if plan_id.is_none() && metric_id.is_none() {
            ids_of(
                &conn,
                "SELECT id FROM testcases ORDER BY id LIMIT ?1",
                params![limit],
            )?
        } else {
            ids_of(
                &conn,
                "SELECT DISTINCT t.id FROM testcases t
                 JOIN metric_testcase mt ON mt.testcase_id = t.id
                 LEFT JOIN plan_metric pm ON pm.metric_id = mt.metric_id
                 WHERE (?1 IS NULL OR pm.plan_id = ?1)
                   AND (?2 IS NULL OR mt.metric_id = ?2)
                 ORDER BY t.id
                 LIMIT ?3",
                params![plan_id, metric_id, limit],
            )?
        };
        ids.into_iter().map(|id| load_testcase(&conn, id)).collect()
    }

    // --- plans ---

    pub fn insert_plan(&self, p: &TestPlan) -> StoreResult<i64> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let id = insert_plan(&tx, p)?;
        tx.commit()?;
        Ok(id)
    }

    pub fn get_plan(&self, id: i64) -> StoreResult<TestPlan> {
        load_plan(&self.lock(), id)
    }

    pub fn list_plans(&self) -> StoreResult<Vec<TestPlan>> {
        let conn = self.lock();
        let ids = ids_of(&conn, "SELECT id FROM testplans ORDER BY id", [])?;
        ids.into_iter().map(|id| load_plan(&conn, id)).collect()
    }

    pub fn plan_metrics(&self, plan_id: i64) -> StoreResult<Vec<Metric>> {
        let conn = self.lock();
        load_plan(&conn, plan_id)?;
        let ids = ids_of(
            &conn,
            "SELECT metric_id FROM plan_metric WHERE plan_id = ?1 ORDER BY metric_id",
            params![plan_id],
        )?;
        ids.into_iter().map(|id| load_metric(&conn, id)).collect()
    }

    // --- targets ---

    pub fn insert_target(&self, t: &Target) -> StoreResult<i64> {
        insert_target(&self.lock(), t)
    }

    pub fn get_or_create_target(&self, t: &Target) -> StoreResult<i64> {
        match self.find_target_by_name(&t.name)? {
            Some(existing) => Ok(existing.id.unwrap_or_default()),
            None => self.insert_target(t),
        }
    }

    pub fn find_target_by_name(&self, name: &str) -> StoreResult<Option<Target>> {
        let conn = self.lock();
        let id: Option<i64> = conn
            .query_row("SELECT id FROM targets WHERE name = ?1", params![name], |r| {
                r.get(0)
            })
            .optional()?;
        id.map(|id| load_target(&conn, id)).transpose()
    }

    pub fn list_targets(&self) -> StoreResult<Vec<Target>> {
        let conn = self.lock();
        let ids = ids_of(&conn, "SELECT id FROM targets ORDER BY id", [])?;
        ids.into_iter().map(|id| load_target(&conn, id)).collect()
    }

    // --- runs ---

    pub fn create_run(&self, name: &str, target_id: i64) -> StoreResult<Run> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO runs(name, target_id, status) VALUES (?1, ?2, ?3)",
            params![name, target_id, RunStatus::New.as_str()],
        )
        .map_err(|e| StoreError::from_insert(e, "run", name))?;
        load_run(&conn, conn.last_insert_rowid())
    }

    pub fn get_run(&self, id: i64) -> StoreResult<Run> {
        load_run(&self.lock(), id)
    }

    pub fn find_run_by_name(&self, name: &str) -> StoreResult<Option<Run>> {
        let conn = self.lock();
        let id: Option<i64> = conn
            .query_row("SELECT id FROM runs WHERE name = ?1", params![name], |r| {
                r.get(0)
            })
            .optional()?;
        id.map(|id| load_run(&conn, id)).transpose()
    }

    pub fn list_runs(&self) -> StoreResult<Vec<Run>> {
        let conn = self.lock();
        let ids = ids_of(&conn, "SELECT id FROM runs ORDER BY id", [])?;
        ids.into_iter().map(|id| load_run(&conn, id)).collect()
    }

    /// Moves a run to `status`. RUNNING stamps `start_ts` once; terminal
    /// states stamp `end_ts`.
    pub fn set_run_status(&self, id: i64, status: RunStatus) -> StoreResult<Run> {
        let conn = self.lock();
        let now = now_rfc3339();
        let changed = match status {
            RunStatus::Running => conn.execute(
                "UPDATE runs SET status = ?1, start_ts = COALESCE(start_ts, ?2) WHERE id = ?3",
                params![status.as_str(), now, id],
            )?,
            RunStatus::Completed | RunStatus::Failed => conn.execute(
                "UPDATE runs SET status = ?1, end_ts = ?2 WHERE id = ?3",
                params![status.as_str(), now, id],
            )?,
            RunStatus::New => conn.execute(
                "UPDATE runs SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )?,
        };
        if changed == 0 {
            return Err(StoreError::not_found("run", id));
        }
        load_run(&conn, id)
    }

    /// COMPLETED → RUNNING with `end_ts` cleared.
    pub fn reopen_run(&self, id: i64) -> StoreResult<Run> {
        let conn = self.lock();
        let run = load_run(&conn, id)?;
        if run.status != RunStatus::Completed {
            return Err(StoreError::InvalidState {
                entity: "run",
                key: run.name,
                message: format!("cannot reopen a run in state {}", run.status.as_str()),
            });
        }
        conn.execute(
            "UPDATE runs SET status = ?1, end_ts = NULL WHERE id = ?2",
            params![RunStatus::Running.as_str(), id],
        )?;
        load_run(&conn, id)
    }

    // --- run details ---

    pub fn get_or_create_run_detail(
        &self,
        run_id: i64,
        plan_id: i64,
        metric_id: i64,
        testcase_id: i64,
    ) -> StoreResult<RunDetail> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO run_details(run_id, plan_id, metric_id, testcase_id, status, updated_ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(run_id, plan_id, metric_id, testcase_id) DO NOTHING",
            params![
                run_id,
                plan_id,
                metric_id,
                testcase_id,
                RunStatus::New.as_str(),
                now_rfc3339()
            ],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM run_details
             WHERE run_id = ?1 AND plan_id = ?2 AND metric_id = ?3 AND testcase_id = ?4",
            params![run_id, plan_id, metric_id, testcase_id],
            |r| r.get(0),
        )?;
        load_run_detail(&conn, id)
    }

    pub fn get_run_detail(&self, id: i64) -> StoreResult<RunDetail> {
        load_run_detail(&self.lock(), id)
    }

    pub fn set_run_detail_status(
        &self,
        id: i64,
        status: RunStatus,
        reason: Option<&str>,
    ) -> StoreResult<()> {
        let changed = self.lock().execute(
            "UPDATE run_details SET status = ?1, reason = COALESCE(?2, reason), updated_ts = ?3
             WHERE id = ?4",
            params![status.as_str(), reason, now_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("run_detail", id));
        }
        Ok(())
    }

    pub fn record_score(&self, id: i64, score: f64, reason: &str) -> StoreResult<()> {
        let changed = self.lock().execute(
            "UPDATE run_details SET score = ?1, reason = ?2, updated_ts = ?3 WHERE id = ?4",
            params![score, reason, now_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("run_detail", id));
        }
        Ok(())
    }

    pub fn list_run_details(&self, run_id: i64) -> StoreResult<Vec<RunDetail>> {
        let conn = self.lock();
        let ids = ids_of(
            &conn,
            "SELECT id FROM run_details WHERE run_id = ?1 ORDER BY id",
            params![run_id],
        )?;
        ids.into_iter().map(|id| load_run_detail(&conn, id)).collect()
    }

    // --- conversations ---

    /// One conversation per run detail; re-execution overwrites it.
    pub fn upsert_conversation(&self, c: &Conversation) -> StoreResult<i64> {
        let detail_id = c
            .run_detail_id
            .ok_or_else(|| StoreError::not_found("run_detail", "<unset>"))?;
        let testcase_id = c
            .testcase_id
            .ok_or_else(|| StoreError::not_found("testcase", "<unset>"))?;
        let target_id = c
            .target_id
            .ok_or_else(|| StoreError::not_found("target", "<unset>"))?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO conversations(run_detail_id, testcase_id, target_id, agent_response, prompt_ts, response_ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(run_detail_id) DO UPDATE SET
                agent_response = excluded.agent_response,
                prompt_ts = excluded.prompt_ts,
                response_ts = excluded.response_ts",
            params![
                detail_id,
                testcase_id,
                target_id,
                c.agent_response,
                c.prompt_ts,
                c.response_ts
            ],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM conversations WHERE run_detail_id = ?1",
            params![detail_id],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn get_conversation_for_detail(&self, detail_id: i64) -> StoreResult<Option<Conversation>> {
        let conn = self.lock();
        let c = conn
            .query_row(
                "SELECT id, run_detail_id, testcase_id, target_id, agent_response, prompt_ts, response_ts
                 FROM conversations WHERE run_detail_id = ?1",
                params![detail_id],
                |r| {
                    Ok(Conversation {
                        id: Some(r.get(0)?),
                        run_detail_id: Some(r.get(1)?),
                        testcase_id: Some(r.get(2)?),
                        target_id: Some(r.get(3)?),
                        agent_response: r.get::<_, Option<String>>(4)?.unwrap_or_default(),
                        prompt_ts: r.get(5)?,
                        response_ts: r.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(c)
    }

    // --- dataset import ---

    /// Loads a seed dataset in one transaction. Rows whose unique key is
    /// already present are counted as skipped.
    pub fn import_dataset(&self, ds: &Dataset) -> StoreResult<ImportStats> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut stats = ImportStats::default();

        for l in &ds.languages {
            lookup_or_insert(&tx, "languages", l)?;
        }
        for d in &ds.domains {
            lookup_or_insert(&tx, "domains", d)?;
        }
        for s in &ds.strategies {
            count(insert_strategy(&tx, s), &mut stats.strategies, &mut stats.skipped)?;
        }
        for m in &ds.metrics {
            count(insert_metric(&tx, m), &mut stats.metrics, &mut stats.skipped)?;
        }
        for p in &ds.plans {
            count(insert_plan(&tx, p), &mut stats.plans, &mut stats.skipped)?;
        }
        for t in &ds.targets {
            count(insert_target(&tx, t), &mut stats.targets, &mut stats.skipped)?;
        }
        for tc in &ds.testcases {
            count(insert_testcase(&tx, tc), &mut stats.testcases, &mut stats.skipped)?;
        }

        tx.commit()?;
        tracing::info!(
            event = "store.import",
            testcases = stats.testcases,
            metrics = stats.metrics,
            plans = stats.plans,
            skipped = stats.skipped,
            "dataset imported"
        );
        Ok(stats)
    }

    pub fn stats_best_effort(&self) -> StoreStats {
        let conn = self.lock();
        let count_of = |table: &str| -> Option<u64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| {
                r.get::<_, i64>(0).map(|x| x as u64)
            })
            .ok()
        };
        StoreStats {
            testcases: count_of("testcases"),
            prompts: count_of("prompts"),
            judge_prompts: count_of("llm_judge_prompts"),
            runs: count_of("runs"),
            run_details: count_of("run_details"),
            last_run: conn
                .query_row("SELECT name FROM runs ORDER BY id DESC LIMIT 1", [], |r| {
                    r.get(0)
                })
                .ok(),
        }
    }
}

fn count(res: StoreResult<i64>, ok: &mut usize, skipped: &mut usize) -> StoreResult<()> {
    match res {
        Ok(_) => *ok += 1,
        Err(e) if e.is_already_exists() => *skipped += 1,
        Err(e) => return Err(e),
    }
    Ok(())
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn ids_of<P: rusqlite::Params>(conn: &Connection, sql: &str, p: P) -> StoreResult<Vec<i64>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(p, |r| r.get::<_, i64>(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn lookup_or_insert(conn: &Connection, table: &str, name: &str) -> StoreResult<i64> {
    if !["languages", "domains", "strategies"].contains(&table) {
        return Err(StoreError::not_found("table", table));
    }
    let name = name.trim();
    conn.execute(
        &format!("INSERT OR IGNORE INTO {}(name) VALUES (?1)", table),
        params![name],
    )?;
    let id = conn.query_row(
        &format!("SELECT id FROM {} WHERE name = ?1", table),
        params![name],
        |r| r.get(0),
    )?;
    Ok(id)
}

fn name_of(conn: &Connection, table: &str, id: i64) -> StoreResult<String> {
    conn.query_row(
        &format!("SELECT name FROM {} WHERE id = ?1", table),
        params![id],
        |r| r.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("reference", format!("{}#{}", table, id)))
}

fn id_by_name(conn: &Connection, table: &'static str, entity: &'static str, name: &str) -> StoreResult<i64> {
    conn.query_row(
        &format!("SELECT id FROM {} WHERE name = ?1", table),
        params![name],
        |r| r.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found(entity, name))
}

fn fields_to_json(f: &AdditionalFields) -> StoreResult<Option<String>> {
    if f.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(f)?))
    }
}

fn fields_from_json(s: Option<String>) -> AdditionalFields {
    s.filter(|s| !s.trim().is_empty())
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn insert_strategy(conn: &Connection, s: &StrategyRecord) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO strategies(name, description) VALUES (?1, ?2)",
        params![s.name, s.description],
    )
    .map_err(|e| StoreError::from_insert(e, "strategy", &s.name))?;
    Ok(conn.last_insert_rowid())
}

fn insert_metric(conn: &Connection, m: &Metric) -> StoreResult<i64> {
    let domain_id = lookup_or_insert(conn, "domains", &m.domain)?;
    conn.execute(
        "INSERT INTO metrics(name, domain_id, description) VALUES (?1, ?2, ?3)",
        params![m.name, domain_id, m.description],
    )
    .map_err(|e| StoreError::from_insert(e, "metric", &m.name))?;
    let metric_id = conn.last_insert_rowid();
    for s in &m.strategies {
        let sid = lookup_or_insert(conn, "strategies", s)?;
        conn.execute(
            "INSERT OR IGNORE INTO metric_strategy(metric_id, strategy_id) VALUES (?1, ?2)",
            params![metric_id, sid],
        )?;
    }
    Ok(metric_id)
}

fn load_metric(conn: &Connection, id: i64) -> StoreResult<Metric> {
    let row: Option<(String, i64, Option<String>)> = conn
        .query_row(
            "SELECT name, domain_id, description FROM metrics WHERE id = ?1",
            params![id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let (name, domain_id, description) = row.ok_or_else(|| StoreError::not_found("metric", id))?;
    let mut stmt = conn.prepare(
        "SELECT s.name FROM metric_strategy ms JOIN strategies s ON s.id = ms.strategy_id
         WHERE ms.metric_id = ?1 ORDER BY s.id",
    )?;
    let strategies = stmt
        .query_map(params![id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Metric {
        id: Some(id),
        name,
        domain: name_of(conn, "domains", domain_id)?,
        description,
        strategies,
    })
}

fn insert_prompt(conn: &Connection, p: &Prompt) -> StoreResult<i64> {
    let digest = p.digest();
    let lang = lookup_or_insert(conn, "languages", &p.language)?;
    let domain = lookup_or_insert(conn, "domains", &p.domain)?;
    conn.execute(
        "INSERT INTO prompts(digest, system_prompt, user_prompt, language_id, domain_id, fields_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            digest,
            p.system_prompt,
            p.user_prompt,
            lang,
            domain,
            fields_to_json(&p.additional_fields)?
        ],
    )
    .map_err(|e| StoreError::from_insert(e, "prompt", &digest))?;
    Ok(conn.last_insert_rowid())
}

fn get_or_insert_prompt(conn: &Connection, p: &Prompt) -> StoreResult<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM prompts WHERE digest = ?1",
            params![p.digest()],
            |r| r.get(0),
        )
        .optional()?;
    match existing {
        Some(id) => Ok(id),
        None => insert_prompt(conn, p),
    }
}

fn load_prompt(conn: &Connection, id: i64) -> StoreResult<Prompt> {
    let row: Option<(Option<String>, String, i64, i64, Option<String>)> = conn
        .query_row(
            "SELECT system_prompt, user_prompt, language_id, domain_id, fields_json
             FROM prompts WHERE id = ?1",
            params![id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()?;
    let (system_prompt, user_prompt, lang, domain, fields) =
        row.ok_or_else(|| StoreError::not_found("prompt", id))?;
    Ok(Prompt {
        id: Some(id),
        system_prompt,
        user_prompt,
        language: name_of(conn, "languages", lang)?,
        domain: name_of(conn, "domains", domain)?,
        additional_fields: fields_from_json(fields),
    })
}

fn insert_response(conn: &Connection, r: &Response) -> StoreResult<i64> {
    let digest = r.digest();
    let lang = lookup_or_insert(conn, "languages", &r.language)?;
    conn.execute(
        "INSERT INTO responses(digest, text, response_type, language_id, fields_json)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            digest,
            r.text,
            r.response_type.as_str(),
            lang,
            fields_to_json(&r.additional_fields)?
        ],
    )
    .map_err(|e| StoreError::from_insert(e, "response", &digest))?;
    Ok(conn.last_insert_rowid())
}

fn get_or_insert_response(conn: &Connection, r: &Response) -> StoreResult<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM responses WHERE digest = ?1",
            params![r.digest()],
            |row| row.get(0),
        )
        .optional()?;
    match existing {
        Some(id) => Ok(id),
        None => insert_response(conn, r),
    }
}

fn load_response(conn: &Connection, id: i64) -> StoreResult<Response> {
    let row: Option<(String, String, i64, Option<String>)> = conn
        .query_row(
            "SELECT text, response_type, language_id, fields_json FROM responses WHERE id = ?1",
            params![id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let (text, ty, lang, fields) = row.ok_or_else(|| StoreError::not_found("response", id))?;
    Ok(Response {
        id: Some(id),
        text,
        response_type: ResponseType::parse(&ty),
        language: name_of(conn, "languages", lang)?,
        additional_fields: fields_from_json(fields),
    })
}

fn insert_judge_prompt(conn: &Connection, j: &LlmJudgePrompt) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO llm_judge_prompts(prompt) VALUES (?1)",
        params![j.prompt],
    )?;
    Ok(conn.last_insert_rowid())
}

fn link_metric_testcase(conn: &Connection, metric_id: i64, testcase_id: i64) -> StoreResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO metric_testcase(metric_id, testcase_id) VALUES (?1, ?2)",
        params![metric_id, testcase_id],
    )?;
    Ok(())
}

/// Checks the name before writing anything, so a duplicate leaves no
/// prompt, response or judge-prompt rows behind.
fn insert_testcase(conn: &Connection, tc: &TestCase) -> StoreResult<i64> {
    let taken: Option<i64> = conn
        .query_row(
            "SELECT id FROM testcases WHERE name = ?1",
            params![tc.name],
            |r| r.get(0),
        )
        .optional()?;
    if taken.is_some() {
        return Err(StoreError::already_exists("testcase", &tc.name));
    }
    let prompt_id = get_or_insert_prompt(conn, &tc.prompt)?;
    let response_id = tc
        .response
        .as_ref()
        .map(|r| get_or_insert_response(conn, r))
        .transpose()?;
    let strategy_id = tc
        .strategy
        .as_deref()
        .map(|s| lookup_or_insert(conn, "strategies", s))
        .transpose()?;
    let judge_id = tc
        .judge_prompt
        .as_ref()
        .map(|j| insert_judge_prompt(conn, j))
        .transpose()?;
    conn.execute(
        "INSERT INTO testcases(name, prompt_id, response_id, strategy_id, judge_prompt_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![tc.name, prompt_id, response_id, strategy_id, judge_id],
    )
    .map_err(|e| StoreError::from_insert(e, "testcase", &tc.name))?;
    let id = conn.last_insert_rowid();
    for m in &tc.metrics {
        let metric_id = id_by_name(conn, "metrics", "metric", m)?;
        link_metric_testcase(conn, metric_id, id)?;
    }
    Ok(id)
}

fn load_testcase(conn: &Connection, id: i64) -> StoreResult<TestCase> {
    let row: Option<(String, i64, Option<i64>, Option<i64>, Option<i64>)> = conn
        .query_row(
            "SELECT name, prompt_id, response_id, strategy_id, judge_prompt_id
             FROM testcases WHERE id = ?1",
            params![id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()?;
    let (name, prompt_id, response_id, strategy_id, judge_id) =
        row.ok_or_else(|| StoreError::not_found("testcase", id))?;

    let judge_prompt = match judge_id {
        Some(jid) => conn
            .query_row(
                "SELECT prompt FROM llm_judge_prompts WHERE id = ?1",
                params![jid],
                |r| r.get::<_, String>(0),
            )
            .optional()?
            .map(|prompt| LlmJudgePrompt {
                id: Some(jid),
                prompt,
            }),
        None => None,
    };

    let mut stmt = conn.prepare(
        "SELECT m.name FROM metric_testcase mt JOIN metrics m ON m.id = mt.metric_id
         WHERE mt.testcase_id = ?1 ORDER BY m.id",
    )?;
    let metrics = stmt
        .query_map(params![id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TestCase {
        id: Some(id),
        name,
        prompt: load_prompt(conn, prompt_id)?,
        response: response_id.map(|rid| load_response(conn, rid)).transpose()?,
        strategy: strategy_id
            .map(|sid| name_of(conn, "strategies", sid))
            .transpose()?,
        judge_prompt,
        metrics,
    })
}

fn insert_plan(conn: &Connection, p: &TestPlan) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO testplans(name, description) VALUES (?1, ?2)",
        params![p.name, p.description],
    )
    .map_err(|e| StoreError::from_insert(e, "testplan", &p.name))?;
    let plan_id = conn.last_insert_rowid();
    for m in &p.metrics {
        let metric_id = id_by_name(conn, "metrics", "metric", m)?;
        conn.execute(
            "INSERT OR IGNORE INTO plan_metric(plan_id, metric_id) VALUES (?1, ?2)",
            params![plan_id, metric_id],
        )?;
    }
    Ok(plan_id)
}

fn load_plan(conn: &Connection, id: i64) -> StoreResult<TestPlan> {
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT name, description FROM testplans WHERE id = ?1",
            params![id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let (name, description) = row.ok_or_else(|| StoreError::not_found("testplan", id))?;
    let mut stmt = conn.prepare(
        "SELECT m.name FROM plan_metric pm JOIN metrics m ON m.id = pm.metric_id
         WHERE pm.plan_id = ?1 ORDER BY m.id",
    )?;
    let metrics = stmt
        .query_map(params![id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TestPlan {
        id: Some(id),
        name,
        description,
        metrics,
    })
}

fn insert_target(conn: &Connection, t: &Target) -> StoreResult<i64> {
    let domain_id = lookup_or_insert(conn, "domains", &t.domain)?;
    for l in &t.languages {
        lookup_or_insert(conn, "languages", l)?;
    }
    conn.execute(
        "INSERT INTO targets(name, target_type, url, domain_id, agent_name, languages_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            t.name,
            t.target_type.as_str(),
            t.url,
            domain_id,
            t.agent_name,
            serde_json::to_string(&t.languages)?
        ],
    )
    .map_err(|e| StoreError::from_insert(e, "target", &t.name))?;
    Ok(conn.last_insert_rowid())
}

fn load_target(conn: &Connection, id: i64) -> StoreResult<Target> {
    type Row = (String, String, Option<String>, i64, Option<String>, Option<String>);
    let row: Option<Row> = conn
        .query_row(
            "SELECT name, target_type, url, domain_id, agent_name, languages_json
             FROM targets WHERE id = ?1",
            params![id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
        )
        .optional()?;
    let (name, ty, url, domain_id, agent_name, langs) =
        row.ok_or_else(|| StoreError::not_found("target", id))?;
    let target_type = TargetType::parse(&ty).ok_or_else(|| StoreError::InvalidState {
        entity: "target",
        key: name.clone(),
        message: format!("unknown target type {}", ty),
    })?;
    Ok(Target {
        id: Some(id),
        name,
        target_type,
        url,
        domain: name_of(conn, "domains", domain_id)?,
        languages: langs
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        agent_name,
    })
}

fn load_run(conn: &Connection, id: i64) -> StoreResult<Run> {
    conn.query_row(
        "SELECT id, name, target_id, status, start_ts, end_ts FROM runs WHERE id = ?1",
        params![id],
        |r| {
            Ok(Run {
                id: r.get(0)?,
                name: r.get(1)?,
                target_id: r.get(2)?,
                status: RunStatus::parse(&r.get::<_, String>(3)?),
                start_ts: r.get(4)?,
                end_ts: r.get(5)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("run", id))
}

fn load_run_detail(conn: &Connection, id: i64) -> StoreResult<RunDetail> {
    conn.query_row(
        "SELECT id, run_id, plan_id, metric_id, testcase_id, status, score, reason
         FROM run_details WHERE id = ?1",
        params![id],
        |r| {
            Ok(RunDetail {
                id: r.get(0)?,
                run_id: r.get(1)?,
                plan_id: r.get(2)?,
                metric_id: r.get(3)?,
                testcase_id: r.get(4)?,
                status: RunStatus::parse(&r.get::<_, String>(5)?),
                score: r.get(6)?,
                reason: r.get(7)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("run_detail", id))
}

fn migrate_v02(conn: &Connection) -> StoreResult<()> {
    let cols = get_columns(conn, "run_details")?;
    add_column_if_missing(conn, &cols, "run_details", "score", "REAL")?;
    add_column_if_missing(conn, &cols, "run_details", "reason", "TEXT")?;
    add_column_if_missing(conn, &cols, "run_details", "updated_ts", "TEXT")?;
    Ok(())
}

fn get_columns(conn: &Connection, table: &str) -> StoreResult<std::collections::HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut out = std::collections::HashSet::new();
    for r in rows {
        out.insert(r?);
    }
    Ok(out)
}

fn add_column_if_missing(
    conn: &Connection,
    cols: &std::collections::HashSet<String>,
    table: &str,
    col: &str,
    ty: &str,
) -> StoreResult<()> {
    if !cols.contains(col) {
        let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, col, ty);
        conn.execute(&sql, [])?;
    }
    Ok(())
}
