pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS languages (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS domains (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS strategies (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE,
  description TEXT
);

CREATE TABLE IF NOT EXISTS metrics (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE,
  domain_id INTEGER NOT NULL REFERENCES domains(id),
  description TEXT
);

CREATE TABLE IF NOT EXISTS metric_strategy (
  metric_id INTEGER NOT NULL REFERENCES metrics(id),
  strategy_id INTEGER NOT NULL REFERENCES strategies(id),
  PRIMARY KEY (metric_id, strategy_id)
);

CREATE TABLE IF NOT EXISTS prompts (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  digest TEXT NOT NULL UNIQUE,
  system_prompt TEXT,
  user_prompt TEXT NOT NULL,
  language_id INTEGER NOT NULL REFERENCES languages(id),
  domain_id INTEGER NOT NULL REFERENCES domains(id),
  fields_json TEXT
);

CREATE TABLE IF NOT EXISTS responses (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  digest TEXT NOT NULL UNIQUE,
  text TEXT NOT NULL,
  response_type TEXT NOT NULL,
  language_id INTEGER NOT NULL REFERENCES languages(id),
  fields_json TEXT
);

CREATE TABLE IF NOT EXISTS llm_judge_prompts (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  prompt TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS testcases (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE,
  prompt_id INTEGER NOT NULL REFERENCES prompts(id),
  response_id INTEGER REFERENCES responses(id),
  strategy_id INTEGER REFERENCES strategies(id),
  judge_prompt_id INTEGER REFERENCES llm_judge_prompts(id)
);

CREATE TABLE IF NOT EXISTS metric_testcase (
  metric_id INTEGER NOT NULL REFERENCES metrics(id),
  testcase_id INTEGER NOT NULL REFERENCES testcases(id),
  PRIMARY KEY (metric_id, testcase_id)
);

CREATE TABLE IF NOT EXISTS testplans (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE,
  description TEXT
);

CREATE TABLE IF NOT EXISTS plan_metric (
  plan_id INTEGER NOT NULL REFERENCES testplans(id),
  metric_id INTEGER NOT NULL REFERENCES metrics(id),
  PRIMARY KEY (plan_id, metric_id)
);

CREATE TABLE IF NOT EXISTS targets (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE,
  target_type TEXT NOT NULL,
  url TEXT,
  domain_id INTEGER NOT NULL REFERENCES domains(id),
  agent_name TEXT,
  languages_json TEXT
);

CREATE TABLE IF NOT EXISTS runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE,
  target_id INTEGER NOT NULL REFERENCES targets(id),
  status TEXT NOT NULL,
  start_ts TEXT,
  end_ts TEXT
);

CREATE TABLE IF NOT EXISTS run_details (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  plan_id INTEGER NOT NULL REFERENCES testplans(id),
  metric_id INTEGER NOT NULL REFERENCES metrics(id),
  testcase_id INTEGER NOT NULL REFERENCES testcases(id),
  status TEXT NOT NULL,
  score REAL,
  reason TEXT,
  updated_ts TEXT,
  UNIQUE(run_id, plan_id, metric_id, testcase_id)
);

CREATE TABLE IF NOT EXISTS conversations (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_detail_id INTEGER NOT NULL UNIQUE REFERENCES run_details(id),
  testcase_id INTEGER NOT NULL REFERENCES testcases(id),
  target_id INTEGER NOT NULL REFERENCES targets(id),
  agent_response TEXT,
  prompt_ts TEXT,
  response_ts TEXT
);

CREATE INDEX IF NOT EXISTS idx_run_details_run ON run_details(run_id);
CREATE INDEX IF NOT EXISTS idx_metric_testcase_tc ON metric_testcase(testcase_id);
"#;
