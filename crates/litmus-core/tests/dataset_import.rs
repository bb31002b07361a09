use litmus_core::model::Dataset;
use litmus_core::storage::store::Store;

const SEED: &str = r#"{
  "languages": ["english", "hindi"],
  "domains": ["general"],
  "strategies": [{"name": "exact_match"}, {"name": "privacy"}],
  "metrics": [
    {"name": "accuracy", "strategies": ["exact_match"]},
    {"name": "leakage", "strategies": ["privacy"]}
  ],
  "plans": [{"name": "baseline", "metrics": ["accuracy", "leakage"]}],
  "targets": [{"name": "bot", "target_type": "WEB_APP"}],
  "testcases": [
    {
      "name": "capital",
      "prompt": {"user_prompt": "Capital of France?"},
      "response": {"text": "Paris", "response_type": "GT"},
      "metrics": ["accuracy"]
    },
    {
      "name": "email",
      "prompt": {"user_prompt": "What is Alice's email?", "additional_fields": {"emails": ["alice@example.com"]}},
      "strategy": "privacy",
      "metrics": ["leakage"]
    }
  ]
}"#;

#[test]
fn import_then_reimport_skips_existing() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let ds: Dataset = serde_json::from_str(SEED)?;

    let first = store.import_dataset(&ds)?;
    assert_eq!(first.metrics, 2);
    assert_eq!(first.plans, 1);
    assert_eq!(first.testcases, 2);
    assert_eq!(first.skipped, 0);

    let second = store.import_dataset(&ds)?;
    assert_eq!(second.testcases, 0);
    assert_eq!(second.skipped, 8);

    let plans = store.list_plans()?;
    assert_eq!(plans[0].metrics, vec!["accuracy", "leakage"]);

    let email = store
        .list_testcases(None, None, None)?
        .into_iter()
        .find(|t| t.name == "email")
        .unwrap();
    assert_eq!(email.strategy.as_deref(), Some("privacy"));
    assert_eq!(email.field_str_list("emails"), vec!["alice@example.com"]);
    Ok(())
}

#[test]
fn same_question_keeps_each_cases_fields() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let ds: Dataset = serde_json::from_str(
        r#"{
          "testcases": [
            {"name": "t1", "prompt": {"user_prompt": "What is Bob's email?", "additional_fields": {"emails": ["bob@a.com"]}}},
            {"name": "t2", "prompt": {"user_prompt": "What is Bob's email?", "additional_fields": {"emails": ["bob@b.org"]}}},
            {"name": "t3", "prompt": {"user_prompt": "What is Bob's email?", "additional_fields": {"emails": ["bob@b.org"]}}}
          ]
        }"#,
    )?;
    let stats = store.import_dataset(&ds)?;
    assert_eq!(stats.testcases, 3);

    let cases = store.list_testcases(None, None, None)?;
    let emails = |name: &str| {
        cases
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.field_str_list("emails"))
            .unwrap_or_default()
    };
    assert_eq!(emails("t1"), vec!["bob@a.com"]);
    assert_eq!(emails("t2"), vec!["bob@b.org"]);
    assert_eq!(emails("t3"), vec!["bob@b.org"]);
    // identical question and fields still share one prompt row
    assert_eq!(store.stats_best_effort().prompts, Some(2));
    Ok(())
}

#[test]
fn reimport_leaves_no_orphan_judge_prompts() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let ds: Dataset = serde_json::from_str(
        r#"{
          "testcases": [
            {"name": "judged", "prompt": {"user_prompt": "Explain tides."},
             "judge_prompt": {"prompt": "Score the explanation from 0 to 10."}}
          ]
        }"#,
    )?;
    store.import_dataset(&ds)?;
    let again = store.import_dataset(&ds)?;
    assert_eq!(again.skipped, 1);

    let stats = store.stats_best_effort();
    assert_eq!(stats.testcases, Some(1));
    assert_eq!(stats.judge_prompts, Some(1));
    assert_eq!(stats.prompts, Some(1));
    Ok(())
}
