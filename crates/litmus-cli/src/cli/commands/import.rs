use anyhow::{Context, Result};
use litmus_core::model::Dataset;
use litmus_core::storage::store::Store;
use std::path::Path;

pub fn cmd_import(store: &Store, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset: {}", path.display()))?;
    let dataset: Dataset = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse dataset: {}", path.display()))?;

    let stats = store.import_dataset(&dataset)?;
    tracing::info!(
        event = "dataset.imported",
        file = %path.display(),
        testcases = stats.testcases,
        skipped = stats.skipped
    );
    eprintln!(
        "Imported {} strategies, {} metrics, {} plans, {} targets, {} test cases ({} already present)",
        stats.strategies, stats.metrics, stats.plans, stats.targets, stats.testcases, stats.skipped
    );
    Ok(())
}
