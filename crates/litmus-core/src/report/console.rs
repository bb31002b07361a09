use crate::engine::RunSummary;
use crate::model::{Metric, Run, RunStatus, Target, TestCase, TestPlan};
use crate::storage::store::{Store, StoreResult};

/// Left-aligned text table sized to its widest cell per column.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<w$}", c, w = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&line(headers.to_vec()));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  "),
    );
    out.push('\n');
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
        out.push('\n');
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", head)
}

fn id(v: Option<i64>) -> String {
    v.map(|i| i.to_string()).unwrap_or_default()
}

pub fn plans_table(plans: &[TestPlan]) -> String {
    let rows = plans
        .iter()
        .map(|p| {
            vec![
                id(p.id),
                p.name.clone(),
                p.metrics.join(","),
                truncate(p.description.as_deref().unwrap_or(""), 60),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&["ID", "NAME", "METRICS", "DESCRIPTION"], &rows)
}

pub fn metrics_table(metrics: &[Metric]) -> String {
    let rows = metrics
        .iter()
        .map(|m| {
            vec![
                id(m.id),
                m.name.clone(),
                m.domain.clone(),
                m.strategies.join(","),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&["ID", "NAME", "DOMAIN", "STRATEGIES"], &rows)
}

pub fn testcases_table(cases: &[TestCase]) -> String {
    let rows = cases
        .iter()
        .map(|t| {
            vec![
                id(t.id),
                t.name.clone(),
                t.prompt.language.clone(),
                t.strategy.clone().unwrap_or_default(),
                truncate(&t.prompt.user_prompt.replace('\n', " "), 50),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&["ID", "NAME", "LANGUAGE", "STRATEGY", "PROMPT"], &rows)
}

pub fn targets_table(targets: &[Target]) -> String {
    let rows = targets
        .iter()
        .map(|t| {
            vec![
                id(t.id),
                t.name.clone(),
                t.target_type.as_str().to_string(),
                t.url.clone().unwrap_or_default(),
                t.domain.clone(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&["ID", "NAME", "TYPE", "URL", "DOMAIN"], &rows)
}

pub fn runs_table(runs: &[Run]) -> String {
    let rows = runs
        .iter()
        .map(|r| {
            vec![
                r.id.to_string(),
                r.name.clone(),
                r.target_id.to_string(),
                r.status.as_str().to_string(),
                r.start_ts.clone().unwrap_or_default(),
                r.end_ts.clone().unwrap_or_default(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&["ID", "NAME", "TARGET", "STATUS", "STARTED", "ENDED"], &rows)
}

pub fn print_plans(plans: &[TestPlan]) {
    print!("{}", plans_table(plans));
}

pub fn print_metrics(metrics: &[Metric]) {
    print!("{}", metrics_table(metrics));
}

pub fn print_testcases(cases: &[TestCase]) {
    print!("{}", testcases_table(cases));
}

pub fn print_targets(targets: &[Target]) {
    print!("{}", targets_table(targets));
}

pub fn print_runs(runs: &[Run]) {
    print!("{}", runs_table(runs));
}

/// Per-detail lines plus totals for a finished execution, on stderr.
pub fn print_run_summary(store: &Store, summary: &RunSummary) -> StoreResult<()> {
    let details = store.list_run_details(summary.run_id)?;
    eprintln!("\nRun '{}' (#{})", summary.run_name, summary.run_id);

    for d in &details {
        let name = store
            .get_testcase(d.testcase_id)
            .map(|t| t.name)
            .unwrap_or_else(|_| format!("testcase #{}", d.testcase_id));
        let score = d.score.map(|s| format!("{:.2}", s)).unwrap_or_else(|| "-".into());
        let reason = truncate(d.reason.as_deref().unwrap_or(""), 80);
        match d.status {
            RunStatus::Completed => eprintln!("✅ {:<24} {}  {}", name, score, reason),
            RunStatus::Failed => eprintln!("❌ {:<24} FAILED: {}", name, reason),
            RunStatus::Running | RunStatus::New => {
                eprintln!("⏳ {:<24} {}", name, d.status.as_str())
            }
        }
    }

    eprintln!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!(
        "Summary: {} executed, {} completed, {} failed, {} skipped",
        summary.executed, summary.completed, summary.failed, summary.skipped
    );
    if summary.interrupted {
        eprintln!(
            "Interrupted: run '{}' is still RUNNING, rerun with -r {} to resume",
            summary.run_name, summary.run_name
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_columns_align() {
        let out = render_table(
            &["ID", "NAME"],
            &[
                vec!["1".into(), "short".into()],
                vec!["10".into(), "a much longer name".into()],
            ],
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "ID  NAME");
        assert_eq!(lines[1], "--  ------------------");
        assert_eq!(lines[2], "1   short");
        assert_eq!(lines[3], "10  a much longer name");
    }

    #[test]
    fn truncates_long_cells() {
        assert_eq!(truncate("abcdefgh", 6), "abc...");
        assert_eq!(truncate("abc", 6), "abc");
    }
}
