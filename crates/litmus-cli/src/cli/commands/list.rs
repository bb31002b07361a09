use crate::cli::args::Cli;
use litmus_core::report::console;
use litmus_core::storage::store::Store;

pub fn cmd_list(store: &Store, cli: &Cli) -> anyhow::Result<()> {
    if cli.get_plans {
        console::print_plans(&store.list_plans()?);
    }
    if cli.get_metrics {
        console::print_metrics(&store.list_metrics()?);
    }
    if cli.get_testcases {
        let cases = store.list_testcases(cli.testplan_id, cli.metric_id, Some(cli.max_testcases))?;
        console::print_testcases(&cases);
    }
    if cli.get_targets {
        console::print_targets(&store.list_targets()?);
    }
    if cli.get_runs {
        console::print_runs(&store.list_runs()?);
    }
    Ok(())
}
