use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "litmus",
    version,
    about = "Runs test plans against a chat agent and scores its replies"
)]
pub struct Cli {
    /// Harness config (JSON)
    #[arg(short = 'c', long, env = "LITMUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print a config template and exit
    #[arg(short = 'T', long = "get-config-template")]
    pub get_config_template: bool,

    #[arg(short = 'P', long = "get-plans")]
    pub get_plans: bool,

    #[arg(short = 'M', long = "get-metrics")]
    pub get_metrics: bool,

    /// List test cases; honours --testplan-id, --metric-id and --max-testcases
    #[arg(short = 'C', long = "get-testcases")]
    pub get_testcases: bool,

    #[arg(short = 'G', long = "get-targets")]
    pub get_targets: bool,

    #[arg(short = 'N', long = "get-runs")]
    pub get_runs: bool,

    #[arg(short = 'p', long = "testplan-id")]
    pub testplan_id: Option<i64>,

    #[arg(short = 't', long = "testcase-id")]
    pub testcase_id: Option<i64>,

    #[arg(short = 'm', long = "metric-id")]
    pub metric_id: Option<i64>,

    /// Cap on test cases per metric
    #[arg(short = 'n', long = "max-testcases", default_value_t = 10)]
    pub max_testcases: usize,

    #[arg(short = 'r', long = "run-name")]
    pub run_name: Option<String>,

    /// Resume a run that already completed
    #[arg(short = 'R', long = "run-continue")]
    pub run_continue: bool,

    #[arg(short = 'e', long)]
    pub execute: bool,

    /// 0 = off, 1 = error, 2 = warn, 3 = info, 4 = debug, 5 = trace
    #[arg(
        short = 'v',
        long,
        default_value_t = 3,
        value_parser = clap::value_parser!(u8).range(0..=5)
    )]
    pub verbosity: u8,

    /// Load a seed dataset (JSON) into the store
    #[arg(short = 'I', long = "import", value_name = "DATASET")]
    pub import: Option<PathBuf>,
}

impl Cli {
    pub fn has_action(&self) -> bool {
        self.get_plans
            || self.get_metrics
            || self.get_testcases
            || self.get_targets
            || self.get_runs
            || self.execute
            || self.import.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_flags_parse() {
        let cli = Cli::try_parse_from(["litmus", "-c", "x.json", "-e", "-r", "nightly", "-R", "-p", "2", "-n", "5"])
            .unwrap();
        assert!(cli.execute && cli.run_continue);
        assert_eq!(cli.run_name.as_deref(), Some("nightly"));
        assert_eq!(cli.testplan_id, Some(2));
        assert_eq!(cli.max_testcases, 5);
        assert_eq!(cli.verbosity, 3);
    }

    #[test]
    fn verbosity_is_bounded() {
        assert!(Cli::try_parse_from(["litmus", "-v", "6"]).is_err());
        assert_eq!(Cli::try_parse_from(["litmus", "-v", "0"]).unwrap().verbosity, 0);
    }
}
