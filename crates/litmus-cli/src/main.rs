use clap::Parser;

mod cli;

use cli::args::Cli;
use cli::commands::{dispatch, exit_codes};
use tracing_subscriber::{fmt, EnvFilter};

fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "off",
        1 => "error",
        2 => "warn",
        3 => "info",
        4 => "debug",
        _ => "trace",
    }
}

/// `LITMUS_LOG` takes precedence over `-v`; `LITMUS_LOG_FORMAT=json` switches
/// to JSON lines. Logs always go to stderr so tables on stdout stay clean.
fn init_logging(verbosity: u8) {
    let directive = std::env::var("LITMUS_LOG").unwrap_or_else(|_| level_for(verbosity).to_string());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LITMUS_LOG_FORMAT").ok().as_deref() == Some("json");

    let builder = fmt()
        .with_env_filter(filter)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr);
    if json {
        builder
            .json()
            .with_target(true)
            .with_current_span(false)
            .with_span_list(false)
            .init();
    } else {
        builder.with_target(false).compact().init();
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbosity);

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) if litmus_core::errors::is_config_error(&e) => {
            tracing::error!(event = "cli.config_error", error = %e);
            eprintln!("error: {e}");
            exit_codes::CONFIG_ERROR
        }
        Err(e) => {
            tracing::error!(event = "cli.fatal", error = ?e);
            eprintln!("fatal: {e:?}");
            exit_codes::RUN_FAILED
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(level_for(0), "off");
        assert_eq!(level_for(3), "info");
        assert_eq!(level_for(5), "trace");
        assert_eq!(level_for(9), "trace");
    }
}
