use super::args::Cli;
use litmus_core::config::{load_config, HarnessConfig, CONFIG_TEMPLATE};
use litmus_core::storage::store::Store;

pub mod execute;
pub mod import;
pub mod list;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const RUN_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    if cli.get_config_template {
        print!("{}", CONFIG_TEMPLATE);
        return Ok(exit_codes::OK);
    }

    if !cli.has_action() {
        eprintln!("nothing to do: pass -e, -I or one of -P/-M/-C/-G/-N (see --help)");
        return Ok(exit_codes::CONFIG_ERROR);
    }

    let Some(config_path) = cli.config.as_deref() else {
        tracing::error!(event = "cli.missing_config", "a config file is required (-c)");
        return Ok(exit_codes::CONFIG_ERROR);
    };
    let cfg = load_config(config_path)?;
    let store = open_store(&cfg)?;

    if let Some(dataset) = cli.import.as_deref() {
        import::cmd_import(&store, dataset)?;
    }

    list::cmd_list(&store, &cli)?;

    if cli.execute {
        return execute::cmd_execute(&cfg, store, &cli).await;
    }
    Ok(exit_codes::OK)
}

fn open_store(cfg: &HarnessConfig) -> anyhow::Result<Store> {
    let path = cfg.db_path();
    if let Some(legacy) = cfg.database.describe() {
        tracing::debug!(event = "store.legacy_database", url = %legacy, "ignoring server connection, using sqlite");
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let store = Store::open(&path)?;
    store.init_schema()?;
    tracing::debug!(event = "store.opened", path = %path.display());
    Ok(store)
}
