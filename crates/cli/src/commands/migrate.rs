use crate::commands::{runtime, CommandResult};
use grantflow_core::config::{AppConfig, LoadOptions};
use grantflow_db::{connect_with_config, migrations, DbPool};

const COMMAND: &str = "migrate";

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let before = applied_count(&pool).await;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        let after = applied_count(&pool).await;
        pool.close().await;
        Ok::<(usize, usize), (&'static str, String, u8)>((before, after))
    });

    match result {
        Ok((before, after)) => CommandResult::success(
            COMMAND,
            format!(
                "applied {} pending migration(s); {after} of {} embedded migrations recorded",
                after.saturating_sub(before),
                migrations::embedded_count()
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}

/// Zero when the bookkeeping table does not exist yet.
async fn applied_count(pool: &DbPool) -> usize {
    migrations::applied_count(pool)
        .await
        .ok()
        .and_then(|count| usize::try_from(count).ok())
        .unwrap_or(0)
}
