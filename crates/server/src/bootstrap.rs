use std::sync::Arc;

use grantflow_core::approvals::{ApprovalService, ServiceSettings};
use grantflow_core::config::AppConfig;
use grantflow_db::{connect_with_config, migrations, DbPool, SqlApprovalStore};
use thiserror::Error;
use tracing::info;

use crate::notify::TracingEventSink;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<ApprovalService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        embedded = migrations::embedded_count(),
        "database migrations applied"
    );

    let service = Arc::new(ApprovalService::new(
        Arc::new(SqlApprovalStore::new(db_pool.clone())),
        Arc::new(TracingEventSink),
        ServiceSettings::from_config(&config.approvals),
    ));

    Ok(Application { config, db_pool, service })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use grantflow_core::config::{AppConfig, ConfigOverrides, LoadOptions};

    use crate::bootstrap::{bootstrap_with_config, BootstrapError};

    fn config(database_url: &str) -> AppConfig {
        let mut config = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                expiry_days: Some(3),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("config");
        // every in-memory sqlite connection is a separate database
        config.database.max_connections = 1;
        config
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_wires_the_service() {
        let app = bootstrap_with_config(config("sqlite::memory:")).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN \
             ('approval_workflow', 'approval_request', 'approval_decision', 'grant_stage')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("count tables");
        assert_eq!(table_count, 4);
        assert_eq!(app.service.settings().request_expiry, Duration::days(3));

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn unreachable_database_fails_fast() {
        let mut unreachable = config("sqlite:///grantflow-missing-dir/nested/grantflow.db");
        unreachable.database.timeout_secs = 1;

        let error = bootstrap_with_config(unreachable).await.err().expect("connect failure");
        assert!(matches!(error, BootstrapError::DatabaseConnect(_)));
    }
}
