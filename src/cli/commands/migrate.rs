//! `lis-reconciler migrate`

use anyhow::Result;
use serde::Serialize;

use crate::cli::context::open_database;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

/// Result of a migration run.
#[derive(Debug, Serialize)]
pub struct MigrateOutput {
    /// Every migration applied.
    pub success: bool,
    /// Database that was migrated.
    pub database_url: String,
    /// Versions applied by this run.
    pub applied_versions: Vec<i64>,
}

impl CommandOutput for MigrateOutput {
    fn to_human(&self) -> String {
        let versions: Vec<String> = self.applied_versions.iter().map(ToString::to_string).collect();
        format!(
            "Database ready at {} (schema versions: {})",
            self.database_url,
            versions.join(", ")
        )
    }
}

/// Apply pending migrations.
pub async fn execute(config: &Config, json_mode: bool) -> Result<()> {
    let pool = open_database(config).await?;
    let applied_versions: Vec<i64> =
        sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version")
            .fetch_all(&pool)
            .await?;
    pool.close().await;
    output(
        &MigrateOutput {
            success: true,
            database_url: config.database.url.clone(),
            applied_versions,
        },
        json_mode,
    );
    Ok(())
}
