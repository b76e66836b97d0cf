//! Wires configured adapters into the event processor.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

use crate::adapters::fs::FsReportStore;
use crate::adapters::http::{Disabled, HttpEventPublisher, HttpLisClient, HttpMasterDataClient, WebhookNotifier};
use crate::adapters::sqlite::{
    initialize_database, SqliteHistoricalValues, SqliteKeyValueStore, SqliteOrderLookup,
    SqliteReconciliationRepository,
};
use crate::domain::models::{Config, HttpConfig};
use crate::domain::ports::{EventPublisher, LisSourceClient, MasterDataClient, NotificationSink};
use crate::services::{EventProcessor, Ports};

/// Open the configured database, applying pending migrations.
pub async fn open_database(config: &Config) -> Result<SqlitePool> {
    initialize_database(&config.database)
        .await
        .with_context(|| format!("failed to open database {}", config.database.url))
}

/// Build the processor's collaborators from `config` over `pool`.
///
/// Collaborators without a configured URL are replaced by [`Disabled`].
pub fn build_ports(config: &Config, pool: &SqlitePool) -> Result<Ports> {
    let http = &config.http;
    let timeout = Duration::from_secs(http.timeout_secs);

    let master_data: Arc<dyn MasterDataClient> = match &http.master_data_url {
        Some(url) => Arc::new(HttpMasterDataClient::new(url, timeout)?),
        None => Arc::new(Disabled),
    };
    let lis: Arc<dyn LisSourceClient> = match &http.lis_url {
        Some(url) => Arc::new(HttpLisClient::new(url, timeout)?),
        None => Arc::new(Disabled),
    };
    let notifier: Arc<dyn NotificationSink> = match &http.notification_url {
        Some(url) => Arc::new(WebhookNotifier::new(url, timeout)?),
        None => Arc::new(Disabled),
    };
    let publisher: Arc<dyn EventPublisher> = match &http.publisher_url {
        Some(url) => Arc::new(HttpEventPublisher::new(url, timeout)?),
        None => Arc::new(Disabled),
    };
    log_disabled(http);

    Ok(Ports {
        kv: Arc::new(SqliteKeyValueStore::new(pool.clone())),
        orders: Arc::new(SqliteOrderLookup::new(pool.clone())),
        master_data,
        history: Arc::new(SqliteHistoricalValues::new(pool.clone())),
        lis,
        repository: Arc::new(SqliteReconciliationRepository::new(pool.clone())),
        notifier,
        publisher,
        reports: Arc::new(FsReportStore::new(config.reports.dir.clone())),
    })
}

/// Open the database and build a ready processor.
pub async fn build_processor(config: &Config) -> Result<EventProcessor> {
    let pool = open_database(config).await?;
    let ports = build_ports(config, &pool)?;
    Ok(EventProcessor::new(ports, config))
}

fn log_disabled(http: &HttpConfig) {
    for (name, url) in [
        ("master_data", &http.master_data_url),
        ("lis", &http.lis_url),
        ("notification", &http.notification_url),
        ("publisher", &http.publisher_url),
    ] {
        if url.is_none() {
            info!(collaborator = name, "no URL configured, collaborator disabled");
        }
    }
}
