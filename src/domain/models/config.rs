//! Reconciler configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main configuration structure for the reconciler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LogConfig,

    /// Event worker configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Idempotency guard and payload staging TTLs
    #[serde(default)]
    pub guard: GuardConfig,

    /// External collaborator endpoints
    #[serde(default)]
    pub http: HttpConfig,

    /// Auto-approval rules and identities
    #[serde(default)]
    pub approval: ApprovalConfig,

    /// Alert channels
    #[serde(default)]
    pub alerts: AlertConfig,

    /// Report output
    #[serde(default)]
    pub reports: ReportConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// `SQLite` connection URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite:.lis-reconciler/lis.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for log files (optional, if None logs only to stdout)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Enable stdout logging
    #[serde(default = "default_true")]
    pub enable_stdout: bool,

    /// Log rotation policy
    #[serde(default)]
    pub rotation: RotationPolicy,

    /// Log retention in days
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human readable
    Pretty,
}

/// Log file rotation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    /// New file every day
    #[default]
    Daily,
    /// New file every hour
    Hourly,
    /// Single file
    Never,
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_retention_days() -> i64 {
    30
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
            enable_stdout: true,
            rotation: RotationPolicy::default(),
            retention_days: default_retention_days(),
        }
    }
}

/// Event worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Events handled in parallel by `consume`
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Background report jobs running at once
    #[serde(default = "default_report_concurrency")]
    pub report_concurrency: usize,
}

const fn default_concurrency() -> usize {
    4
}

const fn default_report_concurrency() -> usize {
    2
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            report_concurrency: default_report_concurrency(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum refetch attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff for anomaly resync in milliseconds
    #[serde(default = "default_anomaly_base_delay_ms")]
    pub anomaly_base_delay_ms: u64,

    /// Base backoff for missing-report refetch in milliseconds
    #[serde(default = "default_missing_pdf_base_delay_ms")]
    pub missing_pdf_base_delay_ms: u64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_anomaly_base_delay_ms() -> u64 {
    500
}

const fn default_missing_pdf_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            anomaly_base_delay_ms: default_anomaly_base_delay_ms(),
            missing_pdf_base_delay_ms: default_missing_pdf_base_delay_ms(),
        }
    }
}

/// Idempotency guard and staging TTLs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GuardConfig {
    /// How long an idempotency key is held, in seconds
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,

    /// How long a staged payload is kept, in seconds
    #[serde(default = "default_staging_ttl_secs")]
    pub staging_ttl_secs: u64,
}

const fn default_dedup_ttl_secs() -> u64 {
    600
}

const fn default_staging_ttl_secs() -> u64 {
    3600
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            dedup_ttl_secs: default_dedup_ttl_secs(),
            staging_ttl_secs: default_staging_ttl_secs(),
        }
    }
}

/// External collaborator endpoints. An unset URL disables that collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Master-data service base URL
    #[serde(default)]
    pub master_data_url: Option<String>,

    /// LIS base URL
    #[serde(default)]
    pub lis_url: Option<String>,

    /// Notification service base URL
    #[serde(default)]
    pub notification_url: Option<String>,

    /// Downstream event publisher URL
    #[serde(default)]
    pub publisher_url: Option<String>,
}

const fn default_timeout_secs() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            master_data_url: None,
            lis_url: None,
            notification_url: None,
            publisher_url: None,
        }
    }
}

/// Auto-approval rules and system identities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ApprovalConfig {
    /// Investigation codes approved without further checks
    #[serde(default = "default_auto_approval_codes")]
    pub default_auto_approval_codes: BTreeSet<String>,

    /// Master investigation ids exempt from the delta check
    #[serde(default)]
    pub delta_check_whitelisted_investigation_ids: BTreeSet<i64>,

    /// Labs whose QC status can trigger reruns
    #[serde(default)]
    pub qc_enabled_lab_ids: BTreeSet<i64>,

    /// Test codes ignored by payload validation
    #[serde(default = "default_skipped_retry_test_codes")]
    pub skipped_retry_test_codes: BTreeSet<String>,

    /// OMS user id recorded as approver per city
    #[serde(default)]
    pub auto_approval_user_ids: BTreeMap<String, i64>,

    /// Approver used when a city has no entry
    #[serde(default)]
    pub default_auto_approval_user_id: i64,

    /// Send alerts for auto-approval failures
    #[serde(default)]
    pub enable_failure_alerts: bool,

    /// Minutes a pathologist has to act on a saved result
    #[serde(default = "default_doctor_tat_minutes")]
    pub doctor_tat_minutes: i64,

    /// Actor recorded on reruns triggered by the LIS
    #[serde(default = "default_lis_system_id")]
    pub lis_system_id: String,
}

fn default_auto_approval_codes() -> BTreeSet<String> {
    ["OD0246", "OD0247", "OD0248"].into_iter().map(String::from).collect()
}

fn default_skipped_retry_test_codes() -> BTreeSet<String> {
    BTreeSet::from(["ODB002".to_string()])
}

const fn default_doctor_tat_minutes() -> i64 {
    60
}

fn default_lis_system_id() -> String {
    "lis".to_string()
}

impl ApprovalConfig {
    /// Approver recorded on auto-approvals for orders in `city_code`.
    pub fn auto_approval_user_id(&self, city_code: &str) -> i64 {
        self.auto_approval_user_ids
            .get(city_code)
            .copied()
            .unwrap_or(self.default_auto_approval_user_id)
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            default_auto_approval_codes: default_auto_approval_codes(),
            delta_check_whitelisted_investigation_ids: BTreeSet::new(),
            qc_enabled_lab_ids: BTreeSet::new(),
            skipped_retry_test_codes: default_skipped_retry_test_codes(),
            auto_approval_user_ids: BTreeMap::new(),
            default_auto_approval_user_id: 0,
            enable_failure_alerts: false,
            doctor_tat_minutes: default_doctor_tat_minutes(),
            lis_system_id: default_lis_system_id(),
        }
    }
}

/// Alert channels
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AlertConfig {
    /// Channel for visits missing master data
    #[serde(default = "default_missing_parameters_channel")]
    pub missing_parameters_channel: String,

    /// Channel for operational failures
    #[serde(default = "default_operations_channel")]
    pub operations_channel: String,

    /// Channel for auto-approval decisions
    #[serde(default = "default_auto_approval_channel")]
    pub auto_approval_channel: String,
}

fn default_missing_parameters_channel() -> String {
    "lis-missing-parameters".to_string()
}

fn default_operations_channel() -> String {
    "lis-operations".to_string()
}

fn default_auto_approval_channel() -> String {
    "lis-auto-approval".to_string()
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            missing_parameters_channel: default_missing_parameters_channel(),
            operations_channel: default_operations_channel(),
            auto_approval_channel: default_auto_approval_channel(),
        }
    }
}

/// Report output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReportConfig {
    /// Directory reports are written to
    #[serde(default = "default_reports_dir")]
    pub dir: PathBuf,
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from(".lis-reconciler/reports")
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: default_reports_dir(),
        }
    }
}
