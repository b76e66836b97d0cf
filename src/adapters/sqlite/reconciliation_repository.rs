//! SQLite implementation of the ReconciliationRepository.
//!
//! A change set is written in one transaction. The task row carries an
//! optimistic version: an update whose version no longer matches aborts the
//! whole transaction with `ConcurrencyConflict` instead of waiting on the
//! competing writer. OMS events also rewrite the order tables inside the
//! same transaction.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::order_lookup::write_order;
use super::{parse_datetime, parse_enum, parse_optional_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Abnormality, ApprovalSource, FailureReason, InvestigationResult, InvestigationResultMetadata,
    InvestigationStatus, MethodType, OrderRecord, Remark, ReportStatus, RerunInvestigationResult, ResultType, Task,
    TaskStatus, TestApprovalSource, TestDetail, TestDetailMetadata, TestStatus,
};
use crate::domain::ports::{ChangeSet, ReconciliationRepository, TaskSnapshot};

/// Task persistence in SQLite.
#[derive(Clone)]
pub struct SqliteReconciliationRepository {
    pool: SqlitePool,
}

impl SqliteReconciliationRepository {
    /// Repository over `pool`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReconciliationRepository for SqliteReconciliationRepository {
    async fn load_snapshot(&self, order_id: &str) -> DomainResult<TaskSnapshot> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE order_id = ?")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(TaskSnapshot::default());
        };
        let task = Task::try_from(row)?;
        let task_id = task.id.to_string();

        let tests: Vec<TestDetailRow> =
            sqlx::query_as("SELECT * FROM test_details WHERE task_id = ? ORDER BY created_at, test_code")
                .bind(&task_id)
                .fetch_all(&self.pool)
                .await?;
        let test_metadata: Vec<TestMetadataRow> = sqlx::query_as(
            "SELECT m.* FROM test_detail_metadata m
             JOIN test_details t ON t.id = m.test_details_id
             WHERE t.task_id = ?",
        )
        .bind(&task_id)
        .fetch_all(&self.pool)
        .await?;
        let investigations: Vec<InvestigationRow> = sqlx::query_as(
            "SELECT i.* FROM investigation_results i
             JOIN test_details t ON t.id = i.test_details_id
             WHERE t.task_id = ?
             ORDER BY i.created_at, i.lis_code",
        )
        .bind(&task_id)
        .fetch_all(&self.pool)
        .await?;
        let rerun_results: Vec<RerunRow> = sqlx::query_as(
            "SELECT r.* FROM rerun_investigation_results r
             JOIN test_details t ON t.id = r.test_details_id
             WHERE t.task_id = ?
             ORDER BY r.rerun_triggered_at",
        )
        .bind(&task_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(TaskSnapshot {
            task: Some(task),
            tests: tests.into_iter().map(TestDetail::try_from).collect::<DomainResult<_>>()?,
            test_metadata: test_metadata
                .into_iter()
                .map(TestDetailMetadata::try_from)
                .collect::<DomainResult<_>>()?,
            investigations: investigations
                .into_iter()
                .map(InvestigationResult::try_from)
                .collect::<DomainResult<_>>()?,
            rerun_results: rerun_results
                .into_iter()
                .map(RerunInvestigationResult::try_from)
                .collect::<DomainResult<_>>()?,
        })
    }

    async fn apply(&self, changes: &ChangeSet) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;
        write_changes(&mut tx, changes).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn apply_order(&self, record: &OrderRecord, changes: Option<&ChangeSet>) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;
        write_order(&mut tx, record).await?;
        if let Some(changes) = changes {
            write_changes(&mut tx, changes).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn set_report_status(&self, test_ids: &[Uuid], status: ReportStatus) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();
        for id in test_ids {
            sqlx::query("UPDATE test_details SET report_status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(&now)
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

async fn write_changes(conn: &mut SqliteConnection, changes: &ChangeSet) -> DomainResult<()> {
    write_task(conn, &changes.task, changes.task_is_new).await?;

    for id in &changes.delete_test_ids {
        sqlx::query("DELETE FROM test_details WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;
    }
    for test in changes.create_tests.iter().chain(&changes.update_tests) {
        upsert_test(conn, test).await?;
    }
    for meta in &changes.upsert_test_metadata {
        upsert_test_metadata(conn, meta).await?;
    }
    for investigation in changes
        .create_investigations
        .iter()
        .chain(&changes.update_investigations)
    {
        upsert_investigation(conn, investigation).await?;
    }
    for meta in &changes.upsert_investigation_metadata {
        upsert_investigation_metadata(conn, meta).await?;
    }
    for rerun in &changes.upsert_rerun_results {
        upsert_rerun(conn, rerun).await?;
    }
    for remark in &changes.upsert_remarks {
        upsert_remark(conn, remark).await?;
    }
    Ok(())
}

async fn write_task(conn: &mut SqliteConnection, task: &Task, is_new: bool) -> DomainResult<()> {
    let conflict = || DomainError::ConcurrencyConflict {
        entity: "task".to_string(),
        id: task.order_id.clone(),
    };
    let result = if is_new {
        sqlx::query(
            r#"INSERT INTO tasks (id, order_id, lab_id, status, previous_status, doctor_tat, is_critical,
               completed_at, version, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(order_id) DO NOTHING"#,
        )
        .bind(task.id.to_string())
        .bind(&task.order_id)
        .bind(task.lab_id)
        .bind(task.status.as_str())
        .bind(task.previous_status.map(|s| s.as_str()))
        .bind(task.doctor_tat.map(|t| t.to_rfc3339()))
        .bind(task.is_critical)
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.version + 1)
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(&mut *conn)
        .await?
    } else {
        sqlx::query(
            r#"UPDATE tasks SET status = ?, previous_status = ?, doctor_tat = ?, is_critical = ?,
               completed_at = ?, updated_at = ?, version = version + 1
               WHERE id = ? AND version = ?"#,
        )
        .bind(task.status.as_str())
        .bind(task.previous_status.map(|s| s.as_str()))
        .bind(task.doctor_tat.map(|t| t.to_rfc3339()))
        .bind(task.is_critical)
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.updated_at.to_rfc3339())
        .bind(task.id.to_string())
        .bind(task.version)
        .execute(&mut *conn)
        .await?
    };
    if result.rows_affected() == 0 {
        return Err(conflict());
    }
    Ok(())
}

async fn upsert_test(conn: &mut SqliteConnection, test: &TestDetail) -> DomainResult<()> {
    sqlx::query(
        r#"INSERT INTO test_details (id, task_id, order_id, central_test_id, lis_test_id, test_code, test_name,
           department, status, processing_lab_id, processing_lab_inhouse, approval_source, is_auto_approved,
           report_status, doctor_tat, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(id) DO UPDATE SET
               lis_test_id = excluded.lis_test_id,
               test_name = excluded.test_name,
               department = excluded.department,
               status = excluded.status,
               processing_lab_id = excluded.processing_lab_id,
               processing_lab_inhouse = excluded.processing_lab_inhouse,
               approval_source = excluded.approval_source,
               is_auto_approved = excluded.is_auto_approved,
               report_status = excluded.report_status,
               doctor_tat = excluded.doctor_tat,
               updated_at = excluded.updated_at"#,
    )
    .bind(test.id.to_string())
    .bind(test.task_id.to_string())
    .bind(&test.order_id)
    .bind(&test.central_test_id)
    .bind(&test.lis_test_id)
    .bind(&test.test_code)
    .bind(&test.test_name)
    .bind(&test.department)
    .bind(test.status.as_str())
    .bind(test.processing_lab_id)
    .bind(test.processing_lab_inhouse)
    .bind(test.approval_source.map(|s| s.as_str()))
    .bind(test.is_auto_approved)
    .bind(test.report_status.as_str())
    .bind(test.doctor_tat.map(|t| t.to_rfc3339()))
    .bind(test.created_at.to_rfc3339())
    .bind(test.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn upsert_test_metadata(conn: &mut SqliteConnection, meta: &TestDetailMetadata) -> DomainResult<()> {
    sqlx::query(
        r#"INSERT INTO test_detail_metadata (test_details_id, barcodes, is_critical) VALUES (?, ?, ?)
           ON CONFLICT(test_details_id) DO UPDATE SET
               barcodes = excluded.barcodes,
               is_critical = excluded.is_critical"#,
    )
    .bind(meta.test_details_id.to_string())
    .bind(serde_json::to_string(&meta.barcodes)?)
    .bind(meta.is_critical)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn upsert_investigation(conn: &mut SqliteConnection, inv: &InvestigationResult) -> DomainResult<()> {
    sqlx::query(
        r#"INSERT INTO investigation_results (id, test_details_id, lis_code, name, master_investigation_id,
           master_method_mapping_id, value, device_value, result_type, department, uom, method, method_type,
           reference_range_text, status, abnormality, is_abnormal, is_critical, is_auto_approved,
           approval_source, auto_approval_failure_reason, entered_by, entered_at, approved_by, approved_at,
           created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               master_investigation_id = excluded.master_investigation_id,
               master_method_mapping_id = excluded.master_method_mapping_id,
               value = excluded.value,
               device_value = excluded.device_value,
               result_type = excluded.result_type,
               department = excluded.department,
               uom = excluded.uom,
               method = excluded.method,
               method_type = excluded.method_type,
               reference_range_text = excluded.reference_range_text,
               status = excluded.status,
               abnormality = excluded.abnormality,
               is_abnormal = excluded.is_abnormal,
               is_critical = excluded.is_critical,
               is_auto_approved = excluded.is_auto_approved,
               approval_source = excluded.approval_source,
               auto_approval_failure_reason = excluded.auto_approval_failure_reason,
               entered_by = excluded.entered_by,
               entered_at = excluded.entered_at,
               approved_by = excluded.approved_by,
               approved_at = excluded.approved_at,
               updated_at = excluded.updated_at"#,
    )
    .bind(inv.id.to_string())
    .bind(inv.test_details_id.to_string())
    .bind(&inv.lis_code)
    .bind(&inv.name)
    .bind(inv.master_investigation_id)
    .bind(inv.master_method_mapping_id)
    .bind(&inv.value)
    .bind(&inv.device_value)
    .bind(inv.result_type.as_str())
    .bind(&inv.department)
    .bind(&inv.uom)
    .bind(&inv.method)
    .bind(inv.method_type.as_str())
    .bind(&inv.reference_range_text)
    .bind(inv.status.as_str())
    .bind(inv.abnormality.as_str())
    .bind(inv.is_abnormal)
    .bind(inv.is_critical)
    .bind(inv.is_auto_approved)
    .bind(inv.approval_source.as_str())
    .bind(inv.auto_approval_failure_reason.as_str())
    .bind(inv.entered_by)
    .bind(inv.entered_at.map(|t| t.to_rfc3339()))
    .bind(inv.approved_by)
    .bind(inv.approved_at.map(|t| t.to_rfc3339()))
    .bind(inv.created_at.to_rfc3339())
    .bind(inv.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn upsert_investigation_metadata(
    conn: &mut SqliteConnection,
    meta: &InvestigationResultMetadata,
) -> DomainResult<()> {
    sqlx::query(
        r#"INSERT INTO investigation_result_metadata (investigation_result_id, qc_flag, qc_lot_number, qc_value,
           qc_westgard_warning, qc_status)
           VALUES (?, ?, ?, ?, ?, ?)
           ON CONFLICT(investigation_result_id) DO UPDATE SET
               qc_flag = excluded.qc_flag,
               qc_lot_number = excluded.qc_lot_number,
               qc_value = excluded.qc_value,
               qc_westgard_warning = excluded.qc_westgard_warning,
               qc_status = excluded.qc_status"#,
    )
    .bind(meta.investigation_result_id.to_string())
    .bind(&meta.qc_flag)
    .bind(&meta.qc_lot_number)
    .bind(&meta.qc_value)
    .bind(&meta.qc_westgard_warning)
    .bind(&meta.qc_status)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn upsert_rerun(conn: &mut SqliteConnection, rerun: &RerunInvestigationResult) -> DomainResult<()> {
    sqlx::query(
        r#"INSERT INTO rerun_investigation_results (id, test_details_id, lis_code, master_investigation_id,
           investigation_name, investigation_value, device_value, result_type, rerun_reason, rerun_remarks,
           rerun_triggered_by, rerun_triggered_at, entered_by, entered_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(id) DO UPDATE SET
               investigation_name = excluded.investigation_name,
               investigation_value = excluded.investigation_value,
               device_value = excluded.device_value,
               result_type = excluded.result_type,
               rerun_reason = excluded.rerun_reason,
               rerun_remarks = excluded.rerun_remarks,
               rerun_triggered_by = excluded.rerun_triggered_by,
               rerun_triggered_at = excluded.rerun_triggered_at,
               entered_by = excluded.entered_by,
               entered_at = excluded.entered_at"#,
    )
    .bind(rerun.id.to_string())
    .bind(rerun.test_details_id.to_string())
    .bind(&rerun.lis_code)
    .bind(rerun.master_investigation_id)
    .bind(&rerun.investigation_name)
    .bind(&rerun.investigation_value)
    .bind(&rerun.device_value)
    .bind(rerun.result_type.as_str())
    .bind(&rerun.rerun_reason)
    .bind(&rerun.rerun_remarks)
    .bind(&rerun.rerun_triggered_by)
    .bind(rerun.rerun_triggered_at.to_rfc3339())
    .bind(rerun.entered_by)
    .bind(rerun.entered_at.map(|t| t.to_rfc3339()))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn upsert_remark(conn: &mut SqliteConnection, remark: &Remark) -> DomainResult<()> {
    sqlx::query(
        r#"INSERT INTO remarks (investigation_result_id, remark_type, description, remark_by)
           VALUES (?, ?, ?, ?)
           ON CONFLICT(investigation_result_id, remark_type) DO UPDATE SET
               description = excluded.description,
               remark_by = excluded.remark_by"#,
    )
    .bind(remark.investigation_result_id.to_string())
    .bind(remark.remark_type.as_str())
    .bind(&remark.description)
    .bind(remark.remark_by)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    order_id: String,
    lab_id: i64,
    status: String,
    previous_status: Option<String>,
    doctor_tat: Option<String>,
    is_critical: bool,
    completed_at: Option<String>,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TaskRow> for Task {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: parse_uuid(&row.id)?,
            order_id: row.order_id,
            lab_id: row.lab_id,
            status: parse_enum("task status", &row.status, TaskStatus::from_str)?,
            previous_status: row
                .previous_status
                .as_deref()
                .map(|s| parse_enum("task previous_status", s, TaskStatus::from_str))
                .transpose()?,
            doctor_tat: parse_optional_datetime(row.doctor_tat)?,
            is_critical: row.is_critical,
            completed_at: parse_optional_datetime(row.completed_at)?,
            version: row.version,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TestDetailRow {
    id: String,
    task_id: String,
    order_id: String,
    central_test_id: String,
    lis_test_id: String,
    test_code: String,
    test_name: String,
    department: String,
    status: String,
    processing_lab_id: i64,
    processing_lab_inhouse: bool,
    approval_source: Option<String>,
    is_auto_approved: bool,
    report_status: String,
    doctor_tat: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TestDetailRow> for TestDetail {
    type Error = DomainError;

    fn try_from(row: TestDetailRow) -> Result<Self, Self::Error> {
        Ok(TestDetail {
            id: parse_uuid(&row.id)?,
            task_id: parse_uuid(&row.task_id)?,
            order_id: row.order_id,
            central_test_id: row.central_test_id,
            lis_test_id: row.lis_test_id,
            test_code: row.test_code,
            test_name: row.test_name,
            department: row.department,
            status: parse_enum("test status", &row.status, TestStatus::from_str)?,
            processing_lab_id: row.processing_lab_id,
            processing_lab_inhouse: row.processing_lab_inhouse,
            approval_source: row
                .approval_source
                .as_deref()
                .map(|s| parse_enum("test approval_source", s, TestApprovalSource::from_str))
                .transpose()?,
            is_auto_approved: row.is_auto_approved,
            report_status: parse_enum("report_status", &row.report_status, ReportStatus::from_str)?,
            doctor_tat: parse_optional_datetime(row.doctor_tat)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TestMetadataRow {
    test_details_id: String,
    barcodes: String,
    is_critical: bool,
}

impl TryFrom<TestMetadataRow> for TestDetailMetadata {
    type Error = DomainError;

    fn try_from(row: TestMetadataRow) -> Result<Self, Self::Error> {
        Ok(TestDetailMetadata {
            test_details_id: parse_uuid(&row.test_details_id)?,
            barcodes: serde_json::from_str(&row.barcodes)?,
            is_critical: row.is_critical,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InvestigationRow {
    id: String,
    test_details_id: String,
    lis_code: String,
    name: String,
    master_investigation_id: i64,
    master_method_mapping_id: i64,
    value: String,
    device_value: String,
    result_type: String,
    department: String,
    uom: String,
    method: String,
    method_type: String,
    reference_range_text: String,
    status: String,
    abnormality: String,
    is_abnormal: bool,
    is_critical: bool,
    is_auto_approved: bool,
    approval_source: String,
    auto_approval_failure_reason: String,
    entered_by: i64,
    entered_at: Option<String>,
    approved_by: i64,
    approved_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<InvestigationRow> for InvestigationResult {
    type Error = DomainError;

    fn try_from(row: InvestigationRow) -> Result<Self, Self::Error> {
        Ok(InvestigationResult {
            id: parse_uuid(&row.id)?,
            test_details_id: parse_uuid(&row.test_details_id)?,
            lis_code: row.lis_code,
            name: row.name,
            master_investigation_id: row.master_investigation_id,
            master_method_mapping_id: row.master_method_mapping_id,
            value: row.value,
            device_value: row.device_value,
            result_type: ResultType::from_str(&row.result_type),
            department: row.department,
            uom: row.uom,
            method: row.method,
            method_type: parse_enum("method_type", &row.method_type, MethodType::from_str)?,
            reference_range_text: row.reference_range_text,
            status: parse_enum("investigation status", &row.status, InvestigationStatus::from_str)?,
            abnormality: parse_enum("abnormality", &row.abnormality, Abnormality::from_str)?,
            is_abnormal: row.is_abnormal,
            is_critical: row.is_critical,
            is_auto_approved: row.is_auto_approved,
            approval_source: parse_enum("approval_source", &row.approval_source, ApprovalSource::from_str)?,
            auto_approval_failure_reason: parse_enum(
                "auto_approval_failure_reason",
                &row.auto_approval_failure_reason,
                FailureReason::from_str,
            )?,
            entered_by: row.entered_by,
            entered_at: parse_optional_datetime(row.entered_at)?,
            approved_by: row.approved_by,
            approved_at: parse_optional_datetime(row.approved_at)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RerunRow {
    id: String,
    test_details_id: String,
    lis_code: String,
    master_investigation_id: i64,
    investigation_name: String,
    investigation_value: String,
    device_value: String,
    result_type: String,
    rerun_reason: String,
    rerun_remarks: String,
    rerun_triggered_by: String,
    rerun_triggered_at: String,
    entered_by: i64,
    entered_at: Option<String>,
}

impl TryFrom<RerunRow> for RerunInvestigationResult {
    type Error = DomainError;

    fn try_from(row: RerunRow) -> Result<Self, Self::Error> {
        Ok(RerunInvestigationResult {
            id: parse_uuid(&row.id)?,
            test_details_id: parse_uuid(&row.test_details_id)?,
            lis_code: row.lis_code,
            master_investigation_id: row.master_investigation_id,
            investigation_name: row.investigation_name,
            investigation_value: row.investigation_value,
            device_value: row.device_value,
            result_type: ResultType::from_str(&row.result_type),
            rerun_reason: row.rerun_reason,
            rerun_remarks: row.rerun_remarks,
            rerun_triggered_by: row.rerun_triggered_by,
            rerun_triggered_at: parse_datetime(&row.rerun_triggered_at)?,
            entered_by: row.entered_by,
            entered_at: parse_optional_datetime(row.entered_at)?,
        })
    }
}
