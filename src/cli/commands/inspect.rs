//! `lis-reconciler inspect <ORDER_ID>`

use anyhow::Result;
use serde::Serialize;

use crate::adapters::sqlite::SqliteReconciliationRepository;
use crate::cli::context::open_database;
use crate::cli::output::{output, CommandOutput};
use crate::cli::table::{list_table, render_list};
use crate::domain::models::{Config, InvestigationResult, RerunInvestigationResult, Task, TestDetail};
use crate::domain::ports::{ReconciliationRepository, TaskSnapshot};

/// Stored state of one order's task.
#[derive(Debug, Serialize)]
pub struct InspectOutput {
    /// OMS order id.
    pub order_id: String,
    /// The task, if one exists.
    pub task: Option<Task>,
    /// Its tests.
    pub tests: Vec<TestDetail>,
    /// Investigation results.
    pub investigations: Vec<InvestigationResult>,
    /// Rerun snapshots.
    pub rerun_results: Vec<RerunInvestigationResult>,
}

impl InspectOutput {
    /// Output for `order_id` from its snapshot.
    pub fn new(order_id: &str, snapshot: TaskSnapshot) -> Self {
        Self {
            order_id: order_id.to_string(),
            task: snapshot.task,
            tests: snapshot.tests,
            investigations: snapshot.investigations,
            rerun_results: snapshot.rerun_results,
        }
    }

    fn tests_table(&self) -> String {
        let mut table = list_table(&["test code", "name", "status", "lab", "approval", "report"]);
        for test in &self.tests {
            table.add_row(vec![
                test.test_code.clone(),
                test.test_name.clone(),
                test.status.as_str().to_string(),
                test.processing_lab_id.to_string(),
                test.approval_source.map_or("-", |s| s.as_str()).to_string(),
                test.report_status.as_str().to_string(),
            ]);
        }
        render_list("test", &table, self.tests.len())
    }

    fn investigations_table(&self) -> String {
        let mut table = list_table(&["code", "value", "status", "abnormality", "auto", "failure"]);
        for inv in &self.investigations {
            table.add_row(vec![
                inv.lis_code.clone(),
                inv.value.clone(),
                inv.status.as_str().to_string(),
                inv.abnormality.as_str().to_string(),
                if inv.is_auto_approved { "yes" } else { "no" }.to_string(),
                inv.auto_approval_failure_reason.as_str().to_string(),
            ]);
        }
        render_list("investigation", &table, self.investigations.len())
    }
}

impl CommandOutput for InspectOutput {
    fn to_human(&self) -> String {
        let Some(task) = &self.task else {
            return format!("No task found for order {}.", self.order_id);
        };
        let mut lines = vec![
            format!("Order:      {}", task.order_id),
            format!("Task:       {}", task.id),
            format!("Status:     {}", task.status.as_str()),
            format!("Critical:   {}", task.is_critical),
            format!("Version:    {}", task.version),
        ];
        if let Some(tat) = task.doctor_tat {
            lines.push(format!("Doctor TAT: {}", tat.to_rfc3339()));
        }
        if let Some(completed) = task.completed_at {
            lines.push(format!("Completed:  {}", completed.to_rfc3339()));
        }
        lines.push(String::new());
        lines.push(self.tests_table());
        lines.push(String::new());
        lines.push(self.investigations_table());
        if !self.rerun_results.is_empty() {
            lines.push(format!("\n{} rerun record(s)", self.rerun_results.len()));
        }
        lines.join("\n")
    }
}

/// Print the stored task of `order_id`.
pub async fn execute(config: &Config, order_id: &str, json_mode: bool) -> Result<()> {
    let pool = open_database(config).await?;
    let repository = SqliteReconciliationRepository::new(pool.clone());
    let snapshot = repository.load_snapshot(order_id).await?;
    pool.close().await;
    output(&InspectOutput::new(order_id, snapshot), json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_task() {
        let out = InspectOutput::new("O9", TaskSnapshot::default());
        assert_eq!(out.to_human(), "No task found for order O9.");
        assert!(out.to_json()["task"].is_null());
    }

    #[test]
    fn test_task_summary() {
        let snapshot = TaskSnapshot {
            task: Some(Task::new("O1", 12)),
            ..TaskSnapshot::default()
        };
        let human = InspectOutput::new("O1", snapshot).to_human();
        assert!(human.contains("Order:      O1"));
        assert!(human.contains("Status:     pending"));
        assert!(human.contains("No tests found."));
        assert!(human.contains("No investigations found."));
    }
}
