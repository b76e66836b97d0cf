//! Bounded background pool that writes visit reports.
//!
//! Report jobs never influence the outcome of the event that queued them;
//! failures end up in the log and in the tests' report status.

use std::sync::Arc;

use base64::Engine;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ReportStatus, STATIONERY_PDF};
use crate::domain::ports::{LisSourceClient, ReconciliationRepository, ReportStore};
use crate::services::retry::RetryPolicy;

/// One report to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportJob {
    /// OMS order id.
    pub order_id: String,
    /// LIS visit id.
    pub visit_id: String,
    /// Tests whose report status follows this job.
    pub test_ids: Vec<Uuid>,
    /// Base64 PDF carried by the event, empty when the LIS sent none.
    pub pdf_base64: String,
}

struct Collaborators {
    lis: Arc<dyn LisSourceClient>,
    store: Arc<dyn ReportStore>,
    repository: Arc<dyn ReconciliationRepository>,
    policy: RetryPolicy,
}

/// Writes visit reports in the background with bounded concurrency.
pub struct ReportWorker {
    collaborators: Arc<Collaborators>,
    permits: Arc<Semaphore>,
    running: Mutex<JoinSet<()>>,
}

impl ReportWorker {
    /// Worker running at most `concurrency` jobs at once.
    pub fn new(
        lis: Arc<dyn LisSourceClient>,
        store: Arc<dyn ReportStore>,
        repository: Arc<dyn ReconciliationRepository>,
        policy: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            collaborators: Arc::new(Collaborators {
                lis,
                store,
                repository,
                policy,
            }),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            running: Mutex::new(JoinSet::new()),
        }
    }

    /// Queue `job` and return immediately.
    pub async fn submit(&self, job: ReportJob) {
        let collaborators = Arc::clone(&self.collaborators);
        let permits = Arc::clone(&self.permits);
        let mut running = self.running.lock().await;
        while running.try_join_next().is_some() {}
        running.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if let Err(e) = collaborators.run(&job).await {
                error!(order_id = %job.order_id, visit_id = %job.visit_id, error = %e, "report job failed");
                if let Err(e) = collaborators
                    .repository
                    .set_report_status(&job.test_ids, ReportStatus::CreationFailed)
                    .await
                {
                    error!(order_id = %job.order_id, error = %e, "failed to record report failure");
                }
            }
        });
    }

    /// Wait for every queued job to finish.
    pub async fn drain(&self) {
        let mut running = self.running.lock().await;
        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "report job panicked");
            }
        }
    }
}

impl Collaborators {
    async fn run(&self, job: &ReportJob) -> DomainResult<()> {
        let Some(encoded) = self.report_pdf(job).await else {
            warn!(
                order_id = %job.order_id,
                visit_id = %job.visit_id,
                "no report PDF available, skipping report"
            );
            return Ok(());
        };
        let pdf = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| DomainError::ValidationFailed(format!("invalid report PDF encoding: {e}")))?;
        let location = self.store.store(&job.order_id, &job.visit_id, &pdf).await?;
        self.repository
            .set_report_status(&job.test_ids, ReportStatus::Created)
            .await?;
        info!(order_id = %job.order_id, visit_id = %job.visit_id, %location, "report written");
        Ok(())
    }

    /// The PDF from the event, or from refetching the visit when the event
    /// carried none.
    async fn report_pdf(&self, job: &ReportJob) -> Option<String> {
        if !job.pdf_base64.is_empty() {
            return Some(job.pdf_base64.clone());
        }
        for attempt in 0..self.policy.max_attempts() {
            match self.lis.fetch_visit(&job.visit_id, STATIONERY_PDF).await {
                Ok(visit) if !visit.result_as_pdf.is_empty() => return Some(visit.result_as_pdf),
                Ok(_) => warn!(visit_id = %job.visit_id, attempt, "refetched visit has no report PDF"),
                Err(e) => warn!(visit_id = %job.visit_id, attempt, error = %e, "report refetch failed"),
            }
            self.policy.pause_after(attempt).await;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{LisVisitPayload, OrderRecord};
    use crate::domain::ports::{ChangeSet, TaskSnapshot};
    use crate::services::test_support::{FakeLisSource, MemoryReportStore};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct StatusRecorder {
        statuses: StdMutex<Vec<(Vec<Uuid>, ReportStatus)>>,
    }

    #[async_trait]
    impl ReconciliationRepository for StatusRecorder {
        async fn load_snapshot(&self, _order_id: &str) -> DomainResult<TaskSnapshot> {
            Ok(TaskSnapshot::default())
        }

        async fn apply(&self, _changes: &ChangeSet) -> DomainResult<()> {
            Ok(())
        }

        async fn apply_order(&self, _record: &OrderRecord, _changes: Option<&ChangeSet>) -> DomainResult<()> {
            Ok(())
        }

        async fn set_report_status(&self, test_ids: &[Uuid], status: ReportStatus) -> DomainResult<()> {
            self.statuses.lock().unwrap().push((test_ids.to_vec(), status));
            Ok(())
        }
    }

    fn worker(lis: Arc<FakeLisSource>, store: Arc<MemoryReportStore>, repo: Arc<StatusRecorder>) -> ReportWorker {
        ReportWorker::new(lis, store, repo, RetryPolicy::new(3, Duration::from_millis(1)), 2)
    }

    fn job(pdf: &str) -> ReportJob {
        ReportJob {
            order_id: "O1".into(),
            visit_id: "V1".into(),
            test_ids: vec![Uuid::nil()],
            pdf_base64: pdf.into(),
        }
    }

    #[tokio::test]
    async fn test_writes_report_from_event() {
        let lis = Arc::new(FakeLisSource::default());
        let store = Arc::new(MemoryReportStore::default());
        let repo = Arc::new(StatusRecorder::default());
        let worker = worker(lis.clone(), store.clone(), repo.clone());

        worker.submit(job("JVBERi0xLjQ=")).await;
        worker.drain().await;

        assert_eq!(store.stored(), vec![("O1".to_string(), "V1".to_string(), 8)]);
        assert_eq!(lis.calls(), 0);
        assert_eq!(repo.statuses.lock().unwrap()[0].1, ReportStatus::Created);
    }

    #[tokio::test]
    async fn test_refetches_missing_pdf() {
        let lis = Arc::new(FakeLisSource::returning(vec![
            Ok(LisVisitPayload::default()),
            Ok(LisVisitPayload {
                result_as_pdf: "JVBERi0xLjQ=".into(),
                ..LisVisitPayload::default()
            }),
        ]));
        let store = Arc::new(MemoryReportStore::default());
        let repo = Arc::new(StatusRecorder::default());
        let worker = worker(lis.clone(), store.clone(), repo);

        worker.submit(job("")).await;
        worker.drain().await;

        assert_eq!(lis.calls(), 2);
        assert_eq!(store.stored().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_bounded_refetches() {
        let lis = Arc::new(FakeLisSource::default());
        let store = Arc::new(MemoryReportStore::default());
        let repo = Arc::new(StatusRecorder::default());
        let worker = worker(lis.clone(), store.clone(), repo.clone());

        worker.submit(job("")).await;
        worker.drain().await;

        assert_eq!(lis.calls(), 3);
        assert!(store.stored().is_empty());
        assert!(repo.statuses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_encoding_marks_creation_failed() {
        let lis = Arc::new(FakeLisSource::default());
        let store = Arc::new(MemoryReportStore::default());
        let repo = Arc::new(StatusRecorder::default());
        let worker = worker(lis, store.clone(), repo.clone());

        worker.submit(job("not base64!")).await;
        worker.drain().await;

        assert!(store.stored().is_empty());
        assert_eq!(repo.statuses.lock().unwrap()[0].1, ReportStatus::CreationFailed);
    }
}
