//! Writes decoded report PDFs under a base directory as
//! `<order_id>/<visit_id>.pdf`.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::ReportStore;

/// Writes reports under a base directory.
#[derive(Debug, Clone)]
pub struct FsReportStore {
    base_dir: PathBuf,
}

impl FsReportStore {
    /// Store rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn report_path(&self, order_id: &str, visit_id: &str) -> DomainResult<PathBuf> {
        let order_dir = safe_segment(order_id)?;
        let file = safe_segment(visit_id)?;
        Ok(self.base_dir.join(order_dir).join(format!("{}.pdf", file.display())))
    }
}

/// Ids become path segments; anything that could escape the base directory
/// is rejected.
fn safe_segment(id: &str) -> DomainResult<&Path> {
    let path = Path::new(id);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(path),
        _ => Err(DomainError::ValidationFailed(format!("unsafe report path segment: {id:?}"))),
    }
}

#[async_trait]
impl ReportStore for FsReportStore {
    async fn store(&self, order_id: &str, visit_id: &str, pdf: &[u8]) -> DomainResult<String> {
        let path = self.report_path(order_id, visit_id)?;
        let io_error = |e: std::io::Error| DomainError::Transient(format!("failed to write {}: {e}", path.display()));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        tokio::fs::write(&path, pdf).await.map_err(io_error)?;
        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_under_order_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsReportStore::new(dir.path());

        let location = store.store("O1", "V1", b"%PDF-1.4").await.unwrap();

        let expected = dir.path().join("O1").join("V1.pdf");
        assert_eq!(location, expected.display().to_string());
        assert_eq!(std::fs::read(expected).unwrap(), b"%PDF-1.4");
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsReportStore::new(dir.path());
        assert!(matches!(
            store.store("../escape", "V1", b"x").await,
            Err(DomainError::ValidationFailed(_))
        ));
        assert!(store.store("O1", "", b"x").await.is_err());
    }
}
