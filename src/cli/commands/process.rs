//! `lis-reconciler process <FILE>`

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use crate::cli::context::build_processor;
use crate::cli::output::{output, CommandOutput};
use crate::domain::errors::DomainResult;
use crate::domain::models::{Config, EventEnvelope, ProcessOutcome};
use crate::services::EventProcessor;

/// Result of handling one envelope.
#[derive(Debug, Serialize)]
pub struct EventOutput {
    /// Input line, when read from a stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// Trace id the event was handled under.
    pub trace_id: String,
    /// Outcome, absent on failure.
    #[serde(flatten)]
    pub outcome: Option<ProcessOutcome>,
    /// Set when processing failed and the event should be redelivered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EventOutput {
    /// Output line for one handled envelope.
    pub fn from_result(line: Option<usize>, trace_id: String, result: DomainResult<ProcessOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                line,
                trace_id,
                outcome: Some(outcome),
                error: None,
            },
            Err(e) => Self {
                line,
                trace_id,
                outcome: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Processing failed.
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

impl CommandOutput for EventOutput {
    fn to_human(&self) -> String {
        let prefix = match self.line {
            Some(line) => format!("line {line}"),
            None => "event".to_string(),
        };
        let trace = if self.trace_id.is_empty() {
            String::new()
        } else {
            format!(" [{}]", self.trace_id)
        };
        let detail = match (&self.outcome, &self.error) {
            (_, Some(error)) => format!("failed: {error}"),
            (Some(outcome), None) => describe(outcome),
            (None, None) => "no outcome".to_string(),
        };
        format!("{prefix}{trace}: {detail}")
    }
}

fn describe(outcome: &ProcessOutcome) -> String {
    match outcome {
        ProcessOutcome::Processed {
            order_id,
            created,
            updated,
            deleted,
            rerun,
        } => format!(
            "processed order {order_id} (created {created}, updated {updated}, deleted {deleted}, rerun {rerun})"
        ),
        ProcessOutcome::DuplicateInProgress => "duplicate, another worker holds this entity".to_string(),
        ProcessOutcome::Skipped { reason } => format!("skipped: {reason}"),
        ProcessOutcome::Dropped { reason } => format!("dropped: {reason}"),
    }
}

/// Process `envelope`, retrying once in-process on a retryable failure.
pub async fn process_with_retry(processor: &EventProcessor, envelope: EventEnvelope) -> DomainResult<ProcessOutcome> {
    match processor.process(envelope.clone()).await {
        Err(e) if e.is_retryable() => {
            warn!(trace_id = %envelope.trace_id, error = %e, "retrying event once");
            processor.process(envelope).await
        }
        result => result,
    }
}

/// Process the single envelope stored in `file`.
pub async fn execute(config: &Config, file: &Path, json_mode: bool) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let envelope: EventEnvelope =
        serde_json::from_str(&raw).with_context(|| format!("{} is not an event envelope", file.display()))?;

    let processor = build_processor(config).await?;
    let trace_id = envelope.trace_id.clone();
    let result = process_with_retry(&processor, envelope).await;
    processor.drain_reports().await;

    let event = EventOutput::from_result(None, trace_id, result);
    output(&event, json_mode);
    if let Some(error) = event.error {
        anyhow::bail!("event processing failed: {error}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processed_output_shape() {
        let event = EventOutput::from_result(
            Some(3),
            "t-1".into(),
            Ok(ProcessOutcome::Processed {
                order_id: "O1".into(),
                created: 2,
                updated: 1,
                deleted: 0,
                rerun: 0,
            }),
        );
        let json = event.to_json();
        assert_eq!(json["line"], 3);
        assert_eq!(json["outcome"], "processed");
        assert_eq!(json["order_id"], "O1");
        assert!(json.get("error").is_none());
        assert_eq!(
            event.to_human(),
            "line 3 [t-1]: processed order O1 (created 2, updated 1, deleted 0, rerun 0)"
        );
    }

    #[test]
    fn test_failed_output() {
        let event = EventOutput::from_result(
            None,
            String::new(),
            Err(crate::domain::errors::DomainError::Transient("db busy".into())),
        );
        assert!(event.is_failed());
        assert!(event.to_json().get("outcome").is_none());
        assert!(event.to_human().starts_with("event: failed:"));
    }
}
