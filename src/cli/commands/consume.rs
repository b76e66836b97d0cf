//! `lis-reconciler consume`: newline-delimited envelopes on stdin.
//!
//! Each non-blank line is one envelope. Up to `worker.concurrency` events
//! are in flight at once and one result line is written per event, in
//! completion order.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::info;

use crate::cli::commands::process::{process_with_retry, EventOutput};
use crate::cli::context::build_processor;
use crate::cli::output::output_line;
use crate::domain::models::{Config, EventEnvelope, ProcessOutcome};
use crate::services::EventProcessor;

/// Tally of outcomes over one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConsumeSummary {
    /// Events reconciled.
    pub processed: usize,
    /// Events with nothing to do.
    pub skipped: usize,
    /// Events held by another worker.
    pub duplicates: usize,
    /// Malformed events.
    pub dropped: usize,
    /// Events that should be redelivered.
    pub failed: usize,
}

impl ConsumeSummary {
    fn record(&mut self, event: &EventOutput) {
        match &event.outcome {
            _ if event.is_failed() => self.failed += 1,
            Some(ProcessOutcome::Processed { .. }) => self.processed += 1,
            Some(ProcessOutcome::Skipped { .. }) => self.skipped += 1,
            Some(ProcessOutcome::DuplicateInProgress) => self.duplicates += 1,
            Some(ProcessOutcome::Dropped { .. }) | None => self.dropped += 1,
        }
    }

    /// Events seen.
    pub fn total(&self) -> usize {
        self.processed + self.skipped + self.duplicates + self.dropped + self.failed
    }
}

async fn handle_line(processor: &EventProcessor, line_no: usize, text: String) -> EventOutput {
    let envelope: EventEnvelope = match serde_json::from_str(&text) {
        Ok(envelope) => envelope,
        Err(e) => {
            return EventOutput::from_result(
                Some(line_no),
                String::new(),
                Ok(ProcessOutcome::dropped(format!("invalid envelope: {e}"))),
            )
        }
    };
    let trace_id = envelope.trace_id.clone();
    let result = process_with_retry(processor, envelope).await;
    EventOutput::from_result(Some(line_no), trace_id, result)
}

/// Feed every envelope in `reader` through `processor`, calling `emit` once
/// per event as it completes.
pub async fn run<R, F>(processor: &EventProcessor, reader: R, concurrency: usize, mut emit: F) -> Result<ConsumeSummary>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(&EventOutput),
{
    let lines = stream::unfold(reader.lines(), |mut lines| async move {
        match lines.next_line().await {
            Ok(Some(line)) => Some((Ok(line), lines)),
            Ok(None) => None,
            Err(e) => Some((Err(e), lines)),
        }
    });

    let mut results = std::pin::pin!(lines
        .enumerate()
        .filter(|(_, line)| std::future::ready(!matches!(line, Ok(text) if text.trim().is_empty())))
        .map(|(index, line)| async move {
            match line {
                Ok(text) => Ok(handle_line(processor, index + 1, text).await),
                Err(e) => Err(e),
            }
        })
        .buffer_unordered(concurrency.max(1)));

    let mut summary = ConsumeSummary::default();
    while let Some(result) = results.next().await {
        let event = result.context("failed to read event stream")?;
        summary.record(&event);
        emit(&event);
    }
    Ok(summary)
}

/// Process envelopes from stdin until it closes.
pub async fn execute(config: &Config, json_mode: bool) -> Result<()> {
    let processor = build_processor(config).await?;
    let stdin = BufReader::new(tokio::io::stdin());
    let summary = run(&processor, stdin, config.worker.concurrency, |event| {
        output_line(event, json_mode);
    })
    .await?;
    processor.drain_reports().await;

    info!(
        processed = summary.processed,
        skipped = summary.skipped,
        duplicates = summary.duplicates,
        dropped = summary.dropped,
        failed = summary.failed,
        "event stream finished"
    );
    if summary.failed > 0 {
        anyhow::bail!("{} of {} events failed", summary.failed, summary.total());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::cli::context::build_ports;
    use crate::cli::output::CommandOutput;

    async fn processor() -> EventProcessor {
        let pool = create_migrated_test_pool().await.unwrap();
        let config = Config::default();
        EventProcessor::new(build_ports(&config, &pool).unwrap(), &config)
    }

    #[tokio::test]
    async fn test_malformed_lines_are_dropped() {
        let processor = processor().await;
        let input = concat!(
            "not json\n",
            "\n",
            "{\"event_type\":\"mystery\",\"trace_id\":\"t-2\"}\n",
            "{\"event_type\":\"lis_event\",\"trace_id\":\"t-3\"}\n",
        );
        let mut seen = Vec::new();
        let summary = run(&processor, input.as_bytes(), 2, |event| seen.push(event.line))
            .await
            .unwrap();

        assert_eq!(summary.dropped, 3);
        assert_eq!(summary.total(), 3);
        seen.sort();
        assert_eq!(seen, vec![Some(1), Some(3), Some(4)]);
    }

    #[tokio::test]
    async fn test_unknown_visit_is_dropped() {
        use base64::Engine;
        let processor = processor().await;
        let body = serde_json::json!({"OrderId": "O404", "OrderInfo": []}).to_string();
        let envelope = serde_json::json!({
            "event_type": "lis_event",
            "trace_id": "t-1",
            "payload": {
                "entity_id": "V404",
                "webhook_data": base64::engine::general_purpose::STANDARD.encode(body),
            },
        });
        let input = format!("{envelope}\n");
        let mut outputs = Vec::new();
        let summary = run(&processor, input.as_bytes(), 1, |event| outputs.push(event.to_json()))
            .await
            .unwrap();

        assert_eq!(summary.dropped, 1);
        assert_eq!(outputs[0]["outcome"], "dropped");
        assert_eq!(outputs[0]["trace_id"], "t-1");
    }
}
