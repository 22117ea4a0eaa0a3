//! Receive, display and acknowledge messages from a queue.
//!
//! A drain run receives one batch, writes the banner, then for each message in
//! delivery order writes its content and deletes it using the receipt issued
//! with that delivery. With [`DrainOptions::until_empty`] further batches are
//! requested until one comes back empty or `max_batches` is reached.

use crate::client::QueueClient;
use crate::error::QueueError;
use crate::message::{QueueName, ReceivedMessage};
use chrono::Duration;
use std::io::Write;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
#[path = "drain_tests.rs"]
mod tests;

/// Line written once per run before any message content
pub const BANNER: &str = "Reading messages from the Queue...";

/// Settings for a drain run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainOptions {
    /// Maximum messages requested per receive call
    pub batch_size: u32,
    /// How long received messages stay hidden; `None` uses the service default
    pub visibility_timeout: Option<Duration>,
    /// Keep receiving until a batch comes back empty
    pub until_empty: bool,
    /// Upper bound on receive calls when `until_empty` is set
    pub max_batches: u32,
}

impl Default for DrainOptions {
    fn default() -> Self {
        Self {
            batch_size: 32,
            visibility_timeout: None,
            until_empty: false,
            max_batches: 100,
        }
    }
}

/// Counters describing a completed drain run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub batches: u32,
    pub received: usize,
    pub deleted: usize,
    pub stale_receipts: usize,
}

/// Errors that abort a drain run
#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Failed to write message output: {0}")]
    Output(#[from] std::io::Error),
}

/// Drain messages from `queue`, writing output lines to `out`.
///
/// The first receive happens before the banner is written, so a failure to
/// reach the queue produces no output.
///
/// # Errors
///
/// Returns [`DrainError::Queue`] for receive failures and for delete failures
/// other than a stale receipt, and [`DrainError::Output`] when writing fails.
#[instrument(skip(client, options, out), fields(queue = %queue, batch_size = options.batch_size))]
pub async fn drain_queue<W: Write>(
    client: &dyn QueueClient,
    queue: &QueueName,
    options: &DrainOptions,
    out: &mut W,
) -> Result<DrainReport, DrainError> {
    let mut report = DrainReport::default();
    let max_batches = if options.until_empty {
        options.max_batches.max(1)
    } else {
        1
    };

    let mut batch = receive_batch(client, queue, options, &mut report).await?;

    writeln!(out, "{}", BANNER)?;
    out.flush()?;

    loop {
        for message in &batch {
            display_and_acknowledge(client, queue, message, out, &mut report).await?;
        }

        if batch.is_empty() || report.batches >= max_batches {
            break;
        }

        batch = receive_batch(client, queue, options, &mut report).await?;
    }

    if options.until_empty && !batch.is_empty() {
        warn!(
            max_batches = max_batches,
            "Stopped after reaching the batch limit; messages may remain"
        );
    }

    info!(
        batches = report.batches,
        received = report.received,
        deleted = report.deleted,
        stale_receipts = report.stale_receipts,
        "Drain complete"
    );

    Ok(report)
}

async fn receive_batch(
    client: &dyn QueueClient,
    queue: &QueueName,
    options: &DrainOptions,
    report: &mut DrainReport,
) -> Result<Vec<ReceivedMessage>, QueueError> {
    let batch = client
        .receive_batch(queue, options.batch_size, options.visibility_timeout)
        .await?;

    report.batches += 1;
    report.received += batch.len();
    debug!(batch = report.batches, count = batch.len(), "Received batch");

    Ok(batch)
}

/// Write one message's content, then delete it with its own receipt
async fn display_and_acknowledge<W: Write>(
    client: &dyn QueueClient,
    queue: &QueueName,
    message: &ReceivedMessage,
    out: &mut W,
    report: &mut DrainReport,
) -> Result<(), DrainError> {
    writeln!(out, "Message content: {}", message.body_text())?;
    out.flush()?;

    match client.delete_message(queue, &message.receipt_handle).await {
        Ok(()) => {
            report.deleted += 1;
            debug!(message_id = %message.message_id, "Deleted message");
            Ok(())
        }
        Err(e) if e.is_stale_receipt() => {
            report.stale_receipts += 1;
            warn!(
                message_id = %message.message_id,
                dequeue_count = message.dequeue_count,
                visibility_elapsed = message.receipt_handle.is_expired(),
                error = %e,
                "Receipt no longer valid, message was not deleted"
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
