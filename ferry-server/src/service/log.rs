//! Log Ingestion Service
//!
//! Turns a client-streamed sequence of log line submissions into persisted,
//! published log lines.
//!
//! Receiving and persisting run as two concurrent units connected by a
//! bounded queue: a spawned task pulls submissions off the transport while
//! the caller's task drains the queue in rounds. Each round takes everything
//! already queued (up to `max_batch_size`), validates it, writes it with one
//! store call and publishes what was written. A short pause between rounds
//! bounds write pressure from bursty producers.

use std::sync::Arc;
use std::time::Duration;

use ferry_core::domain::log::{MAX_STORED_BUILD_ID, NewLogLine};
use ferry_proto::v1::LogLineSubmission;
use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tonic::Status;
use tracing::Instrument;
use uuid::Uuid;

use crate::broadcast::BroadcastRegistry;
use crate::repository::{LogStore, StoreError};

/// Ingestion tuning parameters
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Submissions buffered between the receive task and the process loop
    pub queue_capacity: usize,

    /// Upper bound on submissions taken in one round
    pub max_batch_size: usize,

    /// Pause after each round; zero disables it
    pub round_delay: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            max_batch_size: 100,
            round_delay: Duration::from_millis(200),
        }
    }
}

/// Service error type
#[derive(Debug, Error)]
pub enum IngestError {
    /// A submission can never be stored; the stream is aborted
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to persist log lines: {0}")]
    Persistence(#[from] StoreError),

    /// The inbound stream failed for a reason other than end-of-stream
    #[error("log stream transport failed: {0}")]
    Transport(Status),

    #[error("log stream receiver stopped unexpectedly: {0}")]
    ReceiverFailed(String),
}

impl From<IngestError> for Status {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::InvalidArgument(msg) => Status::invalid_argument(msg),
            IngestError::Persistence(err) => {
                tracing::error!("Log persistence error: {:?}", err);
                Status::internal("failed to persist log lines")
            }
            IngestError::Transport(status) => status,
            IngestError::ReceiverFailed(msg) => {
                tracing::error!("Log stream receiver error: {}", msg);
                Status::internal(msg)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// Ingests log streams into a store and fans persisted lines out
#[derive(Clone)]
pub struct LogIngestor {
    store: Arc<dyn LogStore>,
    registry: Arc<BroadcastRegistry>,
    config: IngestConfig,
}

impl LogIngestor {
    pub fn new(
        store: Arc<dyn LogStore>,
        registry: Arc<BroadcastRegistry>,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Consume one inbound stream until it ends
    ///
    /// Returns the number of lines persisted. End-of-stream is a normal
    /// completion; any other transport error becomes the stream's result once
    /// the already queued submissions have been processed.
    pub async fn ingest<S>(&self, inbound: S) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<LogLineSubmission, Status>> + Send + Unpin + 'static,
    {
        let span = tracing::info_span!("log_stream", stream_id = %Uuid::new_v4());
        let (queue_tx, mut queue_rx) = mpsc::channel(self.config.queue_capacity.max(1));

        let receiver = tokio::spawn(receive_loop(inbound, queue_tx).instrument(span.clone()));

        let processed = self
            .process_loop(&mut queue_rx)
            .instrument(span.clone())
            .await;
        drop(queue_rx);

        async move {
            let inserted = match processed {
                Ok(inserted) => inserted,
                Err(err) => {
                    receiver.abort();
                    tracing::warn!("Log stream aborted: {}", err);
                    return Err(err);
                }
            };

            match receiver.await {
                Ok(Ok(())) => {
                    tracing::info!(lines_inserted = inserted, "Log stream completed");
                    Ok(inserted)
                }
                Ok(Err(status)) => {
                    tracing::warn!(lines_inserted = inserted, "Log stream transport error: {}", status);
                    Err(IngestError::Transport(status))
                }
                Err(err) => Err(IngestError::ReceiverFailed(err.to_string())),
            }
        }
        .instrument(span)
        .await
    }

    async fn process_loop(&self, queue: &mut mpsc::Receiver<LogLineSubmission>) -> Result<u64> {
        let max_batch_size = self.config.max_batch_size.max(1);
        let mut inserted = 0u64;

        while let Some(first) = queue.recv().await {
            let mut round = Vec::new();
            round.push(first);
            while round.len() < max_batch_size {
                match queue.try_recv() {
                    Ok(submission) => round.push(submission),
                    Err(_) => break,
                }
            }

            let batch = build_batch(round)?;
            if !batch.is_empty() {
                inserted += self.persist_and_publish(batch).await?;
            }

            // No pause once the stream has ended and the queue is drained.
            let finished = queue.is_closed() && queue.is_empty();
            if !self.config.round_delay.is_zero() && !finished {
                tokio::time::sleep(self.config.round_delay).await;
            }
        }

        Ok(inserted)
    }

    async fn persist_and_publish(&self, batch: Vec<NewLogLine>) -> Result<u64> {
        let submitted = batch.len();
        let persisted = self.store.insert_batch(batch).await?;

        tracing::debug!(
            submitted,
            persisted = persisted.len(),
            "Persisted log batch"
        );

        for line in &persisted {
            self.registry.publish(line.build_id, line);
        }

        Ok(persisted.len() as u64)
    }
}

/// Feed the queue until the client closes the stream or the transport fails.
///
/// Dropping the sender on return closes the queue for the process loop.
async fn receive_loop<S>(
    mut inbound: S,
    queue: mpsc::Sender<LogLineSubmission>,
) -> std::result::Result<(), Status>
where
    S: Stream<Item = std::result::Result<LogLineSubmission, Status>> + Unpin,
{
    while let Some(submission) = inbound.next().await {
        if queue.send(submission?).await.is_err() {
            // Process loop stopped; nothing left to feed.
            break;
        }
    }
    Ok(())
}

// =============================================================================
// Validation
// =============================================================================

fn build_batch(round: Vec<LogLineSubmission>) -> Result<Vec<NewLogLine>> {
    let mut batch = Vec::with_capacity(round.len());
    for submission in round {
        if let Some(line) = validate_submission(submission)? {
            batch.push(line);
        }
    }
    Ok(batch)
}

/// Validate one submission.
///
/// Unparsable timestamps and a zero build id drop the line (`Ok(None)`); a
/// build id the store cannot represent is fatal to the stream.
fn validate_submission(submission: LogLineSubmission) -> Result<Option<NewLogLine>> {
    let Some(timestamp) = submission.timestamp_utc() else {
        tracing::warn!(
            build_id = submission.build_id,
            timestamp = ?submission.timestamp,
            "Dropping log line with invalid timestamp"
        );
        return Ok(None);
    };

    if submission.build_id == 0 {
        tracing::warn!("Dropping log line with build id 0");
        return Ok(None);
    }

    if submission.build_id > MAX_STORED_BUILD_ID {
        return Err(IngestError::InvalidArgument(format!(
            "build id {} exceeds maximum {}",
            submission.build_id, MAX_STORED_BUILD_ID
        )));
    }

    Ok(Some(NewLogLine::new(
        submission.build_id,
        submission.message,
        timestamp,
    )))
}
