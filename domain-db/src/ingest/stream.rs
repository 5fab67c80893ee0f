//! Push side of an ingestion run.
//!
//! A worker thread drives [`super::ingest`] and hands every committed batch to
//! a bounded channel, so a slow consumer holds the run back instead of
//! piling up batches in memory. Dropping the receiver stops the run after
//! the batch being stored, everything committed so far stays valid.

use std::{
    sync::mpsc::{self, Receiver},
    thread::{self, JoinHandle},
    time::Duration,
};

use serde::Serialize;

use super::{ingest, IngestOptions, IngestStats};
use crate::cve_sources::nist::SourceRetrievalError;
use crate::db::{models::CveRow, SqliteRepository};

/// One unit delivered to a progress consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    /// A committed batch, serialized as a JSON array of rows.
    Batch(Vec<CveRow>),
    /// The run failed and no more events follow, serialized as `{"error": ...}`.
    Error { error: String },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Render the event as a server-sent-events frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Batches allowed in flight before the worker blocks.
    pub capacity: usize,
    /// Pause after each emitted batch.
    pub pacing: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            capacity: 4,
            pacing: Duration::ZERO,
        }
    }
}

/// Run an ingestion on a worker thread and receive its progress.
///
/// The join handle returns the run statistics once the worker is done.
pub fn spawn<I>(
    repository: SqliteRepository,
    source: I,
    options: IngestOptions,
    stream: StreamOptions,
) -> (Receiver<ProgressEvent>, JoinHandle<IngestStats>)
where
    I: IntoIterator<Item = Result<serde_json::Value, SourceRetrievalError>>,
    I::IntoIter: Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(stream.capacity);
    let source = source.into_iter();

    let handle = thread::spawn(move || {
        let mut run = ingest(&repository, source, options);

        while let Some(result) = run.next() {
            let event = match result {
                Ok(batch) => ProgressEvent::Batch(batch),
                Err(e) => ProgressEvent::Error {
                    error: e.to_string(),
                },
            };
            let terminal = event.is_terminal();

            if tx.send(event).is_err() {
                log::info!("progress consumer went away, stopping");
                break;
            }

            if !terminal && !stream.pacing.is_zero() {
                thread::sleep(stream.pacing);
            }
        }

        run.stats()
    });

    (rx, handle)
}
