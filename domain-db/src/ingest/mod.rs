use std::mem;

use crate::cve_sources::nist::SourceRetrievalError;
use crate::db::{models::CveRow, SqliteRepository, StorageError};
use crate::normalize::normalize;

pub mod stream;

pub const DEFAULT_BATCH_SIZE: usize = 20;

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Source(#[from] SourceRetrievalError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub batch_size: usize,
    /// Clear the table before the first record is read.
    pub refresh: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            refresh: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub records: usize,
    pub skipped: usize,
    pub stored: usize,
    pub batches: usize,
}

/// Normalize and store the records of `source`, in batches.
///
/// Nothing happens until the returned iterator is polled. Each item is a
/// batch that has already been committed. A record that does not normalize
/// is logged and skipped. A source or storage failure is yielded once as an
/// error and ends the run, batches committed before it stay in place.
pub fn ingest<I>(
    repository: &SqliteRepository,
    source: I,
    options: IngestOptions,
) -> Ingestion<'_, I::IntoIter>
where
    I: IntoIterator<Item = Result<serde_json::Value, SourceRetrievalError>>,
{
    let batch_size = options.batch_size.max(1);
    Ingestion {
        repository,
        source: source.into_iter(),
        batch_size,
        refresh: options.refresh,
        batch: Vec::with_capacity(batch_size),
        stats: IngestStats::default(),
        started: false,
        finished: false,
    }
}

pub struct Ingestion<'r, S> {
    repository: &'r SqliteRepository,
    source: S,
    batch_size: usize,
    refresh: bool,
    batch: Vec<CveRow>,
    stats: IngestStats,
    started: bool,
    finished: bool,
}

impl<S> Ingestion<'_, S> {
    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    fn start(&mut self) -> Result<(), StorageError> {
        self.started = true;
        if self.refresh {
            let removed = self.repository.clear_all()?;
            log::info!("cleared {} stored records", removed);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<Vec<CveRow>, StorageError> {
        let batch = mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        let stored = self.repository.upsert_many(batch)?;

        self.stats.stored += stored.len();
        self.stats.batches += 1;
        log::info!(
            "stored batch {} ({} rows, {} total)",
            self.stats.batches,
            stored.len(),
            self.stats.stored
        );

        Ok(stored)
    }

    fn fail(&mut self, error: IngestError) -> Option<Result<Vec<CveRow>, IngestError>> {
        self.finished = true;
        if !self.batch.is_empty() {
            log::warn!("discarding {} pending rows", self.batch.len());
            self.batch.clear();
        }
        Some(Err(error))
    }
}

impl<S> Iterator for Ingestion<'_, S>
where
    S: Iterator<Item = Result<serde_json::Value, SourceRetrievalError>>,
{
    type Item = Result<Vec<CveRow>, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if !self.started {
            if let Err(e) = self.start() {
                return self.fail(e.into());
            }
        }

        loop {
            match self.source.next() {
                Some(Ok(raw)) => {
                    self.stats.records += 1;
                    match normalize(&raw) {
                        Ok(row) => self.batch.push(row),
                        Err(e) => {
                            self.stats.skipped += 1;
                            log::warn!("skipping record {}: {}", self.stats.records, e);
                            continue;
                        }
                    }

                    if self.batch.len() >= self.batch_size {
                        return match self.flush() {
                            Ok(batch) => Some(Ok(batch)),
                            Err(e) => self.fail(e.into()),
                        };
                    }
                }
                Some(Err(e)) => {
                    log::error!("advisory source failed: {}", e);
                    return self.fail(e.into());
                }
                None => {
                    self.finished = true;
                    if self.batch.is_empty() {
                        return None;
                    }
                    return match self.flush() {
                        Ok(batch) => Some(Ok(batch)),
                        Err(e) => self.fail(e.into()),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::tests::{execute, reject_inserts_of, row, scratch_repository};
    use reqwest::StatusCode;
    use serde_json::json;

    pub(crate) fn raw(n: usize) -> serde_json::Value {
        json!({
            "cve": {
                "id": format!("CVE-2024-{n:05}"),
                "published": "2024-05-01T10:00:00.000",
                "lastModified": "2024-05-02T11:30:00.250",
                "descriptions": [{ "lang": "en", "value": format!("record {n}") }],
                "metrics": {
                    "cvssMetricV31": [{ "cvssData": { "baseScore": 6.1, "baseSeverity": "MEDIUM" } }]
                },
                "references": [{ "url": format!("https://example.com/advisories/{n}") }]
            }
        })
    }

    pub(crate) fn source(
        n: usize,
    ) -> Vec<Result<serde_json::Value, SourceRetrievalError>> {
        (0..n).map(|i| Ok(raw(i))).collect()
    }

    #[test]
    fn batches_by_size() {
        let (_dir, repository) = scratch_repository();

        let batches = ingest(&repository, source(41), IngestOptions::default())
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert_eq!(
            batches.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![20, 20, 1]
        );
        assert_eq!(repository.count().unwrap(), 41);
    }

    #[test]
    fn exact_multiple_has_no_trailing_batch() {
        let (_dir, repository) = scratch_repository();
        let options = IngestOptions {
            batch_size: 5,
            ..Default::default()
        };

        let sizes = ingest(&repository, source(10), options)
            .map(|batch| batch.unwrap().len())
            .collect::<Vec<_>>();

        assert_eq!(sizes, vec![5, 5]);
    }

    #[test]
    fn empty_source_is_not_an_error() {
        let (_dir, repository) = scratch_repository();

        let mut ingestion = ingest(&repository, source(0), IngestOptions::default());

        assert!(ingestion.next().is_none());
        assert_eq!(ingestion.stats(), IngestStats::default());
    }

    #[test]
    fn malformed_records_are_skipped() {
        let (_dir, repository) = scratch_repository();
        let mut records = source(5);
        records[2].as_mut().unwrap()["cve"]
            .as_object_mut()
            .unwrap()
            .remove("id");

        let mut ingestion = ingest(&repository, records, IngestOptions::default());
        let batches = ingestion
            .by_ref()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert_eq!(batches.len(), 1);
        assert_eq!(repository.count().unwrap(), 4);
        assert_eq!(
            ingestion.stats(),
            IngestStats {
                records: 5,
                skipped: 1,
                stored: 4,
                batches: 1
            }
        );
    }

    #[test]
    fn source_failure_ends_the_run() {
        let (_dir, repository) = scratch_repository();
        let mut records = source(25);
        records.push(Err(SourceRetrievalError::Status(
            StatusCode::INTERNAL_SERVER_ERROR,
        )));
        records.extend(source(3));

        let options = IngestOptions {
            batch_size: 10,
            ..Default::default()
        };
        let results = ingest(&repository, records, options).collect::<Vec<_>>();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().len(), 10);
        assert_eq!(results[1].as_ref().unwrap().len(), 10);
        assert!(matches!(
            results[2],
            Err(IngestError::Source(SourceRetrievalError::Status(_)))
        ));
        // committed batches stay, the pending five rows are dropped
        assert_eq!(repository.count().unwrap(), 20);
    }

    #[test]
    fn storage_failure_ends_the_run() {
        let (_dir, repository) = scratch_repository();
        reject_inserts_of(&repository, "CVE-2024-00007");

        let options = IngestOptions {
            batch_size: 5,
            ..Default::default()
        };
        let mut ingestion = ingest(&repository, source(12), options);

        assert_eq!(ingestion.next().unwrap().unwrap().len(), 5);
        assert!(matches!(
            ingestion.next(),
            Some(Err(IngestError::Storage(StorageError::Query(_))))
        ));
        assert!(ingestion.next().is_none());

        // the first batch stays, the failed one left nothing behind
        assert_eq!(repository.count().unwrap(), 5);
        assert_eq!(ingestion.stats().stored, 5);
        assert_eq!(ingestion.stats().batches, 1);
    }

    #[test]
    fn failed_refresh_is_the_only_item() {
        let (_dir, repository) = scratch_repository();
        execute(&repository, "DROP TABLE cve");

        let options = IngestOptions {
            refresh: true,
            ..Default::default()
        };
        let results = ingest(&repository, source(3), options).collect::<Vec<_>>();

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(IngestError::Storage(_))));
    }

    #[test]
    fn refresh_clears_before_the_first_batch() {
        let (_dir, repository) = scratch_repository();
        repository.upsert_one(row("CVE-1999-0001")).unwrap();

        let options = IngestOptions {
            refresh: true,
            ..Default::default()
        };
        let ingestion = ingest(&repository, source(3), options);

        // nothing is cleared until the run is polled
        assert_eq!(repository.count().unwrap(), 1);

        ingestion.for_each(|batch| {
            batch.unwrap();
        });

        let rows = repository.scan_all().unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.id != "CVE-1999-0001"));
    }

    #[test]
    fn without_refresh_rows_are_replaced_in_place() {
        let (_dir, repository) = scratch_repository();

        ingest(&repository, source(3), IngestOptions::default()).for_each(drop);
        ingest(&repository, source(5), IngestOptions::default()).for_each(drop);

        assert_eq!(repository.count().unwrap(), 5);
    }

    #[test]
    fn emitted_rows_are_what_was_stored() {
        let (_dir, repository) = scratch_repository();

        let emitted = ingest(&repository, source(3), IngestOptions::default())
            .flat_map(Result::unwrap)
            .collect::<Vec<_>>();

        assert_eq!(emitted, repository.scan_all().unwrap());
        assert_eq!(emitted[0].published, "2024-05-01 10:00:00");
        assert_eq!(emitted[0].last_modified, "2024-05-02 11:30:00");
        assert_eq!(emitted[0].cvss_v3_severity.as_deref(), Some("MEDIUM"));
    }
}
