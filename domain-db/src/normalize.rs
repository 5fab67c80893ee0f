use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;

use crate::cve_sources::nist::cve::{Score, Vulnerability};
use crate::db::models::CveRow;
use crate::references;

/// Rendering used for every stored timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Layouts accepted from the source, without an offset.
const SOURCE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(thiserror::Error, Debug)]
pub enum MalformedRecordError {
    #[error("record does not have the advisory shape: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("{id}: cannot parse {field} timestamp '{value}'")]
    Timestamp {
        id: String,
        field: &'static str,
        value: String,
    },
}

/// Map one raw advisory record onto a [`CveRow`].
///
/// Fails when `id`, `published` or `lastModified` is missing, when the
/// record is not shaped like an advisory at all, or when a timestamp can't
/// be parsed. Nothing is returned for a record that fails.
pub fn normalize(raw: &serde_json::Value) -> Result<CveRow, MalformedRecordError> {
    let item = Vulnerability::deserialize(raw)?;
    normalize_item(&item)
}

pub fn normalize_item(item: &Vulnerability) -> Result<CveRow, MalformedRecordError> {
    let cve = &item.cve;

    let published = clean_timestamp(&cve.published).ok_or_else(|| {
        MalformedRecordError::Timestamp {
            id: cve.id.clone(),
            field: "published",
            value: cve.published.clone(),
        }
    })?;
    let last_modified = clean_timestamp(&cve.last_modified).ok_or_else(|| {
        MalformedRecordError::Timestamp {
            id: cve.id.clone(),
            field: "lastModified",
            value: cve.last_modified.clone(),
        }
    })?;

    let (cvss_v3_score, cvss_v3_severity) = split(cve.cvss_v3().map(|m| m.score()));
    let (cvss_v2_score, cvss_v2_severity) = split(cve.cvss_v2().map(|m| m.score()));

    Ok(CveRow {
        id: cve.id.clone(),
        published,
        last_modified,
        description: cve.summary().unwrap_or_default().to_string(),
        cvss_v3_score,
        cvss_v3_severity,
        cvss_v2_score,
        cvss_v2_severity,
        reference_urls: references::join_safe(cve.reference_urls()),
    })
}

fn split(score: Option<Score>) -> (Option<f64>, Option<String>) {
    match score {
        Some(score) => (Some(score.base_score), score.base_severity),
        None => (None, None),
    }
}

/// Render a source timestamp as `YYYY-MM-DD HH:MM:SS`.
///
/// Sub-second digits are dropped. A trailing offset is dropped as well, the
/// wall-clock time is kept as written. Returns `None` when the value matches
/// none of the known layouts.
pub fn clean_timestamp(value: &str) -> Option<String> {
    let value = value.trim();

    let parsed = SOURCE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.naive_local())
        })?;

    Some(parsed.format(TIMESTAMP_FORMAT).to_string())
}
