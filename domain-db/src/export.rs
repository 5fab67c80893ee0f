use serde::Serialize;

use crate::db::models::CveRow;

/// A stored row as shown in tables and charts: day precision dates, nulls
/// kept as nulls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayRow<'a> {
    pub id: &'a str,
    pub published: &'a str,
    pub last_modified: &'a str,
    pub description: &'a str,
    pub cvss_v3_score: Option<f64>,
    pub cvss_v3_severity: Option<&'a str>,
    pub cvss_v2_score: Option<f64>,
    pub cvss_v2_severity: Option<&'a str>,
    pub reference_urls: &'a str,
}

impl<'a> From<&'a CveRow> for DisplayRow<'a> {
    fn from(row: &'a CveRow) -> Self {
        Self {
            id: &row.id,
            published: day(&row.published),
            last_modified: day(&row.last_modified),
            description: &row.description,
            cvss_v3_score: row.cvss_v3_score,
            cvss_v3_severity: row.cvss_v3_severity.as_deref(),
            cvss_v2_score: row.cvss_v2_score,
            cvss_v2_severity: row.cvss_v2_severity.as_deref(),
            reference_urls: &row.reference_urls,
        }
    }
}

// Stored timestamps are `YYYY-MM-DD HH:MM:SS`, keep the date part.
fn day(timestamp: &str) -> &str {
    timestamp.split_once(' ').map_or(timestamp, |(date, _)| date)
}

pub fn display_rows(rows: &[CveRow]) -> Vec<DisplayRow<'_>> {
    rows.iter().map(DisplayRow::from).collect()
}

/// JSON array of [`DisplayRow`]s, `[]` for an empty table.
pub fn to_json(rows: &[CveRow]) -> Result<String, serde_json::Error> {
    serde_json::to_string(&display_rows(rows))
}
