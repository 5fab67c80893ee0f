use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::schema::cve;

/// A normalized advisory, one per `id`.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[diesel(table_name = cve)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_default_value = false)]
pub struct CveRow {
    pub id: String,
    /// `YYYY-MM-DD HH:MM:SS`
    pub published: String,
    /// `YYYY-MM-DD HH:MM:SS`
    pub last_modified: String,
    pub description: String,
    pub cvss_v3_score: Option<f64>,
    pub cvss_v3_severity: Option<String>,
    pub cvss_v2_score: Option<f64>,
    pub cvss_v2_severity: Option<String>,
    /// Comma separated, only URLs that passed [`crate::references::is_safe`].
    pub reference_urls: String,
}
