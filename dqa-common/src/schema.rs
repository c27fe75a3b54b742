//! Destination tables, shared by the queue consumer and the HTTP API.
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::migrate::Migrator;

/// Creates both destination tables if they do not exist yet.
pub static MIGRATOR: Migrator = sqlx::migrate!("../migrations");

pub const METRICS_TABLE: &str = "dqadwapicentral";
pub const DUPLICATES_TABLE: &str = "DqaDwapiCentralPatientDuplicates";

pub(crate) const INSERT_METRIC: &str = r#"
INSERT INTO dqadwapicentral
    (mfl_code, name, indicator, value, log_date, dwapi_version, docket)
VALUES
    ($1, $2, $3, $4, $5, $6, $7)
"#;

pub(crate) const INSERT_DUPLICATE: &str = r#"
INSERT INTO "DqaDwapiCentralPatientDuplicates"
    (mfl_code, name, number_of_dups, log_date, reporting_date, created_at)
VALUES
    ($1, $2, $3, $4, $5, $6)
"#;

/// One indicator's value for one reporting event. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct MetricRecord {
    pub mfl_code: i32,
    /// Facility name.
    pub name: String,
    pub indicator: String,
    /// `None` when the indicator query returned no rows.
    pub value: Option<String>,
    pub log_date: NaiveDateTime,
    pub dwapi_version: String,
    pub docket: String,
}

/// Duplicate-patient count for one reporting event. Append-only; the creation timestamp
/// is assigned by the writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct DuplicateRecord {
    pub mfl_code: i32,
    /// Facility name.
    pub name: String,
    pub number_of_dups: i32,
    pub log_date: NaiveDateTime,
    pub reporting_date: NaiveDate,
}
