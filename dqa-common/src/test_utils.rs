//! In-memory stores for exercising the pipeline without a database.
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use crate::destination::DestinationStore;
use crate::event::CanonicalEvent;
use crate::schema::{DuplicateRecord, MetricRecord};
use crate::source::{QueryParam, Scalar, SourceStore};

/// The event used throughout the tests: Test Clinic, MFL code 101, reporting on 2024-01-15.
pub fn test_clinic_event() -> CanonicalEvent {
    CanonicalEvent {
        facility: "Test Clinic".to_owned(),
        mfl_code: 101,
        docket: "ART".to_owned(),
        indicator_date: NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date"),
        message: "m".to_owned(),
        log_date: NaiveDate::from_ymd_opt(2024, 1, 15)
            .and_then(|date| date.and_hms_opt(10, 0, 0))
            .expect("valid timestamp"),
        dwapi_version: "v1".to_owned(),
    }
}

/// The raw queue payload for `test_clinic_event`.
pub const TEST_CLINIC_PAYLOAD: &str = r#"{"Facility": "Test Clinic", "MFL_Code": 101, "Docket": "ART", "indicator_date": "2024-01-15", "Message": "m", "log_date": "2024-01-15T10:00:00.000000", "dwapi_version": "v1"}"#;

#[derive(Debug, Clone)]
enum Response {
    Row(Scalar),
    NoRows,
    Failure(String),
}

pub type RecordedCall = (String, Vec<(String, QueryParam)>);

/// A `SourceStore` answering by exact template text. Unknown templates fail.
#[derive(Debug, Default)]
pub struct InMemorySource {
    responses: HashMap<String, Response>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, template: &str, value: Scalar) -> Self {
        self.responses
            .insert(template.to_owned(), Response::Row(value));
        self
    }

    pub fn with_no_rows(mut self, template: &str) -> Self {
        self.responses.insert(template.to_owned(), Response::NoRows);
        self
    }

    pub fn with_failure(mut self, template: &str, message: &str) -> Self {
        self.responses
            .insert(template.to_owned(), Response::Failure(message.to_owned()));
        self
    }

    /// Every query issued so far, in order, with its bound parameters.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("poisoned calls mutex").clone()
    }
}

#[async_trait]
impl SourceStore for InMemorySource {
    async fn fetch_scalar(
        &self,
        template: &str,
        params: &[(&str, QueryParam)],
    ) -> Result<Option<Scalar>, sqlx::Error> {
        self.calls.lock().expect("poisoned calls mutex").push((
            template.to_owned(),
            params
                .iter()
                .map(|(name, value)| ((*name).to_owned(), *value))
                .collect(),
        ));

        match self.responses.get(template) {
            Some(Response::Row(value)) => Ok(Some(value.clone())),
            Some(Response::NoRows) => Ok(None),
            Some(Response::Failure(message)) => Err(sqlx::Error::Protocol(message.to_owned())),
            None => Err(sqlx::Error::Protocol(format!(
                "no response configured for {}",
                template
            ))),
        }
    }
}

/// A `DestinationStore` keeping every committed record in memory.
#[derive(Debug, Default)]
pub struct InMemoryDestination {
    metrics: Mutex<Vec<MetricRecord>>,
    duplicates: Mutex<Vec<(DuplicateRecord, NaiveDateTime)>>,
    failing_indicators: HashSet<String>,
    fail_duplicates: bool,
}

impl InMemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes of Metric Records for `indicator`.
    pub fn failing_indicator(mut self, indicator: &str) -> Self {
        self.failing_indicators.insert(indicator.to_owned());
        self
    }

    /// Reject writes of Duplicate Records.
    pub fn failing_duplicates(mut self) -> Self {
        self.fail_duplicates = true;
        self
    }

    pub fn metrics(&self) -> Vec<MetricRecord> {
        self.metrics.lock().expect("poisoned metrics mutex").clone()
    }

    pub fn duplicates(&self) -> Vec<(DuplicateRecord, NaiveDateTime)> {
        self.duplicates
            .lock()
            .expect("poisoned duplicates mutex")
            .clone()
    }
}

#[async_trait]
impl DestinationStore for InMemoryDestination {
    async fn insert_metric(&self, record: &MetricRecord) -> Result<(), sqlx::Error> {
        if self.failing_indicators.contains(&record.indicator) {
            return Err(sqlx::Error::Protocol(format!(
                "rejected write for {}",
                record.indicator
            )));
        }

        self.metrics
            .lock()
            .expect("poisoned metrics mutex")
            .push(record.clone());
        Ok(())
    }

    async fn insert_duplicate(
        &self,
        record: &DuplicateRecord,
        created_at: NaiveDateTime,
    ) -> Result<(), sqlx::Error> {
        if self.fail_duplicates {
            return Err(sqlx::Error::Protocol("rejected duplicate write".to_owned()));
        }

        self.duplicates
            .lock()
            .expect("poisoned duplicates mutex")
            .push((record.clone(), created_at));
        Ok(())
    }
}
