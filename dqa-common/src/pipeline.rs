//! The per-event pipeline: normalize, run every indicator and the duplicate check, persist.
//!
//! Every indicator is an isolated unit of work. A failing query or write is captured in the
//! `PipelineReport` and the run moves on to the next unit; only a `MalformedPayload` stops a
//! run before any query is issued. Callers always get "Processing complete" back, the report
//! is what tells them how the run actually went.
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::catalog::{IndicatorCatalog, IndicatorDefinition};
use crate::destination::{write_duplicate, write_metric, DestinationStore};
use crate::error::{MalformedPayload, UnitError};
use crate::event::{normalize, CanonicalEvent};
use crate::mapper::{map_duplicate, map_metric};
use crate::metrics::{
    DUPLICATE_CHECKS, EVENTS_MALFORMED, EVENTS_RECEIVED, INDICATOR_QUERIES, PIPELINE_DURATION,
    WRITES_FAILED,
};
use crate::runner::{run_duplicate_check, run_indicator_query};
use crate::source::SourceStore;

pub const PROCESSING_COMPLETE: &str = "Processing complete";

/// What every caller of the pipeline gets back, whatever happened to individual indicators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub message: String,
}

impl Acknowledgement {
    pub fn processing_complete() -> Self {
        Self {
            message: PROCESSING_COMPLETE.to_owned(),
        }
    }
}

/// Outcome of one indicator: the value that was written, or why nothing was.
#[derive(Debug)]
pub struct IndicatorOutcome {
    pub indicator: String,
    pub result: Result<Option<String>, UnitError>,
}

/// Everything that was attempted for one event.
#[derive(Debug)]
pub struct PipelineReport {
    pub mfl_code: i32,
    /// One entry per configured indicator, in configuration order.
    pub indicators: Vec<IndicatorOutcome>,
    /// The duplicate count that was written, or why nothing was.
    pub duplicates: Result<i32, UnitError>,
}

impl PipelineReport {
    pub fn failed_indicators(&self) -> Vec<&str> {
        self.indicators
            .iter()
            .filter(|outcome| outcome.result.is_err())
            .map(|outcome| outcome.indicator.as_str())
            .collect()
    }

    pub fn succeeded_indicators(&self) -> usize {
        self.indicators
            .iter()
            .filter(|outcome| outcome.result.is_ok())
            .count()
    }

    /// True when every unit, including the duplicate check, was written.
    pub fn is_complete_success(&self) -> bool {
        self.duplicates.is_ok() && self.indicators.iter().all(|outcome| outcome.result.is_ok())
    }

    pub fn acknowledgement(&self) -> Acknowledgement {
        Acknowledgement::processing_complete()
    }

    fn log(&self) {
        for outcome in &self.indicators {
            match &outcome.result {
                Ok(value) => info!(
                    mfl_code = self.mfl_code,
                    indicator = %outcome.indicator,
                    value = ?value,
                    "indicator query executed successfully"
                ),
                Err(e) => error!(
                    mfl_code = self.mfl_code,
                    indicator = %outcome.indicator,
                    "error processing indicator: {}",
                    e
                ),
            }
        }

        match &self.duplicates {
            Ok(count) => info!(
                mfl_code = self.mfl_code,
                number_of_dups = count,
                "duplicate check executed successfully"
            ),
            Err(e) => error!(
                mfl_code = self.mfl_code,
                "error processing duplicate check: {}", e
            ),
        }

        if !self.is_complete_success() {
            warn!(
                mfl_code = self.mfl_code,
                failed = ?self.failed_indicators(),
                duplicates_failed = self.duplicates.is_err(),
                "processing completed with failures"
            );
        }
    }

    fn record_metrics(&self) {
        for outcome in &self.indicators {
            let result = match &outcome.result {
                Ok(_) => "success",
                Err(UnitError::Query(_)) => "query_failed",
                Err(UnitError::Write(_)) => "write_failed",
            };
            metrics::counter!(
                INDICATOR_QUERIES,
                "indicator" => outcome.indicator.clone(),
                "outcome" => result
            )
            .increment(1);
        }

        let result = match &self.duplicates {
            Ok(_) => "success",
            Err(UnitError::Query(_)) => "query_failed",
            Err(UnitError::Write(_)) => "write_failed",
        };
        metrics::counter!(DUPLICATE_CHECKS, "outcome" => result).increment(1);

        let writes_failed = self
            .indicators
            .iter()
            .map(|outcome| &outcome.result)
            .filter(|result| matches!(result, Err(UnitError::Write(_))))
            .count()
            + usize::from(matches!(self.duplicates, Err(UnitError::Write(_))));
        if writes_failed > 0 {
            metrics::counter!(WRITES_FAILED).increment(writes_failed as u64);
        }
    }
}

/// Sequences normalization, queries and writes for one event at a time.
///
/// Holds only immutable configuration and store handles, so clones can run concurrently
/// from the queue consumer and the HTTP API.
#[derive(Clone)]
pub struct Pipeline {
    catalog: Arc<IndicatorCatalog>,
    source: Arc<dyn SourceStore>,
    destination: Arc<dyn DestinationStore>,
}

impl Pipeline {
    pub fn new(
        catalog: Arc<IndicatorCatalog>,
        source: Arc<dyn SourceStore>,
        destination: Arc<dyn DestinationStore>,
    ) -> Self {
        Self {
            catalog,
            source,
            destination,
        }
    }

    /// Process a raw queue payload.
    pub async fn process_payload(&self, raw: &str) -> Result<PipelineReport, MalformedPayload> {
        metrics::counter!(EVENTS_RECEIVED).increment(1);

        let event = normalize(raw).inspect_err(|e| {
            metrics::counter!(EVENTS_MALFORMED).increment(1);
            warn!("discarding malformed payload: {}", e);
        })?;

        Ok(self.process_event(&event).await)
    }

    /// Process an already structured payload, as received by the HTTP API.
    pub async fn process_value(&self, value: Value) -> Result<PipelineReport, MalformedPayload> {
        metrics::counter!(EVENTS_RECEIVED).increment(1);

        let event = CanonicalEvent::try_from(value).inspect_err(|e| {
            metrics::counter!(EVENTS_MALFORMED).increment(1);
            warn!("rejecting malformed payload: {}", e);
        })?;

        Ok(self.process_event(&event).await)
    }

    /// Run every configured indicator, then the duplicate check, for a normalized event.
    pub async fn process_event(&self, event: &CanonicalEvent) -> PipelineReport {
        let start = Instant::now();

        let mut indicators = Vec::with_capacity(self.catalog.len());
        for indicator in self.catalog.indicators() {
            let result = self.process_indicator(event, indicator).await;
            indicators.push(IndicatorOutcome {
                indicator: indicator.name.to_owned(),
                result,
            });
        }

        let duplicates = self.process_duplicates(event).await;

        let report = PipelineReport {
            mfl_code: event.mfl_code,
            indicators,
            duplicates,
        };

        report.log();
        report.record_metrics();
        metrics::histogram!(PIPELINE_DURATION).record(start.elapsed().as_secs_f64());

        report
    }

    async fn process_indicator(
        &self,
        event: &CanonicalEvent,
        indicator: &IndicatorDefinition,
    ) -> Result<Option<String>, UnitError> {
        let value = run_indicator_query(self.source.as_ref(), indicator, event.mfl_code).await?;

        let record = map_metric(event, &indicator.name, value);
        write_metric(self.destination.as_ref(), &record).await?;

        Ok(record.value)
    }

    async fn process_duplicates(&self, event: &CanonicalEvent) -> Result<i32, UnitError> {
        let count = run_duplicate_check(
            self.source.as_ref(),
            self.catalog.duplicate_query(),
            event.mfl_code,
            event.indicator_date,
        )
        .await?;

        let record = map_duplicate(event, count);
        write_duplicate(self.destination.as_ref(), &record).await?;

        Ok(count)
    }
}
