//! Execution of indicator and duplicate-patient queries against the source store.
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;

use crate::catalog::IndicatorDefinition;
use crate::error::QueryExecutionError;
use crate::source::{QueryParam, Scalar, SourceStore};

/// Named parameter carrying the facility code in every template.
pub const MFL_CODE_PARAM: &str = "mfl_code";
/// Named parameter carrying the reporting date in the duplicate template.
pub const REPORTING_DATE_PARAM: &str = "reporting_date";

pub const DUPLICATE_CHECK: &str = "PATIENT_DUPLICATES";

/// Run one indicator query for a facility.
///
/// Returns the first column of the first row as text, or `None` when the query returned
/// no rows (or a NULL): the indicator was not computed, which is different from zero.
pub async fn run_indicator_query(
    source: &dyn SourceStore,
    indicator: &IndicatorDefinition,
    mfl_code: i32,
) -> Result<Option<String>, QueryExecutionError> {
    let params = [(MFL_CODE_PARAM, QueryParam::Integer(mfl_code))];

    let scalar = source
        .fetch_scalar(&indicator.query, &params)
        .await
        .map_err(|error| QueryExecutionError {
            query: indicator.name.to_owned(),
            error,
        })?;

    Ok(scalar.and_then(Scalar::into_text))
}

/// Run the duplicate-patient query for a facility and reporting date.
///
/// No rows means no duplicates were found, so the count defaults to zero.
pub async fn run_duplicate_check(
    source: &dyn SourceStore,
    query: &str,
    mfl_code: i32,
    reporting_date: NaiveDate,
) -> Result<i32, QueryExecutionError> {
    let params = [
        (MFL_CODE_PARAM, QueryParam::Integer(mfl_code)),
        (REPORTING_DATE_PARAM, QueryParam::Date(reporting_date)),
    ];

    let failed = |error: sqlx::Error| QueryExecutionError {
        query: DUPLICATE_CHECK.to_owned(),
        error,
    };

    let scalar = source.fetch_scalar(query, &params).await.map_err(failed)?;

    match scalar {
        None | Some(Scalar::Null) => Ok(0),
        Some(Scalar::Integer(count)) => i32::try_from(count).map_err(|e| failed(decode_error(e))),
        Some(Scalar::Decimal(count)) if count.fract().is_zero() => count
            .to_i32()
            .ok_or_else(|| failed(decode_error(format!("duplicate count {} out of range", count)))),
        Some(Scalar::Text(count)) => count
            .trim()
            .parse::<i32>()
            .map_err(|e| failed(decode_error(e))),
        Some(other) => Err(failed(decode_error(format!(
            "duplicate count must be an integer, got {:?}",
            other
        )))),
    }
}

fn decode_error<E>(error: E) -> sqlx::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    sqlx::Error::ColumnDecode {
        index: "0".to_owned(),
        source: error.into(),
    }
}
