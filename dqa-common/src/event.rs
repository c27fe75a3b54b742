//! Normalization of inbound reporting events.
//!
//! Producers are not consistent about the payloads they emit: some send single-quoted
//! pseudo-JSON, and older DWAPI versions name the facility code `MFL Code`. Everything
//! downstream works on a `CanonicalEvent`, which can only be built through `normalize`
//! or `CanonicalEvent::try_from`.
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::MalformedPayload;

/// Format of `log_date`, e.g. `2024-01-15T10:00:00.000000`. The fraction is mandatory and
/// at most six digits long.
pub const LOG_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const LOG_DATE_MAX_FRACTION_DIGITS: usize = 6;
/// Format of `indicator_date`, e.g. `2024-01-15`.
pub const INDICATOR_DATE_FORMAT: &str = "%Y-%m-%d";

/// Legacy key names and the canonical key they are renamed to. The legacy value wins
/// when both are present.
const LEGACY_FIELD_RENAMES: &[(&str, &str)] = &[("MFL Code", "MFL_Code")];

/// One reporting occurrence for a facility, validated and typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalEvent {
    pub facility: String,
    pub mfl_code: i32,
    pub docket: String,
    pub indicator_date: NaiveDate,
    pub message: String,
    pub log_date: NaiveDateTime,
    pub dwapi_version: String,
}

/// Normalize a raw queue payload into a `CanonicalEvent`.
pub fn normalize(raw: &str) -> Result<CanonicalEvent, MalformedPayload> {
    CanonicalEvent::try_from(parse_lenient(raw)?)
}

/// Rewrite single quotes to double quotes, then parse. The rewrite is unconditional, so a
/// payload with an apostrophe inside a value does not survive it.
fn parse_lenient(raw: &str) -> Result<Value, MalformedPayload> {
    let repaired = raw.replace('\'', "\"");

    serde_json::from_str(&repaired).map_err(MalformedPayload::InvalidStructure)
}

fn apply_legacy_renames(fields: &mut Map<String, Value>) {
    for (legacy, canonical) in LEGACY_FIELD_RENAMES {
        if let Some(value) = fields.remove(*legacy) {
            fields.insert((*canonical).to_owned(), value);
        }
    }
}

impl TryFrom<Value> for CanonicalEvent {
    type Error = MalformedPayload;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(mut fields) = value else {
            return Err(MalformedPayload::NotAnObject);
        };

        apply_legacy_renames(&mut fields);

        Ok(CanonicalEvent {
            facility: text_field(&fields, "Facility")?,
            mfl_code: integer_field(&fields, "MFL_Code")?,
            docket: text_field(&fields, "Docket")?,
            indicator_date: date_field(&fields, "indicator_date")?,
            message: text_field(&fields, "Message")?,
            log_date: timestamp_field(&fields, "log_date")?,
            dwapi_version: text_field(&fields, "dwapi_version")?,
        })
    }
}

fn required<'a>(
    fields: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Value, MalformedPayload> {
    match fields.get(field) {
        None => Err(MalformedPayload::MissingField(field)),
        Some(Value::Null) => Err(MalformedPayload::InvalidField {
            field,
            reason: "must not be null".to_owned(),
        }),
        Some(value) => Ok(value),
    }
}

/// Scalars are accepted as text; producers occasionally send numeric docket or version tags.
fn text_field(fields: &Map<String, Value>, field: &'static str) -> Result<String, MalformedPayload> {
    match required(fields, field)? {
        Value::String(s) => Ok(s.to_owned()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(MalformedPayload::InvalidField {
            field,
            reason: "expected a string".to_owned(),
        }),
    }
}

fn integer_field(fields: &Map<String, Value>, field: &'static str) -> Result<i32, MalformedPayload> {
    let invalid = |reason: String| MalformedPayload::InvalidField { field, reason };

    match required(fields, field)? {
        Value::Number(n) => n
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .ok_or_else(|| invalid(format!("{} is not a valid integer", n))),
        Value::String(s) => s
            .trim()
            .parse::<i32>()
            .map_err(|e| invalid(format!("{:?} is not a valid integer: {}", s, e))),
        _ => Err(invalid("expected an integer".to_owned())),
    }
}

fn date_field(fields: &Map<String, Value>, field: &'static str) -> Result<NaiveDate, MalformedPayload> {
    let value = text_field(fields, field)?;

    NaiveDate::parse_from_str(&value, INDICATOR_DATE_FORMAT).map_err(|e| {
        MalformedPayload::InvalidField {
            field,
            reason: format!("{:?} does not match {}: {}", value, INDICATOR_DATE_FORMAT, e),
        }
    })
}

fn timestamp_field(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<NaiveDateTime, MalformedPayload> {
    let value = text_field(fields, field)?;
    let invalid = |reason: String| MalformedPayload::InvalidField {
        field,
        reason: format!("{:?} does not match {}: {}", value, LOG_DATE_FORMAT, reason),
    };

    match value.rsplit_once('.') {
        Some((_, fraction))
            if (1..=LOG_DATE_MAX_FRACTION_DIGITS).contains(&fraction.len())
                && fraction.bytes().all(|b| b.is_ascii_digit()) => {}
        _ => return Err(invalid("expected a fraction of 1 to 6 digits".to_owned())),
    }

    NaiveDateTime::parse_from_str(&value, LOG_DATE_FORMAT).map_err(|e| invalid(e.to_string()))
}
