use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::{Row, TypeInfo, ValueRef};

use crate::error::StoreError;

/// A value bound to a named parameter of a query template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryParam {
    Integer(i32),
    Date(NaiveDate),
}

/// The first column of the first row returned by a source query.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Decimal(Decimal),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Scalar {
    /// Textual rendering of the value, `None` for SQL NULL.
    pub fn into_text(self) -> Option<String> {
        match self {
            Scalar::Null => None,
            Scalar::Text(s) => Some(s),
            Scalar::Integer(n) => Some(n.to_string()),
            Scalar::Float(f) => Some(f.to_string()),
            Scalar::Decimal(d) => Some(d.to_string()),
            Scalar::Boolean(b) => Some(b.to_string()),
            Scalar::Date(d) => Some(d.to_string()),
            Scalar::Timestamp(ts) => Some(ts.to_string()),
        }
    }
}

/// Read-only access to the store the indicator queries run against.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Run `template` with `params` bound to its `:name` placeholders and return the first
    /// column of the first row, or `None` when no rows come back.
    async fn fetch_scalar(
        &self,
        template: &str,
        params: &[(&str, QueryParam)],
    ) -> Result<Option<Scalar>, sqlx::Error>;
}

/// `SourceStore` backed by a lazily connected PostgreSQL pool.
#[derive(Clone)]
pub struct PgSourceStore {
    pool: PgPool,
}

impl PgSourceStore {
    pub fn new(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)
            .map_err(|error| StoreError::ConnectionError { error })?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SourceStore for PgSourceStore {
    async fn fetch_scalar(
        &self,
        template: &str,
        params: &[(&str, QueryParam)],
    ) -> Result<Option<Scalar>, sqlx::Error> {
        let bound = bind_named_parameters(template, params);

        let mut query = sqlx::query::<Postgres>(&bound.sql);
        for index in bound.order {
            query = match params[index].1 {
                QueryParam::Integer(value) => query.bind(value),
                QueryParam::Date(value) => query.bind(value),
            };
        }

        let row = query.fetch_optional(&self.pool).await?;

        row.map(|row| decode_first_column(&row)).transpose()
    }
}

fn decode_first_column(row: &PgRow) -> Result<Scalar, sqlx::Error> {
    let type_name = {
        let raw = row.try_get_raw(0)?;
        if raw.is_null() {
            return Ok(Scalar::Null);
        }
        raw.type_info().name().to_owned()
    };

    let scalar = match type_name.as_str() {
        "INT2" => Scalar::Integer(i64::from(row.try_get::<i16, _>(0)?)),
        "INT4" => Scalar::Integer(i64::from(row.try_get::<i32, _>(0)?)),
        "INT8" => Scalar::Integer(row.try_get::<i64, _>(0)?),
        "FLOAT4" => Scalar::Float(f64::from(row.try_get::<f32, _>(0)?)),
        "FLOAT8" => Scalar::Float(row.try_get::<f64, _>(0)?),
        "NUMERIC" => Scalar::Decimal(row.try_get::<Decimal, _>(0)?),
        "BOOL" => Scalar::Boolean(row.try_get::<bool, _>(0)?),
        "DATE" => Scalar::Date(row.try_get::<NaiveDate, _>(0)?),
        "TIMESTAMP" => Scalar::Timestamp(row.try_get::<NaiveDateTime, _>(0)?),
        "TIMESTAMPTZ" => Scalar::Timestamp(row.try_get::<DateTime<Utc>, _>(0)?.naive_utc()),
        "TIME" => Scalar::Text(row.try_get::<NaiveTime, _>(0)?.to_string()),
        "UUID" => Scalar::Text(row.try_get::<uuid::Uuid, _>(0)?.to_string()),
        "JSON" | "JSONB" => Scalar::Text(row.try_get::<Value, _>(0)?.to_string()),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "\"CHAR\"" | "CHAR" | "CITEXT" | "UNKNOWN" => {
            Scalar::Text(row.try_get::<String, _>(0)?)
        }
        other => {
            return Err(sqlx::Error::ColumnDecode {
                index: "0".to_owned(),
                source: format!("unsupported column type {}", other).into(),
            })
        }
    };

    Ok(scalar)
}

/// A template rewritten to positional `$n` placeholders, with the index into the supplied
/// parameters for each position.
#[derive(Debug, PartialEq, Eq)]
pub struct BoundQuery {
    pub sql: String,
    pub order: Vec<usize>,
}

/// Rewrite `:name` placeholders for the supplied parameters into `$n` positional placeholders.
///
/// Only names present in `params` are rewritten, and only outside string literals, quoted
/// identifiers and line comments. `::type` casts are left alone. A parameter used several
/// times shares a single position; parameters the template never mentions are not bound.
pub fn bind_named_parameters(template: &str, params: &[(&str, QueryParam)]) -> BoundQuery {
    let chars: Vec<char> = template.chars().collect();
    let mut sql = String::with_capacity(template.len());
    let mut order: Vec<usize> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&next| next == c)
                    .map(|offset| i + 1 + offset)
                    .unwrap_or(chars.len() - 1);
                sql.extend(&chars[i..=end]);
                i = end + 1;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                let end = chars[i..]
                    .iter()
                    .position(|&next| next == '\n')
                    .map(|offset| i + offset)
                    .unwrap_or(chars.len());
                sql.extend(&chars[i..end]);
                i = end;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                sql.push_str("::");
                i += 2;
            }
            ':' if chars
                .get(i + 1)
                .is_some_and(|next| next.is_ascii_alphabetic() || *next == '_') =>
            {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|next| !(next.is_ascii_alphanumeric() || *next == '_'))
                    .map(|offset| start + offset)
                    .unwrap_or(chars.len());
                let name: String = chars[start..end].iter().collect();

                match params.iter().position(|(param, _)| *param == name) {
                    Some(index) => {
                        let position = match order.iter().position(|bound| *bound == index) {
                            Some(position) => position,
                            None => {
                                order.push(index);
                                order.len() - 1
                            }
                        };
                        sql.push_str(&format!("${}", position + 1));
                    }
                    None => {
                        sql.push(':');
                        sql.push_str(&name);
                    }
                }
                i = end;
            }
            _ => {
                sql.push(c);
                i += 1;
            }
        }
    }

    BoundQuery { sql, order }
}
