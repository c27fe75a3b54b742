use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::{StoreError, WriteFailure};
use crate::schema::{
    DuplicateRecord, MetricRecord, DUPLICATES_TABLE, INSERT_DUPLICATE, INSERT_METRIC,
    METRICS_TABLE, MIGRATOR,
};

/// Append-only store for pipeline output. Every insert is its own transaction.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    async fn insert_metric(&self, record: &MetricRecord) -> Result<(), sqlx::Error>;

    async fn insert_duplicate(
        &self,
        record: &DuplicateRecord,
        created_at: NaiveDateTime,
    ) -> Result<(), sqlx::Error>;
}

/// `DestinationStore` backed by a lazily connected PostgreSQL pool.
#[derive(Clone)]
pub struct PgDestinationStore {
    pool: PgPool,
}

impl PgDestinationStore {
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

    /// Create the destination tables if they are absent.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|error| StoreError::MigrationError { error })
    }
}

#[async_trait]
impl DestinationStore for PgDestinationStore {
    async fn insert_metric(&self, record: &MetricRecord) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(INSERT_METRIC)
            .bind(record.mfl_code)
            .bind(&record.name)
            .bind(&record.indicator)
            .bind(&record.value)
            .bind(record.log_date)
            .bind(&record.dwapi_version)
            .bind(&record.docket)
            .execute(&mut *tx)
            .await?;

        tx.commit().await
    }

    async fn insert_duplicate(
        &self,
        record: &DuplicateRecord,
        created_at: NaiveDateTime,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(INSERT_DUPLICATE)
            .bind(record.mfl_code)
            .bind(&record.name)
            .bind(record.number_of_dups)
            .bind(record.log_date)
            .bind(record.reporting_date)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await
    }
}

/// Persist one Metric Record as a single committed write.
pub async fn write_metric(
    destination: &dyn DestinationStore,
    record: &MetricRecord,
) -> Result<(), WriteFailure> {
    destination
        .insert_metric(record)
        .await
        .map_err(|error| WriteFailure {
            table: METRICS_TABLE,
            error,
        })
}

/// Persist one Duplicate Record as a single committed write, stamped with the current time.
pub async fn write_duplicate(
    destination: &dyn DestinationStore,
    record: &DuplicateRecord,
) -> Result<(), WriteFailure> {
    destination
        .insert_duplicate(record, Utc::now().naive_utc())
        .await
        .map_err(|error| WriteFailure {
            table: DUPLICATES_TABLE,
            error,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::{map_duplicate, map_metric};
    use crate::test_utils::{test_clinic_event, InMemoryDestination};

    #[tokio::test]
    async fn test_write_metric() {
        let destination = InMemoryDestination::new();
        let record = map_metric(&test_clinic_event(), "TX_CURR", Some("42".to_owned()));

        write_metric(&destination, &record).await.unwrap();

        assert_eq!(destination.metrics(), vec![record]);
    }

    #[tokio::test]
    async fn test_write_failure_names_the_table() {
        let destination = InMemoryDestination::new().failing_indicator("TX_CURR");
        let record = map_metric(&test_clinic_event(), "TX_CURR", None);

        let error = write_metric(&destination, &record).await.unwrap_err();

        assert_eq!(error.table, METRICS_TABLE);
        assert!(destination.metrics().is_empty());
    }

    #[tokio::test]
    async fn test_write_duplicate_stamps_creation_time() {
        let destination = InMemoryDestination::new();
        let record = map_duplicate(&test_clinic_event(), 3);
        let before = Utc::now().naive_utc();

        write_duplicate(&destination, &record).await.unwrap();

        let stored = destination.duplicates();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].0, record);
        assert!(stored[0].1 >= before);
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires a postgres server at DATABASE_URL"]
    async fn test_pg_writes_are_committed(db: PgPool) {
        let destination = PgDestinationStore::from_pool(db.clone());
        let event = test_clinic_event();

        write_metric(&destination, &map_metric(&event, "TX_CURR", None))
            .await
            .expect("failed to write metric");
        write_duplicate(&destination, &map_duplicate(&event, 3))
            .await
            .expect("failed to write duplicate");

        let metrics: Vec<MetricRecord> = sqlx::query_as(
            "SELECT mfl_code, name, indicator, value, log_date, dwapi_version, docket FROM dqadwapicentral",
        )
        .fetch_all(&db)
        .await
        .expect("failed to read metrics");
        assert_eq!(metrics, vec![map_metric(&event, "TX_CURR", None)]);

        let duplicates: Vec<DuplicateRecord> = sqlx::query_as(
            r#"SELECT mfl_code, name, number_of_dups, log_date, reporting_date FROM "DqaDwapiCentralPatientDuplicates""#,
        )
        .fetch_all(&db)
        .await
        .expect("failed to read duplicates");
        assert_eq!(duplicates, vec![map_duplicate(&event, 3)]);
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires a postgres server at DATABASE_URL"]
    async fn test_pg_migrations_are_idempotent(db: PgPool) {
        let destination = PgDestinationStore::from_pool(db);

        destination
            .run_migrations()
            .await
            .expect("re-running migrations failed");
    }
}
