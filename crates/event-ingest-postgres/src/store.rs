// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::PostgresConfig;
use crate::sql;
use async_trait::async_trait;
use bytes::BytesMut;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use event_ingest::errors::StoreError;
use event_ingest::schema::SchemaRegistry;
use event_ingest::storage::{EventStore, FallbackRow, FieldValue, Row};
use std::collections::BTreeSet;
use std::error::Error;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type, WrongType};
use tokio_postgres::NoTls;
use tracing::{debug, info};

/// Binds a [`FieldValue`] as a statement parameter.
#[derive(Debug)]
struct SqlValue<'a>(&'a FieldValue);

impl ToSql for SqlValue<'_> {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self.0 {
            FieldValue::Null => Ok(IsNull::Yes),
            FieldValue::Bool(value) => value.to_sql_checked(ty, out),
            FieldValue::Int(value) => value.to_sql_checked(ty, out),
            FieldValue::Float(value) => value.to_sql_checked(ty, out),
            FieldValue::Text(value) => value.to_sql_checked(ty, out),
            FieldValue::Json(value) => value.to_sql_checked(ty, out),
            FieldValue::Timestamp(value) => value.to_sql_checked(ty, out),
            FieldValue::Uuid(value) => value.to_sql_checked(ty, out),
        }
    }

    // the wrapped value checks the column type itself
    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn classify(error: tokio_postgres::Error) -> StoreError {
    match error.as_db_error() {
        Some(db) if *db.code() == SqlState::UNIQUE_VIOLATION => {
            StoreError::UniqueViolation(db.message().to_string())
        }
        Some(db) => StoreError::Rejected(format!("{} ({})", db.message(), db.code().code())),
        None if error
            .source()
            .is_some_and(|source| source.downcast_ref::<WrongType>().is_some()) =>
        {
            StoreError::Rejected(error.to_string())
        }
        None => StoreError::Unavailable(error.to_string()),
    }
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool,
    fallback_table: String,
}

impl PostgresStore {
    /// Builds the connection pool. No connection is opened until first use.
    pub fn new(config: &PostgresConfig) -> Result<Self, StoreError> {
        let mut cfg = Config::new();
        cfg.url = Some(config.normalized_connection_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(config.max_pool_size));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| {
                StoreError::Unavailable(format!("failed to create connection pool: {e}"))
            })?;

        Ok(Self {
            pool,
            fallback_table: config.fallback_table.clone(),
        })
    }

    async fn connection(&self) -> Result<deadpool_postgres::Client, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(format!("failed to get a connection: {e}")))
    }

    /// Pings the database to verify connectivity
    pub async fn ping(&self) -> Result<(), StoreError> {
        let client = self.connection().await?;
        client.execute("SELECT 1", &[]).await.map_err(classify)?;
        debug!("PostgreSQL connection successful");
        Ok(())
    }

    /// Creates missing tables, columns and fingerprint indexes for every destination and the
    /// fallback table. Existing columns are never altered or dropped.
    pub async fn provision(&self, registry: &SchemaRegistry) -> Result<(), StoreError> {
        if registry.contains_table(&self.fallback_table) {
            return Err(StoreError::Rejected(format!(
                "fallback table {} is also declared as a destination",
                self.fallback_table
            )));
        }
        let client = self.connection().await?;
        for destination in registry.destinations() {
            for statement in sql::provision_destination(&destination) {
                client.batch_execute(&statement).await.map_err(classify)?;
            }
            debug!(
                "Provisioned table {} for event {}",
                destination.table, destination.event_name
            );
        }
        for statement in sql::provision_fallback(&self.fallback_table) {
            client.batch_execute(&statement).await.map_err(classify)?;
        }
        info!(
            "Provisioned {} destination table(s) and fallback table {}",
            registry.len(),
            self.fallback_table
        );
        Ok(())
    }

    /// Runs `statements` in one transaction and sums the affected rows.
    async fn execute_all(
        &self,
        statements: Vec<(String, Vec<SqlValue<'_>>)>,
    ) -> Result<u64, StoreError> {
        let mut client = self.connection().await?;
        let transaction = client.transaction().await.map_err(classify)?;
        let mut affected = 0;
        for (statement, values) in &statements {
            let params: Vec<&(dyn ToSql + Sync)> =
                values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
            affected += transaction
                .execute(statement.as_str(), &params)
                .await
                .map_err(classify)?;
        }
        transaction.commit().await.map_err(classify)?;
        Ok(affected)
    }
}

/// Splits `rows` into insert statements over the union of their columns.
fn row_statements<'a>(table: &str, rows: &'a [Row]) -> Vec<(String, Vec<SqlValue<'a>>)> {
    let columns: Vec<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    rows.chunks(sql::rows_per_statement(columns.len()))
        .map(|chunk| {
            let mut values = Vec::new();
            let mut layout = Vec::with_capacity(chunk.len());
            for row in chunk {
                let mut present = Vec::with_capacity(columns.len());
                for column in &columns {
                    match row.get(*column) {
                        Some(value) => {
                            values.push(SqlValue(value));
                            present.push(true);
                        }
                        None => present.push(false),
                    }
                }
                layout.push(present);
            }
            (sql::insert(table, &columns, &layout), values)
        })
        .collect()
}

fn fallback_values(row: &FallbackRow) -> [FieldValue; 8] {
    // same order as sql::FALLBACK_COLUMNS
    [
        FieldValue::Uuid(row.id),
        FieldValue::Text(row.event_name.clone()),
        FieldValue::Text(row.raw_content.clone()),
        FieldValue::Text(row.raw_labels_json.clone()),
        FieldValue::Int(row.timestamp_ns),
        FieldValue::Timestamp(row.event_timestamp),
        FieldValue::Timestamp(row.created_at),
        FieldValue::Text(row.fingerprint.to_string()),
    ]
}

#[async_trait]
impl EventStore for PostgresStore {
    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.execute_all(row_statements(table, rows)).await
    }

    async fn insert_fallback(&self, rows: &[FallbackRow]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let values: Vec<[FieldValue; 8]> = rows.iter().map(fallback_values).collect();
        let per_statement = sql::rows_per_statement(sql::FALLBACK_COLUMNS.len());
        let statements = values
            .chunks(per_statement)
            .map(|chunk| {
                let layout = vec![vec![true; sql::FALLBACK_COLUMNS.len()]; chunk.len()];
                let params = chunk.iter().flatten().map(SqlValue).collect();
                (
                    sql::insert(&self.fallback_table, &sql::FALLBACK_COLUMNS, &layout),
                    params,
                )
            })
            .collect();
        self.execute_all(statements).await
    }
}
