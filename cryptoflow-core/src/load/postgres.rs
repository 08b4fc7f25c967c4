//! PostgreSQL sink.
//!
//! Opens one connection per load, runs every table's upsert inside a single
//! transaction and commits once at the end. Dropping the transaction on an
//! error rolls back whatever was already inserted.

use super::statement::{batch_rows, insert_statement};
use super::{LoadError, LoadSummary, Sink, TableLoad};
use crate::config::DatabaseConfig;
use crate::transform::Batch;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};
use std::str::FromStr;
use tracing::{debug, info, warn};

pub struct PostgresLoader {
    options: PgConnectOptions,
}

impl PostgresLoader {
    pub fn new(config: &DatabaseConfig) -> Result<Self, LoadError> {
        Ok(Self {
            options: connect_options(config)?,
        })
    }

    async fn load_async(&self, batches: &[Batch]) -> Result<LoadSummary, LoadError> {
        // Every batch is flattened before the connection opens.
        let prepared = batches
            .iter()
            .map(|batch| Ok((batch.kind, batch_rows(batch)?)))
            .collect::<Result<Vec<_>, LoadError>>()?;

        let mut conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(LoadError::Connect)?;
        let mut tx = conn.begin().await.map_err(LoadError::Begin)?;

        let mut tables = Vec::with_capacity(prepared.len());
        for (kind, rows) in prepared {
            let table = kind.schema().table;
            let offered = rows.len();

            if rows.is_empty() {
                info!(table, "no rows, skipping insert");
                tables.push(TableLoad {
                    kind,
                    rows: 0,
                    inserted: 0,
                });
                continue;
            }

            let mut query_builder = insert_statement(kind.schema(), rows)?;
            let result = query_builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|source| LoadError::Insert { table, source })?;

            let inserted = result.rows_affected() as usize;
            info!(
                table,
                rows = offered,
                inserted,
                skipped = offered.saturating_sub(inserted),
                "upserted table"
            );
            tables.push(TableLoad {
                kind,
                rows: offered,
                inserted,
            });
        }

        tx.commit().await.map_err(LoadError::Commit)?;
        debug!("transaction committed");

        if let Err(e) = conn.close().await {
            warn!("failed to close database connection cleanly: {e}");
        }

        Ok(LoadSummary { tables })
    }
}

impl Sink for PostgresLoader {
    fn name(&self) -> &str {
        "postgres"
    }

    fn load(&self, batches: &[Batch]) -> Result<LoadSummary, LoadError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| LoadError::Runtime(e.to_string()))?;
        runtime.block_on(self.load_async(batches))
    }
}

/// Connection options from config. A URL wins over the individual fields.
pub fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions, LoadError> {
    let mut options = match &config.url {
        Some(url) => {
            PgConnectOptions::from_str(url).map_err(|e| LoadError::Config(e.to_string()))?
        }
        None => {
            let options = PgConnectOptions::new()
                .host(&config.host)
                .port(config.port)
                .username(&config.user)
                .database(&config.database);
            match &config.password {
                Some(password) => options.password(password),
                None => options,
            }
        }
    };

    if let Some(schema) = &config.schema {
        options = options.options([("search_path", schema.as_str())]);
    }

    Ok(options.disable_statement_logging())
}
