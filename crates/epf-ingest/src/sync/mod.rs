//! Table synchronization
//!
//! A file's rows reach its table in one of two ways:
//!
//! - **FULL**: the table is dropped, recreated with the header's column
//!   types, filled, and given its primary key.
//! - **Incremental**: the rows land in `<table>_temp` built the same way,
//!   changed rows are updated in the main table, rows with new keys are
//!   inserted, and the staging table is dropped.
//!
//! All statements for one file run in a single transaction. If anything
//! fails or the upload times out, the transaction is rolled back and a
//! best-effort drop of the staging table follows.

pub mod plan;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{IngestError, Result, UploadStage};
use crate::record::FileRecord;

pub use plan::{quote_ident, SyncPlan, STAGING_SUFFIX};

/// Destination for a parsed file's rows
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Persist the record's rows, returning how many were written
    async fn synchronize(&self, record: &FileRecord) -> Result<u64>;
}

/// Postgres implementation of [`TableSink`]
#[derive(Debug, Clone)]
pub struct TableSynchronizer {
    pool: PgPool,
    insert_batch_size: usize,
    timeout: Duration,
}

impl TableSynchronizer {
    pub fn new(pool: PgPool, insert_batch_size: usize, timeout: Duration) -> Self {
        Self {
            pool,
            insert_batch_size,
            timeout,
        }
    }

    async fn run(
        &self,
        plan: &SyncPlan,
        rows: &[Vec<String>],
        staging_created: &mut bool,
    ) -> Result<u64> {
        let table = plan.table.as_str();
        let landing = plan.landing_table();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IngestError::upload(table, UploadStage::Connect, e))?;

        execute(&mut tx, &plan.drop_sql(landing), table, UploadStage::Drop).await?;
        execute(&mut tx, &plan.create_sql(landing), table, UploadStage::Create).await?;
        *staging_created = plan.is_incremental();

        let inserted = self.insert_rows(&mut tx, plan, landing, rows).await?;

        execute(&mut tx, &plan.primary_key_sql(landing), table, UploadStage::PrimaryKey).await?;

        if let Some(sql) = plan.ensure_main_sql() {
            execute(&mut tx, &sql, table, UploadStage::Create).await?;
        }
        if let Some(sql) = plan.update_sql() {
            let updated = execute(&mut tx, &sql, table, UploadStage::Update).await?;
            debug!(table = %table, updated, "Updated changed rows");
        }
        if let Some(sql) = plan.merge_insert_sql() {
            let added = execute(&mut tx, &sql, table, UploadStage::MergeInsert).await?;
            debug!(table = %table, added, "Inserted new rows");
        }
        if let Some(sql) = plan.drop_staging_sql() {
            execute(&mut tx, &sql, table, UploadStage::Drop).await?;
        }

        tx.commit()
            .await
            .map_err(|e| IngestError::upload(table, UploadStage::Commit, e))?;

        Ok(inserted)
    }

    async fn insert_rows(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        plan: &SyncPlan,
        landing: &str,
        rows: &[Vec<String>],
    ) -> Result<u64> {
        let mut inserted = 0;

        for chunk in rows.chunks(plan.batch_size(self.insert_batch_size)) {
            let mut query_builder: QueryBuilder<Postgres> =
                QueryBuilder::new(plan.insert_prefix(landing));
            query_builder.push_values(chunk.iter(), |mut b, row| {
                for (value, column) in row.iter().zip(&plan.columns) {
                    b.push("CAST(")
                        .push_bind_unseparated(value.clone())
                        .push_unseparated(format!(" AS {})", column.ty.cast_sql()));
                }
            });

            let result = query_builder
                .build()
                .persistent(false)
                .execute(&mut **tx)
                .await
                .map_err(|e| IngestError::upload(plan.table.as_str(), UploadStage::Insert, e))?;
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    async fn drop_staging(&self, plan: &SyncPlan) {
        let Some(ref staging) = plan.staging else {
            return;
        };
        let sql = plan.drop_sql(staging);
        if let Err(e) = sqlx::query(&sql).persistent(false).execute(&self.pool).await {
            warn!(table = %plan.table, staging = %staging, error = %e, "Failed to drop staging table");
        }
    }
}

#[async_trait]
impl TableSink for TableSynchronizer {
    #[tracing::instrument(skip_all, fields(table = %record.table_name(), mode = %record.metadata.export_mode))]
    async fn synchronize(&self, record: &FileRecord) -> Result<u64> {
        let plan = SyncPlan::new(record.table_name(), &record.metadata)?;
        let mut staging_created = false;

        let result = match tokio::time::timeout(
            self.timeout,
            self.run(&plan, record.rows(), &mut staging_created),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(IngestError::UploadTimeout {
                table: plan.table.clone(),
                seconds: self.timeout.as_secs(),
            }),
        };

        if result.is_err() && staging_created {
            self.drop_staging(&plan).await;
        }

        result
    }
}

/// Run one generated statement inside the upload transaction
async fn execute(
    tx: &mut Transaction<'_, Postgres>,
    sql: &str,
    table: &str,
    stage: UploadStage,
) -> Result<u64> {
    debug!(table = %table, stage = %stage, "Executing statement");
    let result = sqlx::query(sql)
        .persistent(false)
        .execute(&mut **tx)
        .await
        .map_err(|e| IngestError::upload(table, stage, e))?;
    Ok(result.rows_affected())
}
