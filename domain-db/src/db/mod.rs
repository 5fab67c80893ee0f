use std::time::Instant;

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;

pub mod migrations;
pub mod models;
pub mod schema;

use models::CveRow;

/// SQLite binds at most 999 parameters per statement on older builds.
const ROWS_PER_STATEMENT: usize = 100;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("could not get a database connection: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("database query failed: {0}")]
    Query(#[from] diesel::result::Error),
    #[error(transparent)]
    Migration(#[from] migrations::MigrationError),
}

/// The `cve` table in a SQLite file.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl SqliteRepository {
    pub fn new(database_path: &str, pool_size: u32) -> Result<Self, StorageError> {
        let manager = ConnectionManager::<SqliteConnection>::new(database_path);
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;
        Ok(Self { pool })
    }

    fn connection(
        &self,
    ) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>, StorageError> {
        Ok(self.pool.get()?)
    }

    /// Create the `cve` table when it is missing. Safe to call on every start.
    pub fn ensure_schema(&self) -> Result<(), StorageError> {
        let mut pooled = self.connection()?;
        let conn: &mut SqliteConnection = &mut pooled;

        if migrations::any_pending_migrations(conn)? {
            let applied = migrations::run_pending_migrations(conn)?;
            log::info!("applied {} migration(s)", applied);
        }

        Ok(())
    }

    /// Insert `row`, replacing whatever was stored under the same id.
    pub fn upsert_one(&self, row: CveRow) -> Result<CveRow, StorageError> {
        use schema::cve::dsl::*;

        let mut pooled = self.connection()?;
        let conn: &mut SqliteConnection = &mut pooled;

        diesel::replace_into(cve).values(&row).execute(conn)?;

        Ok(row)
    }

    /// Insert all `rows` in a single transaction, each one replacing the
    /// stored row with the same id. Nothing is written if any statement fails.
    pub fn upsert_many(&self, rows: Vec<CveRow>) -> Result<Vec<CveRow>, StorageError> {
        use schema::cve::dsl::*;

        if rows.is_empty() {
            return Ok(rows);
        }

        let mut pooled = self.connection()?;
        let conn: &mut SqliteConnection = &mut pooled;

        let start = Instant::now();
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            for chunk in rows.chunks(ROWS_PER_STATEMENT) {
                diesel::replace_into(cve).values(chunk).execute(conn)?;
            }
            Ok(())
        })?;
        log::debug!(
            "stored {} rows in {} ms",
            rows.len(),
            start.elapsed().as_millis()
        );

        Ok(rows)
    }

    /// Every stored row, in storage order.
    pub fn scan_all(&self) -> Result<Vec<CveRow>, StorageError> {
        use schema::cve::dsl::*;

        let mut pooled = self.connection()?;
        let conn: &mut SqliteConnection = &mut pooled;

        Ok(cve.select(CveRow::as_select()).load(conn)?)
    }

    /// The first `limit` rows in storage order.
    pub fn scan_limited(&self, limit: i64) -> Result<Vec<CveRow>, StorageError> {
        use schema::cve::dsl::*;

        let mut pooled = self.connection()?;
        let conn: &mut SqliteConnection = &mut pooled;

        Ok(cve.select(CveRow::as_select()).limit(limit).load(conn)?)
    }

    pub fn count(&self) -> Result<i64, StorageError> {
        use schema::cve::dsl::*;

        let mut pooled = self.connection()?;
        let conn: &mut SqliteConnection = &mut pooled;

        Ok(cve.count().get_result(conn)?)
    }

    /// Delete every row, keeping the table. Returns how many were removed.
    pub fn clear_all(&self) -> Result<usize, StorageError> {
        use schema::cve::dsl::*;

        let mut pooled = self.connection()?;
        let conn: &mut SqliteConnection = &mut pooled;

        Ok(diesel::delete(cve).execute(conn)?)
    }
}
