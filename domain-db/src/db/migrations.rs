use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(thiserror::Error, Debug)]
#[error("migration failed: {0}")]
pub struct MigrationError(String);

pub fn any_pending_migrations(conn: &mut SqliteConnection) -> Result<bool, MigrationError> {
    conn.has_pending_migration(MIGRATIONS)
        .map_err(|e| MigrationError(e.to_string()))
}

/// Returns how many migrations were applied.
pub fn run_pending_migrations(conn: &mut SqliteConnection) -> Result<usize, MigrationError> {
    conn.run_pending_migrations(MIGRATIONS)
        .map(|applied| applied.len())
        .map_err(|e| MigrationError(e.to_string()))
}
