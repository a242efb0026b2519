//! Versioned schema migrations for the SQLite sink.
//!
//! Each applied step is recorded in `schema_migrations` with a SHA-256 of its
//! SQL. A recorded step whose SQL has since changed is refused rather than
//! silently skipped.

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

use super::schema::{Migration, MIGRATIONS};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration {version} ({name}) failed: {message}")]
    Failed {
        version: i64,
        name: &'static str,
        message: String,
    },

    /// An applied migration no longer matches the SQL shipped with this build.
    #[error("Migration {version} ({name}) was modified after it was applied")]
    ChecksumMismatch { version: i64, name: &'static str },
}

/// A migration recorded in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    pub checksum: String,
}

fn checksum(sql: &str) -> String {
    hex::encode(Sha256::digest(sql.trim().as_bytes()))
}

/// Applies pending migrations in version order and returns how many ran.
pub async fn migrate(pool: &SqlitePool) -> Result<usize, MigrationError> {
    migrate_with(pool, MIGRATIONS).await
}

async fn migrate_with(pool: &SqlitePool, migrations: &[Migration]) -> Result<usize, MigrationError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            checksum TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    let mut ran = 0;
    for migration in migrations {
        let expected = checksum(migration.sql);
        let recorded: Option<(String,)> =
            sqlx::query_as("SELECT checksum FROM schema_migrations WHERE version = ?")
                .bind(migration.version)
                .fetch_optional(pool)
                .await?;

        match recorded {
            Some((found,)) if found == expected => continue,
            Some(_) => {
                return Err(MigrationError::ChecksumMismatch {
                    version: migration.version,
                    name: migration.name,
                })
            }
            None => {}
        }

        let mut tx = pool.begin().await?;
        sqlx::query(migration.sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| MigrationError::Failed {
                version: migration.version,
                name: migration.name,
                message: e.to_string(),
            })?;
        sqlx::query("INSERT INTO schema_migrations (version, name, checksum) VALUES (?, ?, ?)")
            .bind(migration.version)
            .bind(migration.name)
            .bind(&expected)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(version = migration.version, name = migration.name, "Applied migration");
        ran += 1;
    }
    Ok(ran)
}

/// Migrations recorded in the database, oldest first.
pub async fn applied(pool: &SqlitePool) -> Result<Vec<AppliedMigration>, MigrationError> {
    let rows: Vec<(i64, String, String)> =
        sqlx::query_as("SELECT version, name, checksum FROM schema_migrations ORDER BY version")
            .fetch_all(pool)
            .await?;
    Ok(rows
        .into_iter()
        .map(|(version, name, checksum)| AppliedMigration {
            version,
            name,
            checksum,
        })
        .collect())
}
