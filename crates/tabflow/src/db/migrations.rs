//! Ordered schema migrations.
//!
//! Applied versions are tracked in `_migrations`; each migration runs at most
//! once.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_data_files_table",
        sql: "CREATE TABLE IF NOT EXISTS data_files (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                storage_handle TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );",
    },
    Migration {
        version: 2,
        description: "create_jobs_table",
        sql: "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                data_file_id TEXT NOT NULL REFERENCES data_files(id),
                job_type TEXT NOT NULL,
                parameters TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL,
                result TEXT,
                error_category TEXT,
                error_message TEXT,
                correlation_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_data_file ON jobs(data_file_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);",
    },
];

/// Applies all pending migrations.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}
