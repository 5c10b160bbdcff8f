//! Row-level access to the `jobs` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw job row. JSON columns are kept as text.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub data_file_id: String,
    pub job_type: String,
    pub parameters: String,
    pub status: String,
    pub result: Option<String>,
    pub error_category: Option<String>,
    pub error_message: Option<String>,
    pub correlation_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            data_file_id: row.get("data_file_id")?,
            job_type: row.get("job_type")?,
            parameters: row.get("parameters")?,
            status: row.get("status")?,
            result: row.get("result")?,
            error_category: row.get("error_category")?,
            error_message: row.get("error_message")?,
            correlation_id: row.get("correlation_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Columns written by a status transition.
#[derive(Debug, Clone)]
pub struct TransitionRow {
    pub status: String,
    pub updated_at: String,
    pub result: Option<String>,
    pub error_category: Option<String>,
    pub error_message: Option<String>,
    /// Left unchanged when `None`.
    pub correlation_id: Option<String>,
}

pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, data_file_id, job_type, parameters, status, result,
             error_category, error_message, correlation_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                job.id,
                job.data_file_id,
                job.job_type,
                job.parameters,
                job.status,
                job.result,
                job.error_category,
                job.error_message,
                job.correlation_id,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Writes `transition` only if the row is still in `expected_status`.
/// Returns whether a row changed.
pub fn compare_and_set(
    db: &Database,
    id: &str,
    expected_status: &str,
    transition: &TransitionRow,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = ?3, updated_at = ?4, result = ?5,
             error_category = ?6, error_message = ?7,
             correlation_id = COALESCE(?8, correlation_id)
             WHERE id = ?1 AND status = ?2",
            params![
                id,
                expected_status,
                transition.status,
                transition.updated_at,
                transition.result,
                transition.error_category,
                transition.error_message,
                transition.correlation_id,
            ],
        )?;
        Ok(changed == 1)
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

pub fn list_for_file(db: &Database, data_file_id: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE data_file_id = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![data_file_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn list_by_status(db: &Database, status: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM jobs WHERE status = ?1 ORDER BY created_at ASC, id ASC")?;
        let rows = stmt
            .query_map(params![status], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
