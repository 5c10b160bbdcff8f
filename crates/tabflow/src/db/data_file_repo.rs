//! Row-level access to the `data_files` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct DataFileRow {
    pub id: String,
    pub filename: String,
    pub storage_handle: Option<String>,
    pub metadata: String,
    pub created_at: String,
}

impl DataFileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            filename: row.get("filename")?,
            storage_handle: row.get("storage_handle")?,
            metadata: row.get("metadata")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub fn insert(db: &Database, file: &DataFileRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO data_files (id, filename, storage_handle, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                file.id,
                file.filename,
                file.storage_handle,
                file.metadata,
                file.created_at,
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<DataFileRow>, DatabaseError> {
    db.with_conn(|conn| find_with(conn, id))
}

fn find_with(conn: &rusqlite::Connection, id: &str) -> Result<Option<DataFileRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM data_files WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], DataFileRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Read-modify-write of the metadata column under the connection lock.
/// `merge` receives the stored JSON text and returns the new text; the
/// updated row is returned, or `None` if the id does not exist.
pub fn update_metadata<F>(
    db: &Database,
    id: &str,
    merge: F,
) -> Result<Option<DataFileRow>, DatabaseError>
where
    F: FnOnce(&str) -> Result<String, DatabaseError>,
{
    db.with_conn(|conn| {
        let Some(mut row) = find_with(conn, id)? else {
            return Ok(None);
        };
        row.metadata = merge(&row.metadata)?;
        conn.execute(
            "UPDATE data_files SET metadata = ?2 WHERE id = ?1",
            params![id, row.metadata],
        )?;
        Ok(Some(row))
    })
}

pub fn list(db: &Database) -> Result<Vec<DataFileRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM data_files ORDER BY created_at ASC, id ASC")?;
        let rows = stmt
            .query_map([], DataFileRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
