use rusqlite::Connection;
use tracing::warn;

use crate::{accessor::query::quote_ident, error::ForensicError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ColumnInfo {
    pub name: String,
    pub col_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TableInfo {
    pub name: String,
    pub sql: Option<String>,
    pub rootpage: i64,
    pub columns: Vec<ColumnInfo>,
    pub row_count: Option<u64>,
    /// Why columns or the row count could not be read.
    pub error: Option<String>,
}

/// An index, trigger or view.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SchemaObject {
    pub name: String,
    pub tbl_name: String,
    pub sql: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SchemaInfo {
    pub tables: Vec<TableInfo>,
    pub indexes: Vec<SchemaObject>,
    pub triggers: Vec<SchemaObject>,
    pub views: Vec<SchemaObject>,
    pub has_wal: bool,
    pub has_shm: bool,
}

/// Enumerates the schema. Failures for one table are recorded on that table.
pub(crate) fn enumerate(conn: &Connection) -> Result<SchemaInfo> {
    let mut info = SchemaInfo::default();

    let mut stmt = conn.prepare(
        "SELECT name, sql, rootpage FROM sqlite_master WHERE type = 'table' ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<i64>>(2)?.unwrap_or(0),
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (name, sql, rootpage) in tables {
        let mut table = TableInfo {
            name,
            sql,
            rootpage,
            columns: Vec::new(),
            row_count: None,
            error: None,
        };
        let outcome = query_columns(conn, &table.name).and_then(|columns| {
            table.columns = columns;
            query_row_count(conn, &table.name).map(|n| table.row_count = Some(n))
        });
        if let Err(e) = outcome {
            let failure = ForensicError::SchemaEnumerationPartialFailure {
                table: table.name.clone(),
                reason: e.to_string(),
            };
            warn!(table = %table.name, error = %e, "schema enumeration incomplete");
            table.error = Some(failure.to_string());
        }
        info.tables.push(table);
    }

    info.indexes = query_objects(conn, "index")?;
    info.triggers = query_objects(conn, "trigger")?;
    info.views = query_objects(conn, "view")?;
    Ok(info)
}

fn query_objects(conn: &Connection, obj_type: &str) -> Result<Vec<SchemaObject>> {
    let mut stmt = conn.prepare(
        "SELECT name, tbl_name, sql FROM sqlite_master WHERE type = ?1 ORDER BY name",
    )?;
    let objects = stmt
        .query_map([obj_type], |row| {
            Ok(SchemaObject {
                name: row.get(0)?,
                tbl_name: row.get(1)?,
                sql: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(objects)
}

fn query_columns(conn: &Connection, table_name: &str) -> Result<Vec<ColumnInfo>> {
    // table_info returns: cid, name, type, notnull, dflt_value, pk
    let sql = format!("PRAGMA table_info({})", quote_ident(table_name));
    let mut stmt = conn.prepare(&sql)?;
    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get::<_, String>(1)?,
                col_type: row.get::<_, String>(2)?,
                not_null: row.get::<_, bool>(3)?,
                default_value: row.get::<_, Option<String>>(4)?,
                primary_key: row.get::<_, i32>(5)? != 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

fn query_row_count(conn: &Connection, table_name: &str) -> Result<u64> {
    let sql = format!("SELECT count(*) FROM {}", quote_ident(table_name));
    let count = conn.query_row(&sql, [], |row| row.get::<_, i64>(0))?;
    Ok(count.max(0) as u64)
}
