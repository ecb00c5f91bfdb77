// 📜 Change Log - append-only audit ledger
//
// Every mutation of a tracked row writes exactly one entry here, in the same
// transaction as the mutation. A failed audit write fails the mutation.
//
// Each entry carries a SHA-256 over its canonical content so a row rewritten
// behind the application's back shows up in `verify()`.

use crate::error::{RegistryError, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Separator between `Name=value` parts of a composite record key
pub const KEY_SEPARATOR: &str = "|";

// ============================================================================
// EDIT CONTEXT
// ============================================================================

/// Who is changing things, when, and through which code path.
///
/// Passed explicitly into every mutating call; nothing reads an ambient actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditContext {
    pub actor: String,
    pub at: DateTime<Utc>,
    pub source: String,
}

impl EditContext {
    pub fn new(actor: impl Into<String>, at: DateTime<Utc>, source: impl Into<String>) -> Self {
        EditContext {
            actor: actor.into(),
            at,
            source: source.into(),
        }
    }

    /// Stamped with the current time. Only the binaries should call this.
    pub fn now(actor: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(actor, Utc::now(), source)
    }

    /// Same actor and timestamp, different code path.
    pub fn with_source(&self, source: &str) -> Self {
        EditContext {
            actor: self.actor.clone(),
            at: self.at,
            source: source.to_string(),
        }
    }
}

// ============================================================================
// OPERATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(Operation::Insert),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            other => Err(format!("unknown change-log operation: {:?}", other)),
        }
    }
}

impl ToSql for Operation {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Operation {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

// ============================================================================
// TRACKED ROWS
// ============================================================================

/// A persisted row whose mutations are recorded in the change log.
pub trait Tracked: Serialize {
    /// Entity name recorded in `change_log.changed_table`
    const TABLE: &'static str;

    /// Primary key parts in fixed order, e.g. `[("CWANumber", "C123"), ("Title", "ARX")]`
    fn key_parts(&self) -> Vec<(&'static str, String)>;

    /// Set the last-edited columns from the edit context.
    fn stamp(&mut self, ctx: &EditContext);

    fn record_key(&self) -> String {
        record_key(&self.key_parts())
    }
}

/// `Name=value` parts joined with `|`, in the order given.
pub fn record_key(parts: &[(&str, String)]) -> String {
    parts
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(KEY_SEPARATOR)
}

// ============================================================================
// CHANGE LOG ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLog {
    pub id: i64,
    pub changed_table: String,
    pub record_pk: String,
    pub operation: Operation,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
    pub source: String,
    pub before_data: Option<Value>,
    pub after_data: Option<Value>,
    pub entry_hash: String,
}

/// Hash over the stored text of an entry, in column order.
#[allow(clippy::too_many_arguments)]
pub fn compute_entry_hash(
    changed_table: &str,
    record_pk: &str,
    operation: Operation,
    changed_by: &str,
    changed_at: &DateTime<Utc>,
    source: &str,
    before_data: Option<&str>,
    after_data: Option<&str>,
) -> String {
    let at = changed_at.to_rfc3339();
    let mut hasher = Sha256::new();
    for part in [
        changed_table,
        record_pk,
        operation.as_str(),
        changed_by,
        at.as_str(),
        source,
        before_data.unwrap_or("null"),
        after_data.unwrap_or("null"),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    format!("{:x}", hasher.finalize())
}

fn snapshot<T: Serialize>(row: &T) -> Result<String> {
    let value = serde_json::to_value(row)?;
    Ok(serde_json::to_string(&value)?)
}

/// Append one entry. Returns the new log id.
pub fn append(
    conn: &Connection,
    table: &str,
    record_pk: &str,
    operation: Operation,
    ctx: &EditContext,
    before: Option<String>,
    after: Option<String>,
) -> Result<i64> {
    let entry_hash = compute_entry_hash(
        table,
        record_pk,
        operation,
        &ctx.actor,
        &ctx.at,
        &ctx.source,
        before.as_deref(),
        after.as_deref(),
    );

    conn.execute(
        "INSERT INTO change_log (
            changed_table, record_pk, operation, changed_by, changed_at,
            source, before_data, after_data, entry_hash
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            table,
            record_pk,
            operation,
            ctx.actor,
            ctx.at,
            ctx.source,
            before,
            after,
            entry_hash,
        ],
    )?;

    let id = conn.last_insert_rowid();
    tracing::trace!(id, table, record_pk, op = %operation, "change logged");
    Ok(id)
}

pub fn log_insert<T: Tracked>(conn: &Connection, ctx: &EditContext, after: &T) -> Result<i64> {
    append(
        conn,
        T::TABLE,
        &after.record_key(),
        Operation::Insert,
        ctx,
        None,
        Some(snapshot(after)?),
    )
}

pub fn log_update<T: Tracked>(
    conn: &Connection,
    ctx: &EditContext,
    before: &T,
    after: &T,
) -> Result<i64> {
    append(
        conn,
        T::TABLE,
        &after.record_key(),
        Operation::Update,
        ctx,
        Some(snapshot(before)?),
        Some(snapshot(after)?),
    )
}

pub fn log_delete<T: Tracked>(conn: &Connection, ctx: &EditContext, before: &T) -> Result<i64> {
    append(
        conn,
        T::TABLE,
        &before.record_key(),
        Operation::Delete,
        ctx,
        Some(snapshot(before)?),
        None,
    )
}

// ============================================================================
// QUERIES
// ============================================================================

const SELECT_COLUMNS: &str = "SELECT id, changed_table, record_pk, operation, changed_by,
        changed_at, source, before_data, after_data, entry_hash
     FROM change_log";

fn parse_json(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<Value>> {
    match raw {
        None => Ok(None),
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
    }
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<ChangeLog> {
    Ok(ChangeLog {
        id: row.get(0)?,
        changed_table: row.get(1)?,
        record_pk: row.get(2)?,
        operation: row.get(3)?,
        changed_by: row.get(4)?,
        changed_at: row.get(5)?,
        source: row.get(6)?,
        before_data: parse_json(7, row.get(7)?)?,
        after_data: parse_json(8, row.get(8)?)?,
        entry_hash: row.get(9)?,
    })
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<ChangeLog>> {
    let entry = conn
        .query_row(
            &format!("{} WHERE id = ?1", SELECT_COLUMNS),
            params![id],
            from_row,
        )
        .optional()?;
    Ok(entry)
}

/// Newest first.
pub fn list_all(conn: &Connection) -> Result<Vec<ChangeLog>> {
    let mut stmt = conn.prepare(&format!(
        "{} ORDER BY changed_at DESC, id DESC",
        SELECT_COLUMNS
    ))?;
    let entries = stmt
        .query_map([], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

/// History of one record, oldest first.
pub fn list_for_record(conn: &Connection, table: &str, record_pk: &str) -> Result<Vec<ChangeLog>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE changed_table = ?1 AND record_pk = ?2 ORDER BY id",
        SELECT_COLUMNS
    ))?;
    let entries = stmt
        .query_map(params![table, record_pk], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

/// Everything one editor has changed, oldest first.
pub fn list_for_actor(conn: &Connection, actor: &str) -> Result<Vec<ChangeLog>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE changed_by = ?1 ORDER BY id",
        SELECT_COLUMNS
    ))?;
    let entries = stmt
        .query_map(params![actor], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

pub fn count(conn: &Connection) -> Result<i64> {
    crate::db::count_rows(conn, "change_log")
}

/// Administrative correction by `actor`. Not itself logged.
pub fn delete_by_id(conn: &Connection, id: i64, actor: &str) -> Result<ChangeLog> {
    let entry = find_by_id(conn, id)?
        .ok_or_else(|| RegistryError::not_found("ChangeLog", id.to_string()))?;

    conn.execute("DELETE FROM change_log WHERE id = ?1", params![id])?;
    tracing::warn!(
        id,
        actor,
        table = %entry.changed_table,
        record_pk = %entry.record_pk,
        "change log entry deleted by administrative correction"
    );
    Ok(entry)
}

/// Ids of entries whose stored content no longer matches their hash.
pub fn verify(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT id, changed_table, record_pk, operation, changed_by, changed_at,
                source, before_data, after_data, entry_hash
         FROM change_log ORDER BY id",
    )?;

    let mut tampered = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let table: String = row.get(1)?;
        let record_pk: String = row.get(2)?;
        let operation: Operation = row.get(3)?;
        let changed_by: String = row.get(4)?;
        let changed_at: DateTime<Utc> = row.get(5)?;
        let source: String = row.get(6)?;
        let before: Option<String> = row.get(7)?;
        let after: Option<String> = row.get(8)?;
        let stored: String = row.get(9)?;

        let expected = compute_entry_hash(
            &table,
            &record_pk,
            operation,
            &changed_by,
            &changed_at,
            &source,
            before.as_deref(),
            after.as_deref(),
        );
        if expected != stored {
            tampered.push(id);
        }
    }

    Ok(tampered)
}

// ============================================================================
// TESTS
// ============================================================================
