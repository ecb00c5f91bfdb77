// 🏷️ Title Type Entity - catalog of title codes
//
// Rows are usually created on the fly by the title reconciler the first time
// a dog qualifies for a code nobody has catalogued yet.

use crate::audit::{EditContext, Tracked};
use crate::error::{RegistryError, Result};
use crate::rules::Title;
use crate::schema::{self, FieldChecks, ValidationResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

pub const ENTITY: &str = "TitleType";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleType {
    #[serde(default, deserialize_with = "schema::trimmed")]
    pub title: String,
    #[serde(default, deserialize_with = "schema::trimmed")]
    pub title_description: String,
    #[serde(default)]
    pub last_edited_by: Option<String>,
    #[serde(default)]
    pub last_edited_at: Option<DateTime<Utc>>,
}

impl TitleType {
    pub fn new(title: &str, title_description: &str) -> Self {
        TitleType {
            title: title.to_string(),
            title_description: title_description.to_string(),
            last_edited_by: None,
            last_edited_at: None,
        }
    }

    /// Minimal catalog row for a ruleset title.
    pub fn for_title(title: Title) -> Self {
        TitleType::new(&title.code(), &title.description())
    }

    pub fn validate(&self) -> ValidationResult {
        FieldChecks::new(ENTITY)
            .required("title", &self.title)
            .max_len("title", &self.title, 10)
            .required("title_description", &self.title_description)
            .max_len("title_description", &self.title_description, 200)
            .finish()
    }
}

impl Tracked for TitleType {
    const TABLE: &'static str = ENTITY;

    fn key_parts(&self) -> Vec<(&'static str, String)> {
        vec![("Title", self.title.clone())]
    }

    fn stamp(&mut self, ctx: &EditContext) {
        self.last_edited_by = Some(ctx.actor.clone());
        self.last_edited_at = Some(ctx.at);
    }
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<TitleType> {
    Ok(TitleType {
        title: row.get(0)?,
        title_description: row.get(1)?,
        last_edited_by: row.get(2)?,
        last_edited_at: row.get(3)?,
    })
}

pub fn find(conn: &Connection, title: &str) -> Result<Option<TitleType>> {
    let found = conn
        .query_row(
            "SELECT title, title_description, last_edited_by, last_edited_at
             FROM title_types WHERE title = ?1",
            params![title],
            from_row,
        )
        .optional()?;
    Ok(found)
}

pub fn get(conn: &Connection, title: &str) -> Result<TitleType> {
    find(conn, title)?.ok_or_else(|| RegistryError::not_found(ENTITY, title))
}

pub fn list(conn: &Connection) -> Result<Vec<TitleType>> {
    let mut stmt = conn.prepare(
        "SELECT title, title_description, last_edited_by, last_edited_at
         FROM title_types ORDER BY title",
    )?;
    let titles = stmt
        .query_map([], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(titles)
}

pub fn insert(conn: &Connection, title_type: &TitleType) -> Result<()> {
    conn.execute(
        "INSERT INTO title_types (title, title_description, last_edited_by, last_edited_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            title_type.title,
            title_type.title_description,
            title_type.last_edited_by,
            title_type.last_edited_at,
        ],
    )?;
    Ok(())
}

/// Insert unless a row with this code already exists. True when a row was created.
pub fn insert_if_absent(conn: &Connection, title_type: &TitleType) -> Result<bool> {
    let created = conn.execute(
        "INSERT OR IGNORE INTO title_types (title, title_description, last_edited_by, last_edited_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            title_type.title,
            title_type.title_description,
            title_type.last_edited_by,
            title_type.last_edited_at,
        ],
    )?;
    Ok(created == 1)
}

pub fn update(conn: &Connection, title_type: &TitleType) -> Result<()> {
    let changed = conn.execute(
        "UPDATE title_types SET title_description = ?2, last_edited_by = ?3, last_edited_at = ?4
         WHERE title = ?1",
        params![
            title_type.title,
            title_type.title_description,
            title_type.last_edited_by,
            title_type.last_edited_at,
        ],
    )?;

    if changed == 0 {
        return Err(RegistryError::conflict(
            ENTITY,
            title_type.title.as_str(),
            "row vanished before update",
        ));
    }
    Ok(())
}

pub fn delete(conn: &Connection, title: &str) -> Result<()> {
    let changed = conn.execute("DELETE FROM title_types WHERE title = ?1", params![title])?;

    if changed == 0 {
        return Err(RegistryError::conflict(ENTITY, title, "nothing to delete"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    #[test]
    fn test_insert_if_absent_is_idempotent() {
        let conn = open_in_memory().unwrap();
        let arx = TitleType::for_title(Title::Arx);

        assert!(insert_if_absent(&conn, &arx).unwrap());
        assert!(!insert_if_absent(&conn, &arx).unwrap());

        // An existing description is never overwritten
        let renamed = TitleType::new("ARX", "Something else");
        assert!(!insert_if_absent(&conn, &renamed).unwrap());
        assert_eq!(get(&conn, "ARX").unwrap().title_description, "Award of Racing Excellence");
    }

    #[test]
    fn test_plain_insert_rejects_duplicates() {
        let conn = open_in_memory().unwrap();
        insert(&conn, &TitleType::new("HC", "High Combined")).unwrap();

        let err = insert(&conn, &TitleType::new("HC", "again")).unwrap_err();
        match err {
            RegistryError::Storage(e) => assert!(crate::db::is_duplicate_key(&e)),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_validation_limits() {
        let too_long = TitleType::new("PR12345678901", &"d".repeat(201));
        let errors = too_long.validate().unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["title", "title_description"]);

        assert!(TitleType::new("DPC", "").validate().is_err());
        assert!(TitleType::for_title(Title::Pr(7)).validate().is_ok());
    }

    #[test]
    fn test_update_and_delete() {
        let conn = open_in_memory().unwrap();
        let mut trp = TitleType::for_title(Title::Trp);
        insert(&conn, &trp).unwrap();

        trp.title_description = "Racing Proficiency".to_string();
        update(&conn, &trp).unwrap();
        assert_eq!(list(&conn).unwrap(), vec![trp]);

        delete(&conn, "TRP").unwrap();
        assert!(delete(&conn, "TRP").unwrap_err().is_conflict());
    }
}
