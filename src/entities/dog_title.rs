// 🎖️ Dog Title Entity - a title currently recorded as held by a dog
//
// Derived from the dog's counters by the title reconciler; manual awards
// exist but bypass reconciliation.

use crate::audit::{record_key, EditContext, Tracked};
use crate::db;
use crate::error::{RegistryError, Result};
use crate::schema::{self, FieldChecks, ValidationResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const ENTITY: &str = "DogTitle";

/// Title number written on reconciled rows until a real numbering scheme exists
pub const PLACEHOLDER_TITLE_NUMBER: &str = "0";

/// Name prefix/suffix written on reconciled rows until they are derived
pub const PLACEHOLDER_NAME_PART: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DogTitle {
    #[serde(default, deserialize_with = "schema::trimmed")]
    pub cwa_number: String,
    #[serde(default, deserialize_with = "schema::trimmed")]
    pub title: String,
    #[serde(default, deserialize_with = "schema::none_if_blank_str")]
    pub title_number: Option<String>,
    #[serde(default)]
    pub title_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "schema::none_if_blank_str")]
    pub name_prefix: Option<String>,
    #[serde(default, deserialize_with = "schema::none_if_blank_str")]
    pub name_suffix: Option<String>,
    #[serde(default)]
    pub last_edited_by: Option<String>,
    #[serde(default)]
    pub last_edited_at: Option<DateTime<Utc>>,
}

impl DogTitle {
    pub fn new(cwa_number: &str, title: &str) -> Self {
        DogTitle {
            cwa_number: cwa_number.to_string(),
            title: title.to_string(),
            title_number: None,
            title_date: None,
            name_prefix: None,
            name_suffix: None,
            last_edited_by: None,
            last_edited_at: None,
        }
    }

    /// Row the reconciler writes: placeholder number and name parts, dated `at`.
    pub fn placeholder(cwa_number: &str, title: &str, at: DateTime<Utc>) -> Self {
        DogTitle {
            title_number: Some(PLACEHOLDER_TITLE_NUMBER.to_string()),
            title_date: Some(at),
            name_prefix: Some(PLACEHOLDER_NAME_PART.to_string()),
            name_suffix: Some(PLACEHOLDER_NAME_PART.to_string()),
            ..DogTitle::new(cwa_number, title)
        }
    }

    pub fn validate(&self) -> ValidationResult {
        FieldChecks::new(ENTITY)
            .required("cwa_number", &self.cwa_number)
            .max_len("cwa_number", &self.cwa_number, 10)
            .required("title", &self.title)
            .max_len("title", &self.title, 10)
            .max_len_opt("title_number", self.title_number.as_deref(), 10)
            .max_len_opt("name_prefix", self.name_prefix.as_deref(), 20)
            .max_len_opt("name_suffix", self.name_suffix.as_deref(), 20)
            .finish()
    }
}

impl Tracked for DogTitle {
    const TABLE: &'static str = ENTITY;

    fn key_parts(&self) -> Vec<(&'static str, String)> {
        vec![
            ("CWANumber", self.cwa_number.clone()),
            ("Title", self.title.clone()),
        ]
    }

    fn stamp(&mut self, ctx: &EditContext) {
        self.last_edited_by = Some(ctx.actor.clone());
        self.last_edited_at = Some(ctx.at);
    }
}

pub fn key(cwa_number: &str, title: &str) -> String {
    record_key(&[
        ("CWANumber", cwa_number.to_string()),
        ("Title", title.to_string()),
    ])
}

// ============================================================================
// STORAGE
// ============================================================================

const SELECT_TITLE: &str = "SELECT cwa_number, title, title_number, title_date,
        name_prefix, name_suffix, last_edited_by, last_edited_at
     FROM dog_titles";

fn from_row(row: &Row<'_>) -> rusqlite::Result<DogTitle> {
    Ok(DogTitle {
        cwa_number: row.get(0)?,
        title: row.get(1)?,
        title_number: row.get(2)?,
        title_date: row.get(3)?,
        name_prefix: row.get(4)?,
        name_suffix: row.get(5)?,
        last_edited_by: row.get(6)?,
        last_edited_at: row.get(7)?,
    })
}

pub fn find(conn: &Connection, cwa_number: &str, title: &str) -> Result<Option<DogTitle>> {
    let found = conn
        .query_row(
            &format!("{} WHERE cwa_number = ?1 AND title = ?2", SELECT_TITLE),
            params![cwa_number, title],
            from_row,
        )
        .optional()?;
    Ok(found)
}

pub fn get(conn: &Connection, cwa_number: &str, title: &str) -> Result<DogTitle> {
    find(conn, cwa_number, title)?
        .ok_or_else(|| RegistryError::not_found(ENTITY, key(cwa_number, title)))
}

/// Titles held by one dog, by code.
pub fn list_for_dog(conn: &Connection, cwa_number: &str) -> Result<Vec<DogTitle>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE cwa_number = ?1 ORDER BY title",
        SELECT_TITLE
    ))?;
    let titles = stmt
        .query_map(params![cwa_number], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(titles)
}

/// Every dog holding one code.
pub fn list_for_title(conn: &Connection, title: &str) -> Result<Vec<DogTitle>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE title = ?1 ORDER BY cwa_number",
        SELECT_TITLE
    ))?;
    let titles = stmt
        .query_map(params![title], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(titles)
}

pub fn codes_for_dog(conn: &Connection, cwa_number: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT title FROM dog_titles WHERE cwa_number = ?1")?;
    let codes = stmt
        .query_map(params![cwa_number], |row| row.get(0))?
        .collect::<rusqlite::Result<BTreeSet<String>>>()?;
    Ok(codes)
}

/// A row that already exists for this (dog, code) is a conflict.
pub fn insert(conn: &Connection, dog_title: &DogTitle) -> Result<()> {
    let result = conn.execute(
        "INSERT INTO dog_titles (
            cwa_number, title, title_number, title_date,
            name_prefix, name_suffix, last_edited_by, last_edited_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            dog_title.cwa_number,
            dog_title.title,
            dog_title.title_number,
            dog_title.title_date,
            dog_title.name_prefix,
            dog_title.name_suffix,
            dog_title.last_edited_by,
            dog_title.last_edited_at,
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(e) if db::is_duplicate_key(&e) => Err(RegistryError::conflict(
            ENTITY,
            dog_title.record_key(),
            "already awarded by another writer",
        )),
        Err(e) => Err(e.into()),
    }
}

pub fn update(conn: &Connection, dog_title: &DogTitle) -> Result<()> {
    let changed = conn.execute(
        "UPDATE dog_titles SET
            title_number = ?3, title_date = ?4, name_prefix = ?5, name_suffix = ?6,
            last_edited_by = ?7, last_edited_at = ?8
         WHERE cwa_number = ?1 AND title = ?2",
        params![
            dog_title.cwa_number,
            dog_title.title,
            dog_title.title_number,
            dog_title.title_date,
            dog_title.name_prefix,
            dog_title.name_suffix,
            dog_title.last_edited_by,
            dog_title.last_edited_at,
        ],
    )?;

    if changed == 0 {
        return Err(RegistryError::conflict(
            ENTITY,
            dog_title.record_key(),
            "row vanished before update",
        ));
    }
    Ok(())
}

/// Removing a row that is already gone is a conflict.
pub fn delete(conn: &Connection, cwa_number: &str, title: &str) -> Result<()> {
    let changed = conn.execute(
        "DELETE FROM dog_titles WHERE cwa_number = ?1 AND title = ?2",
        params![cwa_number, title],
    )?;

    if changed == 0 {
        return Err(RegistryError::conflict(
            ENTITY,
            key(cwa_number, title),
            "already removed by another writer",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::entities::dog::{self, Dog};
    use crate::entities::title_type::{self, TitleType};
    use chrono::TimeZone;

    fn seed(conn: &Connection) {
        dog::insert(conn, &Dog::new("C5", "Title Holder")).unwrap();
        for code in ["ARX", "TRP", "PR"] {
            title_type::insert(conn, &TitleType::new(code, "test")).unwrap();
        }
    }

    #[test]
    fn test_placeholder_row() {
        let at = Utc.with_ymd_and_hms(2025, 2, 3, 4, 5, 6).unwrap();
        let row = DogTitle::placeholder("C5", "ARX", at);

        assert_eq!(row.title_number.as_deref(), Some("0"));
        assert_eq!(row.name_prefix.as_deref(), Some("N/A"));
        assert_eq!(row.name_suffix.as_deref(), Some("N/A"));
        assert_eq!(row.title_date, Some(at));
        assert_eq!(row.record_key(), "CWANumber=C5|Title=ARX");
    }

    #[test]
    fn test_duplicate_insert_is_conflict() {
        let conn = open_in_memory().unwrap();
        seed(&conn);
        let row = DogTitle::new("C5", "TRP");
        insert(&conn, &row).unwrap();

        assert!(insert(&conn, &row).unwrap_err().is_conflict());
    }

    #[test]
    fn test_unknown_code_is_rejected_by_storage() {
        let conn = open_in_memory().unwrap();
        seed(&conn);
        let err = insert(&conn, &DogTitle::new("C5", "ZZZ")).unwrap_err();
        assert!(matches!(err, RegistryError::Storage(_)));
    }

    #[test]
    fn test_codes_and_listing() {
        let conn = open_in_memory().unwrap();
        seed(&conn);
        insert(&conn, &DogTitle::new("C5", "TRP")).unwrap();
        insert(&conn, &DogTitle::new("C5", "ARX")).unwrap();

        let codes: Vec<String> = codes_for_dog(&conn, "C5").unwrap().into_iter().collect();
        assert_eq!(codes, vec!["ARX", "TRP"]);
        assert_eq!(list_for_dog(&conn, "C5").unwrap()[0].title, "ARX");
        assert_eq!(list_for_title(&conn, "TRP").unwrap().len(), 1);
    }

    #[test]
    fn test_delete_twice_is_conflict() {
        let conn = open_in_memory().unwrap();
        seed(&conn);
        insert(&conn, &DogTitle::new("C5", "PR")).unwrap();

        delete(&conn, "C5", "PR").unwrap();
        assert!(delete(&conn, "C5", "PR").unwrap_err().is_conflict());
    }
}
