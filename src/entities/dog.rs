// 🐕 Dog Entity - registration record, accumulated counters, derived grade
//
// Counters are owned by the stats recompute (or a direct edit); the grade is
// derived alongside them. `version` increments on every write so a writer
// holding a stale copy gets a conflict instead of overwriting newer data.

use crate::audit::{EditContext, Tracked};
use crate::error::{RegistryError, Result};
use crate::rules::Grade;
use crate::schema::{self, FieldChecks, ValidationResult};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{named_params, params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const ENTITY: &str = "Dog";

// ============================================================================
// DOG STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DogStatus {
    #[default]
    Active,
    Inactive,
}

impl DogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DogStatus::Active => "Active",
            DogStatus::Inactive => "Inactive",
        }
    }
}

impl fmt::Display for DogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DogStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "Active" => Ok(DogStatus::Active),
            "Inactive" => Ok(DogStatus::Inactive),
            other => Err(format!("Status must be 'Active' or 'Inactive', got {:?}", other)),
        }
    }
}

impl ToSql for DogStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for DogStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

// ============================================================================
// DOG ENTITY
// ============================================================================

fn initial_version() -> i64 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dog {
    #[serde(default, deserialize_with = "schema::trimmed")]
    pub cwa_number: String,

    // Alternate registries
    #[serde(default, deserialize_with = "schema::none_if_blank_str")]
    pub akc_number: Option<String>,
    #[serde(default, deserialize_with = "schema::none_if_blank_str")]
    pub ckc_number: Option<String>,
    #[serde(default, deserialize_with = "schema::none_if_blank_str")]
    pub foreign_number: Option<String>,
    #[serde(default, deserialize_with = "schema::none_if_blank_str")]
    pub foreign_type: Option<String>,

    #[serde(default, deserialize_with = "schema::none_if_blank_str")]
    pub call_name: Option<String>,
    #[serde(default, deserialize_with = "schema::trimmed")]
    pub registered_name: String,
    #[serde(default)]
    pub birthdate: Option<NaiveDate>,
    #[serde(default, deserialize_with = "schema::none_if_blank_str")]
    pub pedigree_link: Option<String>,
    #[serde(default, deserialize_with = "schema::none_if_blank_str")]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: DogStatus,

    // Derived
    #[serde(default, deserialize_with = "schema::zero_if_blank_f64")]
    pub average: f64,
    #[serde(default)]
    pub current_grade: Grade,

    // Accumulated counters
    #[serde(default, deserialize_with = "schema::zero_if_blank_f64")]
    pub meet_points: f64,
    #[serde(default, deserialize_with = "schema::zero_if_blank_f64")]
    pub arx_points: f64,
    #[serde(default, deserialize_with = "schema::zero_if_blank_f64")]
    pub narx_points: f64,
    #[serde(default, deserialize_with = "schema::zero_if_blank_i64")]
    pub show_points: i64,
    #[serde(default, deserialize_with = "schema::zero_if_blank_i64")]
    pub dpc_legs: i64,
    #[serde(default, deserialize_with = "schema::zero_if_blank_i64")]
    pub meet_wins: i64,
    #[serde(default, deserialize_with = "schema::zero_if_blank_i64")]
    pub meet_appearances: i64,
    #[serde(default, deserialize_with = "schema::zero_if_blank_i64")]
    pub high_combined_wins: i64,

    #[serde(default)]
    pub last_edited_by: Option<String>,
    #[serde(default)]
    pub last_edited_at: Option<DateTime<Utc>>,
    #[serde(default = "initial_version")]
    pub version: i64,
}

impl Dog {
    /// Active dog with every counter at zero.
    pub fn new(cwa_number: &str, registered_name: &str) -> Self {
        Dog {
            cwa_number: cwa_number.to_string(),
            akc_number: None,
            ckc_number: None,
            foreign_number: None,
            foreign_type: None,
            call_name: None,
            registered_name: registered_name.to_string(),
            birthdate: None,
            pedigree_link: None,
            notes: None,
            status: DogStatus::Active,
            average: 0.0,
            current_grade: Grade::Fte,
            meet_points: 0.0,
            arx_points: 0.0,
            narx_points: 0.0,
            show_points: 0,
            dpc_legs: 0,
            meet_wins: 0,
            meet_appearances: 0,
            high_combined_wins: 0,
            last_edited_by: None,
            last_edited_at: None,
            version: 1,
        }
    }

    /// Registered with AKC or CKC (counts toward DPC without legs).
    pub fn has_alternate_registry(&self) -> bool {
        schema::is_present(self.akc_number.as_deref()) || schema::is_present(self.ckc_number.as_deref())
    }

    /// Full check for a new registration: identity fields and every counter.
    pub fn validate(&self) -> ValidationResult {
        let mut checks = FieldChecks::new(ENTITY);
        self.check_registration(&mut checks);
        for (field, value) in self.point_counters() {
            checks.points(field, value);
        }
        for (field, value) in self.count_counters() {
            checks.count(field, value);
        }
        checks.finish()
    }

    /// Check for an edit of `current`. Counters are range-checked only where
    /// the editor changed them; recomputed totals may exceed the input limits.
    pub fn validate_edit(&self, current: &Dog) -> ValidationResult {
        let mut checks = FieldChecks::new(ENTITY);
        self.check_registration(&mut checks);
        for ((field, value), (_, stored)) in self.point_counters().into_iter().zip(current.point_counters()) {
            if value != stored {
                checks.points(field, value);
            }
        }
        for ((field, value), (_, stored)) in self.count_counters().into_iter().zip(current.count_counters()) {
            if value != stored {
                checks.count(field, value);
            }
        }
        checks.finish()
    }

    fn check_registration(&self, checks: &mut FieldChecks) {
        checks
            .required("cwa_number", &self.cwa_number)
            .max_len("cwa_number", &self.cwa_number, 10)
            .max_len_opt("akc_number", self.akc_number.as_deref(), 20)
            .max_len_opt("ckc_number", self.ckc_number.as_deref(), 20)
            .max_len_opt("foreign_number", self.foreign_number.as_deref(), 20)
            .max_len_opt("foreign_type", self.foreign_type.as_deref(), 10)
            .max_len_opt("call_name", self.call_name.as_deref(), 50)
            .required("registered_name", &self.registered_name)
            .max_len("registered_name", &self.registered_name, 100)
            .max_len_opt("pedigree_link", self.pedigree_link.as_deref(), 255);
    }

    fn point_counters(&self) -> [(&'static str, f64); 4] {
        [
            ("average", self.average),
            ("meet_points", self.meet_points),
            ("arx_points", self.arx_points),
            ("narx_points", self.narx_points),
        ]
    }

    fn count_counters(&self) -> [(&'static str, i64); 5] {
        [
            ("show_points", self.show_points),
            ("dpc_legs", self.dpc_legs),
            ("meet_wins", self.meet_wins),
            ("meet_appearances", self.meet_appearances),
            ("high_combined_wins", self.high_combined_wins),
        ]
    }
}

impl Tracked for Dog {
    const TABLE: &'static str = ENTITY;

    fn key_parts(&self) -> Vec<(&'static str, String)> {
        vec![("CWANumber", self.cwa_number.clone())]
    }

    fn stamp(&mut self, ctx: &EditContext) {
        self.last_edited_by = Some(ctx.actor.clone());
        self.last_edited_at = Some(ctx.at);
    }
}

// ============================================================================
// STORAGE
// ============================================================================

const SELECT_DOG: &str = "SELECT cwa_number, akc_number, ckc_number, foreign_number, foreign_type,
        call_name, registered_name, birthdate, pedigree_link, notes, status,
        average, current_grade, meet_points, arx_points, narx_points, show_points,
        dpc_legs, meet_wins, meet_appearances, high_combined_wins,
        last_edited_by, last_edited_at, version
     FROM dogs";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Dog> {
    Ok(Dog {
        cwa_number: row.get("cwa_number")?,
        akc_number: row.get("akc_number")?,
        ckc_number: row.get("ckc_number")?,
        foreign_number: row.get("foreign_number")?,
        foreign_type: row.get("foreign_type")?,
        call_name: row.get("call_name")?,
        registered_name: row.get("registered_name")?,
        birthdate: row.get("birthdate")?,
        pedigree_link: row.get("pedigree_link")?,
        notes: row.get("notes")?,
        status: row.get("status")?,
        average: row.get("average")?,
        current_grade: row.get("current_grade")?,
        meet_points: row.get("meet_points")?,
        arx_points: row.get("arx_points")?,
        narx_points: row.get("narx_points")?,
        show_points: row.get("show_points")?,
        dpc_legs: row.get("dpc_legs")?,
        meet_wins: row.get("meet_wins")?,
        meet_appearances: row.get("meet_appearances")?,
        high_combined_wins: row.get("high_combined_wins")?,
        last_edited_by: row.get("last_edited_by")?,
        last_edited_at: row.get("last_edited_at")?,
        version: row.get("version")?,
    })
}

pub fn find(conn: &Connection, cwa_number: &str) -> Result<Option<Dog>> {
    let dog = conn
        .query_row(
            &format!("{} WHERE cwa_number = ?1", SELECT_DOG),
            params![cwa_number],
            from_row,
        )
        .optional()?;
    Ok(dog)
}

/// Like `find`, but a missing dog is an error.
pub fn get(conn: &Connection, cwa_number: &str) -> Result<Dog> {
    find(conn, cwa_number)?.ok_or_else(|| RegistryError::not_found(ENTITY, cwa_number))
}

pub fn exists(conn: &Connection, cwa_number: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM dogs WHERE cwa_number = ?1",
            params![cwa_number],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn list(conn: &Connection) -> Result<Vec<Dog>> {
    let mut stmt = conn.prepare(&format!("{} ORDER BY cwa_number", SELECT_DOG))?;
    let dogs = stmt
        .query_map([], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(dogs)
}

pub fn list_numbers(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT cwa_number FROM dogs ORDER BY cwa_number")?;
    let numbers = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(numbers)
}

pub fn insert(conn: &Connection, dog: &Dog) -> Result<()> {
    conn.execute(
        "INSERT INTO dogs (
            cwa_number, akc_number, ckc_number, foreign_number, foreign_type,
            call_name, registered_name, birthdate, pedigree_link, notes, status,
            average, current_grade, meet_points, arx_points, narx_points, show_points,
            dpc_legs, meet_wins, meet_appearances, high_combined_wins,
            last_edited_by, last_edited_at, version
        ) VALUES (
            :cwa_number, :akc_number, :ckc_number, :foreign_number, :foreign_type,
            :call_name, :registered_name, :birthdate, :pedigree_link, :notes, :status,
            :average, :current_grade, :meet_points, :arx_points, :narx_points, :show_points,
            :dpc_legs, :meet_wins, :meet_appearances, :high_combined_wins,
            :last_edited_by, :last_edited_at, :version
        )",
        named_params! {
            ":cwa_number": dog.cwa_number,
            ":akc_number": dog.akc_number,
            ":ckc_number": dog.ckc_number,
            ":foreign_number": dog.foreign_number,
            ":foreign_type": dog.foreign_type,
            ":call_name": dog.call_name,
            ":registered_name": dog.registered_name,
            ":birthdate": dog.birthdate,
            ":pedigree_link": dog.pedigree_link,
            ":notes": dog.notes,
            ":status": dog.status,
            ":average": dog.average,
            ":current_grade": dog.current_grade,
            ":meet_points": dog.meet_points,
            ":arx_points": dog.arx_points,
            ":narx_points": dog.narx_points,
            ":show_points": dog.show_points,
            ":dpc_legs": dog.dpc_legs,
            ":meet_wins": dog.meet_wins,
            ":meet_appearances": dog.meet_appearances,
            ":high_combined_wins": dog.high_combined_wins,
            ":last_edited_by": dog.last_edited_by,
            ":last_edited_at": dog.last_edited_at,
            ":version": dog.version,
        },
    )?;
    Ok(())
}

/// Overwrite every non-key column, guarded by `dog.version`.
///
/// Returns the stored row (version bumped). A stale version is a conflict.
pub fn update(conn: &Connection, dog: &Dog) -> Result<Dog> {
    let changed = conn.execute(
        "UPDATE dogs SET
            akc_number = :akc_number, ckc_number = :ckc_number,
            foreign_number = :foreign_number, foreign_type = :foreign_type,
            call_name = :call_name, registered_name = :registered_name,
            birthdate = :birthdate, pedigree_link = :pedigree_link, notes = :notes,
            status = :status, average = :average, current_grade = :current_grade,
            meet_points = :meet_points, arx_points = :arx_points, narx_points = :narx_points,
            show_points = :show_points, dpc_legs = :dpc_legs, meet_wins = :meet_wins,
            meet_appearances = :meet_appearances, high_combined_wins = :high_combined_wins,
            last_edited_by = :last_edited_by, last_edited_at = :last_edited_at,
            version = version + 1
         WHERE cwa_number = :cwa_number AND version = :version",
        named_params! {
            ":cwa_number": dog.cwa_number,
            ":akc_number": dog.akc_number,
            ":ckc_number": dog.ckc_number,
            ":foreign_number": dog.foreign_number,
            ":foreign_type": dog.foreign_type,
            ":call_name": dog.call_name,
            ":registered_name": dog.registered_name,
            ":birthdate": dog.birthdate,
            ":pedigree_link": dog.pedigree_link,
            ":notes": dog.notes,
            ":status": dog.status,
            ":average": dog.average,
            ":current_grade": dog.current_grade,
            ":meet_points": dog.meet_points,
            ":arx_points": dog.arx_points,
            ":narx_points": dog.narx_points,
            ":show_points": dog.show_points,
            ":dpc_legs": dog.dpc_legs,
            ":meet_wins": dog.meet_wins,
            ":meet_appearances": dog.meet_appearances,
            ":high_combined_wins": dog.high_combined_wins,
            ":last_edited_by": dog.last_edited_by,
            ":last_edited_at": dog.last_edited_at,
            ":version": dog.version,
        },
    )?;

    if changed == 0 {
        return Err(RegistryError::conflict(
            ENTITY,
            dog.cwa_number.as_str(),
            format!("no row at version {}", dog.version),
        ));
    }

    let mut stored = dog.clone();
    stored.version += 1;
    Ok(stored)
}

/// Delete guarded by `version`; removing nothing is a conflict.
pub fn delete(conn: &Connection, cwa_number: &str, version: i64) -> Result<()> {
    let changed = conn.execute(
        "DELETE FROM dogs WHERE cwa_number = ?1 AND version = ?2",
        params![cwa_number, version],
    )?;

    if changed == 0 {
        return Err(RegistryError::conflict(
            ENTITY,
            cwa_number,
            format!("no row at version {} to delete", version),
        ));
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn create_test_dog() -> Dog {
        let mut dog = Dog::new("C123", "Sunnyside Whirlwind");
        dog.call_name = Some("Wendy".to_string());
        dog.birthdate = NaiveDate::from_ymd_opt(2021, 4, 30);
        dog.meet_points = 62.5;
        dog.meet_appearances = 4;
        dog
    }

    #[test]
    fn test_insert_and_find() {
        let conn = open_in_memory().unwrap();
        let dog = create_test_dog();
        insert(&conn, &dog).unwrap();

        let found = find(&conn, "C123").unwrap().unwrap();
        assert_eq!(found, dog);
        assert!(exists(&conn, "C123").unwrap());
        assert!(find(&conn, "C999").unwrap().is_none());
        assert!(get(&conn, "C999").unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_bumps_version() {
        let conn = open_in_memory().unwrap();
        let mut dog = create_test_dog();
        insert(&conn, &dog).unwrap();

        dog.notes = Some("moved to lure coursing".to_string());
        let stored = update(&conn, &dog).unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(get(&conn, "C123").unwrap(), stored);
    }

    #[test]
    fn test_stale_update_is_conflict() {
        let conn = open_in_memory().unwrap();
        let dog = create_test_dog();
        insert(&conn, &dog).unwrap();

        let mut first = dog.clone();
        first.meet_points = 70.0;
        update(&conn, &first).unwrap();

        // Second writer still holds version 1
        let mut second = dog.clone();
        second.meet_points = 80.0;
        let err = update(&conn, &second).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(get(&conn, "C123").unwrap().meet_points, 70.0);
    }

    #[test]
    fn test_delete_requires_current_version() {
        let conn = open_in_memory().unwrap();
        insert(&conn, &create_test_dog()).unwrap();

        assert!(delete(&conn, "C123", 7).unwrap_err().is_conflict());
        delete(&conn, "C123", 1).unwrap();
        assert!(!exists(&conn, "C123").unwrap());
    }

    #[test]
    fn test_alternate_registry() {
        let mut dog = create_test_dog();
        assert!(!dog.has_alternate_registry());

        dog.akc_number = Some("  ".to_string());
        assert!(!dog.has_alternate_registry());

        dog.ckc_number = Some("CKC-1".to_string());
        assert!(dog.has_alternate_registry());
    }

    #[test]
    fn test_validation() {
        let mut dog = create_test_dog();
        assert!(dog.validate().is_ok());

        dog.cwa_number = "C1234567890".to_string();
        dog.registered_name = String::new();
        dog.meet_points = -1.0;
        dog.dpc_legs = 40000;

        let errors = dog.validate().unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["cwa_number", "registered_name", "meet_points", "dpc_legs"]
        );
    }

    #[test]
    fn test_edit_checks_only_changed_counters() {
        let mut stored = create_test_dog();
        stored.meet_points = 1200.0;
        stored.meet_appearances = 40000;

        let mut edit = stored.clone();
        edit.notes = Some("retired from straight racing".to_string());
        assert!(edit.validate_edit(&stored).is_ok());
        assert!(edit.validate().is_err());

        edit.arx_points = 1500.0;
        edit.registered_name = String::new();
        let errors = edit.validate_edit(&stored).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["registered_name", "arx_points"]);
    }

    #[test]
    fn test_deserialize_blank_counters_as_zero() {
        let dog: Dog = serde_json::from_value(serde_json::json!({
            "cwaNumber": " C77 ",
            "registeredName": "Blank Counters",
            "meetPoints": "",
            "dpcLegs": null,
            "arxPoints": "16.5",
            "status": "Inactive",
            "akcNumber": ""
        }))
        .unwrap();

        assert_eq!(dog.cwa_number, "C77");
        assert_eq!(dog.meet_points, 0.0);
        assert_eq!(dog.dpc_legs, 0);
        assert_eq!(dog.arx_points, 16.5);
        assert_eq!(dog.status, DogStatus::Inactive);
        assert_eq!(dog.akc_number, None);
        assert_eq!(dog.version, 1);
        assert_eq!(dog.current_grade, Grade::Fte);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("Active".parse::<DogStatus>().unwrap(), DogStatus::Active);
        assert!("Retired".parse::<DogStatus>().is_err());
    }

    #[test]
    fn test_record_key() {
        assert_eq!(create_test_dog().record_key(), "CWANumber=C123");
    }
}
