// 🏁 Meet Entity - one racing event; orders a dog's results in time

use crate::audit::{EditContext, Tracked};
use crate::error::{RegistryError, Result};
use crate::schema::{self, FieldChecks, ValidationResult};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{named_params, params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

pub const ENTITY: &str = "Meet";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meet {
    #[serde(default, deserialize_with = "schema::trimmed")]
    pub meet_number: String,
    #[serde(default, deserialize_with = "schema::none_if_blank_str")]
    pub club_abbreviation: Option<String>,
    pub meet_date: NaiveDate,
    #[serde(default, deserialize_with = "schema::none_if_blank_str")]
    pub race_secretary: Option<String>,
    #[serde(default, deserialize_with = "schema::none_if_blank_str")]
    pub judge: Option<String>,
    #[serde(default, deserialize_with = "schema::none_if_blank_str")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "schema::none_if_blank_i64")]
    pub yards: Option<i64>,
    #[serde(default)]
    pub last_edited_by: Option<String>,
    #[serde(default)]
    pub last_edited_at: Option<DateTime<Utc>>,
}

impl Meet {
    pub fn new(meet_number: &str, meet_date: NaiveDate) -> Self {
        Meet {
            meet_number: meet_number.to_string(),
            club_abbreviation: None,
            meet_date,
            race_secretary: None,
            judge: None,
            location: None,
            yards: None,
            last_edited_by: None,
            last_edited_at: None,
        }
    }

    pub fn validate(&self) -> ValidationResult {
        FieldChecks::new(ENTITY)
            .required("meet_number", &self.meet_number)
            .max_len("meet_number", &self.meet_number, 20)
            .max_len_opt("club_abbreviation", self.club_abbreviation.as_deref(), 20)
            .max_len_opt("race_secretary", self.race_secretary.as_deref(), 50)
            .max_len_opt("judge", self.judge.as_deref(), 50)
            .max_len_opt("location", self.location.as_deref(), 100)
            .count_opt("yards", self.yards)
            .finish()
    }
}

impl Tracked for Meet {
    const TABLE: &'static str = ENTITY;

    fn key_parts(&self) -> Vec<(&'static str, String)> {
        vec![("MeetNumber", self.meet_number.clone())]
    }

    fn stamp(&mut self, ctx: &EditContext) {
        self.last_edited_by = Some(ctx.actor.clone());
        self.last_edited_at = Some(ctx.at);
    }
}

const SELECT_MEET: &str = "SELECT meet_number, club_abbreviation, meet_date, race_secretary,
        judge, location, yards, last_edited_by, last_edited_at
     FROM meets";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Meet> {
    Ok(Meet {
        meet_number: row.get("meet_number")?,
        club_abbreviation: row.get("club_abbreviation")?,
        meet_date: row.get("meet_date")?,
        race_secretary: row.get("race_secretary")?,
        judge: row.get("judge")?,
        location: row.get("location")?,
        yards: row.get("yards")?,
        last_edited_by: row.get("last_edited_by")?,
        last_edited_at: row.get("last_edited_at")?,
    })
}

pub fn find(conn: &Connection, meet_number: &str) -> Result<Option<Meet>> {
    let meet = conn
        .query_row(
            &format!("{} WHERE meet_number = ?1", SELECT_MEET),
            params![meet_number],
            from_row,
        )
        .optional()?;
    Ok(meet)
}

pub fn get(conn: &Connection, meet_number: &str) -> Result<Meet> {
    find(conn, meet_number)?.ok_or_else(|| RegistryError::not_found(ENTITY, meet_number))
}

/// Most recent first.
pub fn list(conn: &Connection) -> Result<Vec<Meet>> {
    let mut stmt = conn.prepare(&format!(
        "{} ORDER BY meet_date DESC, meet_number DESC",
        SELECT_MEET
    ))?;
    let meets = stmt
        .query_map([], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(meets)
}

pub fn insert(conn: &Connection, meet: &Meet) -> Result<()> {
    conn.execute(
        "INSERT INTO meets (
            meet_number, club_abbreviation, meet_date, race_secretary,
            judge, location, yards, last_edited_by, last_edited_at
        ) VALUES (
            :meet_number, :club_abbreviation, :meet_date, :race_secretary,
            :judge, :location, :yards, :last_edited_by, :last_edited_at
        )",
        named_params! {
            ":meet_number": meet.meet_number,
            ":club_abbreviation": meet.club_abbreviation,
            ":meet_date": meet.meet_date,
            ":race_secretary": meet.race_secretary,
            ":judge": meet.judge,
            ":location": meet.location,
            ":yards": meet.yards,
            ":last_edited_by": meet.last_edited_by,
            ":last_edited_at": meet.last_edited_at,
        },
    )?;
    Ok(())
}
