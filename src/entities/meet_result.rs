// 📋 Meet Result Entity - one dog's performance at one meet
//
// Composite key (meet number, dog number). These rows are the history the
// stats recompute folds into a dog's counters.

use crate::audit::{record_key, EditContext, Tracked};
use crate::error::{RegistryError, Result};
use crate::schema::{self, FieldChecks, ValidationResult};
use chrono::{DateTime, Utc};
use rusqlite::{named_params, params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

pub const ENTITY: &str = "MeetResult";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetResult {
    #[serde(default, deserialize_with = "schema::trimmed")]
    pub meet_number: String,
    #[serde(default, deserialize_with = "schema::trimmed")]
    pub cwa_number: String,

    #[serde(default, deserialize_with = "schema::none_if_blank_f64")]
    pub average: Option<f64>,
    #[serde(default, deserialize_with = "schema::none_if_blank_str")]
    pub grade: Option<String>,
    #[serde(default, deserialize_with = "schema::none_if_blank_i64")]
    pub meet_placement: Option<i64>,
    #[serde(default, deserialize_with = "schema::none_if_blank_f64")]
    pub meet_points: Option<f64>,
    /// Points toward ARX earned at this meet
    #[serde(default, deserialize_with = "schema::none_if_blank_f64")]
    pub arx_earned: Option<f64>,
    /// Points toward NARX earned at this meet
    #[serde(default, deserialize_with = "schema::none_if_blank_f64")]
    pub narx_earned: Option<f64>,

    #[serde(default, deserialize_with = "schema::flag")]
    pub shown: bool,
    #[serde(default, deserialize_with = "schema::none_if_blank_i64")]
    pub show_placement: Option<i64>,
    #[serde(default, deserialize_with = "schema::none_if_blank_i64")]
    pub show_points: Option<i64>,
    #[serde(default, deserialize_with = "schema::flag")]
    pub dpc_leg: bool,
    #[serde(default, deserialize_with = "schema::none_if_blank_f64")]
    pub hc_score: Option<f64>,
    #[serde(default, deserialize_with = "schema::flag")]
    pub hc_leg_earned: bool,

    #[serde(default)]
    pub last_edited_by: Option<String>,
    #[serde(default)]
    pub last_edited_at: Option<DateTime<Utc>>,
}

impl MeetResult {
    /// Result row with every measurement absent.
    pub fn new(meet_number: &str, cwa_number: &str) -> Self {
        MeetResult {
            meet_number: meet_number.to_string(),
            cwa_number: cwa_number.to_string(),
            average: None,
            grade: None,
            meet_placement: None,
            meet_points: None,
            arx_earned: None,
            narx_earned: None,
            shown: false,
            show_placement: None,
            show_points: None,
            dpc_leg: false,
            hc_score: None,
            hc_leg_earned: false,
            last_edited_by: None,
            last_edited_at: None,
        }
    }

    pub fn validate(&self) -> ValidationResult {
        FieldChecks::new(ENTITY)
            .required("meet_number", &self.meet_number)
            .max_len("meet_number", &self.meet_number, 20)
            .required("cwa_number", &self.cwa_number)
            .max_len("cwa_number", &self.cwa_number, 10)
            .points_opt("average", self.average)
            .max_len_opt("grade", self.grade.as_deref(), 3)
            .count_opt("meet_placement", self.meet_placement)
            .points_opt("meet_points", self.meet_points)
            .points_opt("arx_earned", self.arx_earned)
            .points_opt("narx_earned", self.narx_earned)
            .count_opt("show_placement", self.show_placement)
            .count_opt("show_points", self.show_points)
            .points_opt("hc_score", self.hc_score)
            .finish()
    }

    /// Equal apart from the last-edited columns.
    pub fn same_content(&self, other: &MeetResult) -> bool {
        let mut a = self.clone();
        a.last_edited_by = other.last_edited_by.clone();
        a.last_edited_at = other.last_edited_at;
        a == *other
    }
}

impl Tracked for MeetResult {
    const TABLE: &'static str = ENTITY;

    fn key_parts(&self) -> Vec<(&'static str, String)> {
        vec![
            ("MeetNumber", self.meet_number.clone()),
            ("CWANumber", self.cwa_number.clone()),
        ]
    }

    fn stamp(&mut self, ctx: &EditContext) {
        self.last_edited_by = Some(ctx.actor.clone());
        self.last_edited_at = Some(ctx.at);
    }
}

// ============================================================================
// STORAGE
// ============================================================================

const COLUMNS: &str = "r.meet_number AS meet_number, r.cwa_number AS cwa_number,
        r.average AS average, r.grade AS grade, r.meet_placement AS meet_placement,
        r.meet_points AS meet_points, r.arx_earned AS arx_earned, r.narx_earned AS narx_earned,
        r.shown AS shown, r.show_placement AS show_placement, r.show_points AS show_points,
        r.dpc_leg AS dpc_leg, r.hc_score AS hc_score, r.hc_leg_earned AS hc_leg_earned,
        r.last_edited_by AS last_edited_by, r.last_edited_at AS last_edited_at";

/// Change-log key for one result row.
pub fn key(meet_number: &str, cwa_number: &str) -> String {
    record_key(&[
        ("MeetNumber", meet_number.to_string()),
        ("CWANumber", cwa_number.to_string()),
    ])
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<MeetResult> {
    Ok(MeetResult {
        meet_number: row.get("meet_number")?,
        cwa_number: row.get("cwa_number")?,
        average: row.get("average")?,
        grade: row.get("grade")?,
        meet_placement: row.get("meet_placement")?,
        meet_points: row.get("meet_points")?,
        arx_earned: row.get("arx_earned")?,
        narx_earned: row.get("narx_earned")?,
        shown: row.get("shown")?,
        show_placement: row.get("show_placement")?,
        show_points: row.get("show_points")?,
        dpc_leg: row.get("dpc_leg")?,
        hc_score: row.get("hc_score")?,
        hc_leg_earned: row.get("hc_leg_earned")?,
        last_edited_by: row.get("last_edited_by")?,
        last_edited_at: row.get("last_edited_at")?,
    })
}

pub fn find(conn: &Connection, meet_number: &str, cwa_number: &str) -> Result<Option<MeetResult>> {
    let result = conn
        .query_row(
            &format!(
                "SELECT {} FROM meet_results r WHERE r.meet_number = ?1 AND r.cwa_number = ?2",
                COLUMNS
            ),
            params![meet_number, cwa_number],
            from_row,
        )
        .optional()?;
    Ok(result)
}

pub fn get(conn: &Connection, meet_number: &str, cwa_number: &str) -> Result<MeetResult> {
    find(conn, meet_number, cwa_number)?
        .ok_or_else(|| RegistryError::not_found(ENTITY, key(meet_number, cwa_number)))
}

/// Every result for one dog, most recent meet first.
pub fn list_for_dog(conn: &Connection, cwa_number: &str) -> Result<Vec<MeetResult>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM meet_results r
         JOIN meets m ON m.meet_number = r.meet_number
         WHERE r.cwa_number = ?1
         ORDER BY m.meet_date DESC, r.meet_number DESC",
        COLUMNS
    ))?;
    let results = stmt
        .query_map(params![cwa_number], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(results)
}

/// Meet points of the `limit` most recent results (null where not recorded).
pub fn recent_points_for_dog(
    conn: &Connection,
    cwa_number: &str,
    limit: usize,
) -> Result<Vec<Option<f64>>> {
    let mut stmt = conn.prepare(
        "SELECT r.meet_points FROM meet_results r
         JOIN meets m ON m.meet_number = r.meet_number
         WHERE r.cwa_number = ?1
         ORDER BY m.meet_date DESC, r.meet_number DESC
         LIMIT ?2",
    )?;
    let points = stmt
        .query_map(params![cwa_number, limit as i64], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<Option<f64>>>>()?;
    Ok(points)
}

pub fn insert(conn: &Connection, result: &MeetResult) -> Result<()> {
    conn.execute(
        "INSERT INTO meet_results (
            meet_number, cwa_number, average, grade, meet_placement, meet_points,
            arx_earned, narx_earned, shown, show_placement, show_points, dpc_leg,
            hc_score, hc_leg_earned, last_edited_by, last_edited_at
        ) VALUES (
            :meet_number, :cwa_number, :average, :grade, :meet_placement, :meet_points,
            :arx_earned, :narx_earned, :shown, :show_placement, :show_points, :dpc_leg,
            :hc_score, :hc_leg_earned, :last_edited_by, :last_edited_at
        )",
        named_params! {
            ":meet_number": result.meet_number,
            ":cwa_number": result.cwa_number,
            ":average": result.average,
            ":grade": result.grade,
            ":meet_placement": result.meet_placement,
            ":meet_points": result.meet_points,
            ":arx_earned": result.arx_earned,
            ":narx_earned": result.narx_earned,
            ":shown": result.shown,
            ":show_placement": result.show_placement,
            ":show_points": result.show_points,
            ":dpc_leg": result.dpc_leg,
            ":hc_score": result.hc_score,
            ":hc_leg_earned": result.hc_leg_earned,
            ":last_edited_by": result.last_edited_by,
            ":last_edited_at": result.last_edited_at,
        },
    )?;
    Ok(())
}

pub fn update(conn: &Connection, result: &MeetResult) -> Result<()> {
    let changed = conn.execute(
        "UPDATE meet_results SET
            average = :average, grade = :grade, meet_placement = :meet_placement,
            meet_points = :meet_points, arx_earned = :arx_earned, narx_earned = :narx_earned,
            shown = :shown, show_placement = :show_placement, show_points = :show_points,
            dpc_leg = :dpc_leg, hc_score = :hc_score, hc_leg_earned = :hc_leg_earned,
            last_edited_by = :last_edited_by, last_edited_at = :last_edited_at
         WHERE meet_number = :meet_number AND cwa_number = :cwa_number",
        named_params! {
            ":meet_number": result.meet_number,
            ":cwa_number": result.cwa_number,
            ":average": result.average,
            ":grade": result.grade,
            ":meet_placement": result.meet_placement,
            ":meet_points": result.meet_points,
            ":arx_earned": result.arx_earned,
            ":narx_earned": result.narx_earned,
            ":shown": result.shown,
            ":show_placement": result.show_placement,
            ":show_points": result.show_points,
            ":dpc_leg": result.dpc_leg,
            ":hc_score": result.hc_score,
            ":hc_leg_earned": result.hc_leg_earned,
            ":last_edited_by": result.last_edited_by,
            ":last_edited_at": result.last_edited_at,
        },
    )?;

    if changed == 0 {
        return Err(RegistryError::conflict(
            ENTITY,
            result.record_key(),
            "row vanished before update",
        ));
    }
    Ok(())
}

pub fn delete(conn: &Connection, meet_number: &str, cwa_number: &str) -> Result<()> {
    let changed = conn.execute(
        "DELETE FROM meet_results WHERE meet_number = ?1 AND cwa_number = ?2",
        params![meet_number, cwa_number],
    )?;

    if changed == 0 {
        return Err(RegistryError::conflict(
            ENTITY,
            key(meet_number, cwa_number),
            "nothing to delete",
        ));
    }
    Ok(())
}
