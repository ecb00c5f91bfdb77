// 🏁 Race Result Entity - one dog's run in one race of a meet
//
// Key (meet, dog, program, race). The per-meet rollup sums these into the
// dog's MeetResult row for that meet.

use crate::audit::{record_key, EditContext, Tracked};
use crate::error::{RegistryError, Result};
use crate::schema::{self, FieldChecks, ValidationResult};
use chrono::{DateTime, Utc};
use rusqlite::{named_params, params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

pub const ENTITY: &str = "RaceResult";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceResult {
    #[serde(default, deserialize_with = "schema::trimmed")]
    pub meet_number: String,
    #[serde(default, deserialize_with = "schema::trimmed")]
    pub cwa_number: String,
    /// Single-letter program code
    #[serde(default, deserialize_with = "schema::trimmed")]
    pub program: String,
    #[serde(default, deserialize_with = "schema::trimmed")]
    pub race_number: String,

    #[serde(default, deserialize_with = "schema::none_if_blank_str")]
    pub entry_type: Option<String>,
    #[serde(rename = "box", default, deserialize_with = "schema::none_if_blank_str")]
    pub box_number: Option<String>,
    /// Finishing place; 0 or absent means unplaced
    #[serde(default, deserialize_with = "schema::none_if_blank_i64")]
    pub placement: Option<i64>,
    #[serde(default, deserialize_with = "schema::none_if_blank_f64")]
    pub meet_points: Option<f64>,
    #[serde(default, deserialize_with = "schema::none_if_blank_str")]
    pub incident: Option<String>,

    #[serde(default)]
    pub last_edited_by: Option<String>,
    #[serde(default)]
    pub last_edited_at: Option<DateTime<Utc>>,
}

impl RaceResult {
    pub fn new(meet_number: &str, cwa_number: &str, program: &str, race_number: &str) -> Self {
        RaceResult {
            meet_number: meet_number.to_string(),
            cwa_number: cwa_number.to_string(),
            program: program.to_string(),
            race_number: race_number.to_string(),
            entry_type: None,
            box_number: None,
            placement: None,
            meet_points: None,
            incident: None,
            last_edited_by: None,
            last_edited_at: None,
        }
    }

    pub fn validate(&self) -> ValidationResult {
        let mut checks = FieldChecks::new(ENTITY);
        checks
            .required("meet_number", &self.meet_number)
            .max_len("meet_number", &self.meet_number, 20)
            .required("cwa_number", &self.cwa_number)
            .max_len("cwa_number", &self.cwa_number, 10)
            .required("program", &self.program)
            .max_len("program", &self.program, 1)
            .required("race_number", &self.race_number)
            .max_len("race_number", &self.race_number, 10)
            .max_len_opt("entry_type", self.entry_type.as_deref(), 10)
            .max_len_opt("box", self.box_number.as_deref(), 10)
            .count_opt("placement", self.placement)
            .points_opt("meet_points", self.meet_points)
            .max_len_opt("incident", self.incident.as_deref(), 255);
        if self.meet_points.is_none() {
            checks.fail("meet_points", "Required field is empty");
        }
        checks.finish()
    }

    /// Equal apart from the last-edited columns.
    pub fn same_content(&self, other: &RaceResult) -> bool {
        let mut a = self.clone();
        a.last_edited_by = other.last_edited_by.clone();
        a.last_edited_at = other.last_edited_at;
        a == *other
    }
}

impl Tracked for RaceResult {
    const TABLE: &'static str = ENTITY;

    fn key_parts(&self) -> Vec<(&'static str, String)> {
        vec![
            ("MeetNumber", self.meet_number.clone()),
            ("CWANumber", self.cwa_number.clone()),
            ("Program", self.program.clone()),
            ("RaceNumber", self.race_number.clone()),
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

const COLUMNS: &str = "meet_number, cwa_number, program, race_number, entry_type, box_number,
        placement, meet_points, incident, last_edited_by, last_edited_at";

pub fn key(meet_number: &str, cwa_number: &str, program: &str, race_number: &str) -> String {
    record_key(&[
        ("MeetNumber", meet_number.to_string()),
        ("CWANumber", cwa_number.to_string()),
        ("Program", program.to_string()),
        ("RaceNumber", race_number.to_string()),
    ])
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<RaceResult> {
    Ok(RaceResult {
        meet_number: row.get("meet_number")?,
        cwa_number: row.get("cwa_number")?,
        program: row.get("program")?,
        race_number: row.get("race_number")?,
        entry_type: row.get("entry_type")?,
        box_number: row.get("box_number")?,
        placement: row.get("placement")?,
        meet_points: row.get("meet_points")?,
        incident: row.get("incident")?,
        last_edited_by: row.get("last_edited_by")?,
        last_edited_at: row.get("last_edited_at")?,
    })
}

pub fn find(
    conn: &Connection,
    meet_number: &str,
    cwa_number: &str,
    program: &str,
    race_number: &str,
) -> Result<Option<RaceResult>> {
    let result = conn
        .query_row(
            &format!(
                "SELECT {} FROM race_results
                 WHERE meet_number = ?1 AND cwa_number = ?2 AND program = ?3 AND race_number = ?4",
                COLUMNS
            ),
            params![meet_number, cwa_number, program, race_number],
            from_row,
        )
        .optional()?;
    Ok(result)
}

pub fn get(
    conn: &Connection,
    meet_number: &str,
    cwa_number: &str,
    program: &str,
    race_number: &str,
) -> Result<RaceResult> {
    find(conn, meet_number, cwa_number, program, race_number)?.ok_or_else(|| {
        RegistryError::not_found(ENTITY, key(meet_number, cwa_number, program, race_number))
    })
}

/// Every race run at one meet, by program, race, then dog.
pub fn list_for_meet(conn: &Connection, meet_number: &str) -> Result<Vec<RaceResult>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM race_results
         WHERE meet_number = ?1
         ORDER BY program, race_number, cwa_number",
        COLUMNS
    ))?;
    let results = stmt
        .query_map(params![meet_number], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(results)
}

/// Every race a dog has run, across meets.
pub fn list_for_dog(conn: &Connection, cwa_number: &str) -> Result<Vec<RaceResult>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM race_results
         WHERE cwa_number = ?1
         ORDER BY meet_number, program, race_number",
        COLUMNS
    ))?;
    let results = stmt
        .query_map(params![cwa_number], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(results)
}

pub fn list_for_dog_at_meet(conn: &Connection, meet_number: &str, cwa_number: &str) -> Result<Vec<RaceResult>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM race_results
         WHERE meet_number = ?1 AND cwa_number = ?2
         ORDER BY program, race_number",
        COLUMNS
    ))?;
    let results = stmt
        .query_map(params![meet_number, cwa_number], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(results)
}

/// One dog's race totals at a meet.
#[derive(Debug, Clone, PartialEq)]
pub struct MeetTotal {
    pub cwa_number: String,
    pub total_points: f64,
    /// Mean of placements above zero; `None` when the dog never placed
    pub average_placement: Option<f64>,
}

/// Per-dog totals at a meet in finishing order: total points descending,
/// then average placement ascending (never placed sorts last), then dog number.
pub fn meet_totals(conn: &Connection, meet_number: &str) -> Result<Vec<MeetTotal>> {
    let mut stmt = conn.prepare(
        "SELECT cwa_number,
                COALESCE(SUM(meet_points), 0) AS total_points,
                AVG(CASE WHEN placement > 0 THEN placement END) AS average_placement
         FROM race_results
         WHERE meet_number = ?1
         GROUP BY cwa_number
         ORDER BY total_points DESC,
                  COALESCE(average_placement, 9999) ASC,
                  cwa_number ASC",
    )?;
    let totals = stmt
        .query_map(params![meet_number], |row| {
            Ok(MeetTotal {
                cwa_number: row.get(0)?,
                total_points: row.get(1)?,
                average_placement: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(totals)
}

pub fn insert(conn: &Connection, result: &RaceResult) -> Result<()> {
    conn.execute(
        "INSERT INTO race_results (
            meet_number, cwa_number, program, race_number, entry_type, box_number,
            placement, meet_points, incident, last_edited_by, last_edited_at
        ) VALUES (
            :meet_number, :cwa_number, :program, :race_number, :entry_type, :box_number,
            :placement, :meet_points, :incident, :last_edited_by, :last_edited_at
        )",
        named_params! {
            ":meet_number": result.meet_number,
            ":cwa_number": result.cwa_number,
            ":program": result.program,
            ":race_number": result.race_number,
            ":entry_type": result.entry_type,
            ":box_number": result.box_number,
            ":placement": result.placement,
            ":meet_points": result.meet_points,
            ":incident": result.incident,
            ":last_edited_by": result.last_edited_by,
            ":last_edited_at": result.last_edited_at,
        },
    )?;
    Ok(())
}

pub fn update(conn: &Connection, result: &RaceResult) -> Result<()> {
    let changed = conn.execute(
        "UPDATE race_results SET
            entry_type = :entry_type, box_number = :box_number, placement = :placement,
            meet_points = :meet_points, incident = :incident,
            last_edited_by = :last_edited_by, last_edited_at = :last_edited_at
         WHERE meet_number = :meet_number AND cwa_number = :cwa_number
           AND program = :program AND race_number = :race_number",
        named_params! {
            ":meet_number": result.meet_number,
            ":cwa_number": result.cwa_number,
            ":program": result.program,
            ":race_number": result.race_number,
            ":entry_type": result.entry_type,
            ":box_number": result.box_number,
            ":placement": result.placement,
            ":meet_points": result.meet_points,
            ":incident": result.incident,
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

pub fn delete(
    conn: &Connection,
    meet_number: &str,
    cwa_number: &str,
    program: &str,
    race_number: &str,
) -> Result<()> {
    let changed = conn.execute(
        "DELETE FROM race_results
         WHERE meet_number = ?1 AND cwa_number = ?2 AND program = ?3 AND race_number = ?4",
        params![meet_number, cwa_number, program, race_number],
    )?;

    if changed == 0 {
        return Err(RegistryError::conflict(
            ENTITY,
            key(meet_number, cwa_number, program, race_number),
            "nothing to delete",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::entities::dog::{self, Dog};
    use crate::entities::meet::{self, Meet};
    use chrono::NaiveDate;

    fn seed(conn: &Connection) {
        for cwa in ["C1", "C2", "C3"] {
            dog::insert(conn, &Dog::new(cwa, "Race Card")).unwrap();
        }
        meet::insert(conn, &Meet::new("M-A", NaiveDate::from_ymd_opt(2024, 3, 2).unwrap())).unwrap();
    }

    fn run(cwa: &str, race: &str, placement: Option<i64>, points: f64) -> RaceResult {
        let mut r = RaceResult::new("M-A", cwa, "A", race);
        r.placement = placement;
        r.meet_points = Some(points);
        r
    }

    #[test]
    fn test_meet_totals_order_and_tiebreaks() {
        let conn = open_in_memory().unwrap();
        seed(&conn);
        // C1 and C2 tie on points; C2 placed better on average
        insert(&conn, &run("C1", "1", Some(2), 5.0)).unwrap();
        insert(&conn, &run("C1", "2", Some(2), 5.0)).unwrap();
        insert(&conn, &run("C2", "1", Some(1), 8.0)).unwrap();
        insert(&conn, &run("C2", "2", Some(0), 2.0)).unwrap();
        insert(&conn, &run("C3", "1", None, 12.5)).unwrap();

        let totals = meet_totals(&conn, "M-A").unwrap();
        let order: Vec<&str> = totals.iter().map(|t| t.cwa_number.as_str()).collect();
        assert_eq!(order, vec!["C3", "C2", "C1"]);
        assert_eq!(totals[0].average_placement, None);
        assert_eq!(totals[1].average_placement, Some(1.0));
        assert_eq!(totals[2].total_points, 10.0);
    }

    #[test]
    fn test_unplaced_dog_loses_points_tie() {
        let conn = open_in_memory().unwrap();
        seed(&conn);
        insert(&conn, &run("C1", "1", None, 6.0)).unwrap();
        insert(&conn, &run("C2", "1", Some(4), 6.0)).unwrap();
        insert(&conn, &run("C3", "1", Some(4), 6.0)).unwrap();

        let order: Vec<String> = meet_totals(&conn, "M-A")
            .unwrap()
            .into_iter()
            .map(|t| t.cwa_number)
            .collect();
        assert_eq!(order, vec!["C2", "C3", "C1"]);
    }

    #[test]
    fn test_update_and_delete() {
        let conn = open_in_memory().unwrap();
        seed(&conn);
        let mut r = run("C1", "1", Some(3), 4.0);
        insert(&conn, &r).unwrap();

        r.incident = Some("bumped at the first turn".to_string());
        update(&conn, &r).unwrap();
        assert_eq!(get(&conn, "M-A", "C1", "A", "1").unwrap(), r);
        assert_eq!(list_for_dog_at_meet(&conn, "M-A", "C1").unwrap().len(), 1);

        delete(&conn, "M-A", "C1", "A", "1").unwrap();
        assert!(delete(&conn, "M-A", "C1", "A", "1").unwrap_err().is_conflict());
        assert!(list_for_meet(&conn, "M-A").unwrap().is_empty());
    }

    #[test]
    fn test_validation_and_lenient_decoding() {
        let r: RaceResult = serde_json::from_value(serde_json::json!({
            "meetNumber": "M-A",
            "cwaNumber": "C1",
            "program": "AB",
            "raceNumber": "",
            "box": "3",
            "placement": "",
            "meetPoints": ""
        }))
        .unwrap();
        assert_eq!(r.box_number.as_deref(), Some("3"));
        assert_eq!(r.placement, None);

        let fields: Vec<String> = r.validate().unwrap_err().into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["program", "race_number", "meet_points"]);

        assert_eq!(
            run("C1", "7", None, 1.0).record_key(),
            "MeetNumber=M-A|CWANumber=C1|Program=A|RaceNumber=7"
        );
    }
}
