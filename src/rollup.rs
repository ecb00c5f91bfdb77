// 🧮 Meet Rollup - race results folded into per-meet results
//
// For one meet:
//   1. total each dog's race points and rank them
//      (points desc, average placement asc with never-placed last, dog number asc)
//   2. write meet points, meet placement and the ARX/NARX earned marks into the
//      dog's MeetResult, creating the row when the dog has none yet
//   3. a dog whose last race at the meet was removed keeps its MeetResult with
//      those fields reset to zero
// Only rows whose content moves are written and audited. Average, grade, show
// and HC fields are never touched here.

use crate::audit::{self, EditContext, Tracked};
use crate::entities::meet;
use crate::entities::meet_result::{self, MeetResult};
use crate::entities::race_result::{self, MeetTotal};
use crate::error::Result;
use crate::stats::round2;
use rusqlite::Connection;
use serde::Serialize;

pub const ROLLUP_SOURCE: &str = "results/rollup";

/// Meet points at which a meet counts toward ARX and NARX
pub const EARNED_THRESHOLD: f64 = 15.0;

pub fn earned_mark(meet_points: f64) -> f64 {
    if meet_points >= EARNED_THRESHOLD {
        1.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetRollup {
    pub meet_number: String,
    /// Dogs in finishing order
    pub placements: Vec<String>,
    /// Dogs whose MeetResult was created
    pub inserted: Vec<String>,
    /// Dogs whose MeetResult changed
    pub updated: Vec<String>,
}

impl MeetRollup {
    /// Dogs whose meet history moved, so their counters need a refresh.
    pub fn changed_dogs(&self) -> impl Iterator<Item = &str> {
        self.inserted.iter().chain(self.updated.iter()).map(String::as_str)
    }

    pub fn is_noop(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty()
    }
}

/// The rolled-up fields for a dog at `placement` (0 when it has no races left).
fn apply_total(result: &mut MeetResult, total: Option<&MeetTotal>, placement: i64) {
    let points = total.map_or(0.0, |t| round2(t.total_points));
    result.meet_points = Some(points);
    result.meet_placement = Some(placement);
    result.arx_earned = Some(earned_mark(points));
    result.narx_earned = Some(earned_mark(points));
}

/// Re-rank a meet from its race results and sync the MeetResult rows.
///
/// `cleared` names a dog whose race rows may all have just been removed;
/// its MeetResult, if any, is reset rather than left with stale totals.
pub fn rollup_meet(
    conn: &Connection,
    meet_number: &str,
    cleared: Option<&str>,
    ctx: &EditContext,
) -> Result<MeetRollup> {
    meet::get(conn, meet_number)?;
    let ctx = ctx.with_source(ROLLUP_SOURCE);
    let totals = race_result::meet_totals(conn, meet_number)?;

    let mut rollup = MeetRollup {
        meet_number: meet_number.to_string(),
        ..MeetRollup::default()
    };

    for (index, total) in totals.iter().enumerate() {
        let placement = index as i64 + 1;
        rollup.placements.push(total.cwa_number.clone());

        match meet_result::find(conn, meet_number, &total.cwa_number)? {
            None => {
                let mut created = MeetResult::new(meet_number, &total.cwa_number);
                apply_total(&mut created, Some(total), placement);
                created.stamp(&ctx);
                meet_result::insert(conn, &created)?;
                audit::log_insert(conn, &ctx, &created)?;
                rollup.inserted.push(total.cwa_number.clone());
            }
            Some(stored) => {
                if sync_existing(conn, &ctx, stored, Some(total), placement)? {
                    rollup.updated.push(total.cwa_number.clone());
                }
            }
        }
    }

    if let Some(cwa_number) = cleared {
        let still_racing = totals.iter().any(|t| t.cwa_number == cwa_number);
        if !still_racing {
            if let Some(stored) = meet_result::find(conn, meet_number, cwa_number)? {
                if sync_existing(conn, &ctx, stored, None, 0)? {
                    rollup.updated.push(cwa_number.to_string());
                }
            }
        }
    }

    tracing::info!(
        meet_number,
        dogs = rollup.placements.len(),
        inserted = rollup.inserted.len(),
        updated = rollup.updated.len(),
        "meet rolled up"
    );
    Ok(rollup)
}

/// Returns whether the stored row changed.
fn sync_existing(
    conn: &Connection,
    ctx: &EditContext,
    stored: MeetResult,
    total: Option<&MeetTotal>,
    placement: i64,
) -> Result<bool> {
    let mut rolled = stored.clone();
    apply_total(&mut rolled, total, placement);
    if rolled.same_content(&stored) {
        return Ok(false);
    }

    rolled.stamp(ctx);
    meet_result::update(conn, &rolled)?;
    audit::log_update(conn, ctx, &stored, &rolled)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::Operation;
    use crate::db::open_in_memory;
    use crate::entities::dog::{self, Dog};
    use crate::entities::meet::Meet;
    use crate::entities::race_result::RaceResult;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn ctx() -> EditContext {
        EditContext::new(
            "secretary",
            Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap(),
            "tests/rollup",
        )
    }

    fn seed(conn: &Connection) {
        for cwa in ["C1", "C2", "C3"] {
            dog::insert(conn, &Dog::new(cwa, "Rollup Runner")).unwrap();
        }
        meet::insert(conn, &Meet::new("M1", NaiveDate::from_ymd_opt(2025, 6, 1).unwrap())).unwrap();
    }

    fn race(conn: &Connection, cwa: &str, race: &str, placement: i64, points: f64) {
        let mut r = RaceResult::new("M1", cwa, "A", race);
        r.placement = Some(placement);
        r.meet_points = Some(points);
        race_result::insert(conn, &r).unwrap();
    }

    #[test]
    fn test_earned_mark_threshold() {
        assert_eq!(earned_mark(14.99), 0.0);
        assert_eq!(earned_mark(15.0), 1.0);
        assert_eq!(earned_mark(40.0), 1.0);
    }

    #[test]
    fn test_rollup_creates_ranked_meet_results() {
        let conn = open_in_memory().unwrap();
        seed(&conn);
        race(&conn, "C1", "1", 1, 10.0);
        race(&conn, "C1", "2", 1, 8.0);
        race(&conn, "C2", "1", 2, 6.0);
        race(&conn, "C2", "2", 3, 4.0);
        race(&conn, "C3", "1", 3, 5.0);
        race(&conn, "C3", "2", 2, 5.0);

        let rollup = rollup_meet(&conn, "M1", None, &ctx()).unwrap();
        // C2 and C3 tie on 10 points; C2 averages 2.5, C3 averages 2.5, dog number decides
        assert_eq!(rollup.placements, vec!["C1", "C2", "C3"]);
        assert_eq!(rollup.inserted.len(), 3);

        let winner = meet_result::get(&conn, "M1", "C1").unwrap();
        assert_eq!(winner.meet_points, Some(18.0));
        assert_eq!(winner.meet_placement, Some(1));
        assert_eq!(winner.arx_earned, Some(1.0));
        assert_eq!(winner.narx_earned, Some(1.0));
        assert_eq!(winner.last_edited_by.as_deref(), Some("secretary"));

        let third = meet_result::get(&conn, "M1", "C3").unwrap();
        assert_eq!(third.meet_placement, Some(3));
        assert_eq!(third.arx_earned, Some(0.0));

        let entry = &audit::list_for_record(&conn, "MeetResult", "MeetNumber=M1|CWANumber=C1").unwrap()[0];
        assert_eq!(entry.operation, Operation::Insert);
        assert_eq!(entry.source, ROLLUP_SOURCE);
    }

    #[test]
    fn test_rollup_keeps_other_fields_and_skips_unchanged() {
        let conn = open_in_memory().unwrap();
        seed(&conn);
        let mut typed = MeetResult::new("M1", "C1");
        typed.average = Some(41.5);
        typed.shown = true;
        typed.show_points = Some(3);
        meet_result::insert(&conn, &typed).unwrap();
        race(&conn, "C1", "1", 1, 9.0);

        let rollup = rollup_meet(&conn, "M1", None, &ctx()).unwrap();
        assert_eq!(rollup.updated, vec!["C1"]);
        let stored = meet_result::get(&conn, "M1", "C1").unwrap();
        assert_eq!(stored.meet_points, Some(9.0));
        assert_eq!(stored.average, Some(41.5));
        assert!(stored.shown);
        assert_eq!(stored.show_points, Some(3));

        let again = rollup_meet(&conn, "M1", None, &ctx()).unwrap();
        assert!(again.is_noop());
        assert_eq!(audit::count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_cleared_dog_is_reset() {
        let conn = open_in_memory().unwrap();
        seed(&conn);
        race(&conn, "C1", "1", 1, 20.0);
        race(&conn, "C2", "1", 2, 12.0);
        rollup_meet(&conn, "M1", None, &ctx()).unwrap();

        race_result::delete(&conn, "M1", "C1", "A", "1").unwrap();
        let rollup = rollup_meet(&conn, "M1", Some("C1"), &ctx()).unwrap();
        assert_eq!(rollup.placements, vec!["C2"]);
        let mut changed: Vec<&str> = rollup.changed_dogs().collect();
        changed.sort();
        assert_eq!(changed, vec!["C1", "C2"]);

        let reset = meet_result::get(&conn, "M1", "C1").unwrap();
        assert_eq!(reset.meet_points, Some(0.0));
        assert_eq!(reset.meet_placement, Some(0));
        assert_eq!(reset.arx_earned, Some(0.0));
        assert_eq!(meet_result::get(&conn, "M1", "C2").unwrap().meet_placement, Some(1));
    }

    #[test]
    fn test_unknown_meet() {
        let conn = open_in_memory().unwrap();
        assert!(rollup_meet(&conn, "M404", None, &ctx()).unwrap_err().is_not_found());
    }
}
