// 📊 Stat Aggregator - fold a dog's meet history into its counters
//
// Recompute order for one dog:
//   1. sum/count every meet result → StatTotals
//   2. rolling average of the 3 most recent meets
//   3. grade from the refreshed attributes
//   4. persist (and audit) only if something actually moved

use crate::audit::{self, EditContext, Tracked};
use crate::entities::dog::{self, Dog};
use crate::entities::meet_result::{self, MeetResult};
use crate::error::Result;
use crate::rules::EligibilityEvaluator;
use crate::temporal::evaluation_date;
use rusqlite::Connection;
use serde::Serialize;

/// Results that feed the rolling average
pub const RECENT_RESULTS: usize = 3;

pub const RECOMPUTE_SOURCE: &str = "stats/recompute";

/// Round half away from zero to 2 decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// AVERAGE CALCULATOR
// ============================================================================

/// Mean of the recorded values, nulls excluded from sum and count. Empty → 0.0.
pub fn mean_of_recent(points: &[Option<f64>]) -> f64 {
    let recorded: Vec<f64> = points.iter().flatten().copied().collect();
    if recorded.is_empty() {
        return 0.0;
    }
    round2(recorded.iter().sum::<f64>() / recorded.len() as f64)
}

/// Rolling average over the dog's most recent meets (date desc, meet number desc).
pub fn point_average(conn: &Connection, cwa_number: &str) -> Result<f64> {
    let points = meet_result::recent_points_for_dog(conn, cwa_number, RECENT_RESULTS)?;
    Ok(mean_of_recent(&points))
}

// ============================================================================
// STAT TOTALS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatTotals {
    pub meet_points: f64,
    pub arx_points: f64,
    pub narx_points: f64,
    pub show_points: i64,
    pub dpc_legs: i64,
    pub meet_wins: i64,
    pub meet_appearances: i64,
    pub show_wins: i64,
}

impl StatTotals {
    /// Nulls count as zero.
    pub fn from_results(results: &[MeetResult]) -> Self {
        let mut totals = results.iter().fold(StatTotals::default(), |mut t, r| {
            t.meet_points += r.meet_points.unwrap_or(0.0);
            t.arx_points += r.arx_earned.unwrap_or(0.0);
            t.narx_points += r.narx_earned.unwrap_or(0.0);
            t.show_points += r.show_points.unwrap_or(0);
            t.dpc_legs += r.dpc_leg as i64;
            t.meet_wins += (r.meet_placement == Some(1)) as i64;
            t.show_wins += (r.show_placement == Some(1)) as i64;
            t.meet_appearances += 1;
            t
        });

        totals.meet_points = round2(totals.meet_points);
        totals.arx_points = round2(totals.arx_points);
        totals.narx_points = round2(totals.narx_points);
        totals
    }

    /// Meet wins plus show wins.
    pub fn high_combined_wins(&self) -> i64 {
        self.meet_wins + self.show_wins
    }

    /// Overwrite the computed counters; identity and registration fields untouched.
    pub fn apply_to(&self, dog: &mut Dog) {
        dog.meet_points = self.meet_points;
        dog.arx_points = self.arx_points;
        dog.narx_points = self.narx_points;
        dog.show_points = self.show_points;
        dog.dpc_legs = self.dpc_legs;
        dog.meet_wins = self.meet_wins;
        dog.meet_appearances = self.meet_appearances;
        dog.high_combined_wins = self.high_combined_wins();
    }
}

pub fn aggregate(conn: &Connection, cwa_number: &str) -> Result<StatTotals> {
    let results = meet_result::list_for_dog(conn, cwa_number)?;
    Ok(StatTotals::from_results(&results))
}

// ============================================================================
// RECOMPUTE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeOutcome {
    pub dog: Dog,
    pub totals: StatTotals,
    pub changed: bool,
}

/// Refresh counters, average and grade for one dog from its meet history.
///
/// Writes (version-checked) and logs one UPDATE only when a computed field
/// differs from what is stored.
pub fn recompute_stats(
    conn: &Connection,
    cwa_number: &str,
    ctx: &EditContext,
) -> Result<RecomputeOutcome> {
    let stored = dog::get(conn, cwa_number)?;
    let totals = aggregate(conn, cwa_number)?;
    let evaluator = EligibilityEvaluator::new(evaluation_date(ctx.at));

    let mut refreshed = stored.clone();
    totals.apply_to(&mut refreshed);
    refreshed.average = point_average(conn, cwa_number)?;
    refreshed.current_grade = evaluator.grade(&refreshed);

    if refreshed == stored {
        tracing::debug!(cwa_number, "stats unchanged");
        return Ok(RecomputeOutcome {
            dog: stored,
            totals,
            changed: false,
        });
    }

    let ctx = ctx.with_source(RECOMPUTE_SOURCE);
    refreshed.stamp(&ctx);
    let written = dog::update(conn, &refreshed)?;
    audit::log_update(conn, &ctx, &stored, &written)?;

    tracing::info!(
        cwa_number,
        appearances = written.meet_appearances,
        average = written.average,
        grade = %written.current_grade,
        "stats recomputed"
    );

    Ok(RecomputeOutcome {
        dog: written,
        totals,
        changed: true,
    })
}
