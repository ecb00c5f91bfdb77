// 📥 Meet Result Import - CSV rows straight into MeetResult
//
// Headers are the camelCase field names (meetNumber, cwaNumber, meetPoints, ...).
// A bad row is recorded in the summary and skipped; a storage failure aborts
// the whole import. Touched dogs are refreshed once at the end when the
// registry runs with the automatic policy.

use crate::audit::{self, EditContext, Tracked};
use crate::config::ReconcilePolicy;
use crate::entities::meet_result::{self, MeetResult};
use crate::entities::{dog, meet};
use crate::error::{RegistryError, Result};
use crate::registry::refresh_within;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::io::Read;
use std::str::FromStr;

pub const IMPORT_SOURCE: &str = "import/meet_results";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// New rows only; rows already present are skipped
    #[default]
    Insert,
    /// New rows inserted, existing rows overwritten
    Upsert,
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportMode::Insert => f.write_str("insert"),
            ImportMode::Upsert => f.write_str("upsert"),
        }
    }
}

impl FromStr for ImportMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(ImportMode::Insert),
            "upsert" => Ok(ImportMode::Upsert),
            other => Err(format!("import mode must be 'insert' or 'upsert', got {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    /// 1-based line in the CSV file
    pub line: u64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub refreshed: usize,
    pub row_errors: Vec<RowError>,
}

impl ImportSummary {
    pub fn summary(&self) -> String {
        format!(
            "{} inserted, {} updated, {} skipped, {} failed, {} dogs refreshed",
            self.inserted, self.updated, self.skipped, self.failed, self.refreshed
        )
    }

    fn reject(&mut self, line: u64, message: String) {
        tracing::warn!(line, %message, "import row rejected");
        self.failed += 1;
        self.row_errors.push(RowError { line, message });
    }
}

enum RowOutcome {
    Inserted,
    Updated,
    Skipped,
}

/// Import every row of `reader` using `conn` (normally an open transaction).
pub fn import_meet_results<R: Read>(
    conn: &Connection,
    reader: R,
    mode: ImportMode,
    ctx: &EditContext,
    policy: ReconcilePolicy,
) -> Result<ImportSummary> {
    let ctx = ctx.with_source(IMPORT_SOURCE);
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = rdr.headers()?.clone();

    let mut summary = ImportSummary::default();
    let mut touched = BTreeSet::new();
    let mut seen = HashSet::new();

    for (index, record) in rdr.records().enumerate() {
        let fallback_line = index as u64 + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                let line = e.position().map_or(fallback_line, |p| p.line());
                summary.reject(line, e.to_string());
                continue;
            }
        };
        let line = record.position().map_or(fallback_line, |p| p.line());

        let row: MeetResult = match record.deserialize(Some(&headers)) {
            Ok(row) => row,
            Err(e) => {
                summary.reject(line, e.to_string());
                continue;
            }
        };

        // Only the first row for a key is applied
        if !seen.insert((row.meet_number.clone(), row.cwa_number.clone())) {
            summary.reject(line, format!("duplicate key in file: {}", row.record_key()));
            continue;
        }

        match import_row(conn, row, mode, &ctx) {
            Ok((outcome, cwa_number)) => {
                match outcome {
                    RowOutcome::Inserted => summary.inserted += 1,
                    RowOutcome::Updated => summary.updated += 1,
                    RowOutcome::Skipped => summary.skipped += 1,
                }
                if !matches!(outcome, RowOutcome::Skipped) {
                    touched.insert(cwa_number);
                }
            }
            Err(e @ (RegistryError::Validation(_)
            | RegistryError::NotFound { .. }
            | RegistryError::AlreadyExists { .. })) => {
                summary.reject(line, e.to_string());
            }
            Err(e) => return Err(e),
        }
    }

    if policy.is_automatic() {
        for cwa_number in &touched {
            refresh_within(conn, cwa_number, &ctx)?;
            summary.refreshed += 1;
        }
    }

    tracing::info!(mode = %mode, "meet result import: {}", summary.summary());
    Ok(summary)
}

fn import_row(
    conn: &Connection,
    mut row: MeetResult,
    mode: ImportMode,
    ctx: &EditContext,
) -> Result<(RowOutcome, String)> {
    row.validate()?;
    if !dog::exists(conn, &row.cwa_number)? {
        return Err(RegistryError::not_found(dog::ENTITY, row.cwa_number.as_str()));
    }
    if meet::find(conn, &row.meet_number)?.is_none() {
        return Err(RegistryError::not_found(meet::ENTITY, row.meet_number.as_str()));
    }

    let outcome = match meet_result::find(conn, &row.meet_number, &row.cwa_number)? {
        None => {
            row.stamp(ctx);
            meet_result::insert(conn, &row)?;
            audit::log_insert(conn, ctx, &row)?;
            RowOutcome::Inserted
        }
        Some(_) if mode == ImportMode::Insert => RowOutcome::Skipped,
        Some(existing) if existing.same_content(&row) => RowOutcome::Skipped,
        Some(existing) => {
            row.stamp(ctx);
            meet_result::update(conn, &row)?;
            audit::log_update(conn, ctx, &existing, &row)?;
            RowOutcome::Updated
        }
    };

    Ok((outcome, row.cwa_number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::entities::dog::Dog;
    use crate::entities::meet::Meet;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn ctx() -> EditContext {
        EditContext::new(
            "importer",
            Utc.with_ymd_and_hms(2025, 7, 1, 8, 0, 0).unwrap(),
            "tests/import",
        )
    }

    fn seed(conn: &Connection) {
        let mut dog = Dog::new("C1", "Csv Runner");
        dog.birthdate = NaiveDate::from_ymd_opt(2022, 1, 1);
        dog::insert(conn, &dog).unwrap();
        meet::insert(conn, &Meet::new("M1", NaiveDate::from_ymd_opt(2025, 6, 1).unwrap())).unwrap();
        meet::insert(conn, &Meet::new("M2", NaiveDate::from_ymd_opt(2025, 6, 8).unwrap())).unwrap();
    }

    const CSV: &str = "\
meetNumber,cwaNumber,meetPoints,meetPlacement,arxEarned,dpcLeg
M1,C1,12.5,1,1,Y
M2,C1,,2,,N
M2,C404,3,,,
M1,C1,abc,,,
";

    #[test]
    fn test_insert_mode_collects_row_errors() {
        let conn = open_in_memory().unwrap();
        seed(&conn);

        let summary =
            import_meet_results(&conn, CSV.as_bytes(), ImportMode::Insert, &ctx(), ReconcilePolicy::OnDemand)
                .unwrap();

        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.refreshed, 0);
        let lines: Vec<u64> = summary.row_errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![4, 5]);
        assert!(summary.row_errors[0].message.contains("C404"));

        let stored = meet_result::get(&conn, "M1", "C1").unwrap();
        assert_eq!(stored.meet_points, Some(12.5));
        assert!(stored.dpc_leg);
        assert_eq!(meet_result::get(&conn, "M2", "C1").unwrap().meet_points, None);

        let entry = &audit::list_for_record(&conn, "MeetResult", "MeetNumber=M1|CWANumber=C1").unwrap()[0];
        assert_eq!(entry.source, IMPORT_SOURCE);
    }

    #[test]
    fn test_upsert_updates_and_skips_identical() {
        let conn = open_in_memory().unwrap();
        seed(&conn);
        let first = "meetNumber,cwaNumber,meetPoints\nM1,C1,10\nM2,C1,4\n";
        import_meet_results(&conn, first.as_bytes(), ImportMode::Insert, &ctx(), ReconcilePolicy::OnDemand)
            .unwrap();

        // Insert mode leaves existing rows alone
        let again = "meetNumber,cwaNumber,meetPoints\nM1,C1,11\n";
        let summary =
            import_meet_results(&conn, again.as_bytes(), ImportMode::Insert, &ctx(), ReconcilePolicy::OnDemand)
                .unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(meet_result::get(&conn, "M1", "C1").unwrap().meet_points, Some(10.0));

        let upsert = "meetNumber,cwaNumber,meetPoints\nM1,C1,11\nM2,C1,4\n";
        let summary =
            import_meet_results(&conn, upsert.as_bytes(), ImportMode::Upsert, &ctx(), ReconcilePolicy::OnDemand)
                .unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.skipped, 1);

        let history = audit::list_for_record(&conn, "MeetResult", "MeetNumber=M1|CWANumber=C1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].operation, audit::Operation::Update);
        assert_eq!(history[1].before_data.as_ref().unwrap()["meetPoints"], 10.0);
    }

    #[test]
    fn test_automatic_policy_refreshes_touched_dogs() {
        let conn = open_in_memory().unwrap();
        seed(&conn);
        let csv = "meetNumber,cwaNumber,meetPoints,arxEarned\nM1,C1,30,8\nM2,C1,25,8\n";

        let summary =
            import_meet_results(&conn, csv.as_bytes(), ImportMode::Insert, &ctx(), ReconcilePolicy::Automatic)
                .unwrap();
        assert_eq!(summary.refreshed, 1);

        let dog = dog::get(&conn, "C1").unwrap();
        assert_eq!(dog.meet_points, 55.0);
        assert_eq!(dog.arx_points, 16.0);
        assert_eq!(dog.meet_appearances, 2);
        let held: Vec<String> = crate::entities::dog_title::codes_for_dog(&conn, "C1")
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(held, vec!["ARX", "PR"]);
    }

    #[test]
    fn test_repeated_key_in_one_file_is_rejected() {
        let csv = "meetNumber,cwaNumber,meetPoints\nM1,C1,10\nM2,C1,4\nM1,C1,99\n";

        for mode in [ImportMode::Insert, ImportMode::Upsert] {
            let conn = open_in_memory().unwrap();
            seed(&conn);

            let summary =
                import_meet_results(&conn, csv.as_bytes(), mode, &ctx(), ReconcilePolicy::OnDemand).unwrap();
            assert_eq!(summary.inserted, 2);
            assert_eq!(summary.updated, 0);
            assert_eq!(summary.failed, 1);
            assert_eq!(summary.row_errors[0].line, 4);
            assert!(summary.row_errors[0]
                .message
                .contains("duplicate key in file: MeetNumber=M1|CWANumber=C1"));

            // First occurrence wins, logged once
            assert_eq!(meet_result::get(&conn, "M1", "C1").unwrap().meet_points, Some(10.0));
            let history = audit::list_for_record(&conn, "MeetResult", "MeetNumber=M1|CWANumber=C1").unwrap();
            assert_eq!(history.len(), 1);
        }
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("UPSERT".parse::<ImportMode>().unwrap(), ImportMode::Upsert);
        assert!("merge".parse::<ImportMode>().is_err());
    }
}
