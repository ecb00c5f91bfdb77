// 🗄️ Storage - SQLite schema and connection setup
//
// All entity modules expose free functions over `&Connection` so they can be
// composed inside one `rusqlite::Transaction` by the mutation service.

use crate::error::Result;
use rusqlite::{Connection, ErrorCode};
use std::path::Path;
use std::time::Duration;

/// How long a writer waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if needed) a registry database file and make sure the schema exists.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path.as_ref())?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    setup_database(&conn)?;
    Ok(conn)
}

/// Fresh in-memory database with the full schema, for tests and previews.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases report "memory")
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Dogs (counters + derived grade, optimistic version)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS dogs (
            cwa_number TEXT PRIMARY KEY,
            akc_number TEXT,
            ckc_number TEXT,
            foreign_number TEXT,
            foreign_type TEXT,
            call_name TEXT,
            registered_name TEXT NOT NULL,
            birthdate TEXT,
            pedigree_link TEXT,
            notes TEXT,
            status TEXT NOT NULL DEFAULT 'Active'
                CHECK (status IN ('Active', 'Inactive')),
            average REAL NOT NULL DEFAULT 0,
            current_grade TEXT NOT NULL DEFAULT 'FTE'
                CHECK (current_grade IN ('FTE', 'D', 'C', 'B', 'A')),
            meet_points REAL NOT NULL DEFAULT 0,
            arx_points REAL NOT NULL DEFAULT 0,
            narx_points REAL NOT NULL DEFAULT 0,
            show_points INTEGER NOT NULL DEFAULT 0,
            dpc_legs INTEGER NOT NULL DEFAULT 0,
            meet_wins INTEGER NOT NULL DEFAULT 0,
            meet_appearances INTEGER NOT NULL DEFAULT 0,
            high_combined_wins INTEGER NOT NULL DEFAULT 0,
            last_edited_by TEXT,
            last_edited_at TEXT,
            version INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    // ==========================================================================
    // Meets
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meets (
            meet_number TEXT PRIMARY KEY,
            club_abbreviation TEXT,
            meet_date TEXT NOT NULL,
            race_secretary TEXT,
            judge TEXT,
            location TEXT,
            yards INTEGER,
            last_edited_by TEXT,
            last_edited_at TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Meet results (one row per dog per meet)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meet_results (
            meet_number TEXT NOT NULL REFERENCES meets(meet_number),
            cwa_number TEXT NOT NULL REFERENCES dogs(cwa_number),
            average REAL,
            grade TEXT,
            meet_placement INTEGER,
            meet_points REAL,
            arx_earned REAL,
            narx_earned REAL,
            shown INTEGER NOT NULL DEFAULT 0,
            show_placement INTEGER,
            show_points INTEGER,
            dpc_leg INTEGER NOT NULL DEFAULT 0,
            hc_score REAL,
            hc_leg_earned INTEGER NOT NULL DEFAULT 0,
            last_edited_by TEXT,
            last_edited_at TEXT,
            PRIMARY KEY (meet_number, cwa_number)
        )",
        [],
    )?;

    // ==========================================================================
    // Title catalog + awarded titles
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS title_types (
            title TEXT PRIMARY KEY,
            title_description TEXT NOT NULL,
            last_edited_by TEXT,
            last_edited_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS dog_titles (
            cwa_number TEXT NOT NULL REFERENCES dogs(cwa_number),
            title TEXT NOT NULL REFERENCES title_types(title),
            title_number TEXT,
            title_date TEXT,
            name_prefix TEXT,
            name_suffix TEXT,
            last_edited_by TEXT,
            last_edited_at TEXT,
            PRIMARY KEY (cwa_number, title)
        )",
        [],
    )?;

    // ==========================================================================
    // Race results (one row per dog per race; rolled up into meet_results)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS race_results (
            meet_number TEXT NOT NULL REFERENCES meets(meet_number),
            cwa_number TEXT NOT NULL REFERENCES dogs(cwa_number),
            program TEXT NOT NULL,
            race_number TEXT NOT NULL,
            entry_type TEXT,
            box_number TEXT,
            placement INTEGER,
            meet_points REAL,
            incident TEXT,
            last_edited_by TEXT,
            last_edited_at TEXT,
            PRIMARY KEY (meet_number, cwa_number, program, race_number)
        )",
        [],
    )?;

    // ==========================================================================
    // Change log (append-only audit ledger)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS change_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            changed_table TEXT NOT NULL,
            record_pk TEXT NOT NULL,
            operation TEXT NOT NULL CHECK (operation IN ('INSERT', 'UPDATE', 'DELETE')),
            changed_by TEXT NOT NULL,
            changed_at TEXT NOT NULL,
            source TEXT NOT NULL,
            before_data TEXT,
            after_data TEXT,
            entry_hash TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS change_log_append_only
         BEFORE UPDATE ON change_log
         BEGIN
            SELECT RAISE(ABORT, 'change_log entries are immutable');
         END",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_meet_results_dog ON meet_results(cwa_number)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_race_results_meet ON race_results(meet_number)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_dog_titles_dog ON dog_titles(cwa_number)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_change_log_record ON change_log(changed_table, record_pk)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_change_log_changed_at ON change_log(changed_at)",
        [],
    )?;

    Ok(())
}

/// True when `err` is a primary-key or unique collision.
pub fn is_duplicate_key(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
        }
        _ => false,
    }
}

/// Row count of one of our own tables (names are never user supplied).
pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}
