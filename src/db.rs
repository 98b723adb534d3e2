use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "surveillance.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.display()))?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS planning_sessions(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            session_type TEXT NOT NULL,
            semester TEXT NOT NULL,
            year INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            file_path TEXT,
            stats_total_assignments INTEGER,
            stats_teachers_count INTEGER,
            stats_exams_count INTEGER
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS planning_assignments(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            day_number INTEGER NOT NULL,
            session TEXT NOT NULL,
            time_start TEXT NOT NULL,
            time_end TEXT NOT NULL,
            exam_count INTEGER NOT NULL DEFAULT 0,
            teacher_id TEXT NOT NULL,
            grade TEXT NOT NULL,
            is_responsible INTEGER NOT NULL DEFAULT 0,
            teacher_first_name TEXT,
            teacher_last_name TEXT,
            teacher_email TEXT,
            FOREIGN KEY(session_id) REFERENCES planning_sessions(id) ON DELETE CASCADE
        )",
        [],
    )?;
    // Workspaces created before the teacher snapshot was stored on each row.
    ensure_assignments_snapshot_columns(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_session ON planning_assignments(session_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_teacher ON planning_assignments(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_teacher_email ON planning_assignments(teacher_email)",
        [],
    )?;
    ensure_natural_key_index(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            code TEXT PRIMARY KEY,
            last_name TEXT,
            first_name TEXT,
            abbreviation TEXT,
            email TEXT,
            grade_code TEXT,
            participates INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT
        )",
        [],
    )?;
    ensure_teachers_updated_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_email ON teachers(email)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            exam_date TEXT NOT NULL,
            time_start TEXT NOT NULL,
            time_end TEXT NOT NULL,
            session_label TEXT NOT NULL,
            exam_type TEXT,
            semester TEXT,
            teacher TEXT,
            room_code TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_date ON exams(exam_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_wishes(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            teacher TEXT NOT NULL,
            semester TEXT,
            session_label TEXT,
            date TEXT,
            day_label TEXT NOT NULL,
            slot_label TEXT NOT NULL,
            max_per_day INTEGER
        )",
        [],
    )?;
    ensure_wishes_max_per_day(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_wishes_teacher ON teacher_wishes(teacher)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_wishes_day ON teacher_wishes(day_label)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_credits(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            teacher_id TEXT NOT NULL,
            credit INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(session_id) REFERENCES planning_sessions(id) ON DELETE CASCADE,
            UNIQUE(session_id, teacher_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_credits_session ON teacher_credits(session_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_hours(
            grade_code TEXT PRIMARY KEY,
            hours REAL NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_assignments_snapshot_columns(conn: &Connection) -> anyhow::Result<()> {
    for (column, decl) in [
        ("teacher_first_name", "TEXT"),
        ("teacher_last_name", "TEXT"),
        ("teacher_email", "TEXT"),
        ("exam_count", "INTEGER NOT NULL DEFAULT 0"),
    ] {
        add_column_if_missing(conn, "planning_assignments", column, decl)?;
    }
    Ok(())
}

/// One row per (teacher, day, slot) within a session. Slot labels compare the
/// way lookups do: trimmed and case-insensitive.
fn ensure_natural_key_index(conn: &Connection) -> anyhow::Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'index' AND name = 'idx_assignments_natural_key'",
            [],
            |r| r.get(0),
        )
        .optional()?;
    match existing {
        Some(sql) if sql.contains("lower(trim(session))") => return Ok(()),
        Some(_) => {
            tracing::info!("rebuilding assignment natural key index");
            conn.execute("DROP INDEX idx_assignments_natural_key", [])?;
        }
        None => {}
    }
    let created = conn.execute(
        "CREATE UNIQUE INDEX idx_assignments_natural_key
         ON planning_assignments(session_id, teacher_id, day_number, lower(trim(session)))",
        [],
    );
    if let Err(e) = created {
        // Rows differing only in slot case predate the stricter key.
        tracing::warn!(error = %e, "falling back to exact-match assignment natural key");
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_assignments_natural_key
             ON planning_assignments(session_id, teacher_id, day_number, session)",
            [],
        )
        .context("failed to create assignment natural key index")?;
    }
    Ok(())
}

fn ensure_teachers_updated_at(conn: &Connection) -> anyhow::Result<()> {
    add_column_if_missing(conn, "teachers", "updated_at", "TEXT")
}

fn ensure_wishes_max_per_day(conn: &Connection) -> anyhow::Result<()> {
    add_column_if_missing(conn, "teacher_wishes", "max_per_day", "INTEGER")
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> anyhow::Result<()> {
    if table_has_column(conn, table, column)? {
        return Ok(());
    }
    tracing::info!(table, column, "adding column");
    conn.execute(
        &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl),
        [],
    )
    .with_context(|| format!("failed to add column {}.{}", table, column))?;
    Ok(())
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("settings {} is not JSON", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
