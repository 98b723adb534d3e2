use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_survd");
    let mut child = Command::new(exe)
        .env_remove("SURVD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn survd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> bool {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql).expect("prepare pragma table_info");
    let mut rows = stmt.query([]).expect("query pragma table_info");
    while let Some(row) = rows.next().expect("next row") {
        let name: String = row.get(1).expect("column name");
        if name == column {
            return true;
        }
    }
    false
}

/// The layout written by the first release: no teacher snapshot on
/// assignments, responsibility kept as spreadsheet text, no wish limits.
fn seed_first_release(workspace: &Path) {
    let conn = Connection::open(workspace.join("surveillance.sqlite3")).expect("create old db");
    conn.execute_batch(
        "CREATE TABLE planning_sessions(
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
        );
        CREATE TABLE planning_assignments(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            day_number INTEGER NOT NULL,
            session TEXT NOT NULL,
            time_start TEXT NOT NULL,
            time_end TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            grade TEXT NOT NULL,
            is_responsible TEXT,
            FOREIGN KEY(session_id) REFERENCES planning_sessions(id) ON DELETE CASCADE
        );
        CREATE TABLE teachers(
            code TEXT PRIMARY KEY,
            last_name TEXT,
            first_name TEXT,
            abbreviation TEXT,
            email TEXT,
            grade_code TEXT,
            participates INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE teacher_wishes(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            teacher TEXT NOT NULL,
            semester TEXT,
            session_label TEXT,
            date TEXT,
            day_label TEXT NOT NULL,
            slot_label TEXT NOT NULL
        );
        INSERT INTO planning_sessions(name, session_type, semester, year, created_at, stats_total_assignments, stats_teachers_count, stats_exams_count)
          VALUES('Legacy', 'Final', 'S2', 2023, '2023-06-01 09:00:00', 2, 2, 0);
        INSERT INTO planning_assignments(session_id, date, day_number, session, time_start, time_end, teacher_id, grade, is_responsible)
          VALUES(1, '2023-06-12', 1, 'Morning', '08:30', '11:30', 'T1', 'PES', 'Oui');
        INSERT INTO planning_assignments(session_id, date, day_number, session, time_start, time_end, teacher_id, grade, is_responsible)
          VALUES(1, '2023-06-12', 1, 'Morning', '08:30', '11:30', 'T2', 'PA', 'Non');
        INSERT INTO teachers(code, last_name, first_name) VALUES('T1', 'Curie', 'Marie');
        INSERT INTO teacher_wishes(teacher, day_label, slot_label) VALUES('Curie Marie', 'Jour 1', 'Morning');",
    )
    .expect("seed old schema");
}

#[test]
fn first_release_workspace_migrates_and_reads() {
    let workspace = temp_dir("survd-db-migration");
    seed_first_release(&workspace);

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let conn = Connection::open(workspace.join("surveillance.sqlite3")).expect("open migrated db");
    assert!(table_has_column(&conn, "planning_assignments", "teacher_first_name"));
    assert!(table_has_column(&conn, "planning_assignments", "teacher_last_name"));
    assert!(table_has_column(&conn, "planning_assignments", "teacher_email"));
    assert!(table_has_column(&conn, "planning_assignments", "exam_count"));
    assert!(table_has_column(&conn, "teachers", "updated_at"));
    assert!(table_has_column(&conn, "teacher_wishes", "max_per_day"));
    for table in ["teacher_credits", "grade_hours", "settings", "exams"] {
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                [table],
                |r| r.get(0),
            )
            .expect("sqlite_master lookup");
        assert_eq!(n, 1, "missing table {}", table);
    }

    let detail = request_ok(&mut stdin, &mut reader, "2", "sessions.get", json!({ "sessionId": 1 }));
    let rows = detail["assignments"].as_array().expect("assignments");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["teacherId"], json!("T1"));
    assert_eq!(rows[0]["isResponsible"], json!(true));
    assert_eq!(rows[0]["examCount"], json!(0));
    assert!(rows[0]["email"].is_null());
    assert_eq!(rows[1]["isResponsible"], json!(false));

    let wishes = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "wishes.byTeacher",
        json!({ "teacher": "Curie Marie" }),
    );
    assert_eq!(wishes["wishes"][0]["maxPerDay"], json!(null));

    // Reopening an up-to-date workspace is a no-op.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let again = request_ok(&mut stdin, &mut reader, "5", "sessions.list", json!({}));
    assert_eq!(again["sessions"].as_array().map(|a| a.len()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn fresh_workspace_gets_full_layout() {
    let workspace = temp_dir("survd-db-fresh");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    for dir in ["saved_plannings", "uploads", "scheduler-workspace", "documents", "outbox"] {
        assert!(workspace.join(dir).is_dir(), "missing {}", dir);
    }
    let conn = Connection::open(workspace.join("surveillance.sqlite3")).expect("open db");
    let indexes: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%' ORDER BY name")
            .expect("prepare index query");
        stmt.query_map([], |r| r.get(0))
            .expect("query indexes")
            .collect::<Result<Vec<_>, _>>()
            .expect("index names")
    };
    for wanted in [
        "idx_assignments_natural_key",
        "idx_assignments_session",
        "idx_assignments_teacher",
        "idx_assignments_teacher_email",
        "idx_exams_date",
        "idx_wishes_day",
        "idx_wishes_teacher",
    ] {
        assert!(indexes.iter().any(|n| n == wanted), "missing index {}", wanted);
    }
    let natural_key: String = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE name = 'idx_assignments_natural_key'",
            [],
            |r| r.get(0),
        )
        .expect("natural key index sql");
    assert!(natural_key.contains("lower(trim(session))"), "{}", natural_key);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
