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

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    fn start(workspace: &Path) -> Self {
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
        let mut s = Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        };
        s.ok("workspace.select", json!({ "path": workspace.to_string_lossy() }));
        s
    }

    fn send(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value["id"], json!(id));
        value
    }

    fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let resp = self.send(method, params);
        assert_eq!(resp["ok"], json!(true), "{} failed: {}", method, resp);
        resp["result"].clone()
    }

    fn err_code(&mut self, method: &str, params: serde_json::Value) -> String {
        let resp = self.send(method, params);
        assert_eq!(resp["ok"], json!(false), "{} unexpectedly succeeded", method);
        resp["error"]["code"].as_str().unwrap_or_default().to_string()
    }

    fn stop(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
    }
}

fn assignment(date: &str, day: i64, slot: &str, teacher: &str, exams: i64) -> serde_json::Value {
    let (start, end) = if slot == "Morning" {
        ("08:30", "11:30")
    } else {
        ("14:00", "17:00")
    };
    json!({
        "date": date,
        "dayNumber": day,
        "slot": slot,
        "timeStart": start,
        "timeEnd": end,
        "examCount": exams,
        "teacherId": teacher,
        "grade": "PES",
        "isResponsible": false,
        "firstName": "Ada",
        "lastName": "Lovelace",
        "email": "ada@example.org"
    })
}

fn assignment_rows(workspace: &Path, session_id: i64) -> i64 {
    let conn = rusqlite::Connection::open(workspace.join("surveillance.sqlite3")).expect("open db");
    conn.query_row(
        "SELECT COUNT(*) FROM planning_assignments WHERE session_id = ?",
        [session_id],
        |r| r.get(0),
    )
    .expect("count assignments")
}

fn total_assignment_rows(workspace: &Path) -> i64 {
    let conn = rusqlite::Connection::open(workspace.join("surveillance.sqlite3")).expect("open db");
    conn.query_row("SELECT COUNT(*) FROM planning_assignments", [], |r| r.get(0))
        .expect("count assignments")
}

#[test]
fn fall_final_session_detail_and_dashboard() {
    let workspace = temp_dir("survd-fall-final");
    let mut sc = Sidecar::start(&workspace);

    let created = sc.ok(
        "sessions.create",
        json!({
            "name": "Fall_Final",
            "sessionType": "Final",
            "semester": "S1",
            "assignments": [
                assignment("2024-01-16", 2, "Morning", "T1", 2),
                assignment("2024-01-15", 1, "Morning", "T1", 3),
                assignment("2024-01-15", 1, "Afternoon", "T1", 1),
            ]
        }),
    );
    let session_id = created["sessionId"].as_i64().expect("session id");
    assert_eq!(created["totalAssignments"], json!(3));
    assert_eq!(created["teachersCount"], json!(1));
    assert_eq!(created["examsCount"], json!(6));

    let detail = sc.ok("sessions.get", json!({ "sessionId": session_id }));
    let rows = detail["assignments"].as_array().expect("assignments");
    assert_eq!(rows.len(), 3);
    let order: Vec<(String, String)> = rows
        .iter()
        .map(|r| {
            (
                r["date"].as_str().unwrap_or_default().to_string(),
                r["slot"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    assert_eq!(
        order,
        vec![
            ("2024-01-15".to_string(), "Afternoon".to_string()),
            ("2024-01-15".to_string(), "Morning".to_string()),
            ("2024-01-16".to_string(), "Morning".to_string()),
        ]
    );
    assert_eq!(detail["session"]["name"], json!("Fall_Final"));
    assert_eq!(detail["session"]["semester"], json!("S1"));

    let dash = sc.ok("dashboard.stats", json!({}));
    assert_eq!(dash["hasData"], json!(true));
    assert_eq!(dash["overview"]["uniqueTeachers"], json!(1));
    assert_eq!(dash["overview"]["totalAssignments"], json!(3));
    assert_eq!(dash["overview"]["totalDays"], json!(2));

    sc.stop();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn sessions_list_most_recent_first() {
    let workspace = temp_dir("survd-sessions-order");
    let mut sc = Sidecar::start(&workspace);

    for name in ["First", "Second", "Third"] {
        sc.ok(
            "sessions.create",
            json!({
                "name": name,
                "sessionType": "Final",
                "semester": "S2",
                "assignments": [assignment("2024-06-01", 1, "Morning", "T9", 1)]
            }),
        );
    }
    let listed = sc.ok("sessions.list", json!({}));
    let names: Vec<&str> = listed["sessions"]
        .as_array()
        .expect("sessions")
        .iter()
        .filter_map(|s| s["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Third", "Second", "First"]);

    sc.stop();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn delete_session_cascades_and_removes_saved_planning() {
    let workspace = temp_dir("survd-session-delete");
    std::fs::write(
        workspace.join("schedule_solution.csv"),
        "Date,Day,Slot,StartTime,EndTime,ExamCount,TeacherId,LastName,FirstName,Email,Grade,Responsible\n",
    )
    .expect("seed mirror");
    let mut sc = Sidecar::start(&workspace);

    let created = sc.ok(
        "sessions.create",
        json!({
            "name": "To Delete",
            "sessionType": "Midterm",
            "semester": "S1",
            "assignments": [
                assignment("2024-01-15", 1, "Morning", "T1", 1),
                assignment("2024-01-15", 1, "Morning", "T2", 1),
            ]
        }),
    );
    let session_id = created["sessionId"].as_i64().expect("session id");
    let saved = PathBuf::from(created["filePath"].as_str().expect("saved planning path"));
    assert!(saved.is_file());
    assert!(saved.starts_with(workspace.join("saved_plannings")));

    sc.ok("credits.record", json!({ "teacherId": "T1", "sessionId": session_id }));

    let export_to = workspace.join("exports").join("copy.csv");
    let exported = sc.ok(
        "sessions.export",
        json!({ "sessionId": session_id, "outPath": export_to.to_string_lossy() }),
    );
    assert!(exported["bytes"].as_u64().unwrap_or(0) > 0);
    assert_eq!(
        std::fs::read_to_string(&export_to).expect("exported copy"),
        std::fs::read_to_string(&saved).expect("saved planning")
    );

    let deleted = sc.ok("sessions.delete", json!({ "sessionId": session_id }));
    assert_eq!(deleted["removedAssignments"], json!(2));
    assert_eq!(deleted["fileRemoved"], json!(true));
    assert!(!saved.exists());

    assert_eq!(sc.err_code("sessions.get", json!({ "sessionId": session_id })), "not_found");
    assert_eq!(assignment_rows(&workspace, session_id), 0);
    assert_eq!(sc.err_code("sessions.delete", json!({ "sessionId": session_id })), "not_found");

    sc.stop();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn delete_session_tolerates_missing_output_file() {
    let workspace = temp_dir("survd-session-delete-nofile");
    std::fs::write(
        workspace.join("schedule_solution.csv"),
        "Date,Day,Slot,StartTime,EndTime,ExamCount,TeacherId,LastName,FirstName,Email,Grade,Responsible\n",
    )
    .expect("seed mirror");
    let mut sc = Sidecar::start(&workspace);

    let created = sc.ok(
        "sessions.create",
        json!({
            "name": "Gone",
            "sessionType": "Final",
            "semester": "S1",
            "assignments": [assignment("2024-01-15", 1, "Morning", "T1", 1)]
        }),
    );
    let session_id = created["sessionId"].as_i64().expect("session id");
    let saved = PathBuf::from(created["filePath"].as_str().expect("saved planning path"));
    std::fs::remove_file(&saved).expect("remove saved planning");

    let deleted = sc.ok("sessions.delete", json!({ "sessionId": session_id }));
    assert_eq!(deleted["fileRemoved"], json!(false));

    sc.stop();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn malformed_create_leaves_no_rows_behind() {
    let workspace = temp_dir("survd-session-malformed");
    let mut sc = Sidecar::start(&workspace);

    sc.ok(
        "sessions.create",
        json!({
            "name": "Baseline",
            "sessionType": "Final",
            "semester": "S1",
            "assignments": [assignment("2024-01-15", 1, "Morning", "T1", 1)]
        }),
    );
    let before = total_assignment_rows(&workspace);

    let mut missing_teacher = assignment("2024-01-15", 1, "Afternoon", "T2", 1);
    missing_teacher
        .as_object_mut()
        .expect("row object")
        .remove("teacherId");
    let code = sc.err_code(
        "sessions.create",
        json!({
            "name": "Broken",
            "sessionType": "Final",
            "semester": "S1",
            "assignments": [assignment("2024-01-15", 1, "Morning", "T3", 1), missing_teacher]
        }),
    );
    assert_eq!(code, "bad_params");
    assert_eq!(total_assignment_rows(&workspace), before);

    // A duplicate natural key only surfaces during the insert itself.
    let code = sc.err_code(
        "sessions.create",
        json!({
            "name": "Duplicated",
            "sessionType": "Final",
            "semester": "S1",
            "assignments": [
                assignment("2024-01-15", 1, "Morning", "T4", 1),
                assignment("2024-01-15", 1, "Morning", "T4", 2),
            ]
        }),
    );
    assert_eq!(code, "bad_params");
    assert_eq!(total_assignment_rows(&workspace), before);

    let listed = sc.ok("sessions.list", json!({}));
    assert_eq!(listed["sessions"].as_array().map(|a| a.len()), Some(1));

    sc.stop();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn create_with_wishes_replaces_wish_directory() {
    let workspace = temp_dir("survd-session-wishes");
    let mut sc = Sidecar::start(&workspace);

    sc.ok(
        "wishes.import",
        json!({ "rows": [{ "teacher": "Old Teacher", "dayLabel": "Jour 1", "slotLabel": "Morning" }] }),
    );
    let created = sc.ok(
        "sessions.create",
        json!({
            "name": "With Wishes",
            "sessionType": "Final",
            "semester": "S1",
            "assignments": [assignment("2024-01-15", 1, "Morning", "T1", 1)],
            "wishes": [
                { "teacher": "T1", "dayLabel": "Jour 2", "slotLabel": "Morning", "maxPerDay": 1 },
                { "teacher": "T1", "dayLabel": "Jour 1", "slotLabel": "Afternoon" }
            ]
        }),
    );
    assert_eq!(created["wishes"]["succeeded"], json!(2));

    let wishes = sc.ok("wishes.list", json!({}));
    let teachers: Vec<&str> = wishes["wishes"]
        .as_array()
        .expect("wishes")
        .iter()
        .filter_map(|w| w["teacher"].as_str())
        .collect();
    assert_eq!(teachers, vec!["T1", "T1"]);

    sc.stop();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn failed_create_keeps_earlier_saved_planning_with_the_same_name() {
    let workspace = temp_dir("survd-session-same-name");
    std::fs::write(
        workspace.join("schedule_solution.csv"),
        "Date,Day,Slot,StartTime,EndTime,ExamCount,TeacherId,LastName,FirstName,Email,Grade,Responsible\n\
         2024-01-15,1,Morning,08:30,11:30,1,T1,Lovelace,Ada,ada@example.org,PES,FALSE\n",
    )
    .expect("seed mirror");
    let mut sc = Sidecar::start(&workspace);

    let first = sc.ok(
        "sessions.create",
        json!({
            "name": "Edits",
            "sessionType": "Final",
            "semester": "S1",
            "assignments": [assignment("2024-01-15", 1, "Morning", "T1", 1)]
        }),
    );
    let first_saved = PathBuf::from(first["filePath"].as_str().expect("saved planning path"));
    let first_bytes = std::fs::read(&first_saved).expect("saved planning");

    let code = sc.err_code(
        "sessions.create",
        json!({
            "name": "Edits",
            "sessionType": "Final",
            "semester": "S1",
            "assignments": [
                assignment("2024-01-15", 1, "Morning", "T1", 1),
                assignment("2024-01-15", 1, "Morning", "T1", 1),
            ]
        }),
    );
    assert_eq!(code, "bad_params");
    assert_eq!(std::fs::read(&first_saved).expect("saved planning kept"), first_bytes);
    let leftovers: Vec<_> = std::fs::read_dir(workspace.join("saved_plannings"))
        .expect("saved plannings dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name())
        .collect();
    assert_eq!(leftovers.len(), 1);
    assert_eq!(Some(leftovers[0].as_os_str()), first_saved.file_name());

    // Same name, successful this time: each session gets its own copy.
    let second = sc.ok(
        "sessions.create",
        json!({
            "name": "Edits",
            "sessionType": "Final",
            "semester": "S1",
            "assignments": [assignment("2024-01-16", 2, "Morning", "T2", 1)]
        }),
    );
    let second_saved = PathBuf::from(second["filePath"].as_str().expect("saved planning path"));
    assert_ne!(second_saved, first_saved);
    assert!(second_saved.is_file());
    assert!(first_saved.is_file());

    let first_id = first["sessionId"].clone();
    let detail = sc.ok("sessions.get", json!({ "sessionId": first_id }));
    assert_eq!(
        detail["session"]["filePath"].as_str().map(PathBuf::from),
        Some(first_saved)
    );

    sc.stop();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn slot_labels_differing_only_in_case_are_one_slot() {
    let workspace = temp_dir("survd-session-slot-case");
    let mut sc = Sidecar::start(&workspace);

    let code = sc.err_code(
        "sessions.create",
        json!({
            "name": "Cased",
            "sessionType": "Final",
            "semester": "S1",
            "assignments": [
                assignment("2024-01-15", 1, "Morning", "T1", 1),
                assignment("2024-01-15", 1, " morning", "T1", 1),
            ]
        }),
    );
    assert_eq!(code, "bad_params");
    assert_eq!(total_assignment_rows(&workspace), 0);

    sc.stop();
    let _ = std::fs::remove_dir_all(workspace);
}
