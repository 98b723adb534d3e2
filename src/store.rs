//! Sessions and their assignments.
//!
//! Every mutation runs inside one transaction. Coordinate lookups address the
//! most recently created session unless a session id is given explicitly.

use crate::directory::{self, WishEntry};
use crate::error::{StoreError, StoreResult};
use crate::fields;
use crate::workspace::WorkspacePaths;
use chrono::Datelike;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: i64,
    pub name: String,
    pub session_type: String,
    pub semester: String,
    pub year: i64,
    pub created_at: String,
    pub file_path: Option<String>,
    pub total_assignments: i64,
    pub teachers_count: i64,
    pub exams_count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRecord {
    pub id: i64,
    pub session_id: i64,
    pub date: String,
    pub day_number: i64,
    pub slot: String,
    pub time_start: String,
    pub time_end: String,
    pub exam_count: i64,
    pub teacher_id: String,
    pub grade: String,
    pub is_responsible: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

impl AssignmentRecord {
    pub fn identity(&self) -> TeacherIdentity {
        TeacherIdentity {
            teacher_id: self.teacher_id.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            grade: self.grade.clone(),
        }
    }

    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            day: self.day_number,
            slot: self.slot.clone(),
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            teacher_id: self.teacher_id.clone(),
            day: self.day_number,
            slot: self.slot.clone(),
        }
    }
}

/// The teacher fields copied onto an assignment when it is written.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TeacherIdentity {
    pub teacher_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub grade: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub day: i64,
    pub slot: String,
}

impl SlotKey {
    fn same_as(&self, other: &SlotKey) -> bool {
        self.day == other.day && self.slot.trim().eq_ignore_ascii_case(other.slot.trim())
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "day {} {}", self.day, self.slot)
    }
}

/// Natural key of an assignment within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub teacher_id: String,
    pub day: i64,
    pub slot: String,
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@day {} {}", self.teacher_id, self.day, self.slot)
    }
}

#[derive(Debug, Clone)]
struct AssignmentInput {
    date: String,
    day_number: i64,
    slot: String,
    time_start: String,
    time_end: String,
    exam_count: i64,
    teacher_id: String,
    grade: String,
    is_responsible: bool,
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
}

impl AssignmentInput {
    fn from_json(row: &Value) -> Result<Self, String> {
        let day_number = fields::int(row, "dayNumber").ok_or("missing dayNumber")?;
        if day_number < 1 {
            return Err(format!("dayNumber must be >= 1 (got {})", day_number));
        }
        Ok(Self {
            date: fields::text(row, "date").ok_or("missing date")?,
            day_number,
            slot: fields::text(row, "slot").ok_or("missing slot")?,
            time_start: fields::text(row, "timeStart").unwrap_or_default(),
            time_end: fields::text(row, "timeEnd").unwrap_or_default(),
            exam_count: fields::int(row, "examCount").unwrap_or(0).max(0),
            teacher_id: fields::text(row, "teacherId").ok_or("missing teacherId")?,
            grade: fields::text(row, "grade").unwrap_or_default(),
            is_responsible: fields::flag(row, "isResponsible").unwrap_or(false),
            first_name: fields::text(row, "firstName"),
            last_name: fields::text(row, "lastName"),
            email: fields::text(row, "email"),
        })
    }
}

const ASSIGNMENT_COLUMNS: &str = "id, session_id, date, day_number, session, time_start, time_end, \
     exam_count, teacher_id, grade, is_responsible, teacher_first_name, teacher_last_name, teacher_email";

const SESSION_COLUMNS: &str = "id, name, session_type, semester, year, created_at, file_path, \
     stats_total_assignments, stats_teachers_count, stats_exams_count";

fn assignment_from_row(r: &rusqlite::Row) -> rusqlite::Result<AssignmentRecord> {
    Ok(AssignmentRecord {
        id: r.get(0)?,
        session_id: r.get(1)?,
        date: r.get(2)?,
        day_number: r.get(3)?,
        slot: r.get(4)?,
        time_start: r.get(5)?,
        time_end: r.get(6)?,
        exam_count: r.get::<_, Option<i64>>(7)?.unwrap_or(0),
        teacher_id: r.get(8)?,
        grade: r.get(9)?,
        is_responsible: responsible_flag(r.get(10)?),
        first_name: r.get(11)?,
        last_name: r.get(12)?,
        email: r.get(13)?,
    })
}

// Older workspaces stored the imported spreadsheet cell verbatim.
fn responsible_flag(v: SqlValue) -> bool {
    match v {
        SqlValue::Integer(n) => n != 0,
        SqlValue::Real(f) => f != 0.0,
        SqlValue::Text(s) => fields::parse_flag(&s).unwrap_or(false),
        _ => false,
    }
}

fn session_from_row(r: &rusqlite::Row) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: r.get(0)?,
        name: r.get(1)?,
        session_type: r.get(2)?,
        semester: r.get(3)?,
        year: r.get(4)?,
        created_at: r.get(5)?,
        file_path: r.get(6)?,
        total_assignments: r.get::<_, Option<i64>>(7)?.unwrap_or(0),
        teachers_count: r.get::<_, Option<i64>>(8)?.unwrap_or(0),
        exams_count: r.get::<_, Option<i64>>(9)?.unwrap_or(0),
    })
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation
    )
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

pub struct NewSession<'a> {
    pub name: &'a str,
    pub session_type: &'a str,
    pub semester: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    pub session_id: i64,
    pub total_assignments: i64,
    pub teachers_count: i64,
    pub exams_count: i64,
    pub file_path: Option<String>,
    pub wishes: Option<directory::ImportSummary>,
}

fn sanitize_file_component(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "session".to_string()
    } else {
        cleaned
    }
}

/// Persists a scheduling run. Every row is validated before anything is
/// written. The current mirror is kept under `saved_plannings/` with a name
/// unique to the session, and nothing lands there unless the rows commit.
pub fn create_session(
    conn: &Connection,
    new: &NewSession<'_>,
    rows: &[Value],
    wishes: Option<&[Value]>,
    files: Option<&WorkspacePaths>,
) -> StoreResult<CreatedSession> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(StoreError::Validation("session name must not be empty".into()));
    }
    if rows.is_empty() {
        return Err(StoreError::Validation(
            "a session needs at least one assignment".into(),
        ));
    }
    let mut inputs = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let input = AssignmentInput::from_json(row)
            .map_err(|reason| StoreError::Validation(format!("row {}: {}", i, reason)))?;
        inputs.push(input);
    }
    let parsed_wishes = match wishes {
        Some(w) if !w.is_empty() => Some(directory::parse_wishes(w)?),
        _ => None,
    };

    let total = inputs.len() as i64;
    let teachers_count = inputs
        .iter()
        .map(|i| i.teacher_id.as_str())
        .collect::<HashSet<_>>()
        .len() as i64;
    let exams_count: i64 = inputs.iter().map(|i| i.exam_count).sum();

    let now = chrono::Local::now();
    let year = now.year() as i64;
    let created_at = now.format("%Y-%m-%d %H:%M:%S%.3f").to_string();

    // The mirror is staged under a private name and only takes its final,
    // per-session name once the rows are committed.
    let staged = match files {
        Some(paths) if paths.mirror().is_file() => {
            let dir = paths.saved_plannings();
            std::fs::create_dir_all(&dir).map_err(StoreError::io(&dir))?;
            let tmp = dir.join(format!(".staging-{}.csv", uuid::Uuid::new_v4()));
            std::fs::copy(paths.mirror(), &tmp).map_err(StoreError::io(&tmp))?;
            Some(SavedCopy {
                staging: tmp,
                stem: format!(
                    "{}_{}_{}_{}",
                    sanitize_file_component(name),
                    sanitize_file_component(new.session_type),
                    sanitize_file_component(new.semester),
                    year
                ),
            })
        }
        _ => None,
    };

    let result = insert_session(
        conn,
        name,
        new,
        year,
        &created_at,
        staged.as_ref(),
        (total, teachers_count, exams_count),
        &inputs,
        parsed_wishes.as_ref().map(|(w, _)| w.as_slice()),
    );
    if let Some(copy) = &staged {
        if let Err(e) = std::fs::remove_file(&copy.staging) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %copy.staging.display(), error = %e, "could not remove staged planning copy");
            }
        }
    }
    let (session_id, saved_copy) = result?;

    tracing::info!(
        session_id,
        total_assignments = total,
        teachers = teachers_count,
        "planning session created"
    );
    Ok(CreatedSession {
        session_id,
        total_assignments: total,
        teachers_count,
        exams_count,
        file_path: saved_copy.map(|p| p.to_string_lossy().to_string()),
        wishes: parsed_wishes.map(|(_, summary)| summary),
    })
}

struct SavedCopy {
    staging: PathBuf,
    stem: String,
}

impl SavedCopy {
    /// `<stem>_<session id>.csv`, suffixed further if a stray file already
    /// holds that name.
    fn final_path(&self, session_id: i64) -> PathBuf {
        let dir = self.staging.parent().unwrap_or_else(|| Path::new("."));
        let mut candidate = dir.join(format!("{}_{}.csv", self.stem, session_id));
        let mut n = 1;
        while candidate.exists() {
            candidate = dir.join(format!("{}_{}-{}.csv", self.stem, session_id, n));
            n += 1;
        }
        candidate
    }
}

#[allow(clippy::too_many_arguments)]
fn insert_session(
    conn: &Connection,
    name: &str,
    new: &NewSession<'_>,
    year: i64,
    created_at: &str,
    saved: Option<&SavedCopy>,
    counters: (i64, i64, i64),
    inputs: &[AssignmentInput],
    wishes: Option<&[directory::WishInput]>,
) -> StoreResult<(i64, Option<PathBuf>)> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO planning_sessions(name, session_type, semester, year, created_at,
           stats_total_assignments, stats_teachers_count, stats_exams_count)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            name,
            new.session_type.trim(),
            new.semester.trim(),
            year,
            created_at,
            counters.0,
            counters.1,
            counters.2,
        ),
    )?;
    let session_id = tx.last_insert_rowid();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO planning_assignments(session_id, date, day_number, session, time_start,
               time_end, exam_count, teacher_id, grade, is_responsible,
               teacher_first_name, teacher_last_name, teacher_email)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for (i, a) in inputs.iter().enumerate() {
            stmt.execute((
                session_id,
                &a.date,
                a.day_number,
                &a.slot,
                &a.time_start,
                &a.time_end,
                a.exam_count,
                &a.teacher_id,
                &a.grade,
                a.is_responsible as i64,
                &a.first_name,
                &a.last_name,
                &a.email,
            ))
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::Validation(format!(
                        "row {}: {} is assigned twice to day {} {}",
                        i, a.teacher_id, a.day_number, a.slot
                    ))
                } else {
                    StoreError::Db(e)
                }
            })?;
        }
    }
    if let Some(w) = wishes {
        directory::replace_wishes_in(&tx, w)?;
    }

    let final_path = saved.map(|copy| copy.final_path(session_id));
    if let Some(p) = &final_path {
        tx.execute(
            "UPDATE planning_sessions SET file_path = ? WHERE id = ?",
            (p.to_string_lossy().to_string(), session_id),
        )?;
    }
    tx.commit()?;

    if let (Some(copy), Some(p)) = (saved, &final_path) {
        if let Err(e) = std::fs::rename(&copy.staging, p) {
            // The session stands; only its saved copy is missing.
            tracing::warn!(path = %p.display(), error = %e, "could not install saved planning copy");
            conn.execute(
                "UPDATE planning_sessions SET file_path = NULL WHERE id = ?",
                [session_id],
            )?;
            return Ok((session_id, None));
        }
    }
    Ok((session_id, final_path))
}

pub fn list_sessions(conn: &Connection) -> StoreResult<Vec<SessionRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM planning_sessions ORDER BY created_at DESC, id DESC",
        SESSION_COLUMNS
    ))?;
    let rows = stmt
        .query_map([], session_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_session(conn: &Connection, session_id: i64) -> StoreResult<SessionRecord> {
    conn.query_row(
        &format!("SELECT {} FROM planning_sessions WHERE id = ?", SESSION_COLUMNS),
        [session_id],
        session_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("session", session_id.to_string()))
}

pub fn session_assignments(
    conn: &Connection,
    session_id: i64,
) -> StoreResult<Vec<AssignmentRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM planning_assignments
         WHERE session_id = ?
         ORDER BY date, session, exam_count, id",
        ASSIGNMENT_COLUMNS
    ))?;
    let rows = stmt
        .query_map([session_id], assignment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn latest_session_id(conn: &Connection) -> StoreResult<i64> {
    latest_session_id_opt(conn)?.ok_or_else(|| StoreError::not_found("session", "latest"))
}

pub fn latest_session_id_opt(conn: &Connection) -> StoreResult<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM planning_sessions ORDER BY created_at DESC, id DESC LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()?)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedSession {
    pub session_id: i64,
    pub removed_assignments: usize,
    pub file_removed: bool,
}

pub fn delete_session(conn: &Connection, session_id: i64) -> StoreResult<DeletedSession> {
    let session = get_session(conn, session_id)?;

    let tx = conn.unchecked_transaction()?;
    let removed_assignments = tx.execute(
        "DELETE FROM planning_assignments WHERE session_id = ?",
        [session_id],
    )?;
    tx.execute("DELETE FROM planning_sessions WHERE id = ?", [session_id])?;
    tx.commit()?;

    let mut file_removed = false;
    if let Some(p) = session.file_path.as_deref().map(PathBuf::from) {
        match std::fs::remove_file(&p) {
            Ok(()) => file_removed = true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %p.display(), error = %e, "could not remove saved planning file")
            }
        }
    }

    tracing::info!(session_id, removed_assignments, "planning session deleted");
    Ok(DeletedSession {
        session_id,
        removed_assignments,
        file_removed,
    })
}

// ---------------------------------------------------------------------------
// Assignment lookups
// ---------------------------------------------------------------------------

fn find_assignment(
    conn: &Connection,
    session_id: i64,
    coord: &Coordinate,
) -> StoreResult<Option<AssignmentRecord>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM planning_assignments
                 WHERE session_id = ? AND teacher_id = ? AND day_number = ?
                   AND lower(trim(session)) = lower(trim(?))",
                ASSIGNMENT_COLUMNS
            ),
            (session_id, &coord.teacher_id, coord.day, &coord.slot),
            assignment_from_row,
        )
        .optional()?)
}

fn require_assignment(
    conn: &Connection,
    session_id: i64,
    coord: &Coordinate,
) -> StoreResult<AssignmentRecord> {
    find_assignment(conn, session_id, coord)?
        .ok_or_else(|| StoreError::not_found("assignment", coord.to_string()))
}

/// Any row at the slot other than `exclude_id`; date, times and exam load are
/// shared by every teacher in a slot.
fn slot_reference(
    conn: &Connection,
    session_id: i64,
    key: &SlotKey,
    exclude_id: Option<i64>,
) -> StoreResult<Option<AssignmentRecord>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM planning_assignments
                 WHERE session_id = ? AND day_number = ?
                   AND lower(trim(session)) = lower(trim(?)) AND id <> ?
                 ORDER BY id LIMIT 1",
                ASSIGNMENT_COLUMNS
            ),
            (session_id, key.day, &key.slot, exclude_id.unwrap_or(-1)),
            assignment_from_row,
        )
        .optional()?)
}

fn teacher_rows(
    conn: &Connection,
    session_id: i64,
    teacher_id: &str,
) -> StoreResult<Vec<AssignmentRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM planning_assignments
         WHERE session_id = ? AND teacher_id = ?
         ORDER BY day_number, session, id",
        ASSIGNMENT_COLUMNS
    ))?;
    let rows = stmt
        .query_map((session_id, teacher_id), assignment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn holds_slot(rows: &[AssignmentRecord], key: &SlotKey) -> bool {
    rows.iter().any(|r| r.slot_key().same_as(key))
}

fn insert_at(
    conn: &Connection,
    session_id: i64,
    reference: &AssignmentRecord,
    who: &TeacherIdentity,
    is_responsible: bool,
) -> StoreResult<AssignmentRecord> {
    conn.execute(
        "INSERT INTO planning_assignments(session_id, date, day_number, session, time_start,
           time_end, exam_count, teacher_id, grade, is_responsible,
           teacher_first_name, teacher_last_name, teacher_email)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            session_id,
            &reference.date,
            reference.day_number,
            &reference.slot,
            &reference.time_start,
            &reference.time_end,
            reference.exam_count,
            &who.teacher_id,
            &who.grade,
            is_responsible as i64,
            &who.first_name,
            &who.last_name,
            &who.email,
        ),
    )?;
    Ok(AssignmentRecord {
        id: conn.last_insert_rowid(),
        session_id,
        date: reference.date.clone(),
        day_number: reference.day_number,
        slot: reference.slot.clone(),
        time_start: reference.time_start.clone(),
        time_end: reference.time_end.clone(),
        exam_count: reference.exam_count,
        teacher_id: who.teacher_id.clone(),
        grade: who.grade.clone(),
        is_responsible,
        first_name: who.first_name.clone(),
        last_name: who.last_name.clone(),
        email: who.email.clone(),
    })
}

// ---------------------------------------------------------------------------
// Mutations on the latest session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapOutcome {
    pub session_id: i64,
    pub changed: bool,
    pub first: AssignmentRecord,
    pub second: AssignmentRecord,
}

/// Exchanges the teacher fields of the rows at `a` and `b`. Rows are
/// addressed by surrogate id once resolved, so the natural key never holds
/// an intermediate value.
pub fn swap_teachers(conn: &Connection, a: &Coordinate, b: &Coordinate) -> StoreResult<SwapOutcome> {
    let session_id = latest_session_id(conn)?;
    let tx = conn.unchecked_transaction()?;

    let ra = require_assignment(&tx, session_id, a)?;
    let rb = require_assignment(&tx, session_id, b)?;

    if ra.id == rb.id || ra.teacher_id == rb.teacher_id {
        return Ok(SwapOutcome {
            session_id,
            changed: false,
            first: ra,
            second: rb,
        });
    }

    // Within one slot only the responsibility changes hands.
    if ra.slot_key().same_as(&rb.slot_key()) {
        let changed = ra.is_responsible != rb.is_responsible;
        if changed {
            let mut stmt =
                tx.prepare("UPDATE planning_assignments SET is_responsible = ? WHERE id = ?")?;
            stmt.execute((rb.is_responsible as i64, ra.id))?;
            stmt.execute((ra.is_responsible as i64, rb.id))?;
        }
        tx.commit()?;
        if changed {
            tracing::info!(session_id, first = %a, second = %b, "responsibility swapped");
        }
        return Ok(SwapOutcome {
            session_id,
            changed,
            first: ra,
            second: rb,
        });
    }

    if holds_slot(&teacher_rows(&tx, session_id, &ra.teacher_id)?, &rb.slot_key()) {
        return Err(StoreError::Validation(format!(
            "{} already holds day {} {}",
            ra.teacher_id, rb.day_number, rb.slot
        )));
    }
    if holds_slot(&teacher_rows(&tx, session_id, &rb.teacher_id)?, &ra.slot_key()) {
        return Err(StoreError::Validation(format!(
            "{} already holds day {} {}",
            rb.teacher_id, ra.day_number, ra.slot
        )));
    }

    {
        let mut stmt = tx.prepare(
            "UPDATE planning_assignments
             SET teacher_id = ?, grade = ?, teacher_first_name = ?, teacher_last_name = ?, teacher_email = ?
             WHERE id = ?",
        )?;
        for (row, who) in [(&ra, rb.identity()), (&rb, ra.identity())] {
            stmt.execute((
                &who.teacher_id,
                &who.grade,
                &who.first_name,
                &who.last_name,
                &who.email,
                row.id,
            ))?;
        }
    }
    tx.commit()?;

    tracing::info!(
        session_id,
        first = %a,
        second = %b,
        "teachers swapped"
    );
    Ok(SwapOutcome {
        session_id,
        changed: true,
        first: ra,
        second: rb,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveOutcome {
    pub session_id: i64,
    pub removed: AssignmentRecord,
    pub inserted: AssignmentRecord,
}

pub fn change_teacher_slot(
    conn: &Connection,
    teacher_id: &str,
    from: &SlotKey,
    to: &SlotKey,
) -> StoreResult<MoveOutcome> {
    if from.same_as(to) {
        return Err(StoreError::Validation(
            "source and destination slots are the same".into(),
        ));
    }
    let session_id = latest_session_id(conn)?;
    let tx = conn.unchecked_transaction()?;

    let source = require_assignment(
        &tx,
        session_id,
        &Coordinate {
            teacher_id: teacher_id.to_string(),
            day: from.day,
            slot: from.slot.clone(),
        },
    )?;
    let reference = slot_reference(&tx, session_id, to, Some(source.id))?
        .ok_or_else(|| StoreError::not_found("slot", to.to_string()))?;
    if holds_slot(&teacher_rows(&tx, session_id, teacher_id)?, to) {
        return Err(StoreError::Validation(format!(
            "{} already holds {}",
            teacher_id, to
        )));
    }

    tx.execute("DELETE FROM planning_assignments WHERE id = ?", [source.id])?;
    let inserted = insert_at(
        &tx,
        session_id,
        &reference,
        &source.identity(),
        source.is_responsible,
    )?;
    tx.commit()?;

    tracing::info!(session_id, teacher_id, %from, %to, "teacher moved");
    Ok(MoveOutcome {
        session_id,
        removed: source,
        inserted,
    })
}

#[derive(Debug, Clone)]
pub enum AddMode {
    Automatic,
    Manual(SlotKey),
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddWarnings {
    pub unwished_slot: bool,
    pub limit_exceeded: bool,
    pub current_count: i64,
    pub max_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOutcome {
    pub session_id: i64,
    pub assignment: AssignmentRecord,
    pub warnings: AddWarnings,
}

fn resolve_identity(
    conn: &Connection,
    held: &[AssignmentRecord],
    teacher_id: &str,
) -> StoreResult<(TeacherIdentity, Vec<String>)> {
    let entry = directory::find_teacher(conn, teacher_id)?;
    let identity = match (held.first(), &entry) {
        (Some(row), _) => row.identity(),
        (None, Some(t)) => TeacherIdentity {
            teacher_id: t.code.clone(),
            first_name: Some(t.first_name.clone()).filter(|s| !s.is_empty()),
            last_name: Some(t.last_name.clone()).filter(|s| !s.is_empty()),
            email: t.email.clone(),
            grade: t.grade_code.clone().unwrap_or_default(),
        },
        (None, None) => return Err(StoreError::not_found("teacher", teacher_id)),
    };
    let aliases = match entry {
        Some(t) => t.aliases(),
        None => {
            let mut a = vec![identity.teacher_id.clone()];
            a.extend(directory::name_aliases(
                identity.first_name.as_deref().unwrap_or(""),
                identity.last_name.as_deref().unwrap_or(""),
            ));
            a
        }
    };
    Ok((identity, aliases))
}

fn wish_slot(w: &WishEntry) -> Option<SlotKey> {
    Some(SlotKey {
        day: w.day_number()?,
        slot: w.slot_label.clone(),
    })
}

pub fn add_assignment(conn: &Connection, teacher_id: &str, mode: AddMode) -> StoreResult<AddOutcome> {
    let session_id = latest_session_id(conn)?;
    let tx = conn.unchecked_transaction()?;

    let held = teacher_rows(&tx, session_id, teacher_id)?;
    let (who, aliases) = resolve_identity(&tx, &held, teacher_id)?;
    let wishes = directory::wishes_for_aliases(&tx, &aliases)?;

    let (assignment, warnings) = match mode {
        AddMode::Automatic => {
            let mut picked = None;
            for w in &wishes {
                let Some(key) = wish_slot(w) else { continue };
                if holds_slot(&held, &key) {
                    continue;
                }
                let same_day = held.iter().filter(|r| r.day_number == key.day).count() as i64;
                if w.max_per_day.is_some_and(|max| same_day >= max) {
                    continue;
                }
                if let Some(reference) = slot_reference(&tx, session_id, &key, None)? {
                    picked = Some(reference);
                    break;
                }
            }
            let reference =
                picked.ok_or_else(|| StoreError::not_found("eligible slot", teacher_id))?;
            let row = insert_at(&tx, session_id, &reference, &who, false)?;
            let current_count = held
                .iter()
                .filter(|r| r.day_number == row.day_number)
                .count() as i64
                + 1;
            let warnings = AddWarnings {
                current_count,
                ..AddWarnings::default()
            };
            (row, warnings)
        }
        AddMode::Manual(key) => {
            let reference = slot_reference(&tx, session_id, &key, None)?
                .ok_or_else(|| StoreError::not_found("slot", key.to_string()))?;
            if holds_slot(&held, &key) {
                return Err(StoreError::Validation(format!(
                    "{} already holds {}",
                    teacher_id, key
                )));
            }
            let row = insert_at(&tx, session_id, &reference, &who, false)?;

            let unwished_slot = !wishes
                .iter()
                .filter_map(wish_slot)
                .any(|w| w.same_as(&key));
            let max_count = wishes
                .iter()
                .filter(|w| w.day_number() == Some(key.day))
                .filter_map(|w| w.max_per_day)
                .min();
            let current_count =
                held.iter().filter(|r| r.day_number == key.day).count() as i64 + 1;
            let warnings = AddWarnings {
                unwished_slot,
                limit_exceeded: max_count.is_some_and(|m| current_count > m),
                current_count,
                max_count,
            };
            (row, warnings)
        }
    };
    tx.commit()?;

    if warnings.unwished_slot || warnings.limit_exceeded {
        tracing::info!(
            session_id,
            teacher_id,
            unwished = warnings.unwished_slot,
            limit_exceeded = warnings.limit_exceeded,
            "assignment added with warnings"
        );
    } else {
        tracing::info!(session_id, teacher_id, day = assignment.day_number, slot = %assignment.slot, "assignment added");
    }
    Ok(AddOutcome {
        session_id,
        assignment,
        warnings,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedAssignment {
    pub session_id: i64,
    pub removed: AssignmentRecord,
}

pub fn delete_assignment(conn: &Connection, coord: &Coordinate) -> StoreResult<DeletedAssignment> {
    let session_id = latest_session_id(conn)?;
    let tx = conn.unchecked_transaction()?;
    let removed = require_assignment(&tx, session_id, coord)?;
    tx.execute("DELETE FROM planning_assignments WHERE id = ?", [removed.id])?;
    tx.commit()?;
    tracing::info!(session_id, assignment = %coord, "assignment deleted");
    Ok(DeletedAssignment {
        session_id,
        removed,
    })
}

// ---------------------------------------------------------------------------
// Credits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreditEntry {
    pub session_id: i64,
    pub teacher_id: String,
    pub credit: i64,
    pub updated_at: Option<String>,
}

fn resolve_session(conn: &Connection, session_id: Option<i64>) -> StoreResult<i64> {
    match session_id {
        Some(id) => get_session(conn, id).map(|s| s.id),
        None => latest_session_id(conn),
    }
}

pub fn record_credit(
    conn: &Connection,
    session_id: Option<i64>,
    teacher_id: &str,
) -> StoreResult<CreditEntry> {
    let teacher_id = teacher_id.trim();
    if teacher_id.is_empty() {
        return Err(StoreError::Validation("teacherId must not be empty".into()));
    }
    let session_id = resolve_session(conn, session_id)?;
    let now = chrono::Utc::now().to_rfc3339();

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO teacher_credits(session_id, teacher_id, credit, updated_at)
         VALUES(?, ?, 0, ?)
         ON CONFLICT(session_id, teacher_id) DO NOTHING",
        (session_id, teacher_id, &now),
    )?;
    tx.execute(
        "UPDATE teacher_credits SET credit = credit + 1, updated_at = ?
         WHERE session_id = ? AND teacher_id = ?",
        (&now, session_id, teacher_id),
    )?;
    let credit: i64 = tx.query_row(
        "SELECT credit FROM teacher_credits WHERE session_id = ? AND teacher_id = ?",
        (session_id, teacher_id),
        |r| r.get(0),
    )?;
    tx.commit()?;

    tracing::info!(session_id, teacher_id, credit, "credit recorded");
    Ok(CreditEntry {
        session_id,
        teacher_id: teacher_id.to_string(),
        credit,
        updated_at: Some(now),
    })
}

pub fn list_credits(conn: &Connection, session_id: Option<i64>) -> StoreResult<Vec<CreditEntry>> {
    let session_id = resolve_session(conn, session_id)?;
    let mut stmt = conn.prepare(
        "SELECT session_id, teacher_id, credit, updated_at
         FROM teacher_credits WHERE session_id = ?
         ORDER BY teacher_id",
    )?;
    let rows = stmt
        .query_map([session_id], |r| {
            Ok(CreditEntry {
                session_id: r.get(0)?,
                teacher_id: r.get(1)?,
                credit: r.get(2)?,
                updated_at: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Writes `TeacherId,Credits` rows, the prior-credits input of the scheduler.
pub fn export_credits(
    conn: &Connection,
    session_id: Option<i64>,
    out_path: &Path,
) -> StoreResult<usize> {
    let credits = list_credits(conn, session_id)?;
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent).map_err(StoreError::io(parent))?;
    }
    let mut w = csv::Writer::from_path(out_path)?;
    w.write_record(["TeacherId", "Credits"])?;
    for c in &credits {
        w.write_record([c.teacher_id.as_str(), c.credit.to_string().as_str()])?;
    }
    w.flush().map_err(StoreError::io(out_path))?;
    Ok(credits.len())
}
