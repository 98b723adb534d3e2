use crate::error::{StoreError, StoreResult};
use crate::fields;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TeacherEntry {
    pub code: String,
    pub last_name: String,
    pub first_name: String,
    pub abbreviation: Option<String>,
    pub email: Option<String>,
    pub grade_code: Option<String>,
    pub participates: bool,
}

impl TeacherEntry {
    fn from_json(row: &Value) -> Result<Self, String> {
        let code = fields::text(row, "code").ok_or("missing code")?;
        Ok(Self {
            code,
            last_name: fields::text(row, "lastName").unwrap_or_default(),
            first_name: fields::text(row, "firstName").unwrap_or_default(),
            abbreviation: fields::text(row, "abbreviation"),
            email: fields::text(row, "email"),
            grade_code: fields::text(row, "gradeCode"),
            participates: fields::flag(row, "participates").unwrap_or(false),
        })
    }

    /// Names under which wish files may refer to this teacher.
    pub fn aliases(&self) -> Vec<String> {
        let mut out = vec![self.code.clone()];
        if let Some(a) = &self.abbreviation {
            out.push(a.clone());
        }
        out.extend(name_aliases(&self.first_name, &self.last_name));
        out
    }
}

pub fn name_aliases(first_name: &str, last_name: &str) -> Vec<String> {
    let first = first_name.trim();
    let last = last_name.trim();
    if first.is_empty() && last.is_empty() {
        return Vec::new();
    }
    vec![
        format!("{} {}", last, first).trim().to_string(),
        format!("{} {}", first, last).trim().to_string(),
    ]
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamEntry {
    pub date: String,
    pub time_start: String,
    pub time_end: String,
    pub session_label: String,
    pub exam_type: Option<String>,
    pub semester: Option<String>,
    pub teacher: Option<String>,
    pub room_code: Option<String>,
}

impl ExamEntry {
    fn from_json(row: &Value) -> Result<Self, String> {
        Ok(Self {
            date: fields::text(row, "date").ok_or("missing date")?,
            time_start: fields::text(row, "timeStart").ok_or("missing timeStart")?,
            time_end: fields::text(row, "timeEnd").ok_or("missing timeEnd")?,
            session_label: fields::text(row, "sessionLabel").ok_or("missing sessionLabel")?,
            exam_type: fields::text(row, "examType"),
            semester: fields::text(row, "semester"),
            teacher: fields::text(row, "teacher"),
            room_code: fields::text(row, "roomCode"),
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WishEntry {
    pub id: i64,
    pub teacher: String,
    pub semester: Option<String>,
    pub session_label: Option<String>,
    pub date: Option<String>,
    pub day_label: String,
    pub slot_label: String,
    pub max_per_day: Option<i64>,
}

impl WishEntry {
    /// Day number carried by the label: "3", "Jour 3" and "J3" all mean day 3.
    pub fn day_number(&self) -> Option<i64> {
        parse_day_number(&self.day_label)
    }
}

pub fn parse_day_number(label: &str) -> Option<i64> {
    let digits: String = label
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[derive(Debug, Clone)]
pub struct WishInput {
    teacher: String,
    semester: Option<String>,
    session_label: Option<String>,
    date: Option<String>,
    day_label: String,
    slot_label: String,
    max_per_day: Option<i64>,
}

impl WishInput {
    pub fn from_json(row: &Value) -> Result<Self, String> {
        Ok(Self {
            teacher: fields::text(row, "teacher").ok_or("missing teacher")?,
            semester: fields::text(row, "semester"),
            session_label: fields::text(row, "sessionLabel"),
            date: fields::text(row, "date"),
            day_label: fields::text(row, "dayLabel").ok_or("missing dayLabel")?,
            slot_label: fields::text(row, "slotLabel").ok_or("missing slotLabel")?,
            max_per_day: fields::int(row, "maxPerDay").filter(|m| *m > 0),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFailure {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<RowFailure>,
}

/// Splits raw rows into parsed entries and per-row failures. Refuses the
/// batch outright when nothing usable remains, so callers never wipe a
/// directory in exchange for an empty one.
fn partition_rows<T>(
    what: &str,
    rows: &[Value],
    parse: impl Fn(&Value) -> Result<T, String>,
) -> StoreResult<(Vec<T>, ImportSummary)> {
    if rows.is_empty() {
        return Err(StoreError::Validation(format!("{} import is empty", what)));
    }
    let mut parsed = Vec::with_capacity(rows.len());
    let mut failures = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        match parse(row) {
            Ok(v) => parsed.push(v),
            Err(reason) => failures.push(RowFailure { index, reason }),
        }
    }
    if parsed.is_empty() {
        return Err(StoreError::Validation(format!(
            "{} import has no valid rows ({} rejected)",
            what,
            failures.len()
        )));
    }
    for f in &failures {
        tracing::warn!(what, index = f.index, reason = %f.reason, "skipping import row");
    }
    let summary = ImportSummary {
        total: rows.len(),
        succeeded: parsed.len(),
        failed: failures.len(),
        failures,
    };
    Ok((parsed, summary))
}

pub fn replace_teachers(conn: &Connection, rows: &[Value]) -> StoreResult<ImportSummary> {
    let (entries, summary) = partition_rows("teacher", rows, TeacherEntry::from_json)?;
    let now = chrono::Utc::now().to_rfc3339();

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM teachers", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO teachers(code, last_name, first_name, abbreviation, email, grade_code, participates, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(code) DO UPDATE SET
               last_name = excluded.last_name,
               first_name = excluded.first_name,
               abbreviation = excluded.abbreviation,
               email = excluded.email,
               grade_code = excluded.grade_code,
               participates = excluded.participates,
               updated_at = excluded.updated_at",
        )?;
        for t in &entries {
            stmt.execute((
                &t.code,
                &t.last_name,
                &t.first_name,
                &t.abbreviation,
                &t.email,
                &t.grade_code,
                t.participates as i64,
                &now,
            ))?;
        }
    }
    tx.commit()?;

    tracing::info!(
        inserted = summary.succeeded,
        skipped = summary.failed,
        "teacher directory replaced"
    );
    Ok(summary)
}

pub fn replace_exams(conn: &Connection, rows: &[Value]) -> StoreResult<ImportSummary> {
    let (entries, summary) = partition_rows("exam", rows, ExamEntry::from_json)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM exams", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO exams(exam_date, time_start, time_end, session_label, exam_type, semester, teacher, room_code)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for e in &entries {
            stmt.execute((
                &e.date,
                &e.time_start,
                &e.time_end,
                &e.session_label,
                &e.exam_type,
                &e.semester,
                &e.teacher,
                &e.room_code,
            ))?;
        }
    }
    tx.commit()?;

    tracing::info!(
        inserted = summary.succeeded,
        skipped = summary.failed,
        "exam directory replaced"
    );
    Ok(summary)
}

pub fn parse_wishes(rows: &[Value]) -> StoreResult<(Vec<WishInput>, ImportSummary)> {
    partition_rows("wish", rows, WishInput::from_json)
}

/// Replaces the wish directory inside the caller's transaction.
pub fn replace_wishes_in(tx: &Connection, wishes: &[WishInput]) -> rusqlite::Result<usize> {
    tx.execute("DELETE FROM teacher_wishes", [])?;
    let mut stmt = tx.prepare(
        "INSERT INTO teacher_wishes(teacher, semester, session_label, date, day_label, slot_label, max_per_day)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
    )?;
    for w in wishes {
        stmt.execute((
            &w.teacher,
            &w.semester,
            &w.session_label,
            &w.date,
            &w.day_label,
            &w.slot_label,
            w.max_per_day,
        ))?;
    }
    Ok(wishes.len())
}

pub fn replace_wishes(conn: &Connection, rows: &[Value]) -> StoreResult<ImportSummary> {
    let (wishes, summary) = parse_wishes(rows)?;
    let tx = conn.unchecked_transaction()?;
    replace_wishes_in(&tx, &wishes)?;
    tx.commit()?;
    tracing::info!(inserted = summary.succeeded, "wish directory replaced");
    Ok(summary)
}

pub fn list_teachers(conn: &Connection) -> StoreResult<Vec<TeacherEntry>> {
    let mut stmt = conn.prepare(
        "SELECT code, last_name, first_name, abbreviation, email, grade_code, participates
         FROM teachers
         ORDER BY last_name, first_name, code",
    )?;
    let rows = stmt
        .query_map([], teacher_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_teacher(conn: &Connection, code: &str) -> StoreResult<Option<TeacherEntry>> {
    Ok(conn
        .query_row(
            "SELECT code, last_name, first_name, abbreviation, email, grade_code, participates
             FROM teachers WHERE code = ?",
            [code],
            teacher_from_row,
        )
        .optional()?)
}

fn teacher_from_row(r: &rusqlite::Row) -> rusqlite::Result<TeacherEntry> {
    Ok(TeacherEntry {
        code: r.get(0)?,
        last_name: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
        first_name: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
        abbreviation: r.get(3)?,
        email: r.get(4)?,
        grade_code: r.get(5)?,
        participates: r.get::<_, i64>(6)? != 0,
    })
}

const WISH_COLUMNS: &str =
    "id, teacher, semester, session_label, date, day_label, slot_label, max_per_day";

fn wish_from_row(r: &rusqlite::Row) -> rusqlite::Result<WishEntry> {
    Ok(WishEntry {
        id: r.get(0)?,
        teacher: r.get(1)?,
        semester: r.get(2)?,
        session_label: r.get(3)?,
        date: r.get(4)?,
        day_label: r.get(5)?,
        slot_label: r.get(6)?,
        max_per_day: r.get(7)?,
    })
}

pub fn wishes_by_teacher(conn: &Connection, name: &str) -> StoreResult<Vec<WishEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM teacher_wishes WHERE teacher = ? ORDER BY day_label, slot_label",
        WISH_COLUMNS
    ))?;
    let rows = stmt
        .query_map([name], wish_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn all_wishes(conn: &Connection) -> StoreResult<Vec<WishEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM teacher_wishes ORDER BY teacher, day_label, slot_label",
        WISH_COLUMNS
    ))?;
    let rows = stmt
        .query_map([], wish_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Wishes whose teacher field matches any alias, ordered by (day number, slot).
pub fn wishes_for_aliases(conn: &Connection, aliases: &[String]) -> StoreResult<Vec<WishEntry>> {
    let wanted: Vec<String> = aliases
        .iter()
        .map(|a| a.trim().to_lowercase())
        .filter(|a| !a.is_empty())
        .collect();
    let mut out: Vec<WishEntry> = all_wishes(conn)?
        .into_iter()
        .filter(|w| wanted.contains(&w.teacher.trim().to_lowercase()))
        .collect();
    out.sort_by(|a, b| {
        a.day_number()
            .unwrap_or(i64::MAX)
            .cmp(&b.day_number().unwrap_or(i64::MAX))
            .then_with(|| a.slot_label.cmp(&b.slot_label))
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedFiles {
    pub teachers: PathBuf,
    pub exams: PathBuf,
    pub teacher_count: usize,
    pub exam_count: usize,
}

/// Writes both directories as CSV files suitable as scheduler inputs.
pub fn export_files(conn: &Connection, dir: &Path) -> StoreResult<ExportedFiles> {
    let teachers = list_teachers(conn)?;
    if teachers.is_empty() {
        return Err(StoreError::Validation(
            "teacher directory is empty; import a roster first".into(),
        ));
    }
    let mut stmt = conn.prepare(
        "SELECT exam_date, time_start, time_end, session_label, exam_type, semester, teacher, room_code
         FROM exams ORDER BY exam_date, time_start, id",
    )?;
    let exams = stmt
        .query_map([], |r| {
            Ok(ExamEntry {
                date: r.get(0)?,
                time_start: r.get(1)?,
                time_end: r.get(2)?,
                session_label: r.get(3)?,
                exam_type: r.get(4)?,
                semester: r.get(5)?,
                teacher: r.get(6)?,
                room_code: r.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    if exams.is_empty() {
        return Err(StoreError::Validation(
            "exam directory is empty; import an exam plan first".into(),
        ));
    }

    std::fs::create_dir_all(dir).map_err(StoreError::io(dir))?;

    let teachers_path = dir.join("teachers.csv");
    let mut w = csv::Writer::from_path(&teachers_path)?;
    w.write_record([
        "code",
        "last_name",
        "first_name",
        "abbreviation",
        "email",
        "grade_code",
        "participates",
    ])?;
    for t in &teachers {
        w.write_record([
            t.code.as_str(),
            t.last_name.as_str(),
            t.first_name.as_str(),
            t.abbreviation.as_deref().unwrap_or(""),
            t.email.as_deref().unwrap_or(""),
            t.grade_code.as_deref().unwrap_or(""),
            if t.participates { "TRUE" } else { "FALSE" },
        ])?;
    }
    w.flush().map_err(StoreError::io(&teachers_path))?;

    let exams_path = dir.join("exams.csv");
    let mut w = csv::Writer::from_path(&exams_path)?;
    w.write_record([
        "date",
        "time_start",
        "time_end",
        "session",
        "exam_type",
        "semester",
        "teacher",
        "room_code",
    ])?;
    for e in &exams {
        w.write_record([
            e.date.as_str(),
            e.time_start.as_str(),
            e.time_end.as_str(),
            e.session_label.as_str(),
            e.exam_type.as_deref().unwrap_or(""),
            e.semester.as_deref().unwrap_or(""),
            e.teacher.as_deref().unwrap_or(""),
            e.room_code.as_deref().unwrap_or(""),
        ])?;
    }
    w.flush().map_err(StoreError::io(&exams_path))?;

    Ok(ExportedFiles {
        teachers: teachers_path,
        exams: exams_path,
        teacher_count: teachers.len(),
        exam_count: exams.len(),
    })
}
