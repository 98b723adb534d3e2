//! The schedule mirror: a CSV copy of the active session's assignments that
//! exports and document generation read. The store stays authoritative; the
//! mirror is patched after each mutation and can be rebuilt at any time.

use crate::error::{StoreError, StoreResult};
use crate::fields;
use crate::store::{AssignmentRecord, Coordinate, TeacherIdentity};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorRow {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Day", deserialize_with = "int_cell")]
    pub day: i64,
    #[serde(rename = "Slot")]
    pub slot: String,
    #[serde(rename = "StartTime", default)]
    pub time_start: String,
    #[serde(rename = "EndTime", default)]
    pub time_end: String,
    #[serde(rename = "ExamCount", default, deserialize_with = "int_cell_or_zero")]
    pub exam_count: i64,
    #[serde(rename = "TeacherId")]
    pub teacher_id: String,
    #[serde(rename = "LastName", default)]
    pub last_name: String,
    #[serde(rename = "FirstName", default)]
    pub first_name: String,
    #[serde(rename = "Email", default)]
    pub email: String,
    #[serde(rename = "Grade", default)]
    pub grade: String,
    #[serde(
        rename = "Responsible",
        default,
        deserialize_with = "flag_cell",
        serialize_with = "write_flag"
    )]
    pub responsible: bool,
}

fn parse_int_cell(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|f| f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

fn int_cell<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let raw = String::deserialize(d)?;
    parse_int_cell(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("not a whole number: {:?}", raw)))
}

fn int_cell_or_zero<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let raw = String::deserialize(d)?;
    if raw.trim().is_empty() {
        return Ok(0);
    }
    parse_int_cell(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("not a whole number: {:?}", raw)))
}

fn flag_cell<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let raw = String::deserialize(d)?;
    fields::parse_flag(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("not a yes/no value: {:?}", raw)))
}

fn write_flag<S: Serializer>(v: &bool, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(if *v { "TRUE" } else { "FALSE" })
}

impl From<&AssignmentRecord> for MirrorRow {
    fn from(a: &AssignmentRecord) -> Self {
        Self {
            date: a.date.clone(),
            day: a.day_number,
            slot: a.slot.clone(),
            time_start: a.time_start.clone(),
            time_end: a.time_end.clone(),
            exam_count: a.exam_count,
            teacher_id: a.teacher_id.clone(),
            last_name: a.last_name.clone().unwrap_or_default(),
            first_name: a.first_name.clone().unwrap_or_default(),
            email: a.email.clone().unwrap_or_default(),
            grade: a.grade.clone(),
            responsible: a.is_responsible,
        }
    }
}

impl MirrorRow {
    fn matches(&self, key: &Coordinate) -> bool {
        self.teacher_id.trim() == key.teacher_id.trim()
            && self.day == key.day
            && self.slot.trim().eq_ignore_ascii_case(key.slot.trim())
    }

    fn take_identity(&mut self, who: &TeacherIdentity) {
        self.teacher_id = who.teacher_id.clone();
        self.first_name = who.first_name.clone().unwrap_or_default();
        self.last_name = who.last_name.clone().unwrap_or_default();
        self.email = who.email.clone().unwrap_or_default();
        self.grade = who.grade.clone();
    }
}

#[derive(Debug, Clone)]
pub enum MirrorEdit {
    /// `a_identity` is the teacher who was at `a` before the swap.
    Swap {
        a: Coordinate,
        b: Coordinate,
        a_identity: TeacherIdentity,
        b_identity: TeacherIdentity,
    },
    Move { from: Coordinate, row: MirrorRow },
    Add { row: MirrorRow },
    Remove { key: Coordinate },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MirrorSync {
    Synced { rows: usize },
    Absent,
}

pub fn read_rows(path: &Path) -> StoreResult<Vec<MirrorRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut rows = Vec::new();
    for rec in rdr.deserialize() {
        rows.push(rec?);
    }
    Ok(rows)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes next to the target and renames over it, so readers only ever see
/// a complete file.
pub fn write_rows_atomic(path: &Path, rows: &[MirrorRow]) -> StoreResult<()> {
    let tmp = tmp_path(path);
    {
        let mut w = csv::Writer::from_path(&tmp)?;
        if rows.is_empty() {
            w.write_record([
                "Date",
                "Day",
                "Slot",
                "StartTime",
                "EndTime",
                "ExamCount",
                "TeacherId",
                "LastName",
                "FirstName",
                "Email",
                "Grade",
                "Responsible",
            ])?;
        }
        for r in rows {
            w.serialize(r)?;
        }
        w.flush().map_err(StoreError::io(&tmp))?;
    }
    std::fs::rename(&tmp, path).map_err(StoreError::io(path))?;
    Ok(())
}

fn position(rows: &[MirrorRow], key: &Coordinate) -> StoreResult<usize> {
    rows.iter()
        .position(|r| r.matches(key))
        .ok_or_else(|| StoreError::not_found("mirror row", key.to_string()))
}

fn apply_in_memory(rows: &mut Vec<MirrorRow>, edit: MirrorEdit) -> StoreResult<()> {
    match edit {
        MirrorEdit::Swap {
            a,
            b,
            a_identity,
            b_identity,
        } => {
            let ia = position(rows, &a)?;
            let ib = position(rows, &b)?;
            rows[ia].take_identity(&b_identity);
            rows[ib].take_identity(&a_identity);
        }
        MirrorEdit::Move { from, row } => {
            let i = position(rows, &from)?;
            rows.remove(i);
            rows.push(row);
        }
        MirrorEdit::Add { row } => rows.push(row),
        MirrorEdit::Remove { key } => {
            let i = position(rows, &key)?;
            rows.remove(i);
        }
    }
    Ok(())
}

pub fn apply(path: &Path, edit: MirrorEdit) -> StoreResult<MirrorSync> {
    if !path.is_file() {
        return Ok(MirrorSync::Absent);
    }
    let mut rows = read_rows(path)?;
    apply_in_memory(&mut rows, edit)?;
    write_rows_atomic(path, &rows)?;
    Ok(MirrorSync::Synced { rows: rows.len() })
}

pub fn rebuild(path: &Path, assignments: &[AssignmentRecord]) -> StoreResult<usize> {
    let rows: Vec<MirrorRow> = assignments.iter().map(MirrorRow::from).collect();
    write_rows_atomic(path, &rows)?;
    tracing::info!(rows = rows.len(), path = %path.display(), "mirror rebuilt");
    Ok(rows.len())
}
