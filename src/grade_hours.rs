//! Required surveillance hours per grade, kept in the store and mirrored to
//! `grade_hours.json` for the scheduler.

use crate::error::{StoreError, StoreResult};
use rusqlite::Connection;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

pub type GradeHours = BTreeMap<String, f64>;

pub fn parse(value: &Value) -> StoreResult<GradeHours> {
    let obj = value
        .as_object()
        .ok_or_else(|| StoreError::Validation("grade hours must be an object".into()))?;
    let mut out = GradeHours::new();
    for (grade, hours) in obj {
        let grade = grade.trim();
        if grade.is_empty() {
            return Err(StoreError::Validation("grade code must not be empty".into()));
        }
        let hours = hours
            .as_f64()
            .or_else(|| hours.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
            .ok_or_else(|| StoreError::Validation(format!("hours for {} must be a number", grade)))?;
        if !hours.is_finite() || hours < 0.0 {
            return Err(StoreError::Validation(format!(
                "hours for {} must be a non-negative number",
                grade
            )));
        }
        out.insert(grade.to_string(), hours);
    }
    Ok(out)
}

pub fn to_json(hours: &GradeHours) -> Value {
    let mut obj = Map::new();
    for (k, v) in hours {
        obj.insert(k.clone(), Value::from(*v));
    }
    Value::Object(obj)
}

pub fn load(conn: &Connection) -> StoreResult<GradeHours> {
    let mut stmt = conn.prepare("SELECT grade_code, hours FROM grade_hours ORDER BY grade_code")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?)))?
        .collect::<Result<GradeHours, _>>()?;
    Ok(rows)
}

pub fn replace(conn: &Connection, hours: &GradeHours) -> StoreResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM grade_hours", [])?;
    {
        let mut stmt = tx.prepare("INSERT INTO grade_hours(grade_code, hours) VALUES(?, ?)")?;
        for (grade, h) in hours {
            stmt.execute((grade, h))?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn read_file(path: &Path) -> StoreResult<Option<GradeHours>> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path)(e)),
    };
    let value: Value = serde_json::from_str(&text)?;
    parse(&value).map(Some)
}

pub fn write_file(path: &Path, hours: &GradeHours) -> StoreResult<()> {
    let tmp = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(&to_json(hours))?;
    std::fs::write(&tmp, text).map_err(StoreError::io(&tmp))?;
    std::fs::rename(&tmp, path).map_err(StoreError::io(path))?;
    Ok(())
}

/// Store rows first; the file only when the store has none.
pub fn current(conn: &Connection, file: &Path) -> StoreResult<(GradeHours, &'static str)> {
    let stored = load(conn)?;
    if !stored.is_empty() {
        return Ok((stored, "store"));
    }
    match read_file(file)? {
        Some(h) => Ok((h, "file")),
        None => Ok((GradeHours::new(), "none")),
    }
}

pub fn save(conn: &Connection, file: &Path, hours: &GradeHours) -> StoreResult<()> {
    replace(conn, hours)?;
    write_file(file, hours)?;
    tracing::info!(grades = hours.len(), "grade hours saved");
    Ok(())
}
