use crate::store::{AssignmentRecord, SessionRecord};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub slot_hours: f64,
    /// Overrides keyed by lower-cased slot label.
    pub slot_hours_by_label: HashMap<String, f64>,
    pub top_teacher_count: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            slot_hours: 3.0,
            slot_hours_by_label: HashMap::new(),
            top_teacher_count: 5,
        }
    }
}

impl DashboardConfig {
    pub fn hours_for(&self, slot: &str) -> f64 {
        self.slot_hours_by_label
            .get(&slot.trim().to_lowercase())
            .copied()
            .unwrap_or(self.slot_hours)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_assignments: usize,
    pub unique_teachers: usize,
    pub total_days: usize,
    pub teachers_with_responsibility: usize,
    pub total_hours: f64,
    pub exam_load: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeStats {
    pub grade: String,
    pub teacher_count: usize,
    pub total_assignments: usize,
    pub responsible_count: usize,
    pub total_hours: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherLoad {
    pub teacher_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub grade: String,
    pub assignment_count: usize,
    pub total_hours: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayStats {
    pub date: String,
    pub day_number: i64,
    pub teacher_count: usize,
    pub assignment_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotStats {
    pub slot: String,
    pub count: usize,
    pub unique_teachers: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamLoadStats {
    pub exam_count: i64,
    pub usage_count: usize,
    pub days_used: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub has_data: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overview: Option<Overview>,
    pub stats_by_grade: Vec<GradeStats>,
    pub top_teachers: Vec<TeacherLoad>,
    pub assignments_by_day: Vec<DayStats>,
    pub assignments_by_slot: Vec<SlotStats>,
    pub exam_stats: Vec<ExamLoadStats>,
}

impl Dashboard {
    pub fn empty() -> Self {
        Self {
            has_data: false,
            session: None,
            overview: None,
            stats_by_grade: Vec::new(),
            top_teachers: Vec::new(),
            assignments_by_day: Vec::new(),
            assignments_by_slot: Vec::new(),
            exam_stats: Vec::new(),
        }
    }
}

const EXAM_STATS_LIMIT: usize = 10;

pub fn summarize(
    session: SessionRecord,
    rows: &[AssignmentRecord],
    cfg: &DashboardConfig,
) -> Dashboard {
    let teachers: BTreeSet<&str> = rows.iter().map(|r| r.teacher_id.as_str()).collect();
    let days: BTreeSet<&str> = rows.iter().map(|r| r.date.as_str()).collect();
    let responsible: BTreeSet<&str> = rows
        .iter()
        .filter(|r| r.is_responsible)
        .map(|r| r.teacher_id.as_str())
        .collect();
    let overview = Overview {
        total_assignments: rows.len(),
        unique_teachers: teachers.len(),
        total_days: days.len(),
        teachers_with_responsibility: responsible.len(),
        total_hours: rows.iter().map(|r| cfg.hours_for(&r.slot)).sum(),
        exam_load: rows.iter().map(|r| r.exam_count).sum(),
    };

    let mut by_grade: BTreeMap<&str, (BTreeSet<&str>, usize, usize, f64)> = BTreeMap::new();
    for r in rows {
        let e = by_grade.entry(r.grade.as_str()).or_default();
        e.0.insert(r.teacher_id.as_str());
        e.1 += 1;
        if r.is_responsible {
            e.2 += 1;
        }
        e.3 += cfg.hours_for(&r.slot);
    }
    let stats_by_grade = by_grade
        .into_iter()
        .map(|(grade, (t, n, resp, hours))| GradeStats {
            grade: grade.to_string(),
            teacher_count: t.len(),
            total_assignments: n,
            responsible_count: resp,
            total_hours: hours,
        })
        .collect();

    let mut by_teacher: BTreeMap<&str, TeacherLoad> = BTreeMap::new();
    for r in rows {
        let e = by_teacher
            .entry(r.teacher_id.as_str())
            .or_insert_with(|| TeacherLoad {
                teacher_id: r.teacher_id.clone(),
                first_name: r.first_name.clone(),
                last_name: r.last_name.clone(),
                email: r.email.clone(),
                grade: r.grade.clone(),
                assignment_count: 0,
                total_hours: 0.0,
            });
        e.assignment_count += 1;
        e.total_hours += cfg.hours_for(&r.slot);
    }
    let mut top_teachers: Vec<TeacherLoad> = by_teacher.into_values().collect();
    // Stable sort keeps teacher-id order among equal counts.
    top_teachers.sort_by(|a, b| b.assignment_count.cmp(&a.assignment_count));
    top_teachers.truncate(cfg.top_teacher_count);

    let mut by_day: BTreeMap<(i64, &str), (BTreeSet<&str>, usize)> = BTreeMap::new();
    for r in rows {
        let e = by_day.entry((r.day_number, r.date.as_str())).or_default();
        e.0.insert(r.teacher_id.as_str());
        e.1 += 1;
    }
    let assignments_by_day = by_day
        .into_iter()
        .map(|((day_number, date), (t, n))| DayStats {
            date: date.to_string(),
            day_number,
            teacher_count: t.len(),
            assignment_count: n,
        })
        .collect();

    let mut by_slot: BTreeMap<&str, (BTreeSet<&str>, usize)> = BTreeMap::new();
    for r in rows {
        let e = by_slot.entry(r.slot.as_str()).or_default();
        e.0.insert(r.teacher_id.as_str());
        e.1 += 1;
    }
    let assignments_by_slot = by_slot
        .into_iter()
        .map(|(slot, (t, n))| SlotStats {
            slot: slot.to_string(),
            count: n,
            unique_teachers: t.len(),
        })
        .collect();

    let mut by_load: BTreeMap<i64, (BTreeSet<&str>, usize)> = BTreeMap::new();
    for r in rows {
        let e = by_load.entry(r.exam_count).or_default();
        e.0.insert(r.date.as_str());
        e.1 += 1;
    }
    let mut exam_stats: Vec<ExamLoadStats> = by_load
        .into_iter()
        .map(|(exam_count, (d, n))| ExamLoadStats {
            exam_count,
            usage_count: n,
            days_used: d.len(),
        })
        .collect();
    exam_stats.sort_by(|a, b| b.usage_count.cmp(&a.usage_count));
    exam_stats.truncate(EXAM_STATS_LIMIT);

    Dashboard {
        has_data: true,
        session: Some(session),
        overview: Some(overview),
        stats_by_grade,
        top_teachers,
        assignments_by_day,
        assignments_by_slot,
        exam_stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionRecord {
        SessionRecord {
            id: 1,
            name: "Fall_Final_S1_2024".into(),
            session_type: "Final".into(),
            semester: "S1".into(),
            year: 2024,
            created_at: "2024-01-10 09:00:00.000".into(),
            file_path: None,
            total_assignments: 0,
            teachers_count: 0,
            exams_count: 0,
        }
    }

    fn a(teacher: &str, grade: &str, day: i64, slot: &str, load: i64, resp: bool) -> AssignmentRecord {
        AssignmentRecord {
            id: 0,
            session_id: 1,
            date: format!("2024-01-{:02}", 14 + day),
            day_number: day,
            slot: slot.into(),
            time_start: "08:30".into(),
            time_end: "11:30".into(),
            exam_count: load,
            teacher_id: teacher.into(),
            grade: grade.into(),
            is_responsible: resp,
            first_name: None,
            last_name: None,
            email: None,
        }
    }

    #[test]
    fn overview_counts_distinct_teachers_and_days() {
        let rows = vec![
            a("T1", "PR", 1, "Morning", 3, true),
            a("T1", "PR", 1, "Afternoon", 2, false),
            a("T1", "PR", 2, "Morning", 3, false),
        ];
        let d = summarize(session(), &rows, &DashboardConfig::default());
        let o = d.overview.expect("overview");
        assert_eq!(o.total_assignments, 3);
        assert_eq!(o.unique_teachers, 1);
        assert_eq!(o.total_days, 2);
        assert_eq!(o.teachers_with_responsibility, 1);
        assert_eq!(o.total_hours, 9.0);
        assert_eq!(o.exam_load, 8);
        assert_eq!(d.exam_stats[0].exam_count, 3);
        assert_eq!(d.exam_stats[0].usage_count, 2);
    }

    #[test]
    fn slot_duration_overrides_apply_per_label() {
        let mut cfg = DashboardConfig::default();
        cfg.slot_hours_by_label.insert("afternoon".into(), 2.0);
        let rows = vec![
            a("T1", "PR", 1, "Morning", 1, false),
            a("T2", "MA", 1, "Afternoon", 1, false),
        ];
        let d = summarize(session(), &rows, &cfg);
        assert_eq!(d.overview.expect("overview").total_hours, 5.0);
        let ma = d
            .stats_by_grade
            .iter()
            .find(|g| g.grade == "MA")
            .expect("MA grade");
        assert_eq!(ma.total_hours, 2.0);
    }

    #[test]
    fn top_teachers_are_truncated_and_ordered_by_load() {
        let cfg = DashboardConfig {
            top_teacher_count: 2,
            ..DashboardConfig::default()
        };
        let rows = vec![
            a("T1", "PR", 1, "Morning", 1, false),
            a("T2", "PR", 1, "Morning", 1, false),
            a("T2", "PR", 2, "Morning", 1, false),
            a("T3", "PR", 1, "Afternoon", 1, false),
        ];
        let d = summarize(session(), &rows, &cfg);
        let ids: Vec<_> = d.top_teachers.iter().map(|t| t.teacher_id.as_str()).collect();
        assert_eq!(ids, vec!["T2", "T1"]);
    }
}
