//! Black-box batch processes: the scheduler that produces a schedule from the
//! uploaded inputs, the analyser that checks a planning against the roster,
//! and the document generator that fills convocation templates from the
//! current schedule. All are fire-and-wait.

use crate::error::{StoreError, StoreResult};
use crate::grade_hours::{self, GradeHours};
use crate::mirror;
use crate::workspace::WorkspacePaths;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

pub trait ProcessRunner {
    fn run(&self, spec: &ProcessSpec) -> std::io::Result<ProcessOutput>;
}

pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, spec: &ProcessSpec) -> std::io::Result<ProcessOutput> {
        let out = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .output()?;
        Ok(ProcessOutput {
            success: out.status.success(),
            code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
        })
    }
}

fn run_checked(runner: &dyn ProcessRunner, what: &str, spec: &ProcessSpec) -> StoreResult<ProcessOutput> {
    tracing::debug!(program = %spec.program, args = ?spec.args, cwd = %spec.cwd.display(), "starting {}", what);
    let out = runner.run(spec).map_err(|e| StoreError::ExternalProcess {
        message: format!("failed to start {}: {}", what, e),
        stderr: String::new(),
    })?;
    if !out.success {
        let status = out
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        tracing::warn!(status = %status, "{} failed", what);
        return Err(StoreError::ExternalProcess {
            message: format!("{} exited with status {}", what, status),
            stderr: out.stderr,
        });
    }
    Ok(out)
}

fn copy_into(src: &Path, dst: &Path) -> StoreResult<()> {
    if src == dst {
        return Ok(());
    }
    std::fs::copy(src, dst).map_err(StoreError::io(dst))?;
    Ok(())
}

fn require_file(what: &str, path: &Path) -> StoreResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(StoreError::MissingInput {
            what: what.to_string(),
            searched: vec![path.to_path_buf()],
        })
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub output_file_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            output_file_name: crate::workspace::MIRROR_FILE_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerInputs {
    pub teachers: PathBuf,
    pub wishes: PathBuf,
    pub exams: PathBuf,
    pub credits: Option<PathBuf>,
    pub grade_hours: Option<GradeHours>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerRun {
    pub output_file: PathBuf,
    pub row_count: usize,
    pub logs: String,
}

/// Input file name inside the scheduler workspace, keeping the source extension.
fn staged_name(stem: &str, src: &Path) -> String {
    match src.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem.to_string(),
    }
}

pub fn run_scheduler(
    runner: &dyn ProcessRunner,
    cfg: &SchedulerConfig,
    paths: &WorkspacePaths,
    inputs: &SchedulerInputs,
) -> StoreResult<SchedulerRun> {
    if cfg.command.trim().is_empty() {
        return Err(StoreError::Validation(
            "scheduler command is not configured".into(),
        ));
    }
    require_file("teacher roster", &inputs.teachers)?;
    require_file("wishes file", &inputs.wishes)?;
    require_file("exam list", &inputs.exams)?;
    if let Some(c) = &inputs.credits {
        require_file("credits file", c)?;
    }

    let dir = paths.scheduler_workspace();
    std::fs::create_dir_all(&dir).map_err(StoreError::io(&dir))?;
    copy_into(&inputs.teachers, &dir.join(staged_name("teachers", &inputs.teachers)))?;
    copy_into(&inputs.wishes, &dir.join(staged_name("wishes", &inputs.wishes)))?;
    copy_into(&inputs.exams, &dir.join(staged_name("exams", &inputs.exams)))?;

    let mut args = cfg.args.clone();
    if let Some(h) = inputs.grade_hours.as_ref().filter(|h| !h.is_empty()) {
        args.push("--grade-hours".to_string());
        args.push(grade_hours::to_json(h).to_string());
    }
    if let Some(c) = &inputs.credits {
        let name = staged_name("credits", c);
        copy_into(c, &dir.join(&name))?;
        args.push("--credits-file".to_string());
        args.push(name);
    }

    let output_file = dir.join(&cfg.output_file_name);
    match std::fs::remove_file(&output_file) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(StoreError::io(&output_file)(e)),
    }

    let spec = ProcessSpec {
        program: cfg.command.clone(),
        args,
        cwd: dir.clone(),
    };
    let out = run_checked(runner, "scheduler", &spec)?;

    if !output_file.is_file() {
        return Err(StoreError::ExternalProcess {
            message: format!(
                "scheduler did not produce {}",
                output_file.to_string_lossy()
            ),
            stderr: out.stderr,
        });
    }
    let rows = mirror::read_rows(&output_file).map_err(|e| StoreError::ExternalProcess {
        message: format!("scheduler output is not a schedule: {}", e),
        stderr: out.stderr.clone(),
    })?;
    mirror::write_rows_atomic(&paths.mirror(), &rows)?;

    tracing::info!(rows = rows.len(), "scheduler run installed as current schedule");
    Ok(SchedulerRun {
        output_file: paths.mirror(),
        row_count: rows.len(),
        logs: out.stdout,
    })
}

// ---------------------------------------------------------------------------
// Analyser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct AnalysisConfig {
    pub command: String,
    pub args: Vec<String>,
}

/// Tolerated gaps between consecutive grades' surveillance loads. A gap left
/// unset is passed as `null` and the analyser applies its own default.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GradeGaps {
    pub first_to_second: Option<f64>,
    pub second_to_third: Option<f64>,
    pub third_to_fourth: Option<f64>,
}

impl GradeGaps {
    fn args(&self) -> [String; 3] {
        [self.first_to_second, self.second_to_third, self.third_to_fourth]
            .map(|g| g.map(|v| v.to_string()).unwrap_or_else(|| "null".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisInputs {
    pub teachers: PathBuf,
    pub planning: PathBuf,
    pub gaps: GradeGaps,
}

/// Runs the analyser as `<args> <teachers> <planning> <gap> <gap> <gap>` and
/// returns the JSON report it prints.
pub fn run_analysis(
    runner: &dyn ProcessRunner,
    cfg: &AnalysisConfig,
    paths: &WorkspacePaths,
    inputs: &AnalysisInputs,
) -> StoreResult<serde_json::Value> {
    if cfg.command.trim().is_empty() {
        return Err(StoreError::Validation(
            "analysis command is not configured".into(),
        ));
    }
    require_file("teacher roster", &inputs.teachers)?;
    require_file("planning", &inputs.planning)?;

    let dir = paths.scheduler_workspace();
    std::fs::create_dir_all(&dir).map_err(StoreError::io(&dir))?;

    let mut args = cfg.args.clone();
    args.push(inputs.teachers.to_string_lossy().to_string());
    args.push(inputs.planning.to_string_lossy().to_string());
    args.extend(inputs.gaps.args());

    let spec = ProcessSpec {
        program: cfg.command.clone(),
        args,
        cwd: dir,
    };
    let out = run_checked(runner, "analysis", &spec)?;
    let report: serde_json::Value =
        serde_json::from_str(out.stdout.trim()).map_err(|e| StoreError::ExternalProcess {
            message: format!("analysis printed invalid JSON: {}", e),
            stderr: out.stderr.clone(),
        })?;
    tracing::info!(planning = %inputs.planning.display(), "surveillance analysis finished");
    Ok(report)
}

// ---------------------------------------------------------------------------
// Document generator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DocumentsConfig {
    pub command: String,
    pub args: Vec<String>,
    pub templates_dir: Option<PathBuf>,
    pub roster_file_name: String,
    pub teacher_template: String,
    pub global_templates: Vec<String>,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            templates_dir: None,
            roster_file_name: "teachers.csv".to_string(),
            teacher_template: "convocation.docx".to_string(),
            global_templates: vec![
                "convocation.docx".to_string(),
                "teachers_by_slot.docx".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub enum DocumentTarget {
    Global,
    Teacher(String),
}

/// Places a teacher roster may have been left, in lookup order.
pub fn roster_candidates(cfg: &DocumentsConfig, paths: &WorkspacePaths) -> Vec<PathBuf> {
    let templates = cfg
        .templates_dir
        .clone()
        .unwrap_or_else(|| paths.templates());
    [
        paths.uploads(),
        paths.root().to_path_buf(),
        templates,
        paths.scheduler_workspace(),
        paths.temp(),
    ]
    .into_iter()
    .map(|d| d.join(&cfg.roster_file_name))
    .collect()
}

pub fn generate_documents(
    runner: &dyn ProcessRunner,
    cfg: &DocumentsConfig,
    paths: &WorkspacePaths,
    target: &DocumentTarget,
) -> StoreResult<serde_json::Value> {
    let schedule = paths.mirror();
    require_file("current schedule", &schedule)?;
    if cfg.command.trim().is_empty() {
        return Err(StoreError::Validation(
            "document generator command is not configured".into(),
        ));
    }

    let candidates = roster_candidates(cfg, paths);
    let Some(roster) = candidates.iter().find(|p| p.is_file()) else {
        return Err(StoreError::MissingInput {
            what: "teacher roster".to_string(),
            searched: candidates,
        });
    };

    let dir = paths.documents();
    std::fs::create_dir_all(&dir).map_err(StoreError::io(&dir))?;
    let staged_schedule = dir.join(crate::workspace::MIRROR_FILE_NAME);
    copy_into(&schedule, &staged_schedule)?;
    copy_into(roster, &dir.join(&cfg.roster_file_name))?;

    let templates_dir = cfg
        .templates_dir
        .clone()
        .unwrap_or_else(|| paths.templates());
    let templates: Vec<&str> = match target {
        DocumentTarget::Global => cfg.global_templates.iter().map(String::as_str).collect(),
        DocumentTarget::Teacher(_) => vec![cfg.teacher_template.as_str()],
    };
    for t in templates {
        let src = templates_dir.join(t);
        require_file(&format!("template {}", t), &src)?;
        copy_into(&src, &dir.join(t))?;
    }

    let mut args = cfg.args.clone();
    let schedule_arg = staged_schedule.to_string_lossy().to_string();
    match target {
        DocumentTarget::Global => {
            args.push("global".to_string());
            args.push(schedule_arg);
        }
        DocumentTarget::Teacher(id) => {
            args.push("teacher".to_string());
            args.push(schedule_arg);
            args.push(id.clone());
        }
    }

    let spec = ProcessSpec {
        program: cfg.command.clone(),
        args,
        cwd: dir,
    };
    let out = run_checked(runner, "document generator", &spec)?;
    let result: serde_json::Value =
        serde_json::from_str(out.stdout.trim()).map_err(|e| StoreError::ExternalProcess {
            message: format!("document generator printed invalid JSON: {}", e),
            stderr: out.stderr.clone(),
        })?;
    tracing::info!(kind = ?target, "documents generated");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Scripted {
        calls: RefCell<Vec<ProcessSpec>>,
        reply: ProcessOutput,
        write: Option<(String, String)>,
    }

    impl ProcessRunner for Scripted {
        fn run(&self, spec: &ProcessSpec) -> std::io::Result<ProcessOutput> {
            self.calls.borrow_mut().push(spec.clone());
            if let Some((name, body)) = &self.write {
                std::fs::write(spec.cwd.join(name), body)?;
            }
            Ok(self.reply.clone())
        }
    }

    fn reply(success: bool, stdout: &str, stderr: &str) -> ProcessOutput {
        ProcessOutput {
            success,
            code: Some(if success { 0 } else { 2 }),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    fn inputs(dir: &Path) -> SchedulerInputs {
        for name in ["t.xlsx", "w.xlsx", "e.xlsx"] {
            std::fs::write(dir.join(name), b"x").expect("write input");
        }
        SchedulerInputs {
            teachers: dir.join("t.xlsx"),
            wishes: dir.join("w.xlsx"),
            exams: dir.join("e.xlsx"),
            credits: None,
            grade_hours: Some(GradeHours::from([("PR".to_string(), 12.0)])),
        }
    }

    #[test]
    fn scheduler_failure_carries_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = WorkspacePaths::new(dir.path().join("ws"));
        let runner = Scripted {
            calls: RefCell::new(Vec::new()),
            reply: reply(false, "", "infeasible model"),
            write: None,
        };
        let cfg = SchedulerConfig {
            command: "solver".into(),
            ..SchedulerConfig::default()
        };
        let err = run_scheduler(&runner, &cfg, &paths, &inputs(dir.path())).unwrap_err();
        match err {
            StoreError::ExternalProcess { stderr, .. } => assert_eq!(stderr, "infeasible model"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!paths.mirror().exists());

        let calls = runner.calls.borrow();
        assert_eq!(calls[0].args, vec!["--grade-hours", r#"{"PR":12.0}"#]);
        assert!(paths.scheduler_workspace().join("teachers.xlsx").is_file());
    }

    #[test]
    fn scheduler_output_becomes_the_mirror() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = WorkspacePaths::new(dir.path().join("ws"));
        let runner = Scripted {
            calls: RefCell::new(Vec::new()),
            reply: reply(true, "solved\n", ""),
            write: Some((
                "schedule_solution.csv".into(),
                "Date,Day,Slot,TeacherId\n2024-01-15,1,Morning,T1\n".into(),
            )),
        };
        let cfg = SchedulerConfig {
            command: "solver".into(),
            ..SchedulerConfig::default()
        };
        let run = run_scheduler(&runner, &cfg, &paths, &inputs(dir.path())).expect("run");
        assert_eq!(run.row_count, 1);
        assert_eq!(run.logs, "solved\n");
        let rows = mirror::read_rows(&paths.mirror()).expect("mirror");
        assert_eq!(rows[0].teacher_id, "T1");
    }

    #[test]
    fn missing_roster_lists_every_searched_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = WorkspacePaths::new(dir.path());
        std::fs::write(paths.mirror(), "Date,Day,Slot,TeacherId\n").expect("mirror");
        let runner = Scripted {
            calls: RefCell::new(Vec::new()),
            reply: reply(true, "{}", ""),
            write: None,
        };
        let cfg = DocumentsConfig {
            command: "docgen".into(),
            ..DocumentsConfig::default()
        };
        let err = generate_documents(&runner, &cfg, &paths, &DocumentTarget::Global).unwrap_err();
        match err {
            StoreError::MissingInput { searched, .. } => assert_eq!(searched.len(), 5),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn analysis_passes_unset_gaps_as_null_and_parses_the_report() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = WorkspacePaths::new(dir.path().join("ws"));
        let teachers = dir.path().join("teachers.xlsx");
        let planning = dir.path().join("planning.csv");
        std::fs::write(&teachers, b"x").expect("teachers");
        std::fs::write(&planning, b"x").expect("planning");
        let runner = Scripted {
            calls: RefCell::new(Vec::new()),
            reply: reply(true, "{\"imbalanced\": [\"T2\"]}\n", ""),
            write: None,
        };
        let cfg = AnalysisConfig {
            command: "analyse".into(),
            args: vec!["analyse.py".into()],
        };
        let inputs = AnalysisInputs {
            teachers: teachers.clone(),
            planning: planning.clone(),
            gaps: GradeGaps {
                first_to_second: Some(2.0),
                second_to_third: None,
                third_to_fourth: Some(1.5),
            },
        };
        let report = run_analysis(&runner, &cfg, &paths, &inputs).expect("analysis");
        assert_eq!(report["imbalanced"][0], "T2");

        let calls = runner.calls.borrow();
        assert_eq!(
            calls[0].args,
            vec![
                "analyse.py".to_string(),
                teachers.to_string_lossy().to_string(),
                planning.to_string_lossy().to_string(),
                "2".to_string(),
                "null".to_string(),
                "1.5".to_string(),
            ]
        );
        assert_eq!(calls[0].cwd, paths.scheduler_workspace());
    }

    #[test]
    fn analysis_output_that_is_not_json_is_a_process_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = WorkspacePaths::new(dir.path().join("ws"));
        let teachers = dir.path().join("teachers.xlsx");
        let planning = dir.path().join("planning.csv");
        std::fs::write(&teachers, b"x").expect("teachers");
        std::fs::write(&planning, b"x").expect("planning");
        let runner = Scripted {
            calls: RefCell::new(Vec::new()),
            reply: reply(true, "Traceback (most recent call last):", "warning: slow"),
            write: None,
        };
        let cfg = AnalysisConfig {
            command: "analyse".into(),
            args: Vec::new(),
        };
        let inputs = AnalysisInputs {
            teachers,
            planning: planning.clone(),
            gaps: GradeGaps::default(),
        };
        match run_analysis(&runner, &cfg, &paths, &inputs).unwrap_err() {
            StoreError::ExternalProcess { stderr, .. } => assert_eq!(stderr, "warning: slow"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(runner.calls.borrow()[0].args[2..], ["null", "null", "null"]);

        std::fs::remove_file(&planning).expect("drop planning");
        match run_analysis(&runner, &cfg, &paths, &inputs).unwrap_err() {
            StoreError::MissingInput { searched, .. } => assert_eq!(searched, vec![planning]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(runner.calls.borrow().len(), 1);
    }
}
