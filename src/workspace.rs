use std::path::{Path, PathBuf};

pub const MIRROR_FILE_NAME: &str = "schedule_solution.csv";
pub const GRADE_HOURS_FILE_NAME: &str = "grade_hours.json";

/// Fixed layout of a workspace directory.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mirror(&self) -> PathBuf {
        self.root.join(MIRROR_FILE_NAME)
    }

    pub fn grade_hours(&self) -> PathBuf {
        self.root.join(GRADE_HOURS_FILE_NAME)
    }

    pub fn saved_plannings(&self) -> PathBuf {
        self.root.join("saved_plannings")
    }

    pub fn uploads(&self) -> PathBuf {
        self.root.join("uploads")
    }

    pub fn scheduler_workspace(&self) -> PathBuf {
        self.root.join("scheduler-workspace")
    }

    pub fn documents(&self) -> PathBuf {
        self.root.join("documents")
    }

    pub fn outbox(&self) -> PathBuf {
        self.root.join("outbox")
    }

    pub fn temp(&self) -> PathBuf {
        self.root.join("temp")
    }

    pub fn templates(&self) -> PathBuf {
        self.root.join("templates")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.saved_plannings(),
            self.uploads(),
            self.scheduler_workspace(),
            self.documents(),
            self.outbox(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
