pub mod assignments;
pub mod backup;
pub mod core;
pub mod dashboard;
pub mod directory;
pub mod documents;
pub mod schedule;
pub mod sessions;
pub mod setup;
