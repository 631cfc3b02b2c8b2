pub mod lifecycle;
pub mod models;
pub mod sqlite;

pub use models::{
    ActionOutcome, DeletionPolicy, FileStatus, ScanRecord, ScanRun, ScanRunSummary, Source,
    TrackedFile,
};
pub use sqlite::Database;
