pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod paths;
pub mod progress;
pub mod reconcile;
pub mod remote;
pub mod scanner;
pub mod storage;

pub use cancel::CancelToken;
pub use config::AppConfig;
pub use engine::{RunReport, ScanEngine, StageTimings};
pub use error::Error;
pub use progress::{ProgressReporter, SilentReporter};
pub use reconcile::{reconcile, Classification, ClassifiedFile, Mismatch, ReportRule};
pub use remote::{InventorySource, RemoteInventory};
