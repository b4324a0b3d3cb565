pub mod config;
pub mod confirm;
pub mod format;
pub mod integrity;
pub mod manager;
pub mod models;
pub mod speed;
pub mod state_manager;
pub mod storage;
pub mod transfer;

pub use format::{format_bytes, format_speed};

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::config::DownloaderConfig;
    pub use crate::confirm::{AutoConfirm, Confirm};
    pub use crate::format::{format_bytes, format_speed};
    pub use crate::manager::{DownloadError, DownloadManager, ProgressCallback};
    pub use crate::models::{DownloadOutcome, ProgressUpdate, SessionState, StorageCheckResult};
    pub use crate::state_manager::SessionStore;
}
