// src/manager.rs

use crate::config::DownloaderConfig;
use crate::confirm::Confirm;
use crate::format::format_bytes;
use crate::integrity::{self, IntegrityError};
use crate::models::{
    DownloadOutcome, DownloadSession, ProgressUpdate, SessionState, Source, StorageCheckResult,
};
use crate::speed::SpeedEstimator;
use crate::state_manager::{StateError, SessionStore};
use crate::storage::{self, Filesystem, TokioFilesystem};
use crate::transfer::{
    HttpTransfer, ProgressSink, ResumableTransfer, TransferError, TransferOutcome,
    TransferProgress,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Callback the caller hands to `download` and `resume`.
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("A download is already in progress")]
    AlreadyInProgress,
    #[error("Insufficient storage: need {}, available {}", human(.required), human(.available))]
    InsufficientStorage { required: u64, available: u64 },
    #[error("Download failed with status: {0}")]
    Status(u16),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error("{0}")]
    Transfer(#[from] TransferError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No active download")]
    NoActiveDownload,
    #[error("No paused download")]
    NoPausedDownload,
    #[error("Another download operation is in progress")]
    Busy,
    #[error("Download declined")]
    Declined,
    #[error("No mirror is configured")]
    NoMirror,
}

fn human(bytes: &u64) -> String {
    format_bytes(*bytes)
}

impl DownloadError {
    /// The origin does not have the artifact; eligible for mirror fallback.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DownloadError::Status(404))
    }
}

const OVERWRITE_TITLE: &str = "Model Exists";
const OVERWRITE_MESSAGE: &str = "A model file already exists. Do you want to re-download it?";
const MIRROR_TITLE: &str = "Download Failed";
const MIRROR_MESSAGE: &str = "Primary download link failed. Try alternative mirror?";

/// Session bookkeeping shared with the progress sink.
#[derive(Default)]
struct Slot {
    session: Option<DownloadSession>,
    /// Reported once the session has been cleared.
    last_state: SessionState,
    /// The transport has touched the destination. Until then the file
    /// there, if any, is not ours to delete.
    started: bool,
    speed: SpeedEstimator,
}

impl Slot {
    fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(self.last_state)
    }

    fn close(&mut self, state: SessionState) {
        if self.session.take().is_some() {
            self.last_state = state;
        }
    }
}

/// Drives a single resumable download of the configured artifact.
pub struct DownloadManager {
    config: DownloaderConfig,
    transfer: Arc<dyn ResumableTransfer>,
    fs: Arc<dyn Filesystem>,
    confirm: Arc<dyn Confirm>,
    store: Option<SessionStore>,
    slot: Arc<Mutex<Slot>>,
    // Serializes pause/resume/cancel; overlapping calls are rejected.
    ops: tokio::sync::Mutex<()>,
}

impl DownloadManager {
    pub fn new(
        config: DownloaderConfig,
        transfer: Arc<dyn ResumableTransfer>,
        fs: Arc<dyn Filesystem>,
        confirm: Arc<dyn Confirm>,
    ) -> Self {
        Self {
            config,
            transfer,
            fs,
            confirm,
            store: None,
            slot: Arc::new(Mutex::new(Slot::default())),
            ops: tokio::sync::Mutex::new(()),
        }
    }

    /// A manager backed by HTTP and the local filesystem.
    pub fn http(config: DownloaderConfig, confirm: Arc<dyn Confirm>) -> Result<Self, TransferError> {
        let transfer = HttpTransfer::new(config.transfer_options())?;
        Ok(Self::new(config, Arc::new(transfer), Arc::new(TokioFilesystem), confirm))
    }

    /// Persist paused sessions through `store`.
    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// State of the open session, or the last terminal state once it is gone.
    pub fn state(&self) -> SessionState {
        self.slot.lock().state()
    }

    pub fn session(&self) -> Option<DownloadSession> {
        self.slot.lock().session.clone()
    }

    /// Reloads a persisted paused session. Returns whether one was found.
    pub async fn restore(&self) -> Result<bool, StateError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let Some(mut session) = store.load().await? else {
            return Ok(false);
        };
        if session.resume.is_none() {
            warn!("discarding persisted session without resume data");
            store.clear().await?;
            return Ok(false);
        }

        let mut slot = self.slot.lock();
        if slot.state().is_open() {
            return Ok(false);
        }
        session.state = SessionState::Paused;
        info!(
            "restored paused download of {} at {} bytes",
            session.source_url, session.bytes_written
        );
        slot.session = Some(session);
        slot.started = true;
        slot.speed.reset();
        Ok(true)
    }

    /// Checks free space against the artifact size plus margin.
    pub async fn check_storage_space(&self) -> StorageCheckResult {
        let required = storage::required_bytes(self.config.expected_size, self.config.storage_margin);
        let available = self.fs.free_space(&self.config.destination).await;
        storage::evaluate(available, required)
    }

    /// Downloads the artifact, offering the mirror once if the primary 404s.
    pub async fn download(&self, on_progress: ProgressCallback, use_mirror: bool) -> DownloadOutcome {
        let mut source = if use_mirror { Source::Mirror } else { Source::Primary };
        loop {
            match self.attempt(&on_progress, source).await {
                Ok(outcome) => return outcome,
                Err(DownloadError::Declined) => return DownloadOutcome::cancelled(),
                Err(err)
                    if err.is_not_found()
                        && source == Source::Primary
                        && self.config.mirror_url.is_some() =>
                {
                    warn!("primary source not found");
                    if self.confirm.confirm(MIRROR_TITLE, MIRROR_MESSAGE).await {
                        info!("retrying from mirror");
                        source = Source::Mirror;
                        continue;
                    }
                    return DownloadOutcome::failed(err);
                }
                Err(err) => return DownloadOutcome::failed(err),
            }
        }
    }

    async fn attempt(
        &self,
        on_progress: &ProgressCallback,
        source: Source,
    ) -> Result<DownloadOutcome, DownloadError> {
        let url = self
            .config
            .url_for(source)
            .ok_or(DownloadError::NoMirror)?
            .to_string();
        self.open_session(&url, source)?;

        let result = self.fresh_transfer(&url, on_progress).await;
        self.settle(&result).await;
        result
    }

    /// Single-flight: refuses while another session is open.
    fn open_session(&self, url: &str, source: Source) -> Result<(), DownloadError> {
        let mut slot = self.slot.lock();
        if slot.state().is_open() {
            return Err(DownloadError::AlreadyInProgress);
        }
        info!("starting download from {} ({})", url, source);
        slot.session = Some(DownloadSession::new(
            url.to_string(),
            source,
            self.config.destination.clone(),
        ));
        slot.started = false;
        slot.speed.reset();
        Ok(())
    }

    async fn fresh_transfer(
        &self,
        url: &str,
        on_progress: &ProgressCallback,
    ) -> Result<DownloadOutcome, DownloadError> {
        let storage = self.check_storage_space().await;
        if !storage.has_space {
            return Err(DownloadError::InsufficientStorage {
                required: storage.required_bytes,
                available: storage.available_bytes,
            });
        }

        let destination = &self.config.destination;
        if self.fs.exists(destination).await?.exists {
            if !self.confirm.confirm(OVERWRITE_TITLE, OVERWRITE_MESSAGE).await {
                info!("keeping existing file at {}", destination.display());
                return Err(DownloadError::Declined);
            }
            // cancel() may have run while we were waiting on the prompt
            if self.state() != SessionState::Active {
                return Ok(DownloadOutcome::cancelled());
            }
            self.fs.delete(destination).await?;
        }

        {
            let mut slot = self.slot.lock();
            if slot.state() != SessionState::Active {
                return Ok(DownloadOutcome::cancelled());
            }
            slot.started = true;
        }

        let sink = self.progress_sink(on_progress.clone());
        let outcome = self.transfer.start(url, destination, sink).await?;
        self.conclude(outcome).await
    }

    /// Turns a transport outcome into the caller-facing result, verifying
    /// finished files.
    async fn conclude(&self, outcome: TransferOutcome) -> Result<DownloadOutcome, DownloadError> {
        match outcome {
            TransferOutcome::Paused => Ok(DownloadOutcome::paused()),
            TransferOutcome::Cancelled => Ok(DownloadOutcome::cancelled()),
            TransferOutcome::Finished { status, path } if (200..300).contains(&status) => {
                self.verify(&path).await?;
                info!("download verified at {}", path.display());
                Ok(DownloadOutcome::completed(path))
            }
            TransferOutcome::Finished { status, .. } => Err(DownloadError::Status(status)),
        }
    }

    async fn verify(&self, path: &Path) -> Result<(), DownloadError> {
        let info = self.fs.exists(path).await?;
        integrity::verify_size(info.size, self.config.expected_size, self.config.verify_ratio)?;
        if let Some(expected) = &self.config.sha256 {
            integrity::verify_sha256(path, expected).await?;
        }
        Ok(())
    }

    /// Applies the terminal transition for a finished attempt. Pause and
    /// cancel own their own transitions.
    async fn settle(&self, result: &Result<DownloadOutcome, DownloadError>) {
        let terminal = match result {
            Ok(outcome) if outcome.success => Some(SessionState::Completed),
            Ok(_) => None,
            Err(DownloadError::Declined) => Some(SessionState::Cancelled),
            Err(err) => {
                warn!("download failed: {}", err);
                Some(SessionState::Failed)
            }
        };
        let Some(state) = terminal else {
            return;
        };

        self.slot.lock().close(state);
        self.forget_persisted().await;
    }

    /// Wraps the caller's callback with session accounting and speed smoothing.
    fn progress_sink(&self, on_progress: ProgressCallback) -> ProgressSink {
        let slot = self.slot.clone();
        Arc::new(move |tick: TransferProgress| {
            let update = {
                let mut guard = slot.lock();
                let Slot { session, speed, .. } = &mut *guard;
                let Some(session) = session.as_mut() else {
                    return;
                };
                if session.state != SessionState::Active {
                    return;
                }
                if tick.restarted {
                    debug!("transport restarted at {} bytes", tick.bytes_written);
                    session.bytes_written = tick.bytes_written;
                    speed.rebase(tick.bytes_written, Instant::now());
                } else if tick.bytes_written < session.bytes_written {
                    return;
                }
                if tick.bytes_expected.is_some() {
                    session.bytes_expected = tick.bytes_expected;
                }
                session.bytes_written = match session.bytes_expected {
                    Some(expected) => tick.bytes_written.min(expected),
                    None => tick.bytes_written,
                };
                let rate = speed.sample(session.bytes_written);
                ProgressUpdate::new(session.bytes_written, session.bytes_expected, rate)
            };
            on_progress(update);
        })
    }

    /// Suspends the active transfer, keeping the partial file for `resume`.
    pub async fn pause(&self) -> DownloadOutcome {
        let Ok(_guard) = self.ops.try_lock() else {
            return DownloadOutcome::failed(DownloadError::Busy);
        };
        if self.state() != SessionState::Active {
            return DownloadOutcome::failed(DownloadError::NoActiveDownload);
        }

        let data = match self.transfer.pause().await {
            Ok(data) => data,
            Err(TransferError::NotRunning) => {
                return DownloadOutcome::failed(DownloadError::NoActiveDownload)
            }
            Err(e) => return DownloadOutcome::failed(DownloadError::from(e)),
        };

        let snapshot = {
            let mut slot = self.slot.lock();
            match slot.session.as_mut() {
                Some(session) if session.state == SessionState::Active => {
                    session.state = SessionState::Paused;
                    session.bytes_written = data.offset;
                    if data.expected.is_some() {
                        session.bytes_expected = data.expected;
                    }
                    session.resume = Some(data);
                    Some(session.clone())
                }
                _ => None,
            }
        };
        let Some(session) = snapshot else {
            // finished or cancelled while we were stopping it
            return DownloadOutcome::failed(DownloadError::NoActiveDownload);
        };

        info!("download paused at {} bytes", session.bytes_written);
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&session).await {
                warn!("failed to persist paused session: {}", e);
            }
        }
        DownloadOutcome::success()
    }

    /// Continues a paused transfer from its last flushed offset.
    pub async fn resume(&self, on_progress: ProgressCallback) -> DownloadOutcome {
        let data = {
            let Ok(_guard) = self.ops.try_lock() else {
                return DownloadOutcome::failed(DownloadError::Busy);
            };
            let mut slot = self.slot.lock();
            let Slot { session, speed, .. } = &mut *slot;
            let Some(session) = session
                .as_mut()
                .filter(|s| s.state == SessionState::Paused && s.resume.is_some())
            else {
                debug!("resume requested with nothing paused");
                return DownloadOutcome::failed(DownloadError::NoPausedDownload);
            };
            let Some(data) = session.resume.take() else {
                return DownloadOutcome::failed(DownloadError::NoPausedDownload);
            };
            session.state = SessionState::Active;
            session.bytes_written = data.offset;
            speed.rebase(data.offset, Instant::now());
            data
        };

        info!("resuming download at {} bytes", data.offset);
        let sink = self.progress_sink(on_progress);
        let result = match self.transfer.resume(data, sink).await {
            Ok(outcome) => self.conclude(outcome).await,
            Err(e) => Err(e.into()),
        };
        self.settle(&result).await;
        result.unwrap_or_else(DownloadOutcome::failed)
    }

    /// Aborts the open session and deletes the partial file.
    pub async fn cancel(&self) -> DownloadOutcome {
        let Ok(_guard) = self.ops.try_lock() else {
            return DownloadOutcome::failed(DownloadError::Busy);
        };
        let (destination, started) = {
            let mut slot = self.slot.lock();
            let started = slot.started;
            match slot.session.as_mut() {
                Some(session) if session.state.is_open() => {
                    // stops the progress sink before the transport winds down
                    session.state = SessionState::Cancelled;
                    (session.destination.clone(), started)
                }
                _ => return DownloadOutcome::failed(DownloadError::NoActiveDownload),
            }
        };

        if let Err(e) = self.transfer.cancel().await {
            warn!("transport did not cancel cleanly: {}", e);
        }
        if started {
            self.discard_partial(&destination).await;
        }

        self.slot.lock().close(SessionState::Cancelled);
        self.forget_persisted().await;
        info!("download cancelled");
        DownloadOutcome::success()
    }

    async fn discard_partial(&self, destination: &Path) {
        if let Err(e) = self.fs.delete(destination).await {
            warn!("failed to delete partial file {}: {}", destination.display(), e);
        }
    }

    async fn forget_persisted(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.clear().await {
                warn!("failed to clear persisted session: {}", e);
            }
        }
    }
}
