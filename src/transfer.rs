use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{ETAG, IF_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Custom errors for transfer operations.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no data received for {0:?}")]
    Stalled(Duration),
    #[error("no transfer is running")]
    NotRunning,
}

/// Everything needed to pick a suspended transfer back up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeData {
    pub url: String,
    pub destination: PathBuf,
    /// Bytes already flushed to `destination`.
    pub offset: u64,
    pub expected: Option<u64>,
    /// The origin's `ETag`, replayed as `If-Range` so a changed file restarts.
    pub validator: Option<String>,
}

impl ResumeData {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            offset: 0,
            expected: None,
            validator: None,
        }
    }
}

/// A single progress tick from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_written: u64,
    pub bytes_expected: Option<u64>,
    /// Set on the tick that follows a restart below the recorded offset;
    /// `bytes_written` is the new baseline.
    pub restarted: bool,
}

pub type ProgressSink = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// How a `start` or `resume` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The origin answered and the body, if any, was fully written.
    /// Non-2xx statuses are reported here rather than as errors.
    Finished { status: u16, path: PathBuf },
    Paused,
    Cancelled,
}

/// Opaque resumable transport the download manager drives.
///
/// `start` and `resume` run until the transfer finishes, is paused or is
/// cancelled. `pause` and `cancel` return only once the running transfer
/// has stopped.
#[async_trait]
pub trait ResumableTransfer: Send + Sync {
    async fn start(
        &self,
        url: &str,
        destination: &Path,
        on_progress: ProgressSink,
    ) -> Result<TransferOutcome, TransferError>;

    async fn pause(&self) -> Result<ResumeData, TransferError>;

    async fn resume(
        &self,
        data: ResumeData,
        on_progress: ProgressSink,
    ) -> Result<TransferOutcome, TransferError>;

    async fn cancel(&self) -> Result<(), TransferError>;
}

/// Options for the HTTP transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOptions {
    /// Longest wait for response headers or the next body chunk.
    pub stall_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            user_agent: concat!("model-downloader/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Handles shared between a running transfer and `pause`/`cancel`.
#[derive(Clone)]
struct Control {
    pause: CancellationToken,
    cancel: CancellationToken,
    snapshot: Arc<Mutex<ResumeData>>,
    stopped: watch::Receiver<bool>,
}

impl Control {
    async fn wait_stopped(&self) {
        let mut stopped = self.stopped.clone();
        // A dropped sender also means the loop is gone.
        let _ = stopped.wait_for(|done| *done).await;
    }
}

/// Single-stream HTTP transport resuming with byte ranges.
pub struct HttpTransfer {
    client: Client,
    options: TransferOptions,
    control: Mutex<Option<Control>>,
}

impl HttpTransfer {
    pub fn new(options: TransferOptions) -> Result<Self, TransferError> {
        let client = Client::builder()
            .user_agent(options.user_agent.clone())
            .connect_timeout(options.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            options,
            control: Mutex::new(None),
        })
    }

    async fn run(
        &self,
        data: ResumeData,
        on_progress: ProgressSink,
    ) -> Result<TransferOutcome, TransferError> {
        let (stopped_tx, stopped_rx) = watch::channel(false);
        let control = Control {
            pause: CancellationToken::new(),
            cancel: CancellationToken::new(),
            snapshot: Arc::new(Mutex::new(data)),
            stopped: stopped_rx,
        };
        *self.control.lock() = Some(control.clone());

        let result = self.stream_to_file(&control, &on_progress).await;

        {
            let mut current = self.control.lock();
            if current
                .as_ref()
                .is_some_and(|c| Arc::ptr_eq(&c.snapshot, &control.snapshot))
            {
                *current = None;
            }
        }
        stopped_tx.send_replace(true);
        result
    }

    async fn stream_to_file(
        &self,
        control: &Control,
        on_progress: &ProgressSink,
    ) -> Result<TransferOutcome, TransferError> {
        let stall = self.options.stall_timeout;
        let mut data = control.snapshot.lock().clone();
        let recorded = data.offset;
        if data.offset > 0 {
            data.offset = reconcile_partial(&data.destination, data.offset).await?;
        }

        // Paused after the last chunk landed: nothing left to fetch, and a
        // `bytes=<len>-` range would only earn a 416.
        if data.offset > 0 && data.expected == Some(data.offset) {
            debug!("{} already complete at {} bytes", data.destination.display(), data.offset);
            *control.snapshot.lock() = data.clone();
            on_progress(TransferProgress {
                bytes_written: data.offset,
                bytes_expected: data.expected,
                restarted: false,
            });
            return Ok(TransferOutcome::Finished {
                status: StatusCode::OK.as_u16(),
                path: data.destination,
            });
        }

        let mut request = self.client.get(&data.url);
        if data.offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", data.offset));
            if let Some(validator) = &data.validator {
                request = request.header(IF_RANGE, validator.as_str());
            }
        }
        debug!("GET {} from offset {}", data.url, data.offset);

        let response = tokio::select! {
            biased;
            _ = control.cancel.cancelled() => return Ok(TransferOutcome::Cancelled),
            _ = control.pause.cancelled() => return Ok(TransferOutcome::Paused),
            sent = tokio::time::timeout(stall, request.send()) => {
                sent.map_err(|_| TransferError::Stalled(stall))??
            }
        };

        let status = response.status();
        if !status.is_success() {
            debug!("{} answered {}", data.url, status);
            return Ok(TransferOutcome::Finished {
                status: status.as_u16(),
                path: data.destination,
            });
        }

        let resuming = data.offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        if data.offset > 0 && !resuming {
            info!("server ignored the range request, restarting {} from zero", data.url);
            data.offset = 0;
        }
        data.expected = response
            .content_length()
            .map(|len| len + data.offset)
            .or(data.expected);
        data.validator = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .or(data.validator);

        if let Some(parent) = data.destination.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = if resuming {
            OpenOptions::new().append(true).open(&data.destination).await?
        } else {
            File::create(&data.destination).await?
        };
        *control.snapshot.lock() = data.clone();
        if data.offset < recorded {
            on_progress(TransferProgress {
                bytes_written: data.offset,
                bytes_expected: data.expected,
                restarted: true,
            });
        }

        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::select! {
                biased;
                _ = control.cancel.cancelled() => return Ok(TransferOutcome::Cancelled),
                _ = control.pause.cancelled() => {
                    file.flush().await?;
                    return Ok(TransferOutcome::Paused);
                }
                next = tokio::time::timeout(stall, stream.next()) => next,
            };
            let chunk = match next {
                Err(_) => {
                    file.flush().await?;
                    return Err(TransferError::Stalled(stall));
                }
                Ok(None) => break,
                Ok(Some(chunk)) => chunk?,
            };

            file.write_all(&chunk).await?;
            data.offset += chunk.len() as u64;
            control.snapshot.lock().offset = data.offset;
            on_progress(TransferProgress {
                bytes_written: data.offset,
                bytes_expected: data.expected,
                restarted: false,
            });
        }

        file.flush().await?;
        Ok(TransferOutcome::Finished {
            status: status.as_u16(),
            path: data.destination,
        })
    }
}

/// Lines the recorded offset up with what is actually on disk.
async fn reconcile_partial(path: &Path, offset: u64) -> Result<u64, TransferError> {
    let on_disk = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };
    if on_disk > offset {
        let file = OpenOptions::new().write(true).open(path).await?;
        file.set_len(offset).await?;
        return Ok(offset);
    }
    if on_disk < offset {
        info!("partial file holds {} of {} recorded bytes", on_disk, offset);
    }
    Ok(on_disk)
}

#[async_trait]
impl ResumableTransfer for HttpTransfer {
    async fn start(
        &self,
        url: &str,
        destination: &Path,
        on_progress: ProgressSink,
    ) -> Result<TransferOutcome, TransferError> {
        self.run(ResumeData::new(url, destination), on_progress).await
    }

    async fn pause(&self) -> Result<ResumeData, TransferError> {
        let control = self.control.lock().clone().ok_or(TransferError::NotRunning)?;
        control.pause.cancel();
        control.wait_stopped().await;
        let data = control.snapshot.lock().clone();
        debug!("transfer paused at {} bytes", data.offset);
        Ok(data)
    }

    async fn resume(
        &self,
        data: ResumeData,
        on_progress: ProgressSink,
    ) -> Result<TransferOutcome, TransferError> {
        self.run(data, on_progress).await
    }

    async fn cancel(&self) -> Result<(), TransferError> {
        let control = self.control.lock().clone();
        if let Some(control) = control {
            control.cancel.cancel();
            control.wait_stopped().await;
            debug!("transfer cancelled");
        }
        Ok(())
    }
}
