//! Bounded-concurrency batch downloader.
//!
//! Every feature becomes one [`FetchTask`]. Tasks are started in input order as
//! slots free up, and at most `concurrency` transfers are in flight at a time.
//! A failing task only fails itself. [`BatchFetcher::fetch_all`] returns once
//! every task reached a terminal state, with results in input order.
use crate::credentials::Credentials;
use crate::error::TransferError;
use crate::feature::Feature;
use crate::monitor::{Monitor, Phase, ProgressEvent};
use crate::retry::{with_retry, RetryPolicy};
use crate::transport::Transport;
use futures_util::{stream, StreamExt};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const DEFAULT_PROGRESS_INTERVAL: u64 = 8 * 1024 * 1024;

pub struct FetchOptions {
    pub concurrency: NonZeroUsize,
    pub credentials: Option<Credentials>,
    pub monitor: Arc<dyn Monitor>,
    pub cancel: CancellationToken,
    pub retry: RetryPolicy,
    /// Bytes between two `Progress` events of the same task
    pub progress_interval: u64,
}

impl FetchOptions {
    pub fn new(concurrency: NonZeroUsize, monitor: Arc<dyn Monitor>) -> Self {
        Self {
            concurrency,
            credentials: None,
            monitor,
            cancel: CancellationToken::new(),
            retry: RetryPolicy::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn progress_interval(mut self, bytes: u64) -> Self {
        self.progress_interval = bytes.max(1);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    InProgress,
    Done,
    Failed,
}

/// One feature on its way to `path`.
#[derive(Debug)]
pub struct FetchTask {
    index: usize,
    feature: Feature,
    path: PathBuf,
    state: TaskState,
}

impl FetchTask {
    fn new(index: usize, feature: Feature, path: PathBuf) -> Self {
        Self {
            index,
            feature,
            path,
            state: TaskState::Pending,
        }
    }

    fn transition(&mut self, next: TaskState) {
        trace!(id = %self.feature.id, from = ?self.state, to = ?next, "Task state");
        self.state = next;
    }

    fn into_result(self, status: FetchStatus) -> (usize, FetchResult) {
        let result = FetchResult {
            id: self.feature.id,
            title: self.feature.title,
            path: self.path,
            status,
        };
        (self.index, result)
    }
}

#[derive(Debug)]
pub enum FetchStatus {
    Success { bytes: u64, skipped: bool },
    Failed(TransferError),
    /// Never started because the batch was cancelled first
    Cancelled,
}

#[derive(Debug)]
pub struct FetchResult {
    pub id: String,
    pub title: String,
    pub path: PathBuf,
    pub status: FetchStatus,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, FetchStatus::Success { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, FetchStatus::Success { skipped: true, .. })
    }
}

struct Transferred {
    bytes: u64,
    skipped: bool,
}

pub struct BatchFetcher<T> {
    transport: T,
}

impl<T: Transport> BatchFetcher<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn fetch_all(
        &self,
        features: Vec<Feature>,
        destination: &Path,
        options: &FetchOptions,
    ) -> Vec<FetchResult> {
        let mut taken = HashSet::new();
        let tasks: Vec<_> = features
            .into_iter()
            .enumerate()
            .map(|(index, feature)| {
                let name = unique_file_name(&feature, &mut taken);
                FetchTask::new(index, feature, destination.join(name))
            })
            .collect();

        // buffer_unordered only pulls the next task once a slot is free
        let mut results: Vec<(usize, FetchResult)> = stream::iter(tasks)
            .map(|task| self.run_task(task, options))
            .buffer_unordered(options.concurrency.get())
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    async fn run_task(&self, mut task: FetchTask, options: &FetchOptions) -> (usize, FetchResult) {
        if options.cancel.is_cancelled() {
            debug!(id = %task.feature.id, "Batch cancelled, not starting");
            return task.into_result(FetchStatus::Cancelled);
        }

        task.transition(TaskState::InProgress);
        emit(
            options,
            &task,
            Phase::Started {
                expected_size: task.feature.size,
            },
        );

        match self.transfer(&task, options).await {
            Ok(Transferred { bytes, skipped }) => {
                task.transition(TaskState::Done);
                emit(options, &task, Phase::Done { bytes, skipped });
                task.into_result(FetchStatus::Success { bytes, skipped })
            }
            Err(e) => {
                task.transition(TaskState::Failed);
                emit(
                    options,
                    &task,
                    Phase::Failed {
                        error: e.to_string(),
                    },
                );
                task.into_result(FetchStatus::Failed(e))
            }
        }
    }

    async fn transfer(
        &self,
        task: &FetchTask,
        options: &FetchOptions,
    ) -> Result<Transferred, TransferError> {
        let expected = self.expected_size(task, options).await;

        // Skip files that are already complete
        if let Some(expected) = expected {
            if let Ok(meta) = fs::metadata(&task.path).await {
                if meta.is_file() && meta.len() == expected {
                    return Ok(Transferred {
                        bytes: expected,
                        skipped: true,
                    });
                }
                debug!(path = %task.path.display(), found = meta.len(), expected, "Replacing stale file");
            }
        }

        with_retry(&options.retry, &options.cancel, &task.feature.title, || {
            self.stream_to_disk(task, expected, options)
        })
        .await
    }

    async fn expected_size(&self, task: &FetchTask, options: &FetchOptions) -> Option<u64> {
        if task.feature.size.is_some() {
            return task.feature.size;
        }
        match self
            .transport
            .content_length(&task.feature.download_locator, options.credentials.as_ref())
            .await
        {
            Ok(size) => size,
            Err(e) => {
                debug!(id = %task.feature.id, error = %e, "Unable to determine remote size");
                None
            }
        }
    }

    async fn stream_to_disk(
        &self,
        task: &FetchTask,
        expected: Option<u64>,
        options: &FetchOptions,
    ) -> Result<Transferred, TransferError> {
        let partial = partial_path(&task.path);

        // Check if a partial file exists and get its size
        let mut offset = match fs::metadata(&partial).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if expected.is_some_and(|expected| offset > expected) {
            offset = 0;
        }
        if offset > 0 && expected == Some(offset) {
            fs::rename(&partial, &task.path).await?;
            return Ok(Transferred {
                bytes: offset,
                skipped: false,
            });
        }

        let locator = &task.feature.download_locator;
        let credentials = options.credentials.as_ref();
        let download = match self.transport.open(locator, credentials, offset).await {
            // The partial file may already hold the whole payload when its size was unknown
            Err(TransferError::Status(416)) if offset > 0 => {
                debug!(title = %task.feature.title, offset, "Range not satisfiable, restarting");
                offset = 0;
                self.transport.open(locator, credentials, 0).await?
            }
            result => result?,
        };

        let mut file = if download.resumed {
            info!(title = %task.feature.title, offset, "Resuming download");
            OpenOptions::new().append(true).open(&partial).await?
        } else {
            offset = 0;
            fs::File::create(&partial).await?
        };

        let expected = expected.or(download.content_length.map(|len| len + offset));
        let mut byte_count = offset;
        let mut last_reported = offset;
        let mut body = download.body;

        loop {
            let next = tokio::select! {
                biased;
                _ = options.cancel.cancelled() => {
                    // Keep the partial file so a later run can resume
                    file.flush().await?;
                    return Err(TransferError::Cancelled);
                }
                next = body.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            byte_count += chunk.len() as u64;

            if byte_count - last_reported >= options.progress_interval {
                emit(options, task, Phase::Progress { bytes: byte_count });
                last_reported = byte_count;
            }
        }
        file.flush().await?;
        drop(file);

        if byte_count != last_reported {
            emit(options, task, Phase::Progress { bytes: byte_count });
        }

        if let Some(expected) = expected {
            if byte_count != expected {
                if byte_count > expected {
                    // Overlong data cannot be resumed from
                    if let Err(e) = fs::remove_file(&partial).await {
                        warn!(path = %partial.display(), error = %e, "Unable to remove partial file");
                    }
                }
                return Err(TransferError::SizeMismatch {
                    expected,
                    actual: byte_count,
                });
            }
        }

        // Rename the file to remove .partial suffix
        fs::rename(&partial, &task.path).await?;

        Ok(Transferred {
            bytes: byte_count,
            skipped: false,
        })
    }
}

fn emit(options: &FetchOptions, task: &FetchTask, phase: Phase) {
    options.monitor.observe(&ProgressEvent {
        task_id: task.feature.id.clone(),
        title: task.feature.title.clone(),
        phase,
    });
}

/// The feature's file name, or the name with the id appended when an earlier
/// feature of the batch already claimed it.
fn unique_file_name(feature: &Feature, taken: &mut HashSet<String>) -> String {
    let name = feature.file_name();
    if taken.insert(name.clone()) {
        return name;
    }

    let id = feature.id.replace(['/', '\\'], "_");
    let (stem, extension) = match name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => (stem, format!(".{extension}")),
        _ => (name.as_str(), String::new()),
    };
    let mut candidate = format!("{stem}_{id}{extension}");
    let mut n = 1;
    while !taken.insert(candidate.clone()) {
        n += 1;
        candidate = format!("{stem}_{id}_{n}{extension}");
    }
    warn!(id = %feature.id, title = %feature.title, file = %candidate, "File name already used in this batch");
    candidate
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// Tally of one batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub bytes: u64,
    /// `(id, title, error)` of every failed task
    pub failures: Vec<(String, String, String)>,
}

impl BatchReport {
    pub fn from_results(results: &[FetchResult]) -> Self {
        let mut report = Self::default();
        for result in results {
            match &result.status {
                FetchStatus::Success { skipped: true, .. } => report.skipped += 1,
                FetchStatus::Success { bytes, .. } => {
                    report.downloaded += 1;
                    report.bytes += bytes;
                }
                FetchStatus::Failed(e) => {
                    report.failed += 1;
                    report.failures.push((
                        result.id.clone(),
                        result.title.clone(),
                        e.to_string(),
                    ));
                }
                FetchStatus::Cancelled => report.cancelled += 1,
            }
        }
        report
    }

    pub fn total(&self) -> usize {
        self.downloaded + self.skipped + self.failed + self.cancelled
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }

    pub fn log(&self, label: &str) {
        info!(
            label,
            downloaded = self.downloaded,
            skipped = self.skipped,
            failed = self.failed,
            cancelled = self.cancelled,
            bytes = self.bytes,
            "Batch finished"
        );
        for (id, title, error) in &self.failures {
            warn!(label, id, title, error, "Failed download");
        }
    }
}
