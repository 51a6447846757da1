//! 下载主流程：断点探测 → 登记任务 → 封面 → 逐章拉取落盘。
//!
//! 每个任务一条线程，章节严格按序号递增写入。暂停/停止由注册表状态驱动，
//! worker 在每章开始前和每次拉取返回后检查。

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::models::{DownloadInfo, DownloadState, WorkerOutcome};
use super::progress::EtaEstimator;
use super::registry::{JobHandle, JobRegistry};
use crate::base_system::context::Config;
use crate::base_system::job_id::BookKey;
use crate::provider::BookRecord;
use crate::repository::{RepoError, Repository};
use crate::storage::{ChapterRecord, ChapterStore, StoreError};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("chapter {index} still failing after {attempts} attempts")]
    RetriesExhausted { index: usize, attempts: u32 },
    #[error("download worker panicked: {0}")]
    Panicked(String),
}

/// 从 [`Config`] 摘出的下载参数。
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub min_chapter_bytes: u64,
    pub retry_backoff: Duration,
    /// 0 表示不限次数
    pub max_fetch_attempts: u32,
    pub pause_poll: Duration,
    pub cover_backoff: Duration,
    pub resume_rewind: usize,
}

impl From<&Config> for DownloadOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            min_chapter_bytes: cfg.min_chapter_bytes,
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
            max_fetch_attempts: cfg.max_fetch_attempts,
            pause_poll: Duration::from_millis(cfg.pause_poll_ms),
            cover_backoff: Duration::from_millis(cfg.cover_backoff_ms),
            resume_rewind: cfg.resume_rewind,
        }
    }
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

pub struct Downloader {
    options: DownloadOptions,
    registry: Arc<JobRegistry>,
    store: Arc<dyn ChapterStore>,
}

impl Downloader {
    pub fn new(
        options: DownloadOptions,
        registry: Arc<JobRegistry>,
        store: Arc<dyn ChapterStore>,
    ) -> Self {
        Self {
            options,
            registry,
            store,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ChapterStore> {
        &self.store
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// 探测断点：从记录的章节数往前一章开始，逐章检查文件是否足够大，遇到第一个
    /// 缺失/过小的章节停下。结果与起点相同且起点非 0 时，说明记录已不可信，
    /// 回退 `resume_rewind` 章重扫一次。结果写回记录。
    pub fn download_info(&self, key: &BookKey, total: usize) -> DownloadInfo {
        let id = key.job_id();
        let start = self
            .store
            .cached_count(id)
            .unwrap_or(0)
            .saturating_sub(1)
            .min(total);

        let mut count = self.scan_complete(key, start, total);
        if count == start && start > 0 {
            let from = start.saturating_sub(self.options.resume_rewind);
            debug!(target: "download", job = %id, start, from, "断点记录不可信，回退重扫");
            count = self.scan_complete(key, from, total);
        }

        if let Err(e) = self.store.store_cached_count(id, count) {
            warn!(target: "download", job = %id, error = %e, "保存章节数记录失败");
        }
        DownloadInfo { id, count, total }
    }

    fn scan_complete(&self, key: &BookKey, from: usize, total: usize) -> usize {
        (from..total)
            .find(|&i| {
                !self
                    .store
                    .chapter_status(key, i, self.options.min_chapter_bytes)
                    .is_complete()
            })
            .unwrap_or(total.max(from))
    }

    /// 加载书籍详情后在当前线程下载。
    pub fn download(&self, repo: &Repository, url: &str) -> Result<WorkerOutcome, DownloadError> {
        let record = repo.load(url, true)?;
        self.download_record(repo, &record)
    }

    /// 在当前线程下载一本已加载的书。
    ///
    /// 存储不可写时在登记任务之前返回错误。运行期间的错误和 panic 都会把任务
    /// 置为 `Failed` 后再返回。
    pub fn download_record(
        &self,
        repo: &Repository,
        record: &BookRecord,
    ) -> Result<WorkerOutcome, DownloadError> {
        match self.admit(repo, record)? {
            Some(handle) => self.run_admitted(&handle, repo, record),
            None => Ok(WorkerOutcome::AlreadyRunning),
        }
    }

    /// 确认存储可写并登记任务；同一本书已在下载时返回 `Ok(None)`。
    ///
    /// 拿到的凭证必须交给 [`Downloader::spawn_admitted`]，否则任务会一直挂在注册表里。
    pub fn admit(
        &self,
        repo: &Repository,
        record: &BookRecord,
    ) -> Result<Option<JobHandle>, DownloadError> {
        let key = BookKey::new(repo.name(), record.author.as_deref(), &record.name);
        let id = key.job_id();

        if self.registry.is_running(id) {
            info!(target: "download", job = %id, title = %record.name, "已在下载中");
            return Ok(None);
        }
        self.store.check_writable(&key)?;
        let handle = self.registry.start(id);
        if handle.is_none() {
            info!(target: "download", job = %id, title = %record.name, "已在下载中");
        }
        Ok(handle)
    }

    fn run_admitted(
        &self,
        handle: &JobHandle,
        repo: &Repository,
        record: &BookRecord,
    ) -> Result<WorkerOutcome, DownloadError> {
        let key = BookKey::new(repo.name(), record.author.as_deref(), &record.name);
        let id = handle.id();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run(handle, repo, &key, record)
        }));
        match result {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => {
                error!(target: "download", job = %id, title = %record.name, error = %e, "下载失败");
                self.registry.finish_handle(handle, DownloadState::Failed);
                Err(e)
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!(target: "download", job = %id, title = %record.name, panic = %msg, "下载线程 panic");
                self.registry.finish_handle(handle, DownloadState::Failed);
                Err(DownloadError::Panicked(msg))
            }
        }
    }

    fn run(
        &self,
        handle: &JobHandle,
        repo: &Repository,
        key: &BookKey,
        record: &BookRecord,
    ) -> Result<WorkerOutcome, DownloadError> {
        let total = record.chapters.len();
        let info = self.download_info(key, total);
        let mut eta = EtaEstimator::new();
        info!(
            target: "download",
            job = %handle.id(),
            title = %record.name,
            resume_from = info.count,
            total,
            "开始下载"
        );
        self.registry.report_progress(
            handle,
            info.count,
            total,
            eta.eta_secs(total - info.count),
        );

        if !self.fetch_cover(handle, repo, key, record) {
            return Ok(WorkerOutcome::Stopped);
        }

        for (index, chapter) in record.chapters.iter().enumerate().skip(info.count) {
            if handle.is_cancelled() {
                return Ok(WorkerOutcome::Stopped);
            }
            if self
                .registry
                .wait_while_paused(handle, self.options.pause_poll)
                .is_none()
            {
                return Ok(WorkerOutcome::Stopped);
            }
            // 封面、暂停和跳过已下载章节的时间不算进单章耗时
            eta.restart();
            if self
                .store
                .chapter_status(key, index, self.options.min_chapter_bytes)
                .is_complete()
            {
                continue;
            }

            let Some(body) = self.fetch_with_retry(handle, repo, index, &chapter.url)? else {
                return Ok(WorkerOutcome::Stopped);
            };
            // 拉取期间可能已被停止：结果丢弃，不落盘
            if handle.is_cancelled() {
                return Ok(WorkerOutcome::Stopped);
            }

            self.store.write_chapter(
                key,
                &ChapterRecord {
                    index,
                    title: chapter.name.clone(),
                    body,
                },
            )?;

            eta.lap();
            let completed = index + 1;
            self.registry.report_progress(
                handle,
                completed,
                total,
                eta.eta_secs(total - completed),
            );
        }

        if let Err(e) = self.store.store_cached_count(handle.id(), total) {
            warn!(target: "download", job = %handle.id(), error = %e, "保存章节数记录失败");
        }
        if self.registry.finish_handle(handle, DownloadState::Done) {
            info!(target: "download", job = %handle.id(), title = %record.name, total, "下载完成");
            Ok(WorkerOutcome::Done)
        } else {
            Ok(WorkerOutcome::Stopped)
        }
    }

    /// 返回 `Ok(None)` 表示等待重试期间任务被停止。
    fn fetch_with_retry(
        &self,
        handle: &JobHandle,
        repo: &Repository,
        index: usize,
        url: &str,
    ) -> Result<Option<String>, DownloadError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match repo.fetch_chapter(url) {
                Ok(Some(body)) => return Ok(Some(body)),
                Ok(None) => {
                    warn!(target: "download", job = %handle.id(), index, attempts, "章节内容为空，稍后重试")
                }
                Err(e) => {
                    warn!(target: "download", job = %handle.id(), index, attempts, error = %e, "章节拉取失败，稍后重试")
                }
            }
            let max = self.options.max_fetch_attempts;
            if max > 0 && attempts >= max {
                return Err(DownloadError::RetriesExhausted { index, attempts });
            }
            if !self.registry.sleep(handle, self.options.retry_backoff) {
                return Ok(None);
            }
        }
    }

    /// 封面尽力而为：失败时等一次退避后继续。返回 false 表示等待期间任务被停止。
    fn fetch_cover(
        &self,
        handle: &JobHandle,
        repo: &Repository,
        key: &BookKey,
        record: &BookRecord,
    ) -> bool {
        let Some(poster) = record.poster_url.as_deref().filter(|p| !p.trim().is_empty()) else {
            return true;
        };
        if matches!(self.store.read_cover(key), Ok(Some(_))) {
            return true;
        }
        let failure = match repo.fetch_cover(poster) {
            Ok(Some(bytes)) => match self.store.write_cover(key, &bytes) {
                Ok(()) => return true,
                Err(e) => e.to_string(),
            },
            Ok(None) => "empty response".to_string(),
            Err(e) => e.to_string(),
        };
        warn!(target: "download", job = %handle.id(), url = poster, error = %failure, "封面下载失败");
        self.registry.sleep(handle, self.options.cover_backoff)
    }

    /// 在新线程里执行 [`Downloader::download`]。
    pub fn start(
        self: &Arc<Self>,
        repo: Repository,
        url: String,
    ) -> std::io::Result<JoinHandle<Result<WorkerOutcome, DownloadError>>> {
        let this = Arc::clone(self);
        thread::Builder::new()
            .name(format!("download-{}", repo.name()))
            .spawn(move || this.download(&repo, &url))
    }

    /// 在新线程里运行已经由 [`Downloader::admit`] 登记的任务。
    /// 线程启动失败时任务按 `Failed` 结束。
    pub fn spawn_admitted(
        self: &Arc<Self>,
        handle: JobHandle,
        repo: Repository,
        record: BookRecord,
    ) -> std::io::Result<JoinHandle<Result<WorkerOutcome, DownloadError>>> {
        let this = Arc::clone(self);
        let owned = handle.clone();
        thread::Builder::new()
            .name(format!("download-{}", repo.name()))
            .spawn(move || this.run_admitted(&owned, &repo, &record))
            .inspect_err(|e| {
                error!(target: "download", job = %handle.id(), error = %e, "无法启动下载线程");
                self.registry.finish_handle(&handle, DownloadState::Failed);
            })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
