use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::app::App;
use crate::base_system::job_id::JobId;
use crate::download::{DownloadState, JobProgress, NotificationSink};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) binds: Arc<Vec<SocketAddr>>,
    pub(crate) app: Arc<App>,
    pub(crate) board: JobBoard,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct JobInfo {
    pub(crate) id: JobId,
    pub(crate) provider: Option<String>,
    pub(crate) title: Option<String>,
    pub(crate) state: DownloadState,
    pub(crate) progress: Option<JobProgress>,
    pub(crate) created_ms: u64,
    pub(crate) updated_ms: u64,
}

/// 已结束任务最多保留这么多条，超出时先丢最久没更新的。
const FINISHED_KEEP: usize = 200;

/// 保存每个任务最后一次进度（包括已结束的任务），供 `/api/jobs` 查询。
#[derive(Debug, Clone)]
pub(crate) struct JobBoard {
    inner: Arc<Mutex<HashMap<JobId, JobInfo>>>,
    finished_keep: usize,
}

impl Default for JobBoard {
    fn default() -> Self {
        Self::with_finished_keep(FINISHED_KEEP)
    }
}

impl JobBoard {
    pub(crate) fn with_finished_keep(finished_keep: usize) -> Self {
        Self {
            inner: Arc::default(),
            finished_keep,
        }
    }

    fn evict_finished(&self, jobs: &mut HashMap<JobId, JobInfo>) {
        let mut finished: Vec<(u64, JobId)> = jobs
            .values()
            .filter(|j| j.state.is_terminal())
            .map(|j| (j.updated_ms, j.id))
            .collect();
        if finished.len() <= self.finished_keep {
            return;
        }
        finished.sort_unstable();
        let excess = finished.len() - self.finished_keep;
        for (_, id) in finished.into_iter().take(excess) {
            jobs.remove(&id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, JobInfo>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry<'a>(jobs: &'a mut HashMap<JobId, JobInfo>, id: JobId) -> &'a mut JobInfo {
        jobs.entry(id).or_insert_with(|| {
            let now = now_ms();
            JobInfo {
                id,
                provider: None,
                title: None,
                state: DownloadState::Downloading,
                progress: None,
                created_ms: now,
                updated_ms: now,
            }
        })
    }

    pub(crate) fn set_meta(&self, id: JobId, provider: &str, title: &str) {
        let mut jobs = self.lock();
        let info = Self::entry(&mut jobs, id);
        info.provider = Some(provider.to_string());
        info.title = Some(title.to_string());
        info.updated_ms = now_ms();
    }

    pub(crate) fn list(&self) -> Vec<JobInfo> {
        let mut v: Vec<JobInfo> = self.lock().values().cloned().collect();
        v.sort_by(|a, b| {
            b.updated_ms
                .cmp(&a.updated_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        v
    }

    pub(crate) fn get(&self, id: JobId) -> Option<JobInfo> {
        self.lock().get(&id).cloned()
    }
}

impl NotificationSink for JobBoard {
    fn notify(&self, progress: &JobProgress) {
        let mut jobs = self.lock();
        let info = Self::entry(&mut jobs, progress.job_id);
        info.state = progress.state;
        info.progress = Some(*progress);
        info.updated_ms = now_ms();
        if progress.state.is_terminal() {
            self.evict_finished(&mut jobs);
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
