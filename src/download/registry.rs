//! 进程级任务注册表：任务 ID → 当前状态。
//!
//! "任务是否在跑"只看这里。状态机：
//!
//! ```text
//! (none) --start--> Downloading
//! Downloading --pause--> Paused --resume--> Downloading
//! {Downloading, Paused} --stop--> Stopped --> (none)
//! Downloading --完成--> Done --> (none)
//! Downloading --不可恢复错误--> Failed --> (none)
//! ```
//!
//! 终止态只向 sink 报告一次，随后条目被移除。每个任务带一个取消令牌，
//! 同一 ID 被停止后立即重开时，旧 worker 也能认出自己已经被取消。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info};

use super::models::{ControlAction, ControlRequest, DownloadState, JobProgress};
use super::notify::{NotificationSink, NullSink};
use crate::base_system::job_id::JobId;

/// worker 持有的任务凭证。
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    cancel: Arc<AtomicBool>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// 任务已被移出注册表（停止/完成/失败）。
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct JobSlot {
    state: DownloadState,
    cancel: Arc<AtomicBool>,
    last: Option<JobProgress>,
}

impl JobSlot {
    fn owned_by(&self, handle: &JobHandle) -> bool {
        Arc::ptr_eq(&self.cancel, &handle.cancel)
    }
}

pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, JobSlot>>,
    changed: Condvar,
    sink: Arc<dyn NotificationSink>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(Arc::new(NullSink))
    }
}

impl JobRegistry {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            changed: Condvar::new(),
            sink,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, JobSlot>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 原子地登记任务；已登记时返回 `None`。
    pub fn start(&self, id: JobId) -> Option<JobHandle> {
        let mut jobs = self.lock();
        if jobs.contains_key(&id) {
            debug!(target: "registry", job = %id, "任务已在运行，忽略重复启动");
            return None;
        }
        let cancel = Arc::new(AtomicBool::new(false));
        jobs.insert(
            id,
            JobSlot {
                state: DownloadState::Downloading,
                cancel: cancel.clone(),
                last: None,
            },
        );
        info!(target: "registry", job = %id, "任务开始");
        Some(JobHandle { id, cancel })
    }

    pub fn get_state(&self, id: JobId) -> Option<DownloadState> {
        self.lock().get(&id).map(|slot| slot.state)
    }

    pub fn is_running(&self, id: JobId) -> bool {
        self.lock().contains_key(&id)
    }

    /// 终止态等价于对应的 stop/complete/fail；非终止态只作用于已登记的任务。
    pub fn set_state(&self, id: JobId, state: DownloadState) -> bool {
        if state.is_terminal() {
            return self.finish(id, state, None);
        }

        let mut jobs = self.lock();
        let Some(slot) = jobs.get_mut(&id) else {
            debug!(target: "registry", job = %id, ?state, "任务不存在，忽略状态变更");
            return false;
        };
        if slot.state != state {
            slot.state = state;
            let snapshot = slot
                .last
                .map(|p| JobProgress { state, ..p })
                .unwrap_or_else(|| JobProgress::empty(id, state));
            slot.last = Some(snapshot);
            self.sink.notify(&snapshot);
            debug!(target: "registry", job = %id, ?state, "状态变更");
        }
        self.changed.notify_all();
        true
    }

    pub fn pause(&self, id: JobId) -> bool {
        self.set_state(id, DownloadState::Paused)
    }

    pub fn resume(&self, id: JobId) -> bool {
        self.set_state(id, DownloadState::Downloading)
    }

    pub fn stop(&self, id: JobId) -> bool {
        self.finish(id, DownloadState::Stopped, None)
    }

    pub fn complete(&self, id: JobId) -> bool {
        self.finish(id, DownloadState::Done, None)
    }

    pub fn fail(&self, id: JobId) -> bool {
        self.finish(id, DownloadState::Failed, None)
    }

    /// 只结束 `handle` 对应的那一次运行，不会误伤同 ID 的新任务。
    pub(crate) fn finish_handle(&self, handle: &JobHandle, state: DownloadState) -> bool {
        self.finish(handle.id, state, Some(handle))
    }

    fn finish(&self, id: JobId, state: DownloadState, owner: Option<&JobHandle>) -> bool {
        let mut jobs = self.lock();
        let owned = match (jobs.get(&id), owner) {
            (None, _) => false,
            (Some(slot), Some(handle)) => slot.owned_by(handle),
            (Some(_), None) => true,
        };
        if !owned {
            return false;
        }
        let Some(slot) = jobs.remove(&id) else {
            return false;
        };
        slot.cancel.store(true, Ordering::Release);
        let snapshot = slot
            .last
            .map(|p| JobProgress { state, ..p })
            .unwrap_or_else(|| JobProgress::empty(id, state));
        self.sink.notify(&snapshot);
        self.changed.notify_all();
        info!(target: "registry", job = %id, ?state, "任务结束");
        true
    }

    pub fn apply(&self, request: ControlRequest) -> bool {
        match request.action {
            ControlAction::Pause => self.pause(request.job_id),
            ControlAction::Resume => self.resume(request.job_id),
            ControlAction::Stop => self.stop(request.job_id),
        }
    }

    /// 以当前状态推送一次进度；任务已不属于 `handle` 时不推送并返回 false。
    pub(crate) fn report_progress(
        &self,
        handle: &JobHandle,
        completed: usize,
        total: usize,
        eta_seconds: f64,
    ) -> bool {
        let mut jobs = self.lock();
        let Some(slot) = jobs.get_mut(&handle.id).filter(|s| s.owned_by(handle)) else {
            return false;
        };
        let progress = JobProgress {
            job_id: handle.id,
            completed,
            total,
            eta_seconds,
            state: slot.state,
        };
        slot.last = Some(progress);
        self.sink.notify(&progress);
        true
    }

    /// 暂停期间阻塞，直到恢复或被移除。每隔 `poll` 醒来一次重新检查。
    /// 返回恢复后的状态；任务已结束时返回 `None`。
    pub(crate) fn wait_while_paused(
        &self,
        handle: &JobHandle,
        poll: Duration,
    ) -> Option<DownloadState> {
        let mut jobs = self.lock();
        loop {
            if handle.is_cancelled() {
                return None;
            }
            let state = jobs
                .get(&handle.id)
                .filter(|s| s.owned_by(handle))
                .map(|s| s.state)?;
            if state != DownloadState::Paused {
                return Some(state);
            }
            jobs = self
                .changed
                .wait_timeout(jobs, poll.max(Duration::from_millis(1)))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// 可被停止打断的等待。返回 false 表示等待期间任务已结束。
    pub(crate) fn sleep(&self, handle: &JobHandle, duration: Duration) -> bool {
        let jobs = self.lock();
        let _jobs = self
            .changed
            .wait_timeout_while(jobs, duration, |_| !handle.is_cancelled())
            .unwrap_or_else(PoisonError::into_inner)
            .0;
        !handle.is_cancelled()
    }

    pub fn active(&self) -> Vec<(JobId, DownloadState)> {
        let mut out: Vec<_> = self.lock().iter().map(|(id, s)| (*id, s.state)).collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    pub fn stop_all(&self) -> usize {
        let ids: Vec<JobId> = self.lock().keys().copied().collect();
        ids.into_iter().filter(|id| self.stop(*id)).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
