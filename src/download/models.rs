//! 下载任务的数据模型：状态、进度快照、控制指令。

use serde::{Deserialize, Serialize};

use crate::base_system::job_id::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Paused,
    Downloading,
    Done,
    Failed,
    Stopped,
}

impl DownloadState {
    /// 终止态：上报一次后从注册表移除。
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadState::Done | DownloadState::Failed | DownloadState::Stopped
        )
    }

    /// 通知栏上显示的状态文字；下载中没有固定文字，改显示剩余时间。
    pub fn label(self) -> Option<&'static str> {
        match self {
            DownloadState::Done => Some("Downloaded"),
            DownloadState::Paused => Some("Paused"),
            DownloadState::Failed => Some("Error"),
            DownloadState::Stopped => Some("Stopped"),
            DownloadState::Downloading => None,
        }
    }
}

/// 每写完一章重新计算并推送一次；不落盘。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub completed: usize,
    pub total: usize,
    pub eta_seconds: f64,
    pub state: DownloadState,
}

impl JobProgress {
    pub fn empty(job_id: JobId, state: DownloadState) -> Self {
        Self {
            job_id,
            completed: 0,
            total: 0,
            eta_seconds: 0.0,
            state,
        }
    }
}

/// 断点信息：磁盘上已连续落盘的章节数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DownloadInfo {
    pub id: JobId,
    pub count: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Resume,
    Pause,
    Stop,
}

impl From<&str> for ControlAction {
    /// 不认识的动作按继续处理。
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pause" => ControlAction::Pause,
            "stop" => ControlAction::Stop,
            _ => ControlAction::Resume,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub job_id: JobId,
    pub action: ControlAction,
}

/// 一次 `download` 调用的结局。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    Done,
    Stopped,
    /// 同一本书已有任务在跑，本次未启动。
    AlreadyRunning,
}
