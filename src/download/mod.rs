//! 下载任务管理。
//!
//! 子模块：
//! - `models`：状态、进度快照、控制指令
//! - `registry`：进程级任务注册表与状态机
//! - `notify`：进度事件 sink
//! - `progress`：剩余时间估计与 CLI 进度条
//! - `downloader`：单任务下载主循环

pub mod downloader;
pub mod models;
pub mod notify;
pub mod progress;
pub mod registry;

pub use downloader::{DownloadError, DownloadOptions, Downloader};
pub use models::{
    ControlAction, ControlRequest, DownloadInfo, DownloadState, JobProgress, WorkerOutcome,
};
pub use notify::{ChannelSink, FanoutSink, LogSink, NotificationSink, NullSink};
pub use registry::{JobHandle, JobRegistry};
