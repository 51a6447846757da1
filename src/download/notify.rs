//! 进度事件的去向。

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, info};

use super::models::{DownloadState, JobProgress};
use super::progress::format_eta;

/// 接收注册表推送的进度快照。调用发生在注册表锁内，实现不能回调注册表。
pub trait NotificationSink: Send + Sync {
    fn notify(&self, progress: &JobProgress);
}

/// 什么都不做。
#[derive(Debug, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _progress: &JobProgress) {}
}

/// 转发到 channel，供 CLI 进度条和测试消费。
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<JobProgress>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<JobProgress>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, progress: &JobProgress) {
        // 接收端已关闭时静默丢弃
        let _ = self.tx.send(*progress);
    }
}

/// 写进日志。
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, p: &JobProgress) {
        let status = match p.state.label() {
            Some(label) => label.to_string(),
            None => format_eta(p.eta_seconds),
        };
        if p.state == DownloadState::Downloading {
            debug!(target: "download", job = %p.job_id, completed = p.completed, total = p.total, %status, "进度");
        } else {
            info!(target: "download", job = %p.job_id, completed = p.completed, total = p.total, %status, "状态变更");
        }
    }
}

/// 同时推给多个 sink。
pub struct FanoutSink {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

impl NotificationSink for FanoutSink {
    fn notify(&self, progress: &JobProgress) {
        for sink in &self.sinks {
            sink.notify(progress);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_system::job_id::JobId;

    #[test]
    fn channel_sink_forwards_and_survives_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        let p = JobProgress::empty(JobId(7), DownloadState::Paused);
        sink.notify(&p);
        assert_eq!(rx.try_recv().unwrap(), p);
        drop(rx);
        sink.notify(&p);
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let (a, rx_a) = ChannelSink::new();
        let (b, rx_b) = ChannelSink::new();
        let sinks: Vec<Box<dyn NotificationSink>> = vec![Box::new(a), Box::new(b), Box::new(LogSink)];
        let fan = FanoutSink::new(sinks);
        fan.notify(&JobProgress::empty(JobId(1), DownloadState::Done));
        assert_eq!(rx_a.len(), 1);
        assert_eq!(rx_b.len(), 1);
    }
}
