//! 剩余时间估计与 CLI 进度条。

use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::Receiver;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::models::JobProgress;
use crate::base_system::job_id::JobId;

const SMOOTHING: f64 = 0.05;

/// 单章耗时的指数滑动平均，初值 1 秒。
#[derive(Debug, Clone)]
pub struct EtaEstimator {
    avg_secs: f64,
    last: Instant,
}

impl Default for EtaEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl EtaEstimator {
    pub fn new() -> Self {
        Self {
            avg_secs: 1.0,
            last: Instant::now(),
        }
    }

    /// 以上次调用到现在的耗时更新平均值。
    pub fn lap(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.last = now;
        self.record(elapsed);
    }

    /// 重新开始计时，之前的等待不计入下一章耗时。
    pub fn restart(&mut self) {
        self.last = Instant::now();
    }

    pub fn record(&mut self, elapsed_secs: f64) {
        self.avg_secs = elapsed_secs * SMOOTHING + self.avg_secs * (1.0 - SMOOTHING);
    }

    pub fn average_secs(&self) -> f64 {
        self.avg_secs
    }

    pub fn eta_secs(&self, remaining: usize) -> f64 {
        self.avg_secs * remaining as f64
    }
}

/// "01 h 02 min 03 s" / "02 min 03 s" / "03 s"
pub fn format_eta(eta_seconds: f64) -> String {
    let total = if eta_seconds.is_finite() && eta_seconds > 0.0 {
        eta_seconds as u64
    } else {
        0
    };
    let (h, m, s) = (total / 3600, total / 60 % 60, total % 60);
    if h > 0 {
        format!("{h:02} h {m:02} min {s:02} s")
    } else if m > 0 {
        format!("{m:02} min {s:02} s")
    } else {
        format!("{s:02} s")
    }
}

/// 在后台线程里把进度事件画成进度条，每个任务一条；channel 关闭后退出。
pub fn spawn_cli_bars(rx: Receiver<JobProgress>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("progress-bars".to_string())
        .spawn(move || {
            let mp = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
            let style = ProgressStyle::with_template(
                "{prefix} [{elapsed_precise}] {wide_bar} {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

            let mut bars: HashMap<JobId, ProgressBar> = HashMap::new();
            for p in rx {
                let bar = bars.entry(p.job_id).or_insert_with(|| {
                    let bar = mp.add(ProgressBar::new(p.total as u64));
                    bar.set_style(style.clone());
                    bar.set_prefix(p.job_id.to_string());
                    bar
                });
                bar.set_length(p.total as u64);
                bar.set_position(p.completed as u64);
                match p.state.label() {
                    Some(label) => bar.set_message(label),
                    None => bar.set_message(format_eta(p.eta_seconds)),
                }
                if p.state.is_terminal()
                    && let Some(bar) = bars.remove(&p.job_id)
                {
                    bar.abandon();
                }
            }
            for bar in bars.into_values() {
                bar.finish_and_clear();
            }
        })
}
