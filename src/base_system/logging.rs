//! 日志：控制台（stderr）+ `logs/latest.log`，退出时把本次日志压成 zip。
//!
//! 退出路径有三条：正常 drop、`safe_exit`、Ctrl+C。三条都会先跑退出钩子
//! （停止下载任务），再刷新写盘线程并归档，且只执行一次。

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_subscriber::Layer;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use zip::CompressionMethod;
use zip::write::FileOptions;

const LATEST_LOG: &str = "latest.log";
/// 启动时超过该大小的旧日志先归档
const ROTATE_BYTES: u64 = 10 * 1024 * 1024;
/// 等 non-blocking 写盘线程把缓冲写完
const FLUSH_GRACE: Duration = Duration::from_millis(300);

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("time formatting failed: {0}")]
    Time(#[from] time::error::Format),
}

#[derive(Clone, Copy, Debug)]
pub struct LogOptions {
    pub debug: bool,
    pub use_color: bool,
    pub archive_on_exit: bool,
    pub console: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            debug: false,
            use_color: true,
            archive_on_exit: true,
            console: true,
        }
    }
}

/// 控制台：`rate_limit` 的逐次获取记录只在 trace 级别，默认不打到终端。
fn console_filter(debug: bool) -> Targets {
    let level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    Targets::new()
        .with_default(level)
        .with_target("rate_limit", LevelFilter::WARN)
        .with_target("web_access", level.min(LevelFilter::INFO))
}

fn file_filter() -> Targets {
    Targets::new()
        .with_default(LevelFilter::DEBUG)
        .with_target("rate_limit", LevelFilter::TRACE)
        // 依赖库的调试输出太多
        .with_target("hyper", LevelFilter::INFO)
        .with_target("reqwest", LevelFilter::INFO)
}

type ExitHook = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct ExitHooks {
    hooks: Mutex<Vec<ExitHook>>,
    fired: AtomicBool,
}

impl ExitHooks {
    fn push(&self, hook: ExitHook) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    /// 只有第一次调用返回 true；钩子按注册的逆序执行。
    fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        let hooks = {
            let mut guard = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        for hook in hooks.into_iter().rev() {
            hook();
        }
        true
    }
}

/// `logs` 目录下 `latest.log` 的归档。
#[derive(Debug, Clone)]
struct LogArchiver {
    dir: PathBuf,
}

impl LogArchiver {
    fn latest(&self) -> PathBuf {
        self.dir.join(LATEST_LOG)
    }

    fn rotate_if_over(&self, limit: u64) -> Result<Option<PathBuf>, LogError> {
        match fs::metadata(self.latest()) {
            Ok(meta) if meta.len() >= limit => self.archive(),
            _ => Ok(None),
        }
    }

    /// 打包并删除 `latest.log`；文件不存在或为空时不产生归档。
    fn archive(&self) -> Result<Option<PathBuf>, LogError> {
        let latest = self.latest();
        let len = match fs::metadata(&latest) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if len == 0 {
            let _ = fs::remove_file(&latest);
            return Ok(None);
        }

        let stamp = OffsetDateTime::now_utc().format(format_description!(
            "[year]-[month]-[day]_[hour]-[minute]-[second]"
        ))?;
        let mut target = self.dir.join(format!("novel_{stamp}.zip"));
        let mut n = 1;
        while target.exists() {
            target = self.dir.join(format!("novel_{stamp}_{n}.zip"));
            n += 1;
        }

        let mut zip = zip::ZipWriter::new(File::create(&target)?);
        zip.start_file(
            format!("novel_{stamp}.log"),
            FileOptions::default().compression_method(CompressionMethod::Deflated),
        )?;
        io::copy(&mut File::open(&latest)?, &mut zip)?;
        zip.finish()?;

        fs::remove_file(&latest)?;
        Ok(Some(target))
    }
}

struct Shutdown {
    hooks: ExitHooks,
    writer_guard: Mutex<Option<WorkerGuard>>,
    archiver: Option<LogArchiver>,
}

impl Shutdown {
    fn run(&self) {
        if !self.hooks.fire() {
            return;
        }
        info!(target: "startup", "正在退出");
        // drop guard 会把剩余日志写完
        drop(
            self.writer_guard
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        std::thread::sleep(FLUSH_GRACE);
        if let Some(archiver) = &self.archiver
            && let Err(err) = archiver.archive()
        {
            eprintln!("failed to archive log: {err}");
        }
    }
}

pub struct LogSystem {
    shutdown: Arc<Shutdown>,
}

impl LogSystem {
    /// 安装全局订阅者，日志写入 `logs_dir/latest.log`。
    pub fn init(options: LogOptions, logs_dir: &Path) -> Result<Self, LogError> {
        fs::create_dir_all(logs_dir)?;
        let archiver = LogArchiver {
            dir: logs_dir.to_path_buf(),
        };
        if let Some(old) = archiver.rotate_if_over(ROTATE_BYTES)? {
            eprintln!("previous log archived to {}", old.display());
        }

        let (file_writer, guard) = NonBlockingBuilder::default()
            .lossy(false)
            .thread_name("log-writer")
            .finish(tracing_appender::rolling::never(logs_dir, LATEST_LOG));

        let console_writer = if options.console {
            BoxMakeWriter::new(io::stderr)
        } else {
            BoxMakeWriter::new(io::sink)
        };
        let console_layer = fmt::layer()
            .with_target(false)
            .with_thread_names(true)
            .with_ansi(options.use_color)
            .with_writer(console_writer)
            .with_filter(console_filter(options.debug));
        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_writer(file_writer)
            .with_filter(file_filter());

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|_| LogError::AlreadyInitialized)?;

        let shutdown = Arc::new(Shutdown {
            hooks: ExitHooks::default(),
            writer_guard: Mutex::new(Some(guard)),
            archiver: options.archive_on_exit.then_some(archiver),
        });

        {
            let shutdown = shutdown.clone();
            let _ = ctrlc::set_handler(move || {
                info!(target: "startup", "收到 Ctrl+C，停止所有任务");
                shutdown.run();
                std::process::exit(0);
            });
        }
        install_panic_logger();

        Ok(Self { shutdown })
    }

    /// 注册退出钩子（按注册的逆序执行）。
    pub fn add_exit_hook<F>(&self, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shutdown.hooks.push(Box::new(func));
    }

    pub fn safe_exit(&self) {
        self.shutdown.run();
    }
}

impl Drop for LogSystem {
    fn drop(&mut self) {
        self.shutdown.run();
    }
}

fn install_panic_logger() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let thread = std::thread::current();
        let name = thread.name().unwrap_or("<unnamed>");
        match info.location() {
            Some(loc) => error!(
                thread = name,
                "panic at {}:{}: {}",
                loc.file(),
                loc.line(),
                info
            ),
            None => error!(thread = name, "panic: {info}"),
        }
        previous(info);
    }));
}
