//! 命令行模式：下载单本书，或只查看断点信息。

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};

use crate::app::App;
use crate::base_system::context::Config;
use crate::base_system::job_id::BookKey;
use crate::base_system::logging::LogSystem;
use crate::download::progress::spawn_cli_bars;
use crate::download::{ChannelSink, FanoutSink, LogSink, NotificationSink, WorkerOutcome};

/// 打印书籍信息与本地已下载的章节数，不下载。
pub fn show_info(config: Config, provider: &str, url: &str) -> Result<()> {
    let app = App::new(config, Arc::new(LogSink)).context("初始化提供方失败")?;
    let repo = app.repository(provider)?;
    let record = repo
        .load(url, true)
        .with_context(|| format!("加载书籍详情失败: {url}"))?;

    let key = BookKey::new(repo.name(), record.author.as_deref(), &record.name);
    let info = app.downloader().download_info(&key, record.chapters.len());

    println!("\n书名: {}", record.name);
    if let Some(author) = record.author.as_deref() {
        println!("作者: {author}");
    }
    if let Some(status) = record.status.as_deref() {
        println!("状态: {status}");
    }
    if let Some(synopsis) = record.synopsis.as_deref() {
        let mut short = synopsis.to_string();
        if short.chars().count() > 50 {
            short = short.chars().take(50).collect::<String>() + "...";
        }
        println!("简介: {short}");
    }
    println!("任务 ID: {}", info.id);
    println!("已下载: {}/{}", info.count, info.total);
    Ok(())
}

/// 前台下载一本书，进度条画在 stderr。Ctrl+C 会停止任务。
pub fn download(config: Config, provider: &str, url: &str, log: &LogSystem) -> Result<()> {
    let start_time = Instant::now();
    let (channel, rx) = ChannelSink::new();
    let sinks: Vec<Box<dyn NotificationSink>> = vec![Box::new(channel), Box::new(LogSink)];
    let app = Arc::new(
        App::new(config, Arc::new(FanoutSink::new(sinks))).context("初始化提供方失败")?,
    );
    {
        // 弱引用：app 释放后 channel 才会关闭
        let app = Arc::downgrade(&app);
        log.add_exit_hook(move || {
            if let Some(app) = app.upgrade() {
                app.shutdown();
            }
        });
    }

    let bars = spawn_cli_bars(rx).context("启动进度条线程失败")?;
    let worker = app.start_download(provider, url)?;
    let outcome = worker
        .join()
        .map_err(|_| anyhow!("下载线程异常退出"))?;

    // 关掉唯一的发送端，进度条线程随之退出
    drop(app);
    let _ = bars.join();

    match outcome.with_context(|| format!("下载失败: {url}"))? {
        WorkerOutcome::Done => {
            println!("下载完成，用时 {:.1}s", start_time.elapsed().as_secs_f64());
        }
        WorkerOutcome::Stopped => println!("下载已停止"),
        WorkerOutcome::AlreadyRunning => println!("该书已在下载中"),
    }
    Ok(())
}
