//! Web 控制面：查看任务、创建下载、暂停/继续/停止、搜索。

mod router;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use crate::app::App;
use crate::base_system::context::Config;
use crate::base_system::logging::LogSystem;
use crate::download::{FanoutSink, LogSink, NotificationSink};
use state::{AppState, JobBoard};

pub const BIND_ENV: &str = "NOVEL_WEB_ADDR";
const DEFAULT_BIND: &str = "127.0.0.1:18424";

pub fn run(config: Config, log: &LogSystem) -> Result<()> {
    let bind_raw = std::env::var(BIND_ENV).unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let bind_addrs = parse_bind_addrs(&bind_raw)?;

    let board = JobBoard::default();
    let sinks: Vec<Box<dyn NotificationSink>> = vec![Box::new(LogSink), Box::new(board.clone())];
    let sink = FanoutSink::new(sinks);
    let app = Arc::new(App::new(config, Arc::new(sink)).context("初始化提供方失败")?);
    {
        let app = app.clone();
        log.add_exit_hook(move || {
            app.shutdown();
        });
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let state = AppState {
        binds: Arc::new(bind_addrs.clone()),
        app: app.clone(),
        board,
    };
    let result = rt.block_on(run_async(bind_addrs, state));
    app.shutdown();
    result
}

fn parse_bind_addr(raw: &str) -> Result<SocketAddr> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(anyhow!("empty bind addr"));
    }
    if let Ok(a) = s.parse::<SocketAddr>() {
        return Ok(a);
    }

    // 容忍 IPv6 未加方括号，例如 "::1:18424"：最后一段全是数字时视为端口
    if !s.starts_with('[')
        && let Some((host, port)) = s.rsplit_once(':')
        && host.contains(':')
        && !port.is_empty()
        && port.chars().all(|c| c.is_ascii_digit())
        && let Ok(a) = format!("[{host}]:{port}").parse::<SocketAddr>()
    {
        return Ok(a);
    }

    Err(anyhow!(
        "invalid {BIND_ENV}: '{s}'. Use '127.0.0.1:18424' or '[::1]:18424'; separate multiple binds with ','."
    ))
}

fn parse_bind_addrs(raw: &str) -> Result<Vec<SocketAddr>> {
    let mut out = Vec::new();
    for part in raw.split([',', ';']).map(str::trim).filter(|s| !s.is_empty()) {
        let a = parse_bind_addr(part)?;
        if !out.contains(&a) {
            out.push(a);
        }
    }
    if out.is_empty() {
        return Err(anyhow!("empty {BIND_ENV}"));
    }
    Ok(out)
}

async fn run_async(bind_addrs: Vec<SocketAddr>, state: AppState) -> Result<()> {
    let notify = Arc::new(tokio::sync::Notify::new());
    {
        let notify = notify.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            notify.notify_waiters();
        });
    }

    let mut servers = Vec::new();
    for bind in bind_addrs {
        let listener = match tokio::net::TcpListener::bind(bind).await {
            Ok(l) => l,
            Err(e) => {
                // 双栈系统上 [::] 可能已经覆盖了 0.0.0.0
                if !servers.is_empty() && e.kind() == std::io::ErrorKind::AddrInUse {
                    warn!(target: "web", bind = %bind, error = %e, "端口已被另一个监听覆盖，跳过");
                    continue;
                }
                return Err(anyhow!(e).context(format!("bind failed: {bind}")));
            }
        };

        info!(target: "web", "控制面监听于 http://{bind}/（可用 {BIND_ENV} 覆盖）");
        println!("Web control listening on http://{bind}/");

        let app = router::build_router(state.clone());
        let notify = notify.clone();
        servers.push(tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                notify.notified().await;
            })
            .await
        }));
    }

    if servers.is_empty() {
        return Err(anyhow!("no listeners started (check {BIND_ENV})"));
    }

    println!("Press Ctrl+C to stop.");

    for h in servers {
        h.await
            .map_err(|e| anyhow!("server task join failed: {e}"))?
            .map_err(|e| anyhow!(e))?;
    }
    Ok(())
}
