use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::info;

use novel_downloader::base_system::config::load_or_create;
use novel_downloader::base_system::context::Config;
use novel_downloader::base_system::logging::{LogOptions, LogSystem};
use novel_downloader::ui;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "novel-downloader")]
#[command(about = "Resumable multi-chapter novel downloader")]
struct Cli {
    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 数据目录路径（用于存放 config.yml 和 logs 等文件，方便 Docker 挂载）
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 启用服务器模式（Web 控制面）
    #[arg(long, default_value_t = false)]
    server: bool,

    /// 提供方名称（config.yml 中 providers 的 name；只配置了一个时可省略）
    #[arg(long)]
    provider: Option<String>,

    /// 书籍详情地址
    #[arg(long)]
    url: Option<String>,

    /// 只显示书籍信息和断点，不下载
    #[arg(long, default_value_t = false)]
    info: bool,

    /// 显示版本信息后退出
    #[arg(long, default_value_t = false)]
    version: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("Novel Downloader v{VERSION}");
        return Ok(());
    }

    let data_dir = cli.data_dir.as_deref();
    let log = init_logging(cli.debug, data_dir)?;
    info!(target: "startup", "当前版本: v{}", VERSION);

    let config = load_or_create::<Config>(None, data_dir).map_err(|e| anyhow!(e))?;

    if cli.server {
        return ui::web::run(config, &log);
    }

    let Some(url) = cli.url.as_deref() else {
        return Err(anyhow!("需要 --url <书籍地址>，或使用 --server 启动 Web 控制面"));
    };
    let provider = pick_provider(&config, cli.provider.as_deref())?;

    if cli.info {
        ui::cli::show_info(config, &provider, url)
    } else {
        ui::cli::download(config, &provider, url, &log)
    }
}

fn pick_provider(config: &Config, requested: Option<&str>) -> Result<String> {
    if let Some(name) = requested {
        return Ok(name.to_string());
    }
    match config.providers.as_slice() {
        [only] => Ok(only.name.clone()),
        [] => Err(anyhow!("config.yml 中没有配置任何 providers")),
        _ => Err(anyhow!("配置了多个提供方，请用 --provider 指定")),
    }
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        ..LogOptions::default()
    };
    let logs_dir = base_dir.unwrap_or_else(|| Path::new(".")).join("logs");
    LogSystem::init(opts, &logs_dir).map_err(|e| anyhow!(e))
}
