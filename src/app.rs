//! 进程级服务对象：注册表、缓存、限流器、存储和各提供方的门面都挂在这里，
//! 由 CLI 和 Web 两种入口共享。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use thiserror::Error;
use tracing::info;

use crate::base_system::context::Config;
use crate::download::{
    ControlRequest, DownloadError, DownloadOptions, Downloader, JobRegistry, NotificationSink,
    WorkerOutcome,
};
use crate::provider::catalog::CatalogProvider;
use crate::provider::{Provider, ProviderError};
use crate::repository::rate_limit::RateLimiter;
use crate::repository::{RecordCache, Repository};
use crate::storage::{ChapterStore, FsChapterStore};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("failed to spawn download thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type WorkerHandle = JoinHandle<Result<WorkerOutcome, DownloadError>>;

pub struct App {
    config: Config,
    registry: Arc<JobRegistry>,
    cache: Arc<RecordCache>,
    limiter: Arc<RateLimiter>,
    downloader: Arc<Downloader>,
    repositories: BTreeMap<String, Repository>,
}

impl App {
    /// 按配置里的 `providers` 创建 HTTP 目录提供方，章节存到 `save_path`。
    pub fn new(config: Config, sink: Arc<dyn NotificationSink>) -> Result<Self, AppError> {
        let store: Arc<dyn ChapterStore> = Arc::new(FsChapterStore::new(config.default_save_dir()));
        let mut app = Self::with_store(config, sink, store);
        let entries = app.config.providers.clone();
        for entry in &entries {
            let provider = CatalogProvider::new(entry, &app.config)?;
            app.register(Arc::new(provider));
        }
        Ok(app)
    }

    /// 不带任何提供方的空服务，提供方随后通过 [`App::register`] 加入。
    pub fn with_store(
        config: Config,
        sink: Arc<dyn NotificationSink>,
        store: Arc<dyn ChapterStore>,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new(sink));
        let cache = Arc::new(RecordCache::new(config.cache_size, config.cache_ttl_secs));
        let downloader = Arc::new(Downloader::new(
            DownloadOptions::from(&config),
            registry.clone(),
            store,
        ));
        Self {
            config,
            registry,
            cache,
            limiter: Arc::new(RateLimiter::new()),
            downloader,
            repositories: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        info!(target: "startup", provider = %name, base_url = provider.base_url(), rate_limited = provider.has_rate_limit(), "注册提供方");
        let repo = Repository::new(provider, self.cache.clone(), self.limiter.clone());
        self.repositories.insert(name, repo);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<RecordCache> {
        &self.cache
    }

    pub fn downloader(&self) -> &Arc<Downloader> {
        &self.downloader
    }

    pub fn repository(&self, provider: &str) -> Result<&Repository, AppError> {
        self.repositories
            .get(provider)
            .ok_or_else(|| AppError::UnknownProvider(provider.to_string()))
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.repositories.keys().map(String::as_str).collect()
    }

    /// 在后台线程开始下载 `url`。
    pub fn start_download(&self, provider: &str, url: &str) -> Result<WorkerHandle, AppError> {
        let repo = self.repository(provider)?.clone();
        Ok(self.downloader.start(repo, url.to_string())?)
    }

    pub fn control(&self, request: ControlRequest) -> bool {
        self.registry.apply(request)
    }

    /// 停止全部任务，返回被停止的数量。
    pub fn shutdown(&self) -> usize {
        let n = self.registry.stop_all();
        if n > 0 {
            info!(target: "startup", stopped = n, "已停止全部下载任务");
        }
        n
    }
}
