//! 提供方门面：缓存 + 限流 + 错误规整。
//!
//! 子模块：
//! - `cache`：书籍详情滚动缓存
//! - `rate_limit`：按提供方的互斥闸门
//! - `ads`：正文 HTML 广告清理

mod ads;
pub mod cache;
pub mod rate_limit;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::provider::{
    BookRecord, MainPageResult, Provider, ProviderError, ProviderResult, SearchResult, UserReview,
};
use cache::RollingCache;
use rate_limit::RateLimiter;

pub type RecordCache = RollingCache<BookRecord>;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{provider}: no data returned for {what}")]
    NoData { provider: String, what: String },
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// 包装单个提供方；缓存和限流器在所有门面之间共享。
#[derive(Clone)]
pub struct Repository {
    provider: Arc<dyn Provider>,
    cache: Arc<RecordCache>,
    limiter: Arc<RateLimiter>,
}

impl Repository {
    pub fn new(
        provider: Arc<dyn Provider>,
        cache: Arc<RecordCache>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            provider,
            cache,
            limiter,
        }
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn base_url(&self) -> &str {
        self.provider.base_url()
    }

    pub fn has_rate_limit(&self) -> bool {
        self.provider.has_rate_limit()
    }

    pub fn has_reviews(&self) -> bool {
        self.provider.has_reviews()
    }

    pub fn has_main_page(&self) -> bool {
        self.provider.has_main_page()
    }

    /// 加载书籍详情。`allow_cache` 为 false 时既不读也不写缓存。
    pub fn load(&self, url: &str, allow_cache: bool) -> RepoResult<BookRecord> {
        let _gate = self
            .limiter
            .acquire_if(self.provider.name(), self.provider.has_rate_limit());

        let fixed_url = self.provider.fix_url(url);
        let name = self.provider.name();

        if allow_cache && let Some(hit) = self.cache.lookup(name, &fixed_url) {
            debug!(target: "repository", provider = name, url = %fixed_url, "缓存命中");
            return Ok(hit);
        }

        let record = self
            .provider
            .load_full_record(&fixed_url)?
            .ok_or_else(|| RepoError::NoData {
                provider: name.to_string(),
                what: fixed_url.clone(),
            })?;

        if allow_cache {
            self.cache.insert(name, &fixed_url, record.clone());
        }
        Ok(record)
    }

    /// 拉取章节正文，与 `load` 共用同一个限流闸门。
    pub fn fetch_chapter(&self, url: &str) -> ProviderResult<Option<String>> {
        let _gate = self
            .limiter
            .acquire_if(self.provider.name(), self.provider.has_rate_limit());
        self.provider.fetch_chapter_content(url)
    }

    /// 封面属于尽力而为的附加资源，不占用限流闸门。
    pub fn fetch_cover(&self, url: &str) -> ProviderResult<Option<Vec<u8>>> {
        self.provider.fetch_cover(&self.provider.fix_url(url))
    }

    pub fn search(&self, query: &str) -> RepoResult<Vec<SearchResult>> {
        self.provider
            .search(query)?
            .ok_or_else(|| RepoError::NoData {
                provider: self.name().to_string(),
                what: format!("search '{query}'"),
            })
    }

    pub fn load_main_page(
        &self,
        page: u32,
        category: Option<&str>,
        order_by: Option<&str>,
        tag: Option<&str>,
    ) -> RepoResult<MainPageResult> {
        Ok(self
            .provider
            .load_main_page(page, category, order_by, tag)?)
    }

    pub fn load_reviews(
        &self,
        url: &str,
        page: u32,
        show_spoilers: bool,
    ) -> RepoResult<Vec<UserReview>> {
        Ok(self.provider.load_reviews(url, page, show_spoilers)?)
    }

    /// 拉取原始 HTML 并去广告。空白文档或请求失败返回 `None`；
    /// 去广告失败时退回未处理的原文。
    pub fn load_html(&self, url: &str) -> Option<String> {
        let fixed_url = self.provider.fix_url(url);
        let raw = match self.provider.load_raw_html(&fixed_url) {
            Ok(Some(raw)) if !raw.trim().is_empty() => raw,
            Ok(_) => return None,
            Err(err) => {
                warn!(target: "repository", provider = self.name(), url = %fixed_url, error = %err, "加载 HTML 失败");
                return None;
            }
        };
        match ads::remove_ads(&raw) {
            Ok(clean) => Some(clean),
            Err(err) => {
                warn!(target: "repository", error = %err, "广告清理失败，返回原文");
                Some(raw)
            }
        }
    }
}
