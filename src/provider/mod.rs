//! 内容提供方能力接口。
//!
//! 每个站点的抓取/解析细节都藏在 [`Provider`] 后面，下载核心只通过这里的方法取数据。

pub mod catalog;
pub mod media;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("{provider} does not support {what}")]
    Unsupported {
        provider: String,
        what: &'static str,
    },
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterData {
    pub name: String,
    pub url: String,
}

/// 一本书的完整信息（目录 + 元数据）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub synopsis: Option<String>,
    #[serde(default)]
    pub rating: Option<u32>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub chapters: Vec<ChapterData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainPageResult {
    pub url: String,
    #[serde(default)]
    pub items: Vec<SearchResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserReview {
    pub username: String,
    pub review: String,
    #[serde(default)]
    pub rating: Option<u32>,
    #[serde(default)]
    pub spoiler: bool,
}

pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn base_url(&self) -> &str;

    /// 为 true 时，同一提供方的调用会被串行化。
    fn has_rate_limit(&self) -> bool {
        false
    }

    fn has_reviews(&self) -> bool {
        false
    }

    fn has_main_page(&self) -> bool {
        false
    }

    /// 把站内相对地址补全为绝对地址。
    fn fix_url(&self, url: &str) -> String {
        fix_url(self.base_url(), url)
    }

    fn fetch_chapter_content(&self, url: &str) -> ProviderResult<Option<String>>;

    fn search(&self, query: &str) -> ProviderResult<Option<Vec<SearchResult>>>;

    fn load_main_page(
        &self,
        page: u32,
        category: Option<&str>,
        order_by: Option<&str>,
        tag: Option<&str>,
    ) -> ProviderResult<MainPageResult>;

    fn load_full_record(&self, url: &str) -> ProviderResult<Option<BookRecord>>;

    fn load_raw_html(&self, url: &str) -> ProviderResult<Option<String>>;

    fn load_reviews(
        &self,
        _url: &str,
        _page: u32,
        _show_spoilers: bool,
    ) -> ProviderResult<Vec<UserReview>> {
        Err(ProviderError::Unsupported {
            provider: self.name().to_string(),
            what: "reviews",
        })
    }

    /// 封面图片原始字节。
    fn fetch_cover(&self, _url: &str) -> ProviderResult<Option<Vec<u8>>> {
        Ok(None)
    }
}

pub fn fix_url(base_url: &str, url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    if let Some(rest) = url.strip_prefix("//") {
        return format!("https://{rest}");
    }
    let base = base_url.trim().trim_end_matches('/');
    if url.starts_with('/') {
        format!("{base}{url}")
    } else {
        format!("{base}/{url}")
    }
}
