//! 基于 HTTP/JSON 目录的通用提供方。
//!
//! 约定：书籍详情地址返回 `BookRecord` 形状的 JSON，章节地址直接返回正文文本，
//! `{base}/search?q=` 与 `{base}/list?page=` 返回 `SearchResult` 数组。

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, CONNECTION, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{BookRecord, MainPageResult, Provider, ProviderResult, SearchResult, media};
use crate::base_system::context::{Config, ProviderEntry};

const UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36";

pub struct CatalogProvider {
    name: String,
    base_url: String,
    rate_limited: bool,
    client: Client,
}

impl CatalogProvider {
    pub fn new(entry: &ProviderEntry, cfg: &Config) -> ProviderResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(USER_AGENT, HeaderValue::from_static(UA));

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(cfg.request_timeout());
        if let Some(t) = cfg.connect_timeout() {
            builder = builder.connect_timeout(t);
        }

        Ok(Self {
            name: entry.name.clone(),
            base_url: entry.base_url.trim().trim_end_matches('/').to_string(),
            rate_limited: entry.rate_limited,
            client: builder.build()?,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn get_text(&self, url: &str) -> ProviderResult<Option<String>> {
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, "text/html,text/plain;q=0.9,*/*;q=0.8")
            .send()?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let text = resp.error_for_status()?.text()?;
        Ok(Some(text).filter(|t| !t.trim().is_empty()))
    }

    fn get_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> ProviderResult<Option<T>> {
        let resp = req
            .header(ACCEPT, "application/json, text/plain, */*")
            .send()?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = resp.error_for_status()?.text()?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&body)?))
    }

    fn tag_results(&self, mut items: Vec<SearchResult>) -> Vec<SearchResult> {
        for item in &mut items {
            if item.provider.is_empty() {
                item.provider = self.name.clone();
            }
            item.url = self.fix_url(&item.url);
        }
        items
    }
}

impl Provider for CatalogProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn has_rate_limit(&self) -> bool {
        self.rate_limited
    }

    fn has_main_page(&self) -> bool {
        true
    }

    fn fetch_chapter_content(&self, url: &str) -> ProviderResult<Option<String>> {
        self.get_text(url)
    }

    fn search(&self, query: &str) -> ProviderResult<Option<Vec<SearchResult>>> {
        let req = self
            .client
            .get(self.endpoint("search"))
            .query(&[("q", query)]);
        Ok(self
            .get_json::<Vec<SearchResult>>(req)?
            .map(|items| self.tag_results(items)))
    }

    fn load_main_page(
        &self,
        page: u32,
        category: Option<&str>,
        order_by: Option<&str>,
        tag: Option<&str>,
    ) -> ProviderResult<MainPageResult> {
        let mut params: Vec<(&str, String)> = vec![("page", page.to_string())];
        for (key, val) in [("category", category), ("order_by", order_by), ("tag", tag)] {
            if let Some(v) = val.filter(|v| !v.is_empty()) {
                params.push((key, v.to_string()));
            }
        }
        let url = self.endpoint("list");
        debug!(target: "provider", provider = %self.name, %url, page, "拉取主页列表");
        let req = self.client.get(&url).query(&params);
        let items = self.get_json::<Vec<SearchResult>>(req)?.unwrap_or_default();
        Ok(MainPageResult {
            url,
            items: self.tag_results(items),
        })
    }

    fn load_full_record(&self, url: &str) -> ProviderResult<Option<BookRecord>> {
        let record = self.get_json::<BookRecord>(self.client.get(url))?;
        Ok(record.map(|mut r| {
            r.url = url.to_string();
            for ch in &mut r.chapters {
                ch.url = self.fix_url(&ch.url);
            }
            r.poster_url = r.poster_url.map(|p| self.fix_url(&p));
            r
        }))
    }

    fn load_raw_html(&self, url: &str) -> ProviderResult<Option<String>> {
        self.get_text(url)
    }

    fn fetch_cover(&self, url: &str) -> ProviderResult<Option<Vec<u8>>> {
        media::fetch_bytes(&self.client, url)
    }
}
