#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use tempfile::TempDir;

use novel_downloader::app::App;
use novel_downloader::base_system::context::Config;
use novel_downloader::base_system::job_id::{BookKey, JobId};
use novel_downloader::download::{ChannelSink, JobProgress};
use novel_downloader::provider::{
    BookRecord, ChapterData, MainPageResult, Provider, ProviderResult, SearchResult,
};
use novel_downloader::storage::{ChapterRecord, ChapterStore, FsChapterStore};

pub const PROVIDER: &str = "Mock";
pub const BASE: &str = "https://mock.test";
pub const AUTHOR: &str = "Tester";

type Hook = Box<dyn Fn(usize) + Send + Sync>;

/// 按脚本返回内容的提供方。书籍地址形如 `{BASE}/b/{title}`，章节地址为 `{book}/c/{index}`。
pub struct MockProvider {
    chapters: usize,
    rate_limited: bool,
    fetch_delay: Duration,
    hook: Mutex<Option<Hook>>,
    failures: Mutex<HashMap<usize, usize>>,
    cover: Mutex<Option<Vec<u8>>>,
    pub fetched: Mutex<Vec<usize>>,
    pub record_loads: AtomicUsize,
    inside: AtomicUsize,
    pub max_inside: AtomicUsize,
}

impl MockProvider {
    pub fn new(chapters: usize) -> Self {
        Self {
            chapters,
            rate_limited: false,
            fetch_delay: Duration::ZERO,
            hook: Mutex::new(None),
            failures: Mutex::new(HashMap::new()),
            cover: Mutex::new(None),
            fetched: Mutex::new(Vec::new()),
            record_loads: AtomicUsize::new(0),
            inside: AtomicUsize::new(0),
            max_inside: AtomicUsize::new(0),
        }
    }

    pub fn rate_limited(mut self, delay: Duration) -> Self {
        self.rate_limited = true;
        self.fetch_delay = delay;
        self
    }

    /// 每次拉取章节时以序号调用，发生在内容返回之前。
    pub fn set_hook(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// 第 `index` 章前 `times` 次拉取返回空。
    pub fn fail_times(&self, index: usize, times: usize) {
        self.failures.lock().unwrap().insert(index, times);
    }

    pub fn set_cover(&self, bytes: Vec<u8>) {
        *self.cover.lock().unwrap() = Some(bytes);
    }

    pub fn fetched(&self) -> Vec<usize> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn book_url(title: &str) -> String {
        format!("{BASE}/b/{title}")
    }
}

fn chapter_index(url: &str) -> usize {
    url.rsplit('/')
        .next()
        .and_then(|s| s.parse().ok())
        .expect("chapter url ends with index")
}

pub fn body_for(index: usize) -> String {
    format!("body of chapter {index}, long enough to count")
}

impl Provider for MockProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn base_url(&self) -> &str {
        BASE
    }

    fn has_rate_limit(&self) -> bool {
        self.rate_limited
    }

    fn fetch_chapter_content(&self, url: &str) -> ProviderResult<Option<String>> {
        let index = chapter_index(url);
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inside.fetch_max(now, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            thread::sleep(self.fetch_delay);
        }
        self.inside.fetch_sub(1, Ordering::SeqCst);

        self.fetched.lock().unwrap().push(index);
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(index);
        }
        let mut failures = self.failures.lock().unwrap();
        if let Some(left) = failures.get_mut(&index).filter(|n| **n > 0) {
            *left -= 1;
            return Ok(None);
        }
        Ok(Some(body_for(index)))
    }

    fn search(&self, query: &str) -> ProviderResult<Option<Vec<SearchResult>>> {
        Ok(Some(vec![SearchResult {
            name: query.to_string(),
            url: Self::book_url(query),
            poster_url: None,
            provider: PROVIDER.to_string(),
        }]))
    }

    fn load_main_page(
        &self,
        page: u32,
        _category: Option<&str>,
        _order_by: Option<&str>,
        _tag: Option<&str>,
    ) -> ProviderResult<MainPageResult> {
        Ok(MainPageResult {
            url: format!("{BASE}/list?page={page}"),
            items: Vec::new(),
        })
    }

    fn load_full_record(&self, url: &str) -> ProviderResult<Option<BookRecord>> {
        self.record_loads.fetch_add(1, Ordering::SeqCst);
        let title = url.rsplit('/').next().unwrap_or_default().to_string();
        let has_cover = self.cover.lock().unwrap().is_some();
        Ok(Some(BookRecord {
            url: url.to_string(),
            name: title,
            author: Some(AUTHOR.to_string()),
            poster_url: has_cover.then(|| format!("{url}/poster.jpg")),
            synopsis: None,
            rating: None,
            status: None,
            chapters: (0..self.chapters)
                .map(|i| ChapterData {
                    name: format!("Chapter {i}"),
                    url: format!("{url}/c/{i}"),
                })
                .collect(),
        }))
    }

    fn load_raw_html(&self, _url: &str) -> ProviderResult<Option<String>> {
        Ok(None)
    }

    fn fetch_cover(&self, _url: &str) -> ProviderResult<Option<Vec<u8>>> {
        Ok(self.cover.lock().unwrap().clone())
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub app: App,
    pub provider: Arc<MockProvider>,
    pub store: Arc<FsChapterStore>,
    pub events: Receiver<JobProgress>,
}

pub fn test_config() -> Config {
    Config {
        retry_backoff_ms: 10,
        pause_poll_ms: 10,
        cover_backoff_ms: 10,
        ..Config::default()
    }
}

pub fn fixture(provider: MockProvider) -> Fixture {
    fixture_with(provider, test_config())
}

pub fn fixture_with(provider: MockProvider, config: Config) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsChapterStore::new(dir.path()));
    let (sink, events) = ChannelSink::new();
    let mut app = App::with_store(config, Arc::new(sink), store.clone());
    let provider = Arc::new(provider);
    app.register(provider.clone());
    Fixture {
        dir,
        app,
        provider,
        store,
        events,
    }
}

impl Fixture {
    pub fn key(&self, title: &str) -> BookKey {
        BookKey::new(PROVIDER, Some(AUTHOR), title)
    }

    pub fn job_id(&self, title: &str) -> JobId {
        self.key(title).job_id()
    }

    pub fn write_valid(&self, title: &str, index: usize) {
        self.store
            .write_chapter(
                &self.key(title),
                &ChapterRecord {
                    index,
                    title: format!("Chapter {index}"),
                    body: body_for(index),
                },
            )
            .unwrap();
    }

    pub fn events(&self) -> Vec<JobProgress> {
        self.events.try_iter().collect()
    }
}
