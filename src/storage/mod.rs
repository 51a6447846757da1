//! 章节落盘。
//!
//! 目录结构：`{root}/{provider}/{author}/{title}/{index}.txt`，首行为章节标题，其余为正文；
//! 封面为同目录下的 `poster.jpg`。各书的"已知章节数"记录在 `{root}/download_sizes.json`。

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

use crate::base_system::job_id::{BookKey, JobId};
use crate::base_system::sanitize::path_segment;

const COUNTS_FILE: &str = "download_sizes.json";
const COVER_FILE: &str = "poster.jpg";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage is not writable: {0}")]
    PermissionDenied(PathBuf),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        if matches!(
            source.kind(),
            io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem
        ) {
            StoreError::PermissionDenied(path.to_path_buf())
        } else {
            StoreError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterRecord {
    pub index: usize,
    pub title: String,
    pub body: String,
}

impl ChapterRecord {
    fn encode(&self) -> String {
        format!("{}\n{}", self.title, self.body)
    }

    fn decode(index: usize, raw: &str) -> Option<Self> {
        let (title, body) = raw.split_once('\n')?;
        Some(Self {
            index,
            title: title.to_string(),
            body: body.to_string(),
        })
    }
}

/// 按文件大小判定的章节状态；`Partial` 的章节会被直接覆盖重下。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterStatus {
    Missing,
    Partial(u64),
    Complete(u64),
}

impl ChapterStatus {
    pub fn classify(len: Option<u64>, min_bytes: u64) -> Self {
        match len {
            None => ChapterStatus::Missing,
            Some(n) if n > min_bytes => ChapterStatus::Complete(n),
            Some(n) => ChapterStatus::Partial(n),
        }
    }

    pub fn is_complete(self) -> bool {
        matches!(self, ChapterStatus::Complete(_))
    }
}

/// 交给导出方的整本书内容。
#[derive(Debug, Clone, Default)]
pub struct StoredBook {
    pub chapters: Vec<ChapterRecord>,
    pub cover: Option<Vec<u8>>,
}

pub trait ChapterStore: Send + Sync {
    /// 章节文件字节数；不存在时为 `None`。
    fn chapter_len(&self, key: &BookKey, index: usize) -> Option<u64>;

    fn write_chapter(&self, key: &BookKey, record: &ChapterRecord) -> StoreResult<()>;

    /// 读取章节；文件不存在或没有标题行时为 `None`。
    fn read_chapter(&self, key: &BookKey, index: usize) -> StoreResult<Option<ChapterRecord>>;

    fn write_cover(&self, key: &BookKey, bytes: &[u8]) -> StoreResult<()>;

    fn read_cover(&self, key: &BookKey) -> StoreResult<Option<Vec<u8>>>;

    fn cached_count(&self, id: JobId) -> Option<usize>;

    fn store_cached_count(&self, id: JobId, count: usize) -> StoreResult<()>;

    /// 任务开始前确认书籍目录可写。
    fn check_writable(&self, key: &BookKey) -> StoreResult<()>;

    fn chapter_status(&self, key: &BookKey, index: usize, min_bytes: u64) -> ChapterStatus {
        ChapterStatus::classify(self.chapter_len(key, index), min_bytes)
    }

    /// 按序号递增读出所有章节，遇到第一个缺失或无标题的章节即停止。
    fn read_book(&self, key: &BookKey) -> StoreResult<StoredBook> {
        let mut chapters = Vec::new();
        while let Some(record) = self.read_chapter(key, chapters.len())? {
            chapters.push(record);
        }
        Ok(StoredBook {
            chapters,
            cover: self.read_cover(key)?,
        })
    }
}

pub struct FsChapterStore {
    root: PathBuf,
    counts: Mutex<BTreeMap<JobId, usize>>,
}

impl FsChapterStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let counts = load_counts(&root.join(COUNTS_FILE));
        Self {
            root,
            counts: Mutex::new(counts),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn book_dir(&self, key: &BookKey) -> PathBuf {
        self.root
            .join(path_segment(&key.provider))
            .join(path_segment(&key.author))
            .join(path_segment(&key.title))
    }

    pub fn chapter_path(&self, key: &BookKey, index: usize) -> PathBuf {
        self.book_dir(key).join(format!("{index}.txt"))
    }

    fn cover_path(&self, key: &BookKey) -> PathBuf {
        self.book_dir(key).join(COVER_FILE)
    }

    fn lock_counts(&self) -> MutexGuard<'_, BTreeMap<JobId, usize>> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_dir(&self, dir: &Path) -> StoreResult<()> {
        fs::create_dir_all(dir).map_err(|e| StoreError::from_io(dir, e))
    }
}

impl ChapterStore for FsChapterStore {
    fn chapter_len(&self, key: &BookKey, index: usize) -> Option<u64> {
        fs::metadata(self.chapter_path(key, index))
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    }

    fn write_chapter(&self, key: &BookKey, record: &ChapterRecord) -> StoreResult<()> {
        self.ensure_dir(&self.book_dir(key))?;
        let path = self.chapter_path(key, record.index);
        write_atomic(&path, record.encode().as_bytes()).map_err(|e| StoreError::from_io(&path, e))
    }

    fn read_chapter(&self, key: &BookKey, index: usize) -> StoreResult<Option<ChapterRecord>> {
        let path = self.chapter_path(key, index);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(ChapterRecord::decode(index, &raw)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::from_io(&path, e)),
        }
    }

    fn write_cover(&self, key: &BookKey, bytes: &[u8]) -> StoreResult<()> {
        self.ensure_dir(&self.book_dir(key))?;
        let path = self.cover_path(key);
        write_atomic(&path, bytes).map_err(|e| StoreError::from_io(&path, e))
    }

    fn read_cover(&self, key: &BookKey) -> StoreResult<Option<Vec<u8>>> {
        let path = self.cover_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::from_io(&path, e)),
        }
    }

    fn cached_count(&self, id: JobId) -> Option<usize> {
        self.lock_counts().get(&id).copied()
    }

    fn store_cached_count(&self, id: JobId, count: usize) -> StoreResult<()> {
        let mut counts = self.lock_counts();
        counts.insert(id, count);
        let raw = serde_json::to_vec_pretty(&*counts).map_err(|e| StoreError::Io {
            path: self.root.join(COUNTS_FILE),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;
        self.ensure_dir(&self.root)?;
        let path = self.root.join(COUNTS_FILE);
        write_atomic(&path, &raw).map_err(|e| StoreError::from_io(&path, e))
    }

    fn check_writable(&self, key: &BookKey) -> StoreResult<()> {
        let dir = self.book_dir(key);
        self.ensure_dir(&dir)?;
        let probe = dir.join(".write_probe");
        fs::write(&probe, b"").map_err(|e| StoreError::from_io(&dir, e))?;
        let _ = fs::remove_file(&probe);
        Ok(())
    }
}

fn load_counts(path: &Path) -> BTreeMap<JobId, usize> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!(target: "storage", path = %path.display(), error = %e, "读取章节数记录失败");
            return BTreeMap::new();
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(counts) => counts,
        Err(e) => {
            warn!(target: "storage", path = %path.display(), error = %e, "章节数记录损坏，已忽略");
            BTreeMap::new()
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension(format!(
        "{}part",
        path.extension().and_then(|s| s.to_str()).unwrap_or("")
    ));
    fs::write(&tmp, bytes)?;
    // Windows 上 rename 不会覆盖已有文件
    let _ = fs::remove_file(path);
    fs::rename(&tmp, path)?;
    debug!(target: "storage", path = %path.display(), bytes = bytes.len(), "写入完成");
    Ok(())
}
