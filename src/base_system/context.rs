//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigError, ConfigSpec, FieldMeta};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_false")]
    pub rate_limited: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 路径配置
    #[serde(default)]
    pub save_path: String,

    // 网络配置
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_min_connect_timeout")]
    pub min_connect_timeout: f64,

    // 缓存配置
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    // 下载配置
    #[serde(default = "default_min_chapter_bytes")]
    pub min_chapter_bytes: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub max_fetch_attempts: u32,
    #[serde(default = "default_pause_poll_ms")]
    pub pause_poll_ms: u64,
    #[serde(default = "default_cover_backoff_ms")]
    pub cover_backoff_ms: u64,
    #[serde(default = "default_resume_rewind")]
    pub resume_rewind: usize,

    // 提供方
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            save_path: String::new(),
            request_timeout: default_request_timeout(),
            min_connect_timeout: default_min_connect_timeout(),
            cache_size: default_cache_size(),
            cache_ttl_secs: default_cache_ttl_secs(),
            min_chapter_bytes: default_min_chapter_bytes(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_fetch_attempts: 0,
            pause_poll_ms: default_pause_poll_ms(),
            cover_backoff_ms: default_cover_backoff_ms(),
            resume_rewind: default_resume_rewind(),
            providers: Vec::new(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 12] = [
            FieldMeta {
                name: "save_path",
                description: "章节保存根目录（留空为当前目录下的 downloads）",
            },
            FieldMeta {
                name: "request_timeout",
                description: "请求超时时间（秒）",
            },
            FieldMeta {
                name: "min_connect_timeout",
                description: "最小连接超时时间（秒）",
            },
            FieldMeta {
                name: "cache_size",
                description: "书籍详情滚动缓存的槽位数",
            },
            FieldMeta {
                name: "cache_ttl_secs",
                description: "书籍详情缓存有效期（秒）",
            },
            FieldMeta {
                name: "min_chapter_bytes",
                description: "章节文件超过该字节数才视为已下载，否则重新下载覆盖",
            },
            FieldMeta {
                name: "retry_backoff_ms",
                description: "章节拉取失败后的等待时间, 单位ms",
            },
            FieldMeta {
                name: "max_fetch_attempts",
                description: "单章最大拉取次数，0 表示无限重试直到任务被停止",
            },
            FieldMeta {
                name: "pause_poll_ms",
                description: "暂停状态下检查任务状态的间隔, 单位ms",
            },
            FieldMeta {
                name: "cover_backoff_ms",
                description: "封面下载失败后的等待时间, 单位ms",
            },
            FieldMeta {
                name: "resume_rewind",
                description: "断点记录与磁盘不一致时向前回退重扫的章节数",
            },
            FieldMeta {
                name: "providers",
                description: "内容提供方列表（name / base_url / rate_limited）",
            },
        ];
        &FIELDS
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_size == 0 {
            return Err(ConfigError::Validation(
                "cache_size 必须大于 0".to_string(),
            ));
        }
        let mut names: Vec<&str> = self.providers.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(ConfigError::Validation(
                "providers 中存在重复的 name".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn default_save_dir(&self) -> PathBuf {
        if self.save_path.trim().is_empty() {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("downloads")
        } else {
            PathBuf::from(&self.save_path)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        if self.min_connect_timeout <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(self.min_connect_timeout))
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderEntry> {
        self.providers.iter().find(|p| p.name == name)
    }
}

fn default_false() -> bool {
    false
}

fn default_request_timeout() -> u64 {
    15
}

fn default_min_connect_timeout() -> f64 {
    3.05
}

fn default_cache_size() -> usize {
    20
}

fn default_cache_ttl_secs() -> u64 {
    60 * 10
}

fn default_min_chapter_bytes() -> u64 {
    10
}

fn default_retry_backoff_ms() -> u64 {
    5000
}

fn default_pause_poll_ms() -> u64 {
    100
}

fn default_cover_backoff_ms() -> u64 {
    1000
}

fn default_resume_rewind() -> usize {
    100
}
