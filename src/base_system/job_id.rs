//! 下载任务 ID 与书籍定位键。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use super::sanitize::sanitize_filename;

/// 安全化之后的 `(提供方, 作者, 书名)`，同时决定章节目录与任务 ID。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookKey {
    pub provider: String,
    pub author: String,
    pub title: String,
}

impl BookKey {
    pub fn new(provider: &str, author: Option<&str>, title: &str) -> Self {
        Self {
            provider: sanitize_filename(provider),
            author: author.map(sanitize_filename).unwrap_or_default(),
            title: sanitize_filename(title),
        }
    }

    pub fn job_id(&self) -> JobId {
        JobId::from_key(self)
    }
}

/// 由书籍键稳定哈希得到的任务 ID，同一本书同一时间只能有一个任务。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl JobId {
    pub fn new(provider: &str, author: Option<&str>, title: &str) -> Self {
        BookKey::new(provider, author, title).job_id()
    }

    fn from_key(key: &BookKey) -> Self {
        let mut h = Sha256::new();
        // 每段带长度前缀，("ab","c") 与 ("a","bc") 不会撞在一起
        for part in [&key.provider, &key.author, &key.title] {
            h.update((part.len() as u64).to_le_bytes());
            h.update(part.as_bytes());
        }
        let digest = h.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        JobId(u64::from_be_bytes(head))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0.to_be_bytes()))
    }
}

impl FromStr for JobId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut buf = [0u8; 8];
        hex::decode_to_slice(s.trim(), &mut buf)?;
        Ok(JobId(u64::from_be_bytes(buf)))
    }
}

// 十六进制字符串形式序列化：u64 放进 JSON 会在浏览器端丢精度
impl Serialize for JobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
