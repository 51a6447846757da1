use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, HeaderMap, HeaderValue};

use super::ProviderResult;

fn image_headers() -> HeaderMap {
    // 未启用 gzip 解码，封面必须按原始字节返回
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("image/*,*/*;q=0.8"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    headers
}

/// 下载图片等二进制资源；404 与空响应视为"没有"，其余失败照常返回错误。
pub(crate) fn fetch_bytes(client: &Client, url: &str) -> ProviderResult<Option<Vec<u8>>> {
    if url.trim().is_empty() {
        return Ok(None);
    }

    let resp = client.get(url).headers(image_headers()).send()?;
    if resp.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let bytes = resp.error_for_status()?.bytes()?;
    if bytes.is_empty() {
        return Ok(None);
    }
    Ok(Some(bytes.to_vec()))
}
