//! 文件名安全化。
//!
//! 章节目录由 `提供方/作者/书名` 三段组成，每段都先经过这里的替换。

/// 会被替换成空格的保留字符。
pub const RESERVED_CHARS: &str = "|\\?*<\":>+[]/'";

/// 将保留字符替换为空格，然后把 `"  "` 单次替换为 `" "`。
///
/// 替换只扫描一遍：三个连续空格会剩下两个。下载目录、任务 ID 都依赖这个
/// 结果，改动它会让已下载的章节"消失"。
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|ch| if RESERVED_CHARS.contains(ch) { ' ' } else { ch })
        .collect();
    replaced.replace("  ", " ")
}

/// 单段路径名：在 [`sanitize_filename`] 之上再挡住空串和 `.`/`..`，避免跳出下载根目录。
pub(crate) fn path_segment(sanitized: &str) -> &str {
    match sanitized {
        "" | "." | ".." => "_",
        other => other,
    }
}
