//! 正文 HTML 的广告清理。
//!
//! 去掉 `small.ads-title`、`<script>`、`<iframe>` 以及 class 含 `adsbygoogle` 的元素。
//! 只做标签级别的扫描，不构建 DOM。

use std::sync::OnceLock;

use regex::Regex;

type Compiled = Result<Regex, regex::Error>;

fn cached(cell: &'static OnceLock<Compiled>, pattern: &str) -> Result<&'static Regex, regex::Error> {
    cell.get_or_init(|| Regex::new(pattern))
        .as_ref()
        .map_err(Clone::clone)
}

fn re_open_tag() -> Result<&'static Regex, regex::Error> {
    static R: OnceLock<Compiled> = OnceLock::new();
    cached(&R, r"(?is)<([a-z][a-z0-9-]*)(\s[^>]*)?>")
}

fn re_class_attr() -> Result<&'static Regex, regex::Error> {
    static R: OnceLock<Compiled> = OnceLock::new();
    cached(
        &R,
        r#"(?is)(?:^|\s)class\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#,
    )
}

const VOID_TAGS: [&str; 13] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

// 内容按原始文本处理，内部的 "<" 不算嵌套
const RAW_TEXT_TAGS: [&str; 3] = ["script", "iframe", "style"];

struct Selector<'a> {
    tag: Option<&'a str>,
    class: Option<&'a str>,
}

pub(crate) fn remove_ads(html: &str) -> Result<String, regex::Error> {
    let selectors = [
        Selector {
            tag: Some("small"),
            class: Some("ads-title"),
        },
        Selector {
            tag: Some("script"),
            class: None,
        },
        Selector {
            tag: Some("iframe"),
            class: None,
        },
        Selector {
            tag: None,
            class: Some("adsbygoogle"),
        },
    ];

    let mut out = html.to_string();
    for sel in &selectors {
        out = remove_elements(&out, sel)?;
    }
    Ok(out)
}

fn has_class(attrs: &str, class: &str) -> Result<bool, regex::Error> {
    let Some(caps) = re_class_attr()?.captures(attrs) else {
        return Ok(false);
    };
    let value = caps
        .get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str())
        .unwrap_or("");
    Ok(value.split_whitespace().any(|c| c == class))
}

fn remove_elements(html: &str, sel: &Selector<'_>) -> Result<String, regex::Error> {
    let open = re_open_tag()?;
    let mut out = String::with_capacity(html.len());
    let mut copied_to = 0;
    let mut pos = 0;

    while let Some(caps) = open.captures_at(html, pos) {
        let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((pos, pos));
        let (start, open_end) = whole;
        let name = caps
            .get(1)
            .map(|m| m.as_str().to_ascii_lowercase())
            .unwrap_or_default();
        let attrs = caps.get(2).map(|m| m.as_str()).unwrap_or("");

        let tag_ok = sel.tag.is_none_or(|t| t == name);
        let class_ok = match sel.class {
            Some(class) => has_class(attrs, class)?,
            None => true,
        };
        if !(tag_ok && class_ok) {
            pos = open_end;
            continue;
        }

        let self_closing = attrs.trim_end().ends_with('/') || VOID_TAGS.contains(&name.as_str());
        let end = if self_closing {
            open_end
        } else {
            find_element_end(html, &name, open_end)?
        };

        out.push_str(&html[copied_to..start]);
        copied_to = end;
        pos = end;
    }

    out.push_str(&html[copied_to..]);
    Ok(out)
}

/// 返回与起始标签配对的结束标签之后的位置；找不到时视为延伸到文档末尾。
fn find_element_end(html: &str, name: &str, from: usize) -> Result<usize, regex::Error> {
    let tag = Regex::new(&format!(
        r"(?is)<(/?){}(?:\s[^>]*)?>",
        regex::escape(name)
    ))?;

    if RAW_TEXT_TAGS.contains(&name) {
        let closing = tag
            .captures_iter(&html[from..])
            .find(|c| c.get(1).is_some_and(|m| !m.as_str().is_empty()));
        return Ok(closing
            .and_then(|c| c.get(0))
            .map(|m| from + m.end())
            .unwrap_or(html.len()));
    }

    let mut depth = 1usize;
    for caps in tag.captures_iter(&html[from..]) {
        let Some(m) = caps.get(0) else { continue };
        let is_close = caps.get(1).is_some_and(|c| !c.as_str().is_empty());
        if is_close {
            depth -= 1;
            if depth == 0 {
                return Ok(from + m.end());
            }
        } else if !m.as_str().ends_with("/>") {
            depth += 1;
        }
    }
    Ok(html.len())
}
