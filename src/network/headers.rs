//! Header / Cookie 映射的合并与规范化工具。
//!
//! Header 名在 HTTP 中大小写不敏感，这里统一用「后写覆盖、忽略大小写」的方式合并。

use std::collections::BTreeMap;

pub type Headers = BTreeMap<String, String>;
pub type Cookies = BTreeMap<String, String>;

/// `user-agent` -> `User-Agent`
pub fn format_header_name(name: &str) -> String {
    name.trim()
        .split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// 规范化 header：名称首字母大写、去掉首尾空白，空名称丢弃。
pub fn format_headers(headers: &Headers) -> Headers {
    let mut out = Headers::new();
    for (k, v) in headers {
        let name = format_header_name(k);
        if name.is_empty() {
            continue;
        }
        set_header(&mut out, &name, v.trim());
    }
    out
}

pub fn get_header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub fn remove_header(headers: &mut Headers, name: &str) {
    headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
}

pub fn set_header(headers: &mut Headers, name: &str, value: &str) {
    remove_header(headers, name);
    headers.insert(name.to_string(), value.to_string());
}

pub fn merge_headers(base: &mut Headers, overlay: &Headers) {
    for (k, v) in overlay {
        set_header(base, k, v);
    }
}

/// 解析 `a=1; b=2` 形式的 Cookie 字符串。没有 `=` 的片段会被忽略。
pub fn parse_cookie_header(raw: &str) -> Cookies {
    raw.split(';')
        .filter_map(|seg| {
            let seg = seg.trim();
            if seg.is_empty() {
                return None;
            }
            let (k, v) = seg.split_once('=')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_string(), v.trim().to_string()))
        })
        .collect()
}

pub fn build_cookie_header(cookies: &Cookies) -> String {
    cookies
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("; ")
}
