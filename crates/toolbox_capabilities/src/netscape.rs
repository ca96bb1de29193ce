//! Netscape `cookies.txt` parsing.
//!
//! Seven tab-separated fields: domain, subdomain flag, path, secure, expiry,
//! name, value. `#HttpOnly_` before the domain marks an HTTP-only cookie and
//! is not a comment.

use indexmap::IndexMap;

/// First line of a cookie file
pub const HEADER: &str = "# Netscape HTTP Cookie File";

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// One cookie row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cookie<'a> {
    /// Row as written, including any `#HttpOnly_` prefix
    pub line: &'a str,
    /// Domain without the prefix
    pub domain: &'a str,
    /// Cookie name
    pub name: &'a str,
    /// Cookie value
    pub value: &'a str,
}

/// Parse one row; comments, blanks and short rows are `None`
#[must_use]
pub fn parse_line(line: &str) -> Option<Cookie<'_>> {
    let row = line.trim_end_matches(['\r', '\n']);
    let body = row.strip_prefix(HTTP_ONLY_PREFIX).unwrap_or(row);
    if body.trim().is_empty() || body.starts_with('#') {
        return None;
    }
    let fields: Vec<&str> = body.split('\t').collect();
    if fields.len() < 7 {
        return None;
    }
    Some(Cookie {
        line: row,
        domain: fields[0].trim(),
        name: fields[5],
        value: fields[6],
    })
}

/// Every cookie row in `text`
pub fn cookies(text: &str) -> impl Iterator<Item = Cookie<'_>> {
    text.lines().filter_map(parse_line)
}

/// Does `cookie_domain` belong to `target`?
///
/// Leading dots are ignored and case does not matter. With subdomains,
/// `a.example.com` matches `example.com`.
#[must_use]
pub fn domain_matches(cookie_domain: &str, target: &str, include_subdomains: bool) -> bool {
    let cookie = cookie_domain.trim_start_matches('.').to_ascii_lowercase();
    let target = target.trim_start_matches('.').to_ascii_lowercase();
    if cookie.is_empty() || target.is_empty() {
        return false;
    }
    cookie == target || (include_subdomains && cookie.ends_with(&format!(".{target}")))
}

/// `Cookie:` header value for cookies whose domain ends with `suffix`
///
/// A repeated name keeps its first position and its last value.
#[must_use]
pub fn cookie_header(text: &str, suffix: &str) -> Option<String> {
    let mut pairs: IndexMap<&str, &str> = IndexMap::new();
    for cookie in cookies(text) {
        if cookie.domain.trim_start_matches('.').ends_with(suffix) {
            pairs.insert(cookie.name, cookie.value);
        }
    }
    if pairs.is_empty() {
        return None;
    }
    Some(
        pairs
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; "),
    )
}
