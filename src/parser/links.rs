use std::sync::LazyLock;

use regex::Regex;
use url::Url;

static MARKDOWN_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[[^\]]*\]\((https?://[^)\s]+)\)").unwrap());

const TRACKING_QUERY_KEYS: &[&str] = &["fbclid", "gclid", "igshid", "ref", "source"];

const IMAGE_HOSTS: &[&str] = &[
    "imgur.com",
    "i.imgur.com",
    "raw.githubusercontent.com",
    "user-images.githubusercontent.com",
];
const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico"];

/// Canonicalize a raw href / cell value into the form used for notification
/// links and dedup keys. Returns `None` for anything that is not an absolute
/// http(s) URL with a host.
pub fn normalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let unescaped = html_escape::decode_html_entities(trimmed);
    let mut text: &str = unescaped.as_ref();
    if let Some(caps) = MARKDOWN_LINK_RE.captures(text) {
        text = caps.get(1)?.as_str();
    }
    if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        text = inner.trim();
    }

    // Url::parse would accept `https:host/path` and `https:/host`
    let (_, after_scheme) = text.split_once(':')?;
    if !after_scheme.starts_with("//") {
        return None;
    }

    // Url::parse lower-cases scheme and host for http(s)
    let mut url = Url::parse(text).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    if url.host_str().map_or(true, str::is_empty) {
        return None;
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_key(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    let stripped = path.trim_end_matches('/');
    if !stripped.is_empty() && stripped.len() != path.len() {
        url.set_path(stripped);
    }

    url.set_fragment(None);
    Some(url.to_string())
}

fn is_tracking_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    lower.starts_with("utm_") || TRACKING_QUERY_KEYS.contains(&lower.as_str())
}

/// Heuristic deny-list for hrefs that sit in a listing row but are not the
/// application link: logos and images, Simplify company profiles (`/c/...`)
/// and repository/docs links. Tuned to the SimplifyJobs README layout; a miss
/// only drops the row.
pub fn is_valid_apply_link(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or("").to_lowercase();
    let path = parsed.path().to_lowercase();

    if IMAGE_HOSTS.iter().any(|h| host.contains(h)) {
        return false;
    }
    if IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return false;
    }
    if path.contains("logo") || path.contains("icon") {
        return false;
    }
    if host.ends_with("simplify.jobs") && path.starts_with("/c/") {
        return false;
    }
    if host.contains("github.com") && !path.contains("jobs") {
        return false;
    }

    true
}

/// Host without a leading `www.`, for log lines.
pub fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_default()
}
