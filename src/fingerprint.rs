//! Cache keys for GET requests.
//!
//! A key is `METHOD url#hash`, where the URL is normalized through the `url`
//! crate and the hash is a SHA-256 digest over the header mapping sorted by
//! lowercased name. Cookies and the user agent travel outside the header map
//! but are sent as headers, so they are hashed as `cookie` and `user-agent`
//! entries. The body is not part of the key.

use sha2::{Digest, Sha256};
use url::Url;

use crate::HttpRequest;

/// Builds the canonical cache key for `request`.
///
/// Headers are hashed as they are at the time of the call, so headers added by
/// request interceptors participate in the key.
pub fn fingerprint(request: &HttpRequest) -> String {
    format!(
        "{} {}#{}",
        request.method,
        normalize_url(&request.url),
        headers_digest(request)
    )
}

/// Lowercases scheme and host, drops default ports and resolves dot segments.
/// Unparseable input is returned trimmed.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => trimmed.to_owned(),
    }
}

fn headers_digest(request: &HttpRequest) -> String {
    let mut pairs: Vec<(String, &str)> = request
        .headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
        .collect();
    let sent_separately = [
        ("cookie", request.cookies.as_deref()),
        ("user-agent", request.user_agent.as_deref()),
    ];
    for (name, value) in sent_separately {
        if let Some(value) = value {
            pairs.push((name.to_owned(), value.trim()));
        }
    }
    pairs.sort();

    let mut hasher = Sha256::new();
    for (name, value) in pairs {
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }

    hasher.finalize()[..8]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
