//! Dedup keys for article links.
//!
//! Feeds often decorate links with volatile query parameters (UTM tags,
//! timestamps), so articles are keyed by `scheme://host/path` only.

use url::Url;

/// Canonical dedup key for a raw URL.
///
/// Strings that do not parse as absolute URLs are returned unchanged and
/// treated as opaque keys.
pub fn canonical_url(raw: &str) -> String {
    let parsed = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) => return raw.to_string(),
    };

    let host = match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    };

    format!("{}://{}{}", parsed.scheme(), host, parsed.path())
}

/// Whether two links refer to the same article.
///
/// Exact equality is checked first so identical strings that cannot be
/// canonicalized still match.
pub fn urls_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    canonical_url(a) == canonical_url(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_and_fragment_are_dropped() {
        assert_eq!(canonical_url("https://x/y?utm=1"), "https://x/y");
        assert_eq!(canonical_url("https://x/y?utm=2"), "https://x/y");
        assert_eq!(
            canonical_url("https://blog.example.com/post/1?ref=rss#comments"),
            "https://blog.example.com/post/1"
        );
    }

    #[test]
    fn test_port_and_case_are_normalized() {
        assert_eq!(canonical_url("HTTPS://Example.COM:8443/a"), "https://example.com:8443/a");
        // Default ports are elided by the parser
        assert_eq!(canonical_url("https://example.com:443/a"), "https://example.com/a");
    }

    #[test]
    fn test_unparseable_input_is_returned_unchanged() {
        assert_eq!(canonical_url("example.com/post?id=3"), "example.com/post?id=3");
        assert_eq!(canonical_url("urn-less guid 42"), "urn-less guid 42");
        assert_eq!(canonical_url(""), "");
    }

    #[test]
    fn test_urls_match() {
        assert!(urls_match("https://x/y?utm=1", "https://x/y"));
        assert!(urls_match("https://x/y?utm=1", "https://x/y?utm=2"));
        assert!(!urls_match("https://x/y", "https://x/z"));
        assert!(!urls_match("https://x/y", "http://x/y"));
    }

    #[test]
    fn test_identical_malformed_urls_match() {
        assert!(urls_match("not a url ?a=1", "not a url ?a=1"));
        assert!(!urls_match("not a url ?a=1", "not a url ?a=2"));
        assert!(urls_match("", ""));
        assert!(!urls_match("", "https://x/y"));
    }
}
