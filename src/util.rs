//! Small stateless helpers (spec §2 C8): URI/path handling and HTTP dates.
//! Grounded in the teacher's use of `httpdate` for date formatting and
//! `percent-encoding` for decode; the path-traversal guard follows
//! `framework/http2/framework/router.hpp` in `original_source/`. HTTP/2
//! carries only a numeric `:status` pseudo-header -- there is no reason
//! phrase on the wire for this crate to render.

use percent_encoding::percent_decode_str;
use std::time::SystemTime;

/// Percent-decodes a request path. Invalid UTF-8 after decoding is replaced
/// using the standard lossy conversion, matching how HPACK-decoded path
/// bytes are generally treated -- we never need byte-exact paths once a
/// route has matched.
pub fn percent_decode_path(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// True if any `/`-separated segment of `path` is exactly `..`.
///
/// Used by the router (spec §4.5) to reject path-traversal attempts before
/// matching; the decoded path is what gets tested, not the raw wire bytes.
pub fn has_traversal_segment(path: &str) -> bool {
    path.split('/').any(|segment| segment == "..")
}

/// Splits `path?query` into its two parts; `query` is `""` when absent.
pub fn split_query(raw_target: &str) -> (&str, &str) {
    match raw_target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (raw_target, ""),
    }
}

/// Renders the current time as an RFC 1123 HTTP-date, for the `date` header.
pub fn http_date_now() -> String {
    httpdate::fmt_http_date(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_traversal_segments() {
        assert!(has_traversal_segment("/a/../b"));
        assert!(has_traversal_segment(".."));
        assert!(!has_traversal_segment("/a/..b/c"));
        assert!(!has_traversal_segment("/a/b.."));
    }

    #[test]
    fn splits_query_string() {
        assert_eq!(split_query("/a/b?x=1"), ("/a/b", "x=1"));
        assert_eq!(split_query("/a/b"), ("/a/b", ""));
    }

    #[test]
    fn decodes_percent_escapes() {
        assert_eq!(percent_decode_path("/a%20b"), "/a b");
    }
}
