//! Predicate functions callable from matcher expressions.
//!
//! Every predicate takes `(subject, pattern)` and answers with a plain `bool`.
//! A pattern that fails to compile is logged and treated as a non-match, so a
//! broken policy line can never abort an evaluation.

use globset::GlobBuilder;
use ipnet::IpNet;
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;

/// `:name` parameter tokens (colon followed by anything up to the next `/`)
static COLON_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r":[^/]+").expect("static regex"));

/// `{name}` parameter tokens
static BRACE_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^}]+\}").expect("static regex"));

/// Single path segment wildcard substituted for parameter tokens
const SEGMENT: &str = "[^/]+";

/// Syntax used for named path parameters in RESTful key patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSyntax {
    /// `/user/:id`
    Colon,
    /// `/user/{id}`
    Brace,
}

impl ParamSyntax {
    fn token(self) -> &'static Regex {
        match self {
            Self::Colon => &*COLON_PARAM,
            Self::Brace => &*BRACE_PARAM,
        }
    }
}

/// Compile `regex` and test it against `subject`, treating compile errors as a miss.
fn regex_matches(regex: &str, subject: &str) -> bool {
    match Regex::new(regex) {
        Ok(re) => re.is_match(subject),
        Err(e) => {
            tracing::warn!(
                pattern = regex,
                error = %e,
                "failed to compile matcher regex; treating as non-match"
            );
            false
        }
    }
}

/// Coarse prefix matching: `*` matches any suffix.
///
/// The pattern only has to match from the start of `subject`, so
/// `key_match("/foo/bar", "/foo")` is true.
#[must_use]
pub fn key_match(subject: &str, pattern: &str) -> bool {
    let expanded = pattern.replace('*', ".*");
    regex_matches(&format!("^(?:{expanded})"), subject)
}

/// RESTful matching with parameters written in the given syntax.
///
/// `*` becomes a greedy wildcard, each parameter token becomes a single path
/// segment, and the whole subject must be consumed.
#[must_use]
pub fn key_match_with(subject: &str, pattern: &str, syntax: ParamSyntax) -> bool {
    let expanded = pattern.replace('*', ".*");
    let expanded = syntax.token().replace_all(&expanded, SEGMENT);
    regex_matches(&format!("^(?:{expanded})$"), subject)
}

/// RESTful matching with `:name` parameters.
#[must_use]
pub fn key_match2(subject: &str, pattern: &str) -> bool {
    key_match_with(subject, pattern, ParamSyntax::Colon)
}

/// RESTful matching with `{name}` parameters.
#[must_use]
pub fn key_match3(subject: &str, pattern: &str) -> bool {
    key_match_with(subject, pattern, ParamSyntax::Brace)
}

/// Same as [`key_match3`]; registered under its own name.
#[must_use]
pub fn key_match4(subject: &str, pattern: &str) -> bool {
    key_match_with(subject, pattern, ParamSyntax::Brace)
}

/// Same as [`key_match3`]; registered under its own name.
#[must_use]
pub fn key_match5(subject: &str, pattern: &str) -> bool {
    key_match_with(subject, pattern, ParamSyntax::Brace)
}

/// Regular expression matching anchored at the start of `subject`.
#[must_use]
pub fn regex_match(subject: &str, pattern: &str) -> bool {
    regex_matches(&format!("^(?:{pattern})"), subject)
}

/// IP matching with optional CIDR notation in `pattern`.
///
/// Host bits set in the network are ignored (`10.1.2.3/8` means `10.0.0.0/8`).
/// Without a `/` the two strings are compared verbatim.
#[must_use]
pub fn ip_match(ip: &str, pattern: &str) -> bool {
    if !pattern.contains('/') {
        return ip == pattern;
    }

    let Ok(network) = pattern.parse::<IpNet>() else {
        tracing::debug!(pattern, "unparseable CIDR in ipMatch");
        return false;
    };
    let Ok(addr) = ip.parse::<IpAddr>() else {
        tracing::debug!(ip, "unparseable address in ipMatch");
        return false;
    };

    network.trunc().contains(&addr)
}

/// Shell glob matching over the whole subject.
///
/// `*` also crosses `/`, `?` matches a single character and bracket classes
/// (including `[!...]`) are supported. Braces and backslashes are ordinary
/// characters.
#[must_use]
pub fn glob_match(subject: &str, pattern: &str) -> bool {
    let compiled = GlobBuilder::new(&literal_braces(pattern))
        .literal_separator(false)
        .backslash_escape(false)
        .build();
    match compiled {
        Ok(glob) => glob.compile_matcher().is_match(subject),
        Err(e) => {
            tracing::warn!(
                pattern,
                error = %e,
                "failed to compile glob; treating as non-match"
            );
            false
        }
    }
}

/// Wrap `{` and `}` outside bracket classes in single-character classes
fn literal_braces(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' => out.push_str("[{]"),
            '}' => out.push_str("[}]"),
            '[' => {
                out.push('[');
                if let Some(&negate @ ('!' | '^')) = chars.peek() {
                    out.push(negate);
                    chars.next();
                }
                // a leading `]` is a member, not the end of the class
                if chars.peek() == Some(&']') {
                    out.push(']');
                    chars.next();
                }
                for c in chars.by_ref() {
                    out.push(c);
                    if c == ']' {
                        break;
                    }
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- keyMatch ----

    #[test]
    fn test_key_match_prefix() {
        assert!(key_match("/foo/bar", "/foo/*"));
        assert!(key_match("/foo/bar", "/foo"));
        assert!(key_match("/foo", "/foo"));
        assert!(!key_match("/bar/foo", "/foo/*"));
    }

    #[test]
    fn test_key_match_star_matches_empty() {
        assert!(key_match("/foo/", "/foo/*"));
    }

    // ---- keyMatch2 ----

    #[test]
    fn test_key_match2_params() {
        assert!(key_match2("/a/42", "/a/:id"));
        assert!(!key_match2("/a/42/x", "/a/:id"));
        assert!(key_match2("/user/alice/profile", "/user/:name/profile"));
        assert!(!key_match2("/user//profile", "/user/:name/profile"));
    }

    #[test]
    fn test_key_match2_wildcard() {
        assert!(key_match2("/alice_data/resource1", "/alice_data/*"));
        assert!(key_match2("/a/42/x/y", "/a/:id/*"));
        assert!(!key_match2("/b/42", "/a/*"));
    }

    #[test]
    fn test_key_match2_is_fully_anchored() {
        assert!(!key_match2("/prefix/a/42", "/a/:id"));
        assert!(!key_match2("/a/42", "/a"));
    }

    // ---- keyMatch3..5 ----

    #[test]
    fn test_key_match3_braces() {
        assert!(key_match3("/user/42", "/user/{id}"));
        assert!(!key_match3("/user/42/x", "/user/{id}"));
        assert!(key_match3("/user/42/books/7", "/user/{id}/books/{book}"));
    }

    #[test]
    fn test_key_match3_to_5_agree() {
        let cases = [
            ("/proxy/myid", "/proxy/{id}"),
            ("/proxy/myid/res", "/proxy/{id}"),
            ("/proxy/myid/res/1", "/proxy/{id}/*"),
            ("/other", "/proxy/*"),
        ];
        for (subject, pattern) in cases {
            let expected = key_match3(subject, pattern);
            assert_eq!(key_match4(subject, pattern), expected);
            assert_eq!(key_match5(subject, pattern), expected);
        }
    }

    #[test]
    fn test_colon_syntax_ignored_by_brace_matchers() {
        // `:id` is literal text for the brace variants
        assert!(!key_match3("/a/42", "/a/:id"));
        assert!(key_match3("/a/:id", "/a/:id"));
    }

    #[test]
    fn test_invalid_key_pattern_returns_false() {
        assert!(!key_match2("/a/(", "/a/("));
        assert!(!key_match("/a", "(unclosed"));
    }

    // ---- regexMatch ----

    #[test]
    fn test_regex_match_prefix() {
        assert!(regex_match("/topic/create", "/topic/create"));
        assert!(regex_match("/topic/create/123", "/topic/create"));
        assert!(regex_match("/topic/edit/123", r"/topic/edit/[0-9]+"));
        assert!(!regex_match("/api/topic/create", "/topic/create"));
    }

    #[test]
    fn test_regex_match_alternation_anchored() {
        assert!(regex_match("GET", "GET|POST"));
        assert!(regex_match("POST", "GET|POST"));
        assert!(!regex_match("xPOST", "GET|POST"));
    }

    #[test]
    fn test_regex_match_invalid_returns_false() {
        assert!(!regex_match("anything", "[invalid"));
    }

    // ---- ipMatch ----

    #[test]
    fn test_ip_match_cidr() {
        assert!(ip_match("192.168.1.5", "192.168.1.0/24"));
        assert!(!ip_match("10.0.0.1", "192.168.1.0/24"));
        assert!(ip_match("10.200.3.4", "10.0.0.0/8"));
    }

    #[test]
    fn test_ip_match_host_bits_normalized() {
        assert!(ip_match("192.168.1.200", "192.168.1.77/24"));
        assert!(!ip_match("192.168.2.1", "192.168.1.77/24"));
    }

    #[test]
    fn test_ip_match_exact() {
        assert!(ip_match("127.0.0.1", "127.0.0.1"));
        assert!(!ip_match("127.0.0.1", "127.0.0.2"));
    }

    #[test]
    fn test_ip_match_ipv6() {
        assert!(ip_match("2001:db8::1", "2001:db8::/32"));
        assert!(!ip_match("2001:db9::1", "2001:db8::/32"));
        assert!(!ip_match("192.168.1.5", "2001:db8::/32"));
    }

    #[test]
    fn test_ip_match_bad_input_is_false() {
        assert!(!ip_match("bad-ip", "10.0.0.0/8"));
        assert!(!ip_match("10.0.0.1", "10.0.0.0/99"));
        assert!(!ip_match("10.0.0.1", "not-a-network/8"));
    }

    // ---- globMatch ----

    #[test]
    fn test_glob_match_basic() {
        assert!(glob_match("file.txt", "*.txt"));
        assert!(!glob_match("file.txt", "*.md"));
    }

    #[test]
    fn test_glob_match_crosses_separators() {
        assert!(glob_match("/foo/bar/baz", "/foo/*"));
        assert!(glob_match("dir/file.txt", "*.txt"));
    }

    #[test]
    fn test_glob_match_single_char_and_classes() {
        assert!(glob_match("a1", "a?"));
        assert!(!glob_match("a12", "a?"));
        assert!(glob_match("b.log", "[abc].log"));
        assert!(!glob_match("d.log", "[abc].log"));
        assert!(glob_match("d.log", "[!abc].log"));
    }

    #[test]
    fn test_glob_match_full_string() {
        assert!(!glob_match("file.txt.bak", "*.txt"));
    }

    #[test]
    fn test_glob_match_invalid_returns_false() {
        assert!(!glob_match("anything", "[invalid"));
    }

    #[test]
    fn test_glob_match_braces_are_literal() {
        assert!(glob_match("{a,b}.txt", "{a,b}.txt"));
        assert!(!glob_match("a.txt", "{a,b}.txt"));
        assert!(glob_match("/api/{id}", "/api/{id}"));
        assert!(glob_match("/api/{id}/items", "/api/{id}/*"));
        assert!(!glob_match("/api/42", "/api/{id}"));
    }

    #[test]
    fn test_glob_match_braces_inside_class() {
        assert!(glob_match("{", "[{}]"));
        assert!(glob_match("}", "[{}]"));
        assert!(!glob_match("x", "[{}]"));
    }

    #[test]
    fn test_glob_match_backslash_is_literal() {
        assert!(glob_match("C:\\x", "C:\\x"));
        assert!(glob_match("C:\\dir\\file.txt", "C:\\*.txt"));
        assert!(!glob_match("C:x", "C:\\x"));
    }
}
