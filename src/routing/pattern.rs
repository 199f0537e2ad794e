//! Segment patterns for paths and hosts.
//!
//! # Syntax
//! - `literal` matches one segment exactly
//! - `*` and `?` are wildcards inside one segment (`*.png`, `v?`)
//! - `{name}` captures one non-empty segment
//! - `**` matches zero or more segments
//! - `{*name}` matches and captures the rest (last segment only)
//!
//! Paths are separated by `/` and match with an optional trailing slash.
//! Hosts are separated by `.` and are compared lowercase.

use std::collections::BTreeMap;

/// Result of a successful path match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMatch {
    /// Values of `{name}` and `{*name}` captures.
    pub variables: BTreeMap<String, String>,
    /// The part matched by a trailing `**` or `{*name}`.
    pub remainder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Glob(String),
    Capture(String),
    DoubleWildcard,
    CaptureRest(String),
}

/// A compiled path or host pattern.
#[derive(Debug, Clone)]
pub struct SegmentPattern {
    raw: String,
    separator: char,
    segments: Vec<Segment>,
}

impl SegmentPattern {
    pub fn path(pattern: &str) -> Result<Self, String> {
        if !pattern.starts_with('/') {
            return Err(format!("path pattern `{pattern}` must start with `/`"));
        }
        Self::parse(pattern, '/')
    }

    pub fn host(pattern: &str) -> Result<Self, String> {
        if pattern.is_empty() {
            return Err("host pattern is empty".to_string());
        }
        Self::parse(&pattern.to_ascii_lowercase(), '.')
    }

    fn parse(pattern: &str, separator: char) -> Result<Self, String> {
        let pieces = split(pattern, separator);
        let mut segments = Vec::with_capacity(pieces.len());
        for (i, piece) in pieces.iter().enumerate() {
            let segment = if *piece == "**" {
                Segment::DoubleWildcard
            } else if let Some(name) = piece.strip_prefix("{*").and_then(|p| p.strip_suffix('}')) {
                if i + 1 != pieces.len() {
                    return Err(format!("`{piece}` must be the last segment of `{pattern}`"));
                }
                Segment::CaptureRest(capture_name(name, pattern)?)
            } else if let Some(name) = piece.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Segment::Capture(capture_name(name, pattern)?)
            } else if piece.contains('{') || piece.contains('}') {
                return Err(format!("unbalanced capture in `{pattern}`"));
            } else if piece.contains('*') || piece.contains('?') {
                Segment::Glob(piece.to_string())
            } else {
                Segment::Literal(piece.to_string())
            };
            segments.push(segment);
        }
        Ok(Self {
            raw: pattern.to_string(),
            separator,
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match `input`, returning captures on success.
    pub fn matches(&self, input: &str) -> Option<PathMatch> {
        let mut pieces = split(input, self.separator);
        let pattern_wants_trailing = matches!(self.segments.last(), Some(Segment::Literal(l)) if l.is_empty());
        if self.separator == '/' && pieces.last() == Some(&"") && !pattern_wants_trailing {
            pieces.pop();
        }

        let mut captures = Vec::new();
        let mut remainder = None;
        if self.match_at(0, &pieces, 0, &mut captures, &mut remainder) {
            Some(PathMatch {
                variables: captures.into_iter().collect(),
                remainder,
            })
        } else {
            None
        }
    }

    fn match_at(
        &self,
        pi: usize,
        input: &[&str],
        si: usize,
        captures: &mut Vec<(String, String)>,
        remainder: &mut Option<String>,
    ) -> bool {
        let Some(segment) = self.segments.get(pi) else {
            return si == input.len();
        };
        match segment {
            Segment::Literal(literal) => {
                si < input.len()
                    && input[si] == literal.as_str()
                    && self.match_at(pi + 1, input, si + 1, captures, remainder)
            }
            Segment::Glob(glob) => {
                si < input.len()
                    && glob_match(glob.as_bytes(), input[si].as_bytes())
                    && self.match_at(pi + 1, input, si + 1, captures, remainder)
            }
            Segment::Capture(name) => {
                if si >= input.len() || input[si].is_empty() {
                    return false;
                }
                captures.push((name.clone(), input[si].to_string()));
                if self.match_at(pi + 1, input, si + 1, captures, remainder) {
                    return true;
                }
                captures.pop();
                false
            }
            Segment::DoubleWildcard | Segment::CaptureRest(_) => {
                if pi + 1 == self.segments.len() {
                    let rest = self.join(&input[si..]);
                    if let Segment::CaptureRest(name) = segment {
                        captures.push((name.clone(), rest.clone()));
                    }
                    *remainder = Some(rest);
                    return true;
                }
                for next in si..=input.len() {
                    let mark = captures.len();
                    if self.match_at(pi + 1, input, next, captures, remainder) {
                        return true;
                    }
                    captures.truncate(mark);
                }
                false
            }
        }
    }

    fn join(&self, pieces: &[&str]) -> String {
        if self.separator == '/' {
            pieces.iter().map(|p| format!("/{p}")).collect()
        } else {
            pieces.join(".")
        }
    }
}

fn split(input: &str, separator: char) -> Vec<&str> {
    let trimmed = if separator == '/' {
        input.strip_prefix('/').unwrap_or(input)
    } else {
        input
    };
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split(separator).collect()
    }
}

fn capture_name(name: &str, pattern: &str) -> Result<String, String> {
    if name.is_empty() || name.contains(':') {
        return Err(format!("invalid capture `{{{name}}}` in `{pattern}`"));
    }
    Ok(name.to_string())
}

/// `*` matches any run of bytes, `?` exactly one.
fn glob_match(pattern: &[u8], input: &[u8]) -> bool {
    let (mut p, mut s) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while s < input.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == input[s]) {
            p += 1;
            s += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, s));
            p += 1;
        } else if let Some((sp, ss)) = star {
            p = sp + 1;
            s = ss + 1;
            star = Some((sp, ss + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|b| *b == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_wildcard_records_remainder() {
        let pattern = SegmentPattern::path("/foo/**").unwrap();
        let m = pattern.matches("/foo/bar/baz").unwrap();
        assert_eq!(m.remainder.as_deref(), Some("/bar/baz"));

        assert_eq!(pattern.matches("/foo").unwrap().remainder.as_deref(), Some(""));
        assert!(pattern.matches("/foobar").is_none());
        assert!(pattern.matches("/other/foo").is_none());
    }

    #[test]
    fn captures_named_segments() {
        let pattern = SegmentPattern::path("/users/{id}/orders/{order}").unwrap();
        let m = pattern.matches("/users/42/orders/7").unwrap();
        assert_eq!(m.variables["id"], "42");
        assert_eq!(m.variables["order"], "7");
        assert!(pattern.matches("/users//orders/7").is_none());
    }

    #[test]
    fn capture_rest_keeps_leading_slash() {
        let pattern = SegmentPattern::path("/static/{*file}").unwrap();
        let m = pattern.matches("/static/css/site.css").unwrap();
        assert_eq!(m.variables["file"], "/css/site.css");
    }

    #[test]
    fn trailing_slash_is_optional() {
        let pattern = SegmentPattern::path("/health").unwrap();
        assert!(pattern.matches("/health").is_some());
        assert!(pattern.matches("/health/").is_some());
        assert!(pattern.matches("/healthz").is_none());
    }

    #[test]
    fn single_segment_wildcards() {
        let pattern = SegmentPattern::path("/images/*.png").unwrap();
        assert!(pattern.matches("/images/cat.png").is_some());
        assert!(pattern.matches("/images/cat.jpg").is_none());
        assert!(pattern.matches("/images/a/cat.png").is_none());

        let pattern = SegmentPattern::path("/api/v?/items").unwrap();
        assert!(pattern.matches("/api/v2/items").is_some());
        assert!(pattern.matches("/api/v10/items").is_none());
    }

    #[test]
    fn double_wildcard_in_the_middle() {
        let pattern = SegmentPattern::path("/a/**/z").unwrap();
        assert!(pattern.matches("/a/z").is_some());
        assert!(pattern.matches("/a/b/c/z").is_some());
        assert!(pattern.matches("/a/b/c").is_none());
    }

    #[test]
    fn host_patterns() {
        let pattern = SegmentPattern::host("**.Example.org").unwrap();
        assert!(pattern.matches("www.example.org").is_some());
        assert!(pattern.matches("a.b.example.org").is_some());
        assert!(pattern.matches("example.com").is_none());

        let pattern = SegmentPattern::host("{tenant}.example.org").unwrap();
        let m = pattern.matches("acme.example.org").unwrap();
        assert_eq!(m.variables["tenant"], "acme");
    }

    #[test]
    fn rejects_malformed_patterns() {
        assert!(SegmentPattern::path("foo").is_err());
        assert!(SegmentPattern::path("/{*rest}/more").is_err());
        assert!(SegmentPattern::path("/a{b").is_err());
        assert!(SegmentPattern::path("/{id:[0-9]+}").is_err());
        assert!(SegmentPattern::host("").is_err());
    }
}
