//! Route file-pattern parsing.
//!
//! Page files use bracketed path segments to declare route parameters:
//! `[name]` is a required parameter, `[...name]` a required wildcard,
//! `[[...name]]` an optional wildcard, and parenthesized groups are
//! organizational only (dropped from the route). The parsed segments are
//! consumed by the router collaborator; this module only owns the grammar.

use crate::error::Error;

/// One segment of a parsed route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteSegment {
    Static(String),
    Parameter(String),
    Wildcard(String),
    OptionalWildcard(String),
}

/// A serialized route pattern plus the optional-wildcard names that the
/// router must still treat as required captures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    pub pattern: String,
    pub required: Vec<String>,
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
}

/// Parse a route file pattern into segments.
///
/// The file extension (and a lowercase basename directly before it, such as
/// `index`) is stripped before parsing; parenthesized groups are dropped.
pub fn parse_file_pattern(path: &str) -> Result<Vec<RouteSegment>, Error> {
    let pattern = strip_extension(path);
    let chars: Vec<char> = pattern.chars().collect();
    let mut segments = Vec::new();
    let mut i = 0;

    let parse_error =
        |what: &str| Error::other(format!("Parse error in route pattern {path:?}: {what}"));

    while i < chars.len() {
        match chars[i] {
            '/' | '\\' => {
                i += 1;
            }
            '(' => {
                i += 1;
                while i < chars.len() && chars[i] != ')' {
                    if !is_identifier_char(chars[i]) {
                        return Err(parse_error("invalid identifier in group"));
                    }
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(parse_error("unterminated group"));
                }
                i += 1;
            }
            '[' => {
                i += 1;

                let optional = i < chars.len() && chars[i] == '[';
                if optional {
                    i += 1;
                    if !pattern[char_index(&chars, i)..].starts_with("...") {
                        return Err(parse_error("expected ... after [["));
                    }
                }

                let mut wildcard = false;
                if i < chars.len() && chars[i] == '.' {
                    if !pattern[char_index(&chars, i)..].starts_with("...") {
                        return Err(parse_error("expected ..."));
                    }
                    wildcard = true;
                    i += 3;
                }

                let mut name = String::new();
                while i < chars.len() && chars[i] != ']' {
                    if !is_identifier_char(chars[i]) {
                        return Err(parse_error("invalid identifier in parameter"));
                    }
                    name.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() || name.is_empty() {
                    return Err(parse_error("unterminated parameter"));
                }

                segments.push(match (optional, wildcard) {
                    (true, _) => RouteSegment::OptionalWildcard(name),
                    (false, true) => RouteSegment::Wildcard(name),
                    (false, false) => RouteSegment::Parameter(name),
                });

                if optional {
                    if !pattern[char_index(&chars, i)..].starts_with("]]") {
                        return Err(parse_error("expected ]]"));
                    }
                    i += 2;
                } else {
                    i += 1;
                }
            }
            c if is_identifier_char(c) => {
                let mut value = String::new();
                while i < chars.len() && is_identifier_char(chars[i]) {
                    value.push(chars[i]);
                    i += 1;
                }
                segments.push(RouteSegment::Static(value));
            }
            _ => return Err(parse_error("invalid character")),
        }
    }

    Ok(segments)
}

/// Serialize segments to a radix-router pattern (`/:name`, `/**:name`).
#[must_use]
pub fn serialize_to_radix(segments: &[RouteSegment]) -> RoutePattern {
    let mut required = Vec::new();

    let parts: Vec<String> = segments
        .iter()
        .map(|segment| match segment {
            RouteSegment::Static(value) => value.clone(),
            RouteSegment::Parameter(name) => format!(":{name}"),
            RouteSegment::Wildcard(name) => format!("**:{name}"),
            RouteSegment::OptionalWildcard(name) => {
                required.push(name.clone());
                format!("**:{name}")
            }
        })
        .collect();

    RoutePattern {
        pattern: format!("/{}", parts.join("/")),
        required,
    }
}

/// Strip the extension and a lowercase basename directly before it
/// (`foo/index.tsx` parses the same as `foo.tsx`). The extension must be
/// alphanumeric so the dots of a rest token are never mistaken for it.
fn strip_extension(path: &str) -> String {
    let re = regex_lite::Regex::new(r"((^|[\\/])[a-z]+)?\.[a-zA-Z0-9]+$").unwrap();
    re.replace(path, "").into_owned()
}

fn char_index(chars: &[char], i: usize) -> usize {
    chars[..i].iter().map(|c| c.len_utf8()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radix(path: &str) -> String {
        serialize_to_radix(&parse_file_pattern(path).unwrap()).pattern
    }

    #[test]
    fn test_static_segments() {
        assert_eq!(radix("foo/bar"), "/foo/bar");
    }

    #[test]
    fn test_parameter_segment() {
        assert_eq!(radix("abc/[val].tsx"), "/abc/:val");
        assert_eq!(radix("qux/[val]/bar.tsx"), "/qux/:val/bar");
    }

    #[test]
    fn test_wildcard_segments() {
        assert_eq!(radix("foo/hello/[...val].tsx"), "/foo/hello/**:val");
        assert_eq!(radix("foo/[[...val]].tsx"), "/foo/**:val");
    }

    #[test]
    fn test_optional_wildcard_reports_required() {
        let parsed = parse_file_pattern("foo/[val1]/[[...val2]].tsx").unwrap();
        let route = serialize_to_radix(&parsed);
        assert_eq!(route.pattern, "/foo/:val1/**:val2");
        assert_eq!(route.required, vec!["val2"]);
    }

    #[test]
    fn test_parenthesized_groups_dropped() {
        assert_eq!(radix("(foo)/bar"), "/bar");
        assert_eq!(radix("(foo)/bar/[word].tsx"), "/bar/:word");
    }

    #[test]
    fn test_index_basename_stripped() {
        assert_eq!(radix("foo/index.tsx"), "/foo");
    }

    #[test]
    fn test_malformed_pattern_errors() {
        assert!(parse_file_pattern("foo/[val.tsx").is_err());
        assert!(parse_file_pattern("foo/[[val]].tsx").is_err());
        assert!(parse_file_pattern("foo/(bar.tsx").is_err());
    }
}
