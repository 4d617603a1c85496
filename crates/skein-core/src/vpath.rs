//! Virtual path decoding.
//!
//! A virtual path is a physical path decorated with a synthetic segment
//! addressing one of several dependency-resolution contexts for the same
//! file: `.../($$virtual|__virtual__)/<hash-or-name>/<depth>/<subpath>`,
//! where `<depth>` is a backstep count applied against the directory that
//! contains the virtual marker. Virtual paths must be collapsed before any
//! filesystem lookup.
//!
//! Decoding is tolerant: malformed virtual segments pass through unchanged
//! rather than erroring.

use regex_lite::Regex;
use std::sync::OnceLock;

fn virtual_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(/(?:[^/]+/)*?(?:\$\$virtual|__virtual__))((?:/((?:[^/]+-)?[a-f0-9]+)(?:/([^/]+))?)?((?:/.*)?))$",
        )
        .unwrap()
    })
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]+$").unwrap())
}

/// Collapse every virtual segment in `p`, innermost first.
///
/// Any trailing query string is dropped. Paths with no virtual segment, and
/// paths whose virtual segment is malformed, are returned unchanged (minus
/// the query).
#[must_use]
pub fn resolve_virtual(p: &str) -> String {
    let mut p = match p.find('?') {
        Some(idx) => p[..idx].to_string(),
        None => p.to_string(),
    };

    loop {
        let Some(captures) = virtual_re().captures(&p) else {
            return p;
        };

        let hash = captures.get(3).map(|m| m.as_str().to_string());
        let depth = captures.get(4).map(|m| m.as_str().to_string());
        let subpath = captures
            .get(5)
            .map(|m| m.as_str().to_string())
            .filter(|s| !s.is_empty());

        // A subpath without a hash segment is not a virtual encoding.
        if hash.is_none() && subpath.is_some() {
            return p;
        }

        // Strip the marker segment to recover the target directory.
        let marker = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        let target = match marker.trim_end_matches('/').rfind('/') {
            Some(idx) => &marker[..idx],
            None => "",
        };

        let (Some(_), Some(depth)) = (hash, depth) else {
            return target.to_string();
        };

        if !number_re().is_match(&depth) {
            return p;
        }

        let depth: usize = depth.parse().unwrap();
        let backstep = "../".repeat(depth);
        let subpath = subpath.unwrap_or_else(|| "/.".to_string());

        p = normalize_abs(&format!("{target}/{backstep}{subpath}"));
    }
}

/// Lexically normalize an absolute slash-separated path: collapses `.`,
/// empty segments, and `..` (never popping past the root).
#[must_use]
pub fn normalize_abs(p: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in p.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    format!("/{}", segments.join("/"))
}
