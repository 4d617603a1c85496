//! Canonical module identifiers.
//!
//! A locator unifies physical files, namespace-mapped package locations, and
//! engine-synthesized modules under one URL-shaped identifier space. The
//! `url` field is the unique cache key everywhere in the engine; two
//! locators compare equal iff their URLs match.

use regex_lite::Regex;
use serde::Serialize;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// Where a locator's content comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum LocatorKind {
    /// Physical file addressed through a registered namespace.
    File,
    /// Module generated by the engine itself, with no backing file.
    Synthetic,
    /// Module left to the host environment (builtins, externals).
    External,
}

/// One `name=value` locator parameter.
///
/// Params are order-significant: they encode things like the dynamic-import
/// variant marker, and their serialization order is part of the URL.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Param {
    pub name: String,
    pub value: String,
}

impl Param {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Canonical identifier for a module.
#[derive(Clone, Debug, Serialize)]
pub struct ModuleLocator {
    pub url: String,
    pub kind: LocatorKind,
    pub specifier: String,
    pub params: Vec<Param>,
}

impl PartialEq for ModuleLocator {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for ModuleLocator {}

impl Hash for ModuleLocator {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

fn locator_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/_dev/([^/?]+)/([^?]*)(.*)$").unwrap())
}

impl ModuleLocator {
    #[must_use]
    pub fn new(kind: LocatorKind, specifier: String, params: Vec<Param>) -> Self {
        let url = match kind {
            LocatorKind::File => {
                format!("/_dev/file/{}{}", &specifier, stringify_query(&params))
            }
            LocatorKind::Synthetic => {
                format!("/_dev/synthetic/{}{}", &specifier, stringify_query(&params))
            }
            LocatorKind::External => {
                format!("{}{}", &specifier, stringify_query(&params))
            }
        };

        Self {
            url,
            kind,
            specifier,
            params,
        }
    }

    /// Parse a locator back out of its URL form.
    ///
    /// Returns `None` for URLs outside the `/_dev/` space or with an
    /// unknown kind segment.
    #[must_use]
    pub fn from_url(url: impl AsRef<str>) -> Option<Self> {
        let captures = locator_url_re().captures(url.as_ref())?;

        let kind = match captures.get(1).map(|m| m.as_str()) {
            Some("file") => LocatorKind::File,
            Some("synthetic") => LocatorKind::Synthetic,
            _ => return None,
        };

        let specifier = captures.get(2).map(|m| m.as_str().to_string())?;
        let params = parse_query(captures.get(3).map_or("", |m| m.as_str()));

        Some(Self::new(kind, specifier, params))
    }

    /// The same locator with its parameters stripped.
    #[must_use]
    pub fn without_params(&self) -> Self {
        Self::new(self.kind, self.specifier.clone(), vec![])
    }

    /// Look up a parameter; the last occurrence wins.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

/// Parse a query string (with or without the leading `?`) into params,
/// preserving order.
#[must_use]
pub fn parse_query(qs: &str) -> Vec<Param> {
    let qs = qs.strip_prefix('?').unwrap_or(qs);
    if qs.is_empty() {
        return vec![];
    }

    qs.split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((name, value)) => Param::new(name, value),
            None => Param::new(part, ""),
        })
        .collect()
}

/// Serialize params back into a query string (empty for no params).
#[must_use]
pub fn stringify_query(params: &[Param]) -> String {
    if params.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = params
        .iter()
        .map(|p| format!("{}={}", p.name, p.value))
        .collect();

    format!("?{}", parts.join("&"))
}
