//! Dynamic bracket-pattern module synthesis.
//!
//! Import requests containing `[name]` / `[...name]` tokens expand into a
//! generated fan-out module over the matching filesystem entries. A static
//! import gets an **eager** module (every case required up front, with a
//! synchronous `get`); a dynamic import gets a **lazy** module (per-case
//! on-demand loads behind an async `fetch`). Both export a `keys` list of
//! the discovered parameter tuples.
//!
//! The specifier is compiled into a glob and a regular expression in
//! lockstep from one token list: the glob selects filesystem entries, the
//! regex recovers the parameter values. An entry the glob accepts but the
//! regex rejects breaks an internal invariant and aborts.

use crate::error::ModuleError;
use crate::fetch::{FetchArgs, FetchData, FetchHook, FetchOutcome};
use crate::locator::{LocatorKind, ModuleLocator};
use crate::project::{CachedEntry, Project};
use crate::resolve::{Resolution, ResolutionKind, ResolveArgs, ResolveHook, ResolveOutcome};
use crate::vpath;
use glob::{MatchOptions, Pattern};
use regex_lite::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Expansion strategy, decided by the kind of the originating import.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Eager,
    Lazy,
}

impl Mode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Eager => "eager",
            Self::Lazy => "lazy",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "eager" => Some(Self::Eager),
            "lazy" => Some(Self::Lazy),
            _ => None,
        }
    }
}

/// One token of a bracket pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternToken {
    Literal(String),
    Param(String),
    Rest(String),
}

/// Install the bracket-specifier hooks on a project.
pub(crate) fn register(project: &mut Project) {
    project.on_resolve(ResolveHook {
        pattern: Regex::new(r"\[").unwrap(),
        callback: Box::new(resolve_bracket),
    });

    project.on_fetch(FetchHook {
        pattern: Regex::new(r"^/_dev/synthetic/(eager|lazy)/").unwrap(),
        callback: Box::new(|project, args| Some(fetch_bracket(project, args))),
    });
}

fn resolve_bracket(project: &Project, args: &ResolveArgs) -> Option<ResolveOutcome> {
    if !args.request.contains('[') {
        return None;
    }

    let mode = match args.kind {
        ResolutionKind::StaticImport => Mode::Eager,
        ResolutionKind::DynamicImport => Mode::Lazy,
    };

    let issuer_path = args
        .issuer
        .as_ref()
        .and_then(|issuer| project.physical_path(issuer))
        .unwrap_or_else(|| {
            panic!(
                "Assertion failed: Cannot expand a bracket import without a physical issuer path ({})",
                args.request
            )
        });
    let issuer_dir = issuer_path.parent().unwrap_or_else(|| Path::new("/"));

    let (search_root, tail) = split_pattern(&args.request, issuer_dir);

    let Some(qualified_root) = project.ns_qualified_from_path(&search_root) else {
        return Some(ResolveOutcome {
            result: Err(ModuleError::from_string(format!(
                "Cannot expand a bracket import outside the registered namespaces ({})",
                search_root.display()
            ))),
            dependencies: vec![search_root],
        });
    };

    let locator = ModuleLocator::new(
        LocatorKind::Synthetic,
        format!("{}/{}/{}", mode.as_str(), qualified_root, tail),
        vec![],
    );

    // Idempotent per (pattern, root) pair: an already-synthesized module is
    // reused as-is.
    if project
        .caches
        .synthetic
        .lock()
        .unwrap()
        .contains_key(&locator.url)
    {
        return Some(ResolveOutcome {
            result: Ok(Resolution { locator }),
            dependencies: vec![search_root],
        });
    }

    match synthesize(project, mode, &search_root, &tail) {
        Ok(source) => {
            debug!(url = %locator.url, "synthesized dynamic module");
            project.caches.synthetic.lock().unwrap().insert(
                locator.url.clone(),
                CachedEntry {
                    outcome: source,
                    watch_paths: vec![search_root.clone()],
                },
            );

            Some(ResolveOutcome {
                result: Ok(Resolution { locator }),
                dependencies: vec![search_root],
            })
        }

        Err(error) => Some(ResolveOutcome {
            result: Err(error),
            dependencies: vec![search_root],
        }),
    }
}

fn fetch_bracket(project: &Project, args: &FetchArgs) -> FetchOutcome {
    let url = &args.locator.url;

    let cached = project
        .caches
        .synthetic
        .lock()
        .unwrap()
        .get(url)
        .map(|entry| entry.outcome.clone());

    let source = match cached {
        Some(source) => Ok(source),
        // The cache entry was invalidated (or this is a cold fetch):
        // regenerate from the locator's own specifier.
        None => regenerate(project, &args.locator),
    };

    match source {
        Ok(source) => FetchOutcome {
            result: Ok(FetchData {
                locator: args.locator.clone(),
                mime_type: "text/javascript".to_string(),
                source,
            }),
            dependencies: vec![],
        },
        Err(error) => FetchOutcome {
            result: Err(error),
            dependencies: vec![],
        },
    }
}

fn regenerate(project: &Project, locator: &ModuleLocator) -> Result<String, ModuleError> {
    let (mode_str, qualified_pattern) = locator
        .specifier
        .split_once('/')
        .unwrap_or((locator.specifier.as_str(), ""));

    let mode = Mode::from_prefix(mode_str).unwrap_or_else(|| {
        panic!(
            "Assertion failed: Unknown synthesizer mode in locator ({})",
            locator.url
        )
    });

    let first_token = qualified_pattern.find('[').unwrap_or_else(|| {
        panic!(
            "Assertion failed: Expected a bracket token in the synthesized locator ({})",
            locator.url
        )
    });
    let prefix = &qualified_pattern[..first_token];
    let (root, residual) = match prefix.rfind('/') {
        Some(idx) => (&prefix[..idx], &prefix[idx + 1..]),
        None => ("", prefix),
    };

    let search_root = project.path_from_ns_qualified(root);
    let tail = format!("{}{}", residual, &qualified_pattern[first_token..]);

    let source = synthesize(project, mode, &search_root, &tail)?;
    project.caches.synthetic.lock().unwrap().insert(
        locator.url.clone(),
        CachedEntry {
            outcome: source.clone(),
            watch_paths: vec![search_root],
        },
    );

    Ok(source)
}

/// Split a bracket request into its search root (resolved against the
/// issuer directory) and the residual pattern tail.
fn split_pattern(request: &str, issuer_dir: &Path) -> (PathBuf, String) {
    let first_token = request
        .find('[')
        .expect("Assertion failed: split_pattern called without a bracket token");

    let prefix = &request[..first_token];
    let (root_rel, residual) = match prefix.rfind('/') {
        Some(idx) => (&prefix[..idx], &prefix[idx + 1..]),
        None => ("", prefix),
    };

    let search_root = if root_rel.is_empty() {
        issuer_dir.to_path_buf()
    } else if root_rel.starts_with('/') {
        PathBuf::from(root_rel)
    } else {
        let joined = issuer_dir.join(root_rel);
        PathBuf::from(vpath::normalize_abs(&joined.to_string_lossy()))
    };

    let tail = format!("{}{}", residual, &request[first_token..]);
    (search_root, tail)
}

/// Tokenize a pattern tail into literal/param/rest tokens.
pub fn tokenize(pattern: &str) -> Result<Vec<PatternToken>, ModuleError> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    let flush = |literal: &mut String, tokens: &mut Vec<PatternToken>| {
        if !literal.is_empty() {
            tokens.push(PatternToken::Literal(std::mem::take(literal)));
        }
    };

    while i < chars.len() {
        if chars[i] != '[' {
            literal.push(chars[i]);
            i += 1;
            continue;
        }

        flush(&mut literal, &mut tokens);
        i += 1;

        let rest = chars.get(i..i + 3) == Some(&['.', '.', '.']);
        if rest {
            i += 3;
        }

        let mut name = String::new();
        while i < chars.len() && chars[i] != ']' {
            let c = chars[i];
            if !c.is_ascii_alphanumeric() && c != '_' {
                return Err(ModuleError::from_string(format!(
                    "Invalid parameter name in bracket pattern ({pattern})"
                )));
            }
            name.push(c);
            i += 1;
        }

        if i >= chars.len() || name.is_empty() {
            return Err(ModuleError::from_string(format!(
                "Unterminated bracket token in pattern ({pattern})"
            )));
        }
        i += 1;

        tokens.push(if rest {
            PatternToken::Rest(name)
        } else {
            PatternToken::Param(name)
        });
    }

    flush(&mut literal, &mut tokens);
    Ok(tokens)
}

/// A pattern compiled to its glob/regex pair.
pub struct CompiledPattern {
    pub glob: Pattern,
    pub regex: Regex,
    /// Capturing parameter names, in first-occurrence order.
    pub names: Vec<String>,
}

/// Compile a token list into glob and regex in one lockstep pass.
///
/// A parameter name reused after its first occurrence compiles to a
/// non-capturing match (duplicate capture names are disallowed).
pub fn compile(tokens: &[PatternToken]) -> Result<CompiledPattern, ModuleError> {
    let mut glob = String::new();
    let mut regex = String::from("^");
    let mut names: Vec<String> = Vec::new();
    let mut strip_next_slash = false;

    for (idx, token) in tokens.iter().enumerate() {
        match token {
            PatternToken::Literal(s) => {
                glob.push_str(&Pattern::escape(s));

                // A whole-segment rest token already consumed the literal's
                // leading separator in the regex.
                let emitted = if strip_next_slash {
                    s.strip_prefix('/').unwrap_or(s)
                } else {
                    s
                };
                regex.push_str(&regex_escape(emitted));
                strip_next_slash = false;
            }

            PatternToken::Param(name) => {
                glob.push('*');
                if names.iter().any(|n| n == name) {
                    regex.push_str("[^/]*");
                } else {
                    regex.push_str(&format!("(?P<{name}>[^/]*)"));
                    names.push(name.clone());
                }
            }

            PatternToken::Rest(name) => {
                let at_segment_start = glob.is_empty() || glob.ends_with('/');
                if !at_segment_start {
                    return Err(ModuleError::from_string(
                        "Rest tokens must start a path segment ([...name])",
                    ));
                }

                let capturing = !names.iter().any(|n| n == name);

                match tokens.get(idx + 1) {
                    // Whole segment: `**` spans zero or more components, so
                    // the capture and the following separator are optional
                    // as a unit.
                    Some(PatternToken::Literal(s)) if s.starts_with('/') => {
                        glob.push_str("**");
                        if capturing {
                            regex.push_str(&format!("(?:(?P<{name}>.*)/)?"));
                        } else {
                            regex.push_str("(?:.*/)?");
                        }
                        strip_next_slash = true;
                    }

                    // Trailing whole segment.
                    None => {
                        glob.push_str("**");
                        if capturing {
                            regex.push_str(&format!("(?P<{name}>.*)"));
                        } else {
                            regex.push_str(".*");
                        }
                    }

                    // Suffix in the same segment: `**` needs an extra `*`
                    // to anchor the final component.
                    Some(_) => {
                        glob.push_str("**/*");
                        if capturing {
                            regex.push_str(&format!("(?P<{name}>.*)"));
                        } else {
                            regex.push_str(".*");
                        }
                    }
                }

                if capturing {
                    names.push(name.clone());
                }
            }
        }
    }

    regex.push('$');

    let glob = Pattern::new(&glob).map_err(|err| {
        ModuleError::from_string(format!("Unsupported bracket pattern ({err})"))
    })?;
    let regex = Regex::new(&regex).map_err(|err| {
        ModuleError::from_string(format!("Unsupported bracket pattern ({err})"))
    })?;

    Ok(CompiledPattern { glob, regex, names })
}

fn regex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '/' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Expand a pattern over the filesystem and emit the fan-out module source.
fn synthesize(
    project: &Project,
    mode: Mode,
    search_root: &Path,
    tail: &str,
) -> Result<String, ModuleError> {
    let tokens = tokenize(tail)?;
    let compiled = compile(&tokens)?;

    let options = MatchOptions {
        require_literal_separator: true,
        ..MatchOptions::default()
    };

    let mut entries: Vec<String> = Vec::new();
    if search_root.is_dir() {
        for entry in walkdir::WalkDir::new(search_root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let rel = entry
                .path()
                .strip_prefix(search_root)
                .expect("Assertion failed: Walked entry escaped the search root");
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            entries.push(rel);
        }
    }

    let mut cases: Vec<(BTreeMap<String, String>, ModuleLocator)> = Vec::new();

    for rel in &entries {
        if !compiled.glob.matches_with(rel, options) {
            continue;
        }

        let captures = compiled.regex.captures(rel).unwrap_or_else(|| {
            panic!("Assertion failed: Expected the compiled regex to match glob results ({rel})")
        });

        let mut vars = BTreeMap::new();
        for name in &compiled.names {
            let value = captures
                .name(name)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            vars.insert(name.clone(), value);
        }

        let target = search_root.join(rel);
        let locator = project
            .locator_from_path(&target, &[])
            .expect("Assertion failed: Matched entry escaped the registered namespaces");

        cases.push((vars, locator));
    }

    if cases.is_empty() {
        return Err(ModuleError::from_string(format!(
            "No entries matched the dynamic import pattern ({tail} under {})",
            search_root.display()
        )));
    }

    Ok(generate_source(mode, &cases))
}

fn generate_source(mode: Mode, cases: &[(BTreeMap<String, String>, ModuleLocator)]) -> String {
    let mut out = String::new();

    out.push_str("const cases = {\n");
    for (vars, locator) in cases {
        let key = serde_json::to_string(&serde_json::to_string(vars).unwrap()).unwrap();
        let url = serde_json::to_string(&locator.url).unwrap();
        match mode {
            Mode::Eager => out.push_str(&format!("  {key}: () => require({url}),\n")),
            Mode::Lazy => out.push_str(&format!("  {key}: () => require.import({url}),\n")),
        }
    }
    out.push_str("};\n\n");

    let keys: Vec<&BTreeMap<String, String>> = cases.iter().map(|(vars, _)| vars).collect();
    out.push_str(&format!(
        "const keys = {};\n\n",
        serde_json::to_string(&keys).unwrap()
    ));

    out.push_str(
        "function canonicalKey(vars) {\n\
         \x20 const sorted = {};\n\
         \x20 for (const name of Object.keys(vars).sort())\n\
         \x20   sorted[name] = String(vars[name]);\n\
         \x20 return JSON.stringify(sorted);\n\
         }\n\n\
         function lookup(vars) {\n\
         \x20 const key = canonicalKey(vars);\n\
         \x20 if (!Object.prototype.hasOwnProperty.call(cases, key))\n\
         \x20   throw new Error(`No module matched the requested parameters (${key})`);\n\
         \x20 return cases[key];\n\
         }\n\n",
    );

    match mode {
        Mode::Eager => out.push_str(
            "function get(vars) {\n\
             \x20 return lookup(vars)();\n\
             }\n\n\
             async function fetch(vars) {\n\
             \x20 return get(vars);\n\
             }\n\n\
             module.exports = {keys, get, fetch};\n",
        ),
        Mode::Lazy => out.push_str(
            "async function fetch(vars) {\n\
             \x20 return lookup(vars)();\n\
             }\n\n\
             module.exports = {keys, fetch};\n",
        ),
    }

    out
}
