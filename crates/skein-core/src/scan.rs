//! Import specifier scanner.
//!
//! Finds the dependency specifiers declared by a module in the dev-runtime
//! format without parsing it: `require("...")` (static),
//! `require.import("...")` and `import("...")` (dynamic), plus
//! `import ... from "..."` / `export ... from "..."` statements so that
//! sources written as ES modules still surface their graph edges. Comments
//! are skipped; other string content is ignored.

use crate::error::{Position, Span};
use crate::resolve::ResolutionKind;

/// One import discovered in source code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedImport {
    pub kind: ResolutionKind,
    pub specifier: String,
    pub span: Span,
}

/// Scan source code for import specifiers.
///
/// Results keep first-appearance order and are deduplicated by
/// (kind, specifier).
#[must_use]
pub fn scan_imports(source: &str) -> Vec<ScannedImport> {
    let chars: Vec<char> = source.chars().collect();
    let mut scanner = Scanner {
        chars: &chars,
        i: 0,
        line: 1,
        results: Vec::new(),
    };
    scanner.run();
    scanner.results
}

struct Scanner<'a> {
    chars: &'a [char],
    i: usize,
    line: u32,
    results: Vec<ScannedImport>,
}

impl Scanner<'_> {
    fn run(&mut self) {
        while self.i < self.chars.len() {
            let c = self.chars[self.i];

            if c == '\n' {
                self.line += 1;
                self.i += 1;
            } else if c == '/' && self.peek(1) == Some('/') {
                while self.i < self.chars.len() && self.chars[self.i] != '\n' {
                    self.i += 1;
                }
            } else if c == '/' && self.peek(1) == Some('*') {
                self.i += 2;
                while self.i < self.chars.len() {
                    if self.chars[self.i] == '\n' {
                        self.line += 1;
                    }
                    if self.chars[self.i] == '*' && self.peek(1) == Some('/') {
                        self.i += 2;
                        break;
                    }
                    self.i += 1;
                }
            } else if self.at_keyword("require") {
                self.i += 7;
                self.scan_require();
            } else if self.at_keyword("import") {
                self.i += 6;
                self.scan_import();
            } else if self.at_keyword("export") {
                self.i += 6;
                self.scan_export_from();
            } else {
                self.i += 1;
            }
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.i + offset).copied()
    }

    /// Keyword match with word boundaries on both sides.
    fn at_keyword(&self, keyword: &str) -> bool {
        let len = keyword.len();
        if self.i + len > self.chars.len() {
            return false;
        }

        if self.i > 0 {
            let prev = self.chars[self.i - 1];
            if prev.is_alphanumeric() || prev == '_' || prev == '$' || prev == '.' {
                return false;
            }
        }

        if !self.chars[self.i..self.i + len]
            .iter()
            .copied()
            .eq(keyword.chars())
        {
            return false;
        }

        match self.chars.get(self.i + len) {
            Some(c) if c.is_alphanumeric() || *c == '_' || *c == '$' => false,
            _ => true,
        }
    }

    /// Like [`Self::at_keyword`] but without the leading-boundary check,
    /// for member positions (`require.import`).
    fn at_word(&self, word: &str) -> bool {
        let len = word.len();
        if self.i + len > self.chars.len() {
            return false;
        }

        if !self.chars[self.i..self.i + len]
            .iter()
            .copied()
            .eq(word.chars())
        {
            return false;
        }

        match self.chars.get(self.i + len) {
            Some(c) if c.is_alphanumeric() || *c == '_' || *c == '$' => false,
            _ => true,
        }
    }

    fn skip_whitespace(&mut self) {
        while self.i < self.chars.len() && self.chars[self.i].is_whitespace() {
            if self.chars[self.i] == '\n' {
                self.line += 1;
            }
            self.i += 1;
        }
    }

    /// After `require`: either `("spec")` or `.import("spec")`.
    fn scan_require(&mut self) {
        self.skip_whitespace();

        let kind = if self.peek(0) == Some('.') {
            self.i += 1;
            self.skip_whitespace();
            if !self.at_word("import") {
                return;
            }
            self.i += 6;
            self.skip_whitespace();
            ResolutionKind::DynamicImport
        } else {
            ResolutionKind::StaticImport
        };

        if self.peek(0) != Some('(') {
            return;
        }
        self.i += 1;
        self.skip_whitespace();

        if let Some(spec) = self.read_string() {
            self.push(kind, spec);
        }
    }

    /// After `import`: `("spec")` is dynamic; `"spec"` or `... from "spec"`
    /// is static.
    fn scan_import(&mut self) {
        self.skip_whitespace();

        if self.peek(0) == Some('(') {
            self.i += 1;
            self.skip_whitespace();
            if let Some(spec) = self.read_string() {
                self.push(ResolutionKind::DynamicImport, spec);
            }
            return;
        }

        if matches!(self.peek(0), Some('"' | '\'')) {
            if let Some(spec) = self.read_string() {
                self.push(ResolutionKind::StaticImport, spec);
            }
            return;
        }

        // `import x from "spec"`: the specifier is the first string literal
        // before the end of the statement.
        self.scan_until_from_string(ResolutionKind::StaticImport);
    }

    /// After `export`: only `export ... from "spec"` declares a dependency.
    fn scan_export_from(&mut self) {
        let start = self.i;
        let mut saw_from = false;

        while self.i < self.chars.len() {
            let c = self.chars[self.i];
            if c == ';' || c == '\n' {
                break;
            }
            if self.at_keyword("from") {
                saw_from = true;
                self.i += 4;
                break;
            }
            self.i += 1;
        }

        if !saw_from {
            self.i = start;
            return;
        }

        self.skip_whitespace();
        if let Some(spec) = self.read_string() {
            self.push(ResolutionKind::StaticImport, spec);
        }
    }

    fn scan_until_from_string(&mut self, kind: ResolutionKind) {
        while self.i < self.chars.len() {
            let c = self.chars[self.i];
            if c == ';' {
                return;
            }
            if c == '\n' {
                self.line += 1;
            }
            if c == '"' || c == '\'' {
                if let Some(spec) = self.read_string() {
                    self.push(kind, spec);
                }
                return;
            }
            self.i += 1;
        }
    }

    /// Read a quoted string literal at the current position.
    fn read_string(&mut self) -> Option<String> {
        let quote = self.peek(0)?;
        if quote != '"' && quote != '\'' {
            return None;
        }
        self.i += 1;

        let mut value = String::new();
        while self.i < self.chars.len() {
            let c = self.chars[self.i];
            if c == quote {
                self.i += 1;
                return Some(value);
            }
            if c == '\n' {
                return None;
            }
            value.push(c);
            self.i += 1;
        }

        None
    }

    fn push(&mut self, kind: ResolutionKind, specifier: String) {
        if specifier.is_empty() {
            return;
        }

        let already = self
            .results
            .iter()
            .any(|r| r.kind == kind && r.specifier == specifier);
        if already {
            return;
        }

        let position = Position {
            row: self.line,
            col: 1,
        };
        self.results.push(ScannedImport {
            kind,
            specifier,
            span: Span {
                start: position,
                end: position,
            },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(source: &str) -> Vec<(ResolutionKind, String)> {
        scan_imports(source)
            .into_iter()
            .map(|s| (s.kind, s.specifier))
            .collect()
    }

    #[test]
    fn test_scan_require() {
        assert_eq!(
            specs(r#"const a = require("./a.js");"#),
            vec![(ResolutionKind::StaticImport, "./a.js".to_string())]
        );
    }

    #[test]
    fn test_scan_require_import_is_dynamic() {
        assert_eq!(
            specs(r#"const p = require.import("./lazy.js");"#),
            vec![(ResolutionKind::DynamicImport, "./lazy.js".to_string())]
        );
    }

    #[test]
    fn test_scan_dynamic_import() {
        assert_eq!(
            specs(r#"import("./chunk.js").then(m => m);"#),
            vec![(ResolutionKind::DynamicImport, "./chunk.js".to_string())]
        );
    }

    #[test]
    fn test_scan_esm_forms() {
        let source = r#"
import def from "./def.js";
import { a, b } from './named.js';
import './side-effect.css';
export { x } from "./reexport.js";
"#;
        assert_eq!(
            specs(source),
            vec![
                (ResolutionKind::StaticImport, "./def.js".to_string()),
                (ResolutionKind::StaticImport, "./named.js".to_string()),
                (ResolutionKind::StaticImport, "./side-effect.css".to_string()),
                (ResolutionKind::StaticImport, "./reexport.js".to_string()),
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let source = r#"
// require("./commented.js")
/* import("./also-commented.js") */
const a = require("./real.js");
"#;
        assert_eq!(
            specs(source),
            vec![(ResolutionKind::StaticImport, "./real.js".to_string())]
        );
    }

    #[test]
    fn test_member_access_is_not_a_require() {
        assert_eq!(specs(r#"foo.require("./nope.js");"#), vec![]);
        assert_eq!(specs(r#"const requires = 1;"#), vec![]);
    }

    #[test]
    fn test_duplicates_collapse_by_kind_and_specifier() {
        let source = r#"
require("./a.js");
require("./a.js");
require.import("./a.js");
"#;
        assert_eq!(
            specs(source),
            vec![
                (ResolutionKind::StaticImport, "./a.js".to_string()),
                (ResolutionKind::DynamicImport, "./a.js".to_string()),
            ]
        );
    }

    #[test]
    fn test_span_lines_are_tracked() {
        let imports = scan_imports("\n\nrequire(\"./a.js\");\n");
        assert_eq!(imports[0].span.start.row, 3);
    }
}
