//! Project configuration surface.
//!
//! Configuration files are loaded by the caller (the CLI); core only owns
//! the types and the `{}` token substitution applied to folder patterns.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Project configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub patterns: Patterns,
    pub builds: HashMap<String, BuildConfig>,
    pub servers: HashMap<String, ServerConfig>,
}

/// Folder patterns. A `{}` token substitutes the build/server name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Patterns {
    pub dist_folder: String,
    pub source_folder: String,
}

impl Default for Patterns {
    fn default() -> Self {
        Self {
            dist_folder: "dist/{}".to_string(),
            source_folder: "sources".to_string(),
        }
    }
}

impl Patterns {
    /// Dist folder for a named build, with `{}` substituted.
    #[must_use]
    pub fn dist_folder_for(&self, name: &str) -> String {
        substitute(&self.dist_folder, name)
    }

    /// Source folder for a named build/server, with `{}` substituted.
    #[must_use]
    pub fn source_folder_for(&self, name: &str) -> String {
        substitute(&self.source_folder, name)
    }
}

/// One named build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildConfig {
    /// Entry globs, relative to the source folder.
    pub include: Vec<String>,
}

/// One named dev server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Folder holding the route page files.
    pub page_folder: String,
}

fn substitute(pattern: &str, name: &str) -> String {
    pattern.replace("{}", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dist_folder_substitution() {
        let patterns = Patterns {
            dist_folder: "dist/{}".to_string(),
            source_folder: "sources".to_string(),
        };
        assert_eq!(patterns.dist_folder_for("web"), "dist/web");
        assert_eq!(patterns.source_folder_for("web"), "sources");
    }

    #[test]
    fn test_config_parses_camel_case() {
        let config: Config = serde_json::from_str(
            r#"{
                "patterns": {"distFolder": "out/{}", "sourceFolder": "src"},
                "builds": {"lib": {"include": ["**/*.js"]}},
                "servers": {"web": {"pageFolder": "pages"}}
            }"#,
        )
        .unwrap();

        assert_eq!(config.patterns.dist_folder_for("lib"), "out/lib");
        assert_eq!(config.builds["lib"].include, vec!["**/*.js"]);
        assert_eq!(config.servers["web"].page_folder, "pages");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.patterns.source_folder, "sources");
        assert!(config.builds.is_empty());
    }
}
