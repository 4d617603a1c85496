pub mod build;
pub mod dev;

use miette::{IntoDiagnostic, Result};
use skein_core::Config;
use std::path::Path;

/// Load `skein.config.json` from the project root, falling back to the
/// defaults when absent.
pub fn load_config(root: &Path) -> Result<Config> {
    let path = root.join("skein.config.json");
    if !path.is_file() {
        return Ok(Config::default());
    }

    let raw = std::fs::read_to_string(&path).into_diagnostic()?;
    serde_json::from_str(&raw).into_diagnostic()
}
