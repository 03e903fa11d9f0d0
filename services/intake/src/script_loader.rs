use anyhow::{Context, Result};
use intake_core::Script;
use std::fs;
use std::path::Path;

/// Reads a conversation script from a JSON file and checks it is usable.
pub fn load_script(path: &Path) -> Result<Script> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read script file: {}", path.display()))?;

    let script: Script = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse script file: {}", path.display()))?;

    script
        .validate()
        .with_context(|| format!("Invalid script in {}", path.display()))?;

    Ok(script)
}
