//! Session cookies persisted between runs, one `name=value` per line.

use anyhow::{Context, Result};
use std::path::Path;
use taskdesk_client::store::secure_write;

pub fn load_cookies(path: &Path) -> Result<Vec<(String, String)>> {
    if !path.exists() {
        return Ok(vec![]);
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read session file {}", path.display()))?;
    Ok(parse_cookies(&raw))
}

pub fn save_cookies(path: &Path, cookies: &[(String, String)]) -> Result<()> {
    if cookies.is_empty() {
        return clear_cookies(path);
    }

    let content = cookies
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("\n");
    secure_write(path, &content)
        .with_context(|| format!("Failed to write session file {}", path.display()))
}

pub fn clear_cookies(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove session file {}", path.display()))?;
    }
    Ok(())
}

fn parse_cookies(raw: &str) -> Vec<(String, String)> {
    raw.lines()
        .filter_map(|line| {
            let (name, value) = line.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                None
            } else {
                Some((name.to_string(), value.trim().to_string()))
            }
        })
        .collect()
}
