use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

pub fn display_path(path: &Path, base: Option<&Path>) -> String {
    if let Some(base) = base {
        if let Ok(relative) = path.strip_prefix(base) {
            return relative.display().to_string();
        }
    }
    path.display().to_string()
}

pub fn truncate_bytes(bytes: &[u8], max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    truncate_string(&text, max_bytes)
}

pub fn truncate_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut truncated = String::new();
    for ch in text.chars() {
        if truncated.len() + ch.len_utf8() > max_bytes {
            break;
        }
        truncated.push(ch);
    }
    truncated
}

/// Bound diagnostic text to `max_chars` characters after trimming.
pub fn bounded_excerpt(text: &str, max_chars: usize) -> String {
    text.trim().chars().take(max_chars).collect()
}

/// Turn a project root into a stable, filesystem-safe directory name.
pub fn path_slug(path: &Path) -> String {
    let raw = path.display().to_string();
    let mut slug = String::with_capacity(raw.len());
    let mut last_dash = true;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' {
            slug.push(ch);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches(|ch| ch == '-' || ch == '.').to_string();
    if slug.is_empty() {
        "root".to_string()
    } else {
        slug
    }
}

pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value).context("serialize JSON")?;
    bytes.push(b'\n');
    write_bytes_atomic(path, &bytes)
}

/// Write through a sibling temp file so readers never observe partial output.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    let mut staged = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("stage write in {}", parent.display()))?;
    staged
        .write_all(bytes)
        .with_context(|| format!("write staged {}", path.display()))?;
    staged
        .persist(path)
        .map_err(|err| anyhow!("persist {}: {}", path.display(), err.error))?;
    Ok(())
}
