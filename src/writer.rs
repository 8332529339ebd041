//! Output writer: deterministic site path → file mapping.
//!
//! ```text
//! /                      → index.html
//! /2024/03/hello/        → 2024/03/hello/index.html
//! /about                 → about/index.html
//! /wp-content/a.css      → wp-content/a.css          (assets, verbatim)
//! ```
//!
//! Pages always become directory indexes so the clean URLs keep working
//! on a static host. Paths with `..` segments are rejected.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Refusing to write outside the output directory: {0}")]
    UnsafePath(String),
}

/// Path segments with query and fragment removed, validated.
fn segments(path: &str) -> Result<Vec<&str>, WriteError> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    if segments.iter().any(|s| *s == ".." || s.contains('\\')) {
        return Err(WriteError::UnsafePath(path.to_string()));
    }
    Ok(segments)
}

/// File a page at `path` is written to.
pub fn output_path(output_dir: &Path, path: &str) -> Result<PathBuf, WriteError> {
    let mut out = output_dir.to_path_buf();
    for segment in segments(path)? {
        out.push(segment);
    }
    out.push("index.html");
    Ok(out)
}

/// File an asset at site path `path` is written to.
pub fn asset_path(output_dir: &Path, path: &str) -> Result<PathBuf, WriteError> {
    let segments = segments(path)?;
    if segments.is_empty() {
        return Err(WriteError::UnsafePath(path.to_string()));
    }
    let mut out = output_dir.to_path_buf();
    out.extend(segments);
    Ok(out)
}

/// Write `bytes` to `dest`, creating parent directories.
pub fn write_file(dest: &Path, bytes: &[u8]) -> Result<u64, WriteError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(dest, bytes)?;
    Ok(bytes.len() as u64)
}

/// Write a page, returning where it went and its size.
pub fn write_page(output_dir: &Path, path: &str, html: &[u8]) -> Result<(PathBuf, u64), WriteError> {
    let dest = output_path(output_dir, path)?;
    let size = write_file(&dest, html)?;
    Ok((dest, size))
}

/// Empty the output directory for a full build, creating it if needed.
pub fn clear_output_dir(dir: &Path) -> Result<(), WriteError> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}
