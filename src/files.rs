//! File sets: glob expansion and source -> destination mapping
//!
//! Patterns are expanded fresh every time a task runs, relative to the
//! project directory. A pattern starting with `!` removes earlier matches.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DistError, Result};
use crate::tree::ConfigTree;

/// A path plus its text content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFile {
    pub path: PathBuf,
    pub content: String,
}

impl VirtualFile {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn read(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)?;
        Ok(Self { path, content })
    }

    /// Write the content, creating parent directories as needed
    pub fn write(&self) -> Result<()> {
        write_file(&self.path, &self.content)
    }
}

pub fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    debug!(path = %path.display(), bytes = content.len(), "wrote file");
    Ok(())
}

/// `{ src, dest, expand, flatten }` as written in task options
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileMapping {
    pub src: Vec<String>,
    pub dest: String,

    /// Map every matched file to its own destination
    #[serde(default)]
    pub expand: bool,

    /// Drop directory components when building destinations
    #[serde(default)]
    pub flatten: bool,
}

/// Concrete sources for one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePair {
    pub src: Vec<PathBuf>,
    pub dest: PathBuf,
}

impl FileMapping {
    /// Resolve references, expand globs and build source/destination pairs
    pub fn pairs(&self, tree: &ConfigTree, preserve_order: bool) -> Result<Vec<FilePair>> {
        let base = tree.base_dir();
        let patterns = tree.resolve_list(&self.src)?;
        let dest = tree.resolve_string(&self.dest)?;
        let sources = expand(&patterns, base, preserve_order)?;

        let dest_is_dir = dest.ends_with('/') || dest.ends_with('\\');
        let dest = base.join(&dest);

        if self.expand {
            return Ok(sources
                .into_iter()
                .map(|src| {
                    let name = if self.flatten {
                        src.file_name().map(PathBuf::from).unwrap_or_default()
                    } else {
                        src.strip_prefix(base).unwrap_or(&src).to_path_buf()
                    };
                    FilePair {
                        dest: dest.join(name),
                        src: vec![src],
                    }
                })
                .collect());
        }

        if dest_is_dir {
            return Ok(sources
                .into_iter()
                .map(|src| FilePair {
                    dest: dest.join(src.file_name().map(PathBuf::from).unwrap_or_default()),
                    src: vec![src],
                })
                .collect());
        }

        Ok(vec![FilePair { src: sources, dest }])
    }
}

/// Expand glob patterns relative to `base`
///
/// With `preserve_order` the result follows pattern order (matches of one
/// pattern come back sorted by `glob`); otherwise the whole list is sorted.
/// Duplicates are dropped either way, keeping the first occurrence.
pub fn expand(patterns: &[String], base: &Path, preserve_order: bool) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let (exclude, pattern) = match pattern.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, pattern.as_str()),
        };

        let matches: Vec<PathBuf> = glob_paths(pattern, base)?
            .into_iter()
            .filter(|path| path.is_file())
            .collect();

        if exclude {
            files.retain(|f| !matches.contains(f));
            continue;
        }

        if matches.is_empty() {
            warn!(pattern = %pattern, "pattern matched no files");
        }

        for path in matches {
            if !files.contains(&path) {
                files.push(path);
            }
        }
    }

    if !preserve_order {
        files.sort();
    }

    Ok(files)
}

/// Every path (file or directory) matching one pattern relative to `base`
pub fn glob_paths(pattern: &str, base: &Path) -> Result<Vec<PathBuf>> {
    let full = if Path::new(pattern).is_absolute() {
        pattern.to_string()
    } else {
        format!(
            "{}/{}",
            glob::Pattern::escape(&base.to_string_lossy()),
            pattern
        )
    };

    Ok(glob::glob(&full)
        .map_err(|source| DistError::InvalidGlob {
            pattern: pattern.to_string(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .collect())
}
