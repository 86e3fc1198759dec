//! Shader extraction and minification
//!
//! Extraction turns every shader fragment in a source directory into one
//! build artifact. Minification runs the shader-minify pipeline over those
//! artifacts in place. Extraction must finish for the whole directory before
//! minification starts, and both before anything reads the minified bodies.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{DistError, Result};
use crate::files::VirtualFile;
use crate::rewrite::{shader_minify, strip_comments};

/// Extension given to every extracted artifact
pub const ARTIFACT_EXTENSION: &str = "glsl";

/// Default fragment extensions picked up from the source directory
pub fn default_extensions() -> Vec<String> {
    ["glsl", "vert", "frag"].iter().map(|s| s.to_string()).collect()
}

/// Write one artifact per fragment found directly in `source_dir`
///
/// Fragments are processed in file-name order. With `strip`, comments are
/// removed during extraction. Two fragments that map to the same artifact
/// name are rejected before anything is written.
pub fn extract(
    source_dir: &Path,
    dest_dir: &Path,
    strip: bool,
    extensions: &[String],
) -> Result<Vec<VirtualFile>> {
    let mut planned: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();

    let entries = WalkDir::new(source_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    for entry in entries {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || !has_extension(path, extensions) {
            continue;
        }

        let Some(stem) = path.file_stem() else { continue };
        let artifact = dest_dir.join(format!("{}.{}", stem.to_string_lossy(), ARTIFACT_EXTENSION));
        if let Some(first) = planned.get(&artifact) {
            return Err(DistError::ShaderCollision {
                artifact,
                first: first.clone(),
                second: path.to_path_buf(),
            });
        }
        planned.insert(artifact, path.to_path_buf());
    }

    let mut fragments: Vec<(PathBuf, PathBuf)> = planned.into_iter().collect();
    fragments.sort_by(|a, b| a.1.cmp(&b.1));

    let mut artifacts = Vec::with_capacity(fragments.len());
    for (dest, fragment) in fragments {
        let source = std::fs::read_to_string(&fragment)?;
        let content = if strip {
            strip_comments().apply(&source)
        } else {
            source
        };

        let artifact = VirtualFile::new(dest, content);
        artifact.write()?;
        debug!(fragment = %fragment.display(), artifact = %artifact.path.display(), "extracted shader");
        artifacts.push(artifact);
    }

    Ok(artifacts)
}

/// Minify artifacts in memory and on disk
pub fn minify(artifacts: &mut [VirtualFile]) -> Result<()> {
    for artifact in artifacts.iter_mut() {
        artifact.content = minify_source(&artifact.content);
        artifact.write()?;
    }
    Ok(())
}

/// Minify every artifact already present in `dir`
pub fn minify_dir(dir: &Path) -> Result<Vec<VirtualFile>> {
    let mut artifacts = Vec::new();
    let entries = WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name();
    for entry in entries {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        if entry.file_type().is_file() && has_extension(entry.path(), &[ARTIFACT_EXTENSION.to_string()]) {
            artifacts.push(VirtualFile::read(entry.path())?);
        }
    }
    minify(&mut artifacts)?;
    Ok(artifacts)
}

pub fn minify_source(source: &str) -> String {
    shader_minify().apply(source)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e.as_str())))
        .unwrap_or(false)
}
