//! Build context assembly: directory walking and tar packing

use crate::{BuildError, Result};
use std::path::{Path, PathBuf};

/// One file of the build context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFile {
    /// Path relative to the context root
    pub relative_path: PathBuf,
    pub size: u64,
    pub content: Vec<u8>,
}

fn context_error(path: &Path, e: std::io::Error) -> BuildError {
    BuildError::Context(format!("{}: {}", path.display(), e))
}

/// List every regular file below `dir`, sorted for a stable archive order
pub fn directory_to_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| context_error(dir, e))?;

    for entry in entries {
        let entry = entry.map_err(|e| context_error(dir, e))?;
        let path = entry.path();
        // Follows symlinks, like the daemon does when it reads the context
        let metadata = std::fs::metadata(&path).map_err(|e| context_error(&path, e))?;

        if metadata.is_dir() {
            walk(&path, files)?;
        } else if metadata.is_file() {
            files.push(path);
        }
    }

    Ok(())
}

/// Read every file below `dir` into `(relative path, size, content)` entries
pub async fn collect_context_files(dir: &Path) -> Result<Vec<ContextFile>> {
    let root = tokio::fs::canonicalize(dir)
        .await
        .map_err(|e| context_error(dir, e))?;

    let walk_root = root.clone();
    let paths = tokio::task::spawn_blocking(move || directory_to_files(&walk_root))
        .await
        .map_err(|e| BuildError::Context(format!("directory walk failed: {}", e)))??;

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| context_error(&path, e))?;
        let content = tokio::fs::read(&path)
            .await
            .map_err(|e| context_error(&path, e))?;
        let relative_path = path
            .strip_prefix(&root)
            .map_err(|_| {
                BuildError::Context(format!("{} is outside {}", path.display(), root.display()))
            })?
            .to_path_buf();

        files.push(ContextFile {
            relative_path,
            size: metadata.len(),
            content,
        });
    }

    tracing::debug!("Collected {} context files from {:?}", files.len(), dir);
    Ok(files)
}

/// Pack context files into an uncompressed tar archive
pub fn pack_context(files: &[ContextFile]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    for file in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(file.content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        builder
            .append_data(&mut header, &file.relative_path, file.content.as_slice())
            .map_err(|e| context_error(&file.relative_path, e))?;
        if file.size != file.content.len() as u64 {
            tracing::debug!(
                "{} changed size while reading ({} -> {} bytes)",
                file.relative_path.display(),
                file.size,
                file.content.len()
            );
        }
    }

    builder
        .into_inner()
        .map_err(|e| BuildError::Context(format!("failed to finish archive: {}", e)))
}
