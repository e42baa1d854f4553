//! Reading and writing the persisted manifest and knowledge tree.
//!
//! Writes go to a temp file in the target directory and are renamed into
//! place, so a reader never sees a half-written artifact.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use grove_shared::{GroveError, KnowledgeNode, PageRecord, Result};

/// Load a manifest. A missing file is `NotFound`, a malformed one `Schema`.
pub fn load_manifest(path: &Path) -> Result<Vec<PageRecord>> {
    let content = read_required(path, "manifest")?;
    let records: Vec<PageRecord> = serde_json::from_str(&content).map_err(|e| {
        GroveError::schema(format!("invalid manifest {}: {e}", path.display()))
    })?;
    for record in &records {
        record.validate()?;
    }
    Ok(records)
}

/// Persist a manifest.
pub fn save_manifest(path: &Path, records: &[PageRecord]) -> Result<()> {
    write_json_atomic(path, &records)
}

/// Load and validate a knowledge tree. A missing file is `NotFound`.
pub fn load_tree(path: &Path) -> Result<KnowledgeNode> {
    let content = read_required(path, "knowledge tree")?;
    KnowledgeNode::from_json_str(&content)
}

/// Persist a knowledge tree.
pub fn save_tree(path: &Path, tree: &KnowledgeNode) -> Result<()> {
    write_json_atomic(path, tree)
}

/// Path of the digest sidecar kept next to a manifest.
pub fn digest_path(manifest_path: &Path) -> PathBuf {
    let mut name = manifest_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".sha256");
    manifest_path.with_file_name(name)
}

/// Stored corpus digest, `None` if no sidecar exists.
pub fn load_digest(manifest_path: &Path) -> Result<Option<String>> {
    let path = digest_path(manifest_path);
    match std::fs::read_to_string(&path) {
        Ok(digest) => Ok(Some(digest.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(GroveError::io(&path, e)),
    }
}

pub fn save_digest(manifest_path: &Path, digest: &str) -> Result<()> {
    write_atomic(&digest_path(manifest_path), digest.as_bytes())
}

/// Write a JSON file (pretty-printed) atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| GroveError::validation(format!("JSON serialization failed: {e}")))?;
    write_atomic(path, json.as_bytes())?;
    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| GroveError::io(parent, e))?;
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| GroveError::validation(format!("not a file path: {}", path.display())))?;
    let mut temp_name = std::ffi::OsString::from(".");
    temp_name.push(file_name);
    temp_name.push(".tmp");
    let temp = path.with_file_name(temp_name);

    std::fs::write(&temp, bytes).map_err(|e| GroveError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| GroveError::io(path, e))?;
    Ok(())
}

fn read_required(path: &Path, what: &str) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(GroveError::not_found(
            format!("{what} at {}", path.display()),
        )),
        Err(e) => Err(GroveError::io(path, e)),
    }
}
