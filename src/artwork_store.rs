//! Content-addressed storage for disc artwork blobs.
//!
//! Slots only keep the returned file name; the bytes are never decoded here.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

const ARTWORK_VERSION: &str = "art-v1";

#[derive(Debug, Clone)]
pub struct ArtworkStore {
    root: PathBuf,
}

fn ensure_dir(path: &Path) -> Option<()> {
    fs::create_dir_all(path).ok()
}

fn artwork_file_name(bytes: &[u8]) -> String {
    let mut keyed = Vec::with_capacity(ARTWORK_VERSION.len() + bytes.len());
    keyed.extend_from_slice(ARTWORK_VERSION.as_bytes());
    keyed.extend_from_slice(bytes);
    format!("{:x}.art", md5::compute(keyed))
}

fn save_atomic(bytes: &[u8], temp_path: &Path, target_path: &Path) -> Option<()> {
    if temp_path.exists() {
        let _ = fs::remove_file(temp_path);
    }
    fs::write(temp_path, bytes).ok()?;
    fs::rename(temp_path, target_path).ok()?;
    Some(())
}

impl ArtworkStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores `bytes` and returns the reference to keep in the slot. Identical
    /// images share one file.
    pub fn store(&self, bytes: &[u8]) -> Option<String> {
        if bytes.is_empty() {
            return None;
        }
        ensure_dir(&self.root)?;
        let name = artwork_file_name(bytes);
        let target_path = self.root.join(&name);
        if target_path.exists() {
            return Some(name);
        }

        let temp_path = target_path.with_extension("art.tmp");
        if save_atomic(bytes, &temp_path, &target_path).is_none() {
            warn!("ArtworkStore: failed to write {}", target_path.display());
            return None;
        }
        debug!("ArtworkStore: stored {} bytes as {}", bytes.len(), name);
        Some(name)
    }

    /// Path of a stored reference, if it still exists.
    pub fn path_for(&self, artwork_ref: &str) -> Option<PathBuf> {
        // References are bare file names; anything else was not produced here.
        if artwork_ref.contains(['/', '\\']) || artwork_ref.starts_with('.') {
            return None;
        }
        let path = self.root.join(artwork_ref);
        path.exists().then_some(path)
    }

    /// Deletes artwork files no slot references anymore.
    pub fn prune_unreferenced<'a>(&self, referenced: impl IntoIterator<Item = &'a str>) -> usize {
        let keep: std::collections::HashSet<&str> = referenced.into_iter().collect();
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.ends_with(".art") && !keep.contains(name) && fs::remove_file(entry.path()).is_ok()
            {
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_store(name: &str) -> ArtworkStore {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be valid")
            .as_nanos();
        ArtworkStore::new(std::env::temp_dir().join(format!("fivedisc_art_{name}_{nonce}")))
    }

    #[test]
    fn test_store_is_content_addressed() {
        let store = unique_store("dedupe");
        let first = store.store(b"png bytes").expect("stored");
        let second = store.store(b"png bytes").expect("stored");
        let other = store.store(b"jpeg bytes").expect("stored");

        assert_eq!(first, second);
        assert_ne!(first, other);
        let path = store.path_for(&first).expect("file exists");
        assert_eq!(fs::read(path).unwrap(), b"png bytes");
        assert!(store.store(b"").is_none());
    }

    #[test]
    fn test_path_for_rejects_foreign_references() {
        let store = unique_store("foreign");
        assert_eq!(store.path_for("../etc/passwd"), None);
        assert_eq!(store.path_for("missing.art"), None);
    }

    #[test]
    fn test_prune_removes_only_unreferenced_files() {
        let store = unique_store("prune");
        let kept = store.store(b"keep").unwrap();
        let dropped = store.store(b"drop").unwrap();

        assert_eq!(store.prune_unreferenced([kept.as_str()]), 1);
        assert!(store.path_for(&kept).is_some());
        assert!(store.path_for(&dropped).is_none());
    }
}
