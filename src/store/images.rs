use std::path::PathBuf;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::types::ImageUpload;

/// Blob storage for item photos.
///
/// Implementations may be remote and slow; callers wrap every call in
/// [`super::retry::with_timeout`].
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Stores the bytes and returns the reference a client attaches to an item.
    /// `extension` becomes part of the key and decides the served content type.
    async fn put(&self, bytes: &[u8], extension: Option<&str>) -> anyhow::Result<ImageUpload>;

    /// The stored bytes, or `None` for an unknown key.
    async fn get(&self, storage_key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Removes a blob. Deleting an unknown key is not an error.
    async fn delete(&self, storage_key: &str) -> anyhow::Result<()>;
}

/// SHA-256 of the image bytes, hex encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn is_valid_content_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit())
}

/// Storage keys are generated by us; anything else could escape the image root.
/// A key is a stem of letters, digits and `-`, optionally followed by one
/// short extension.
pub fn is_valid_storage_key(key: &str) -> bool {
    let (stem, ext) = match key.split_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (key, None),
    };
    let stem_ok = !stem.is_empty() && stem.len() <= 64 && stem.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    let ext_ok = ext.map_or(true, |e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()));
    stem_ok && ext_ok
}

/// New storage key with the given extension.
pub fn new_storage_key(extension: Option<&str>) -> String {
    let stem = Uuid::new_v4().simple().to_string();
    match extension {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    }
}

/// File extension for an uploaded `Content-Type`. Only image types get one.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next()?.trim().to_ascii_lowercase();
    if !essence.starts_with("image/") {
        return None;
    }
    // pick an extension that maps back to the same type when served
    mime_guess::get_mime_extensions_str(&essence)?
        .iter()
        .copied()
        .find(|ext| mime_guess::from_ext(ext).first().is_some_and(|m| m.essence_str() == essence))
}

/// Content type an image is served with, derived from its key.
pub fn content_type_for(storage_key: &str) -> String {
    mime_guess::from_path(storage_key).first_or_octet_stream().essence_str().to_string()
}

/// Stores images as files named by their storage key below a root directory.
#[derive(Debug, Clone)]
pub struct LocalImageStore {
    root: PathBuf,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, storage_key: &str) -> anyhow::Result<PathBuf> {
        if !is_valid_storage_key(storage_key) {
            anyhow::bail!("invalid storage key: {:?}", storage_key);
        }
        Ok(self.root.join(storage_key))
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn put(&self, bytes: &[u8], extension: Option<&str>) -> anyhow::Result<ImageUpload> {
        tokio::fs::create_dir_all(&self.root).await?;
        let storage_key = new_storage_key(extension);
        let path = self.path_for(&storage_key)?;
        // Write to a temp name first so readers never see a half-written blob
        let tmp = self.root.join(format!("{}.part", storage_key));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(ImageUpload { storage_key, content_hash: content_hash(bytes) })
    }

    async fn get(&self, storage_key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.path_for(storage_key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, storage_key: &str) -> anyhow::Result<()> {
        let path = self.path_for(storage_key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = LocalImageStore::new(dir.path().join("images"));

        let upload = store.put(b"jpeg bytes", Some("jpg")).await.unwrap();
        assert!(is_valid_storage_key(&upload.storage_key));
        assert!(upload.storage_key.ends_with(".jpg"));
        assert_eq!(upload.content_hash, content_hash(b"jpeg bytes"));
        assert_eq!(store.get(&upload.storage_key).await.unwrap().as_deref(), Some(&b"jpeg bytes"[..]));

        store.delete(&upload.storage_key).await.unwrap();
        assert_eq!(store.get(&upload.storage_key).await.unwrap(), None);
        // second delete is a no-op
        store.delete(&upload.storage_key).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_keys_that_escape_the_root() {
        let dir = TempDir::new().unwrap();
        let store = LocalImageStore::new(dir.path());
        assert!(store.get("../etc/passwd").await.is_err());
        assert!(store.get("a.b.c").await.is_err());
        assert!(store.delete("a/b").await.is_err());
    }

    #[test]
    fn content_types_follow_the_key_extension() {
        assert_eq!(extension_for("image/png"), Some("png"));
        assert_eq!(extension_for("IMAGE/PNG; charset=binary"), Some("png"));
        assert_eq!(extension_for("text/html"), None);
        assert_eq!(extension_for("application/octet-stream"), None);

        let key = new_storage_key(extension_for("image/jpeg"));
        assert!(is_valid_storage_key(&key));
        assert_eq!(content_type_for(&key), "image/jpeg");
        assert_eq!(content_type_for("0123abcd"), "application/octet-stream");
    }

    #[test]
    fn content_hash_is_sha256_hex() {
        let h = content_hash(b"hello");
        assert!(is_valid_content_hash(&h));
        assert_eq!(h, "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");
        assert!(!is_valid_content_hash("xyz"));
    }
}
