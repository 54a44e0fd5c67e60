use super::ObjectStore;
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Filesystem-backed object store rooted at the configured data directory.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.path_for(key)).await?)
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(fs::metadata(self.path_for(key)).await.is_ok())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Walk from the directory part of the prefix so listing one period
        // never touches its siblings
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx + 1],
            None => "",
        };
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.root.join(dir_part)
        };
        if fs::metadata(&start).await.is_err() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Some(key) = key_for(&self.root, &path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn key_for(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.put("raw/202501/4.csv", b"a,b\n1,2\n").await.unwrap();

        assert!(store.exists("raw/202501/4.csv").await.unwrap());
        assert_eq!(store.get("raw/202501/4.csv").await.unwrap(), b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn list_scopes_to_the_prefix_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.put("raw/202502/b.csv", b"x").await.unwrap();
        store.put("raw/202501/b.csv", b"x").await.unwrap();
        store.put("raw/202501/a.csv", b"x").await.unwrap();
        store.put("normalized/202501/t.csv", b"x").await.unwrap();

        let keys = store.list("raw/202501/").await.unwrap();
        assert_eq!(keys, vec!["raw/202501/a.csv", "raw/202501/b.csv"]);

        let all_raw = store.list("raw/").await.unwrap();
        assert_eq!(all_raw.len(), 3);
    }

    #[tokio::test]
    async fn missing_prefix_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.list("raw/209901/").await.unwrap().is_empty());
    }
}
