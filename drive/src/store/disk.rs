use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use lru::LruCache;

use super::*;

const TEMP_EXT: &str = "tmp";

/// File-backed store, one file per key under a root directory.
///
/// Reads go through an in-memory LRU cache bounded by a byte budget. Writes are made atomic by writing a `.tmp`
/// sibling first and renaming it over the key file.
///
/// I/O is blocking and runs on the calling task. Entries are a few dozen bytes (a part cursor, comma-joined part
/// tokens, a session record), written once per uploaded part, so the cost stays negligible next to the part transfer
/// it follows.
#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
    cache: Mutex<ReadCache>,
}

#[derive(Debug)]
struct ReadCache {
    entries: LruCache<String, String>,
    bytes: usize,
    budget: usize,
}

impl ReadCache {
    fn get(&mut self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: String) {
        self.remove(key);

        let size = key.len() + value.len();
        if size > self.budget {
            return;
        }

        while self.bytes + size > self.budget {
            match self.entries.pop_lru() {
                Some((k, v)) => self.bytes -= k.len() + v.len(),
                None => break,
            }
        }

        self.bytes += size;
        self.entries.put(key.to_owned(), value);
    }

    fn remove(&mut self, key: &str) {
        if let Some(v) = self.entries.pop(key) {
            self.bytes -= key.len() + v.len();
        }
    }
}

impl DiskStore {
    /// Open (and create when missing) a store rooted at `root`.
    ///
    /// Leftover `.tmp` files of interrupted writes are cleaned up.
    pub fn open(root: impl Into<PathBuf>, budget: usize) -> Result<Self, StoreError> {
        let root = root.into();

        std::fs::create_dir_all(&root)?;

        for entry in root.read_dir()? {
            let path = entry?.path();

            if path.extension().is_some_and(|ext| ext == TEMP_EXT) {
                tracing::trace!("Clean incomplete store entry: `{}`", path.display());

                let _ = std::fs::remove_file(path);
            }
        }

        Ok(Self {
            root,
            cache: Mutex::new(ReadCache {
                entries: LruCache::unbounded(),
                bytes: 0,
                budget,
            }),
        })
    }

    /// Bytes currently held by the read cache.
    pub fn cached_bytes(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).bytes
    }

    fn path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

impl KvStore for DiskStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path(key)?;

        if let Some(value) = self.cache.lock().unwrap_or_else(PoisonError::into_inner).get(key) {
            return Ok(Some(value));
        }

        match std::fs::read_to_string(&path) {
            Ok(value) => {
                self.cache.lock().unwrap_or_else(PoisonError::into_inner).put(key, value.clone());
                Ok(Some(value))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set_raw(&self, key: &str, raw: String) -> Result<(), StoreError> {
        let path = self.path(key)?;
        let tmp = path.with_extension(TEMP_EXT);

        std::fs::write(&tmp, raw.as_bytes())?;
        std::fs::rename(&tmp, &path)?;

        self.cache.lock().unwrap_or_else(PoisonError::into_inner).put(key, raw);

        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path(key)?;

        self.cache.lock().unwrap_or_else(PoisonError::into_inner).remove(key);

        match std::fs::remove_file(path) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let store = DiskStore::open(dir.path(), 1_024).unwrap();
        store.save("chunk_abc", &20_971_520u64).unwrap();
        store.save("md5s_abc", &"e1,e2".to_owned()).unwrap();
        drop(store);

        let store = DiskStore::open(dir.path(), 1_024).unwrap();
        assert_eq!(store.cached_bytes(), 0);
        assert_eq!(store.load::<u64>("chunk_abc").unwrap(), Some(20_971_520));
        assert_eq!(store.load::<String>("md5s_abc").unwrap().as_deref(), Some("e1,e2"));
        assert!(store.cached_bytes() > 0);
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path(), 1_024).unwrap();

        store.save("k", &1i64).unwrap();
        store.delete("k").unwrap();
        store.delete("k").unwrap();

        assert_eq!(store.get_raw("k").unwrap(), None);
        assert!(!dir.path().join("k").exists());
        assert_eq!(store.cached_bytes(), 0);
    }

    #[test]
    fn test_cache_budget() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path(), 16).unwrap();

        store.set_raw("a", "s:1234567".into()).unwrap(); // 10 bytes
        store.set_raw("b", "s:1234567".into()).unwrap(); // evicts `a`
        assert_eq!(store.cached_bytes(), 10);

        store.set_raw("c", "s:this value is larger than the budget".into()).unwrap();
        assert_eq!(store.cached_bytes(), 10);

        // evicted and oversized entries are still served from disk
        assert_eq!(store.get_raw("a").unwrap().as_deref(), Some("s:1234567"));
        assert_eq!(store.get_raw("c").unwrap().as_deref(), Some("s:this value is larger than the budget"));
    }

    #[test]
    fn test_cleans_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("session_x.tmp"), "r:{").unwrap();

        let _store = DiskStore::open(dir.path(), 1_024).unwrap();

        assert!(!dir.path().join("session_x.tmp").exists());
    }

    #[test]
    fn test_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path(), 1_024).unwrap();

        assert!(matches!(store.set_raw("../x", "i:1".into()), Err(StoreError::InvalidKey(_))));
    }
}
