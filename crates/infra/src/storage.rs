//! Object storage port for evidence binaries.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::StorageError;

pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` under `path` and return a URL that resolves to them.
    fn upload(&self, path: &str, bytes: &[u8]) -> Result<String, StorageError>;
}

/// In-memory object storage for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryObjectStorage {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
}

impl InMemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upload fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn get(&self, url: &str) -> Option<Vec<u8>> {
        let path = url.strip_prefix("memory://")?;
        self.objects.read().ok()?.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStorage for InMemoryObjectStorage {
    fn upload(&self, path: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let failed = |message: &str| StorageError::Upload {
            path: path.to_string(),
            message: message.to_string(),
        };
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(failed("storage unavailable"));
        }
        let mut objects = self.objects.write().map_err(|_| failed("lock poisoned"))?;
        objects.insert(path.to_string(), bytes.to_vec());
        Ok(format!("memory://{path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_then_fetch() {
        let storage = InMemoryObjectStorage::new();
        let url = storage.upload("loadings/1/before.jpg", b"jpeg").unwrap();
        assert_eq!(url, "memory://loadings/1/before.jpg");
        assert_eq!(storage.get(&url).unwrap(), b"jpeg".to_vec());
    }

    #[test]
    fn unavailable_storage_fails_uploads() {
        let storage = InMemoryObjectStorage::new();
        storage.set_unavailable(true);
        assert!(storage.upload("x.jpg", b"").is_err());
        assert!(storage.is_empty());
    }
}
