//! In-memory blob store.

use crate::metadata::{AxoStorageMetadata, Tags};
use crate::service::{validate_location, StorageService};
use axo_types::{AxoError, AxoResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredBlob {
    metadata: AxoStorageMetadata,
    data: Vec<u8>,
}

/// Blob store kept in process memory.
#[derive(Debug)]
pub struct MemoryStorageService {
    producer_id: String,
    blobs: RwLock<HashMap<(String, String), StoredBlob>>,
}

impl MemoryStorageService {
    pub fn new(producer_id: impl Into<String>) -> Self {
        Self {
            producer_id: producer_id.into(),
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored blobs, disabled ones included.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// Overwrites stored bytes without touching the metadata.
    pub fn corrupt(&self, bucket_id: &str, key: &str, data: Vec<u8>) -> bool {
        match self
            .blobs
            .write()
            .get_mut(&(bucket_id.to_string(), key.to_string()))
        {
            Some(blob) => {
                blob.data = data;
                true
            }
            None => false,
        }
    }

    fn lookup(&self, bucket_id: &str, key: &str) -> AxoResult<StoredBlob> {
        validate_location(bucket_id, key)?;
        self.blobs
            .read()
            .get(&(bucket_id.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| AxoError::not_found(format!("{}/{}", bucket_id, key)))
    }
}

impl Default for MemoryStorageService {
    fn default() -> Self {
        Self::new("axo")
    }
}

impl StorageService for MemoryStorageService {
    fn put(
        &self,
        bucket_id: &str,
        key: &str,
        data: &[u8],
        tags: &Tags,
        chunk_size: usize,
    ) -> AxoResult<String> {
        validate_location(bucket_id, key)?;
        let metadata =
            AxoStorageMetadata::describe(bucket_id, key, data, tags, chunk_size, &self.producer_id);
        self.blobs.write().insert(
            (bucket_id.to_string(), key.to_string()),
            StoredBlob {
                metadata,
                data: data.to_vec(),
            },
        );
        debug!(bucket_id, key, size = data.len(), "stored blob in memory");
        Ok(key.to_string())
    }

    fn get(&self, bucket_id: &str, key: &str, _chunk_size: usize) -> AxoResult<Vec<u8>> {
        let blob = self.lookup(bucket_id, key)?;
        if blob.metadata.is_disabled {
            return Err(AxoError::not_found(format!(
                "{}/{} is disabled",
                bucket_id, key
            )));
        }
        blob.metadata.verify(&blob.data)?;
        Ok(blob.data)
    }

    fn get_metadata(&self, bucket_id: &str, key: &str) -> AxoResult<AxoStorageMetadata> {
        Ok(self.lookup(bucket_id, key)?.metadata)
    }

    fn delete(&self, bucket_id: &str, key: &str) -> AxoResult<bool> {
        validate_location(bucket_id, key)?;
        let removed = self
            .blobs
            .write()
            .remove(&(bucket_id.to_string(), key.to_string()))
            .is_some();
        Ok(removed)
    }

    fn disable(&self, bucket_id: &str, key: &str) -> AxoResult<()> {
        validate_location(bucket_id, key)?;
        let mut blobs = self.blobs.write();
        let blob = blobs
            .get_mut(&(bucket_id.to_string(), key.to_string()))
            .ok_or_else(|| AxoError::not_found(format!("{}/{}", bucket_id, key)))?;
        blob.metadata.is_disabled = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::checksum;
    use axo_types::ErrorKind;

    #[test]
    fn test_put_get_delete() {
        let storage = MemoryStorageService::default();
        let key = storage.put("b1", "k1", b"hello", &Tags::new(), 0).unwrap();
        assert_eq!(key, "k1");
        assert_eq!(storage.get("b1", "k1", 0).unwrap(), b"hello");

        let metadata = storage.get_metadata("b1", "k1").unwrap();
        assert_eq!(metadata.size, 5);
        assert_eq!(metadata.checksum, checksum(b"hello"));
        assert_eq!(metadata.producer_id, "axo");

        assert!(storage.delete("b1", "k1").unwrap());
        assert!(!storage.delete("b1", "k1").unwrap());
        let err = storage.get("b1", "k1", 0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_buckets_partition_keys() {
        let storage = MemoryStorageService::default();
        storage.put("a", "k", b"1", &Tags::new(), 0).unwrap();
        storage.put("b", "k", b"2", &Tags::new(), 0).unwrap();
        assert_eq!(storage.get("a", "k", 0).unwrap(), b"1");
        assert_eq!(storage.get("b", "k", 0).unwrap(), b"2");
    }

    #[test]
    fn test_corruption_detected_on_read() {
        let storage = MemoryStorageService::default();
        storage.put("b", "k", b"hello", &Tags::new(), 0).unwrap();
        assert!(storage.corrupt("b", "k", b"jello".to_vec()));
        let err = storage.get("b", "k", 0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
    }

    #[test]
    fn test_disabled_blob_reads_as_missing() {
        let storage = MemoryStorageService::default();
        storage.put("b", "k", b"x", &Tags::new(), 0).unwrap();
        storage.disable("b", "k").unwrap();
        let err = storage.get("b", "k", 0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(storage.get_metadata("b", "k").unwrap().is_disabled);
    }

    #[test]
    fn test_concurrent_puts_and_gets() {
        use std::sync::Arc;

        let storage = Arc::new(MemoryStorageService::default());
        storage.put("b", "shared", b"seed", &Tags::new(), 0).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|worker: u8| {
                let storage = storage.clone();
                std::thread::spawn(move || {
                    for round in 0..100u8 {
                        let own = format!("k{}", worker);
                        let data = vec![worker; 64 + round as usize];
                        storage.put("b", &own, &data, &Tags::new(), 16).unwrap();
                        assert_eq!(storage.get("b", &own, 0).unwrap(), data);

                        storage.put("b", "shared", &data, &Tags::new(), 0).unwrap();
                        let shared = storage.get("b", "shared", 0).unwrap();
                        assert!(shared.iter().all(|byte| *byte == shared[0]));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(storage.len(), 5);
        for worker in 0..4u8 {
            assert_eq!(
                storage.get("b", &format!("k{}", worker), 0).unwrap(),
                vec![worker; 163]
            );
        }
    }
}
