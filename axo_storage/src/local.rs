//! Local-filesystem blob store
//!
//! Layout: one directory per bucket under the root. Each blob is a data file
//! named after its key plus a `<key>.meta.json` sidecar. Writes go to a
//! hidden temporary file with a per-write name first and are renamed into
//! place. The data rename and the sidecar write commit together under a
//! striped per-key lock, and reads hold the same lock shared, so a reader
//! never pairs one writer's data with another writer's sidecar.

use crate::metadata::{checksum, effective_chunk_size, AxoStorageMetadata, ChunkRef, Tags};
use crate::service::{validate_location, StorageService};
use axo_types::{AxoError, AxoResult};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const META_SUFFIX: &str = ".meta.json";

/// Number of commit locks shared by all keys of one store.
const COMMIT_STRIPES: usize = 64;

/// Blob store rooted at a local directory.
///
/// Clones share their commit locks, so a clone is as safe to use from
/// another thread as the original.
#[derive(Debug, Clone)]
pub struct LocalStorageService {
    root: PathBuf,
    producer_id: String,
    commits: Arc<[RwLock<()>]>,
}

impl LocalStorageService {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>, producer_id: impl Into<String>) -> AxoResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|err| {
            AxoError::put_data(format!("cannot create {}: {}", root.display(), err))
        })?;
        Ok(Self {
            root,
            producer_id: producer_id.into(),
            commits: (0..COMMIT_STRIPES).map(|_| RwLock::new(())).collect(),
        })
    }

    /// Lock guarding the committed data and sidecar of one location.
    fn commit_lock(&self, bucket_id: &str, key: &str) -> &RwLock<()> {
        let mut hasher = DefaultHasher::new();
        (bucket_id, key).hash(&mut hasher);
        &self.commits[(hasher.finish() % COMMIT_STRIPES as u64) as usize]
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn validate(&self, bucket_id: &str, key: &str) -> AxoResult<()> {
        validate_location(bucket_id, key)?;
        if key.ends_with(META_SUFFIX) {
            return Err(AxoError::validation(format!(
                "key '{}' uses the reserved suffix {}",
                key, META_SUFFIX
            )));
        }
        Ok(())
    }

    fn data_path(&self, bucket_id: &str, key: &str) -> PathBuf {
        self.root.join(bucket_id).join(key)
    }

    fn meta_path(&self, bucket_id: &str, key: &str) -> PathBuf {
        self.root
            .join(bucket_id)
            .join(format!("{}{}", key, META_SUFFIX))
    }

    /// A fresh hidden path for one write; concurrent writers never share it.
    fn temp_path(&self, bucket_id: &str, key: &str, suffix: &str) -> PathBuf {
        self.root
            .join(bucket_id)
            .join(format!(".{}.{}.{}.tmp", key, Uuid::new_v4().simple(), suffix))
    }

    fn read_metadata(&self, bucket_id: &str, key: &str) -> AxoResult<AxoStorageMetadata> {
        let path = self.meta_path(bucket_id, key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == IoErrorKind::NotFound => {
                return Err(AxoError::not_found(format!("{}/{}", bucket_id, key)))
            }
            Err(err) => {
                return Err(AxoError::get_data(format!(
                    "cannot read {}: {}",
                    path.display(),
                    err
                )))
            }
        };
        serde_json::from_slice(&raw).map_err(|err| {
            AxoError::validation(format!("corrupt metadata for {}/{}: {}", bucket_id, key, err))
        })
    }

    fn write_metadata(&self, metadata: &AxoStorageMetadata) -> AxoResult<()> {
        let json = serde_json::to_vec_pretty(metadata)
            .map_err(|err| AxoError::put_metadata(err.to_string()))?;
        let temp = self.temp_path(&metadata.bucket_id, &metadata.key, "meta");
        fs::write(&temp, json)
            .and_then(|_| fs::rename(&temp, self.meta_path(&metadata.bucket_id, &metadata.key)))
            .map_err(|err| {
                let _ = fs::remove_file(&temp);
                AxoError::put_metadata(format!(
                    "cannot write metadata for {}/{}: {}",
                    metadata.bucket_id, metadata.key, err
                ))
            })
    }

    fn ensure_bucket(&self, bucket_id: &str) -> AxoResult<()> {
        fs::create_dir_all(self.root.join(bucket_id)).map_err(|err| {
            AxoError::put_data(format!("cannot create bucket {}: {}", bucket_id, err))
        })
    }

    fn readable_metadata(&self, bucket_id: &str, key: &str) -> AxoResult<AxoStorageMetadata> {
        self.validate(bucket_id, key)?;
        let metadata = self.read_metadata(bucket_id, key)?;
        if metadata.is_disabled {
            return Err(AxoError::not_found(format!(
                "{}/{} is disabled",
                bucket_id, key
            )));
        }
        Ok(metadata)
    }

    /// Copies `reader` into the bucket in `chunk_size` pieces, hashing as it
    /// goes, then records the metadata.
    fn store_stream(
        &self,
        bucket_id: &str,
        key: &str,
        reader: &mut dyn Read,
        tags: &Tags,
        chunk_size: usize,
    ) -> AxoResult<String> {
        self.validate(bucket_id, key)?;
        self.ensure_bucket(bucket_id)?;

        let temp = self.temp_path(bucket_id, key, "data");
        let written = (|| -> std::io::Result<(u64, String, Vec<ChunkRef>)> {
            let mut file = File::create(&temp)?;
            let mut hasher = Sha256::new();
            let mut chunks = Vec::new();
            let mut size = 0u64;
            let mut buffer = vec![0u8; effective_chunk_size(chunk_size)];
            loop {
                let filled = read_full(reader, &mut buffer)?;
                if filled == 0 {
                    break;
                }
                let chunk = &buffer[..filled];
                hasher.update(chunk);
                file.write_all(chunk)?;
                chunks.push(ChunkRef {
                    index: chunks.len() as u32,
                    size: filled as u64,
                    checksum: checksum(chunk),
                    tags: Tags::new(),
                });
                size += filled as u64;
            }
            file.sync_all()?;
            Ok((size, hex::encode(hasher.finalize()), chunks))
        })();

        let (size, digest, chunks) = match written {
            Ok(result) => result,
            Err(err) => {
                let _ = fs::remove_file(&temp);
                return Err(AxoError::put_data(format!(
                    "cannot write {}/{}: {}",
                    bucket_id, key, err
                )));
            }
        };

        let mut metadata = AxoStorageMetadata::describe(bucket_id, key, &[], tags, chunk_size, &self.producer_id);
        metadata.size = size;
        metadata.checksum = digest;
        metadata.chunks = chunks;

        let _commit = self.commit_lock(bucket_id, key).write();
        fs::rename(&temp, self.data_path(bucket_id, key)).map_err(|err| {
            let _ = fs::remove_file(&temp);
            AxoError::put_data(format!("cannot commit {}/{}: {}", bucket_id, key, err))
        })?;
        self.write_metadata(&metadata)?;

        debug!(bucket_id, key, size, "stored blob on disk");
        Ok(key.to_string())
    }
}

/// Fills `buffer` as far as the reader allows.
fn read_full(reader: &mut dyn Read, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == IoErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

impl StorageService for LocalStorageService {
    fn put(
        &self,
        bucket_id: &str,
        key: &str,
        data: &[u8],
        tags: &Tags,
        chunk_size: usize,
    ) -> AxoResult<String> {
        let mut reader = data;
        self.store_stream(bucket_id, key, &mut reader, tags, chunk_size)
    }

    fn get(&self, bucket_id: &str, key: &str, chunk_size: usize) -> AxoResult<Vec<u8>> {
        let mut data = Vec::new();
        self.get_to_writer(bucket_id, key, chunk_size, &mut data)?;
        Ok(data)
    }

    fn get_to_writer(
        &self,
        bucket_id: &str,
        key: &str,
        chunk_size: usize,
        writer: &mut dyn Write,
    ) -> AxoResult<u64> {
        let _commit = self.commit_lock(bucket_id, key).read();
        let metadata = self.readable_metadata(bucket_id, key)?;
        let path = self.data_path(bucket_id, key);
        let mut file = File::open(&path).map_err(|err| {
            if err.kind() == IoErrorKind::NotFound {
                AxoError::not_found(format!("{}/{} has no data", bucket_id, key))
            } else {
                AxoError::get_data(format!("cannot open {}: {}", path.display(), err))
            }
        })?;

        let mut hasher = Sha256::new();
        let mut size = 0u64;
        let mut buffer = vec![0u8; effective_chunk_size(chunk_size)];
        loop {
            let filled = read_full(&mut file, &mut buffer)
                .map_err(|err| AxoError::get_data(format!("read {}: {}", path.display(), err)))?;
            if filled == 0 {
                break;
            }
            hasher.update(&buffer[..filled]);
            writer
                .write_all(&buffer[..filled])
                .map_err(|err| AxoError::get_data(format!("write failed: {}", err)))?;
            size += filled as u64;
        }

        let digest = hex::encode(hasher.finalize());
        if size != metadata.size || digest != metadata.checksum {
            warn!(bucket_id, key, size, expected = metadata.size, "stored blob failed integrity check");
            return Err(AxoError::validation(format!(
                "{}/{}: stored bytes do not match metadata (size {} vs {}, checksum {} vs {})",
                bucket_id, key, size, metadata.size, digest, metadata.checksum
            )));
        }
        Ok(size)
    }

    fn get_metadata(&self, bucket_id: &str, key: &str) -> AxoResult<AxoStorageMetadata> {
        self.validate(bucket_id, key)?;
        self.read_metadata(bucket_id, key)
    }

    fn delete(&self, bucket_id: &str, key: &str) -> AxoResult<bool> {
        self.validate(bucket_id, key)?;
        let _commit = self.commit_lock(bucket_id, key).write();
        let mut removed = false;
        for path in [self.meta_path(bucket_id, key), self.data_path(bucket_id, key)] {
            match fs::remove_file(&path) {
                Ok(()) => removed = true,
                Err(err) if err.kind() == IoErrorKind::NotFound => {}
                Err(err) => {
                    return Err(AxoError::delete(format!(
                        "cannot remove {}: {}",
                        path.display(),
                        err
                    )))
                }
            }
        }
        Ok(removed)
    }

    fn disable(&self, bucket_id: &str, key: &str) -> AxoResult<()> {
        self.validate(bucket_id, key)?;
        let _commit = self.commit_lock(bucket_id, key).write();
        let mut metadata = self.read_metadata(bucket_id, key)?;
        metadata.is_disabled = true;
        self.write_metadata(&metadata)
    }

    fn put_data_from_file(
        &self,
        bucket_id: &str,
        key: &str,
        path: &Path,
        tags: &Tags,
        chunk_size: usize,
    ) -> AxoResult<String> {
        let mut file = File::open(path).map_err(|err| {
            if err.kind() == IoErrorKind::NotFound {
                AxoError::not_found(format!("{} does not exist", path.display()))
            } else {
                AxoError::put_data(format!("cannot open {}: {}", path.display(), err))
            }
        })?;
        self.store_stream(bucket_id, key, &mut file, tags, chunk_size)
    }
}
