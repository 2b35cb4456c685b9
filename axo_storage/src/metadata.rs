//! Blob metadata, content hashing and blob references.

use axo_types::{AxoError, AxoResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Free-form blob tags.
pub type Tags = BTreeMap<String, String>;

/// Chunk size used when a caller passes `0`.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Content type recorded when none is given.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Schema version written into every [`BallRef`].
pub const BALL_SCHEMA_VERSION: u32 = 1;

/// Hex-encoded SHA-256 of `data`.
pub fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub(crate) fn effective_chunk_size(chunk_size: usize) -> usize {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    }
}

/// Description of one chunk of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub index: u32,
    pub size: u64,
    pub checksum: String,
    #[serde(default)]
    pub tags: Tags,
}

/// Splits `data` into chunk descriptors.
pub fn chunk_refs(data: &[u8], chunk_size: usize) -> Vec<ChunkRef> {
    data.chunks(effective_chunk_size(chunk_size))
        .enumerate()
        .map(|(index, chunk)| ChunkRef {
            index: index as u32,
            size: chunk.len() as u64,
            checksum: checksum(chunk),
            tags: Tags::new(),
        })
        .collect()
}

/// Metadata stored next to every blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxoStorageMetadata {
    pub key: String,
    pub ball_id: String,
    pub size: u64,
    pub checksum: String,
    pub producer_id: String,
    pub bucket_id: String,
    #[serde(default)]
    pub tags: Tags,
    pub content_type: String,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub chunks: Vec<ChunkRef>,
}

impl AxoStorageMetadata {
    /// Describes `data` as it would be stored at `bucket_id/key`.
    pub fn describe(
        bucket_id: &str,
        key: &str,
        data: &[u8],
        tags: &Tags,
        chunk_size: usize,
        producer_id: &str,
    ) -> Self {
        Self {
            key: key.to_string(),
            ball_id: key.to_string(),
            size: data.len() as u64,
            checksum: checksum(data),
            producer_id: producer_id.to_string(),
            bucket_id: bucket_id.to_string(),
            tags: tags.clone(),
            content_type: tags
                .get("content_type")
                .cloned()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            is_disabled: false,
            chunks: chunk_refs(data, chunk_size),
        }
    }

    /// Checks that `data` matches the recorded size and checksum.
    pub fn verify(&self, data: &[u8]) -> AxoResult<()> {
        if self.size != data.len() as u64 {
            return Err(AxoError::validation(format!(
                "{}/{}: size {} does not match {} bytes of data",
                self.bucket_id,
                self.key,
                self.size,
                data.len()
            )));
        }
        let actual = checksum(data);
        if self.checksum != actual {
            return Err(AxoError::validation(format!(
                "{}/{}: checksum {} does not match data checksum {}",
                self.bucket_id, self.key, self.checksum, actual
            )));
        }
        Ok(())
    }
}

/// Immutable, versioned reference to a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallRef {
    schema_version: u32,
    bucket_id: String,
    key: String,
    ball_id: String,
    size: u64,
    checksum: String,
    tags: Tags,
    chunks: Vec<ChunkRef>,
}

impl BallRef {
    pub fn from_metadata(metadata: &AxoStorageMetadata) -> Self {
        Self {
            schema_version: BALL_SCHEMA_VERSION,
            bucket_id: metadata.bucket_id.clone(),
            key: metadata.key.clone(),
            ball_id: metadata.ball_id.clone(),
            size: metadata.size,
            checksum: metadata.checksum.clone(),
            tags: metadata.tags.clone(),
            chunks: metadata.chunks.clone(),
        }
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ball_id(&self) -> &str {
        &self.ball_id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn chunks(&self) -> &[ChunkRef] {
        &self.chunks
    }

    /// Returns a new reference with an extra tag.
    pub fn with_tag(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.tags.insert(name.into(), value.into());
        next
    }

    /// Checks fetched bytes against this reference.
    pub fn verify(&self, data: &[u8]) -> AxoResult<()> {
        if self.size != data.len() as u64 {
            return Err(AxoError::validation(format!(
                "{}/{}: expected {} bytes, fetched {}",
                self.bucket_id,
                self.key,
                self.size,
                data.len()
            )));
        }
        if self.checksum != checksum(data) {
            return Err(AxoError::validation(format!(
                "{}/{}: fetched bytes do not match checksum {}",
                self.bucket_id, self.key, self.checksum
            )));
        }
        Ok(())
    }
}
