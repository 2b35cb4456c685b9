//! Two-part persistence of active objects
//!
//! An active object stored under logical key `K` occupies two blobs: its
//! behavior definition at `K_source` and its attribute map at `K_attrs`.
//! Every blob is checked against its metadata before it is written and
//! again after it is read.

use crate::metadata::{AxoStorageMetadata, BallRef, Tags};
use crate::service::StorageService;
use axo_mobility::{to_frame, ActiveObject, ObjectFrame, TypeRegistry};
use axo_types::{AxoError, AxoResult, ErrorKind};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Suffix of the behavior blob.
pub const SOURCE_SUFFIX: &str = "_source";

/// Suffix of the attribute blob.
pub const ATTRS_SUFFIX: &str = "_attrs";

/// Storage key of the behavior blob for `key`.
pub fn source_key(key: &str) -> String {
    format!("{}{}", key, SOURCE_SUFFIX)
}

/// Storage key of the attribute blob for `key`.
pub fn attrs_key(key: &str) -> String {
    format!("{}{}", key, ATTRS_SUFFIX)
}

/// Bytes plus the metadata that describes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxoBlob {
    pub metadata: AxoStorageMetadata,
    pub data: Vec<u8>,
}

impl AxoBlob {
    /// Builds a blob whose metadata matches `data`.
    pub fn new(
        bucket_id: &str,
        key: &str,
        data: Vec<u8>,
        tags: &Tags,
        producer_id: &str,
    ) -> Self {
        let metadata = AxoStorageMetadata::describe(bucket_id, key, &data, tags, 0, producer_id);
        Self { metadata, data }
    }

    pub fn verify(&self) -> AxoResult<()> {
        self.metadata.verify(&self.data)
    }
}

/// References to both stored parts of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub source: BallRef,
    pub attrs: BallRef,
}

/// Active object persistence on top of a [`StorageService`].
#[derive(Clone)]
pub struct AxoStorage {
    service: Arc<dyn StorageService>,
    producer_id: String,
    chunk_size: usize,
}

impl AxoStorage {
    pub fn new(service: Arc<dyn StorageService>, producer_id: impl Into<String>) -> Self {
        Self {
            service,
            producer_id: producer_id.into(),
            chunk_size: 0,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn service(&self) -> &Arc<dyn StorageService> {
        &self.service
    }

    fn check_blob(bucket_id: &str, expected_key: &str, blob: &AxoBlob) -> AxoResult<()> {
        if blob.metadata.key != expected_key {
            return Err(AxoError::validation(format!(
                "blob key '{}' does not match expected '{}'",
                blob.metadata.key, expected_key
            )));
        }
        if blob.metadata.bucket_id != bucket_id {
            return Err(AxoError::validation(format!(
                "blob bucket '{}' does not match '{}'",
                blob.metadata.bucket_id, bucket_id
            )));
        }
        blob.verify()
    }

    /// Stores both parts of an object.
    ///
    /// Names, sizes and checksums are validated before anything is written.
    /// If the attribute write fails, the behavior blob is removed again on a
    /// best-effort basis.
    pub fn put_blobs(
        &self,
        bucket_id: &str,
        key: &str,
        source: &AxoBlob,
        attrs: &AxoBlob,
    ) -> AxoResult<StoredObject> {
        let source_key = source_key(key);
        let attrs_key = attrs_key(key);
        Self::check_blob(bucket_id, &source_key, source)?;
        Self::check_blob(bucket_id, &attrs_key, attrs)?;

        self.service
            .put(
                bucket_id,
                &source_key,
                &source.data,
                &source.metadata.tags,
                self.chunk_size,
            )
            .map_err(|err| wrap(err, ErrorKind::PutDataFailed, "put source blob"))?;

        if let Err(err) = self.service.put(
            bucket_id,
            &attrs_key,
            &attrs.data,
            &attrs.metadata.tags,
            self.chunk_size,
        ) {
            match self.service.delete(bucket_id, &source_key) {
                Ok(_) => debug!(bucket_id, key = %source_key, "rolled back source blob"),
                Err(rollback) => warn!(
                    bucket_id,
                    key = %source_key,
                    error = %rollback,
                    "rollback of source blob failed"
                ),
            }
            return Err(wrap(err, ErrorKind::PutDataFailed, "put attrs blob"));
        }

        info!(bucket_id, key, "stored active object");
        Ok(StoredObject {
            source: BallRef::from_metadata(&source.metadata),
            attrs: BallRef::from_metadata(&attrs.metadata),
        })
    }

    fn get_blob(&self, bucket_id: &str, key: &str) -> AxoResult<AxoBlob> {
        let metadata = self.service.get_metadata(bucket_id, key)?;
        let data = self.service.get(bucket_id, key, self.chunk_size)?;
        let blob = AxoBlob { metadata, data };
        Self::check_blob(bucket_id, key, &blob)?;
        Ok(blob)
    }

    /// Fetches both parts of an object and re-validates their integrity.
    pub fn get_blobs(&self, bucket_id: &str, key: &str) -> AxoResult<(AxoBlob, AxoBlob)> {
        let source = self.get_blob(bucket_id, &source_key(key))?;
        let attrs = self.get_blob(bucket_id, &attrs_key(key))?;
        Ok((source, attrs))
    }

    /// Removes both parts of an object. Fails if either delete fails.
    pub fn delete_object(&self, bucket_id: &str, key: &str) -> AxoResult<()> {
        let mut failures = Vec::new();
        let mut missing = Vec::new();
        for part in [source_key(key), attrs_key(key)] {
            match self.service.delete(bucket_id, &part) {
                Ok(true) => {}
                Ok(false) => missing.push(part),
                Err(err) => failures.push(format!("{}: {}", part, err)),
            }
        }
        if !failures.is_empty() {
            return Err(AxoError::delete(failures.join("; ")));
        }
        if !missing.is_empty() {
            return Err(AxoError::not_found(format!(
                "{}: missing {}",
                bucket_id,
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Persists an active object under `bucket_id/key`.
    pub fn put_active_object(
        &self,
        bucket_id: &str,
        key: &str,
        object: &dyn ActiveObject,
        tags: &Tags,
    ) -> AxoResult<StoredObject> {
        let frame = to_frame(object)?;
        let mut source_tags = tags.clone();
        source_tags.insert("type_name".to_string(), object.type_name().to_string());
        source_tags.insert("content_type".to_string(), "application/json".to_string());
        let source = AxoBlob::new(
            bucket_id,
            &source_key(key),
            frame.behavior.into_bytes(),
            &source_tags,
            &self.producer_id,
        );
        let attrs = AxoBlob::new(
            bucket_id,
            &attrs_key(key),
            frame.attributes,
            tags,
            &self.producer_id,
        );
        self.put_blobs(bucket_id, key, &source, &attrs)
    }

    /// Loads and rebuilds the object stored under `bucket_id/key`.
    pub fn get_active_object(
        &self,
        bucket_id: &str,
        key: &str,
        types: &TypeRegistry,
    ) -> AxoResult<Box<dyn ActiveObject>> {
        let (source, attrs) = self.get_blobs(bucket_id, key)?;
        let behavior = String::from_utf8(source.data).map_err(|_| {
            AxoError::validation(format!("{}/{}: behavior blob is not UTF-8", bucket_id, key))
        })?;
        types.reconstruct(&ObjectFrame {
            attributes: attrs.data,
            behavior,
        })
    }
}

fn wrap(err: AxoError, kind: ErrorKind, context: &str) -> AxoError {
    if err.kind == ErrorKind::ValidationFailed {
        err.with_context(context)
    } else {
        AxoError::new(kind, format!("{}: {}", context, err))
    }
}
