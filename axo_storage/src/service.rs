//! Raw key/value blob store interface.

use crate::metadata::{AxoStorageMetadata, Tags};
use axo_types::{AxoError, AxoResult};
use std::fs;
use std::io::Write;
use std::path::Path;

/// A bucketed, checksum-verified blob store.
///
/// Implementations must be safe for concurrent use: several callers may
/// issue requests against the same client at once.
pub trait StorageService: Send + Sync {
    /// Stores `data` and returns the key it was stored under.
    fn put(
        &self,
        bucket_id: &str,
        key: &str,
        data: &[u8],
        tags: &Tags,
        chunk_size: usize,
    ) -> AxoResult<String>;

    /// Fetches the full contents of a blob, verified against its metadata.
    fn get(&self, bucket_id: &str, key: &str, chunk_size: usize) -> AxoResult<Vec<u8>>;

    /// Returns the metadata stored with a blob.
    fn get_metadata(&self, bucket_id: &str, key: &str) -> AxoResult<AxoStorageMetadata>;

    /// Removes a blob. Returns `false` if there was nothing to remove.
    fn delete(&self, bucket_id: &str, key: &str) -> AxoResult<bool>;

    /// Marks a blob as disabled; disabled blobs are reported as missing.
    fn disable(&self, bucket_id: &str, key: &str) -> AxoResult<()>;

    /// Streams a blob into `writer` and returns the number of bytes written.
    fn get_to_writer(
        &self,
        bucket_id: &str,
        key: &str,
        chunk_size: usize,
        writer: &mut dyn Write,
    ) -> AxoResult<u64> {
        let data = self.get(bucket_id, key, chunk_size)?;
        writer
            .write_all(&data)
            .map_err(|err| AxoError::get_data(format!("write failed: {}", err)))?;
        Ok(data.len() as u64)
    }

    /// Stores the contents of a local file.
    fn put_data_from_file(
        &self,
        bucket_id: &str,
        key: &str,
        path: &Path,
        tags: &Tags,
        chunk_size: usize,
    ) -> AxoResult<String> {
        let data = fs::read(path).map_err(|err| {
            AxoError::put_data(format!("cannot read {}: {}", path.display(), err))
        })?;
        self.put(bucket_id, key, &data, tags, chunk_size)
    }
}

/// Rejects bucket and key names that cannot be stored safely.
pub fn validate_location(bucket_id: &str, key: &str) -> AxoResult<()> {
    validate_name("bucket_id", bucket_id)?;
    validate_name("key", key)
}

fn validate_name(field: &str, value: &str) -> AxoResult<()> {
    if value.is_empty() {
        return Err(AxoError::validation(format!("{} cannot be empty", field)));
    }
    if value == "." || value == ".." || value.starts_with('.') {
        return Err(AxoError::validation(format!(
            "{} '{}' cannot start with '.'",
            field, value
        )));
    }
    if value
        .chars()
        .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_whitespace())
    {
        return Err(AxoError::validation(format!(
            "{} '{}' contains a path separator or whitespace",
            field, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axo_types::ErrorKind;

    #[test]
    fn test_validate_location() {
        assert!(validate_location("b1", "k1_source").is_ok());
        for (bucket, key) in [
            ("", "k"),
            ("b", ""),
            ("..", "k"),
            ("b", ".hidden"),
            ("b", "a/b"),
            ("b", "a\\b"),
            ("b", "a b"),
        ] {
            let err = validate_location(bucket, key).unwrap_err();
            assert_eq!(err.kind, ErrorKind::ValidationFailed);
        }
    }
}
