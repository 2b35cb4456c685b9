//! Lazy references to stored blobs
//!
//! A [`Pointer`] names a blob through its [`BallRef`] and fetches the bytes
//! only when asked to. Every materialization verifies the fetched bytes
//! against the reference before handing them out.
//!
//! A pointer built with `consume` becomes dead after its first successful
//! materialization; a dead pointer refuses all further work without touching
//! the backend. Dropping a pointer never deletes anything remotely.

use crate::metadata::BallRef;
use crate::service::StorageService;
use axo_types::{AxoError, AxoResult};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, ErrorKind as IoErrorKind, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerState {
    Alive,
    Dead,
}

/// Reference to a stored blob with one-time materialization flags.
pub struct Pointer {
    storage: Arc<dyn StorageService>,
    ball: BallRef,
    consume: bool,
    delete_remote: bool,
    chunk_size: usize,
    state: PointerState,
}

impl Pointer {
    pub fn new(storage: Arc<dyn StorageService>, ball: BallRef) -> Self {
        Self {
            storage,
            ball,
            consume: false,
            delete_remote: false,
            chunk_size: 0,
            state: PointerState::Alive,
        }
    }

    /// Marks the pointer as single-use.
    pub fn consume(mut self, consume: bool) -> Self {
        self.consume = consume;
        self
    }

    /// Deletes the remote blob after a successful materialization.
    pub fn delete_remote(mut self, delete_remote: bool) -> Self {
        self.delete_remote = delete_remote;
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn ball(&self) -> &BallRef {
        &self.ball
    }

    pub fn state(&self) -> PointerState {
        self.state
    }

    pub fn is_alive(&self) -> bool {
        self.state == PointerState::Alive
    }

    fn ensure_alive(&self) -> AxoResult<()> {
        match self.state {
            PointerState::Alive => Ok(()),
            PointerState::Dead => Err(AxoError::bad_request(format!(
                "pointer to {}/{} was already consumed",
                self.ball.bucket_id(),
                self.ball.key()
            ))),
        }
    }

    /// Runs the post-materialization steps: remote delete, then consumption.
    fn finish(&mut self) -> AxoResult<()> {
        if self.delete_remote {
            let removed = self
                .storage
                .delete(self.ball.bucket_id(), self.ball.key())
                .map_err(|err| AxoError::delete(err.to_string()))?;
            debug!(
                bucket_id = self.ball.bucket_id(),
                key = self.ball.key(),
                removed,
                "deleted remote blob"
            );
        }
        if self.consume {
            self.state = PointerState::Dead;
        }
        Ok(())
    }

    /// Fetches and verifies the full contents of the blob.
    pub fn fetch_bytes(&mut self) -> AxoResult<Vec<u8>> {
        self.ensure_alive()?;
        let data = self
            .storage
            .get(self.ball.bucket_id(), self.ball.key(), self.chunk_size)?;
        self.ball.verify(&data)?;
        self.finish()?;
        Ok(data)
    }

    /// Streams the blob into a file at `path`.
    ///
    /// An existing file is only replaced when `overwrite` is set. Whatever
    /// was written is removed again if the transfer or the verification
    /// fails.
    pub fn fetch_to_file(&mut self, path: &Path, overwrite: bool) -> AxoResult<u64> {
        self.ensure_alive()?;
        let file = OpenOptions::new()
            .write(true)
            .create(overwrite)
            .truncate(overwrite)
            .create_new(!overwrite)
            .open(path)
            .map_err(|err| {
                if err.kind() == IoErrorKind::AlreadyExists {
                    AxoError::already_exists(format!("{} already exists", path.display()))
                } else {
                    AxoError::get_data(format!("cannot create {}: {}", path.display(), err))
                }
            })?;
        let mut writer = VerifyingWriter::new(BufWriter::new(file));
        let written = self
            .storage
            .get_to_writer(
                self.ball.bucket_id(),
                self.ball.key(),
                self.chunk_size,
                &mut writer,
            )
            .and_then(|written| {
                writer
                    .flush()
                    .map_err(|err| AxoError::get_data(format!("flush failed: {}", err)))?;
                writer.check(&self.ball)?;
                Ok(written)
            });

        match written {
            Ok(written) => {
                self.finish()?;
                Ok(written)
            }
            Err(err) => {
                drop(writer);
                if let Err(cleanup) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %cleanup, "cannot remove partial file");
                }
                Err(err)
            }
        }
    }

    /// Fetches the blob as a shared byte buffer of at most `max_bytes`.
    pub fn fetch_view(&mut self, max_bytes: u64) -> AxoResult<Bytes> {
        self.ensure_alive()?;
        if self.ball.size() > max_bytes {
            return Err(AxoError::validation(format!(
                "{}/{} is {} bytes, limit is {}",
                self.ball.bucket_id(),
                self.ball.key(),
                self.ball.size(),
                max_bytes
            )));
        }
        self.fetch_bytes().map(Bytes::from)
    }
}

impl std::fmt::Debug for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pointer")
            .field("ball", &self.ball)
            .field("consume", &self.consume)
            .field("delete_remote", &self.delete_remote)
            .field("state", &self.state)
            .finish()
    }
}

/// Hashes and counts everything written through it.
struct VerifyingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> VerifyingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn check(&self, ball: &BallRef) -> AxoResult<()> {
        if self.written != ball.size() {
            return Err(AxoError::validation(format!(
                "{}/{}: expected {} bytes, wrote {}",
                ball.bucket_id(),
                ball.key(),
                ball.size(),
                self.written
            )));
        }
        let actual = hex::encode(self.hasher.clone().finalize());
        if actual != ball.checksum() {
            return Err(AxoError::validation(format!(
                "{}/{}: written bytes do not match checksum {}",
                ball.bucket_id(),
                ball.key(),
                ball.checksum()
            )));
        }
        Ok(())
    }
}

impl<W: Write> Write for VerifyingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorageService;
    use crate::metadata::{AxoStorageMetadata, Tags};
    use axo_types::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts backend reads.
    #[derive(Default)]
    struct CountingStorage {
        inner: MemoryStorageService,
        gets: AtomicUsize,
    }

    impl CountingStorage {
        fn gets(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }
    }

    impl StorageService for CountingStorage {
        fn put(
            &self,
            bucket_id: &str,
            key: &str,
            data: &[u8],
            tags: &Tags,
            chunk_size: usize,
        ) -> AxoResult<String> {
            self.inner.put(bucket_id, key, data, tags, chunk_size)
        }

        fn get(&self, bucket_id: &str, key: &str, chunk_size: usize) -> AxoResult<Vec<u8>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(bucket_id, key, chunk_size)
        }

        fn get_metadata(&self, bucket_id: &str, key: &str) -> AxoResult<AxoStorageMetadata> {
            self.inner.get_metadata(bucket_id, key)
        }

        fn delete(&self, bucket_id: &str, key: &str) -> AxoResult<bool> {
            self.inner.delete(bucket_id, key)
        }

        fn disable(&self, bucket_id: &str, key: &str) -> AxoResult<()> {
            self.inner.disable(bucket_id, key)
        }
    }

    fn stored(data: &[u8]) -> (Arc<CountingStorage>, BallRef) {
        let storage = Arc::new(CountingStorage::default());
        storage.put("b1", "k1", data, &Tags::new(), 0).unwrap();
        let ball = BallRef::from_metadata(&storage.get_metadata("b1", "k1").unwrap());
        (storage, ball)
    }

    #[test]
    fn test_consumed_pointer_does_no_second_fetch() {
        let (storage, ball) = stored(b"hello");
        let mut pointer = Pointer::new(storage.clone(), ball).consume(true);

        assert_eq!(pointer.fetch_bytes().unwrap(), b"hello");
        assert!(!pointer.is_alive());

        let err = pointer.fetch_bytes().unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        let err = pointer.fetch_view(1024).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(storage.gets(), 1);
    }

    #[test]
    fn test_reusable_pointer_fetches_again() {
        let (storage, ball) = stored(b"hello");
        let mut pointer = Pointer::new(storage.clone(), ball);
        pointer.fetch_bytes().unwrap();
        pointer.fetch_bytes().unwrap();
        assert_eq!(storage.gets(), 2);
        assert_eq!(pointer.state(), PointerState::Alive);
    }

    #[test]
    fn test_delete_remote_after_fetch() {
        let (storage, ball) = stored(b"hello");
        let mut pointer = Pointer::new(storage.clone(), ball)
            .consume(true)
            .delete_remote(true);
        pointer.fetch_bytes().unwrap();
        assert!(storage.inner.is_empty());
    }

    #[test]
    fn test_mismatched_reference_is_rejected() {
        let (storage, ball) = stored(b"hello");
        storage.put("b1", "k1", b"other", &Tags::new(), 0).unwrap();
        let mut pointer = Pointer::new(storage, ball).consume(true);

        let err = pointer.fetch_bytes().unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
        assert!(pointer.is_alive());
    }

    #[test]
    fn test_view_size_guard_checked_before_fetch() {
        let (storage, ball) = stored(b"hello");
        let mut pointer = Pointer::new(storage.clone(), ball);

        let err = pointer.fetch_view(4).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
        assert_eq!(storage.gets(), 0);

        let view = pointer.fetch_view(5).unwrap();
        assert_eq!(&view[..], b"hello");
    }

    #[test]
    fn test_fetch_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let (storage, ball) = stored(b"hello");
        let mut pointer = Pointer::new(storage, ball);

        assert_eq!(pointer.fetch_to_file(&path, false).unwrap(), 5);
        assert_eq!(fs::read(&path).unwrap(), b"hello");

        let err = pointer.fetch_to_file(&path, false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);
        assert_eq!(pointer.fetch_to_file(&path, true).unwrap(), 5);
    }

    #[test]
    fn test_existing_file_kept_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        fs::write(&path, b"previous contents").unwrap();
        let (storage, ball) = stored(b"hello");
        let mut pointer = Pointer::new(storage.clone(), ball).consume(true);

        let err = pointer.fetch_to_file(&path, false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&path).unwrap(), b"previous contents");
        assert_eq!(storage.gets(), 0);
        assert!(pointer.is_alive());

        assert_eq!(pointer.fetch_to_file(&path, true).unwrap(), 5);
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn test_failed_file_fetch_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let (storage, ball) = stored(b"hello");
        storage.delete("b1", "k1").unwrap();
        let mut pointer = Pointer::new(storage, ball);

        let err = pointer.fetch_to_file(&path, false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(!path.exists());
    }
}
