//! Bounded-concurrency async file reader, plus a streaming sender for
//! files above the streaming threshold.

use crate::error::{Error, ErrorKind, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Metadata the caller needs once a read completes.
#[derive(Debug, Clone)]
pub struct FileReadResult {
    pub content: Bytes,
    pub size: u64,
    pub last_modified: u64,
}

/// Bounds how many reads may be in flight at once; a submission beyond
/// the ceiling fails fast with `RateLimitExceeded` rather than queueing,
/// per spec.md §4.5.
pub struct AsyncFileManager {
    max_concurrent: usize,
    max_file_size: u64,
    current_reads: AtomicUsize,
    in_flight_paths: Mutex<Vec<PathBuf>>,
}

impl AsyncFileManager {
    pub fn new(max_concurrent: usize, max_file_size: u64) -> Self {
        AsyncFileManager {
            max_concurrent,
            max_file_size,
            current_reads: AtomicUsize::new(0),
            in_flight_paths: Mutex::new(Vec::new()),
        }
    }

    /// Current in-flight count and configured ceiling, mirroring the
    /// original's `uvhttp_async_file_get_stats`.
    pub fn get_stats(&self) -> (usize, usize) {
        (self.current_reads.load(Ordering::Acquire), self.max_concurrent)
    }

    /// Stats+reads a whole file. Fails fast with `RateLimitExceeded` if
    /// the concurrency ceiling is already reached, with `FileTooLarge` if
    /// the file exceeds the configured maximum, or with `Io`/`NotFound`
    /// for filesystem errors.
    pub async fn read_whole_file(self: &Arc<Self>, path: &Path) -> Result<FileReadResult> {
        let _guard = self.acquire_slot(path)?;

        let metadata = tokio::fs::metadata(path).await.map_err(|_| Error::from_kind(ErrorKind::NotFound))?;
        if !metadata.is_file() {
            return Err(Error::from_kind(ErrorKind::NotFound));
        }
        if metadata.len() > self.max_file_size {
            return Err(Error::from_kind(ErrorKind::FileTooLarge));
        }

        let mut file = tokio::fs::File::open(path).await?;
        let mut buf = Vec::with_capacity(metadata.len() as usize);
        file.read_to_end(&mut buf).await?;

        Ok(FileReadResult {
            content: Bytes::from(buf),
            size: metadata.len(),
            last_modified: mtime_secs(&metadata),
        })
    }

    /// Opens a file for chunked streaming without counting it against
    /// `read_whole_file`'s in-memory path; still subject to the same
    /// concurrency ceiling via the returned guard.
    pub fn acquire_slot(self: &Arc<Self>, path: &Path) -> Result<FileSlotGuard> {
        let current = self.current_reads.fetch_add(1, Ordering::AcqRel);
        if current >= self.max_concurrent {
            self.current_reads.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::from_kind(ErrorKind::RateLimitExceeded));
        }
        self.in_flight_paths.lock().push(path.to_path_buf());
        Ok(FileSlotGuard {
            manager: self.clone(),
            path: path.to_path_buf(),
        })
    }

    fn release_slot(&self, path: &Path) {
        self.current_reads.fetch_sub(1, Ordering::AcqRel);
        let mut paths = self.in_flight_paths.lock();
        if let Some(pos) = paths.iter().position(|p| p == path) {
            paths.remove(pos);
        }
    }
}

/// Released on drop (including via cancellation: dropping the future
/// holding this guard is the crate's cancel primitive).
pub struct FileSlotGuard {
    manager: Arc<AsyncFileManager>,
    path: PathBuf,
}

impl Drop for FileSlotGuard {
    fn drop(&mut self) {
        self.manager.release_slot(&self.path);
    }
}

fn mtime_secs(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Streams a file's bytes in fixed-size chunks, as the sendfile-style path
/// for large files. Each chunk read is bounded by `chunk_timeout`; timing
/// out or erroring aborts the stream.
pub struct FileStream {
    file: tokio::fs::File,
    remaining: u64,
    chunk_size: usize,
    chunk_timeout: Duration,
    _slot: FileSlotGuard,
}

impl FileStream {
    pub async fn open(
        manager: &Arc<AsyncFileManager>,
        path: &Path,
        chunk_size: usize,
        chunk_timeout: Duration,
    ) -> Result<Self> {
        let slot = manager.acquire_slot(path)?;
        let metadata = tokio::fs::metadata(path).await.map_err(|_| Error::from_kind(ErrorKind::NotFound))?;
        let file = tokio::fs::File::open(path).await?;
        Ok(FileStream {
            file,
            remaining: metadata.len(),
            chunk_size,
            chunk_timeout,
            _slot: slot,
        })
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Reads the next chunk, or `None` once the file is exhausted.
    /// Returns `ConnectionTimeout` if a single chunk read exceeds the
    /// configured watchdog deadline.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let take = self.chunk_size.min(self.remaining as usize);
        let mut buf = vec![0u8; take];

        let read = tokio::time::timeout(self.chunk_timeout, self.file.read_exact(&mut buf))
            .await
            .map_err(|_| Error::from_kind(ErrorKind::ConnectionTimeout))?;
        read?;

        self.remaining -= take as u64;
        Ok(Some(Bytes::from(buf)))
    }

    /// Seeks to `offset`; used when resuming a range request.
    pub async fn seek(&mut self, offset: u64) -> Result<()> {
        self.file.seek(std::io::SeekFrom::Start(offset)).await?;
        Ok(())
    }
}

#[allow(dead_code)]
fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(content: &[u8]) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("corehttp-fs-test-{}-{}", std::process::id(), fastrand_like()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content).unwrap();
        path
    }

    fn fastrand_like() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().subsec_nanos() as u64
    }

    #[tokio::test]
    async fn reads_whole_file_under_cap() {
        let path = temp_file(b"hello world");
        let manager = Arc::new(AsyncFileManager::new(4, 1024));
        let result = manager.read_whole_file(&path).await.unwrap();
        assert_eq!(&result.content[..], b"hello world");
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn rejects_file_over_max_size() {
        let path = temp_file(&vec![0u8; 100]);
        let manager = Arc::new(AsyncFileManager::new(4, 10));
        let err = manager.read_whole_file(&path).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileTooLarge);
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn overload_scenario_from_spec() {
        let path = temp_file(b"x");
        let manager = Arc::new(AsyncFileManager::new(1, 1024));
        let guard = manager.acquire_slot(&path).unwrap();
        let err = manager.acquire_slot(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        drop(guard);
        assert!(manager.acquire_slot(&path).is_ok());
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn streams_file_in_chunks() {
        let content = vec![7u8; 10];
        let path = temp_file(&content);
        let manager = Arc::new(AsyncFileManager::new(4, 1024));
        let mut stream = FileStream::open(&manager, &path, 4, Duration::from_secs(5)).await.unwrap();

        let mut collected = Vec::new();
        while let Some(chunk) = stream.next_chunk().await.unwrap() {
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, content);
        std::fs::remove_file(&path).ok();
    }
}
