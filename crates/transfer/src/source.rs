use std::future::Future;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use crate::TransferError;
use crate::planner::ByteRange;

/// Boxed future returned by [`ByteSource::read_range`].
pub type ReadFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, TransferError>> + Send + 'a>>;

/// Read-only access to the bytes being uploaded.
///
/// A read may return fewer bytes than requested when the underlying data is
/// shorter than advertised; callers treat that as a truncated source.
pub trait ByteSource: Send + Sync {
    /// Advertised length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether independent ranges may be read concurrently.
    fn supports_ranged_reads(&self) -> bool;

    fn read_range(&self, range: ByteRange) -> ReadFuture<'_>;
}

fn check_bounds(range: ByteRange, len: u64) -> Result<(), TransferError> {
    if range.start > range.end || range.end > len {
        return Err(TransferError::RangeOutOfBounds {
            start: range.start,
            end: range.end,
            len,
        });
    }
    Ok(())
}

/// Reads up to `limit` bytes, stopping early at EOF.
fn read_up_to(reader: &mut impl Read, limit: u64) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(limit as usize);
    reader.take(limit).read_to_end(&mut buf)?;
    Ok(buf)
}

fn join_error(e: tokio::task::JoinError) -> TransferError {
    TransferError::Io(std::io::Error::other(e))
}

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

/// A file on disk. Every read opens its own handle, so ranges are
/// independent and may be read concurrently.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    /// Opens `path` and records its current length.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref().to_path_buf();
        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            return Err(TransferError::InvalidInput(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        Ok(Self {
            path,
            len: meta.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn supports_ranged_reads(&self) -> bool {
        true
    }

    fn read_range(&self, range: ByteRange) -> ReadFuture<'_> {
        Box::pin(async move {
            check_bounds(range, self.len)?;
            let path = self.path.clone();
            tokio::task::spawn_blocking(move || -> Result<Vec<u8>, TransferError> {
                let mut file = std::fs::File::open(&path)?;
                file.seek(SeekFrom::Start(range.start))?;
                Ok(read_up_to(&mut file, range.len())?)
            })
            .await
            .map_err(join_error)?
        })
    }
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// Bytes held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
    advertised_len: u64,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        let data = data.into();
        let advertised_len = data.len() as u64;
        Self {
            data,
            advertised_len,
        }
    }

    /// A source that claims `advertised_len` bytes but holds fewer, as a
    /// file truncated after its size was taken would.
    pub fn truncated(data: impl Into<Arc<[u8]>>, advertised_len: u64) -> Self {
        Self {
            data: data.into(),
            advertised_len,
        }
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.advertised_len
    }

    fn supports_ranged_reads(&self) -> bool {
        true
    }

    fn read_range(&self, range: ByteRange) -> ReadFuture<'_> {
        Box::pin(async move {
            check_bounds(range, self.advertised_len)?;
            let held = self.data.len() as u64;
            let start = range.start.min(held) as usize;
            let end = range.end.min(held) as usize;
            Ok(self.data[start..end].to_vec())
        })
    }
}

// ---------------------------------------------------------------------------
// SequentialSource
// ---------------------------------------------------------------------------

struct Cursor {
    reader: Box<dyn Read + Send>,
    position: u64,
    last: Option<(ByteRange, Vec<u8>)>,
}

/// A single forward-only reader such as a pipe.
///
/// Reads must arrive in non-decreasing offset order. Skipping forward
/// discards bytes. The most recent range is kept so it can be read again
/// for a retry.
pub struct SequentialSource {
    cursor: Arc<Mutex<Cursor>>,
    len: u64,
}

impl SequentialSource {
    pub fn new(reader: impl Read + Send + 'static, len: u64) -> Self {
        Self {
            cursor: Arc::new(Mutex::new(Cursor {
                reader: Box::new(reader),
                position: 0,
                last: None,
            })),
            len,
        }
    }
}

impl ByteSource for SequentialSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn supports_ranged_reads(&self) -> bool {
        false
    }

    fn read_range(&self, range: ByteRange) -> ReadFuture<'_> {
        Box::pin(async move {
            check_bounds(range, self.len)?;
            let cursor = Arc::clone(&self.cursor);
            tokio::task::spawn_blocking(move || -> Result<Vec<u8>, TransferError> {
                let mut c = cursor.lock().unwrap_or_else(PoisonError::into_inner);

                if let Some((last_range, bytes)) = &c.last {
                    if *last_range == range {
                        return Ok(bytes.clone());
                    }
                }

                if range.start < c.position {
                    return Err(TransferError::NonSequentialRead {
                        position: c.position,
                        requested: range.start,
                    });
                }

                let skip = range.start - c.position;
                if skip > 0 {
                    let skipped =
                        std::io::copy(&mut (&mut c.reader).take(skip), &mut std::io::sink())?;
                    c.position += skipped;
                    if skipped < skip {
                        c.last = Some((range, Vec::new()));
                        return Ok(Vec::new());
                    }
                }

                let bytes = read_up_to(&mut c.reader, range.len())?;
                c.position += bytes.len() as u64;
                c.last = Some((range, bytes.clone()));
                Ok(bytes)
            })
            .await
            .map_err(join_error)?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn file_source_reads_ranges() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let data = sample(10_000);
        tmp.write_all(&data).unwrap();
        tmp.flush().unwrap();

        let src = FileSource::open(tmp.path()).await.unwrap();
        assert_eq!(src.len(), 10_000);
        assert!(src.supports_ranged_reads());

        let mid = src.read_range(ByteRange::new(4_000, 6_500)).await.unwrap();
        assert_eq!(mid, &data[4_000..6_500]);
        let head = src.read_range(ByteRange::new(0, 10)).await.unwrap();
        assert_eq!(head, &data[..10]);
    }

    #[tokio::test]
    async fn file_source_concurrent_reads() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let data = sample(4_096);
        tmp.write_all(&data).unwrap();
        tmp.flush().unwrap();

        let src = FileSource::open(tmp.path()).await.unwrap();
        let (a, b) = tokio::join!(
            src.read_range(ByteRange::new(0, 2_048)),
            src.read_range(ByteRange::new(2_048, 4_096)),
        );
        assert_eq!(a.unwrap(), &data[..2_048]);
        assert_eq!(b.unwrap(), &data[2_048..]);
    }

    #[tokio::test]
    async fn file_source_short_read_after_truncation() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&sample(2_000)).unwrap();
        tmp.flush().unwrap();
        let src = FileSource::open(tmp.path()).await.unwrap();

        tmp.as_file().set_len(1_000).unwrap();
        let tail = src.read_range(ByteRange::new(1_000, 2_000)).await.unwrap();
        assert!(tail.is_empty());
        let partial = src.read_range(ByteRange::new(500, 1_500)).await.unwrap();
        assert_eq!(partial.len(), 500);
    }

    #[tokio::test]
    async fn file_source_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileSource::open(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn file_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSource::open(dir.path().join("nope.mp4")).await.unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
    }

    #[tokio::test]
    async fn out_of_bounds_rejected() {
        let src = MemorySource::new(sample(100));
        let err = src.read_range(ByteRange::new(50, 101)).await.unwrap_err();
        assert!(matches!(err, TransferError::RangeOutOfBounds { len: 100, .. }));
    }

    #[tokio::test]
    async fn truncated_memory_source_returns_nothing_past_data() {
        let src = MemorySource::truncated(sample(100), 300);
        assert_eq!(src.len(), 300);
        assert_eq!(src.read_range(ByteRange::new(0, 150)).await.unwrap().len(), 100);
        assert!(src.read_range(ByteRange::new(200, 300)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sequential_source_forward_only() {
        let data = sample(1_000);
        let src = SequentialSource::new(std::io::Cursor::new(data.clone()), 1_000);
        assert!(!src.supports_ranged_reads());

        let a = src.read_range(ByteRange::new(0, 300)).await.unwrap();
        assert_eq!(a, &data[..300]);
        // Repeat of the last range is served from the cache.
        let again = src.read_range(ByteRange::new(0, 300)).await.unwrap();
        assert_eq!(again, a);
        // Forward skip.
        let c = src.read_range(ByteRange::new(600, 1_000)).await.unwrap();
        assert_eq!(c, &data[600..]);

        let err = src.read_range(ByteRange::new(300, 600)).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::NonSequentialRead {
                position: 1_000,
                requested: 300
            }
        ));
    }

    #[tokio::test]
    async fn sequential_source_short_stream() {
        let src = SequentialSource::new(std::io::Cursor::new(sample(100)), 500);
        assert_eq!(src.read_range(ByteRange::new(0, 250)).await.unwrap().len(), 100);
        assert!(src.read_range(ByteRange::new(250, 500)).await.unwrap().is_empty());
    }
}
