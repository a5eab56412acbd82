use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::RestlineResult;
use crate::error::Error;
use crate::range::Range;

const SKIP_BUFFER_LEN: u64 = 64 * 1024;

/// Payload an upload task reads chunk by chunk.
pub trait FileSource: Send {
    fn size(&self) -> u64;

    /// Bytes covering `range`, inclusive on both ends.
    fn slice_file(&mut self, range: Range) -> BoxFuture<'_, RestlineResult<Bytes>>;
}

/// Random-access payload held in memory.
#[derive(Clone, Debug)]
pub struct FileUpload {
    content: Bytes,
    name: String,
}

impl FileUpload {
    pub fn new(content: impl Into<Bytes>, name: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn slice(&self, range: Range) -> RestlineResult<Bytes> {
        let size = self.size();
        if !range.is_valid() || range.max as u64 >= size {
            return Err(Error::StreamExhausted {
                expected: range.len(),
                actual: size.saturating_sub(range.min.max(0) as u64).min(range.len()),
            });
        }
        Ok(self
            .content
            .slice(range.min as usize..=range.max as usize))
    }
}

impl FileSource for FileUpload {
    fn size(&self) -> u64 {
        self.content.len() as u64
    }

    fn slice_file(&mut self, range: Range) -> BoxFuture<'_, RestlineResult<Bytes>> {
        let slice = self.slice(range);
        Box::pin(async move { slice })
    }
}

/// Forward-only payload read from an [`AsyncRead`].
///
/// The most recently returned slice stays buffered, so a chunk can be sent
/// again or a request overlapping it can be served. Ranges that start before
/// that slice fail with [`Error::StreamRewind`]; gaps ahead of the stream
/// position are skipped.
pub struct StreamUpload<R> {
    reader: R,
    size: u64,
    name: String,
    position: u64,
    retained: Option<(u64, Bytes)>,
}

impl<R> std::fmt::Debug for StreamUpload<R> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("StreamUpload")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("position", &self.position)
            .field(
                "retained",
                &self
                    .retained
                    .as_ref()
                    .map(|(start, bytes)| (*start, bytes.len())),
            )
            .finish_non_exhaustive()
    }
}

impl<R> StreamUpload<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// `size` is the total number of bytes the stream will produce.
    pub fn new(reader: R, size: u64, name: impl Into<String>) -> Self {
        Self {
            reader,
            size,
            name: name.into(),
            position: 0,
            retained: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    async fn read_range(&mut self, range: Range) -> RestlineResult<Bytes> {
        if !range.is_valid() {
            return Err(Error::StreamExhausted {
                expected: range.len(),
                actual: 0,
            });
        }
        let min = range.min as u64;
        let end = min + range.len();

        let (prefix, fresh_from) = match &self.retained {
            Some((start, bytes)) => {
                let start = *start;
                let retained_end = start + bytes.len() as u64;
                if min < start {
                    return Err(Error::StreamRewind {
                        requested_min: min,
                        buffered_min: start,
                    });
                }
                if min < retained_end {
                    let upto = end.min(retained_end);
                    let prefix = bytes.slice((min - start) as usize..(upto - start) as usize);
                    (prefix, upto)
                } else {
                    (Bytes::new(), min)
                }
            }
            None if min < self.position => {
                return Err(Error::StreamRewind {
                    requested_min: min,
                    buffered_min: self.position,
                });
            }
            None => (Bytes::new(), min),
        };
        if fresh_from == end {
            return Ok(prefix);
        }
        if fresh_from < self.position {
            return Err(Error::StreamRewind {
                requested_min: fresh_from,
                buffered_min: self.position,
            });
        }

        let mut gap = fresh_from - self.position;
        let mut discard = vec![0_u8; gap.min(SKIP_BUFFER_LEN) as usize];
        while gap > 0 {
            let limit = gap.min(discard.len() as u64) as usize;
            let count = self.pull(&mut discard[..limit]).await?;
            if count == 0 {
                self.retained = None;
                return Err(Error::StreamExhausted {
                    expected: range.len(),
                    actual: 0,
                });
            }
            gap -= count as u64;
        }

        let wanted = (end - fresh_from) as usize;
        let mut fresh = vec![0_u8; wanted];
        let mut read = 0_usize;
        while read < wanted {
            let count = self.pull(&mut fresh[read..]).await?;
            if count == 0 {
                break;
            }
            read += count;
        }
        if read < wanted {
            self.retained = None;
            return Err(Error::StreamExhausted {
                expected: range.len(),
                actual: (prefix.len() + read) as u64,
            });
        }

        let mut buffer = BytesMut::with_capacity(prefix.len() + wanted);
        buffer.extend_from_slice(&prefix);
        buffer.extend_from_slice(&fresh);
        let chunk = buffer.freeze();
        self.retained = Some((min, chunk.clone()));
        Ok(chunk)
    }

    /// One read from the stream. `position` always matches the bytes the
    /// reader has handed out, and a failed read drops the retained slice.
    async fn pull(&mut self, buffer: &mut [u8]) -> RestlineResult<usize> {
        match self.reader.read(buffer).await {
            Ok(count) => {
                self.position += count as u64;
                Ok(count)
            }
            Err(source) => {
                self.retained = None;
                Err(Error::SourceRead { source })
            }
        }
    }
}

impl<R> FileSource for StreamUpload<R>
where
    R: AsyncRead + Unpin + Send,
{
    fn size(&self) -> u64 {
        self.size
    }

    fn slice_file(&mut self, range: Range) -> BoxFuture<'_, RestlineResult<Bytes>> {
        Box::pin(self.read_range(range))
    }
}
