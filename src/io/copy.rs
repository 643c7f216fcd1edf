//! Single-direction stream copy
//!
//! `StreamBridge` moves bytes from one async reader to one async writer
//! in bounded chunks. A bridge session runs two of them, one per
//! direction, as independent tasks.
//!
//! Each chunk is written completely before the next read is issued, so
//! memory use per direction is fixed at one chunk. The loop never retries:
//! the first read or write error ends it and is handed back in the
//! [`CopyOutcome`].

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::trace;

/// Default chunk size (8KB)
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Minimum chunk size (1KB)
pub const MIN_CHUNK_SIZE: usize = 1024;

/// Maximum chunk size (1MB)
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Callback invoked with the size of every chunk fully written
pub type ProgressFn = Box<dyn FnMut(usize) + Send>;

/// Result of a single-direction copy
#[derive(Debug)]
pub struct CopyOutcome {
    /// Bytes written to the sink before the copy ended
    pub bytes_copied: u64,
    /// The error that ended the copy, `None` on clean end-of-stream
    pub error: Option<io::Error>,
}

impl CopyOutcome {
    /// True when the source reached end-of-stream without error
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.error.is_none()
    }

    /// Convert into an `io::Result` carrying the byte count
    pub fn into_result(self) -> io::Result<u64> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.bytes_copied),
        }
    }
}

/// Copy state for one direction
struct TransferState {
    buf: Box<[u8]>,
    read_done: bool,
    write_done: bool,
    pos: usize,
    cap: usize,
    bytes_transferred: u64,
}

impl TransferState {
    fn new(chunk_size: usize) -> Self {
        Self {
            buf: vec![0u8; chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)].into_boxed_slice(),
            read_done: false,
            write_done: false,
            pos: 0,
            cap: 0,
            bytes_transferred: 0,
        }
    }

    fn poll_transfer<R, W>(
        &mut self,
        cx: &mut Context<'_>,
        mut reader: Pin<&mut R>,
        mut writer: Pin<&mut W>,
        progress: &mut Option<ProgressFn>,
    ) -> Poll<io::Result<()>>
    where
        R: AsyncRead + ?Sized,
        W: AsyncWrite + ?Sized,
    {
        loop {
            if self.pos < self.cap {
                let n = match writer.as_mut().poll_write(cx, &self.buf[self.pos..self.cap]) {
                    Poll::Ready(Ok(0)) => {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "write zero bytes",
                        )));
                    }
                    Poll::Ready(Ok(n)) => n,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                };
                self.pos += n;
                self.bytes_transferred += n as u64;

                if self.pos == self.cap {
                    let chunk = self.cap;
                    self.pos = 0;
                    self.cap = 0;
                    if let Some(report) = progress.as_mut() {
                        report(chunk);
                    }
                }
            } else if self.read_done {
                if !self.write_done {
                    match writer.as_mut().poll_flush(cx) {
                        Poll::Ready(Ok(())) => {}
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                    match writer.as_mut().poll_shutdown(cx) {
                        Poll::Ready(Ok(())) => {
                            self.write_done = true;
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                return Poll::Ready(Ok(()));
            } else {
                let mut read_buf = ReadBuf::new(&mut self.buf);
                match reader.as_mut().poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            self.read_done = true;
                        } else {
                            self.cap = n;
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
        }
    }
}

/// Copies one readable stream into one writable stream until EOF or error
///
/// `StreamBridge` is a future; await it directly or spawn it as a task.
///
/// # Example
///
/// ```
/// use peer_bridge::io::StreamBridge;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let source: &[u8] = b"PING";
/// let mut sink = Vec::new();
/// let outcome = StreamBridge::new(source, &mut sink, 1024).await;
/// assert!(outcome.is_clean());
/// assert_eq!(sink, b"PING");
/// # }
/// ```
pub struct StreamBridge<R, W> {
    reader: R,
    writer: W,
    state: TransferState,
    progress: Option<ProgressFn>,
}

impl<R, W> StreamBridge<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Create a bridge copying `reader` into `writer` in `chunk_size` chunks
    ///
    /// The chunk size is clamped to `MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE`.
    pub fn new(reader: R, writer: W, chunk_size: usize) -> Self {
        Self {
            reader,
            writer,
            state: TransferState::new(chunk_size),
            progress: None,
        }
    }

    /// Report every fully written chunk to `progress`
    #[must_use]
    pub fn with_progress(mut self, progress: impl FnMut(usize) + Send + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Chunk size in use
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.state.buf.len()
    }
}

impl<R, W> Future for StreamBridge<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    type Output = CopyOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        let result = match this.state.poll_transfer(
            cx,
            Pin::new(&mut this.reader),
            Pin::new(&mut this.writer),
            &mut this.progress,
        ) {
            Poll::Ready(result) => result,
            Poll::Pending => return Poll::Pending,
        };

        let bytes_copied = this.state.bytes_transferred;
        if let Err(ref e) = result {
            trace!("Stream copy ended with error after {} bytes: {}", bytes_copied, e);
        }

        Poll::Ready(CopyOutcome {
            bytes_copied,
            error: result.err(),
        })
    }
}

impl<R, W> fmt::Debug for StreamBridge<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBridge")
            .field("chunk_size", &self.state.buf.len())
            .field("bytes_transferred", &self.state.bytes_transferred)
            .field("read_done", &self.state.read_done)
            .finish_non_exhaustive()
    }
}

/// Copy `reader` into `writer` with the default chunk size
pub async fn copy_stream<R, W>(reader: R, writer: W) -> CopyOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    StreamBridge::new(reader, writer, DEFAULT_CHUNK_SIZE).await
}
