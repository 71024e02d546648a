//! HTTP/2 GOAWAY detection.
//!
//! The HTTP/2 codec handles GOAWAY internally but does not report it.
//! [`GoAwayDetectingIo`] sits under the codec and scans inbound frame
//! headers so the connection's channel can be marked ineligible for new
//! streams the moment a GOAWAY arrives.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const FRAME_HEADER_LEN: usize = 9;
const FRAME_TYPE_GOAWAY: u8 = 0x7;

/// Incremental HTTP/2 frame header scanner for the server-to-client
/// direction (which carries no connection preface).
#[derive(Debug, Default)]
pub(crate) struct FrameScanner {
    header: [u8; FRAME_HEADER_LEN],
    header_len: usize,
    frame_type: u8,
    payload_remaining: usize,
    last_stream_id: [u8; 4],
    last_stream_id_len: usize,
}

impl FrameScanner {
    /// Feed inbound bytes; returns the last-stream-id of the last GOAWAY
    /// completed within `data`.
    pub(crate) fn feed(&mut self, mut data: &[u8]) -> Option<u32> {
        let mut found = None;
        while !data.is_empty() {
            if self.header_len < FRAME_HEADER_LEN {
                let n = (FRAME_HEADER_LEN - self.header_len).min(data.len());
                self.header[self.header_len..self.header_len + n].copy_from_slice(&data[..n]);
                self.header_len += n;
                data = &data[n..];
                if self.header_len == FRAME_HEADER_LEN {
                    self.payload_remaining = (usize::from(self.header[0]) << 16)
                        | (usize::from(self.header[1]) << 8)
                        | usize::from(self.header[2]);
                    self.frame_type = self.header[3];
                    self.last_stream_id_len = 0;
                    if self.payload_remaining == 0 {
                        self.header_len = 0;
                    }
                }
                continue;
            }

            let n = self.payload_remaining.min(data.len());
            if self.frame_type == FRAME_TYPE_GOAWAY && self.last_stream_id_len < 4 {
                let take = (4 - self.last_stream_id_len).min(n);
                self.last_stream_id[self.last_stream_id_len..self.last_stream_id_len + take]
                    .copy_from_slice(&data[..take]);
                self.last_stream_id_len += take;
                if self.last_stream_id_len == 4 {
                    found = Some(u32::from_be_bytes(self.last_stream_id) & 0x7fff_ffff);
                }
            }
            self.payload_remaining -= n;
            data = &data[n..];
            if self.payload_remaining == 0 {
                self.header_len = 0;
            }
        }
        found
    }
}

pin_project! {
    /// Transport wrapper reporting GOAWAY frames read from the server.
    pub struct GoAwayDetectingIo<T> {
        #[pin]
        inner: T,
        scanner: FrameScanner,
        on_go_away: Box<dyn FnMut(u32) + Send>,
    }
}

impl<T> std::fmt::Debug for GoAwayDetectingIo<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoAwayDetectingIo")
            .field("scanner", &self.scanner)
            .finish_non_exhaustive()
    }
}

impl<T> GoAwayDetectingIo<T> {
    /// Wrap `inner`, calling `on_go_away` with each GOAWAY's last stream id.
    pub fn new(inner: T, on_go_away: impl FnMut(u32) + Send + 'static) -> Self {
        Self {
            inner,
            scanner: FrameScanner::default(),
            on_go_away: Box::new(on_go_away),
        }
    }
}

impl<T: AsyncRead> AsyncRead for GoAwayDetectingIo<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        ready!(this.inner.poll_read(cx, buf))?;
        if let Some(last_stream_id) = this.scanner.feed(&buf.filled()[before..]) {
            (this.on_go_away)(last_stream_id);
        }
        Poll::Ready(Ok(()))
    }
}

impl<T: AsyncWrite> AsyncWrite for GoAwayDetectingIo<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
