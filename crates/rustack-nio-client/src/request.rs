//! Request types accepted by the transport.
//!
//! [`RequestBody`] is the body type written to the wire. It clamps the
//! payload to the declared `Content-Length`, fails when the producer ends
//! early, and reports when the last byte has been handed to the codec so the
//! executor can swap the write timeout for the read timeout.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use futures::stream::BoxStream;
use http_body::{Frame, SizeHint};
use rustack_nio_core::NioError;
use tokio::sync::oneshot;

use crate::response::ResponseHandler;

enum Source {
    Empty,
    Full(Option<Bytes>),
    Stream(BoxStream<'static, Result<Bytes, NioError>>),
}

/// Request body with optional `Content-Length` enforcement.
pub struct RequestBody {
    source: Source,
    content_length: Option<u64>,
    written: u64,
    done: bool,
    write_complete: Option<oneshot::Sender<()>>,
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            Source::Empty => "empty",
            Source::Full(_) => "full",
            Source::Stream(_) => "stream",
        };
        f.debug_struct("RequestBody")
            .field("source", &source)
            .field("content_length", &self.content_length)
            .field("written", &self.written)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl RequestBody {
    fn new(source: Source) -> Self {
        Self {
            source,
            content_length: None,
            written: 0,
            done: false,
            write_complete: None,
        }
    }

    /// A body with no content.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Source::Empty)
    }

    /// A body with all of its content in memory.
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::new(Source::Full(Some(data.into())))
    }

    /// A body produced chunk by chunk.
    #[must_use]
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        use futures::StreamExt;

        Self::new(Source::Stream(
            stream
                .map(|chunk| chunk.map_err(|e| NioError::io("request body producer failed", e)))
                .boxed(),
        ))
    }

    /// Limit the body to `length` bytes and require at least that many.
    pub(crate) fn set_content_length(&mut self, length: Option<u64>) {
        self.content_length = length;
    }

    /// Signal `tx` once the body is fully written or dropped by the codec.
    pub(crate) fn on_write_complete(&mut self, tx: oneshot::Sender<()>) {
        self.write_complete = Some(tx);
    }

    fn finish(&mut self) {
        self.done = true;
        if let Some(tx) = self.write_complete.take() {
            let _ = tx.send(());
        }
    }

    fn clamp(&mut self, mut chunk: Bytes) -> Bytes {
        if let Some(limit) = self.content_length {
            let remaining = limit.saturating_sub(self.written);
            if (chunk.len() as u64) > remaining {
                chunk.truncate(usize::try_from(remaining).unwrap_or(usize::MAX));
            }
        }
        self.written += chunk.len() as u64;
        chunk
    }

    fn reached_limit(&self) -> bool {
        self.content_length
            .is_some_and(|limit| self.written >= limit)
    }
}

// The codec drops the body once it is done with it, which also covers
// bodies it never polls because they are empty.
impl Drop for RequestBody {
    fn drop(&mut self) {
        if let Some(tx) = self.write_complete.take() {
            let _ = tx.send(());
        }
    }
}

impl http_body::Body for RequestBody {
    type Data = Bytes;
    type Error = NioError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        loop {
            if this.done || this.reached_limit() {
                this.finish();
                return Poll::Ready(None);
            }

            let next = match &mut this.source {
                Source::Empty => None,
                Source::Full(data) => data.take().map(Ok),
                Source::Stream(stream) => match stream.as_mut().poll_next(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(item) => item,
                },
            };

            match next {
                Some(Ok(chunk)) => {
                    let chunk = this.clamp(chunk);
                    if chunk.is_empty() {
                        continue;
                    }
                    return Poll::Ready(Some(Ok(Frame::data(chunk))));
                }
                Some(Err(error)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(error)));
                }
                None => {
                    if let Some(expected) = this.content_length {
                        if this.written < expected {
                            this.done = true;
                            return Poll::Ready(Some(Err(NioError::RequestContentTooShort {
                                written: this.written,
                                expected,
                            })));
                        }
                    }
                    this.finish();
                    return Poll::Ready(None);
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
            || self.reached_limit()
            || match &self.source {
                Source::Empty => true,
                Source::Full(data) => data.is_none(),
                Source::Stream(_) => false,
            }
    }

    fn size_hint(&self) -> SizeHint {
        if let Some(limit) = self.content_length {
            return SizeHint::with_exact(limit.saturating_sub(self.written));
        }
        match &self.source {
            Source::Empty => SizeHint::with_exact(0),
            Source::Full(Some(data)) => SizeHint::with_exact(data.len() as u64),
            Source::Full(None) => SizeHint::with_exact(0),
            Source::Stream(_) => SizeHint::default(),
        }
    }
}

/// A request handed to the transport for execution.
#[derive(Debug)]
pub struct AsyncExecuteRequest {
    /// Method, target URI, headers, and body.
    pub request: http::Request<RequestBody>,
    /// Receives the response.
    pub handler: Arc<dyn ResponseHandler>,
    /// Whether the response may start before the request body is written.
    pub full_duplex: bool,
}

impl AsyncExecuteRequest {
    /// Create an execute request.
    #[must_use]
    pub fn new(request: http::Request<RequestBody>, handler: Arc<dyn ResponseHandler>) -> Self {
        Self {
            request,
            handler,
            full_duplex: false,
        }
    }

    /// Arm the read timeout as soon as the request starts.
    #[must_use]
    pub fn full_duplex(mut self, full_duplex: bool) -> Self {
        self.full_duplex = full_duplex;
        self
    }
}
