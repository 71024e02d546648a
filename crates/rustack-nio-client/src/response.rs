//! Response delivery.
//!
//! A [`ResponseHandler`] receives exactly one `on_headers` call, then the
//! body as a [`ResponseContentStream`] through `on_stream`, or a single
//! `on_error`.
//!
//! The content stream is demand driven: each poll by the consumer asks the
//! exchange for one frame, and the exchange reads nothing from the
//! connection until asked. The stream has one owner, which makes the
//! single-subscriber contract a property of the type. Dropping it cancels
//! the exchange and closes the connection.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, ready};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use rustack_nio_core::{NioError, NioResult};
use tokio::sync::{mpsc, oneshot};

/// One frame delivered in reply to a demand; `None` ends the body.
pub(crate) type Reply = Option<NioResult<Bytes>>;

/// Receives the outcome of an exchange.
pub trait ResponseHandler: Send + Sync + fmt::Debug {
    /// Status line and headers.
    fn on_headers(&self, head: &http::response::Parts);

    /// Response body.
    fn on_stream(&self, stream: ResponseContentStream);

    /// The exchange failed.
    fn on_error(&self, error: &NioError);
}

/// Final state of an exchange as seen by its content stream.
#[derive(Debug, Clone, Default)]
pub(crate) struct StreamOutcome(Arc<OnceLock<NioResult<()>>>);

impl StreamOutcome {
    pub(crate) fn set(&self, outcome: NioResult<()>) {
        let _ = self.0.set(outcome);
    }

    fn get(&self) -> Option<&NioResult<()>> {
        self.0.get()
    }
}

/// Back-pressured response body.
pub struct ResponseContentStream {
    demands: mpsc::UnboundedSender<oneshot::Sender<Reply>>,
    pending: Option<oneshot::Receiver<Reply>>,
    outcome: StreamOutcome,
    finished: bool,
}

impl fmt::Debug for ResponseContentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseContentStream")
            .field("awaiting_frame", &self.pending.is_some())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl ResponseContentStream {
    /// Create a stream and the demand queue the exchange serves.
    pub(crate) fn new(
        outcome: StreamOutcome,
    ) -> (Self, mpsc::UnboundedReceiver<oneshot::Sender<Reply>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                demands: tx,
                pending: None,
                outcome,
                finished: false,
            },
            rx,
        )
    }

    /// Read the whole body into memory.
    pub async fn collect_bytes(mut self) -> NioResult<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Outcome once the exchange no longer answers demands.
    fn settled(&mut self) -> Option<NioResult<Bytes>> {
        self.finished = true;
        match self.outcome.get() {
            Some(Ok(())) => None,
            Some(Err(error)) => Some(Err(error.clone())),
            None => Some(Err(NioError::io_message(
                "response stream ended before the exchange completed",
            ))),
        }
    }
}

impl Stream for ResponseContentStream {
    type Item = NioResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        if self.pending.is_none() {
            let (tx, rx) = oneshot::channel();
            if self.demands.send(tx).is_err() {
                return Poll::Ready(self.settled());
            }
            self.pending = Some(rx);
        }
        let Some(pending) = self.pending.as_mut() else {
            return Poll::Ready(None);
        };
        let reply = ready!(Pin::new(pending).poll(cx));
        self.pending = None;
        match reply {
            Ok(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Ok(Some(Err(error))) => {
                self.finished = true;
                Poll::Ready(Some(Err(error)))
            }
            Ok(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Err(_) => Poll::Ready(self.settled()),
        }
    }
}

// ---------------------------------------------------------------------------
// Buffering handler
// ---------------------------------------------------------------------------

/// Handler that collects the whole response into memory.
#[derive(Debug)]
pub struct BufferingResponseHandler {
    head: Mutex<Option<http::response::Parts>>,
    result: Mutex<Option<oneshot::Sender<NioResult<http::Response<Bytes>>>>>,
}

impl BufferingResponseHandler {
    /// Create a handler and the receiver of its buffered response.
    #[must_use]
    pub fn new() -> (Arc<Self>, oneshot::Receiver<NioResult<http::Response<Bytes>>>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                head: Mutex::new(None),
                result: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    fn deliver(&self, result: NioResult<http::Response<Bytes>>) {
        if let Some(tx) = self.result.lock().take() {
            let _ = tx.send(result);
        }
    }
}

impl ResponseHandler for BufferingResponseHandler {
    fn on_headers(&self, head: &http::response::Parts) {
        *self.head.lock() = Some(head.clone());
    }

    fn on_stream(&self, stream: ResponseContentStream) {
        let Some(head) = self.head.lock().take() else {
            self.deliver(Err(NioError::Internal(
                "response body arrived before its headers".to_owned(),
            )));
            return;
        };
        let Some(tx) = self.result.lock().take() else {
            return;
        };
        tokio::spawn(async move {
            let result = stream
                .collect_bytes()
                .await
                .map(|body| http::Response::from_parts(head, body));
            let _ = tx.send(result);
        });
    }

    fn on_error(&self, error: &NioError) {
        self.deliver(Err(error.clone()));
    }
}
