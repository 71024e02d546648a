//! Cancellable single-shot promises.
//!
//! A [`Promise`] is the producing half handed to a pool stage; the
//! [`PromiseFuture`] is the consuming half held by whoever asked for the
//! value. Cancellation travels through the same primitive: dropping or
//! cancelling the future makes [`Promise::cancelled`] resolve, and a value
//! completed after cancellation is handed back to the producer instead of
//! being lost.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{NioError, NioResult};

/// Create a linked promise/future pair.
#[must_use]
pub fn promise<T>() -> (Promise<T>, PromiseFuture<T>) {
    let (tx, rx) = oneshot::channel();
    (Promise { tx }, PromiseFuture { rx })
}

/// Producing half of a promise.
#[derive(Debug)]
pub struct Promise<T> {
    tx: oneshot::Sender<NioResult<T>>,
}

impl<T> Promise<T> {
    /// Complete the promise with a value.
    ///
    /// Returns the value back when the consumer has already cancelled, so
    /// the producer can clean it up.
    pub fn try_success(self, value: T) -> Result<(), T> {
        match self.tx.send(Ok(value)) {
            Ok(()) | Err(Err(_)) => Ok(()),
            Err(Ok(value)) => Err(value),
        }
    }

    /// Fail the promise. Returns `false` when the consumer is gone.
    pub fn try_failure(self, error: NioError) -> bool {
        self.tx.send(Err(error)).is_ok()
    }

    /// Whether the consumer cancelled or dropped its future.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolve once the consumer cancels or drops its future.
    pub async fn cancelled(&mut self) {
        self.tx.closed().await;
    }
}

/// Consuming half of a promise.
#[derive(Debug)]
pub struct PromiseFuture<T> {
    rx: oneshot::Receiver<NioResult<T>>,
}

impl<T> PromiseFuture<T> {
    /// Cancel the promise.
    ///
    /// Returns a value the producer completed before the cancellation was
    /// observed; the caller owns it and must clean it up. Any completion
    /// attempted afterwards is refused and handed back to the producer.
    pub fn cancel(mut self) -> Option<T> {
        self.rx.close();
        match self.rx.try_recv() {
            Ok(Ok(value)) => Some(value),
            _ => None,
        }
    }
}

impl<T> Future for PromiseFuture<T> {
    type Output = NioResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                Err(NioError::Internal(
                    "promise dropped before completion".to_owned(),
                ))
            })
        })
    }
}
