//! Utilities and combinators for [`Stream`]
use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures_core::Stream;
use pin_project::pin_project;
use tokio::sync::broadcast::{self, error::SendError};

/// A `BroadcastStream` wrapper similar to tokio's `BroadcastStream` wrapper
/// except that this version will directly yield items instead of `Result`s.
///
/// Lagged receivers terminate the stream instead of erroring
#[pin_project]
pub struct BroadcastStream<T> {
    /// Inner stream
    #[pin]
    inner: tokio_stream::wrappers::BroadcastStream<T>,
}

impl<T: 'static + Clone + Send> From<broadcast::Receiver<T>> for BroadcastStream<T> {
    fn from(value: broadcast::Receiver<T>) -> Self {
        Self {
            inner: value.into(),
        }
    }
}

impl<T: 'static + Clone + Send> Stream for BroadcastStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(item))) => Poll::Ready(Some(item)),
            Poll::Ready(Some(Err(_))) => Poll::Ready(None),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A broadcast fan-out of events.
///
/// Cloning the stream shares the underlying channel; every subscriber observes every event
/// sent after it subscribed
#[derive(Clone)]
pub struct EventStream<E> {
    tx: broadcast::Sender<E>,
}

impl<E> EventStream<E>
where
    E: Clone,
{
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub(crate) fn send(&self, event: E) -> Result<usize, SendError<E>> {
        self.tx.send(event)
    }
}

impl<E> EventStream<E>
where
    E: Clone + Send + 'static,
{
    pub(crate) fn stream(&self) -> BroadcastStream<E> {
        let rx = self.tx.subscribe();
        BroadcastStream::from(rx)
    }
}
