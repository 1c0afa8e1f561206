//! The log source contract consumed by the events effect.
//!
//! A log source is bound to one contract. It answers historical queries
//! over a block range and opens live subscriptions that yield matching
//! logs as they are produced. Both take an already-resolved
//! [`LogFilter`], so implementations never deal with ABI details.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use alloy::rpc::types::Log;
use tokio_stream::Stream;

use crate::error::SourceError;
use crate::event::LogFilter;

/// Boxed future returned by [`LogSource`] methods.
///
/// Boxed so the trait stays object safe and can be shared as
/// `Arc<dyn LogSource>`.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Stream of raw logs delivered by a live subscription.
pub type LogStream = Pin<Box<dyn Stream<Item = Log> + Send>>;

/// Deferred unsubscribe action of a live subscription.
type Unsubscribe = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// A blockchain client able to query and stream the logs of one contract.
pub trait LogSource: Send + Sync + 'static {
    /// Current chain head, used as the upper bound of historical queries.
    fn head_block(&self) -> SourceFuture<'_, u64>;

    /// All logs matching `filter` in `from_block..=to_block`, in chain order.
    fn query_logs<'a>(
        &'a self,
        filter: &'a LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> SourceFuture<'a, Vec<Log>>;

    /// Open a live subscription for logs matching `filter`, starting at
    /// `from_block`.
    fn subscribe<'a>(
        &'a self,
        filter: &'a LogFilter,
        from_block: u64,
    ) -> SourceFuture<'a, LiveSubscription>;
}

/// A live log subscription: a stream of entries plus an unsubscribe action.
///
/// Dropping the subscription drops the stream but does not run the
/// unsubscribe action; call [`unsubscribe`](LiveSubscription::unsubscribe)
/// (or take it via [`into_parts`](LiveSubscription::into_parts)) to release
/// the server-side resources.
pub struct LiveSubscription {
    stream: LogStream,
    unsubscribe: Option<Unsubscribe>,
}

impl fmt::Debug for LiveSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSubscription")
            .field("has_unsubscribe", &self.unsubscribe.is_some())
            .finish()
    }
}

impl LiveSubscription {
    /// Wrap a stream with no unsubscribe action.
    pub fn new(stream: impl Stream<Item = Log> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
            unsubscribe: None,
        }
    }

    /// Attach the action that releases the subscription.
    pub fn with_unsubscribe<F, Fut>(mut self, unsubscribe: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.unsubscribe = Some(Box::new(move || Box::pin(unsubscribe())));
        self
    }

    /// Split into the log stream and an unsubscribe handle.
    pub fn into_parts(self) -> (LogStream, UnsubscribeHandle) {
        (
            self.stream,
            UnsubscribeHandle {
                action: self.unsubscribe,
            },
        )
    }

    /// Drop the stream and release the subscription.
    pub async fn unsubscribe(self) {
        let (_, handle) = self.into_parts();
        handle.run().await;
    }
}

/// The unsubscribe half of a [`LiveSubscription`].
pub struct UnsubscribeHandle {
    action: Option<Unsubscribe>,
}

impl UnsubscribeHandle {
    /// Run the unsubscribe action, if any.
    pub async fn run(self) {
        if let Some(action) = self.action {
            action().await;
        }
    }
}
