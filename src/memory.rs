//! In-process [`LogSource`] backed by a vector of logs.
//!
//! Useful for tests and demos: logs are pushed by hand, historical
//! queries and live subscriptions are answered from memory, and query
//! failures can be injected. Subscriptions registered here are tracked so
//! callers can verify that none are left open.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, LogData};
use alloy::rpc::types::Log;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::SourceError;
use crate::event::{LogFilter, LogPosition};
use crate::source::{LiveSubscription, LogSource, SourceFuture};

/// Build an RPC log entry emitted by `address` at `position`.
pub fn make_log(address: Address, data: LogData, position: LogPosition) -> Log {
    Log {
        inner: alloy::primitives::Log { address, data },
        block_hash: None,
        block_number: Some(position.block_number),
        block_timestamp: None,
        transaction_hash: None,
        transaction_index: Some(position.transaction_index),
        log_index: Some(position.log_index),
        removed: false,
    }
}

/// One historical query served by a [`MemoryLogSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRecord {
    /// Event name of the filter.
    pub event: String,
    /// Inclusive lower block bound.
    pub from_block: u64,
    /// Inclusive upper block bound.
    pub to_block: u64,
}

struct Subscriber {
    filter: LogFilter,
    from_block: u64,
    tx: mpsc::UnboundedSender<Log>,
}

#[derive(Default)]
struct Inner {
    logs: Vec<Log>,
    head: u64,
    subscribers: HashMap<u64, Subscriber>,
    next_subscription: u64,
    failure: Option<String>,
    queries: Vec<QueryRecord>,
    closed: bool,
}

/// A log source for one contract address, held entirely in memory.
///
/// `Clone` is cheap: clones share the same chain.
#[derive(Clone)]
pub struct MemoryLogSource {
    address: Address,
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for MemoryLogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLogSource")
            .field("address", &self.address)
            .finish()
    }
}

impl MemoryLogSource {
    /// Create an empty chain for the contract at `address`.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory log source mutex poisoned")
    }

    /// Append a log emitted by this contract and deliver it to matching
    /// live subscribers. The chain head moves up to the log's block.
    pub fn push(&self, data: LogData, position: LogPosition) -> Log {
        let log = make_log(self.address, data, position);
        let mut inner = self.lock();
        inner.head = inner.head.max(position.block_number);
        inner.subscribers.retain(|_, sub| {
            if sub.filter.matches(&log.inner.data) && position.block_number >= sub.from_block {
                // A closed receiver means the subscriber went away.
                sub.tx.send(log.clone()).is_ok()
            } else {
                true
            }
        });
        inner.logs.push(log.clone());
        log
    }

    /// Move the chain head without emitting logs.
    pub fn advance_head(&self, block: u64) {
        let mut inner = self.lock();
        inner.head = inner.head.max(block);
    }

    /// Make every following historical query fail with `reason`.
    pub fn fail_queries(&self, reason: impl Into<String>) {
        self.lock().failure = Some(reason.into());
    }

    /// Stop injecting query failures.
    pub fn clear_failure(&self) {
        self.lock().failure = None;
    }

    /// Shut the source down.
    ///
    /// Every live subscription stream ends and later requests fail with
    /// [`SourceError::Closed`].
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    /// Historical queries served so far, in call order.
    pub fn queries(&self) -> Vec<QueryRecord> {
        self.lock().queries.clone()
    }

    /// Number of live subscriptions not yet unsubscribed.
    pub fn open_subscriptions(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn matching(&self, inner: &Inner, filter: &LogFilter, from: u64, to: u64) -> Vec<Log> {
        let mut logs: Vec<Log> = inner
            .logs
            .iter()
            .filter(|log| {
                let block = log.block_number.unwrap_or_default();
                log.inner.address == self.address
                    && block >= from
                    && block <= to
                    && filter.matches(&log.inner.data)
            })
            .cloned()
            .collect();
        logs.sort_by_key(|log| LogPosition::of(log).unwrap_or_default());
        logs
    }
}

impl LogSource for MemoryLogSource {
    fn head_block(&self) -> SourceFuture<'_, u64> {
        Box::pin(async move {
            let inner = self.lock();
            if inner.closed {
                return Err(SourceError::Closed);
            }
            Ok(inner.head)
        })
    }

    fn query_logs<'a>(
        &'a self,
        filter: &'a LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> SourceFuture<'a, Vec<Log>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if inner.closed {
                return Err(SourceError::Closed);
            }
            inner.queries.push(QueryRecord {
                event: filter.event.clone(),
                from_block,
                to_block,
            });
            if let Some(reason) = &inner.failure {
                return Err(SourceError::rpc("eth_getLogs", reason));
            }
            Ok(self.matching(&inner, filter, from_block, to_block))
        })
    }

    fn subscribe<'a>(
        &'a self,
        filter: &'a LogFilter,
        from_block: u64,
    ) -> SourceFuture<'a, LiveSubscription> {
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            let id = {
                let mut inner = self.lock();
                if inner.closed {
                    return Err(SourceError::Closed);
                }
                // Back-fill whatever already landed at or after `from_block`.
                let head = inner.head;
                for log in self.matching(&inner, filter, from_block, head) {
                    let _ = tx.send(log);
                }
                let id = inner.next_subscription;
                inner.next_subscription += 1;
                inner.subscribers.insert(
                    id,
                    Subscriber {
                        filter: filter.clone(),
                        from_block,
                        tx,
                    },
                );
                id
            };

            let registry = self.inner.clone();
            Ok(
                LiveSubscription::new(UnboundedReceiverStream::new(rx)).with_unsubscribe(
                    move || async move {
                        registry
                            .lock()
                            .expect("memory log source mutex poisoned")
                            .subscribers
                            .remove(&id);
                    },
                ),
            )
        })
    }
}
