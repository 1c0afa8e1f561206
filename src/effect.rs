//! The events effect: historical catch-up followed by a live tail.
//!
//! An [`EventsEffect`] binds one [`LogSource`], one [`EventNormalizer`] and
//! one [`ProjectionFold`]. [`start`](EventsEffect::start) spawns a background
//! task that:
//!
//! 1. queries every event spec of the fold from the checkpoint's next block
//!    to the chain head, one spec at a time, orders the combined events with
//!    [`order_for_replay`], folds them in place and delivers the resulting
//!    checkpoint exactly once;
//! 2. unless cancelled meanwhile, subscribes to every spec from the next
//!    block and folds each live event copy-on-write, delivering a new
//!    checkpoint per event.
//!
//! The returned [`EffectHandle`] cancels the run, reports progress, and
//! surfaces a catch-up failure.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio_stream::{StreamExt, StreamMap};

use crate::checkpoint::{load_checkpoint, save_checkpoint};
use crate::error::SyncError;
use crate::event::{EventNormalizer, LogFilter, LogPosition};
use crate::projection::{Checkpoint, ProjectionFold, fold_initial};
use crate::replay::order_for_replay;
use crate::source::{LogSource, UnsubscribeHandle};

/// Configuration of an events effect run.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use stickem_sync::EffectConfig;
///
/// let config = EffectConfig {
///     checkpoint_interval: Duration::from_secs(30),
///     ..EffectConfig::default()
/// };
/// assert_eq!(config.dedup_window_blocks, 64);
/// assert!(config.checkpoint_dir.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct EffectConfig {
    /// How many blocks of recently applied log positions the live phase
    /// remembers. A live log whose position was already applied within the
    /// window is dropped; this happens when two event specs match the same
    /// log.
    ///
    /// Default: 64.
    pub dedup_window_blocks: u64,

    /// Directory for durable checkpoints. `None` disables persistence.
    ///
    /// Default: `None`.
    pub checkpoint_dir: Option<PathBuf>,

    /// How often the checkpoint is flushed to disk while live, when
    /// persistence is enabled. It is also saved after catch-up and on
    /// shutdown.
    ///
    /// Default: 5 seconds.
    pub checkpoint_interval: Duration,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            dedup_window_blocks: 64,
            checkpoint_dir: None,
            checkpoint_interval: Duration::from_secs(5),
        }
    }
}

/// Progress of the historical catch-up phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Historical logs are still being queried or folded.
    CatchingUp,
    /// The caught-up checkpoint has been delivered.
    Synced,
    /// Catch-up failed; nothing was delivered. Carries the error message;
    /// [`EffectHandle::shutdown`] returns the error itself.
    Failed(String),
}

/// One projection scope ready to be synchronized.
pub struct EventsEffect<F: ProjectionFold> {
    source: Arc<dyn LogSource>,
    normalizer: EventNormalizer,
    fold: Arc<F>,
    config: EffectConfig,
}

impl<F: ProjectionFold> EventsEffect<F> {
    /// Bind a fold to a log source and the schema used to decode its logs.
    pub fn new(source: Arc<dyn LogSource>, normalizer: EventNormalizer, fold: F) -> Self {
        Self {
            source,
            normalizer,
            fold: Arc::new(fold),
            config: EffectConfig::default(),
        }
    }

    /// Replace the default configuration.
    pub fn with_config(mut self, config: EffectConfig) -> Self {
        self.config = config;
        self
    }

    /// The fold this effect drives.
    pub fn fold(&self) -> &F {
        &self.fold
    }

    /// Load the persisted checkpoint of this scope, or a genesis one.
    ///
    /// Without a configured checkpoint directory this is always genesis.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] for unexpected I/O failures. A missing or
    /// corrupt file is not an error.
    pub fn resume_checkpoint(&self) -> Result<Checkpoint<F::State>, SyncError> {
        let Some(dir) = &self.config.checkpoint_dir else {
            return Ok(Checkpoint::genesis());
        };
        Ok(load_checkpoint(dir, &self.fold.scope_name())?.unwrap_or_else(Checkpoint::genesis))
    }

    /// Resolve the fold's event specs against the schema.
    fn resolve_filters(&self) -> Result<Vec<LogFilter>, SyncError> {
        let schema = self.normalizer.schema();
        self.fold
            .event_specs()
            .iter()
            .map(|spec| schema.resolve(spec).map_err(SyncError::from))
            .collect()
    }

    /// Run the historical phase once, without delivering or subscribing.
    ///
    /// Every event spec is queried in turn over
    /// `checkpoint.next_block()..=head`; results are decoded, put in replay
    /// order and folded in place into `checkpoint.state`.
    ///
    /// # Returns
    ///
    /// The advanced checkpoint. `last_processed_block` becomes the highest
    /// block among the folded events, or stays as it was when none were found.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Schema`] if an event spec does not resolve and
    /// [`SyncError::Source`] if any query fails. No partial state is returned.
    pub async fn catch_up(
        &self,
        checkpoint: Checkpoint<F::State>,
    ) -> Result<Checkpoint<F::State>, SyncError> {
        let filters = self.resolve_filters()?;
        self.catch_up_with(&filters, checkpoint).await
    }

    async fn catch_up_with(
        &self,
        filters: &[LogFilter],
        checkpoint: Checkpoint<F::State>,
    ) -> Result<Checkpoint<F::State>, SyncError> {
        let scope = self.fold.scope_name();
        let from_block = checkpoint.next_block();
        let head = self.source.head_block().await?;

        let mut events = Vec::new();
        if from_block <= head {
            for filter in filters {
                let logs = self.source.query_logs(filter, from_block, head).await?;
                tracing::debug!(
                    scope = %scope,
                    event = %filter.event,
                    from_block,
                    to_block = head,
                    logs = logs.len(),
                    "queried historical logs"
                );
                events.extend(logs.iter().filter_map(|log| self.normalizer.decode(log)));
            }
        } else {
            tracing::debug!(scope = %scope, from_block, head, "checkpoint ahead of chain head");
        }

        let events = order_for_replay(events);
        let Checkpoint {
            last_processed_block,
            state,
        } = checkpoint;
        let mut next = Checkpoint {
            last_processed_block,
            state: fold_initial(self.fold.as_ref(), state, &events),
        };
        if let Some(last) = events.last() {
            next.advance_to(last.block_number());
        }

        tracing::info!(
            scope = %scope,
            from_block,
            to_block = head,
            events = events.len(),
            last_processed_block = ?next.last_processed_block,
            "historical catch-up complete"
        );
        Ok(next)
    }

    /// Start synchronizing from `checkpoint` in a background task.
    ///
    /// `push_state` receives the caught-up checkpoint once, then one
    /// checkpoint per live event. It is called from the background task and
    /// must not block.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Returns
    ///
    /// An [`EffectHandle`] for the run. Dropping every clone of the handle
    /// stops the live phase, like [`cancel`](EffectHandle::cancel).
    pub fn start<P>(self, checkpoint: Checkpoint<F::State>, push_state: P) -> EffectHandle
    where
        P: Fn(Checkpoint<F::State>) + Send + Sync + 'static,
    {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(SyncStatus::CatchingUp);
        let live = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_effect(
            self,
            checkpoint,
            push_state,
            status_tx,
            live.clone(),
            cancel_rx,
        ));

        EffectHandle {
            cancel_tx,
            status: status_rx,
            live,
            task: Arc::new(tokio::sync::Mutex::new(Some(task))),
        }
    }

    fn persist(&self, checkpoint: &Checkpoint<F::State>) {
        let Some(dir) = &self.config.checkpoint_dir else {
            return;
        };
        let scope = self.fold.scope_name();
        match save_checkpoint(dir, &scope, checkpoint) {
            Ok(()) => tracing::debug!(
                scope = %scope,
                last_processed_block = ?checkpoint.last_processed_block,
                "checkpoint saved"
            ),
            Err(e) => tracing::error!(scope = %scope, error = %e, "failed to save checkpoint"),
        }
    }
}

/// Handle for controlling a running events effect.
///
/// `Clone` is cheap: all fields are shared.
#[derive(Clone)]
pub struct EffectHandle {
    /// Sends `true` to cancel the run.
    cancel_tx: watch::Sender<bool>,
    /// Catch-up progress published by the task.
    status: watch::Receiver<SyncStatus>,
    /// Set while live subscriptions are open.
    live: Arc<AtomicBool>,
    /// The spawned task. Wrapped in `Option` so it is awaited exactly once
    /// by [`shutdown`](EffectHandle::shutdown).
    task: Arc<tokio::sync::Mutex<Option<tokio::task::JoinHandle<Result<(), SyncError>>>>>,
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("cancelled", &self.is_cancelled())
            .field("live", &self.is_live())
            .finish()
    }
}

impl EffectHandle {
    /// Request cancellation.
    ///
    /// If catch-up is still running it completes and still delivers its
    /// checkpoint, but no live subscription is opened afterwards. If the
    /// live phase is running, every subscription is unsubscribed. Safe to
    /// call any number of times, before or after catch-up.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    /// Whether [`cancel`](EffectHandle::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Whether live subscriptions are currently open.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Whether the background task has stopped, or is being shut down.
    ///
    /// A run ends after a failed catch-up, after cancellation, or when
    /// every live subscription closes.
    pub fn is_finished(&self) -> bool {
        match self.task.try_lock() {
            Ok(task) => task.as_ref().is_none_or(|join_handle| join_handle.is_finished()),
            // Held only by `shutdown`.
            Err(_) => true,
        }
    }

    /// Current catch-up progress, without waiting.
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Wait until catch-up has delivered its checkpoint or failed.
    pub async fn synced(&self) -> SyncStatus {
        let mut status = self.status.clone();
        match status
            .wait_for(|s| !matches!(s, SyncStatus::CatchingUp))
            .await
        {
            Ok(current) => (*current).clone(),
            Err(_) => SyncStatus::Failed("sync task ended before catching up".to_string()),
        }
    }

    /// Cancel the run and wait for the background task to finish.
    ///
    /// Calling `shutdown` more than once, or from several clones, is safe:
    /// only the first call reports the task's outcome, the others return
    /// `Ok(())` once the task has stopped.
    ///
    /// # Errors
    ///
    /// Returns the error that ended catch-up, if any, or
    /// [`SyncError::TaskFailed`] if the task panicked.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.cancel();
        // Held across the join so concurrent callers return only once the
        // task has stopped.
        let mut task = self.task.lock().await;
        match task.take() {
            Some(join_handle) => join_handle
                .await
                .map_err(|e| SyncError::TaskFailed(e.to_string()))?,
            None => Ok(()),
        }
    }
}

/// Remembers applied live positions over a sliding window of blocks.
struct DedupWindow {
    window: u64,
    seen: BTreeSet<LogPosition>,
}

impl DedupWindow {
    fn new(window: u64) -> Self {
        Self {
            window,
            seen: BTreeSet::new(),
        }
    }

    /// Record `position`; `false` if it was already applied.
    fn first_sighting(&mut self, position: LogPosition) -> bool {
        if !self.seen.insert(position) {
            return false;
        }
        let newest = self.seen.last().map_or(0, |p| p.block_number);
        let floor = LogPosition::new(newest.saturating_sub(self.window), 0, 0);
        self.seen = self.seen.split_off(&floor);
        true
    }
}

async fn unsubscribe_all(handles: Vec<UnsubscribeHandle>) {
    for handle in handles {
        handle.run().await;
    }
}

/// Body of the background task spawned by [`EventsEffect::start`].
async fn run_effect<F, P>(
    effect: EventsEffect<F>,
    checkpoint: Checkpoint<F::State>,
    push_state: P,
    status_tx: watch::Sender<SyncStatus>,
    live: Arc<AtomicBool>,
    mut cancel_rx: watch::Receiver<bool>,
) -> Result<(), SyncError>
where
    F: ProjectionFold,
    P: Fn(Checkpoint<F::State>) + Send + Sync + 'static,
{
    let scope = effect.fold.scope_name();
    tracing::info!(
        scope = %scope,
        from_block = checkpoint.next_block(),
        "starting events effect"
    );

    // Phase 1: historical catch-up.
    let caught_up = match effect.resolve_filters() {
        Ok(filters) => effect
            .catch_up_with(&filters, checkpoint)
            .await
            .map(|checkpoint| (filters, checkpoint)),
        Err(e) => Err(e),
    };
    let (filters, mut checkpoint) = match caught_up {
        Ok(done) => done,
        Err(e) => {
            tracing::error!(scope = %scope, error = %e, "historical catch-up failed");
            status_tx.send_replace(SyncStatus::Failed(e.to_string()));
            return Err(e);
        }
    };
    push_state(checkpoint.clone());
    effect.persist(&checkpoint);
    status_tx.send_replace(SyncStatus::Synced);

    if *cancel_rx.borrow() {
        tracing::info!(scope = %scope, "cancelled during catch-up, live phase not started");
        return Ok(());
    }

    // Phase 2: live tail.
    let from_block = checkpoint.next_block();
    let mut streams = StreamMap::new();
    let mut unsubscribes = Vec::with_capacity(filters.len());
    for (slot, filter) in filters.iter().enumerate() {
        match effect.source.subscribe(filter, from_block).await {
            Ok(subscription) => {
                let (stream, unsubscribe) = subscription.into_parts();
                streams.insert(slot, stream);
                unsubscribes.push(unsubscribe);
            }
            Err(e) => {
                tracing::error!(
                    scope = %scope,
                    event = %filter.event,
                    error = %e,
                    "live subscription failed"
                );
                unsubscribe_all(unsubscribes).await;
                return Err(e.into());
            }
        }
    }

    if *cancel_rx.borrow() {
        unsubscribe_all(unsubscribes).await;
        tracing::info!(scope = %scope, "cancelled while subscribing");
        return Ok(());
    }

    live.store(true, Ordering::Release);
    tracing::info!(
        scope = %scope,
        from_block,
        subscriptions = unsubscribes.len(),
        "live phase started"
    );

    let persist_enabled = effect.config.checkpoint_dir.is_some();
    let mut flush = tokio::time::interval(effect.config.checkpoint_interval);
    // The first tick completes immediately; consume it.
    flush.tick().await;
    let mut dirty = false;
    let mut dedup = DedupWindow::new(effect.config.dedup_window_blocks);

    loop {
        tokio::select! {
            biased;

            // An error means every handle was dropped.
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }
            _ = flush.tick(), if persist_enabled => {
                if dirty {
                    effect.persist(&checkpoint);
                    dirty = false;
                }
            }
            next = streams.next() => {
                let Some((_, log)) = next else {
                    tracing::warn!(scope = %scope, "all live subscriptions ended");
                    break;
                };
                // A log can be ready in the same poll as the cancellation.
                if *cancel_rx.borrow() {
                    break;
                }
                let Some(event) = effect.normalizer.decode(&log) else {
                    continue;
                };
                if !dedup.first_sighting(event.position) {
                    tracing::trace!(
                        scope = %scope,
                        position = ?event.position,
                        "dropping duplicate live log"
                    );
                    continue;
                }
                tracing::debug!(
                    scope = %scope,
                    event = %event.name,
                    block_number = event.block_number(),
                    "applying live event"
                );
                checkpoint.state = effect.fold.apply(&checkpoint.state, &event);
                checkpoint.advance_to(event.block_number());
                push_state(checkpoint.clone());
                dirty = true;
            }
        }
    }

    live.store(false, Ordering::Release);
    drop(streams);
    unsubscribe_all(unsubscribes).await;
    if dirty {
        effect.persist(&checkpoint);
    }
    tracing::info!(
        scope = %scope,
        last_processed_block = ?checkpoint.last_processed_block,
        "events effect stopped"
    );
    Ok(())
}
