//! Scope-change handling for one projection kind.
//!
//! An [`EffectSlot`] owns the published checkpoint of one projection kind
//! (the worlds list, the albums of the selected world, ...) and at most one
//! running [`EventsEffect`]. Selecting a new scope cancels the running
//! effect, resets the published checkpoint and starts over for the new
//! scope. Nothing is carried over between scopes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use crate::effect::{EffectConfig, EffectHandle, EventsEffect, SyncStatus};
use crate::event::EventNormalizer;
use crate::projection::{Checkpoint, ProjectionFold};
use crate::source::LogSource;

struct Active {
    scope: String,
    handle: EffectHandle,
}

/// Holds the published state of one projection kind across scope changes.
pub struct EffectSlot<F: ProjectionFold> {
    source: Arc<dyn LogSource>,
    normalizer: EventNormalizer,
    config: EffectConfig,
    /// Published checkpoint. Shared with the push callback of the running
    /// effect.
    state: Arc<watch::Sender<Checkpoint<F::State>>>,
    /// Bumped on every scope change; pushes from older runs are dropped.
    generation: Arc<AtomicU64>,
    active: tokio::sync::Mutex<Option<Active>>,
}

impl<F: ProjectionFold> std::fmt::Debug for EffectSlot<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectSlot")
            .field("generation", &self.generation.load(Ordering::Acquire))
            .finish()
    }
}

impl<F: ProjectionFold> EffectSlot<F> {
    /// Create an idle slot publishing a genesis checkpoint.
    pub fn new(source: Arc<dyn LogSource>, normalizer: EventNormalizer) -> Self {
        let (state, _) = watch::channel(Checkpoint::genesis());
        Self {
            source,
            normalizer,
            config: EffectConfig::default(),
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Replace the configuration used for every effect started here.
    pub fn with_config(mut self, config: EffectConfig) -> Self {
        self.config = config;
        self
    }

    /// Watch the published checkpoint.
    pub fn subscribe(&self) -> watch::Receiver<Checkpoint<F::State>> {
        self.state.subscribe()
    }

    /// The currently published checkpoint.
    pub fn current(&self) -> Checkpoint<F::State> {
        self.state.borrow().clone()
    }

    /// Switch to the scope described by `fold`.
    ///
    /// Selecting the scope that is already running returns its handle. A
    /// run that failed or ended is replaced, so selecting its scope again
    /// retries from scratch. Otherwise the running effect is cancelled, the published checkpoint
    /// is reset and a new effect starts from the scope's resume checkpoint
    /// (genesis unless durable checkpoints are configured).
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn select(&self, fold: F) -> EffectHandle {
        let scope = fold.scope_name();
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref()
            && current.scope == scope
            && is_running(&current.handle)
        {
            return current.handle.clone();
        }

        if let Some(previous) = active.take() {
            retire(previous);
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.state.send_replace(Checkpoint::genesis());

        let effect = EventsEffect::new(self.source.clone(), self.normalizer.clone(), fold)
            .with_config(self.config.clone());
        let checkpoint = effect.resume_checkpoint().unwrap_or_else(|e| {
            tracing::warn!(scope = %scope, error = %e, "cannot load checkpoint, starting from genesis");
            Checkpoint::genesis()
        });
        if checkpoint.last_processed_block.is_some() {
            self.state.send_replace(checkpoint.clone());
        }

        let state = self.state.clone();
        let current = self.generation.clone();
        let handle = effect.start(checkpoint, move |next| {
            // Checked under the channel lock, so a reset cannot interleave.
            state.send_if_modified(|published| {
                if current.load(Ordering::Acquire) != generation {
                    return false;
                }
                *published = next;
                true
            });
        });

        tracing::info!(scope = %scope, generation, "scope selected");
        *active = Some(Active {
            scope,
            handle: handle.clone(),
        });
        handle
    }

    /// Cancel the running effect, if any, and wait for it to stop.
    ///
    /// The published checkpoint keeps its last value.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the effect's catch-up, if any.
    pub async fn stop(&self) -> Result<(), crate::error::SyncError> {
        let previous = self.active.lock().await.take();
        match previous {
            Some(previous) => previous.handle.shutdown().await,
            None => Ok(()),
        }
    }
}

fn is_running(handle: &EffectHandle) -> bool {
    !handle.is_cancelled()
        && !matches!(handle.status(), SyncStatus::Failed(_))
        && !handle.is_finished()
}

/// Cancel a replaced effect and reap it in the background.
fn retire(previous: Active) {
    previous.handle.cancel();
    tokio::spawn(async move {
        if let Err(e) = previous.handle.shutdown().await {
            tracing::warn!(scope = %previous.scope, error = %e, "replaced effect ended with error");
        }
    });
}
