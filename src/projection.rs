//! Projection folds and the checkpoint threaded between sync phases.
//!
//! A projection is derived state computed by folding a stream of decoded
//! [`Event`]s. Each projection kind implements [`ProjectionFold`], which
//! also declares the event specs the projection needs (its scope).

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventSpec};

/// A reducer over decoded events, specialized per projection kind.
///
/// The fold value itself carries the scope parameters (watched account,
/// selected world, ...) while [`State`](ProjectionFold::State) is the
/// projected data.
///
/// # Contract
///
/// - [`apply_mut`](ProjectionFold::apply_mut) must be deterministic and
///   must leave the state untouched for event names it does not handle.
/// - [`apply`](ProjectionFold::apply) must never mutate its input and must
///   yield the same state as cloning then calling `apply_mut`. The default
///   implementation does exactly that; states built from `Arc`-wrapped
///   collections make the clone cheap and copy only what the event touches.
pub trait ProjectionFold: Send + Sync + 'static {
    /// The projected state.
    type State: Clone
        + Default
        + PartialEq
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// Human-readable scope name, used in logs and as the checkpoint
    /// directory name. Different scopes of the same kind must differ.
    fn scope_name(&self) -> String;

    /// The event names and filters this projection is built from.
    fn event_specs(&self) -> Vec<EventSpec>;

    /// Apply one event in place.
    ///
    /// Used for bulk historical ingestion, before any reader has seen the
    /// state.
    fn apply_mut(&self, state: &mut Self::State, event: &Event);

    /// Apply one event, returning a new state and leaving `state` as is.
    ///
    /// Used once a state has been published, since the published value may
    /// still be read while the next event is folded.
    fn apply(&self, state: &Self::State, event: &Event) -> Self::State {
        let mut next = state.clone();
        self.apply_mut(&mut next, event);
        next
    }
}

/// Fold a batch of events in place, in the order given.
pub fn fold_initial<F: ProjectionFold>(
    fold: &F,
    mut state: F::State,
    events: &[Event],
) -> F::State {
    for event in events {
        fold.apply_mut(&mut state, event);
    }
    state
}

/// Fold a batch of events without mutating `state`, in the order given.
pub fn fold_incremental<F: ProjectionFold>(
    fold: &F,
    state: &F::State,
    events: &[Event],
) -> F::State {
    events
        .iter()
        .fold(state.clone(), |current, event| fold.apply(&current, event))
}

/// The resumable `{last processed block, projected state}` pair.
///
/// `last_processed_block == None` means nothing has been processed yet and
/// the next sync starts from genesis.
///
/// Serialized to JSON as `{ "last_processed_block": <N|null>, "state": <S> }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint<S> {
    /// Highest block whose events have been folded into `state`.
    ///
    /// Catch-up and the live phase both store the block itself, never
    /// `block + 1`; [`next_block`](Checkpoint::next_block) adds the one.
    pub last_processed_block: Option<u64>,
    /// The projected state.
    pub state: S,
}

impl<S: Default> Default for Checkpoint<S> {
    fn default() -> Self {
        Self::genesis()
    }
}

impl<S: Default> Checkpoint<S> {
    /// An empty checkpoint: default state, nothing processed.
    pub fn genesis() -> Self {
        Self {
            last_processed_block: None,
            state: S::default(),
        }
    }
}

impl<S> Checkpoint<S> {
    /// First block that still needs to be read: one past the last
    /// processed block, or `0` from genesis.
    ///
    /// # Examples
    ///
    /// ```
    /// use stickem_sync::Checkpoint;
    ///
    /// let fresh = Checkpoint::<()>::genesis();
    /// assert_eq!(fresh.next_block(), 0);
    ///
    /// let resumed = Checkpoint { last_processed_block: Some(9), state: () };
    /// assert_eq!(resumed.next_block(), 10);
    /// ```
    pub fn next_block(&self) -> u64 {
        self.last_processed_block.map_or(0, |block| block + 1)
    }

    /// Move the last processed block forward to `block`.
    ///
    /// Never moves backwards: a lower value leaves the checkpoint as is.
    pub fn advance_to(&mut self, block: u64) {
        self.last_processed_block = Some(match self.last_processed_block {
            Some(current) => current.max(block),
            None => block,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::event::LogPosition;

    /// Counts events per name; ignores nothing.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct NameCounter {
        counts: BTreeMap<String, u64>,
    }

    struct CountingFold;

    impl ProjectionFold for CountingFold {
        type State = NameCounter;

        fn scope_name(&self) -> String {
            "name-counter".to_string()
        }

        fn event_specs(&self) -> Vec<EventSpec> {
            vec![EventSpec::new("Ping")]
        }

        fn apply_mut(&self, state: &mut NameCounter, event: &Event) {
            *state.counts.entry(event.name.clone()).or_default() += 1;
        }
    }

    fn event(name: &str, block: u64) -> Event {
        Event {
            name: name.to_string(),
            fields: BTreeMap::new(),
            position: LogPosition::new(block, 0, 0),
        }
    }

    #[test]
    fn apply_leaves_input_untouched() {
        let before = NameCounter::default();
        let after = CountingFold.apply(&before, &event("Ping", 1));
        assert!(before.counts.is_empty());
        assert_eq!(after.counts["Ping"], 1);
    }

    #[test]
    fn both_conventions_agree() {
        let events = vec![event("Ping", 1), event("Pong", 2), event("Ping", 3)];
        let mutated = fold_initial(&CountingFold, NameCounter::default(), &events);
        let immutable = fold_incremental(&CountingFold, &NameCounter::default(), &events);
        assert_eq!(mutated, immutable);
    }

    #[test]
    fn genesis_checkpoint_starts_at_block_zero() {
        let checkpoint = Checkpoint::<NameCounter>::default();
        assert_eq!(checkpoint.last_processed_block, None);
        assert_eq!(checkpoint.next_block(), 0);
    }

    #[test]
    fn advance_to_never_moves_backwards() {
        let mut checkpoint = Checkpoint::<NameCounter>::genesis();
        checkpoint.advance_to(12);
        checkpoint.advance_to(7);
        assert_eq!(checkpoint.last_processed_block, Some(12));
        assert_eq!(checkpoint.next_block(), 13);
    }

    #[test]
    fn checkpoint_serializes_block_and_state() {
        let checkpoint = Checkpoint {
            last_processed_block: Some(42),
            state: NameCounter::default(),
        };
        let json = serde_json::to_value(&checkpoint).expect("serialization should succeed");
        assert_eq!(json["last_processed_block"], 42);
        assert!(json["state"]["counts"].as_object().is_some());
    }
}
