//! Deterministic replay ordering for historical catch-up.

use crate::event::Event;

/// Sort a batch of historical events into replay order.
///
/// Events from several per-spec queries are concatenated by the caller;
/// this puts them in ascending `(block, transaction, log)` order, i.e. the
/// order the chain produced them. Two specs can match the same log (for
/// example a mint to the watched account matches both a "from zero" and a
/// "to account" filter), so entries sharing a position are collapsed to
/// the first one.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use stickem_sync::{Event, LogPosition, order_for_replay};
///
/// let at = |b, t, l| Event {
///     name: "Transfer".into(),
///     fields: BTreeMap::new(),
///     position: LogPosition::new(b, t, l),
/// };
/// let ordered = order_for_replay(vec![at(11, 0, 0), at(10, 0, 1), at(10, 0, 0)]);
/// let blocks: Vec<_> = ordered.iter().map(|e| e.position).collect();
/// assert_eq!(
///     blocks,
///     vec![LogPosition::new(10, 0, 0), LogPosition::new(10, 0, 1), LogPosition::new(11, 0, 0)]
/// );
/// ```
pub fn order_for_replay(mut events: Vec<Event>) -> Vec<Event> {
    // Stable, so the first query's copy of a duplicate wins.
    events.sort_by_key(|event| event.position);
    let before = events.len();
    events.dedup_by_key(|event| event.position);
    let duplicates = before - events.len();
    if duplicates > 0 {
        tracing::debug!(duplicates, "collapsed logs matched by overlapping specs");
    }
    events
}
