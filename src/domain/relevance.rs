//! Append-only "indices + relevance list" collection shared by the domain
//! projections.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::U256;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// An entry identified by a 256-bit id.
pub trait Keyed {
    /// The id the entry is indexed by.
    fn key(&self) -> U256;
}

/// Entries in first-sighting order plus an id-to-position index.
///
/// Entries are never removed. Both collections sit behind [`Arc`], so
/// cloning the index is cheap and a mutation after a clone copies only the
/// touched collection.
///
/// Serialized as the plain list of entries; the index is rebuilt on load.
#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceIndex<E> {
    indices: Arc<HashMap<U256, usize>>,
    entries: Arc<Vec<E>>,
}

impl<E> Default for RelevanceIndex<E> {
    fn default() -> Self {
        Self {
            indices: Arc::new(HashMap::new()),
            entries: Arc::new(Vec::new()),
        }
    }
}

impl<E: Keyed + Clone> RelevanceIndex<E> {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from entries in relevance order. Later entries with
    /// an already seen id are discarded.
    pub fn from_entries(entries: impl IntoIterator<Item = E>) -> Self {
        let mut index = Self::new();
        for entry in entries {
            let key = entry.key();
            if !index.contains(&key) {
                index.push(key, entry);
            }
        }
        index
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry has been registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an entry with this id exists.
    pub fn contains(&self, id: &U256) -> bool {
        self.indices.contains_key(id)
    }

    /// Position of the entry in the relevance list.
    pub fn position(&self, id: &U256) -> Option<usize> {
        self.indices.get(id).copied()
    }

    /// Look up an entry by id.
    pub fn get(&self, id: &U256) -> Option<&E> {
        self.position(id).map(|i| &self.entries[i])
    }

    /// Entries in relevance (first-sighting) order.
    pub fn entries(&self) -> &[E] {
        &self.entries
    }

    /// Iterate entries in relevance order.
    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.entries.iter()
    }

    /// Get the entry for `id`, appending `make()` first if it is new.
    pub fn get_or_insert_with(&mut self, id: U256, make: impl FnOnce() -> E) -> &mut E {
        let position = match self.position(&id) {
            Some(position) => position,
            None => self.push(id, make()),
        };
        &mut Arc::make_mut(&mut self.entries)[position]
    }

    fn push(&mut self, id: U256, entry: E) -> usize {
        let position = self.entries.len();
        Arc::make_mut(&mut self.indices).insert(id, position);
        Arc::make_mut(&mut self.entries).push(entry);
        position
    }
}

impl<'a, E> IntoIterator for &'a RelevanceIndex<E> {
    type Item = &'a E;
    type IntoIter = std::slice::Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<E: Serialize> Serialize for RelevanceIndex<E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter())
    }
}

impl<'de, E> Deserialize<'de> for RelevanceIndex<E>
where
    E: Deserialize<'de> + Keyed + Clone,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<E>::deserialize(deserializer).map(Self::from_entries)
    }
}
