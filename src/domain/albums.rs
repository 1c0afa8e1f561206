//! Albums projection over the worlds management contract.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

use crate::domain::relevance::{Keyed, RelevanceIndex};
use crate::error::SchemaError;
use crate::event::{Event, EventSchema, EventSpec};
use crate::projection::ProjectionFold;

/// An album type was defined inside a world.
pub const ALBUM_DEFINED: &str = "event AlbumDefined(uint256 indexed id, uint256 indexed worldId)";

/// An album type was released and can be minted.
pub const ALBUM_RELEASED: &str =
    "event AlbumReleased(uint256 indexed worldId, uint256 indexed albumId)";

/// Schema of the worlds management contract events used here.
pub fn schema() -> Result<EventSchema, SchemaError> {
    EventSchema::from_signatures([ALBUM_DEFINED, ALBUM_RELEASED])
}

/// One album in the relevance list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumEntry {
    /// Album type id.
    pub album_id: U256,
    /// World the album belongs to.
    pub world_id: U256,
    /// Set once the album is released; never cleared.
    pub released: bool,
}

impl Keyed for AlbumEntry {
    fn key(&self) -> U256 {
        self.album_id
    }
}

/// Projected albums, in first-sighting order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlbumsState {
    /// Registered albums.
    pub albums: RelevanceIndex<AlbumEntry>,
}

impl AlbumsState {
    /// Released albums, in relevance order.
    pub fn released(&self) -> impl Iterator<Item = &AlbumEntry> {
        self.albums.iter().filter(|album| album.released)
    }
}

/// Fold for the albums projection, optionally scoped to one world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlbumsFold {
    world_id: Option<U256>,
}

impl AlbumsFold {
    /// Track albums of every world.
    pub fn all() -> Self {
        Self { world_id: None }
    }

    /// Track albums of one world.
    pub fn in_world(world_id: U256) -> Self {
        Self {
            world_id: Some(world_id),
        }
    }

    /// The selected world, if any.
    pub fn world_id(&self) -> Option<U256> {
        self.world_id
    }
}

impl ProjectionFold for AlbumsFold {
    type State = AlbumsState;

    fn scope_name(&self) -> String {
        match self.world_id {
            Some(world_id) => format!("albums-world-{world_id}"),
            None => "albums".to_string(),
        }
    }

    fn event_specs(&self) -> Vec<EventSpec> {
        let mut defined = EventSpec::new("AlbumDefined");
        let mut released = EventSpec::new("AlbumReleased");
        if let Some(world_id) = self.world_id {
            defined = defined.with_filter("worldId", world_id);
            released = released.with_filter("worldId", world_id);
        }
        vec![defined, released]
    }

    fn apply_mut(&self, state: &mut AlbumsState, event: &Event) {
        match event.name.as_str() {
            "AlbumDefined" => {
                let (Some(album_id), Some(world_id)) = (event.uint("id"), event.uint("worldId"))
                else {
                    return;
                };
                state.albums.get_or_insert_with(album_id, || AlbumEntry {
                    album_id,
                    world_id,
                    released: false,
                });
            }
            "AlbumReleased" => {
                let (Some(album_id), Some(world_id)) =
                    (event.uint("albumId"), event.uint("worldId"))
                else {
                    return;
                };
                let album = state.albums.get_or_insert_with(album_id, || AlbumEntry {
                    album_id,
                    world_id,
                    released: true,
                });
                album.world_id = world_id;
                album.released = true;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use alloy::dyn_abi::DynSolValue;
    use alloy::primitives::B256;

    use super::*;
    use crate::event::LogPosition;
    use crate::projection::{fold_incremental, fold_initial};

    fn uint(value: u64) -> DynSolValue {
        DynSolValue::Uint(U256::from(value), 256)
    }

    fn defined(album: u64, world: u64, block: u64) -> Event {
        Event {
            name: "AlbumDefined".into(),
            fields: BTreeMap::from([
                ("id".to_string(), uint(album)),
                ("worldId".to_string(), uint(world)),
            ]),
            position: LogPosition::new(block, 0, 0),
        }
    }

    fn released(album: u64, world: u64, block: u64) -> Event {
        Event {
            name: "AlbumReleased".into(),
            fields: BTreeMap::from([
                ("albumId".to_string(), uint(album)),
                ("worldId".to_string(), uint(world)),
            ]),
            position: LogPosition::new(block, 0, 1),
        }
    }

    #[test]
    fn define_then_release() {
        let events = [defined(10, 1, 1), defined(11, 1, 2), released(10, 1, 3)];
        let state = fold_initial(&AlbumsFold::all(), AlbumsState::default(), &events);

        assert_eq!(state.albums.len(), 2);
        let released: Vec<_> = state.released().map(|a| a.album_id).collect();
        assert_eq!(released, vec![U256::from(10)]);
        assert!(!state.albums.get(&U256::from(11)).expect("album 11").released);
    }

    #[test]
    fn release_without_definition_creates_entry() {
        let state = fold_initial(
            &AlbumsFold::all(),
            AlbumsState::default(),
            &[released(12, 4, 1)],
        );
        let album = state.albums.get(&U256::from(12)).expect("album 12");
        assert_eq!(album.world_id, U256::from(4));
        assert!(album.released);
    }

    #[test]
    fn released_flag_is_never_cleared() {
        let events = [released(10, 1, 1), defined(10, 1, 2)];
        let state = fold_initial(&AlbumsFold::all(), AlbumsState::default(), &events);
        assert!(state.albums.entries()[0].released);
    }

    #[test]
    fn conventions_agree() {
        let fold = AlbumsFold::in_world(U256::from(1));
        let events = [defined(10, 1, 1), released(10, 1, 2), defined(11, 1, 3)];
        assert_eq!(
            fold_initial(&fold, AlbumsState::default(), &events),
            fold_incremental(&fold, &AlbumsState::default(), &events)
        );
    }

    #[test]
    fn world_scope_filters_both_events() {
        let schema = schema().expect("schema parses");
        let world = U256::from(3);
        let filters: Vec<_> = AlbumsFold::in_world(world)
            .event_specs()
            .iter()
            .map(|spec| schema.resolve(spec).expect("resolves"))
            .collect();

        // worldId is the second indexed input of AlbumDefined, the first of AlbumReleased.
        let word = B256::from(world.to_be_bytes::<32>());
        assert_eq!(filters[0].topics, [None, Some(word), None]);
        assert_eq!(filters[1].topics, [Some(word), None, None]);
        assert_eq!(AlbumsFold::in_world(world).scope_name(), "albums-world-3");
    }
}
