//! Worlds projection over the worlds contract (an ERC-721).
//!
//! Without a watched account every minted world is registered. With one,
//! only worlds the account received, sent, or was granted edition rights
//! on are registered, carrying `owned` and `allowed` flags.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::domain::relevance::{Keyed, RelevanceIndex};
use crate::error::SchemaError;
use crate::event::{Event, EventSchema, EventSpec};
use crate::projection::ProjectionFold;

/// ERC-721 transfer; a transfer from the zero address is a mint.
pub const TRANSFER: &str =
    "event Transfer(address indexed from, address indexed to, uint256 indexed tokenId)";

/// Edition rights of `who` on a world were granted or revoked.
pub const WORLD_EDITION_ALLOWANCE_CHANGED: &str =
    "event WorldEditionAllowanceChanged(uint256 indexed worldId, address indexed who, bool allowed)";

/// Schema of the worlds contract events used here.
pub fn schema() -> Result<EventSchema, SchemaError> {
    EventSchema::from_signatures([TRANSFER, WORLD_EDITION_ALLOWANCE_CHANGED])
}

/// One world in the relevance list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldEntry {
    /// Token id of the world.
    pub world_id: U256,
    /// Whether the watched account currently owns the world; `None` until
    /// a transfer involving it is seen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owned: Option<bool>,
    /// Whether the watched account may edit the world; `None` until an
    /// allowance change for it is seen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<bool>,
}

impl WorldEntry {
    fn new(world_id: U256) -> Self {
        Self {
            world_id,
            owned: None,
            allowed: None,
        }
    }
}

impl Keyed for WorldEntry {
    fn key(&self) -> U256 {
        self.world_id
    }
}

/// Projected worlds, in first-sighting order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldsState {
    /// Registered worlds.
    pub worlds: RelevanceIndex<WorldEntry>,
}

/// Fold for the worlds projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldsFold {
    account: Option<Address>,
}

impl WorldsFold {
    /// Track every minted world.
    pub fn minted() -> Self {
        Self { account: None }
    }

    /// Track the worlds related to `account`.
    pub fn watching(account: Address) -> Self {
        Self {
            account: Some(account),
        }
    }

    /// The watched account, if any.
    pub fn account(&self) -> Option<Address> {
        self.account
    }
}

impl ProjectionFold for WorldsFold {
    type State = WorldsState;

    fn scope_name(&self) -> String {
        match self.account {
            Some(account) => format!("worlds-{account}"),
            None => "worlds".to_string(),
        }
    }

    fn event_specs(&self) -> Vec<EventSpec> {
        match self.account {
            // Account-related transfers are picked in `apply_mut`.
            Some(_) => vec![
                EventSpec::new("Transfer"),
                EventSpec::new("WorldEditionAllowanceChanged"),
            ],
            None => vec![EventSpec::new("Transfer").with_filter("from", Address::ZERO)],
        }
    }

    fn apply_mut(&self, state: &mut WorldsState, event: &Event) {
        match event.name.as_str() {
            "Transfer" => {
                let (Some(from), Some(to), Some(world_id)) = (
                    event.address("from"),
                    event.address("to"),
                    event.uint("tokenId"),
                ) else {
                    return;
                };
                match self.account {
                    None => {
                        if from == Address::ZERO {
                            state
                                .worlds
                                .get_or_insert_with(world_id, || WorldEntry::new(world_id));
                        }
                    }
                    Some(account) => {
                        if from == account {
                            state
                                .worlds
                                .get_or_insert_with(world_id, || WorldEntry::new(world_id))
                                .owned = Some(false);
                        }
                        if to == account {
                            state
                                .worlds
                                .get_or_insert_with(world_id, || WorldEntry::new(world_id))
                                .owned = Some(true);
                        }
                    }
                }
            }
            "WorldEditionAllowanceChanged" => {
                let Some(account) = self.account else {
                    return;
                };
                let (Some(world_id), Some(who), Some(allowed)) = (
                    event.uint("worldId"),
                    event.address("who"),
                    event.boolean("allowed"),
                ) else {
                    return;
                };
                if who == account {
                    state
                        .worlds
                        .get_or_insert_with(world_id, || WorldEntry::new(world_id))
                        .allowed = Some(allowed);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use alloy::dyn_abi::DynSolValue;
    use alloy::primitives::address;

    use super::*;
    use crate::event::LogPosition;
    use crate::projection::{fold_incremental, fold_initial};

    const ALICE: Address = address!("0x00000000000000000000000000000000000000a1");
    const BOB: Address = address!("0x00000000000000000000000000000000000000b0");

    fn transfer(from: Address, to: Address, world: u64, block: u64) -> Event {
        Event {
            name: "Transfer".into(),
            fields: BTreeMap::from([
                ("from".to_string(), DynSolValue::Address(from)),
                ("to".to_string(), DynSolValue::Address(to)),
                (
                    "tokenId".to_string(),
                    DynSolValue::Uint(U256::from(world), 256),
                ),
            ]),
            position: LogPosition::new(block, 0, 0),
        }
    }

    fn allowance(world: u64, who: Address, allowed: bool, block: u64) -> Event {
        Event {
            name: "WorldEditionAllowanceChanged".into(),
            fields: BTreeMap::from([
                (
                    "worldId".to_string(),
                    DynSolValue::Uint(U256::from(world), 256),
                ),
                ("who".to_string(), DynSolValue::Address(who)),
                ("allowed".to_string(), DynSolValue::Bool(allowed)),
            ]),
            position: LogPosition::new(block, 0, 0),
        }
    }

    fn ids(state: &WorldsState) -> Vec<U256> {
        state.worlds.iter().map(|w| w.world_id).collect()
    }

    #[test]
    fn minted_fold_registers_mints_only() {
        let events = [
            transfer(Address::ZERO, ALICE, 5, 1),
            transfer(ALICE, BOB, 5, 2),
            transfer(BOB, ALICE, 6, 3),
            transfer(Address::ZERO, BOB, 2, 4),
        ];
        let state = fold_initial(&WorldsFold::minted(), WorldsState::default(), &events);
        assert_eq!(ids(&state), vec![U256::from(5), U256::from(2)]);
        assert_eq!(state.worlds.entries()[0].owned, None);
    }

    #[test]
    fn watched_fold_tracks_ownership_and_allowance() {
        let fold = WorldsFold::watching(ALICE);
        let events = [
            transfer(Address::ZERO, ALICE, 5, 1),
            transfer(Address::ZERO, BOB, 6, 2),
            allowance(6, ALICE, true, 3),
            transfer(ALICE, BOB, 5, 4),
            allowance(7, BOB, true, 5),
        ];
        let state = fold_initial(&fold, WorldsState::default(), &events);

        assert_eq!(ids(&state), vec![U256::from(5), U256::from(6)]);
        let five = state.worlds.get(&U256::from(5)).expect("world 5");
        assert_eq!(five.owned, Some(false));
        assert_eq!(five.allowed, None);
        let six = state.worlds.get(&U256::from(6)).expect("world 6");
        assert_eq!(six.allowed, Some(true));
    }

    #[test]
    fn flags_flip_but_entries_stay() {
        let fold = WorldsFold::watching(ALICE);
        let events = [
            transfer(Address::ZERO, ALICE, 5, 1),
            transfer(ALICE, BOB, 5, 2),
            allowance(5, ALICE, true, 3),
            allowance(5, ALICE, false, 4),
            transfer(BOB, ALICE, 5, 5),
        ];
        let state = fold_initial(&fold, WorldsState::default(), &events);
        assert_eq!(state.worlds.len(), 1);
        let five = &state.worlds.entries()[0];
        assert_eq!(five.owned, Some(true));
        assert_eq!(five.allowed, Some(false));
    }

    #[test]
    fn conventions_agree() {
        let fold = WorldsFold::watching(ALICE);
        let events = [
            transfer(Address::ZERO, ALICE, 5, 1),
            allowance(9, ALICE, true, 2),
            transfer(ALICE, BOB, 5, 3),
        ];
        assert_eq!(
            fold_initial(&fold, WorldsState::default(), &events),
            fold_incremental(&fold, &WorldsState::default(), &events)
        );
    }

    #[test]
    fn unrelated_or_malformed_events_pass_through() {
        let fold = WorldsFold::watching(ALICE);
        let mut malformed = transfer(Address::ZERO, ALICE, 5, 1);
        malformed.fields.remove("tokenId");
        let other = Event {
            name: "Approval".into(),
            fields: BTreeMap::new(),
            position: LogPosition::new(1, 0, 1),
        };
        let state = fold_initial(&fold, WorldsState::default(), &[malformed, other]);
        assert!(state.worlds.is_empty());
    }

    #[test]
    fn specs_resolve_against_schema() {
        let schema = schema().expect("schema parses");
        for fold in [WorldsFold::minted(), WorldsFold::watching(ALICE)] {
            for spec in fold.event_specs() {
                schema.resolve(&spec).expect("spec resolves");
            }
        }
    }

    #[test]
    fn scope_names_differ_per_account() {
        assert_eq!(WorldsFold::minted().scope_name(), "worlds");
        assert_ne!(
            WorldsFold::watching(ALICE).scope_name(),
            WorldsFold::watching(BOB).scope_name()
        );
    }
}
