//! Assets projection over the economy contract (an ERC-1155).
//!
//! Tracks the running balance of every token the watched account sent or
//! received. Each token id is classified once, on first sighting, and filed
//! into the album, booster pack, or sticker index.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy::primitives::{Address, I256, U256};
use serde::{Deserialize, Serialize};

use crate::domain::relevance::{Keyed, RelevanceIndex};
use crate::domain::token_id::{TokenClass, classify};
use crate::error::SchemaError;
use crate::event::{Event, EventSchema, EventSpec};
use crate::projection::ProjectionFold;

/// ERC-1155 single transfer.
pub const TRANSFER_SINGLE: &str = "event TransferSingle(address indexed operator, address indexed from, address indexed to, uint256 id, uint256 value)";

/// ERC-1155 batch transfer.
pub const TRANSFER_BATCH: &str = "event TransferBatch(address indexed operator, address indexed from, address indexed to, uint256[] ids, uint256[] values)";

/// Schema of the economy contract events used here.
pub fn schema() -> Result<EventSchema, SchemaError> {
    EventSchema::from_signatures([TRANSFER_SINGLE, TRANSFER_BATCH])
}

/// Balance of one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    /// Token id.
    pub id: U256,
    /// Category decoded from the id.
    pub class: TokenClass,
    /// Net amount received minus amount sent.
    pub amount: I256,
}

impl Keyed for AssetEntry {
    fn key(&self) -> U256 {
        self.id
    }
}

/// Booster pack token ids by album type, then rule id.
pub type BoosterPacks = BTreeMap<U256, BTreeMap<u16, U256>>;

/// Sticker token ids by album type, then page, then slot.
pub type Stickers = BTreeMap<U256, BTreeMap<u16, BTreeMap<u8, U256>>>;

/// Projected assets of the watched account.
///
/// Only the balances are persisted; the classification indices are
/// rebuilt from them on load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "AssetsSnapshot", into = "AssetsSnapshot")]
pub struct AssetsState {
    /// Balances in first-sighting order.
    pub assets: RelevanceIndex<AssetEntry>,
    /// Album token ids.
    pub albums: Arc<Vec<U256>>,
    /// Booster pack token ids.
    pub booster_packs: Arc<BoosterPacks>,
    /// Sticker token ids.
    pub stickers: Arc<Stickers>,
}

impl AssetsState {
    /// Current balance of a token; zero if never seen.
    pub fn amount(&self, id: &U256) -> I256 {
        self.assets.get(id).map_or(I256::ZERO, |entry| entry.amount)
    }

    fn adjust(&mut self, id: U256, delta: I256) {
        let mut class = None;
        let entry = self.assets.get_or_insert_with(id, || {
            let decoded = classify(id);
            class = Some(decoded);
            AssetEntry {
                id,
                class: decoded,
                amount: I256::ZERO,
            }
        });
        entry.amount = entry.amount.saturating_add(delta);
        if let Some(class) = class {
            self.file(id, class);
        }
    }

    fn file(&mut self, id: U256, class: TokenClass) {
        match class {
            TokenClass::Album => Arc::make_mut(&mut self.albums).push(id),
            TokenClass::BoosterPack {
                album_type,
                rule_id,
            } => {
                Arc::make_mut(&mut self.booster_packs)
                    .entry(album_type)
                    .or_default()
                    .insert(rule_id, id);
            }
            TokenClass::Sticker {
                album_type,
                page,
                slot,
                ..
            } => {
                Arc::make_mut(&mut self.stickers)
                    .entry(album_type)
                    .or_default()
                    .entry(page)
                    .or_default()
                    .insert(slot, id);
            }
        }
    }
}

/// Persisted form of [`AssetsState`].
#[derive(Serialize, Deserialize)]
struct AssetsSnapshot {
    assets: RelevanceIndex<AssetEntry>,
}

impl From<AssetsSnapshot> for AssetsState {
    fn from(snapshot: AssetsSnapshot) -> Self {
        let mut state = AssetsState {
            assets: snapshot.assets,
            ..AssetsState::default()
        };
        let classes: Vec<_> = state.assets.iter().map(|e| (e.id, e.class)).collect();
        for (id, class) in classes {
            state.file(id, class);
        }
        state
    }
}

impl From<AssetsState> for AssetsSnapshot {
    fn from(state: AssetsState) -> Self {
        Self {
            assets: state.assets,
        }
    }
}

/// Fold for the assets projection of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetsFold {
    account: Address,
}

impl AssetsFold {
    /// Track the balances of `account`.
    pub fn new(account: Address) -> Self {
        Self { account }
    }

    /// The watched account.
    pub fn account(&self) -> Address {
        self.account
    }
}

fn signed(value: U256) -> I256 {
    I256::try_from(value).unwrap_or(I256::MAX)
}

impl ProjectionFold for AssetsFold {
    type State = AssetsState;

    fn scope_name(&self) -> String {
        format!("assets-{}", self.account)
    }

    fn event_specs(&self) -> Vec<EventSpec> {
        vec![
            EventSpec::new("TransferSingle").with_filter("from", self.account),
            EventSpec::new("TransferBatch").with_filter("from", self.account),
            EventSpec::new("TransferSingle").with_filter("to", self.account),
            EventSpec::new("TransferBatch").with_filter("to", self.account),
        ]
    }

    fn apply_mut(&self, state: &mut AssetsState, event: &Event) {
        let (Some(from), Some(to)) = (event.address("from"), event.address("to")) else {
            return;
        };
        let moves: Vec<(U256, U256)> = match event.name.as_str() {
            "TransferSingle" => match (event.uint("id"), event.uint("value")) {
                (Some(id), Some(value)) => vec![(id, value)],
                _ => return,
            },
            "TransferBatch" => match (event.uints("ids"), event.uints("values")) {
                (Some(ids), Some(values)) if ids.len() == values.len() => {
                    ids.into_iter().zip(values).collect()
                }
                _ => return,
            },
            _ => return,
        };

        // A self-transfer applies both sides.
        if from == self.account {
            for (id, value) in &moves {
                state.adjust(*id, -signed(*value));
            }
        }
        if to == self.account {
            for (id, value) in &moves {
                state.adjust(*id, signed(*value));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::dyn_abi::DynSolValue;
    use alloy::primitives::address;

    use super::*;
    use crate::domain::token_id::{ALBUM_FLAG_BIT, ALBUM_TYPE_SHIFT, BOOSTER_PACK_FLAG_BIT};
    use crate::event::LogPosition;
    use crate::projection::{fold_incremental, fold_initial};

    const ACCOUNT: Address = address!("0x00000000000000000000000000000000000000a1");
    const OTHER: Address = address!("0x00000000000000000000000000000000000000b0");

    fn album_id() -> U256 {
        (U256::from(1) << ALBUM_FLAG_BIT) | U256::from(42)
    }

    fn pack_id() -> U256 {
        (U256::from(2) << ALBUM_TYPE_SHIFT) | (U256::from(1) << BOOSTER_PACK_FLAG_BIT) | U256::from(9)
    }

    fn sticker_id() -> U256 {
        (U256::from(2) << ALBUM_TYPE_SHIFT) | U256::from((4 << 3) | 1)
    }

    fn uint(value: U256) -> DynSolValue {
        DynSolValue::Uint(value, 256)
    }

    fn single(from: Address, to: Address, id: U256, value: u64, block: u64) -> Event {
        Event {
            name: "TransferSingle".into(),
            fields: BTreeMap::from([
                ("operator".to_string(), DynSolValue::Address(from)),
                ("from".to_string(), DynSolValue::Address(from)),
                ("to".to_string(), DynSolValue::Address(to)),
                ("id".to_string(), uint(id)),
                ("value".to_string(), uint(U256::from(value))),
            ]),
            position: LogPosition::new(block, 0, 0),
        }
    }

    fn batch(from: Address, to: Address, moves: &[(U256, u64)], block: u64) -> Event {
        let ids = moves.iter().map(|(id, _)| uint(*id)).collect();
        let values = moves.iter().map(|(_, v)| uint(U256::from(*v))).collect();
        Event {
            name: "TransferBatch".into(),
            fields: BTreeMap::from([
                ("operator".to_string(), DynSolValue::Address(from)),
                ("from".to_string(), DynSolValue::Address(from)),
                ("to".to_string(), DynSolValue::Address(to)),
                ("ids".to_string(), DynSolValue::Array(ids)),
                ("values".to_string(), DynSolValue::Array(values)),
            ]),
            position: LogPosition::new(block, 0, 0),
        }
    }

    #[test]
    fn minted_album_is_filed_as_album() {
        let fold = AssetsFold::new(ACCOUNT);
        let state = fold_initial(
            &fold,
            AssetsState::default(),
            &[single(Address::ZERO, ACCOUNT, album_id(), 1, 1)],
        );

        assert_eq!(state.amount(&album_id()), I256::ONE);
        assert_eq!(*state.albums, vec![album_id()]);
        assert!(state.booster_packs.is_empty());
        assert!(state.stickers.is_empty());
    }

    #[test]
    fn batch_transfers_adjust_each_id() {
        let fold = AssetsFold::new(ACCOUNT);
        let events = [
            batch(Address::ZERO, ACCOUNT, &[(pack_id(), 3), (sticker_id(), 5)], 1),
            batch(ACCOUNT, OTHER, &[(sticker_id(), 2)], 2),
        ];
        let state = fold_initial(&fold, AssetsState::default(), &events);

        assert_eq!(state.amount(&pack_id()), I256::try_from(3i64).expect("fits"));
        assert_eq!(state.amount(&sticker_id()), I256::try_from(3i64).expect("fits"));
        assert_eq!(state.booster_packs[&U256::from(2)][&9u16], pack_id());
        assert_eq!(state.stickers[&U256::from(2)][&4u16][&1u8], sticker_id());
    }

    #[test]
    fn self_transfer_nets_to_zero_and_files_once() {
        let fold = AssetsFold::new(ACCOUNT);
        let events = [
            single(Address::ZERO, ACCOUNT, album_id(), 1, 1),
            single(ACCOUNT, ACCOUNT, album_id(), 1, 2),
        ];
        let state = fold_initial(&fold, AssetsState::default(), &events);
        assert_eq!(state.amount(&album_id()), I256::ONE);
        assert_eq!(state.albums.len(), 1);
        assert_eq!(state.assets.len(), 1);
    }

    #[test]
    fn sending_first_goes_negative() {
        let fold = AssetsFold::new(ACCOUNT);
        let state = fold_initial(
            &fold,
            AssetsState::default(),
            &[single(ACCOUNT, OTHER, sticker_id(), 2, 1)],
        );
        assert_eq!(state.amount(&sticker_id()), I256::try_from(-2i64).expect("fits"));
    }

    #[test]
    fn mismatched_batch_is_ignored() {
        let fold = AssetsFold::new(ACCOUNT);
        let mut event = batch(Address::ZERO, ACCOUNT, &[(pack_id(), 1)], 1);
        event
            .fields
            .insert("values".to_string(), DynSolValue::Array(Vec::new()));
        let state = fold_initial(&fold, AssetsState::default(), &[event]);
        assert!(state.assets.is_empty());
    }

    #[test]
    fn conventions_agree() {
        let fold = AssetsFold::new(ACCOUNT);
        let events = [
            single(Address::ZERO, ACCOUNT, album_id(), 1, 1),
            batch(OTHER, ACCOUNT, &[(pack_id(), 2), (sticker_id(), 1)], 2),
            single(ACCOUNT, OTHER, pack_id(), 1, 3),
        ];
        assert_eq!(
            fold_initial(&fold, AssetsState::default(), &events),
            fold_incremental(&fold, &AssetsState::default(), &events)
        );
    }

    #[test]
    fn persisted_state_rebuilds_indices() {
        let fold = AssetsFold::new(ACCOUNT);
        let events = [batch(
            Address::ZERO,
            ACCOUNT,
            &[(album_id(), 1), (pack_id(), 2), (sticker_id(), 3)],
            1,
        )];
        let state = fold_initial(&fold, AssetsState::default(), &events);

        let json = serde_json::to_string(&state).expect("serialize");
        let back: AssetsState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, state);
    }

    #[test]
    fn specs_resolve_against_schema() {
        let schema = schema().expect("schema parses");
        for spec in AssetsFold::new(ACCOUNT).event_specs() {
            schema.resolve(&spec).expect("spec resolves");
        }
    }
}
