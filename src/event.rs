//! Event decoding, ordering keys, and log filters.
//!
//! This module turns raw `alloy` log entries into canonical [`Event`]
//! records using an [`EventSchema`] (the ABI event definitions of one
//! contract), and resolves [`EventSpec`]s into topic-level [`LogFilter`]s.
//! No network I/O occurs here.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use alloy::dyn_abi::{DynSolValue, EventExt};
use alloy::json_abi::{Event as AbiEvent, JsonAbi};
use alloy::primitives::{Address, B256, LogData, U256};
use alloy::rpc::types::{Filter, Log};
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// Position of a log entry in the chain: `(block, transaction, log)`.
///
/// The derived ordering is lexicographic over the three fields, which is
/// the replay order of the chain itself. Within one source and filter the
/// position is unique.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LogPosition {
    /// Block the log was emitted in.
    pub block_number: u64,
    /// Index of the emitting transaction within its block.
    pub transaction_index: u64,
    /// Index of the log within its block.
    pub log_index: u64,
}

impl LogPosition {
    /// Build a position from its three components.
    pub const fn new(block_number: u64, transaction_index: u64, log_index: u64) -> Self {
        Self {
            block_number,
            transaction_index,
            log_index,
        }
    }

    /// Read the position of an RPC log entry.
    ///
    /// Returns `None` for pending logs, which carry no block or index yet.
    pub fn of(log: &Log) -> Option<Self> {
        Some(Self {
            block_number: log.block_number?,
            transaction_index: log.transaction_index?,
            log_index: log.log_index?,
        })
    }
}

/// A decoded, canonical blockchain event.
///
/// Field values are keyed by the ABI input name. Accessors return `None`
/// when the field is missing or holds a different type, so projection
/// folds can treat malformed events as unrecognized.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// ABI event name (e.g. `"Transfer"`).
    pub name: String,
    /// Decoded inputs, indexed and non-indexed alike.
    pub fields: BTreeMap<String, DynSolValue>,
    /// Ordering key of the originating log.
    pub position: LogPosition,
}

impl Event {
    /// Block the event was emitted in.
    pub fn block_number(&self) -> u64 {
        self.position.block_number
    }

    /// Raw decoded value of a field.
    pub fn field(&self, name: &str) -> Option<&DynSolValue> {
        self.fields.get(name)
    }

    /// Read an `address` field.
    pub fn address(&self, name: &str) -> Option<Address> {
        self.field(name)?.as_address()
    }

    /// Read a `uintN` field, widened to 256 bits.
    pub fn uint(&self, name: &str) -> Option<U256> {
        self.field(name)?.as_uint().map(|(value, _)| value)
    }

    /// Read a `bool` field.
    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.field(name)?.as_bool()
    }

    /// Read a `uintN[]` field.
    ///
    /// Returns `None` if the field is missing, is not an array, or any
    /// element is not an unsigned integer.
    pub fn uints(&self, name: &str) -> Option<Vec<U256>> {
        self.field(name)?
            .as_array()?
            .iter()
            .map(|value| value.as_uint().map(|(v, _)| v))
            .collect()
    }
}

/// Event definitions of one contract, indexed by name and by selector.
///
/// Anonymous events carry no selector topic and are never registered.
#[derive(Debug, Clone, Default)]
pub struct EventSchema {
    by_name: BTreeMap<String, AbiEvent>,
    by_selector: HashMap<B256, AbiEvent>,
}

impl EventSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schema from human-readable event signatures.
    ///
    /// # Arguments
    ///
    /// * `signatures` - Solidity-style declarations such as
    ///   `"event Transfer(address indexed from, address indexed to, uint256 indexed tokenId)"`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Parse`] for the first signature that does not parse.
    ///
    /// # Examples
    ///
    /// ```
    /// use stickem_sync::EventSchema;
    ///
    /// let schema = EventSchema::from_signatures([
    ///     "event AlbumReleased(uint256 indexed worldId, uint256 indexed albumId)",
    /// ])
    /// .unwrap();
    /// assert!(schema.event("AlbumReleased").is_some());
    /// ```
    pub fn from_signatures<I, S>(signatures: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut schema = Self::new();
        for signature in signatures {
            let signature = signature.as_ref();
            let event = AbiEvent::parse(signature).map_err(|e| SchemaError::Parse {
                signature: signature.to_string(),
                reason: e.to_string(),
            })?;
            schema.insert(event);
        }
        Ok(schema)
    }

    /// Build a schema from every event of a JSON ABI document.
    pub fn from_json_abi(abi: &JsonAbi) -> Self {
        let mut schema = Self::new();
        for event in abi.events() {
            schema.insert(event.clone());
        }
        schema
    }

    /// Register an event definition, replacing any previous one with the
    /// same name or selector.
    pub fn insert(&mut self, event: AbiEvent) {
        if event.anonymous {
            tracing::debug!(event = %event.name, "skipping anonymous event");
            return;
        }
        self.by_selector.insert(event.selector(), event.clone());
        self.by_name.insert(event.name.clone(), event);
    }

    /// Look up an event definition by name.
    pub fn event(&self, name: &str) -> Option<&AbiEvent> {
        self.by_name.get(name)
    }

    /// Look up an event definition by its selector (topic 0).
    pub fn by_selector(&self, selector: &B256) -> Option<&AbiEvent> {
        self.by_selector.get(selector)
    }

    /// Resolve an [`EventSpec`] into a topic-level [`LogFilter`].
    ///
    /// Each filter entry must name an indexed input of the event, and its
    /// value must fit a single topic word (addresses, integers, booleans,
    /// fixed bytes).
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] describing the first mismatch.
    pub fn resolve(&self, spec: &EventSpec) -> Result<LogFilter, SchemaError> {
        let event = self
            .event(&spec.name)
            .ok_or_else(|| SchemaError::UnknownEvent(spec.name.clone()))?;

        let mut topics = [None; 3];
        for (input, value) in &spec.filter {
            let mut topic_slot = 0usize;
            let mut found = None;
            for param in &event.inputs {
                if param.name == *input {
                    found = Some(param.indexed);
                    break;
                }
                if param.indexed {
                    topic_slot += 1;
                }
            }

            match found {
                None => {
                    return Err(SchemaError::UnknownInput {
                        event: spec.name.clone(),
                        input: input.clone(),
                    });
                }
                Some(false) => {
                    return Err(SchemaError::NotIndexed {
                        event: spec.name.clone(),
                        input: input.clone(),
                    });
                }
                Some(true) => {}
            }

            let word = value
                .as_word()
                .filter(|_| topic_slot < topics.len())
                .ok_or_else(|| SchemaError::UnencodableFilter {
                    event: spec.name.clone(),
                    input: input.clone(),
                })?;
            topics[topic_slot] = Some(word);
        }

        Ok(LogFilter {
            event: spec.name.clone(),
            selector: event.selector(),
            topics,
        })
    }
}

/// One event name plus an optional filter over its indexed inputs.
///
/// # Examples
///
/// ```
/// use alloy::primitives::Address;
/// use stickem_sync::EventSpec;
///
/// let spec = EventSpec::new("Transfer").with_filter("from", Address::ZERO);
/// assert_eq!(spec.name, "Transfer");
/// assert_eq!(spec.filter.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EventSpec {
    /// ABI event name.
    pub name: String,
    /// Required values of indexed inputs, keyed by input name.
    pub filter: BTreeMap<String, DynSolValue>,
}

impl EventSpec {
    /// A spec matching every occurrence of the named event.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: BTreeMap::new(),
        }
    }

    /// Require an indexed input to equal `value`.
    pub fn with_filter(mut self, input: impl Into<String>, value: impl Into<DynSolValue>) -> Self {
        self.filter.insert(input.into(), value.into());
        self
    }
}

/// An [`EventSpec`] resolved to the topic words a node filters on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogFilter {
    /// Name of the event, kept for logging.
    pub event: String,
    /// Topic 0: keccak256 of the canonical event signature.
    pub selector: B256,
    /// Required values of topics 1 to 3; `None` matches anything.
    pub topics: [Option<B256>; 3],
}

impl LogFilter {
    /// Whether a log's topics satisfy this filter.
    pub fn matches(&self, data: &LogData) -> bool {
        let topics = data.topics();
        if topics.first() != Some(&self.selector) {
            return false;
        }
        self.topics
            .iter()
            .enumerate()
            .all(|(slot, wanted)| match wanted {
                None => true,
                Some(word) => topics.get(slot + 1) == Some(word),
            })
    }

    /// Build the JSON-RPC filter for logs emitted by `address`.
    ///
    /// Block bounds are left to the caller.
    pub fn to_rpc_filter(&self, address: Address) -> Filter {
        let mut filter = Filter::new()
            .address(address)
            .event_signature(self.selector);
        if let Some(word) = self.topics[0] {
            filter = filter.topic1(word);
        }
        if let Some(word) = self.topics[1] {
            filter = filter.topic2(word);
        }
        if let Some(word) = self.topics[2] {
            filter = filter.topic3(word);
        }
        filter
    }
}

/// Maps raw log entries to canonical [`Event`]s.
///
/// Decoding is deterministic and side-effect free. Entries that cannot be
/// decoded (unknown selector, malformed data, missing position, removed by
/// a re-org) are dropped: [`decode`](EventNormalizer::decode) returns `None`.
///
/// `Clone` is cheap: the schema is shared behind an [`Arc`].
#[derive(Debug, Clone)]
pub struct EventNormalizer {
    schema: Arc<EventSchema>,
}

impl EventNormalizer {
    /// Create a normalizer over `schema`.
    pub fn new(schema: EventSchema) -> Self {
        Self {
            schema: Arc::new(schema),
        }
    }

    /// The schema used for decoding.
    pub fn schema(&self) -> &EventSchema {
        &self.schema
    }

    /// Decode one raw log entry.
    ///
    /// # Returns
    ///
    /// `Some(Event)` if the log's selector is in the schema, its payload
    /// decodes, and it has a full chain position. `None` otherwise.
    pub fn decode(&self, log: &Log) -> Option<Event> {
        if log.removed {
            tracing::debug!(
                block_number = ?log.block_number,
                "dropping log removed by re-org"
            );
            return None;
        }
        let position = LogPosition::of(log)?;
        let data = &log.inner.data;
        let selector = data.topics().first()?;
        let abi_event = self.schema.by_selector(selector)?;

        let decoded = match abi_event.decode_log(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!(
                    event = %abi_event.name,
                    block_number = position.block_number,
                    error = %e,
                    "dropping undecodable log"
                );
                return None;
            }
        };

        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        let mut fields = BTreeMap::new();
        for (i, param) in abi_event.inputs.iter().enumerate() {
            let value = if param.indexed {
                indexed.next()
            } else {
                body.next()
            }?;
            // Unnamed inputs are addressed by position.
            let key = if param.name.is_empty() {
                i.to_string()
            } else {
                param.name.clone()
            };
            fields.insert(key, value);
        }

        Some(Event {
            name: abi_event.name.clone(),
            fields,
            position,
        })
    }

    /// Decode every log of a transaction receipt, skipping unknown ones.
    ///
    /// Used for immediate feedback after a write, outside any sync run.
    pub fn decode_receipt(&self, logs: &[Log]) -> Vec<Event> {
        logs.iter().filter_map(|log| self.decode(log)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::make_log;
    use alloy::primitives::{Bytes, address};
    use alloy::sol_types::SolEvent;

    alloy::sol! {
        event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
        event TransferBatch(address indexed operator, address indexed from, address indexed to, uint256[] ids, uint256[] values);
        event Unrelated(uint256 value);
    }

    const CONTRACT: Address = address!("0x00000000000000000000000000000000000000c0");
    const ALICE: Address = address!("0x00000000000000000000000000000000000000a1");

    fn schema() -> EventSchema {
        EventSchema::from_signatures([
            "event Transfer(address indexed from, address indexed to, uint256 indexed tokenId)",
            "event TransferBatch(address indexed operator, address indexed from, address indexed to, uint256[] ids, uint256[] values)",
        ])
        .expect("signatures should parse")
    }

    #[test]
    fn positions_order_by_block_then_tx_then_log() {
        let a = LogPosition::new(10, 0, 1);
        let b = LogPosition::new(10, 1, 0);
        let c = LogPosition::new(11, 0, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn decode_maps_indexed_fields_by_name() {
        let data = Transfer {
            from: Address::ZERO,
            to: ALICE,
            tokenId: U256::from(5),
        }
        .encode_log_data();
        let log = make_log(CONTRACT, data, LogPosition::new(10, 0, 0));

        let event = EventNormalizer::new(schema())
            .decode(&log)
            .expect("transfer should decode");
        assert_eq!(event.name, "Transfer");
        assert_eq!(event.address("from"), Some(Address::ZERO));
        assert_eq!(event.address("to"), Some(ALICE));
        assert_eq!(event.uint("tokenId"), Some(U256::from(5)));
        assert_eq!(event.position, LogPosition::new(10, 0, 0));
    }

    #[test]
    fn decode_reads_body_arrays() {
        let data = TransferBatch {
            operator: ALICE,
            from: ALICE,
            to: Address::ZERO,
            ids: vec![U256::from(1), U256::from(2)],
            values: vec![U256::from(3), U256::from(4)],
        }
        .encode_log_data();
        let log = make_log(CONTRACT, data, LogPosition::new(1, 0, 0));

        let event = EventNormalizer::new(schema()).decode(&log).expect("decodes");
        assert_eq!(event.uints("ids"), Some(vec![U256::from(1), U256::from(2)]));
        assert_eq!(
            event.uints("values"),
            Some(vec![U256::from(3), U256::from(4)])
        );
        assert_eq!(event.uint("ids"), None);
    }

    #[test]
    fn unknown_selector_is_dropped() {
        let data = Unrelated {
            value: U256::from(1),
        }
        .encode_log_data();
        let log = make_log(CONTRACT, data, LogPosition::new(1, 0, 0));
        assert!(EventNormalizer::new(schema()).decode(&log).is_none());
    }

    #[test]
    fn removed_and_pending_logs_are_dropped() {
        let data = Transfer {
            from: Address::ZERO,
            to: ALICE,
            tokenId: U256::from(5),
        }
        .encode_log_data();
        let normalizer = EventNormalizer::new(schema());

        let mut removed = make_log(CONTRACT, data.clone(), LogPosition::new(1, 0, 0));
        removed.removed = true;
        assert!(normalizer.decode(&removed).is_none());

        let mut pending = make_log(CONTRACT, data, LogPosition::new(1, 0, 0));
        pending.block_number = None;
        assert!(normalizer.decode(&pending).is_none());
    }

    #[test]
    fn malformed_payload_is_dropped() {
        let topics = vec![TransferBatch::SIGNATURE_HASH, B256::ZERO, B256::ZERO, B256::ZERO];
        let data = LogData::new_unchecked(topics, Bytes::from_static(&[1, 2, 3]));
        let log = make_log(CONTRACT, data, LogPosition::new(1, 0, 0));
        assert!(EventNormalizer::new(schema()).decode(&log).is_none());
    }

    #[test]
    fn decode_receipt_skips_unknown_logs() {
        let known = Transfer {
            from: Address::ZERO,
            to: ALICE,
            tokenId: U256::from(9),
        }
        .encode_log_data();
        let unknown = Unrelated {
            value: U256::from(1),
        }
        .encode_log_data();
        let logs = vec![
            make_log(CONTRACT, unknown, LogPosition::new(3, 0, 0)),
            make_log(CONTRACT, known, LogPosition::new(3, 0, 1)),
        ];

        let events = EventNormalizer::new(schema()).decode_receipt(&logs);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].uint("tokenId"), Some(U256::from(9)));
    }

    #[test]
    fn resolve_places_filter_on_topic_slot() {
        let spec = EventSpec::new("Transfer").with_filter("to", ALICE);
        let filter = schema().resolve(&spec).expect("resolves");
        assert_eq!(filter.selector, Transfer::SIGNATURE_HASH);
        assert_eq!(filter.topics, [None, Some(ALICE.into_word()), None]);
    }

    #[test]
    fn resolve_rejects_bad_specs() {
        let schema = schema();
        assert!(matches!(
            schema.resolve(&EventSpec::new("Approval")),
            Err(SchemaError::UnknownEvent(_))
        ));
        assert!(matches!(
            schema.resolve(&EventSpec::new("Transfer").with_filter("owner", ALICE)),
            Err(SchemaError::UnknownInput { .. })
        ));
        assert!(matches!(
            schema.resolve(&EventSpec::new("TransferBatch").with_filter("ids", U256::from(1))),
            Err(SchemaError::NotIndexed { .. })
        ));
    }

    #[test]
    fn filter_matches_only_constrained_topics() {
        let filter = schema()
            .resolve(&EventSpec::new("Transfer").with_filter("from", Address::ZERO))
            .expect("resolves");

        let mint = Transfer {
            from: Address::ZERO,
            to: ALICE,
            tokenId: U256::from(1),
        }
        .encode_log_data();
        let move_out = Transfer {
            from: ALICE,
            to: Address::ZERO,
            tokenId: U256::from(1),
        }
        .encode_log_data();
        assert!(filter.matches(&mint));
        assert!(!filter.matches(&move_out));
    }

    #[test]
    fn schema_from_json_abi_registers_events() {
        let abi: JsonAbi = serde_json::from_str(
            r#"[{"type":"event","name":"AlbumReleased","anonymous":false,"inputs":[
                {"name":"albumId","type":"uint256","indexed":true},
                {"name":"worldId","type":"uint256","indexed":true}]}]"#,
        )
        .expect("abi json should parse");
        let schema = EventSchema::from_json_abi(&abi);
        let event = schema.event("AlbumReleased").expect("registered");
        assert!(schema.by_selector(&event.selector()).is_some());
    }

    #[test]
    fn bad_signature_is_a_parse_error() {
        let result = EventSchema::from_signatures(["event Broken(uint256"]);
        assert!(matches!(result, Err(SchemaError::Parse { .. })));
    }
}
