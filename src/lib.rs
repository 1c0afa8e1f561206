//! Event-sourced projections of Stick'Em All contract logs.
//!
//! Each projection replays the historical logs of one contract up to the
//! chain head, then follows new logs live, delivering a
//! [`Checkpoint`] after catch-up and after every live event.

mod checkpoint;
pub mod domain;
mod effect;
mod error;
mod event;
pub mod memory;
mod projection;
mod replay;
pub mod rpc;
mod scope;
mod source;

pub use checkpoint::{checkpoint_path, load_checkpoint, save_checkpoint};
pub use effect::{EffectConfig, EffectHandle, EventsEffect, SyncStatus};
pub use error::{ConfigError, SchemaError, SourceError, SyncError};
pub use event::{Event, EventNormalizer, EventSchema, EventSpec, LogFilter, LogPosition};
pub use memory::MemoryLogSource;
pub use projection::{Checkpoint, ProjectionFold, fold_incremental, fold_initial};
pub use replay::order_for_replay;
pub use rpc::{RpcConfig, RpcLogSource};
pub use scope::EffectSlot;
pub use source::{LiveSubscription, LogSource, LogStream, SourceFuture, UnsubscribeHandle};
