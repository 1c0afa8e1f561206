//! Projections of the Stick'Em All contracts.
//!
//! - [`worlds`]: worlds minted, owned or editable by an account.
//! - [`albums`]: albums defined and released, optionally in one world.
//! - [`assets`]: economy token balances of an account, classified by id.

pub mod albums;
pub mod assets;
pub mod relevance;
pub mod token_id;
pub mod worlds;

pub use albums::{AlbumEntry, AlbumsFold, AlbumsState};
pub use assets::{AssetEntry, AssetsFold, AssetsState};
pub use relevance::{Keyed, RelevanceIndex};
pub use token_id::{TokenClass, classify};
pub use worlds::{WorldEntry, WorldsFold, WorldsState};
