//! Bit-field layout of economy token ids.
//!
//! ```text
//! bit 255        album flag: the id is an album
//! bit 30         booster pack flag (when not an album)
//! bits 31..      album type of booster packs and stickers
//! bits 0..16     booster pack: rule id
//! bits 3..16     sticker: page
//! bits 0..3      sticker: slot
//! bits 0..16     sticker: combined page and slot
//! ```
//!
//! Ids matching neither flag are stickers.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

/// Bit marking an album id.
pub const ALBUM_FLAG_BIT: usize = 255;
/// Bit marking a booster pack id.
pub const BOOSTER_PACK_FLAG_BIT: usize = 30;
/// Shift of the album type in booster pack and sticker ids.
pub const ALBUM_TYPE_SHIFT: usize = 31;
/// Mask of the rule id of a booster pack.
pub const RULE_ID_MASK: u64 = (1 << 16) - 1;
/// Shift of the page of a sticker.
pub const PAGE_SHIFT: u32 = 3;
/// Mask of the page of a sticker, applied after [`PAGE_SHIFT`].
pub const PAGE_MASK: u64 = (1 << 13) - 1;
/// Mask of the slot of a sticker.
pub const SLOT_MASK: u64 = (1 << 3) - 1;
/// Mask of the combined page and slot of a sticker.
pub const COMBINED_MASK: u64 = (1 << 16) - 1;

/// Category of an economy token, decoded from its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TokenClass {
    /// An album.
    Album,
    /// A booster pack for albums of `album_type`.
    BoosterPack {
        /// Album type the pack belongs to.
        album_type: U256,
        /// Rule the pack was minted under.
        rule_id: u16,
    },
    /// A sticker for albums of `album_type`.
    Sticker {
        /// Album type the sticker belongs to.
        album_type: U256,
        /// Page of the album.
        page: u16,
        /// Slot within the page.
        slot: u8,
        /// Page and slot packed together.
        combined: u16,
    },
}

/// Decode the category of a token id.
///
/// # Examples
///
/// ```
/// use alloy::primitives::U256;
/// use stickem_sync::domain::token_id::{TokenClass, classify};
///
/// let album = U256::from(1) << 255;
/// assert_eq!(classify(album), TokenClass::Album);
///
/// let sticker = (U256::from(2) << 31) | U256::from((5 << 3) | 6);
/// assert_eq!(
///     classify(sticker),
///     TokenClass::Sticker { album_type: U256::from(2), page: 5, slot: 6, combined: 46 }
/// );
/// ```
pub fn classify(id: U256) -> TokenClass {
    if id.bit(ALBUM_FLAG_BIT) {
        return TokenClass::Album;
    }

    let low = id.as_limbs()[0];
    let album_type = id >> ALBUM_TYPE_SHIFT;
    if id.bit(BOOSTER_PACK_FLAG_BIT) {
        return TokenClass::BoosterPack {
            album_type,
            rule_id: (low & RULE_ID_MASK) as u16,
        };
    }

    TokenClass::Sticker {
        album_type,
        page: ((low >> PAGE_SHIFT) & PAGE_MASK) as u16,
        slot: (low & SLOT_MASK) as u8,
        combined: (low & COMBINED_MASK) as u16,
    }
}
