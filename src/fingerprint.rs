//! Content fingerprint used as the render cache key.
//!
//! The digest covers the ordered item sequence of a songbook: each slot's
//! rank, its kind, and either the referenced song id or the section text.
//! Section row ids and the songbook id are deliberately left out so two
//! songbooks with the same content share a fingerprint. Layouts are not part
//! of it; they are matched separately through the `(songbook, layout)` key.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::models::{Item, ItemSlot};

/// Bumped whenever the encoding below changes, which invalidates every stored
/// fingerprint at once.
const ENCODING_TAG: &[u8] = b"songbook-content/v1";

const SONG_TAG: u8 = 0x01;
const SECTION_TAG: u8 = 0x02;

/// Hex-encoded SHA-256 digest of a songbook's ordered content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap a value previously produced by [`fingerprint`] and read back from
    /// the store.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint an ordered slot list. Callers pass slots sorted by rank, as
/// returned by [`crate::db::fetch_items`].
pub fn fingerprint(slots: &[ItemSlot]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(ENCODING_TAG);

    for slot in slots {
        hasher.update(slot.rank.to_le_bytes());
        match &slot.item {
            Item::Song(song) => {
                hasher.update([SONG_TAG]);
                hasher.update(song.id.to_le_bytes());
            }
            Item::Section(section) => {
                hasher.update([SECTION_TAG]);
                // Length prefix keeps adjacent sections from running together.
                hasher.update((section.name.len() as u64).to_le_bytes());
                hasher.update(section.name.as_bytes());
            }
        }
    }

    Fingerprint(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Section, Song};

    fn song(slot_id: i64, rank: i64, song_id: i64) -> ItemSlot {
        ItemSlot {
            id: slot_id,
            songbook_id: 1,
            rank,
            item: Item::Song(Song {
                id: song_id,
                title: format!("song {song_id}"),
                artist_id: None,
                link: String::new(),
            }),
        }
    }

    fn section(slot_id: i64, rank: i64, section_id: i64, name: &str) -> ItemSlot {
        ItemSlot {
            id: slot_id,
            songbook_id: 1,
            rank,
            item: Item::Section(Section {
                id: section_id,
                name: name.to_string(),
            }),
        }
    }

    #[test]
    fn digest_is_stable_and_fixed_size() {
        let slots = vec![song(1, 0, 10), section(2, 1, 5, "Refrains")];
        let first = fingerprint(&slots);
        assert_eq!(first, fingerprint(&slots));
        assert_eq!(first.as_str().len(), 64);
    }

    #[test]
    fn order_matters() {
        let a = fingerprint(&[song(1, 0, 10), song(2, 1, 11)]);
        let b = fingerprint(&[song(2, 0, 11), song(1, 1, 10)]);
        assert_ne!(a, b);
    }

    #[test]
    fn section_text_matters() {
        let a = fingerprint(&[section(1, 0, 5, "Noël")]);
        let b = fingerprint(&[section(1, 0, 5, "Noel")]);
        assert_ne!(a, b);
    }

    #[test]
    fn row_ids_do_not_matter() {
        let mut other_book = section(7, 1, 99, "Refrains");
        other_book.songbook_id = 2;
        let a = fingerprint(&[song(1, 0, 10), section(2, 1, 5, "Refrains")]);
        let b = fingerprint(&[song(6, 0, 10), other_book]);
        assert_eq!(a, b);
    }

    #[test]
    fn adjacent_sections_do_not_collide() {
        let a = fingerprint(&[section(1, 0, 1, "ab"), section(2, 1, 2, "c")]);
        let b = fingerprint(&[section(1, 0, 1, "a"), section(2, 1, 2, "bc")]);
        assert_ne!(a, b);
    }

    #[test]
    fn empty_songbook_has_a_fingerprint() {
        assert_eq!(fingerprint(&[]), fingerprint(&[]));
        assert_ne!(fingerprint(&[]), fingerprint(&[song(1, 0, 1)]));
    }
}
