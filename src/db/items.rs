//! Ordered item storage for songbooks.
//!
//! Every public operation here runs in its own `IMMEDIATE` transaction and
//! leaves the songbook's ranks dense (`0..n-1`) when it commits. Holes and
//! out-of-order values only ever exist inside a transaction.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row, TransactionBehavior};
use tracing::{debug, info};

use crate::error::{validate_section_text, SongbookError};
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::models::{Item, ItemKind, ItemSlot, Section, Song};

/// Songs to append to a songbook. Artists expand to all of their songs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddRequest {
    pub songs: Vec<i64>,
    pub artists: Vec<i64>,
}

impl AddRequest {
    pub fn songs(songs: impl Into<Vec<i64>>) -> Self {
        Self {
            songs: songs.into(),
            artists: Vec::new(),
        }
    }

    pub fn artists(artists: impl Into<Vec<i64>>) -> Self {
        Self {
            songs: Vec::new(),
            artists: artists.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOutcome {
    pub added: usize,
    /// Songs skipped because the songbook already holds them.
    pub already_present: usize,
    /// Song or artist ids that do not exist (stale client state).
    pub missing: Vec<SongbookError>,
}

/// One client submission against a songbook's items. Directives are keyed by
/// slot id, so a slot carries at most one rank and one rename.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemBatch {
    pub ranks: BTreeMap<i64, i64>,
    pub deletions: BTreeSet<i64>,
    pub new_section: Option<String>,
    pub renames: BTreeMap<i64, String>,
}

impl ItemBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rank(mut self, slot_id: i64, rank: i64) -> Self {
        self.ranks.insert(slot_id, rank);
        self
    }

    pub fn delete(mut self, slot_id: i64) -> Self {
        self.deletions.insert(slot_id);
        self
    }

    pub fn new_section(mut self, name: impl Into<String>) -> Self {
        self.new_section = Some(name.into());
        self
    }

    pub fn rename(mut self, slot_id: i64, name: impl Into<String>) -> Self {
        self.renames.insert(slot_id, name.into());
        self
    }
}

/// A directive that was skipped; the rest of the batch still applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// `None` when the failure concerns the new-section directive.
    pub slot_id: Option<i64>,
    pub error: SongbookError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub reordered: usize,
    pub deleted: usize,
    pub renamed: usize,
    pub new_section: Option<i64>,
    pub failures: Vec<BatchFailure>,
}

/// Minimal slot view used while rewriting ranks.
#[derive(Debug, Clone)]
struct SlotRow {
    id: i64,
    /// Working rank; batch directives overwrite it before the rewrite.
    rank: i64,
    /// Rank as loaded from the store.
    stored_rank: i64,
    kind: ItemKind,
    section_id: Option<i64>,
}

fn ensure_songbook(conn: &Connection, songbook_id: i64) -> Result<()> {
    let exists: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM songbooks WHERE id = ?1)",
            [songbook_id],
            |row| row.get(0),
        )
        .context("failed to look up songbook")?;
    if exists {
        Ok(())
    } else {
        Err(SongbookError::not_found("songbook", songbook_id).into())
    }
}

fn load_slot_rows(conn: &Connection, songbook_id: i64) -> Result<Vec<SlotRow>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, rank, kind, section_id FROM item_slots
             WHERE songbook_id = ?1
             ORDER BY rank, id",
        )
        .context("failed to prepare slot query")?;

    let rows = stmt
        .query_map([songbook_id], |row| {
            let rank = row.get(1)?;
            Ok(SlotRow {
                id: row.get(0)?,
                rank,
                stored_rank: rank,
                kind: row.get(2)?,
                section_id: row.get(3)?,
            })
        })
        .context("failed to iterate slots")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect slots")?;

    Ok(rows)
}

fn next_rank(conn: &Connection, songbook_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(rank) + 1, 0) FROM item_slots WHERE songbook_id = ?1",
        [songbook_id],
        |row| row.get(0),
    )
    .context("failed to compute next rank")
}

/// Assign ranks `0..n-1` following `ordered`. Ranks are first flipped to
/// negative values so the `(songbook_id, rank)` constraint holds at every
/// statement boundary. Nothing is written when every slot already sits at its
/// stored position.
fn write_ranks(conn: &Connection, songbook_id: i64, ordered: &[SlotRow]) -> Result<()> {
    let unchanged = ordered
        .iter()
        .enumerate()
        .all(|(index, slot)| slot.stored_rank == index as i64);
    if unchanged {
        return Ok(());
    }

    conn.execute(
        "UPDATE item_slots SET rank = -1 - rank WHERE songbook_id = ?1",
        [songbook_id],
    )
    .context("failed to stage slot ranks")?;

    let mut stmt = conn
        .prepare("UPDATE item_slots SET rank = ?1 WHERE id = ?2")
        .context("failed to prepare rank update")?;
    for (index, slot) in ordered.iter().enumerate() {
        stmt.execute(params![index as i64, slot.id])
            .context("failed to write slot rank")?;
    }
    Ok(())
}

/// Re-densify ranks inside an existing transaction, keeping current order.
pub(crate) fn renumber(conn: &Connection, songbook_id: i64) -> Result<()> {
    let rows = load_slot_rows(conn, songbook_id)?;
    write_ranks(conn, songbook_id, &rows)
}

/// Insert a song slot at `rank` unless the song is already in the songbook.
fn insert_song_slot(conn: &Connection, songbook_id: i64, song_id: i64, rank: i64) -> Result<bool> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO item_slots (songbook_id, rank, kind, song_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![songbook_id, rank, ItemKind::Song, song_id],
        )
        .context("failed to link song to songbook")?;
    Ok(inserted == 1)
}

fn append_section(conn: &Connection, songbook_id: i64, name: &str) -> Result<ItemSlot> {
    conn.execute(
        "INSERT INTO sections (songbook_id, name) VALUES (?1, ?2)",
        params![songbook_id, name],
    )
    .context("failed to insert section")?;
    let section_id = conn.last_insert_rowid();

    let rank = next_rank(conn, songbook_id)?;
    conn.execute(
        "INSERT INTO item_slots (songbook_id, rank, kind, section_id) VALUES (?1, ?2, ?3, ?4)",
        params![songbook_id, rank, ItemKind::Section, section_id],
    )
    .context("failed to link section to songbook")?;

    Ok(ItemSlot {
        id: conn.last_insert_rowid(),
        songbook_id,
        rank,
        item: Item::Section(Section {
            id: section_id,
            name: name.to_string(),
        }),
    })
}

fn row_exists(conn: &Connection, query: &str, id: i64) -> Result<bool> {
    conn.query_row(query, [id], |row| row.get(0))
        .context("failed to check row existence")
}

/// Append songs (and every song of the requested artists) at the end of the
/// songbook. Songs already present are counted and skipped, never duplicated;
/// unknown ids are reported in `missing`.
pub fn add_items(conn: &mut Connection, songbook_id: i64, request: &AddRequest) -> Result<AddOutcome> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("failed to start item insertion")?;
    ensure_songbook(&tx, songbook_id)?;

    let mut outcome = AddOutcome::default();
    let mut rank = next_rank(&tx, songbook_id)?;

    let mut candidates = Vec::new();
    for &song_id in &request.songs {
        if row_exists(&tx, "SELECT EXISTS(SELECT 1 FROM songs WHERE id = ?1)", song_id)? {
            candidates.push(song_id);
        } else {
            outcome.missing.push(SongbookError::not_found("song", song_id));
        }
    }
    for &artist_id in &request.artists {
        if !row_exists(&tx, "SELECT EXISTS(SELECT 1 FROM artists WHERE id = ?1)", artist_id)? {
            outcome.missing.push(SongbookError::not_found("artist", artist_id));
            continue;
        }
        let songs = crate::db::songs::fetch_songs_for_artist(&tx, artist_id)?;
        candidates.extend(songs.into_iter().map(|song| song.id));
    }

    for song_id in candidates {
        if insert_song_slot(&tx, songbook_id, song_id, rank)? {
            rank += 1;
            outcome.added += 1;
        } else {
            outcome.already_present += 1;
        }
    }

    tx.commit().context("failed to commit item insertion")?;
    info!(
        songbook_id,
        added = outcome.added,
        already_present = outcome.already_present,
        missing = outcome.missing.len(),
        "songs added to songbook"
    );
    Ok(outcome)
}

/// Append a section header at the end of the songbook.
pub fn add_section(conn: &mut Connection, songbook_id: i64, name: &str) -> Result<ItemSlot> {
    validate_section_text(name)?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("failed to start section insertion")?;
    ensure_songbook(&tx, songbook_id)?;
    let slot = append_section(&tx, songbook_id, name)?;
    tx.commit().context("failed to commit section insertion")?;
    Ok(slot)
}

/// Remove a song from a songbook and close the gap it leaves.
pub fn remove_song(conn: &mut Connection, songbook_id: i64, song_id: i64) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("failed to start song removal")?;

    let deleted = tx
        .execute(
            "DELETE FROM item_slots WHERE songbook_id = ?1 AND song_id = ?2",
            params![songbook_id, song_id],
        )
        .context("failed to unlink song from songbook")?;
    if deleted == 0 {
        return Err(SongbookError::not_found("songbook song", song_id).into());
    }

    renumber(&tx, songbook_id)?;
    tx.commit().context("failed to commit song removal")?;
    Ok(())
}

/// Re-densify a songbook's ranks, keeping the current order.
pub fn fill_holes(conn: &mut Connection, songbook_id: i64) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("failed to start rank renumbering")?;
    renumber(&tx, songbook_id)?;
    tx.commit().context("failed to commit rank renumbering")?;
    Ok(())
}

/// Apply a client batch: rank reassignments, deletions, hole filling, an
/// optional new trailing section, and section renames.
///
/// Rank rewriting is all-or-nothing. Individual directives that reference
/// unknown slots, or renames with forbidden characters, are skipped and
/// reported in [`BatchOutcome::failures`] without aborting the batch.
pub fn apply_batch(conn: &mut Connection, songbook_id: i64, batch: &ItemBatch) -> Result<BatchOutcome> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("failed to start item batch")?;
    ensure_songbook(&tx, songbook_id)?;

    let mut outcome = BatchOutcome::default();
    let mut slots = load_slot_rows(&tx, songbook_id)?;

    for (&slot_id, &rank) in &batch.ranks {
        match slots.iter_mut().find(|slot| slot.id == slot_id) {
            Some(slot) => {
                if slot.rank != rank {
                    slot.rank = rank;
                    outcome.reordered += 1;
                }
            }
            None => outcome.failures.push(BatchFailure {
                slot_id: Some(slot_id),
                error: SongbookError::not_found("item slot", slot_id),
            }),
        }
    }

    for &slot_id in &batch.deletions {
        let Some(position) = slots.iter().position(|slot| slot.id == slot_id) else {
            outcome.failures.push(BatchFailure {
                slot_id: Some(slot_id),
                error: SongbookError::not_found("item slot", slot_id),
            });
            continue;
        };
        let slot = slots.remove(position);
        match (slot.kind, slot.section_id) {
            // Sections belong to the songbook; dropping the row cascades to the slot.
            (ItemKind::Section, Some(section_id)) => tx
                .execute("DELETE FROM sections WHERE id = ?1", [section_id])
                .context("failed to delete section")?,
            _ => tx
                .execute("DELETE FROM item_slots WHERE id = ?1", [slot.id])
                .context("failed to delete item slot")?,
        };
        outcome.deleted += 1;
    }

    // Stable: equal submitted ranks keep their previous relative order.
    slots.sort_by_key(|slot| slot.rank);
    write_ranks(&tx, songbook_id, &slots)?;

    if let Some(name) = &batch.new_section {
        match validate_section_text(name) {
            Ok(()) => outcome.new_section = Some(append_section(&tx, songbook_id, name)?.id),
            Err(error) => outcome.failures.push(BatchFailure {
                slot_id: None,
                error,
            }),
        }
    }

    for (&slot_id, name) in &batch.renames {
        let section_id = slots
            .iter()
            .find(|slot| slot.id == slot_id && slot.kind == ItemKind::Section)
            .and_then(|slot| slot.section_id);
        let Some(section_id) = section_id else {
            outcome.failures.push(BatchFailure {
                slot_id: Some(slot_id),
                error: SongbookError::not_found("section slot", slot_id),
            });
            continue;
        };

        let current: String = tx
            .query_row("SELECT name FROM sections WHERE id = ?1", [section_id], |row| row.get(0))
            .context("failed to load section name")?;
        if current == *name {
            continue;
        }
        if let Err(error) = validate_section_text(name) {
            outcome.failures.push(BatchFailure {
                slot_id: Some(slot_id),
                error,
            });
            continue;
        }
        tx.execute(
            "UPDATE sections SET name = ?1 WHERE id = ?2",
            params![name, section_id],
        )
        .context("failed to rename section")?;
        outcome.renamed += 1;
    }

    tx.commit().context("failed to commit item batch")?;
    info!(
        songbook_id,
        reordered = outcome.reordered,
        deleted = outcome.deleted,
        renamed = outcome.renamed,
        new_section = ?outcome.new_section,
        failures = outcome.failures.len(),
        "item batch applied"
    );
    Ok(outcome)
}

fn slot_from_row(row: &Row<'_>) -> rusqlite::Result<ItemSlot> {
    let kind: ItemKind = row.get(3)?;
    let item = match kind {
        ItemKind::Song => Item::Song(Song {
            id: row.get(4)?,
            title: row.get(5)?,
            artist_id: row.get(6)?,
            link: row.get(7)?,
        }),
        ItemKind::Section => Item::Section(Section {
            id: row.get(8)?,
            name: row.get(9)?,
        }),
    };
    Ok(ItemSlot {
        id: row.get(0)?,
        songbook_id: row.get(1)?,
        rank: row.get(2)?,
        item,
    })
}

/// Every slot of a songbook with its song or section hydrated, by rank.
pub fn fetch_items(conn: &Connection, songbook_id: i64) -> Result<Vec<ItemSlot>> {
    let mut stmt = conn
        .prepare(
            "SELECT sl.id, sl.songbook_id, sl.rank, sl.kind,
                    so.id, so.title, so.artist_id, so.link,
                    se.id, se.name
             FROM item_slots sl
             LEFT JOIN songs so ON so.id = sl.song_id
             LEFT JOIN sections se ON se.id = sl.section_id
             WHERE sl.songbook_id = ?1
             ORDER BY sl.rank",
        )
        .context("failed to prepare songbook items query")?;

    let slots = stmt
        .query_map([songbook_id], slot_from_row)
        .context("failed to iterate songbook items")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect songbook items")?;

    Ok(slots)
}

/// Fingerprint of the songbook's current content.
pub fn songbook_fingerprint(conn: &Connection, songbook_id: i64) -> Result<Fingerprint> {
    let slots = fetch_items(conn, songbook_id)?;
    let digest = fingerprint(&slots);
    debug!(songbook_id, items = slots.len(), fingerprint = %digest, "songbook fingerprinted");
    Ok(digest)
}
