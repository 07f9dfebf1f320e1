//! Domain models that mirror the SQLite schema. These types stay light-weight
//! data holders so the storage helpers and the scheduler can pass them around
//! freely; behaviour lives in `db`, `fingerprint` and `scheduler`.

use std::collections::BTreeMap;
use std::fmt;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// Who may read a songbook besides its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl ToSql for Visibility {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Visibility {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A user's ordered collection of songs and section headers.
pub struct Songbook {
    pub id: i64,
    pub title: String,
    pub description: String,
    /// Owner identifier as handed to us by the access-control layer.
    pub owner_id: i64,
    pub visibility: Visibility,
    /// URL fragment derived from `title`, refreshed on every rename.
    pub slug: String,
}

impl fmt::Display for Songbook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.title)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artist {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A shared song. Songbooks only reference songs, they never own them.
pub struct Song {
    pub id: i64,
    pub title: String,
    pub artist_id: Option<i64>,
    /// Optional reference to the song source (kept as raw text so non-web
    /// references fit as well).
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Free-text divider owned by a single songbook.
pub struct Section {
    pub id: i64,
    pub name: String,
}

/// Discriminant stored in the `kind` column of `item_slots`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Song,
    Section,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Song => "song",
            ItemKind::Section => "section",
        }
    }
}

impl ToSql for ItemKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ItemKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "song" => Ok(ItemKind::Song),
            "section" => Ok(ItemKind::Section),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What a slot points at.
pub enum Item {
    Song(Song),
    Section(Section),
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        match self {
            Item::Song(_) => ItemKind::Song,
            Item::Section(_) => ItemKind::Section,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Binding of one item to one songbook at one rank.
pub struct ItemSlot {
    pub id: i64,
    pub songbook_id: i64,
    pub rank: i64,
    pub item: Item,
}

/// Render options keyed by option name; validated by [`crate::layout`].
pub type LayoutOptions = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq)]
/// Named bundle of rendering options owned by one user.
pub struct Layout {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub options: LayoutOptions,
}

/// Lifecycle of a render task: `Queued -> Running -> {Finished, Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Finished,
    Error,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Finished => "finished",
            TaskState::Error => "error",
        }
    }

    /// `Finished` and `Error` are only left by starting a brand-new cycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Error)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for TaskState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TaskState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "queued" => Ok(TaskState::Queued),
            "running" => Ok(TaskState::Running),
            "finished" => Ok(TaskState::Finished),
            "error" => Ok(TaskState::Error),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// The single render record kept per (songbook, layout) pair.
pub struct RenderTask {
    pub id: i64,
    pub songbook_id: i64,
    pub layout_id: i64,
    pub state: TaskState,
    /// Content fingerprint the current cycle was queued against.
    pub fingerprint: String,
    /// Opaque payload written by the worker; an empty object until the cycle
    /// reaches a terminal state.
    pub result: serde_json::Value,
    /// Bumped every time the record restarts as a new queued cycle.
    pub cycle: i64,
    /// Whether the current cycle has been handed to the worker queue.
    pub dispatched: bool,
}

impl RenderTask {
    pub fn stored_fingerprint(&self) -> Fingerprint {
        Fingerprint::from_stored(self.fingerprint.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_finished_and_error_are_terminal() {
        assert!(!TaskState::Queued.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Finished.is_terminal());
        assert!(TaskState::Error.is_terminal());
    }

    #[test]
    fn item_kind_follows_variant() {
        let section = Item::Section(Section {
            id: 1,
            name: "Intro".into(),
        });
        assert_eq!(section.kind(), ItemKind::Section);
    }
}
