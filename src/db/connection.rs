use std::fs;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::debug;

use crate::config::StoreSettings;

/// Open (creating if needed) the database described by `settings`, apply the
/// connection pragmas, and run the lazy schema bootstrap. Every thread or
/// process that touches the store opens its own connection through here.
pub fn open(settings: &StoreSettings) -> Result<Connection> {
    if let Some(parent) = settings.path.parent() {
        fs::create_dir_all(parent).context("failed to create data directory")?;
    }

    let conn = Connection::open(&settings.path).context("failed to open SQLite database")?;
    conn.busy_timeout(settings.busy_timeout)
        .context("failed to set busy timeout")?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        .context("failed to enable WAL journal")?;
    ensure_schema(&conn)?;

    debug!(path = %settings.path.display(), "songbook store opened");
    Ok(conn)
}

/// Private in-memory store, used by tests and throwaway tooling.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    ensure_schema(&conn)?;
    Ok(conn)
}

/// Create the tables when missing. The function also toggles
/// `PRAGMA foreign_keys = ON` so cascades behave the same in tests and in
/// production runs.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])
        .context("failed to enable foreign keys")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS songbooks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            owner_id INTEGER NOT NULL,
            visibility TEXT NOT NULL CHECK (visibility IN ('public', 'private')),
            slug TEXT NOT NULL
        )",
        [],
    )
    .context("failed to create songbooks table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS artists (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            slug TEXT NOT NULL
        )",
        [],
    )
    .context("failed to create artists table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS songs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            artist_id INTEGER,
            link TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(artist_id) REFERENCES artists(id) ON DELETE SET NULL
        )",
        [],
    )
    .context("failed to create songs table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            songbook_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(songbook_id) REFERENCES songbooks(id) ON DELETE CASCADE
        )",
        [],
    )
    .context("failed to create sections table")?;

    // Ranks are staged through negative values while a songbook is being
    // re-densified, so there is no CHECK on the sign here.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS item_slots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            songbook_id INTEGER NOT NULL,
            rank INTEGER NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('song', 'section')),
            song_id INTEGER,
            section_id INTEGER,
            UNIQUE (songbook_id, rank),
            UNIQUE (songbook_id, song_id),
            CHECK ((kind = 'song') = (song_id IS NOT NULL)),
            CHECK ((kind = 'section') = (section_id IS NOT NULL)),
            FOREIGN KEY(songbook_id) REFERENCES songbooks(id) ON DELETE CASCADE,
            FOREIGN KEY(song_id) REFERENCES songs(id) ON DELETE CASCADE,
            FOREIGN KEY(section_id) REFERENCES sections(id) ON DELETE CASCADE
        )",
        [],
    )
    .context("failed to create item_slots table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS layouts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            options TEXT NOT NULL DEFAULT '{}'
        )",
        [],
    )
    .context("failed to create layouts table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS render_tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            songbook_id INTEGER NOT NULL,
            layout_id INTEGER NOT NULL,
            state TEXT NOT NULL CHECK (state IN ('queued', 'running', 'finished', 'error')),
            fingerprint TEXT NOT NULL,
            result TEXT NOT NULL DEFAULT '{}',
            cycle INTEGER NOT NULL DEFAULT 1,
            dispatched INTEGER NOT NULL DEFAULT 0,
            started_at TEXT,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (songbook_id, layout_id),
            FOREIGN KEY(songbook_id) REFERENCES songbooks(id) ON DELETE CASCADE,
            FOREIGN KEY(layout_id) REFERENCES layouts(id) ON DELETE CASCADE
        )",
        [],
    )
    .context("failed to create render_tasks table")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn schema_bootstrap_is_idempotent() {
        let conn = open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('songbooks', 'artists', 'songs', 'sections',
                              'item_slots', 'layouts', 'render_tasks')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 7);
    }

    #[test]
    fn open_creates_missing_directories() {
        let dir = TempDir::new().expect("temp dir");
        let settings = StoreSettings::at(dir.path().join("nested").join("books.sqlite"));
        open(&settings).unwrap();
        assert!(settings.path.exists());
    }
}
