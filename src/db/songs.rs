use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::db::items::renumber;
use crate::db::songbooks::derive_slug;
use crate::error::SongbookError;
use crate::models::{Artist, Song};

fn song_from_row(row: &Row<'_>) -> rusqlite::Result<Song> {
    Ok(Song {
        id: row.get(0)?,
        title: row.get(1)?,
        artist_id: row.get(2)?,
        link: row.get(3)?,
    })
}

/// Insert an artist. Artists only exist to group songs, so the row is small.
pub fn create_artist(conn: &Connection, name: &str) -> Result<Artist> {
    if name.trim().is_empty() {
        return Err(SongbookError::validation("Artist name cannot be empty.").into());
    }
    let slug = derive_slug(name, "artist");

    conn.execute(
        "INSERT INTO artists (name, slug) VALUES (?1, ?2)",
        params![name, slug],
    )
    .context("failed to insert artist")?;

    Ok(Artist {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        slug,
    })
}

pub fn fetch_artist(conn: &Connection, id: i64) -> Result<Artist> {
    conn.query_row(
        "SELECT id, name, slug FROM artists WHERE id = ?1",
        params![id],
        |row| {
            Ok(Artist {
                id: row.get(0)?,
                name: row.get(1)?,
                slug: row.get(2)?,
            })
        },
    )
    .optional()
    .context("failed to load artist")?
    .ok_or_else(|| SongbookError::not_found("artist", id).into())
}

/// Insert a brand new song. We echo the hydrated struct so callers can keep
/// working without re-querying the database.
pub fn create_song(
    conn: &Connection,
    title: &str,
    artist_id: Option<i64>,
    link: &str,
) -> Result<Song> {
    if title.trim().is_empty() {
        return Err(SongbookError::validation("Song title cannot be empty.").into());
    }

    conn.execute(
        "INSERT INTO songs (title, artist_id, link) VALUES (?1, ?2, ?3)",
        params![title, artist_id, link],
    )
    .context("failed to insert song")?;

    Ok(Song {
        id: conn.last_insert_rowid(),
        title: title.to_string(),
        artist_id,
        link: link.to_string(),
    })
}

pub fn fetch_song(conn: &Connection, id: i64) -> Result<Option<Song>> {
    conn.query_row(
        "SELECT id, title, artist_id, link FROM songs WHERE id = ?1",
        params![id],
        song_from_row,
    )
    .optional()
    .context("failed to load song")
}

/// Fetch the whole catalogue, ordered case-insensitively by title.
pub fn fetch_all_songs(conn: &Connection) -> Result<Vec<Song>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title, artist_id, link
             FROM songs
             ORDER BY title COLLATE NOCASE, id",
        )
        .context("failed to prepare all songs query")?;

    let songs = stmt
        .query_map([], song_from_row)
        .context("failed to iterate songs")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect songs")?;

    Ok(songs)
}

/// Songs credited to an artist, in the order they get appended when a whole
/// artist is added to a songbook.
pub fn fetch_songs_for_artist(conn: &Connection, artist_id: i64) -> Result<Vec<Song>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title, artist_id, link
             FROM songs
             WHERE artist_id = ?1
             ORDER BY title COLLATE NOCASE, id",
        )
        .context("failed to prepare artist songs query")?;

    let songs = stmt
        .query_map([artist_id], song_from_row)
        .context("failed to iterate artist songs")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect artist songs")?;

    Ok(songs)
}

/// Permanently delete a song. Its slots cascade away, so every songbook that
/// referenced it is re-densified inside the same transaction.
pub fn delete_song(conn: &mut Connection, id: i64) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("failed to start song deletion")?;

    let songbooks = {
        let mut stmt = tx
            .prepare("SELECT songbook_id FROM item_slots WHERE song_id = ?1")
            .context("failed to prepare referencing songbooks query")?;
        let ids = stmt
            .query_map([id], |row| row.get::<_, i64>(0))
            .context("failed to iterate referencing songbooks")?
            .collect::<Result<Vec<_>, _>>()
            .context("failed to collect referencing songbooks")?;
        ids
    };

    let deleted = tx
        .execute("DELETE FROM songs WHERE id = ?1", params![id])
        .context("failed to delete song")?;
    if deleted == 0 {
        return Err(SongbookError::not_found("song", id).into());
    }

    for songbook_id in songbooks {
        renumber(&tx, songbook_id)?;
    }
    tx.commit().context("failed to commit song deletion")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{add_items, create_songbook, fetch_items, open_in_memory, AddRequest};
    use crate::models::Visibility;

    #[test]
    fn artist_songs_are_sorted_by_title() {
        let conn = open_in_memory().unwrap();
        let artist = create_artist(&conn, "Georges Brassens").unwrap();
        assert_eq!(artist.slug, "georges-brassens");
        create_song(&conn, "la mauvaise réputation", Some(artist.id), "").unwrap();
        create_song(&conn, "Chanson pour l'Auvergnat", Some(artist.id), "").unwrap();
        create_song(&conn, "Unrelated", None, "").unwrap();

        let titles: Vec<_> = fetch_songs_for_artist(&conn, artist.id)
            .unwrap()
            .into_iter()
            .map(|s| s.title)
            .collect();
        assert_eq!(titles, vec!["Chanson pour l'Auvergnat", "la mauvaise réputation"]);
        assert_eq!(fetch_all_songs(&conn).unwrap().len(), 3);
    }

    #[test]
    fn artists_are_fetched_by_id() {
        let conn = open_in_memory().unwrap();
        let artist = create_artist(&conn, "Barbara").unwrap();
        assert_eq!(fetch_artist(&conn, artist.id).unwrap(), artist);

        let err = fetch_artist(&conn, 42).unwrap_err();
        assert_eq!(
            SongbookError::from_anyhow(&err),
            Some(&SongbookError::not_found("artist", 42))
        );
    }

    #[test]
    fn unknown_song_is_none() {
        let mut conn = open_in_memory().unwrap();
        assert_eq!(fetch_song(&conn, 99).unwrap(), None);
        assert!(delete_song(&mut conn, 99).is_err());
    }

    #[test]
    fn deleting_a_song_closes_the_gap_it_leaves() {
        let mut conn = open_in_memory().unwrap();
        let book = create_songbook(&conn, 1, "Book", "", Visibility::Private).unwrap();
        let ids: Vec<i64> = ["A", "B", "C"]
            .iter()
            .map(|t| create_song(&conn, t, None, "").unwrap().id)
            .collect();
        add_items(&mut conn, book.id, &AddRequest::songs(ids.clone())).unwrap();

        delete_song(&mut conn, ids[1]).unwrap();

        let slots = fetch_items(&conn, book.id).unwrap();
        let ranks: Vec<_> = slots.iter().map(|s| s.rank).collect();
        assert_eq!(ranks, vec![0, 1]);
    }
}
