use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use slug::slugify;

use crate::error::SongbookError;
use crate::models::{Songbook, Visibility};

const COLUMNS: &str = "id, title, description, owner_id, visibility, slug";

/// How the slug in an incoming URL compared with the songbook's current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlugMatch {
    Current,
    /// The songbook was renamed since the URL was produced; callers usually
    /// redirect to the current slug.
    Stale,
}

/// Derive the URL slug for a title. Titles made only of symbols fall back to
/// `fallback` so every row still gets a usable, non-empty slug.
pub(crate) fn derive_slug(title: &str, fallback: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        fallback.to_string()
    } else {
        slug
    }
}

fn require_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(SongbookError::validation("Songbook title cannot be empty.").into());
    }
    Ok(())
}

fn songbook_from_row(row: &Row<'_>) -> rusqlite::Result<Songbook> {
    Ok(Songbook {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        owner_id: row.get(3)?,
        visibility: row.get(4)?,
        slug: row.get(5)?,
    })
}

/// Insert a new songbook, returning the hydrated struct.
pub fn create_songbook(
    conn: &Connection,
    owner_id: i64,
    title: &str,
    description: &str,
    visibility: Visibility,
) -> Result<Songbook> {
    require_title(title)?;
    let slug = derive_slug(title, "songbook");

    conn.execute(
        "INSERT INTO songbooks (title, description, owner_id, visibility, slug)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![title, description, owner_id, visibility, slug],
    )
    .context("failed to insert songbook")?;

    Ok(Songbook {
        id: conn.last_insert_rowid(),
        title: title.to_string(),
        description: description.to_string(),
        owner_id,
        visibility,
        slug,
    })
}

/// Update the editable songbook fields. The slug is recomputed from the new
/// title every time, so renames immediately produce fresh URLs.
pub fn update_songbook(
    conn: &Connection,
    id: i64,
    title: &str,
    description: &str,
    visibility: Visibility,
) -> Result<Songbook> {
    require_title(title)?;
    let slug = derive_slug(title, "songbook");

    let updated = conn
        .execute(
            "UPDATE songbooks SET title = ?1, description = ?2, visibility = ?3, slug = ?4
             WHERE id = ?5",
            params![title, description, visibility, slug, id],
        )
        .context("failed to update songbook")?;

    if updated == 0 {
        return Err(SongbookError::not_found("songbook", id).into());
    }
    fetch_songbook(conn, id)
}

/// Remove a songbook. The schema cascades to slots, sections and render
/// tasks, so nothing else needs cleaning up.
pub fn delete_songbook(conn: &Connection, id: i64) -> Result<()> {
    let deleted = conn
        .execute("DELETE FROM songbooks WHERE id = ?1", params![id])
        .context("failed to delete songbook")?;

    if deleted == 0 {
        Err(SongbookError::not_found("songbook", id).into())
    } else {
        Ok(())
    }
}

pub fn fetch_songbook(conn: &Connection, id: i64) -> Result<Songbook> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM songbooks WHERE id = ?1"),
        params![id],
        songbook_from_row,
    )
    .optional()
    .context("failed to load songbook")?
    .ok_or_else(|| SongbookError::not_found("songbook", id).into())
}

/// Resolve a songbook from a `(id, slug)` URL pair. The id is authoritative;
/// the slug is only compared so links created before a rename keep working.
pub fn find_songbook(conn: &Connection, id: i64, slug: &str) -> Result<(Songbook, SlugMatch)> {
    let songbook = fetch_songbook(conn, id)?;
    let matched = if songbook.slug == slug {
        SlugMatch::Current
    } else {
        SlugMatch::Stale
    };
    Ok((songbook, matched))
}

/// Every public songbook, ordered by title.
pub fn fetch_public_songbooks(conn: &Connection) -> Result<Vec<Songbook>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM songbooks WHERE visibility = 'public'
             ORDER BY title COLLATE NOCASE, id"
        ))
        .context("failed to prepare public songbooks query")?;

    let songbooks = stmt
        .query_map([], songbook_from_row)
        .context("failed to iterate public songbooks")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect public songbooks")?;

    Ok(songbooks)
}

/// Songbooks belonging to one owner regardless of visibility.
pub fn fetch_songbooks_for_owner(conn: &Connection, owner_id: i64) -> Result<Vec<Songbook>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM songbooks WHERE owner_id = ?1
             ORDER BY title COLLATE NOCASE, id"
        ))
        .context("failed to prepare owner songbooks query")?;

    let songbooks = stmt
        .query_map([owner_id], songbook_from_row)
        .context("failed to iterate owner songbooks")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect owner songbooks")?;

    Ok(songbooks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    #[test]
    fn slug_follows_title_and_rename() {
        let conn = open_in_memory().unwrap();
        let book = create_songbook(&conn, 1, "Chants de Noël", "", Visibility::Private).unwrap();
        assert_eq!(book.slug, "chants-de-noel");

        let renamed =
            update_songbook(&conn, book.id, "Summer Camp 2024", "", Visibility::Public).unwrap();
        assert_eq!(renamed.slug, "summer-camp-2024");
        assert_eq!(renamed.visibility, Visibility::Public);
    }

    #[test]
    fn stale_slug_still_resolves() {
        let conn = open_in_memory().unwrap();
        let book = create_songbook(&conn, 1, "Old name", "", Visibility::Public).unwrap();
        update_songbook(&conn, book.id, "New name", "", Visibility::Public).unwrap();

        let (found, matched) = find_songbook(&conn, book.id, "old-name").unwrap();
        assert_eq!(found.slug, "new-name");
        assert_eq!(matched, SlugMatch::Stale);

        let (_, matched) = find_songbook(&conn, book.id, "new-name").unwrap();
        assert_eq!(matched, SlugMatch::Current);
    }

    #[test]
    fn symbol_only_title_gets_fallback_slug() {
        let conn = open_in_memory().unwrap();
        let book = create_songbook(&conn, 1, "!!!", "", Visibility::Private).unwrap();
        assert_eq!(book.slug, "songbook");
    }

    #[test]
    fn empty_title_is_a_validation_error() {
        let conn = open_in_memory().unwrap();
        let err = create_songbook(&conn, 1, "  ", "", Visibility::Private).unwrap_err();
        assert!(matches!(
            SongbookError::from_anyhow(&err),
            Some(SongbookError::Validation { .. })
        ));
    }

    #[test]
    fn listings_respect_visibility_and_owner() {
        let conn = open_in_memory().unwrap();
        create_songbook(&conn, 1, "b private", "", Visibility::Private).unwrap();
        create_songbook(&conn, 1, "A public", "", Visibility::Public).unwrap();
        create_songbook(&conn, 2, "c public", "", Visibility::Public).unwrap();

        let public: Vec<_> = fetch_public_songbooks(&conn)
            .unwrap()
            .into_iter()
            .map(|b| b.title)
            .collect();
        assert_eq!(public, vec!["A public", "c public"]);

        let mine: Vec<_> = fetch_songbooks_for_owner(&conn, 1)
            .unwrap()
            .into_iter()
            .map(|b| b.title)
            .collect();
        assert_eq!(mine, vec!["A public", "b private"]);
    }

    #[test]
    fn missing_songbook_is_not_found() {
        let conn = open_in_memory().unwrap();
        let err = delete_songbook(&conn, 42).unwrap_err();
        assert_eq!(
            SongbookError::from_anyhow(&err),
            Some(&SongbookError::not_found("songbook", 42))
        );
    }
}
