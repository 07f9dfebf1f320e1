use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::SongbookError;
use crate::layout::validate_options;
use crate::models::{Layout, LayoutOptions};

fn layout_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, i64, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn hydrate((id, owner_id, name, options): (i64, i64, String, String)) -> Result<Layout> {
    let options: LayoutOptions = serde_json::from_str(&options)
        .with_context(|| format!("layout {id} has malformed options"))?;
    Ok(Layout {
        id,
        owner_id,
        name,
        options,
    })
}

fn validate(name: &str, options: &LayoutOptions) -> Result<()> {
    if name.trim().is_empty() {
        return Err(SongbookError::validation("Layout name cannot be empty.").into());
    }
    validate_options(options)?;
    Ok(())
}

pub fn create_layout(
    conn: &Connection,
    owner_id: i64,
    name: &str,
    options: LayoutOptions,
) -> Result<Layout> {
    validate(name, &options)?;
    let encoded = serde_json::to_string(&options).context("failed to encode layout options")?;

    conn.execute(
        "INSERT INTO layouts (owner_id, name, options) VALUES (?1, ?2, ?3)",
        params![owner_id, name, encoded],
    )
    .context("failed to insert layout")?;

    Ok(Layout {
        id: conn.last_insert_rowid(),
        owner_id,
        name: name.to_string(),
        options,
    })
}

pub fn fetch_layout(conn: &Connection, id: i64) -> Result<Layout> {
    let row = conn
        .query_row(
            "SELECT id, owner_id, name, options FROM layouts WHERE id = ?1",
            params![id],
            layout_from_row,
        )
        .optional()
        .context("failed to load layout")?
        .ok_or(SongbookError::not_found("layout", id))?;
    hydrate(row)
}

pub fn fetch_layouts_for_owner(conn: &Connection, owner_id: i64) -> Result<Vec<Layout>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, owner_id, name, options FROM layouts
             WHERE owner_id = ?1
             ORDER BY name COLLATE NOCASE, id",
        )
        .context("failed to prepare layouts query")?;

    let rows = stmt
        .query_map([owner_id], layout_from_row)
        .context("failed to iterate layouts")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect layouts")?;

    rows.into_iter().map(hydrate).collect()
}

fn layout_exists(conn: &Connection, id: i64) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM layouts WHERE id = ?1)",
        [id],
        |row| row.get(0),
    )
    .context("failed to look up layout")
}

/// Rewrite a layout that no render has started with yet. The lock is checked
/// by the `UPDATE` itself, so a worker starting a task on another connection
/// cannot slip in between check and write. `started_at` survives requeues, so
/// a layout stays locked across later cycles.
pub fn update_layout(
    conn: &Connection,
    id: i64,
    name: &str,
    options: LayoutOptions,
) -> Result<Layout> {
    validate(name, &options)?;
    let encoded = serde_json::to_string(&options).context("failed to encode layout options")?;

    let updated = conn
        .execute(
            "UPDATE layouts SET name = ?1, options = ?2
             WHERE id = ?3
               AND NOT EXISTS (
                   SELECT 1 FROM render_tasks
                   WHERE layout_id = ?3 AND started_at IS NOT NULL
               )",
            params![name, encoded, id],
        )
        .context("failed to update layout")?;
    if updated == 0 {
        if layout_exists(conn, id)? {
            return Err(SongbookError::LayoutLocked { id }.into());
        }
        return Err(SongbookError::not_found("layout", id).into());
    }
    fetch_layout(conn, id)
}

/// Remove a layout; its render tasks cascade away with it.
pub fn delete_layout(conn: &Connection, id: i64) -> Result<()> {
    let deleted = conn
        .execute("DELETE FROM layouts WHERE id = ?1", params![id])
        .context("failed to delete layout")?;

    if deleted == 0 {
        Err(SongbookError::not_found("layout", id).into())
    } else {
        Ok(())
    }
}
