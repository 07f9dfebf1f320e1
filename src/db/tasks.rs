//! Render task rows and the worker-side state transitions.
//!
//! Transitions are compare-and-swap updates keyed on the expected state (and
//! cycle, for completion), so a worker still holding a superseded cycle can
//! never overwrite the outcome of a newer one.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::SongbookError;
use crate::models::{RenderTask, TaskState};

const COLUMNS: &str =
    "id, songbook_id, layout_id, state, fingerprint, result, cycle, dispatched";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<(RenderTask, String)> {
    let result: String = row.get(5)?;
    Ok((
        RenderTask {
            id: row.get(0)?,
            songbook_id: row.get(1)?,
            layout_id: row.get(2)?,
            state: row.get(3)?,
            fingerprint: row.get(4)?,
            result: Value::Null,
            cycle: row.get(6)?,
            dispatched: row.get(7)?,
        },
        result,
    ))
}

fn hydrate((mut task, result): (RenderTask, String)) -> Result<RenderTask> {
    task.result = serde_json::from_str(&result)
        .with_context(|| format!("render task {} has a malformed result", task.id))?;
    Ok(task)
}

/// The task for a `(songbook, layout)` pair, if one was ever requested.
pub fn find_task(conn: &Connection, songbook_id: i64, layout_id: i64) -> Result<Option<RenderTask>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM render_tasks WHERE songbook_id = ?1 AND layout_id = ?2"),
        params![songbook_id, layout_id],
        task_from_row,
    )
    .optional()
    .context("failed to load render task")?
    .map(hydrate)
    .transpose()
}

pub fn fetch_task(conn: &Connection, task_id: i64) -> Result<RenderTask> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM render_tasks WHERE id = ?1"),
            params![task_id],
            task_from_row,
        )
        .optional()
        .context("failed to load render task")?
        .ok_or(SongbookError::not_found("render task", task_id))?;
    hydrate(row)
}

/// Every task of a songbook, one per layout it was rendered with.
pub fn fetch_tasks_for_songbook(conn: &Connection, songbook_id: i64) -> Result<Vec<RenderTask>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM render_tasks WHERE songbook_id = ?1 ORDER BY layout_id"
        ))
        .context("failed to prepare songbook tasks query")?;

    let rows = stmt
        .query_map([songbook_id], task_from_row)
        .context("failed to iterate songbook tasks")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect songbook tasks")?;

    rows.into_iter().map(hydrate).collect()
}

/// Start a new queued cycle for the pair: create the row or restart the
/// existing one with an empty result, the given fingerprint and a bumped
/// cycle. The dispatch is claimed in the same statement. Must run inside the
/// caller's transaction.
pub(crate) fn upsert_queued(
    conn: &Connection,
    songbook_id: i64,
    layout_id: i64,
    fingerprint: &str,
) -> Result<RenderTask> {
    conn.execute(
        "INSERT INTO render_tasks (songbook_id, layout_id, state, fingerprint, result, cycle, dispatched)
         VALUES (?1, ?2, 'queued', ?3, '{}', 1, 1)
         ON CONFLICT (songbook_id, layout_id) DO UPDATE SET
             state = 'queued',
             fingerprint = excluded.fingerprint,
             result = '{}',
             cycle = render_tasks.cycle + 1,
             dispatched = 1,
             updated_at = CURRENT_TIMESTAMP",
        params![songbook_id, layout_id, fingerprint],
    )
    .context("failed to queue render task")?;

    find_task(conn, songbook_id, layout_id)?
        .ok_or_else(|| anyhow::anyhow!("render task vanished right after being queued"))
}

/// Claim the dispatch of a queued task whose earlier hand-off failed.
/// Returns `false` when another caller claimed it first.
pub(crate) fn claim_dispatch(conn: &Connection, task_id: i64, cycle: i64) -> Result<bool> {
    let claimed = conn
        .execute(
            "UPDATE render_tasks SET dispatched = 1
             WHERE id = ?1 AND cycle = ?2 AND state = 'queued' AND dispatched = 0",
            params![task_id, cycle],
        )
        .context("failed to claim render dispatch")?;
    Ok(claimed == 1)
}

/// Give the dispatch claim back so a later request can retry the hand-off.
pub(crate) fn release_dispatch(conn: &Connection, task_id: i64, cycle: i64) -> Result<()> {
    conn.execute(
        "UPDATE render_tasks SET dispatched = 0
         WHERE id = ?1 AND cycle = ?2 AND state = 'queued'",
        params![task_id, cycle],
    )
    .context("failed to release render dispatch")?;
    Ok(())
}

/// Worker transition `Queued -> Running`. Starting an already running task is
/// tolerated (queues may deliver twice) and returns it unchanged.
pub fn start_task(conn: &Connection, task_id: i64) -> Result<RenderTask> {
    let updated = conn
        .execute(
            "UPDATE render_tasks SET state = 'running',
                 started_at = COALESCE(started_at, CURRENT_TIMESTAMP),
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND state = 'queued'",
            params![task_id],
        )
        .context("failed to start render task")?;

    let task = fetch_task(conn, task_id)?;
    match (updated, task.state) {
        (1, _) => {
            info!(task_id, cycle = task.cycle, "render task started");
            Ok(task)
        }
        (_, TaskState::Running) => {
            debug!(task_id, cycle = task.cycle, "render task already running");
            Ok(task)
        }
        (_, from) => Err(SongbookError::InvalidTransition {
            from,
            to: TaskState::Running,
        }
        .into()),
    }
}

/// Final state a worker reports for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Finished,
    Error,
}

impl TaskOutcome {
    pub fn state(self) -> TaskState {
        match self {
            TaskOutcome::Finished => TaskState::Finished,
            TaskOutcome::Error => TaskState::Error,
        }
    }
}

/// Worker transition `Running -> {Finished, Error}` for one cycle. Reporting
/// the same outcome twice is a no-op; reporting for a cycle that a newer
/// request superseded fails with [`SongbookError::StaleCycle`].
pub fn complete_task(
    conn: &Connection,
    task_id: i64,
    cycle: i64,
    outcome: TaskOutcome,
    result: &Value,
) -> Result<RenderTask> {
    let target = outcome.state();
    let encoded = serde_json::to_string(result).context("failed to encode render result")?;

    let updated = conn
        .execute(
            "UPDATE render_tasks SET state = ?1, result = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?3 AND cycle = ?4 AND state = 'running'",
            params![target, encoded, task_id, cycle],
        )
        .context("failed to complete render task")?;

    let task = fetch_task(conn, task_id)?;
    if updated == 1 {
        info!(task_id, cycle, state = %target, "render task completed");
        return Ok(task);
    }
    if task.cycle != cycle {
        warn!(task_id, cycle, current_cycle = task.cycle, "dropping result of superseded render");
        return Err(SongbookError::StaleCycle { task_id, cycle }.into());
    }
    if task.state == target {
        debug!(task_id, cycle, state = %target, "render task completion repeated");
        return Ok(task);
    }
    Err(SongbookError::InvalidTransition {
        from: task.state,
        to: target,
    }
    .into())
}
