//! Render scheduling: decide whether the task on file for a
//! `(songbook, layout)` pair is still valid and, if not, queue exactly one
//! new cycle and hand it to the worker queue.
//!
//! The cache key is the content fingerprint, not a timestamp. Edits to other
//! songbooks or edits reverted before a request never cause a rebuild, and a
//! repeated request for unchanged content costs one read.

use std::sync::mpsc::Sender;

use anyhow::{anyhow, Context, Result};
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::db::{self, find_task};
use crate::fingerprint::Fingerprint;
use crate::models::RenderTask;

/// Hand-off point to the external render workers. Delivery may be
/// at-least-once; the task state machine tolerates redundant deliveries.
pub trait RenderQueue {
    fn dispatch(&self, task_id: i64) -> Result<()>;
}

impl<Q: RenderQueue + ?Sized> RenderQueue for &Q {
    fn dispatch(&self, task_id: i64) -> Result<()> {
        (**self).dispatch(task_id)
    }
}

/// In-process queue over a channel; the receiving end feeds
/// [`crate::worker::RenderWorker::drain`].
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    sender: Sender<i64>,
}

impl ChannelQueue {
    pub fn new(sender: Sender<i64>) -> Self {
        Self { sender }
    }
}

impl RenderQueue for ChannelQueue {
    fn dispatch(&self, task_id: i64) -> Result<()> {
        self.sender
            .send(task_id)
            .map_err(|_| anyhow!("render queue receiver is gone"))
    }
}

/// Why the scheduler queued (or did not queue) a new cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No task existed for the pair.
    Created,
    /// The stored fingerprint no longer matches the content.
    ContentChanged,
    /// Terminal task re-run on explicit request.
    Forced,
    /// Queued task whose earlier hand-off failed; dispatched again.
    Redispatched,
    /// Existing task is current; returned untouched.
    Reused,
}

/// Pure rebuild rule. Fingerprint mismatch always rebuilds; `force` only
/// applies to tasks that already reached a terminal state.
pub fn needs_build(
    existing: Option<&RenderTask>,
    current: &Fingerprint,
    force: bool,
) -> Decision {
    match existing {
        None => Decision::Created,
        Some(task) if task.stored_fingerprint() != *current => Decision::ContentChanged,
        Some(task) if force && task.state.is_terminal() => Decision::Forced,
        Some(_) => Decision::Reused,
    }
}

pub struct RenderScheduler<Q> {
    queue: Q,
}

impl<Q: RenderQueue> RenderScheduler<Q> {
    pub fn new(queue: Q) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Return the render task for the pair, queueing and dispatching a new
    /// cycle when the cached one cannot be reused. Never waits for the
    /// render itself.
    pub fn request_render(
        &self,
        conn: &mut Connection,
        songbook_id: i64,
        layout_id: i64,
        force: bool,
    ) -> Result<RenderTask> {
        let (task, decision) = self.decide(conn, songbook_id, layout_id, force)?;

        match decision {
            Decision::Reused => {
                debug!(task_id = task.id, state = %task.state, "render task reused");
                return Ok(task);
            }
            decision => info!(
                task_id = task.id,
                songbook_id,
                layout_id,
                cycle = task.cycle,
                ?decision,
                "render task queued"
            ),
        }

        if let Err(err) = self.queue.dispatch(task.id) {
            warn!(task_id = task.id, cycle = task.cycle, error = %err, "render dispatch failed");
            db::tasks::release_dispatch(conn, task.id, task.cycle)?;
            return db::fetch_task(conn, task.id);
        }
        Ok(task)
    }

    /// Read-check-upsert under one `IMMEDIATE` transaction. The write lock is
    /// taken before the read, so concurrent requesters serialize here and the
    /// later one sees the earlier one's queued cycle.
    fn decide(
        &self,
        conn: &mut Connection,
        songbook_id: i64,
        layout_id: i64,
        force: bool,
    ) -> Result<(RenderTask, Decision)> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start render request")?;

        db::fetch_songbook(&tx, songbook_id)?;
        db::fetch_layout(&tx, layout_id)?;

        let current = db::songbook_fingerprint(&tx, songbook_id)?;
        let existing = find_task(&tx, songbook_id, layout_id)?;

        let decision = needs_build(existing.as_ref(), &current, force);
        let outcome = match existing {
            Some(task) if decision == Decision::Reused => {
                if db::tasks::claim_dispatch(&tx, task.id, task.cycle)? {
                    (db::fetch_task(&tx, task.id)?, Decision::Redispatched)
                } else {
                    (task, Decision::Reused)
                }
            }
            _ => {
                let task = db::tasks::upsert_queued(&tx, songbook_id, layout_id, current.as_str())?;
                (task, decision)
            }
        };

        tx.commit().context("failed to commit render request")?;
        Ok(outcome)
    }
}
