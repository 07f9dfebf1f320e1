//! Worker side of the render pipeline. The engine that actually compiles a
//! songbook is external; this module moves a task through its states around
//! one engine call and records the outcome.

use std::sync::mpsc::Receiver;

use anyhow::Result;
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::db::{self, TaskOutcome};
use crate::error::SongbookError;
use crate::models::{ItemSlot, Layout, RenderTask, Songbook};

/// Everything an engine needs to render one cycle.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub task: RenderTask,
    pub songbook: Songbook,
    pub items: Vec<ItemSlot>,
    pub layout: Layout,
}

/// The external document compiler. Failures are reported as a message and
/// end up in the task's result payload; they never abort the worker.
pub trait RenderEngine {
    fn render(&self, job: &RenderJob) -> Result<Value, String>;
}

pub struct RenderWorker<E> {
    engine: E,
}

impl<E: RenderEngine> RenderWorker<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    /// Run one delivery of `task_id`. Storage failures propagate; engine
    /// failures become an `Error` task. A delivery for a cycle that a newer
    /// request superseded is dropped and the current row is returned.
    pub fn process(&self, conn: &Connection, task_id: i64) -> Result<RenderTask> {
        let task = db::start_task(conn, task_id)?;
        let job = RenderJob {
            songbook: db::fetch_songbook(conn, task.songbook_id)?,
            items: db::fetch_items(conn, task.songbook_id)?,
            layout: db::fetch_layout(conn, task.layout_id)?,
            task,
        };

        let (outcome, payload) = match self.engine.render(&job) {
            Ok(payload) => (TaskOutcome::Finished, payload),
            Err(message) => {
                warn!(task_id, error = %message, "render engine failed");
                (TaskOutcome::Error, json!({ "error": message }))
            }
        };

        match db::complete_task(conn, task_id, job.task.cycle, outcome, &payload) {
            Ok(task) => Ok(task),
            Err(err) if matches!(
                SongbookError::from_anyhow(&err),
                Some(SongbookError::StaleCycle { .. })
            ) =>
            {
                db::fetch_task(conn, task_id)
            }
            Err(err) => Err(err),
        }
    }

    /// Process task ids until every sender of the channel is dropped. A task
    /// that cannot be processed is logged and skipped so one bad row does not
    /// stall the queue.
    pub fn drain(&self, conn: &Connection, receiver: &Receiver<i64>) -> usize {
        let mut processed = 0;
        for task_id in receiver.iter() {
            match self.process(conn, task_id) {
                Ok(task) => {
                    processed += 1;
                    info!(task_id, state = %task.state, "render delivery handled");
                }
                Err(err) => warn!(task_id, error = %err, "render delivery skipped"),
            }
        }
        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_layout, create_songbook, open_in_memory};
    use crate::models::{LayoutOptions, TaskState, Visibility};
    use crate::scheduler::{ChannelQueue, RenderScheduler};

    struct CountingEngine;

    impl RenderEngine for CountingEngine {
        fn render(&self, job: &RenderJob) -> Result<Value, String> {
            if job.items.is_empty() {
                return Err("nothing to render".into());
            }
            Ok(json!({
                "file": format!("{}.pdf", job.songbook.slug),
                "items": job.items.len(),
            }))
        }
    }

    #[test]
    fn queued_task_is_rendered_and_recorded() {
        let mut conn = open_in_memory().unwrap();
        let book = create_songbook(&conn, 1, "Fête", "", Visibility::Public).unwrap();
        let layout = create_layout(&conn, 1, "Default", LayoutOptions::new()).unwrap();
        db::add_section(&mut conn, book.id, "Intro").unwrap();

        let (sender, receiver) = std::sync::mpsc::channel();
        let scheduler = RenderScheduler::new(ChannelQueue::new(sender));
        let task = scheduler.request_render(&mut conn, book.id, layout.id, false).unwrap();
        drop(scheduler);

        let worker = RenderWorker::new(CountingEngine);
        assert_eq!(worker.drain(&conn, &receiver), 1);

        let done = db::fetch_task(&conn, task.id).unwrap();
        assert_eq!(done.state, TaskState::Finished);
        assert_eq!(done.result, json!({ "file": "fete.pdf", "items": 1 }));
    }

    #[test]
    fn engine_failure_becomes_error_state() {
        let mut conn = open_in_memory().unwrap();
        let book = create_songbook(&conn, 1, "Empty", "", Visibility::Public).unwrap();
        let layout = create_layout(&conn, 1, "Default", LayoutOptions::new()).unwrap();

        let (sender, _receiver) = std::sync::mpsc::channel();
        let scheduler = RenderScheduler::new(ChannelQueue::new(sender));
        let task = scheduler.request_render(&mut conn, book.id, layout.id, false).unwrap();

        let done = RenderWorker::new(CountingEngine).process(&conn, task.id).unwrap();
        assert_eq!(done.state, TaskState::Error);
        assert_eq!(done.result, json!({ "error": "nothing to render" }));
    }

    #[test]
    fn unknown_task_is_skipped_by_drain() {
        let conn = open_in_memory().unwrap();
        let (sender, receiver) = std::sync::mpsc::channel();
        sender.send(77).unwrap();
        drop(sender);
        assert_eq!(RenderWorker::new(CountingEngine).drain(&conn, &receiver), 0);
    }
}
