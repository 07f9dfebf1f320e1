use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;

use songbook_manager::db::{self, AddRequest};
use songbook_manager::{
    ChannelQueue, LayoutOptions, RenderScheduler, RenderTask, StoreSettings, TaskState, Visibility,
};
use tempfile::TempDir;

struct Store {
    _dir: TempDir,
    settings: StoreSettings,
    songbook: i64,
    layout: i64,
    song: i64,
}

fn store() -> Store {
    let dir = TempDir::new().expect("temp dir");
    let settings = StoreSettings::at(dir.path().join("songbooks.sqlite"));
    let mut conn = db::open(&settings).expect("open store");

    let songbook = db::create_songbook(&conn, 1, "Shared", "", Visibility::Private).unwrap();
    let layout = db::create_layout(&conn, 1, "Default", LayoutOptions::new()).unwrap();
    let song = db::create_song(&conn, "Le temps des cerises", None, "").unwrap();
    let first = db::create_song(&conn, "Opening", None, "").unwrap();
    db::add_items(&mut conn, songbook.id, &AddRequest::songs(vec![first.id])).unwrap();

    Store {
        _dir: dir,
        settings,
        songbook: songbook.id,
        layout: layout.id,
        song: song.id,
    }
}

#[test]
fn concurrent_render_requests_queue_one_task() {
    let store = store();
    let (sender, receiver) = mpsc::channel();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let settings = store.settings.clone();
            let sender = sender.clone();
            let barrier = Arc::clone(&barrier);
            let (songbook, layout) = (store.songbook, store.layout);
            thread::spawn(move || -> RenderTask {
                let mut conn = db::open(&settings).expect("open store");
                let scheduler = RenderScheduler::new(ChannelQueue::new(sender));
                barrier.wait();
                scheduler
                    .request_render(&mut conn, songbook, layout, false)
                    .expect("render request")
            })
        })
        .collect();

    let tasks: Vec<RenderTask> = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread panicked"))
        .collect();
    drop(sender);

    assert_eq!(tasks[0].id, tasks[1].id);
    assert_eq!(receiver.iter().collect::<Vec<_>>(), vec![tasks[0].id]);

    let conn = db::open(&store.settings).unwrap();
    let rows = db::fetch_tasks_for_songbook(&conn, store.songbook).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].state, TaskState::Queued);
    assert_eq!(rows[0].cycle, 1);
}

#[test]
fn concurrent_adds_of_one_song_keep_a_single_slot() {
    let store = store();
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let settings = store.settings.clone();
            let barrier = Arc::clone(&barrier);
            let (songbook, song) = (store.songbook, store.song);
            thread::spawn(move || {
                let mut conn = db::open(&settings).expect("open store");
                barrier.wait();
                db::add_items(&mut conn, songbook, &AddRequest::songs(vec![song]))
                    .expect("add items")
                    .added
            })
        })
        .collect();

    let added: usize = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread panicked"))
        .sum();
    assert_eq!(added, 1);

    let conn = db::open(&store.settings).unwrap();
    let ranks: Vec<i64> = db::fetch_items(&conn, store.songbook)
        .unwrap()
        .into_iter()
        .map(|slot| slot.rank)
        .collect();
    assert_eq!(ranks, vec![0, 1]);
}

#[test]
fn racing_add_and_remove_never_duplicates() {
    let store = store();
    let barrier = Arc::new(Barrier::new(2));

    let adder = {
        let settings = store.settings.clone();
        let barrier = Arc::clone(&barrier);
        let (songbook, song) = (store.songbook, store.song);
        thread::spawn(move || {
            let mut conn = db::open(&settings).expect("open store");
            barrier.wait();
            for _ in 0..20 {
                db::add_items(&mut conn, songbook, &AddRequest::songs(vec![song])).unwrap();
            }
        })
    };
    let remover = {
        let settings = store.settings.clone();
        let barrier = Arc::clone(&barrier);
        let (songbook, song) = (store.songbook, store.song);
        thread::spawn(move || {
            let mut conn = db::open(&settings).expect("open store");
            barrier.wait();
            for _ in 0..20 {
                // NotFound is expected whenever the adder has not run yet.
                let _ = db::remove_song(&mut conn, songbook, song);
            }
        })
    };
    adder.join().expect("adder panicked");
    remover.join().expect("remover panicked");

    let conn = db::open(&store.settings).unwrap();
    let slots = db::fetch_items(&conn, store.songbook).unwrap();
    let copies = slots
        .iter()
        .filter(|slot| matches!(&slot.item, songbook_manager::Item::Song(s) if s.id == store.song))
        .count();
    assert!(copies <= 1);
    let ranks: Vec<i64> = slots.iter().map(|slot| slot.rank).collect();
    let expected: Vec<i64> = (0..slots.len() as i64).collect();
    assert_eq!(ranks, expected);
}
