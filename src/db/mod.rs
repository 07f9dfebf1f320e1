//! Persistence module split across logical submodules.

mod connection;
pub(crate) mod items;
mod layouts;
mod songbooks;
mod songs;
pub(crate) mod tasks;

pub use connection::{ensure_schema, open, open_in_memory};
pub use items::{
    add_items, add_section, apply_batch, fetch_items, fill_holes, remove_song,
    songbook_fingerprint, AddOutcome, AddRequest, BatchFailure, BatchOutcome, ItemBatch,
};
pub use layouts::{create_layout, delete_layout, fetch_layout, fetch_layouts_for_owner, update_layout};
pub use songbooks::{
    create_songbook, delete_songbook, fetch_public_songbooks, fetch_songbook,
    fetch_songbooks_for_owner, find_songbook, update_songbook, SlugMatch,
};
pub use songs::{
    create_artist, create_song, delete_song, fetch_all_songs, fetch_artist, fetch_song,
    fetch_songs_for_artist,
};
pub use tasks::{
    complete_task, fetch_task, fetch_tasks_for_songbook, find_task, start_task, TaskOutcome,
};
