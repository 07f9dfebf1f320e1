//! Core library for managing songbooks and scheduling their renders.
//!
//! The crate keeps ordered songbook items dense and consistent, fingerprints
//! songbook content, and decides when a songbook/layout pair needs a fresh
//! render. Rendering itself, access control, and any user-facing surface live
//! outside this crate and talk to it through the traits in [`scheduler`] and
//! [`worker`].
pub mod config;
pub mod db;
pub mod error;
pub mod fingerprint;
pub mod layout;
pub mod models;
pub mod scheduler;
pub mod telemetry;
pub mod worker;

/// Configuration entry points.
pub use config::{LoggingSettings, Settings, StoreSettings};

/// Domain error taxonomy carried inside `anyhow::Error` values.
pub use error::SongbookError;

pub use fingerprint::{fingerprint, Fingerprint};

/// Domain types that the other layers manipulate.
pub use models::{
    Artist, Item, ItemKind, ItemSlot, Layout, LayoutOptions, RenderTask, Section, Song, Songbook,
    TaskState, Visibility,
};

/// Scheduling and worker seams.
pub use scheduler::{ChannelQueue, Decision, RenderQueue, RenderScheduler};
pub use worker::{RenderEngine, RenderJob, RenderWorker};
