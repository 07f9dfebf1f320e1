//! Domain error taxonomy. Storage helpers return `anyhow::Result`, and the
//! failures a caller is expected to react to are raised as `SongbookError`
//! values inside the `anyhow::Error` so they can be recovered with
//! `downcast_ref`.

use thiserror::Error;

use crate::models::TaskState;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SongbookError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("{message}")]
    Validation { message: String },
    #[error("layout {id} is used by a started render task and can no longer change")]
    LayoutLocked { id: i64 },
    #[error("render task cannot move from {from} to {to}")]
    InvalidTransition { from: TaskState, to: TaskState },
    #[error("render task {task_id} cycle {cycle} was superseded by a newer request")]
    StaleCycle { task_id: i64, cycle: i64 },
}

impl SongbookError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Recover the domain error carried by an `anyhow::Error`, if any.
    pub fn from_anyhow(err: &anyhow::Error) -> Option<&SongbookError> {
        err.downcast_ref::<SongbookError>()
    }
}

/// Characters that break the document compiler when they appear in free text.
pub const FORBIDDEN_CHARS: [char; 8] = ['\\', '{', '}', '&', '[', ']', '^', '~'];

/// Reject text containing any of [`FORBIDDEN_CHARS`]. The message lists the
/// whole set so the user can fix every occurrence at once.
pub fn check_forbidden_chars(text: &str) -> Result<(), SongbookError> {
    if text.chars().any(|c| FORBIDDEN_CHARS.contains(&c)) {
        let chars = FORBIDDEN_CHARS
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(SongbookError::validation(format!(
            "The following characters are forbidden, please remove them: {chars}."
        )));
    }
    Ok(())
}

/// Validate section text: non-blank and free of forbidden characters.
pub fn validate_section_text(text: &str) -> Result<(), SongbookError> {
    if text.trim().is_empty() {
        return Err(SongbookError::validation("Section name cannot be empty."));
    }
    check_forbidden_chars(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn braces_are_rejected() {
        let err = validate_section_text("Chorus {repeat}").unwrap_err();
        assert!(matches!(err, SongbookError::Validation { .. }));
        assert!(err.to_string().contains("\"{\""));
    }

    #[test]
    fn plain_text_is_accepted() {
        assert!(validate_section_text("Christmas songs").is_ok());
        assert!(validate_section_text("Chants de Noël (2e partie)").is_ok());
    }

    #[test]
    fn blank_section_is_rejected() {
        assert!(validate_section_text("   ").is_err());
    }

    #[test]
    fn domain_error_survives_anyhow() {
        let err: anyhow::Error = SongbookError::not_found("songbook", 7).into();
        let err = err.context("failed to load songbook");
        assert_eq!(
            SongbookError::from_anyhow(&err),
            Some(&SongbookError::not_found("songbook", 7))
        );
    }
}
