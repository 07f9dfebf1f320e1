//! The fixed option schema every layout is validated against.

use serde_json::Value;

use crate::error::{check_forbidden_chars, SongbookError};
use crate::models::LayoutOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Flag,
    Choice(&'static [&'static str]),
    /// Free text handed to the document compiler, so the forbidden
    /// character rule applies.
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
}

pub const OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        name: "booktype",
        kind: OptionKind::Choice(&["chorded", "lyric"]),
    },
    OptionSpec {
        name: "instrument",
        kind: OptionKind::Choice(&["guitar", "ukulele"]),
    },
    OptionSpec {
        name: "paper",
        kind: OptionKind::Choice(&["a4", "a5", "letter"]),
    },
    OptionSpec {
        name: "orientation",
        kind: OptionKind::Choice(&["portrait", "landscape"]),
    },
    OptionSpec {
        name: "diagram",
        kind: OptionKind::Flag,
    },
    OptionSpec {
        name: "repeatchords",
        kind: OptionKind::Flag,
    },
    OptionSpec {
        name: "lilypond",
        kind: OptionKind::Flag,
    },
    OptionSpec {
        name: "onesongperpage",
        kind: OptionKind::Flag,
    },
    OptionSpec {
        name: "template",
        kind: OptionKind::Text,
    },
];

pub fn option_spec(name: &str) -> Option<&'static OptionSpec> {
    OPTIONS.iter().find(|spec| spec.name == name)
}

/// Check every option against the schema. The first offending key is
/// reported; absent options simply fall back to the renderer's defaults.
pub fn validate_options(options: &LayoutOptions) -> Result<(), SongbookError> {
    for (name, value) in options {
        let spec = option_spec(name)
            .ok_or_else(|| SongbookError::validation(format!("Unknown layout option `{name}`.")))?;

        match (spec.kind, value) {
            (OptionKind::Flag, Value::Bool(_)) => {}
            (OptionKind::Choice(choices), Value::String(choice))
                if choices.contains(&choice.as_str()) => {}
            (OptionKind::Text, Value::String(text)) => check_forbidden_chars(text)?,
            (OptionKind::Choice(choices), _) => {
                return Err(SongbookError::validation(format!(
                    "Layout option `{name}` must be one of: {}.",
                    choices.join(", ")
                )));
            }
            (OptionKind::Flag, _) => {
                return Err(SongbookError::validation(format!(
                    "Layout option `{name}` must be true or false."
                )));
            }
            (OptionKind::Text, _) => {
                return Err(SongbookError::validation(format!(
                    "Layout option `{name}` must be text."
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn options(value: Value) -> LayoutOptions {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn well_formed_options_pass() {
        let opts = options(json!({
            "booktype": "chorded",
            "instrument": "ukulele",
            "diagram": true,
            "template": "patacrep.tex"
        }));
        assert!(validate_options(&opts).is_ok());
    }

    #[test]
    fn unknown_option_is_rejected() {
        let err = validate_options(&options(json!({ "font": "serif" }))).unwrap_err();
        assert_eq!(err, SongbookError::validation("Unknown layout option `font`."));
    }

    #[test]
    fn mistyped_values_are_rejected() {
        assert!(validate_options(&options(json!({ "diagram": "yes" }))).is_err());
        assert!(validate_options(&options(json!({ "paper": "a3" }))).is_err());
        assert!(validate_options(&options(json!({ "template": 3 }))).is_err());
    }

    #[test]
    fn template_obeys_forbidden_characters() {
        assert!(validate_options(&options(json!({ "template": "\\input{x}" }))).is_err());
    }
}
