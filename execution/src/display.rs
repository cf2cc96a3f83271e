//! Name-tag rendering of a car's penalty standing.

use std::{fmt, str::FromStr};

use crate::penalty::MAX_STACK;

/// How a car's penalty standing is shown next to its name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TagStyle {
    /// No tag.
    #[default]
    None,
    /// `[P3]`
    Level,
    /// `[***--]`
    Stars,
    /// `[P3 12s]` while ghosted, `[P3]` otherwise.
    Countdown,
}

impl TagStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagStyle::None => "none",
            TagStyle::Level => "level",
            TagStyle::Stars => "stars",
            TagStyle::Countdown => "countdown",
        }
    }
}

impl fmt::Display for TagStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagStyle {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(TagStyle::None),
            "level" => Ok(TagStyle::Level),
            "stars" => Ok(TagStyle::Stars),
            "countdown" => Ok(TagStyle::Countdown),
            _ => Err("expected one of: none, level, stars, countdown"),
        }
    }
}

/// Render the tag for a car at `stack` with `remaining_seconds` left on its ghost
/// window. Clean cars never get a tag.
pub fn format_tag(style: TagStyle, stack: u8, remaining_seconds: u64) -> String {
    if stack == 0 {
        return String::new();
    }
    let stack = stack.min(MAX_STACK);
    match style {
        TagStyle::None => String::new(),
        TagStyle::Level => format!("[P{stack}]"),
        TagStyle::Stars => {
            let filled = usize::from(stack);
            let empty = usize::from(MAX_STACK) - filled;
            format!("[{}{}]", "*".repeat(filled), "-".repeat(empty))
        }
        TagStyle::Countdown if remaining_seconds > 0 => format!("[P{stack} {remaining_seconds}s]"),
        TagStyle::Countdown => format!("[P{stack}]"),
    }
}
