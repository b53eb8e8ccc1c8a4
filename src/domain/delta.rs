//! Delta Tracker
//!
//! Keeps the receiver's line buffer in sync with a text field that changes on
//! every keystroke, sending only what changed.
//!
//! The diff is a prefix comparison, not an edit script. It is exact for pure
//! appends and pure truncations. Any edit that shrinks the field is sent as
//! plain backspaces without looking at content, and an insertion in the middle
//! of the field resends everything after the divergence point.

use crate::domain::models::{EncodingMode, OutboundCommand};

/// Compute the command that turns `previous` into `current` on the receiver
pub fn diff(previous: &str, current: &str, mode: EncodingMode) -> Option<OutboundCommand> {
    let old: Vec<char> = previous.chars().collect();
    let new: Vec<char> = current.chars().collect();
    diff_scalars(&old, &new, mode)
}

fn diff_scalars(old: &[char], new: &[char], mode: EncodingMode) -> Option<OutboundCommand> {
    if new.len() < old.len() {
        let removed = old.len() - new.len();
        return Some(OutboundCommand::Backspace(
            u32::try_from(removed).unwrap_or(u32::MAX),
        ));
    }

    let common = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let appended: String = new[common..].iter().collect();
    if appended.is_empty() {
        return None;
    }

    Some(mode.command_for(appended))
}

/// Stateful tracker for a single logical text field
#[derive(Debug, Default)]
pub struct DeltaTracker {
    previous: Vec<char>,
    current: Vec<char>,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the field's new content and return what must be sent.
    ///
    /// The new content becomes the baseline for the next call.
    pub fn update(&mut self, text: &str, mode: EncodingMode) -> Option<OutboundCommand> {
        self.current = text.chars().collect();
        let command = diff_scalars(&self.previous, &self.current, mode);
        self.previous.clone_from(&self.current);
        command
    }

    /// Forget both buffers (explicit clear or focus moved to another field)
    pub fn reset(&mut self) {
        self.previous.clear();
        self.current.clear();
    }

    pub fn previous_text(&self) -> String {
        self.previous.iter().collect()
    }

    pub fn current_text(&self) -> String {
        self.current.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_from_empty() {
        assert_eq!(
            diff("", "abc", EncodingMode::Raw),
            Some(OutboundCommand::RawText("abc".to_string()))
        );
    }

    #[test]
    fn test_truncation_is_backspace() {
        assert_eq!(
            diff("abc", "ab", EncodingMode::Raw),
            Some(OutboundCommand::Backspace(1))
        );
    }

    #[test]
    fn test_single_append() {
        assert_eq!(
            diff("abc", "abcd", EncodingMode::Raw),
            Some(OutboundCommand::RawText("d".to_string()))
        );
    }

    #[test]
    fn test_replacement_resends_from_divergence() {
        // Not a true diff: the receiver ends up with "abcxyz".
        assert_eq!(
            diff("abc", "xyz", EncodingMode::Raw),
            Some(OutboundCommand::RawText("xyz".to_string()))
        );
    }

    #[test]
    fn test_unchanged_text_sends_nothing() {
        assert_eq!(diff("abc", "abc", EncodingMode::Raw), None);
        assert_eq!(diff("", "", EncodingMode::Unicode), None);
    }

    #[test]
    fn test_shrinking_edit_ignores_content() {
        assert_eq!(
            diff("hello", "yo", EncodingMode::Raw),
            Some(OutboundCommand::Backspace(3))
        );
    }

    #[test]
    fn test_counts_scalars_not_bytes() {
        assert_eq!(
            diff("あい", "あ", EncodingMode::Raw),
            Some(OutboundCommand::Backspace(1))
        );
        assert_eq!(
            diff("あ", "あい", EncodingMode::Unicode),
            Some(OutboundCommand::UnicodeText("い".to_string()))
        );
    }

    #[test]
    fn test_tracker_uses_last_update_as_baseline() {
        let mut tracker = DeltaTracker::new();
        assert_eq!(
            tracker.update("he", EncodingMode::Raw),
            Some(OutboundCommand::RawText("he".to_string()))
        );
        assert_eq!(
            tracker.update("hey", EncodingMode::Raw),
            Some(OutboundCommand::RawText("y".to_string()))
        );
        assert_eq!(
            tracker.update("h", EncodingMode::Raw),
            Some(OutboundCommand::Backspace(2))
        );
        assert_eq!(tracker.previous_text(), "h");

        tracker.reset();
        assert_eq!(tracker.previous_text(), "");
        assert_eq!(tracker.current_text(), "");
        assert_eq!(
            tracker.update("h", EncodingMode::Raw),
            Some(OutboundCommand::RawText("h".to_string()))
        );
    }
}
