//! Text field session
//!
//! Models the single input field of the remote keyboard and the three input
//! modes the user can toggle: immediate send, immediate clear and Unicode
//! encoding.

use crate::domain::delta::DeltaTracker;
use crate::domain::models::{EncodingMode, OutboundCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputModes {
    /// Diff and send on every change instead of waiting for submit
    pub immediate_send: bool,
    /// Empty the field once its content has been sent
    pub immediate_clear: bool,
    pub encoding: EncodingMode,
}

#[derive(Debug, Default)]
pub struct InputField {
    text: String,
    tracker: DeltaTracker,
    modes: InputModes,
}

impl InputField {
    pub fn new(modes: InputModes) -> Self {
        Self {
            modes,
            ..Default::default()
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn modes(&self) -> InputModes {
        self.modes
    }

    pub fn set_modes(&mut self, modes: InputModes) {
        self.modes = modes;
    }

    /// The field's content changed to `text`.
    pub fn edit(&mut self, text: &str) -> Option<OutboundCommand> {
        if !self.modes.immediate_send {
            self.text = text.to_string();
            self.tracker.reset();
            return None;
        }

        let command = self.tracker.update(text, self.modes.encoding);
        if self.modes.immediate_clear && !text.is_empty() {
            self.clear();
        } else {
            self.text = text.to_string();
        }
        command
    }

    /// Return pressed inside the field
    pub fn submit(&mut self) -> OutboundCommand {
        if self.modes.immediate_clear {
            self.clear();
        }
        OutboundCommand::Return
    }

    /// Send the whole field explicitly, then empty it
    pub fn send_all(&mut self) -> Option<OutboundCommand> {
        if self.text.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.text);
        self.tracker.reset();
        Some(self.modes.encoding.command_for(text))
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.tracker.reset();
    }
}
