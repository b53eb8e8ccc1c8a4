use crate::domain::models::{EncodingMode, OutboundCommand};

/// Modifier keys on the layout that the receiver has no use for yet
const IGNORED_KEYS: &[&str] = &["Caps Lock", "Shift", "Ctrl", "Win", "Alt", "Menu"];

/// Resolve a tapped key's label into the command it should send.
///
/// Legends stacked with a newline (`"~\n`"`) send the lower legend. Letters
/// are sent lowercase since there is no modifier state.
pub fn command_for_key(label: &str, mode: EncodingMode) -> Option<OutboundCommand> {
    let name = label.trim();
    match name {
        "Backspace" => return Some(OutboundCommand::Backspace(1)),
        "Enter" | "Return" => return Some(OutboundCommand::Return),
        "Tab" => return Some(OutboundCommand::RawText("\t".to_string())),
        _ if IGNORED_KEYS.contains(&name) => return None,
        _ => {}
    }

    let legend = name.split('\n').last().unwrap_or(name);
    if legend.is_empty() {
        return Some(mode.command_for(" ".to_string()));
    }

    let mut chars = legend.chars();
    let output = match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_alphabetic() => c.to_lowercase().collect(),
        _ => legend.to_string(),
    };

    Some(mode.command_for(output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_keys() {
        assert_eq!(
            command_for_key("Backspace", EncodingMode::Raw),
            Some(OutboundCommand::Backspace(1))
        );
        assert_eq!(
            command_for_key(" Return ", EncodingMode::Unicode),
            Some(OutboundCommand::Return)
        );
        assert_eq!(
            command_for_key("Tab", EncodingMode::Unicode),
            Some(OutboundCommand::RawText("\t".to_string()))
        );
        assert_eq!(command_for_key("Shift", EncodingMode::Raw), None);
    }

    #[test]
    fn test_letters_are_lowercased() {
        assert_eq!(
            command_for_key("Q", EncodingMode::Raw),
            Some(OutboundCommand::RawText("q".to_string()))
        );
        assert_eq!(
            command_for_key("A", EncodingMode::Unicode),
            Some(OutboundCommand::UnicodeText("a".to_string()))
        );
    }

    #[test]
    fn test_stacked_legend_picks_lower() {
        assert_eq!(
            command_for_key("~\n`", EncodingMode::Raw),
            Some(OutboundCommand::RawText("`".to_string()))
        );
        assert_eq!(
            command_for_key("!\n1", EncodingMode::Raw),
            Some(OutboundCommand::RawText("1".to_string()))
        );
    }

    #[test]
    fn test_blank_label_is_space() {
        assert_eq!(
            command_for_key("", EncodingMode::Raw),
            Some(OutboundCommand::RawText(" ".to_string()))
        );
    }
}
