//! Receiver Wire Protocol
//!
//! This module contains the GATT profile and the command encoding understood
//! by the receiver firmware.
//!
//! # Wire format
//!
//! ```text
//! RawText(s)            : UTF-8 bytes of s, no framing
//! UnicodeText(s)        : "U+0041 U+3042" (one token per scalar, space-joined)
//! Backspace(n)          : n x 0x08
//! Return                : "\n"
//! MouseMove(dx, dy)     : "CMD:MOUSE:MOVE:{dx}:{dy}\n"
//! MouseClick(b)         : "CMD:MOUSE:CLICK:{LEFT|RIGHT|MIDDLE}\n"
//! MouseDoubleClick(b)   : "CMD:MOUSE:DOUBLE:{LEFT|RIGHT|MIDDLE}\n"
//! MouseScroll(dy)       : "CMD:MOUSE:SCROLL:{dy}\n"
//! CursorMove(d)         : "CMD:CURSOR:{LEFT|RIGHT|UP|DOWN}\n"
//! Undo                  : "CMD:UNDO\n"
//! SetImeMode(japanese)  : "CMD:IME:JA\n" or "CMD:IME:EN\n"
//! ```

use crate::domain::models::OutboundCommand;
use crate::infrastructure::bluetooth::transport::{CharacteristicProperties, WriteType};
use anyhow::Result;
use std::fmt::Write as _;
use uuid::Uuid;

/// Nordic UART Service
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// Text Characteristic UUID - where keystrokes and commands are written
pub const TEXT_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// Status Characteristic UUID - where the receiver pushes status text
pub const STATUS_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// ASCII backspace, mapped to the Backspace key by the firmware
pub const BACKSPACE: u8 = 0x08;

/// Smallest payload any BLE link can carry (23-byte ATT MTU minus header)
pub const MIN_WRITE_LEN: usize = 20;

/// Encode a command into its wire payload.
///
/// Returns `None` for commands that carry no effect (zero mouse motion,
/// zero backspaces, empty text) so that nothing is written for them.
pub fn encode(command: &OutboundCommand) -> Option<Vec<u8>> {
    let payload = match command {
        OutboundCommand::RawText(text) => {
            if text.is_empty() {
                return None;
            }
            text.as_bytes().to_vec()
        }
        OutboundCommand::UnicodeText(text) => {
            if text.is_empty() {
                return None;
            }
            encode_unicode(text).into_bytes()
        }
        OutboundCommand::Backspace(count) => {
            if *count == 0 {
                return None;
            }
            vec![BACKSPACE; *count as usize]
        }
        OutboundCommand::Return => b"\n".to_vec(),
        OutboundCommand::MouseMove { dx, dy } => {
            if *dx == 0 && *dy == 0 {
                return None;
            }
            command_line(&format!("MOUSE:MOVE:{}:{}", dx, dy))
        }
        OutboundCommand::MouseClick(button) => {
            command_line(&format!("MOUSE:CLICK:{}", button.wire_name()))
        }
        OutboundCommand::MouseDoubleClick(button) => {
            command_line(&format!("MOUSE:DOUBLE:{}", button.wire_name()))
        }
        OutboundCommand::MouseScroll(dy) => {
            if *dy == 0 {
                return None;
            }
            command_line(&format!("MOUSE:SCROLL:{}", dy))
        }
        OutboundCommand::CursorMove(direction) => {
            command_line(&format!("CURSOR:{}", direction.wire_name()))
        }
        OutboundCommand::Undo => command_line("UNDO"),
        OutboundCommand::SetImeMode { japanese } => {
            command_line(if *japanese { "IME:JA" } else { "IME:EN" })
        }
    };
    Some(payload)
}

const COMMAND_PREFIX: &str = "CMD:";

fn command_line(body: &str) -> Vec<u8> {
    format!("{}{}\n", COMMAND_PREFIX, body).into_bytes()
}

/// Payload is a `CMD:` line the receiver only acts on once `\n` arrives
pub fn is_command_line(payload: &[u8]) -> bool {
    payload.starts_with(COMMAND_PREFIX.as_bytes())
}

/// Render every scalar of `text` as a `U+XXXX` token.
///
/// Scalars above U+FFFF keep all their hex digits (`U+1F600`).
pub fn encode_unicode(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 7);
    for (i, c) in text.chars().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "U+{:04X}", c as u32);
    }
    out
}

/// Pick the write mode for a characteristic, preferring write-without-response
pub fn select_write_type(properties: &CharacteristicProperties) -> Option<WriteType> {
    if properties.write_without_response {
        Some(WriteType::WithoutResponse)
    } else if properties.write {
        Some(WriteType::WithResponse)
    } else {
        None
    }
}

/// Split a payload into in-order chunks no larger than `max_len`
pub fn chunk(payload: &[u8], max_len: usize) -> impl Iterator<Item = &[u8]> {
    payload.chunks(max_len.max(1))
}

/// Parse a UUID string from settings
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid> {
    Uuid::parse_str(uuid_str.trim())
        .map_err(|e| anyhow::anyhow!("Invalid UUID format '{}': {}", uuid_str, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{CursorDirection, MouseButton};

    fn encoded(command: OutboundCommand) -> Vec<u8> {
        encode(&command).expect("command should produce a payload")
    }

    #[test]
    fn test_parse_uuid() {
        let uuid = parse_uuid(" 6E400002-B5A3-F393-E0A9-E50E24DCCA9E ").unwrap();
        assert_eq!(uuid, TEXT_CHAR_UUID);
        assert!(parse_uuid("not-a-uuid").is_err());
    }

    #[test]
    fn test_profile_uuids_render_for_settings() {
        assert_eq!(SERVICE_UUID.to_string(), "6e400001-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(STATUS_CHAR_UUID.to_string(), "6e400003-b5a3-f393-e0a9-e50e24dcca9e");
    }

    #[test]
    fn test_command_lines_are_recognised() {
        assert!(is_command_line(&encoded(OutboundCommand::Undo)));
        assert!(!is_command_line(&encoded(OutboundCommand::RawText("CM".into()))));
        assert!(!is_command_line(&encoded(OutboundCommand::Backspace(2))));
    }

    #[test]
    fn test_raw_text_is_unframed_utf8() {
        assert_eq!(encoded(OutboundCommand::RawText("hé".into())), "hé".as_bytes());
        assert_eq!(encoded(OutboundCommand::RawText("\t".into())), b"\t");
        assert_eq!(encode(&OutboundCommand::RawText(String::new())), None);
    }

    #[test]
    fn test_unicode_tokens_include_space() {
        assert_eq!(encode_unicode("A あ"), "U+0041 U+0020 U+3042");
        assert_eq!(
            encoded(OutboundCommand::UnicodeText("A あ".into())),
            b"U+0041 U+0020 U+3042"
        );
    }

    #[test]
    fn test_unicode_above_bmp_not_truncated() {
        assert_eq!(encode_unicode("😀"), "U+1F600");
    }

    #[test]
    fn test_backspace_coalesced() {
        assert_eq!(encoded(OutboundCommand::Backspace(5)), vec![0x08; 5]);
        assert_eq!(encode(&OutboundCommand::Backspace(0)), None);
    }

    #[test]
    fn test_mouse_commands() {
        assert_eq!(
            encoded(OutboundCommand::MouseMove { dx: -3, dy: 7 }),
            b"CMD:MOUSE:MOVE:-3:7\n"
        );
        assert_eq!(
            encoded(OutboundCommand::MouseClick(MouseButton::Right)),
            b"CMD:MOUSE:CLICK:RIGHT\n"
        );
        assert_eq!(
            encoded(OutboundCommand::MouseDoubleClick(MouseButton::Left)),
            b"CMD:MOUSE:DOUBLE:LEFT\n"
        );
        assert_eq!(
            encoded(OutboundCommand::MouseScroll(-2)),
            b"CMD:MOUSE:SCROLL:-2\n"
        );
    }

    #[test]
    fn test_zero_motion_suppressed() {
        assert_eq!(encode(&OutboundCommand::MouseMove { dx: 0, dy: 0 }), None);
        assert_eq!(encode(&OutboundCommand::MouseScroll(0)), None);
        assert!(encode(&OutboundCommand::MouseMove { dx: 0, dy: 1 }).is_some());
    }

    #[test]
    fn test_editing_commands() {
        assert_eq!(encoded(OutboundCommand::Return), b"\n");
        assert_eq!(
            encoded(OutboundCommand::CursorMove(CursorDirection::Up)),
            b"CMD:CURSOR:UP\n"
        );
        assert_eq!(encoded(OutboundCommand::Undo), b"CMD:UNDO\n");
        assert_eq!(
            encoded(OutboundCommand::SetImeMode { japanese: true }),
            b"CMD:IME:JA\n"
        );
        assert_eq!(
            encoded(OutboundCommand::SetImeMode { japanese: false }),
            b"CMD:IME:EN\n"
        );
    }

    #[test]
    fn test_chunking_preserves_order() {
        let payload: Vec<u8> = (0..45).collect();
        let chunks: Vec<&[u8]> = chunk(&payload, 20).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], &payload[40..]);
        assert_eq!(chunks.concat(), payload);
        // A zero limit still makes progress
        assert_eq!(chunk(b"ab", 0).count(), 2);
    }

    #[test]
    fn test_write_type_preference() {
        let both = CharacteristicProperties {
            write: true,
            write_without_response: true,
            notify: false,
        };
        assert_eq!(select_write_type(&both), Some(WriteType::WithoutResponse));
        let acked = CharacteristicProperties {
            write: true,
            ..Default::default()
        };
        assert_eq!(select_write_type(&acked), Some(WriteType::WithResponse));
        assert_eq!(select_write_type(&CharacteristicProperties::default()), None);
    }
}
