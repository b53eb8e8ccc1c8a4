//! Console command parsing
//!
//! Lines starting with `/` are commands, anything else is text for the
//! remote field. A leading `//` escapes a literal slash.

use crate::domain::models::{CursorDirection, MouseButton};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Scan,
    StopScan,
    Connect(usize),
    Disconnect,
    Unicode(bool),
    ImmediateSend(bool),
    ImmediateClear(bool),
    MouseMove { dx: i32, dy: i32 },
    Click(MouseButton),
    DoubleClick(MouseButton),
    Scroll(i32),
    Cursor(CursorDirection),
    Undo,
    Ime { japanese: bool },
    Backspace(u32),
    Enter,
    Key(String),
    Status,
    Help,
    Quit,
    Text(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown command '/{0}', try /help")]
    UnknownCommand(String),
    #[error("/{0} needs an argument")]
    MissingArgument(&'static str),
    #[error("Invalid argument for /{command}: '{value}'")]
    InvalidArgument {
        command: &'static str,
        value: String,
    },
}

/// Upper bound for `/bs n`; each backspace is one byte on the wire
pub const MAX_BACKSPACES: u32 = 1000;

pub const HELP: &str = "\
/scan, /stop             scan for keyboards
/connect <n>             connect to device n of the scan list
/disconnect              drop the link
/unicode on|off          send text as U+XXXX tokens
/immediate on|off        send field edits as you type
/autoclear on|off        clear the field after sending
/mouse <dx> <dy>         move the pointer
/click|/double <button>  left, right or middle
/scroll <dy>             scroll the wheel
/cursor <dir>            left, right, up or down
/undo                    undo on the host
/ime ja|en               switch the host IME
/bs [n]                  press backspace n times
/enter                   press return
/key <label>             press a key by its keyboard label
/status                  show the link state
/quit                    exit";

pub fn parse(line: &str) -> Result<ConsoleCommand, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(escaped) = line.strip_prefix("//") {
        return Ok(ConsoleCommand::Text(format!("/{}", escaped)));
    }
    let Some(command_line) = line.strip_prefix('/') else {
        return Ok(ConsoleCommand::Text(line.to_string()));
    };

    let (name, rest) = match command_line.split_once(' ') {
        Some((name, rest)) => (name, rest),
        None => (command_line, ""),
    };
    let mut args = rest.split_whitespace();

    let command = match name.to_lowercase().as_str() {
        "scan" => ConsoleCommand::Scan,
        "stop" => ConsoleCommand::StopScan,
        "connect" => ConsoleCommand::Connect(number("connect", args.next())?),
        "disconnect" => ConsoleCommand::Disconnect,
        "unicode" => ConsoleCommand::Unicode(switch("unicode", args.next())?),
        "immediate" => ConsoleCommand::ImmediateSend(switch("immediate", args.next())?),
        "autoclear" => ConsoleCommand::ImmediateClear(switch("autoclear", args.next())?),
        "mouse" => ConsoleCommand::MouseMove {
            dx: number("mouse", args.next())?,
            dy: number("mouse", args.next())?,
        },
        "click" => ConsoleCommand::Click(button("click", args.next())?),
        "double" => ConsoleCommand::DoubleClick(button("double", args.next())?),
        "scroll" => ConsoleCommand::Scroll(number("scroll", args.next())?),
        "cursor" => ConsoleCommand::Cursor(direction(args.next())?),
        "undo" => ConsoleCommand::Undo,
        "ime" => match args.next().map(str::to_lowercase).as_deref() {
            Some("ja") | Some("jp") => ConsoleCommand::Ime { japanese: true },
            Some("en") => ConsoleCommand::Ime { japanese: false },
            Some(other) => return Err(invalid("ime", other)),
            None => return Err(ParseError::MissingArgument("ime")),
        },
        "bs" => match args.next() {
            Some(count) => match number("bs", Some(count))? {
                n if n > MAX_BACKSPACES => return Err(invalid("bs", count)),
                n => ConsoleCommand::Backspace(n),
            },
            None => ConsoleCommand::Backspace(1),
        },
        "enter" => ConsoleCommand::Enter,
        // Labels keep their spacing and case, "Caps Lock" is one label
        "key" => ConsoleCommand::Key(rest.to_string()),
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(ParseError::UnknownCommand(other.to_string())),
    };
    Ok(command)
}

fn invalid(command: &'static str, value: &str) -> ParseError {
    ParseError::InvalidArgument {
        command,
        value: value.to_string(),
    }
}

fn number<N: std::str::FromStr>(command: &'static str, arg: Option<&str>) -> Result<N, ParseError> {
    let arg = arg.ok_or(ParseError::MissingArgument(command))?;
    arg.parse().map_err(|_| invalid(command, arg))
}

fn switch(command: &'static str, arg: Option<&str>) -> Result<bool, ParseError> {
    match arg.map(str::to_lowercase).as_deref() {
        Some("on") | Some("true") | Some("1") => Ok(true),
        Some("off") | Some("false") | Some("0") => Ok(false),
        Some(other) => Err(invalid(command, other)),
        None => Err(ParseError::MissingArgument(command)),
    }
}

fn button(command: &'static str, arg: Option<&str>) -> Result<MouseButton, ParseError> {
    match arg.map(str::to_lowercase).as_deref() {
        Some("left") | None => Ok(MouseButton::Left),
        Some("right") => Ok(MouseButton::Right),
        Some("middle") => Ok(MouseButton::Middle),
        Some(other) => Err(invalid(command, other)),
    }
}

fn direction(arg: Option<&str>) -> Result<CursorDirection, ParseError> {
    match arg.map(str::to_lowercase).as_deref() {
        Some("left") => Ok(CursorDirection::Left),
        Some("right") => Ok(CursorDirection::Right),
        Some("up") => Ok(CursorDirection::Up),
        Some("down") => Ok(CursorDirection::Down),
        Some(other) => Err(invalid("cursor", other)),
        None => Err(ParseError::MissingArgument("cursor")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_lines_are_text() {
        assert_eq!(parse("hello world"), Ok(ConsoleCommand::Text("hello world".into())));
        assert_eq!(parse(""), Ok(ConsoleCommand::Text(String::new())));
        assert_eq!(parse("//etc/hosts\r\n"), Ok(ConsoleCommand::Text("/etc/hosts".into())));
    }

    #[test]
    fn test_link_commands() {
        assert_eq!(parse("/scan"), Ok(ConsoleCommand::Scan));
        assert_eq!(parse("/STOP"), Ok(ConsoleCommand::StopScan));
        assert_eq!(parse("/connect 2"), Ok(ConsoleCommand::Connect(2)));
        assert_eq!(parse("/connect"), Err(ParseError::MissingArgument("connect")));
        assert_eq!(
            parse("/connect two"),
            Err(ParseError::InvalidArgument {
                command: "connect",
                value: "two".into()
            })
        );
    }

    #[test]
    fn test_pointer_commands() {
        assert_eq!(parse("/mouse -5 12"), Ok(ConsoleCommand::MouseMove { dx: -5, dy: 12 }));
        assert_eq!(parse("/mouse 5"), Err(ParseError::MissingArgument("mouse")));
        assert_eq!(parse("/click"), Ok(ConsoleCommand::Click(MouseButton::Left)));
        assert_eq!(parse("/double right"), Ok(ConsoleCommand::DoubleClick(MouseButton::Right)));
        assert_eq!(parse("/scroll -3"), Ok(ConsoleCommand::Scroll(-3)));
        assert_eq!(parse("/cursor Up"), Ok(ConsoleCommand::Cursor(CursorDirection::Up)));
        assert!(parse("/cursor sideways").is_err());
    }

    #[test]
    fn test_mode_and_editing_commands() {
        assert_eq!(parse("/unicode on"), Ok(ConsoleCommand::Unicode(true)));
        assert_eq!(parse("/immediate off"), Ok(ConsoleCommand::ImmediateSend(false)));
        assert_eq!(parse("/autoclear 1"), Ok(ConsoleCommand::ImmediateClear(true)));
        assert_eq!(parse("/ime ja"), Ok(ConsoleCommand::Ime { japanese: true }));
        assert_eq!(parse("/ime EN"), Ok(ConsoleCommand::Ime { japanese: false }));
        assert_eq!(parse("/bs"), Ok(ConsoleCommand::Backspace(1)));
        assert_eq!(parse("/bs 4"), Ok(ConsoleCommand::Backspace(4)));
        assert!(parse("/bs -1").is_err());
        assert_eq!(
            parse(&format!("/bs {}", MAX_BACKSPACES)),
            Ok(ConsoleCommand::Backspace(MAX_BACKSPACES))
        );
        assert_eq!(
            parse("/bs 4294967295"),
            Err(ParseError::InvalidArgument {
                command: "bs",
                value: "4294967295".into()
            })
        );
        assert_eq!(parse("/undo"), Ok(ConsoleCommand::Undo));
        assert_eq!(parse("/enter"), Ok(ConsoleCommand::Enter));
    }

    #[test]
    fn test_key_label_keeps_spacing() {
        assert_eq!(parse("/key Caps Lock"), Ok(ConsoleCommand::Key("Caps Lock".into())));
        assert_eq!(parse("/key"), Ok(ConsoleCommand::Key(String::new())));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(parse("/fly"), Err(ParseError::UnknownCommand("fly".into())));
        assert_eq!(parse("/quit"), Ok(ConsoleCommand::Quit));
    }
}
