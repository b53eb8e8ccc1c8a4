use std::fmt;

/// A peripheral seen during scanning.
///
/// Two handles are the same device when their identifiers match; the name is
/// only advertised metadata and may change between advertisements.
#[derive(Debug, Clone, Eq)]
pub struct DeviceHandle {
    pub id: String,
    pub name: Option<String>,
}

impl DeviceHandle {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }

    /// Name for display, "Unknown" when the device did not advertise one
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => "Unknown",
        }
    }
}

impl PartialEq for DeviceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    PoweredOff,
    Unauthorized,
    Unsupported,
    Ready,
    Scanning,
    Connecting,
    Connected,
    Disconnecting,
}

impl LinkState {
    /// Adapter-reported states that no user action can leave
    pub fn is_unavailable(self) -> bool {
        matches!(
            self,
            LinkState::PoweredOff | LinkState::Unauthorized | LinkState::Unsupported
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::Middle => "MIDDLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorDirection {
    Left,
    Right,
    Up,
    Down,
}

impl CursorDirection {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::Up => "UP",
            Self::Down => "DOWN",
        }
    }
}

/// How typed text is put on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingMode {
    #[default]
    Raw,
    Unicode,
}

impl EncodingMode {
    pub fn from_unicode_flag(unicode: bool) -> Self {
        if unicode {
            Self::Unicode
        } else {
            Self::Raw
        }
    }

    /// Wrap typed text in the command matching this mode
    pub fn command_for(self, text: String) -> OutboundCommand {
        match self {
            Self::Raw => OutboundCommand::RawText(text),
            Self::Unicode => OutboundCommand::UnicodeText(text),
        }
    }
}

/// A keyboard or mouse intent headed for the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    RawText(String),
    UnicodeText(String),
    Backspace(u32),
    Return,
    MouseMove { dx: i32, dy: i32 },
    MouseClick(MouseButton),
    MouseDoubleClick(MouseButton),
    MouseScroll(i32),
    CursorMove(CursorDirection),
    Undo,
    SetImeMode { japanese: bool },
}

/// Everything a collaborator may observe about the link
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSnapshot {
    pub state: LinkState,
    pub is_connected: bool,
    pub is_scanning: bool,
    pub discovered_devices: Vec<DeviceHandle>,
    pub connected_device: Option<DeviceHandle>,
    /// Connected and a write characteristic has been found
    pub write_channel_ready: bool,
    pub status_message: String,
    pub last_status_payload: Option<String>,
}

impl Default for LinkSnapshot {
    fn default() -> Self {
        Self {
            state: LinkState::PoweredOff,
            is_connected: false,
            is_scanning: false,
            discovered_devices: Vec::new(),
            connected_device: None,
            write_channel_ready: false,
            status_message: "Not connected".to_string(),
            last_status_payload: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    LinkChanged(LinkSnapshot),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
