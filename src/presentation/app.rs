//! Console front-end
//!
//! Stands in for the on-screen keyboard: each line typed at the prompt is
//! the remote field's content, slash commands drive the link.

use crate::domain::input::InputField;
use crate::domain::models::{
    AppEvent, EncodingMode, LinkSnapshot, MessageSeverity, OutboundCommand, StatusMessage,
};
use crate::domain::settings::SettingsService;
use crate::infrastructure::bluetooth::LinkHandle;
use crate::presentation::console::{self, ConsoleCommand, HELP};
use std::ops::ControlFlow;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub struct ConsoleApp {
    settings: SettingsService,
    link: LinkHandle,
    field: InputField,
    snapshot: LinkSnapshot,
}

impl ConsoleApp {
    pub fn new(settings: SettingsService, link: LinkHandle) -> Self {
        let modes = settings.get().input_modes();
        link.set_encoding_mode(modes.encoding);
        Self {
            settings,
            link,
            field: InputField::new(modes),
            snapshot: LinkSnapshot::default(),
        }
    }

    /// Print link events and apply input lines until `/quit` or end of input
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<AppEvent>,
        mut lines: mpsc::UnboundedReceiver<String>,
    ) {
        println!("Type text to send it, /help for commands");

        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    for line in self.handle_event(event) {
                        println!("{}", line);
                    }
                }
                line = lines.recv() => match line {
                    Some(line) => match self.handle_line(&line) {
                        ControlFlow::Continue(output) => {
                            for line in output {
                                println!("{}", line);
                            }
                        }
                        ControlFlow::Break(()) => break,
                    },
                    None => break,
                }
            }
        }
        info!("Console closed");
    }

    pub fn handle_event(&mut self, event: AppEvent) -> Vec<String> {
        match event {
            AppEvent::LinkChanged(snapshot) => {
                let mut output = Vec::new();
                if snapshot.status_message != self.snapshot.status_message {
                    output.push(format!("Status: {}", snapshot.status_message));
                }
                let known = self.snapshot.discovered_devices.len();
                if snapshot.discovered_devices.len() < known {
                    // List was reset by a new scan
                    output.extend(device_lines(&snapshot, 0));
                } else {
                    output.extend(device_lines(&snapshot, known));
                }
                self.snapshot = snapshot;
                output
            }
            AppEvent::LogMessage(msg) => vec![format_message(&msg)],
        }
    }

    pub fn handle_line(&mut self, line: &str) -> ControlFlow<(), Vec<String>> {
        match console::parse(line) {
            Ok(command) => self.apply(command),
            Err(e) => ControlFlow::Continue(vec![e.to_string()]),
        }
    }

    fn apply(&mut self, command: ConsoleCommand) -> ControlFlow<(), Vec<String>> {
        let mut output = Vec::new();
        match command {
            ConsoleCommand::Scan => self.link.start_scanning(),
            ConsoleCommand::StopScan => self.link.stop_scanning(),
            ConsoleCommand::Connect(index) => match self.snapshot.discovered_devices.get(index) {
                Some(device) => self.link.connect(device.clone()),
                None => output.push(format!("No device at index {}, try /scan", index)),
            },
            ConsoleCommand::Disconnect => self.link.disconnect(),
            ConsoleCommand::Unicode(enabled) => {
                if let Err(e) = self.settings.set_unicode_mode(enabled) {
                    warn!("Failed to save settings: {}", e);
                }
                let encoding = EncodingMode::from_unicode_flag(enabled);
                self.link.set_encoding_mode(encoding);
                self.update_modes();
                output.push(format!("Unicode mode {}", on_off(enabled)));
            }
            ConsoleCommand::ImmediateSend(enabled) => {
                self.settings.get_mut().immediate_send_enabled = enabled;
                self.save_settings();
                self.update_modes();
                output.push(format!("Immediate send {}", on_off(enabled)));
            }
            ConsoleCommand::ImmediateClear(enabled) => {
                self.settings.get_mut().immediate_clear_enabled = enabled;
                self.save_settings();
                self.update_modes();
                output.push(format!("Immediate clear {}", on_off(enabled)));
            }
            ConsoleCommand::MouseMove { dx, dy } => self.link.send_mouse_move(dx, dy),
            ConsoleCommand::Click(button) => self.link.send_mouse_click(button),
            ConsoleCommand::DoubleClick(button) => self.link.send_mouse_double_click(button),
            ConsoleCommand::Scroll(dy) => self.link.send_mouse_scroll(dy),
            ConsoleCommand::Cursor(direction) => self.link.send_cursor(direction),
            ConsoleCommand::Undo => self.link.send_undo(),
            ConsoleCommand::Ime { japanese } => self.link.set_ime_mode(japanese),
            ConsoleCommand::Backspace(count) => self.link.send_backspace(count),
            ConsoleCommand::Enter => {
                let command = self.field.submit();
                self.link.send(command);
            }
            ConsoleCommand::Key(label) => self.link.send_key(&label),
            ConsoleCommand::Status => output.extend(status_lines(&self.snapshot)),
            ConsoleCommand::Help => output.push(HELP.to_string()),
            ConsoleCommand::Quit => return ControlFlow::Break(()),
            ConsoleCommand::Text(text) => self.type_text(&text),
        }
        ControlFlow::Continue(output)
    }

    /// Immediate send treats the line as the field's new content; otherwise
    /// the line is typed in full and followed by Return.
    fn type_text(&mut self, text: &str) {
        if self.field.modes().immediate_send {
            if let Some(command) = self.field.edit(text) {
                self.link.send(command);
            }
            return;
        }

        self.field.edit(text);
        if let Some(command) = self.field.send_all() {
            self.link.send(command);
        }
        self.link.send(OutboundCommand::Return);
    }

    fn update_modes(&mut self) {
        self.field.set_modes(self.settings.get().input_modes());
    }

    fn save_settings(&self) {
        if let Err(e) = self.settings.save() {
            warn!("Failed to save settings: {}", e);
        }
    }
}

/// Forward stdin lines from a detached thread so a pending read never blocks exit
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Failed to read input: {}", e);
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        error!("Failed to start input thread: {}", e);
    }
    rx
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

fn device_lines(snapshot: &LinkSnapshot, from: usize) -> Vec<String> {
    snapshot
        .discovered_devices
        .iter()
        .enumerate()
        .skip(from)
        .map(|(index, device)| format!("  [{}] {}", index, device))
        .collect()
}

fn status_lines(snapshot: &LinkSnapshot) -> Vec<String> {
    let mut lines = vec![
        format!("State: {:?}", snapshot.state),
        format!("Status: {}", snapshot.status_message),
    ];
    if let Some(device) = &snapshot.connected_device {
        lines.push(format!(
            "Device: {} (write channel {})",
            device,
            if snapshot.write_channel_ready {
                "ready"
            } else {
                "pending"
            }
        ));
    }
    if let Some(payload) = &snapshot.last_status_payload {
        lines.push(format!("Receiver: {}", payload));
    }
    lines.extend(device_lines(snapshot, 0));
    lines
}

fn format_message(msg: &StatusMessage) -> String {
    let tag = match msg.severity {
        MessageSeverity::Info => "info",
        MessageSeverity::Success => "ok",
        MessageSeverity::Warning => "warn",
        MessageSeverity::Error => "error",
    };
    format!("[{}] {}", tag, msg.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{DeviceHandle, LinkState, MouseButton};
    use crate::infrastructure::bluetooth::service::{channel, LinkInbox, LinkInput, LinkRequest};

    fn app(name: &str) -> (ConsoleApp, LinkInbox, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!(
            "easy_keyboard_link_console_{}_{}.json",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let (handle, inbox) = channel();
        (ConsoleApp::new(SettingsService::with_path(path.clone()), handle), inbox, path)
    }

    fn requests(inbox: &mut LinkInbox) -> Vec<LinkRequest> {
        let mut out = Vec::new();
        while let Some(input) = inbox.try_recv() {
            if let LinkInput::Request(request) = input {
                out.push(request);
            }
        }
        out
    }

    fn sent(requests: &[LinkRequest]) -> Vec<OutboundCommand> {
        requests
            .iter()
            .filter_map(|r| match r {
                LinkRequest::Send(command) => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_new_pushes_encoding_mode() {
        let (_app, mut inbox, _) = app("encoding");
        assert!(matches!(
            requests(&mut inbox).as_slice(),
            [LinkRequest::SetEncodingMode(EncodingMode::Raw)]
        ));
    }

    #[test]
    fn test_text_line_is_typed_then_returned() {
        let (mut app, mut inbox, _) = app("typed");
        requests(&mut inbox);

        assert!(app.handle_line("hello").is_continue());
        assert_eq!(
            sent(&requests(&mut inbox)),
            vec![
                OutboundCommand::RawText("hello".to_string()),
                OutboundCommand::Return
            ]
        );
    }

    #[test]
    fn test_immediate_send_diffs_lines() {
        let (mut app, mut inbox, path) = app("immediate");
        let _ = app.handle_line("/immediate on");
        requests(&mut inbox);

        let _ = app.handle_line("hello");
        let _ = app.handle_line("hello!");
        let _ = app.handle_line("hell");
        let _ = app.handle_line("/enter");
        assert_eq!(
            sent(&requests(&mut inbox)),
            vec![
                OutboundCommand::RawText("hello".to_string()),
                OutboundCommand::RawText("!".to_string()),
                OutboundCommand::Backspace(2),
                OutboundCommand::Return,
            ]
        );
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_unicode_toggle_updates_link_and_settings() {
        let (mut app, mut inbox, path) = app("unicode");
        requests(&mut inbox);

        let ControlFlow::Continue(output) = app.handle_line("/unicode on") else {
            panic!("unexpected quit");
        };
        assert_eq!(output, vec!["Unicode mode on".to_string()]);
        assert!(matches!(
            requests(&mut inbox).as_slice(),
            [LinkRequest::SetEncodingMode(EncodingMode::Unicode)]
        ));
        assert!(SettingsService::with_path(path.clone()).get().unicode_mode_enabled);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_connect_uses_scan_index() {
        let (mut app, mut inbox, _) = app("connect");
        requests(&mut inbox);

        let ControlFlow::Continue(output) = app.handle_line("/connect 0") else {
            panic!("unexpected quit");
        };
        assert_eq!(output, vec!["No device at index 0, try /scan".to_string()]);

        let keyboard = DeviceHandle::new("K1", Some("Xiao Keyboard".to_string()));
        let printed = app.handle_event(AppEvent::LinkChanged(LinkSnapshot {
            state: LinkState::Scanning,
            is_scanning: true,
            discovered_devices: vec![keyboard.clone()],
            status_message: "Scanning for devices...".to_string(),
            ..Default::default()
        }));
        assert_eq!(
            printed,
            vec![
                "Status: Scanning for devices...".to_string(),
                "  [0] Xiao Keyboard (K1)".to_string(),
            ]
        );

        let _ = app.handle_line("/connect 0");
        assert!(matches!(
            requests(&mut inbox).as_slice(),
            [LinkRequest::Connect(device)] if *device == keyboard
        ));
    }

    #[test]
    fn test_pointer_and_key_commands_reach_link() {
        let (mut app, mut inbox, _) = app("pointer");
        requests(&mut inbox);

        let _ = app.handle_line("/mouse 3 -4");
        let _ = app.handle_line("/double middle");
        let _ = app.handle_line("/bs 5");
        let _ = app.handle_line("/key Tab");
        let requests = requests(&mut inbox);
        assert_eq!(
            sent(&requests),
            vec![
                OutboundCommand::MouseMove { dx: 3, dy: -4 },
                OutboundCommand::MouseDoubleClick(MouseButton::Middle),
                OutboundCommand::Backspace(5),
            ]
        );
        assert!(matches!(requests.last(), Some(LinkRequest::SendKey(label)) if label == "Tab"));
    }

    #[test]
    fn test_log_messages_are_tagged() {
        let (mut app, _inbox, _) = app("log");
        let printed = app.handle_event(AppEvent::LogMessage(StatusMessage {
            message: "Connection lost, reconnecting...".to_string(),
            severity: MessageSeverity::Warning,
        }));
        assert_eq!(printed, vec!["[warn] Connection lost, reconnecting...".to_string()]);
    }

    #[test]
    fn test_quit_and_bad_commands() {
        let (mut app, _inbox, _) = app("quit");
        assert!(app.handle_line("/quit").is_break());
        let ControlFlow::Continue(output) = app.handle_line("/fly") else {
            panic!("unexpected quit");
        };
        assert_eq!(output, vec!["Unknown command '/fly', try /help".to_string()]);
    }
}
