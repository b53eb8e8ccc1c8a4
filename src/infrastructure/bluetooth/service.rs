//! Keyboard Link Service
//!
//! Runs the link state machine on one serialized context. Collaborator
//! requests, transport callbacks and reconnect timer firings all arrive on a
//! single channel and are handled strictly in order.

use crate::domain::models::{
    AppEvent, CursorDirection, DeviceHandle, EncodingMode, MouseButton, OutboundCommand,
};
use crate::infrastructure::bluetooth::link::{LinkConfig, LinkStateMachine};
use crate::infrastructure::bluetooth::reconnect::{ReconnectScheduler, ReconnectTicket};
use crate::infrastructure::bluetooth::transport::{BleTransport, TransportEvent};
use anyhow::Result;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Collaborator requests
#[derive(Debug, Clone)]
pub enum LinkRequest {
    StartScan,
    StopScan,
    Connect(DeviceHandle),
    Disconnect,
    Send(OutboundCommand),
    SendDelta { old: String, new: String },
    SendTyped(String),
    SendKey(String),
    SetEncodingMode(EncodingMode),
}

/// Everything the link loop consumes
#[derive(Debug, Clone)]
pub enum LinkInput {
    Request(LinkRequest),
    Transport(TransportEvent),
    ReconnectDue(ReconnectTicket),
    Shutdown,
}

/// Cloneable front door used by UI code
#[derive(Debug, Clone)]
pub struct LinkHandle {
    tx: mpsc::UnboundedSender<LinkInput>,
}

impl LinkHandle {
    fn request(&self, request: LinkRequest) {
        if self.tx.send(LinkInput::Request(request)).is_err() {
            warn!("Link service is not running, request dropped");
        }
    }

    pub fn start_scanning(&self) {
        self.request(LinkRequest::StartScan);
    }

    pub fn stop_scanning(&self) {
        self.request(LinkRequest::StopScan);
    }

    pub fn connect(&self, device: DeviceHandle) {
        self.request(LinkRequest::Connect(device));
    }

    pub fn disconnect(&self) {
        self.request(LinkRequest::Disconnect);
    }

    pub fn send(&self, command: OutboundCommand) {
        self.request(LinkRequest::Send(command));
    }

    pub fn send_text(&self, text: &str) {
        self.send(OutboundCommand::RawText(text.to_string()));
    }

    pub fn send_unicode(&self, text: &str) {
        self.send(OutboundCommand::UnicodeText(text.to_string()));
    }

    /// Text in whichever encoding mode the link is set to
    pub fn send_typed(&self, text: &str) {
        self.request(LinkRequest::SendTyped(text.to_string()));
    }

    pub fn send_backspace(&self, count: u32) {
        self.send(OutboundCommand::Backspace(count));
    }

    pub fn send_return(&self) {
        self.send(OutboundCommand::Return);
    }

    pub fn send_delta(&self, old: &str, new: &str) {
        self.request(LinkRequest::SendDelta {
            old: old.to_string(),
            new: new.to_string(),
        });
    }

    pub fn send_key(&self, label: &str) {
        self.request(LinkRequest::SendKey(label.to_string()));
    }

    pub fn send_mouse_move(&self, dx: i32, dy: i32) {
        self.send(OutboundCommand::MouseMove { dx, dy });
    }

    pub fn send_mouse_click(&self, button: MouseButton) {
        self.send(OutboundCommand::MouseClick(button));
    }

    pub fn send_mouse_double_click(&self, button: MouseButton) {
        self.send(OutboundCommand::MouseDoubleClick(button));
    }

    pub fn send_mouse_scroll(&self, dy: i32) {
        self.send(OutboundCommand::MouseScroll(dy));
    }

    pub fn send_cursor(&self, direction: CursorDirection) {
        self.send(OutboundCommand::CursorMove(direction));
    }

    pub fn send_undo(&self) {
        self.send(OutboundCommand::Undo);
    }

    pub fn set_ime_mode(&self, japanese: bool) {
        self.send(OutboundCommand::SetImeMode { japanese });
    }

    pub fn set_encoding_mode(&self, mode: EncodingMode) {
        self.request(LinkRequest::SetEncodingMode(mode));
    }

    /// Disconnect and stop the loop
    pub fn shutdown(&self) {
        let _ = self.tx.send(LinkInput::Shutdown);
    }
}

/// Handed to the transport adapter so its callbacks reach the link loop
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    tx: mpsc::UnboundedSender<LinkInput>,
}

impl TransportEventSink {
    pub fn emit(&self, event: TransportEvent) {
        if self.tx.send(LinkInput::Transport(event)).is_err() {
            debug!("Link loop gone, transport event dropped");
        }
    }
}

/// Receiving end of the link channel, consumed by [`LinkService::new`]
pub struct LinkInbox {
    tx: mpsc::UnboundedSender<LinkInput>,
    rx: mpsc::UnboundedReceiver<LinkInput>,
}

impl LinkInbox {
    pub fn event_sink(&self) -> TransportEventSink {
        TransportEventSink {
            tx: self.tx.clone(),
        }
    }
}

#[cfg(test)]
impl LinkInbox {
    pub fn try_recv(&mut self) -> Option<LinkInput> {
        self.rx.try_recv().ok()
    }
}

pub fn channel() -> (LinkHandle, LinkInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LinkHandle { tx: tx.clone() }, LinkInbox { tx, rx })
}

/// Reconnect timer backed by `tokio::time::sleep`
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<LinkInput>,
}

impl ReconnectScheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration, ticket: ReconnectTicket) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(LinkInput::ReconnectDue(ticket));
        });
    }
}

pub struct LinkService<T: BleTransport> {
    link: LinkStateMachine<T, TokioScheduler>,
    rx: mpsc::UnboundedReceiver<LinkInput>,
}

impl<T: BleTransport> LinkService<T> {
    pub fn new(
        transport: T,
        config: LinkConfig,
        inbox: LinkInbox,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let scheduler = TokioScheduler { tx: inbox.tx };
        Self {
            link: LinkStateMachine::new(transport, scheduler, config, event_sender),
            rx: inbox.rx,
        }
    }

    /// Process inputs until shutdown
    pub async fn run(mut self) {
        info!("Link service started");
        while let Some(input) = self.rx.recv().await {
            match input {
                LinkInput::Request(request) => self.handle_request(request),
                LinkInput::Transport(event) => self.link.handle_event(event),
                LinkInput::ReconnectDue(ticket) => self.link.reconnect_due(ticket),
                LinkInput::Shutdown => {
                    self.link.disconnect();
                    break;
                }
            }
        }
        info!("Link service stopped");
    }

    fn handle_request(&mut self, request: LinkRequest) {
        let result = match request {
            LinkRequest::StartScan => self.link.start_scanning(),
            LinkRequest::StopScan => {
                self.link.stop_scanning();
                Ok(())
            }
            LinkRequest::Connect(device) => self.link.connect(&device),
            LinkRequest::Disconnect => {
                self.link.disconnect();
                Ok(())
            }
            LinkRequest::Send(command) => self.link.send(command),
            LinkRequest::SendDelta { old, new } => self.link.send_delta(&old, &new),
            LinkRequest::SendTyped(text) => self.link.send_typed(&text),
            LinkRequest::SendKey(label) => self.link.send_key(&label),
            LinkRequest::SetEncodingMode(mode) => {
                self.link.set_encoding_mode(mode);
                Ok(())
            }
        };

        // Text entry must never fail hard on a link hiccup.
        if let Err(e) = result {
            warn!("Request dropped: {}", e);
        }
    }
}

/// Start the link loop on a dedicated thread with its own current-thread runtime.
///
/// `make_transport` runs on that thread so platform callbacks can spawn onto
/// the same runtime.
pub fn spawn_link_thread<T, F>(
    make_transport: F,
    config: LinkConfig,
    event_sender: mpsc::UnboundedSender<AppEvent>,
) -> Result<(LinkHandle, JoinHandle<()>)>
where
    T: BleTransport + 'static,
    F: FnOnce(TransportEventSink) -> Result<T> + Send + 'static,
{
    let (handle, inbox) = channel();

    let thread = std::thread::Builder::new()
        .name("ble-link".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Failed to create tokio runtime for Bluetooth: {}", e);
                    return;
                }
            };

            rt.block_on(async move {
                let transport = match make_transport(inbox.event_sink()) {
                    Ok(transport) => transport,
                    Err(e) => {
                        error!("Failed to initialize Bluetooth transport: {}", e);
                        return;
                    }
                };
                LinkService::new(transport, config, inbox, event_sender)
                    .run()
                    .await;
            });
        })?;

    Ok((handle, thread))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{LinkSnapshot, LinkState};
    use crate::infrastructure::bluetooth::testing::{device, FakeTransport};
    use crate::infrastructure::bluetooth::transport::AdapterState;
    use tokio::time::Instant;

    async fn wait_for(
        rx: &mut mpsc::UnboundedReceiver<AppEvent>,
        predicate: impl Fn(&LinkSnapshot) -> bool,
    ) -> LinkSnapshot {
        loop {
            match rx.recv().await {
                Some(AppEvent::LinkChanged(snapshot)) if predicate(&snapshot) => return snapshot,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<LinkSnapshot> {
        let mut snapshots = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AppEvent::LinkChanged(snapshot) = event {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_disconnect_reconnects_after_delay() {
        let (handle, inbox) = channel();
        let sink = inbox.event_sink();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = LinkService::new(FakeTransport::default(), LinkConfig::default(), inbox, tx);
        let task = tokio::spawn(service.run());

        let keyboard = device("K1", "Xiao Keyboard");
        sink.emit(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn));
        handle.connect(keyboard.clone());
        sink.emit(TransportEvent::Connected(keyboard.clone()));
        wait_for(&mut rx, |s| s.state == LinkState::Connected).await;

        sink.emit(TransportEvent::Disconnected {
            device: keyboard.clone(),
            error: Some("supervision timeout".to_string()),
        });
        wait_for(&mut rx, |s| s.status_message == "Disconnected: supervision timeout").await;
        let dropped_at = Instant::now();

        let snapshot = wait_for(&mut rx, |s| s.state == LinkState::Connecting).await;
        assert_eq!(snapshot.status_message, "Reconnecting...");
        assert!(dropped_at.elapsed() >= Duration::from_secs(2));

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_is_ignored_after_manual_reconnect() {
        let (handle, inbox) = channel();
        let sink = inbox.event_sink();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = LinkService::new(FakeTransport::default(), LinkConfig::default(), inbox, tx);
        let task = tokio::spawn(service.run());

        let keyboard = device("K1", "Xiao Keyboard");
        sink.emit(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn));
        handle.connect(keyboard.clone());
        sink.emit(TransportEvent::Connected(keyboard.clone()));
        sink.emit(TransportEvent::Disconnected {
            device: keyboard.clone(),
            error: Some("link lost".to_string()),
        });
        handle.connect(keyboard.clone());
        sink.emit(TransportEvent::Connected(keyboard.clone()));
        wait_for(&mut rx, |s| s.status_message == "Disconnected: link lost").await;
        wait_for(&mut rx, |s| s.state == LinkState::Connected).await;
        drain(&mut rx);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(drain(&mut rx).is_empty());

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_requests_without_link_are_dropped_quietly() {
        let (handle, inbox) = channel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = LinkService::new(FakeTransport::default(), LinkConfig::default(), inbox, tx);
        let task = tokio::spawn(service.run());

        handle.send_text("hello");
        handle.send_backspace(3);
        handle.send_delta("a", "ab");
        handle.start_scanning();
        let snapshot = wait_for(&mut rx, |s| s.status_message == "Bluetooth not ready").await;
        assert_eq!(snapshot.state, LinkState::PoweredOff);

        handle.shutdown();
        task.await.unwrap();
    }
}
