//! Link State Machine
//!
//! Single source of truth for connectivity. Consumes [`TransportEvent`]s and
//! collaborator requests, owns the discovered-device list and the two GATT
//! characteristic handles, and publishes a [`LinkSnapshot`] on every change.
//!
//! ```text
//!  PoweredOff/Unauthorized/Unsupported ──(adapter on)──► Ready
//!  Ready ──start_scanning──► Scanning ──connect──► Connecting ──(connected)──► Connected
//!  Connecting ──(connect failed)──► Ready
//!  Connected ──disconnect──► Disconnecting ──(disconnected)──► Ready
//!  Connected ──(disconnected with error)──► Ready + one scheduled reconnect
//! ```
//!
//! Drive it from one serialized context, see
//! [`crate::infrastructure::bluetooth::service`].

use crate::domain::delta;
use crate::domain::keys;
use crate::domain::models::{
    AppEvent, CursorDirection, DeviceHandle, EncodingMode, LinkSnapshot, LinkState,
    MessageSeverity, MouseButton, OutboundCommand, StatusMessage,
};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::error::{LinkError, Result};
use crate::infrastructure::bluetooth::protocol::{self, MIN_WRITE_LEN};
use crate::infrastructure::bluetooth::reconnect::{
    ReconnectPolicy, ReconnectScheduler, ReconnectTicket,
};
use crate::infrastructure::bluetooth::transport::{
    AdapterState, Advertisement, BleTransport, Characteristic, TransportEvent,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Profile and policy knobs of the link
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub service_uuid: Uuid,
    pub text_char_uuid: Uuid,
    pub status_char_uuid: Uuid,
    /// Lowercase name fragments that mark a likely receiver
    pub name_hints: Vec<String>,
    /// Also list any device that advertises a non-empty name
    pub accept_any_named_device: bool,
    pub reconnect_delay: Duration,
    pub reconnect_max_attempts: Option<u32>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            service_uuid: protocol::SERVICE_UUID,
            text_char_uuid: protocol::TEXT_CHAR_UUID,
            status_char_uuid: protocol::STATUS_CHAR_UUID,
            name_hints: vec![
                "xiao".to_string(),
                "keyboard".to_string(),
                "nordic".to_string(),
            ],
            accept_any_named_device: true,
            reconnect_delay: Duration::from_secs(2),
            reconnect_max_attempts: None,
        }
    }
}

impl LinkConfig {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            service_uuid: protocol::parse_uuid(&settings.ble_service_uuid)?,
            text_char_uuid: protocol::parse_uuid(&settings.ble_text_char_uuid)?,
            status_char_uuid: protocol::parse_uuid(&settings.ble_status_char_uuid)?,
            name_hints: settings
                .scan_name_hints
                .iter()
                .map(|hint| hint.to_lowercase())
                .filter(|hint| !hint.is_empty())
                .collect(),
            accept_any_named_device: settings.accept_any_named_device,
            reconnect_delay: Duration::from_millis(settings.reconnect_delay_ms),
            reconnect_max_attempts: settings.reconnect_max_attempts,
        })
    }

    /// Scan filter for one advertisement
    pub fn accepts(&self, advertisement: &Advertisement) -> bool {
        let name = advertisement
            .device
            .name
            .as_deref()
            .unwrap_or_default()
            .to_lowercase();

        self.name_hints.iter().any(|hint| name.contains(hint.as_str()))
            || advertisement.service_uuids.contains(&self.service_uuid)
            || (self.accept_any_named_device && !name.is_empty())
    }
}

pub struct LinkStateMachine<T: BleTransport, S: ReconnectScheduler> {
    transport: T,
    scheduler: S,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    config: LinkConfig,
    reconnect: ReconnectPolicy,
    snapshot: LinkSnapshot,
    /// Device a connect request is outstanding for
    connecting_to: Option<DeviceHandle>,
    write_characteristic: Option<Characteristic>,
    /// The write channel matched the text UUID exactly
    write_is_canonical: bool,
    notify_characteristic: Option<Characteristic>,
    encoding: EncodingMode,
}

impl<T: BleTransport, S: ReconnectScheduler> LinkStateMachine<T, S> {
    pub fn new(
        transport: T,
        scheduler: S,
        config: LinkConfig,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let reconnect = ReconnectPolicy::new(config.reconnect_delay, config.reconnect_max_attempts);
        Self {
            transport,
            scheduler,
            event_sender,
            config,
            reconnect,
            snapshot: LinkSnapshot::default(),
            connecting_to: None,
            write_characteristic: None,
            write_is_canonical: false,
            notify_characteristic: None,
            encoding: EncodingMode::Raw,
        }
    }

    pub fn snapshot(&self) -> &LinkSnapshot {
        &self.snapshot
    }

    pub fn state(&self) -> LinkState {
        self.snapshot.state
    }

    pub fn is_connected(&self) -> bool {
        self.snapshot.is_connected
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    #[cfg(test)]
    pub(crate) fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn encoding_mode(&self) -> EncodingMode {
        self.encoding
    }

    pub fn set_encoding_mode(&mut self, mode: EncodingMode) {
        if self.encoding != mode {
            info!("Encoding mode set to {:?}", mode);
            self.encoding = mode;
        }
    }

    // ------------------------------------------------------------------
    // User operations
    // ------------------------------------------------------------------

    /// Start collecting nearby devices. Restarts collection if already scanning.
    pub fn start_scanning(&mut self) -> Result<()> {
        let state = self.snapshot.state;
        if state.is_unavailable() {
            warn!("Bluetooth not ready ({:?})", state);
            self.set_status("Bluetooth not ready");
            self.publish();
            return Err(LinkError::AdapterUnavailable(adapter_state_for(state)));
        }
        if matches!(
            state,
            LinkState::Connecting | LinkState::Connected | LinkState::Disconnecting
        ) {
            warn!("Cannot scan while {:?}", state);
            return Err(LinkError::Busy(state));
        }

        if state == LinkState::Scanning {
            self.transport.stop_scan();
        }
        self.snapshot.discovered_devices.clear();

        if let Err(e) = self.transport.start_scan() {
            error!("Failed to start scan: {}", e);
            self.snapshot.state = LinkState::Ready;
            self.snapshot.is_scanning = false;
            self.set_status(format!("Scan failed: {}", e));
            self.publish();
            return Err(e);
        }

        self.snapshot.state = LinkState::Scanning;
        self.snapshot.is_scanning = true;
        self.set_status("Scanning for devices...");
        info!("Started scanning for all BLE devices");
        self.publish();
        Ok(())
    }

    pub fn stop_scanning(&mut self) {
        if self.snapshot.state != LinkState::Scanning {
            return;
        }
        self.transport.stop_scan();
        self.snapshot.state = LinkState::Ready;
        self.snapshot.is_scanning = false;
        self.set_status("Scan stopped");
        info!("Stopped scanning");
        self.publish();
    }

    pub fn connect(&mut self, device: &DeviceHandle) -> Result<()> {
        let state = self.snapshot.state;
        if state.is_unavailable() {
            self.set_status("Bluetooth not ready");
            self.publish();
            return Err(LinkError::AdapterUnavailable(adapter_state_for(state)));
        }
        match state {
            LinkState::Connecting if self.connecting_to.as_ref() == Some(device) => return Ok(()),
            LinkState::Connected if self.snapshot.connected_device.as_ref() == Some(device) => {
                return Ok(())
            }
            LinkState::Connecting | LinkState::Connected | LinkState::Disconnecting => {
                warn!("Cannot connect to {} while {:?}", device, state);
                return Err(LinkError::Busy(state));
            }
            _ => {}
        }

        self.reconnect.invalidate();
        self.begin_connect(device.clone(), "Connecting...");
        Ok(())
    }

    pub fn disconnect(&mut self) {
        // A pending automatic retry is abandoned as well.
        self.reconnect.invalidate();

        let target = self
            .snapshot
            .connected_device
            .clone()
            .or_else(|| self.connecting_to.clone());
        let Some(device) = target else {
            return;
        };

        info!("Disconnecting from {}", device);
        self.snapshot.state = LinkState::Disconnecting;
        self.set_status("Disconnecting...");
        self.transport.cancel_connection(&device);
        self.publish();
    }

    /// Encode a command and write it over the write channel.
    ///
    /// Commands without effect (zero motion, empty text) succeed without a write.
    pub fn send(&mut self, command: OutboundCommand) -> Result<()> {
        let Some(payload) = protocol::encode(&command) else {
            trace!("Nothing to send for {:?}", command);
            return Ok(());
        };

        let device = match (&self.snapshot.connected_device, self.snapshot.state) {
            (Some(device), LinkState::Connected) => device.clone(),
            _ => return Err(LinkError::NotConnected),
        };
        let characteristic = self
            .write_characteristic
            .clone()
            .ok_or(LinkError::NoWriteChannel)?;
        let write_type = protocol::select_write_type(&characteristic.properties)
            .ok_or(LinkError::UnsupportedWriteMode)?;

        let max_len = match self.transport.max_write_len(&device, write_type) {
            0 => MIN_WRITE_LEN,
            len => len,
        };

        let mut chunks = 0;
        for chunk in protocol::chunk(&payload, max_len) {
            if let Err(e) = self
                .transport
                .write(&device, &characteristic, chunk, write_type)
            {
                if chunks > 0 && protocol::is_command_line(&payload) {
                    // The receiver buffers command lines until '\n'; terminate the
                    // fragment so the next command is not glued onto it.
                    warn!(
                        "Write failed after {} chunk(s), terminating partial command: {}",
                        chunks, e
                    );
                    if let Err(e) =
                        self.transport
                            .write(&device, &characteristic, b"\n", write_type)
                    {
                        warn!("Could not terminate partial command: {}", e);
                    }
                } else if chunks > 0 {
                    warn!("Write failed after {} chunk(s), payload truncated: {}", chunks, e);
                }
                return Err(e);
            }
            chunks += 1;
        }

        debug!(
            "Sent {} bytes in {} chunk(s) to {} ({:?})",
            payload.len(),
            chunks,
            characteristic.uuid,
            write_type
        );
        Ok(())
    }

    pub fn send_text(&mut self, text: &str) -> Result<()> {
        self.send(OutboundCommand::RawText(text.to_string()))
    }

    pub fn send_unicode(&mut self, text: &str) -> Result<()> {
        self.send(OutboundCommand::UnicodeText(text.to_string()))
    }

    /// Send text the way the current encoding mode asks for
    pub fn send_typed(&mut self, text: &str) -> Result<()> {
        self.send(self.encoding.command_for(text.to_string()))
    }

    pub fn send_backspace(&mut self, count: u32) -> Result<()> {
        self.send(OutboundCommand::Backspace(count))
    }

    pub fn send_return(&mut self) -> Result<()> {
        self.send(OutboundCommand::Return)
    }

    /// Resynchronize the receiver after a field changed from `old` to `new`
    pub fn send_delta(&mut self, old: &str, new: &str) -> Result<()> {
        match delta::diff(old, new, self.encoding) {
            Some(command) => self.send(command),
            None => Ok(()),
        }
    }

    /// Send the command bound to a key label of the on-screen keyboard
    pub fn send_key(&mut self, label: &str) -> Result<()> {
        match keys::command_for_key(label, self.encoding) {
            Some(command) => self.send(command),
            None => Ok(()),
        }
    }

    pub fn send_mouse_move(&mut self, dx: i32, dy: i32) -> Result<()> {
        self.send(OutboundCommand::MouseMove { dx, dy })
    }

    pub fn send_mouse_click(&mut self, button: MouseButton) -> Result<()> {
        self.send(OutboundCommand::MouseClick(button))
    }

    pub fn send_mouse_double_click(&mut self, button: MouseButton) -> Result<()> {
        self.send(OutboundCommand::MouseDoubleClick(button))
    }

    pub fn send_mouse_scroll(&mut self, dy: i32) -> Result<()> {
        self.send(OutboundCommand::MouseScroll(dy))
    }

    pub fn send_cursor(&mut self, direction: CursorDirection) -> Result<()> {
        self.send(OutboundCommand::CursorMove(direction))
    }

    pub fn send_undo(&mut self) -> Result<()> {
        self.send(OutboundCommand::Undo)
    }

    pub fn set_ime_mode(&mut self, japanese: bool) -> Result<()> {
        self.send(OutboundCommand::SetImeMode { japanese })
    }

    // ------------------------------------------------------------------
    // Transport callbacks
    // ------------------------------------------------------------------

    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::AdapterStateChanged(state) => self.on_adapter_state(state),
            TransportEvent::Discovered(advertisement) => self.on_discovered(advertisement),
            TransportEvent::Connected(device) => self.on_connected(device),
            TransportEvent::ConnectFailed { device, reason } => {
                self.on_connect_failed(device, reason)
            }
            TransportEvent::Disconnected { device, error } => self.on_disconnected(device, error),
            TransportEvent::ServicesDiscovered { device, result } => {
                self.on_services_discovered(device, result)
            }
            TransportEvent::CharacteristicsDiscovered {
                device,
                service,
                result,
            } => self.on_characteristics_discovered(device, service, result),
            TransportEvent::WriteCompleted {
                characteristic,
                error,
            } => match error {
                Some(e) => warn!("Write to {} failed: {}", characteristic, e),
                None => trace!("Write to {} confirmed", characteristic),
            },
            TransportEvent::ValueUpdated {
                characteristic,
                value,
            } => self.on_value_updated(characteristic, value),
        }
    }

    /// A reconnect timer fired
    pub fn reconnect_due(&mut self, ticket: ReconnectTicket) {
        if !self.reconnect.take_due(&ticket) {
            return;
        }
        if self.snapshot.state != LinkState::Ready {
            debug!(
                "Dropping reconnect to {} while {:?}",
                ticket.device, self.snapshot.state
            );
            return;
        }
        info!("Reconnecting to {}", ticket.device);
        self.begin_connect(ticket.device, "Reconnecting...");
    }

    fn on_adapter_state(&mut self, adapter: AdapterState) {
        let (state, status) = match adapter {
            AdapterState::PoweredOn => {
                info!("Bluetooth powered on");
                if self.snapshot.state.is_unavailable() {
                    self.snapshot.state = LinkState::Ready;
                    self.set_status("Bluetooth ready");
                    self.publish();
                }
                return;
            }
            AdapterState::PoweredOff => (LinkState::PoweredOff, "Bluetooth is off"),
            AdapterState::Resetting => (LinkState::PoweredOff, "Bluetooth resetting"),
            AdapterState::Unknown => (LinkState::PoweredOff, "Bluetooth state unknown"),
            AdapterState::Unauthorized => (LinkState::Unauthorized, "Bluetooth unauthorized"),
            AdapterState::Unsupported => (LinkState::Unsupported, "Bluetooth not supported"),
        };

        warn!("Bluetooth adapter unavailable: {:?}", adapter);
        self.reconnect.invalidate();
        self.clear_connection();
        self.snapshot.is_scanning = false;
        self.snapshot.state = state;
        self.set_status(status);
        self.send_log(status, MessageSeverity::Warning);
        self.publish();
    }

    fn on_discovered(&mut self, advertisement: Advertisement) {
        if self.snapshot.state != LinkState::Scanning {
            return;
        }

        let device = &advertisement.device;
        trace!(
            "Found device: {} RSSI: {:?} services: {:?}",
            device,
            advertisement.rssi,
            advertisement.service_uuids
        );

        if self.snapshot.discovered_devices.contains(device) {
            return;
        }
        if !self.config.accepts(&advertisement) {
            return;
        }

        info!("Added to list: {}", device);
        self.snapshot.discovered_devices.push(advertisement.device);
        self.publish();
    }

    fn on_connected(&mut self, device: DeviceHandle) {
        if self.snapshot.connected_device.as_ref() == Some(&device) {
            debug!("Duplicate connection report for {}", device);
            return;
        }
        if self.connecting_to.as_ref() != Some(&device) {
            // A connect that was cancelled while in flight; its Disconnected is ignored below
            warn!("Closing connection to {} that is no longer wanted", device);
            self.transport.cancel_connection(&device);
            return;
        }

        info!("Connected to {}", device);
        self.connecting_to = None;
        self.clear_characteristics();
        self.reconnect.on_connected();
        self.snapshot.connected_device = Some(device.clone());
        self.snapshot.is_connected = true;
        self.snapshot.state = LinkState::Connected;
        self.set_status("Connected");
        self.send_log(
            &format!("Connected to {}", device.display_name()),
            MessageSeverity::Success,
        );
        self.publish();

        let service = self.config.service_uuid;
        self.transport.discover_services(&device, &[service]);
    }

    fn on_connect_failed(&mut self, device: DeviceHandle, reason: Option<String>) {
        if self.connecting_to.as_ref() != Some(&device) {
            return;
        }
        let reason = reason.unwrap_or_else(|| "Unknown error".to_string());
        error!("{}", LinkError::ConnectFailed(reason.clone()));

        self.clear_connection();
        self.snapshot.state = LinkState::Ready;
        self.set_status(format!("Connection failed: {}", reason));
        self.send_log(
            &format!("Connection failed: {}", reason),
            MessageSeverity::Error,
        );
        self.publish();
    }

    fn on_disconnected(&mut self, device: DeviceHandle, error: Option<String>) {
        let ours = self.snapshot.connected_device.as_ref() == Some(&device)
            || self.connecting_to.as_ref() == Some(&device);
        if !ours {
            debug!("Ignoring disconnect of unrelated device {}", device);
            return;
        }
        let requested = self.snapshot.state == LinkState::Disconnecting;

        match &error {
            Some(e) => {
                error!("{}", LinkError::UnexpectedDisconnect(e.clone()));
                self.set_status(format!("Disconnected: {}", e));
            }
            None => {
                info!("Disconnected from {}", device);
                self.set_status("Disconnected");
                self.send_log(
                    &format!("Disconnected from {}", device.display_name()),
                    MessageSeverity::Info,
                );
            }
        }

        self.clear_connection();
        if !self.snapshot.state.is_unavailable() {
            self.snapshot.state = LinkState::Ready;
        }

        if !requested {
            if let Some(ticket) = self.reconnect.on_disconnect(&device, error.as_deref()) {
                self.send_log("Connection lost, reconnecting...", MessageSeverity::Warning);
                self.scheduler.schedule(self.reconnect.delay(), ticket);
            }
        }
        self.publish();
    }

    fn on_services_discovered(
        &mut self,
        device: DeviceHandle,
        result: std::result::Result<Vec<Uuid>, String>,
    ) {
        if self.snapshot.connected_device.as_ref() != Some(&device) {
            return;
        }
        let services = match result {
            Ok(services) => services,
            Err(e) => {
                error!("Service discovery failed: {}", e);
                return;
            }
        };
        if services.is_empty() {
            error!("No services found on {}", device);
            return;
        }

        info!("Discovered {} services", services.len());
        // The write channel may live outside the keyboard service
        for service in services {
            if service == self.config.service_uuid {
                info!("Found keyboard service, discovering characteristics...");
            } else {
                debug!("Discovering characteristics of extra service {}", service);
            }
            self.transport.discover_characteristics(&device, service);
        }
    }

    fn on_characteristics_discovered(
        &mut self,
        device: DeviceHandle,
        service: Uuid,
        result: std::result::Result<Vec<Characteristic>, String>,
    ) {
        if self.snapshot.connected_device.as_ref() != Some(&device) {
            return;
        }
        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(e) => {
                error!("Characteristic discovery failed for {}: {}", service, e);
                return;
            }
        };

        debug!(
            "Found {} characteristics for service {}",
            characteristics.len(),
            service
        );

        for characteristic in characteristics {
            trace!(
                "  Characteristic {} {:?}",
                characteristic.uuid,
                characteristic.properties
            );

            if characteristic.uuid == self.config.text_char_uuid {
                info!("Found text characteristic (write)");
                self.write_characteristic = Some(characteristic);
                self.write_is_canonical = true;
            } else if characteristic.uuid == self.config.status_char_uuid {
                if characteristic.properties.notify {
                    self.transport.set_notify(&device, &characteristic, true);
                    info!("Found status characteristic (notify)");
                }
                self.notify_characteristic = Some(characteristic);
            } else if characteristic.properties.is_writable() && !self.write_is_canonical {
                info!(
                    "Using alternative write characteristic: {}",
                    characteristic.uuid
                );
                self.write_characteristic = Some(characteristic);
            }
        }

        let ready = self.write_characteristic.is_some();
        if ready != self.snapshot.write_channel_ready {
            self.snapshot.write_channel_ready = ready;
            self.publish();
        }
    }

    fn on_value_updated(&mut self, characteristic: Uuid, value: Vec<u8>) {
        if characteristic != self.config.status_char_uuid {
            trace!("Ignoring update from {}", characteristic);
            return;
        }
        match String::from_utf8(value) {
            Ok(status) => {
                info!("Status update: {}", status);
                self.snapshot.last_status_payload = Some(status.clone());
                self.set_status(status);
                self.publish();
            }
            Err(e) => {
                warn!("{}", LinkError::EncodingFailed(e.to_string()));
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn begin_connect(&mut self, device: DeviceHandle, status: &str) {
        self.stop_scanning();
        info!("Connecting to {}", device);
        self.snapshot.state = LinkState::Connecting;
        self.set_status(status);
        self.transport.connect(&device);
        self.connecting_to = Some(device);
        self.publish();
    }

    fn clear_connection(&mut self) {
        self.connecting_to = None;
        self.snapshot.connected_device = None;
        self.snapshot.is_connected = false;
        self.clear_characteristics();
    }

    fn clear_characteristics(&mut self) {
        self.write_characteristic = None;
        self.write_is_canonical = false;
        self.notify_characteristic = None;
        self.snapshot.write_channel_ready = false;
    }

    fn set_status(&mut self, status: impl Into<String>) {
        self.snapshot.status_message = status.into();
    }

    fn publish(&self) {
        let _ = self
            .event_sender
            .send(AppEvent::LinkChanged(self.snapshot.clone()));
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

fn adapter_state_for(state: LinkState) -> AdapterState {
    match state {
        LinkState::Unauthorized => AdapterState::Unauthorized,
        LinkState::Unsupported => AdapterState::Unsupported,
        LinkState::PoweredOff => AdapterState::PoweredOff,
        _ => AdapterState::PoweredOn,
    }
}
