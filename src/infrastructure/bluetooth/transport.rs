//! Transport Adapter capabilities
//!
//! The platform BLE stack is reached through two narrow traits. Every request
//! returns immediately; its outcome is reported later as a [`TransportEvent`]
//! delivered on the same serialized context that drives the link.

use crate::domain::models::DeviceHandle;
use crate::infrastructure::bluetooth::error::Result;
use uuid::Uuid;

/// Power/permission state reported by the platform adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unknown,
    Resetting,
    PoweredOff,
    Unauthorized,
    Unsupported,
    PoweredOn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties {
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

impl CharacteristicProperties {
    pub fn is_writable(&self) -> bool {
        self.write || self.write_without_response
    }
}

/// A discovered GATT characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub service: Uuid,
    pub properties: CharacteristicProperties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

/// One received advertisement
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub device: DeviceHandle,
    pub service_uuids: Vec<Uuid>,
    pub rssi: Option<i16>,
}

/// Completions and unsolicited notifications coming from the adapter
#[derive(Debug, Clone)]
pub enum TransportEvent {
    AdapterStateChanged(AdapterState),
    Discovered(Advertisement),
    Connected(DeviceHandle),
    ConnectFailed {
        device: DeviceHandle,
        reason: Option<String>,
    },
    /// `error` is `None` for a disconnect the client asked for
    Disconnected {
        device: DeviceHandle,
        error: Option<String>,
    },
    ServicesDiscovered {
        device: DeviceHandle,
        result: std::result::Result<Vec<Uuid>, String>,
    },
    CharacteristicsDiscovered {
        device: DeviceHandle,
        service: Uuid,
        result: std::result::Result<Vec<Characteristic>, String>,
    },
    WriteCompleted {
        characteristic: Uuid,
        error: Option<String>,
    },
    ValueUpdated {
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

pub trait ScanningAndConnecting {
    /// Begin reporting advertisements from every nearby device
    fn start_scan(&mut self) -> Result<()>;
    fn stop_scan(&mut self);
    fn connect(&mut self, device: &DeviceHandle);
    fn cancel_connection(&mut self, device: &DeviceHandle);
}

pub trait ServiceAndCharacteristicDiscovery {
    /// Discover services, limited to `services` when non-empty
    fn discover_services(&mut self, device: &DeviceHandle, services: &[Uuid]);
    fn discover_characteristics(&mut self, device: &DeviceHandle, service: Uuid);
    fn set_notify(&mut self, device: &DeviceHandle, characteristic: &Characteristic, enabled: bool);
    /// Largest payload a single write of `write_type` may carry
    fn max_write_len(&self, device: &DeviceHandle, write_type: WriteType) -> usize;
    fn write(
        &mut self,
        device: &DeviceHandle,
        characteristic: &Characteristic,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<()>;
}

/// Full adapter surface needed by the link state machine
pub trait BleTransport: ScanningAndConnecting + ServiceAndCharacteristicDiscovery {}

impl<T: ScanningAndConnecting + ServiceAndCharacteristicDiscovery> BleTransport for T {}
