//! Recording fakes for the transport and the reconnect timer

use crate::domain::models::DeviceHandle;
use crate::infrastructure::bluetooth::error::{LinkError, Result};
use crate::infrastructure::bluetooth::link::LinkConfig;
use crate::infrastructure::bluetooth::reconnect::{ReconnectScheduler, ReconnectTicket};
use crate::infrastructure::bluetooth::transport::{
    Advertisement, Characteristic, CharacteristicProperties, ScanningAndConnecting,
    ServiceAndCharacteristicDiscovery, WriteType,
};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    StartScan,
    StopScan,
    Connect(String),
    CancelConnection(String),
    DiscoverServices(String, Vec<Uuid>),
    DiscoverCharacteristics(String, Uuid),
    SetNotify(Uuid, bool),
    Write {
        characteristic: Uuid,
        data: Vec<u8>,
        write_type: WriteType,
    },
}

#[derive(Debug)]
pub struct FakeTransport {
    pub calls: Vec<Call>,
    pub max_write_len: usize,
    /// Index (among writes) of the one write that fails
    pub fail_write_at: Option<usize>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            max_write_len: 182,
            fail_write_at: None,
        }
    }
}

impl ScanningAndConnecting for FakeTransport {
    fn start_scan(&mut self) -> Result<()> {
        self.calls.push(Call::StartScan);
        Ok(())
    }

    fn stop_scan(&mut self) {
        self.calls.push(Call::StopScan);
    }

    fn connect(&mut self, device: &DeviceHandle) {
        self.calls.push(Call::Connect(device.id.clone()));
    }

    fn cancel_connection(&mut self, device: &DeviceHandle) {
        self.calls.push(Call::CancelConnection(device.id.clone()));
    }
}

impl ServiceAndCharacteristicDiscovery for FakeTransport {
    fn discover_services(&mut self, device: &DeviceHandle, services: &[Uuid]) {
        self.calls
            .push(Call::DiscoverServices(device.id.clone(), services.to_vec()));
    }

    fn discover_characteristics(&mut self, device: &DeviceHandle, service: Uuid) {
        self.calls
            .push(Call::DiscoverCharacteristics(device.id.clone(), service));
    }

    fn set_notify(&mut self, _device: &DeviceHandle, characteristic: &Characteristic, enabled: bool) {
        self.calls.push(Call::SetNotify(characteristic.uuid, enabled));
    }

    fn max_write_len(&self, _device: &DeviceHandle, _write_type: WriteType) -> usize {
        self.max_write_len
    }

    fn write(
        &mut self,
        _device: &DeviceHandle,
        characteristic: &Characteristic,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        let written = self
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Write { .. }))
            .count();
        if self.fail_write_at == Some(written) {
            self.fail_write_at = None;
            return Err(LinkError::Transport("write failed".into()));
        }
        self.calls.push(Call::Write {
            characteristic: characteristic.uuid,
            data: data.to_vec(),
            write_type,
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeScheduler {
    pub scheduled: Vec<(Duration, ReconnectTicket)>,
}

impl ReconnectScheduler for FakeScheduler {
    fn schedule(&mut self, delay: Duration, ticket: ReconnectTicket) {
        self.scheduled.push((delay, ticket));
    }
}

pub fn device(id: &str, name: &str) -> DeviceHandle {
    DeviceHandle::new(id, Some(name.to_string()))
}

pub fn advert(id: &str, name: Option<&str>, service_uuids: Vec<Uuid>) -> Advertisement {
    Advertisement {
        device: DeviceHandle::new(id, name.map(str::to_string)),
        service_uuids,
        rssi: Some(-60),
    }
}

/// The receiver's text (write) and status (notify) characteristics
pub fn nus_characteristics() -> Vec<Characteristic> {
    let config = LinkConfig::default();
    vec![
        Characteristic {
            uuid: config.text_char_uuid,
            service: config.service_uuid,
            properties: CharacteristicProperties {
                write: true,
                write_without_response: true,
                notify: false,
            },
        },
        Characteristic {
            uuid: config.status_char_uuid,
            service: config.service_uuid,
            properties: CharacteristicProperties {
                notify: true,
                ..Default::default()
            },
        },
    ]
}
