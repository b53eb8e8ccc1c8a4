//! BLE Connection Module
//!
//! WinRT implementation of the transport capabilities. Every request starts
//! the WinRT operation and returns; the outcome is posted back to the link
//! loop as a [`TransportEvent`].

use crate::domain::models::DeviceHandle;
use crate::infrastructure::bluetooth::error::{LinkError, Result as LinkResult};
use crate::infrastructure::bluetooth::protocol::MIN_WRITE_LEN;
use crate::infrastructure::bluetooth::scanner::{parse_device_id, BleScanner};
use crate::infrastructure::bluetooth::service::TransportEventSink;
use crate::infrastructure::bluetooth::transport::{
    AdapterState, Characteristic, CharacteristicProperties, ScanningAndConnecting,
    ServiceAndCharacteristicDiscovery, TransportEvent, WriteType,
};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCharacteristicProperties,
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus,
    GattDeviceService, GattSession, GattValueChangedEventArgs, GattWriteOption,
};
use windows::Devices::Bluetooth::{BluetoothAdapter, BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

/// Per-device WinRT objects kept alive while connected
struct GattLink {
    device: BluetoothLEDevice,
    session: Option<GattSession>,
    services: HashMap<Uuid, GattDeviceService>,
    characteristics: HashMap<Uuid, GattCharacteristic>,
}

type Registry = Arc<Mutex<HashMap<String, GattLink>>>;

pub struct WinRtTransport {
    scanner: BleScanner,
    sink: TransportEventSink,
    links: Registry,
}

impl WinRtTransport {
    /// Create the adapter and report the radio's availability.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(sink: TransportEventSink) -> Result<Self> {
        let probe_sink = sink.clone();
        tokio::spawn(async move {
            let state = match probe_adapter().await {
                Ok(state) => state,
                Err(e) => {
                    error!("Failed to query Bluetooth adapter: {}", e);
                    AdapterState::Unsupported
                }
            };
            probe_sink.emit(TransportEvent::AdapterStateChanged(state));
        });

        Ok(Self {
            scanner: BleScanner::new(sink.clone()),
            sink,
            links: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn with_link<R>(&self, device: &DeviceHandle, f: impl FnOnce(&GattLink) -> R) -> Option<R> {
        let links = self.links.lock().ok()?;
        links.get(&device.id).map(f)
    }
}

async fn probe_adapter() -> Result<AdapterState> {
    let adapter = BluetoothAdapter::GetDefaultAsync()?.await?;
    if adapter.IsLowEnergySupported()? {
        info!("Bluetooth LE adapter available");
        Ok(AdapterState::PoweredOn)
    } else {
        warn!("Bluetooth adapter does not support LE");
        Ok(AdapterState::Unsupported)
    }
}

fn to_guid(uuid: Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

fn to_uuid(guid: GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

impl ScanningAndConnecting for WinRtTransport {
    fn start_scan(&mut self) -> LinkResult<()> {
        self.scanner
            .start()
            .map_err(|e| LinkError::Transport(e.to_string()))
    }

    fn stop_scan(&mut self) {
        if let Err(e) = self.scanner.stop() {
            warn!("Failed to stop scan: {}", e);
        }
    }

    fn connect(&mut self, device: &DeviceHandle) {
        let sink = self.sink.clone();
        let links = self.links.clone();
        let handle = device.clone();
        tokio::spawn(async move {
            match open_link(&handle, &links, &sink).await {
                Ok(()) => sink.emit(TransportEvent::Connected(handle)),
                Err(e) => sink.emit(TransportEvent::ConnectFailed {
                    device: handle,
                    reason: Some(e.to_string()),
                }),
            }
        });
    }

    fn cancel_connection(&mut self, device: &DeviceHandle) {
        let removed = self
            .links
            .lock()
            .ok()
            .and_then(|mut links| links.remove(&device.id));

        if let Some(link) = removed {
            for service in link.services.values() {
                let _ = service.Close();
            }
            if let Some(session) = link.session {
                let _ = session.Close();
            }
            let _ = link.device.Close();
            info!("Closed connection to {}", device);
        }

        // Closing does not reliably raise a status change, report it here.
        self.sink.emit(TransportEvent::Disconnected {
            device: device.clone(),
            error: None,
        });
    }
}

/// Resolve the device, keep a GATT session open and watch its status
async fn open_link(device: &DeviceHandle, links: &Registry, sink: &TransportEventSink) -> Result<()> {
    let address = parse_device_id(&device.id)?;
    let le_device = BluetoothLEDevice::FromBluetoothAddressAsync(address)?.await?;
    info!("Device resolved: {:?}", le_device.Name()?);

    // GattSession with MaintainConnection keeps Windows from dropping the link
    let session = match GattSession::FromDeviceIdAsync(&le_device.BluetoothDeviceId()?)?.await {
        Ok(session) => {
            session.SetMaintainConnection(true)?;
            Some(session)
        }
        Err(e) => {
            warn!("Failed to create GattSession, continuing anyway: {}", e);
            None
        }
    };

    let status_sink = sink.clone();
    let status_links = links.clone();
    let handle = device.clone();
    let status_handler =
        TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
            if let Some(dev) = dev.as_ref() {
                if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                    // Only links still registered were lost; cancelled ones are gone already
                    let lost = status_links
                        .lock()
                        .ok()
                        .and_then(|mut links| links.remove(&handle.id));
                    if lost.is_some() {
                        status_sink.emit(TransportEvent::Disconnected {
                            device: handle.clone(),
                            error: Some("Connection lost".to_string()),
                        });
                    }
                }
            }
            Ok(())
        });
    le_device.ConnectionStatusChanged(&status_handler)?;

    let mut registry = links
        .lock()
        .map_err(|_| anyhow::anyhow!("Lock error"))?;
    registry.insert(
        device.id.clone(),
        GattLink {
            device: le_device,
            session,
            services: HashMap::new(),
            characteristics: HashMap::new(),
        },
    );
    Ok(())
}

async fn fetch_services(le_device: BluetoothLEDevice, filter: Vec<Uuid>) -> Result<Vec<GattDeviceService>> {
    let mut found = Vec::new();
    let results = if filter.is_empty() {
        vec![le_device.GetGattServicesAsync()?.await?]
    } else {
        let mut results = Vec::new();
        for uuid in filter {
            results.push(le_device.GetGattServicesForUuidAsync(to_guid(uuid))?.await?);
        }
        results
    };

    for result in results {
        if result.Status()? != GattCommunicationStatus::Success {
            anyhow::bail!("Failed to get GATT services: {:?}", result.Status()?);
        }
        let services = result.Services()?;
        for i in 0..services.Size()? {
            found.push(services.GetAt(i)?);
        }
    }
    Ok(found)
}

async fn fetch_characteristics(service: GattDeviceService) -> Result<Vec<GattCharacteristic>> {
    let access_status = service.RequestAccessAsync()?.await?;
    debug!("Service access status: {:?}", access_status);

    let result = service.GetCharacteristicsAsync()?.await?;
    if result.Status()? != GattCommunicationStatus::Success {
        anyhow::bail!("Failed to get characteristics: {:?}", result.Status()?);
    }
    let characteristics = result.Characteristics()?;
    let mut found = Vec::new();
    for i in 0..characteristics.Size()? {
        found.push(characteristics.GetAt(i)?);
    }
    Ok(found)
}

fn describe(characteristic: &GattCharacteristic, service: Uuid) -> Result<Characteristic> {
    let props = characteristic.CharacteristicProperties()?;
    Ok(Characteristic {
        uuid: to_uuid(characteristic.Uuid()?),
        service,
        properties: CharacteristicProperties {
            write: props.contains(GattCharacteristicProperties::Write),
            write_without_response: props
                .contains(GattCharacteristicProperties::WriteWithoutResponse),
            notify: props.contains(GattCharacteristicProperties::Notify),
        },
    })
}

fn read_buffer(buffer: &IBuffer) -> Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

impl ServiceAndCharacteristicDiscovery for WinRtTransport {
    fn discover_services(&mut self, device: &DeviceHandle, services: &[Uuid]) {
        let Some(le_device) = self.with_link(device, |link| link.device.clone()) else {
            warn!("Service discovery requested for unknown device {}", device);
            return;
        };
        let sink = self.sink.clone();
        let links = self.links.clone();
        let handle = device.clone();
        let filter = services.to_vec();

        tokio::spawn(async move {
            let result = match fetch_services(le_device, filter).await {
                Ok(found) => {
                    let mut uuids = Vec::new();
                    if let Ok(mut registry) = links.lock() {
                        if let Some(link) = registry.get_mut(&handle.id) {
                            for service in found {
                                if let Ok(guid) = service.Uuid() {
                                    uuids.push(to_uuid(guid));
                                    link.services.insert(to_uuid(guid), service);
                                }
                            }
                        }
                    }
                    Ok(uuids)
                }
                Err(e) => Err(e.to_string()),
            };
            sink.emit(TransportEvent::ServicesDiscovered {
                device: handle,
                result,
            });
        });
    }

    fn discover_characteristics(&mut self, device: &DeviceHandle, service: Uuid) {
        let Some(Some(gatt_service)) =
            self.with_link(device, |link| link.services.get(&service).cloned())
        else {
            warn!("Unknown service {} on {}", service, device);
            return;
        };
        let sink = self.sink.clone();
        let links = self.links.clone();
        let handle = device.clone();

        tokio::spawn(async move {
            let result = match fetch_characteristics(gatt_service).await {
                Ok(found) => {
                    let mut described = Vec::new();
                    if let Ok(mut registry) = links.lock() {
                        if let Some(link) = registry.get_mut(&handle.id) {
                            for characteristic in found {
                                match describe(&characteristic, service) {
                                    Ok(info) => {
                                        link.characteristics.insert(info.uuid, characteristic);
                                        described.push(info);
                                    }
                                    Err(e) => warn!("Skipping characteristic: {}", e),
                                }
                            }
                        }
                    }
                    Ok(described)
                }
                Err(e) => Err(e.to_string()),
            };
            sink.emit(TransportEvent::CharacteristicsDiscovered {
                device: handle,
                service,
                result,
            });
        });
    }

    fn set_notify(&mut self, device: &DeviceHandle, characteristic: &Characteristic, enabled: bool) {
        let Some(Some(gatt_char)) = self.with_link(device, |link| {
            link.characteristics.get(&characteristic.uuid).cloned()
        }) else {
            warn!("Unknown characteristic {}", characteristic.uuid);
            return;
        };
        let sink = self.sink.clone();
        let uuid = characteristic.uuid;

        tokio::spawn(async move {
            let result = async {
                if enabled {
                    let value_sink = sink.clone();
                    let handler = TypedEventHandler::new(
                        move |_: windows::core::Ref<GattCharacteristic>,
                              args: windows::core::Ref<GattValueChangedEventArgs>| {
                            if let Some(args) = args.as_ref() {
                                if let Ok(value) = read_buffer(&args.CharacteristicValue()?) {
                                    value_sink.emit(TransportEvent::ValueUpdated {
                                        characteristic: uuid,
                                        value,
                                    });
                                }
                            }
                            Ok(())
                        },
                    );
                    gatt_char.ValueChanged(&handler)?;
                }

                let descriptor = if enabled {
                    GattClientCharacteristicConfigurationDescriptorValue::Notify
                } else {
                    GattClientCharacteristicConfigurationDescriptorValue::None
                };
                let status = gatt_char
                    .WriteClientCharacteristicConfigurationDescriptorAsync(descriptor)?
                    .await?;
                if status != GattCommunicationStatus::Success {
                    anyhow::bail!("Notification subscription returned status: {:?}", status);
                }
                Ok::<(), anyhow::Error>(())
            }
            .await;

            match result {
                Ok(()) => info!("Notifications {} on {}", if enabled { "enabled" } else { "disabled" }, uuid),
                Err(e) => warn!("Could not change notifications on {}: {}", uuid, e),
            }
        });
    }

    fn max_write_len(&self, device: &DeviceHandle, _write_type: WriteType) -> usize {
        self.with_link(device, |link| {
            link.session
                .as_ref()
                .and_then(|session| session.MaxPduSize().ok())
                .map(|pdu| (pdu as usize).saturating_sub(3))
        })
        .flatten()
        .filter(|len| *len > 0)
        .unwrap_or(MIN_WRITE_LEN)
    }

    fn write(
        &mut self,
        device: &DeviceHandle,
        characteristic: &Characteristic,
        data: &[u8],
        write_type: WriteType,
    ) -> LinkResult<()> {
        let gatt_char = self
            .with_link(device, |link| link.characteristics.get(&characteristic.uuid).cloned())
            .flatten()
            .ok_or(LinkError::NoWriteChannel)?;

        let transport_err = |e: windows::core::Error| LinkError::Transport(e.to_string());
        let writer = DataWriter::new().map_err(transport_err)?;
        writer.WriteBytes(data).map_err(transport_err)?;
        let buffer = writer.DetachBuffer().map_err(transport_err)?;

        let option = match write_type {
            WriteType::WithResponse => GattWriteOption::WriteWithResponse,
            WriteType::WithoutResponse => GattWriteOption::WriteWithoutResponse,
        };
        // Started here so chunks reach the stack in order; completion is awaited off-loop
        let operation = gatt_char
            .WriteValueWithOptionAsync(&buffer, option)
            .map_err(transport_err)?;

        let sink = self.sink.clone();
        let uuid = characteristic.uuid;
        tokio::spawn(async move {
            let error = match operation.await {
                Ok(GattCommunicationStatus::Success) => None,
                Ok(status) => Some(format!("{:?}", status)),
                Err(e) => Some(e.to_string()),
            };
            sink.emit(TransportEvent::WriteCompleted {
                characteristic: uuid,
                error,
            });
        });
        Ok(())
    }
}
