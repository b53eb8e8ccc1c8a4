//! BLE Scanner Module
//!
//! Reports every advertisement heard by the WinRT watcher. Filtering is the
//! link's job, so nothing is dropped here.

use crate::domain::models::DeviceHandle;
use crate::infrastructure::bluetooth::service::TransportEventSink;
use crate::infrastructure::bluetooth::transport::{Advertisement, TransportEvent};
use anyhow::Result;
use tracing::info;
use uuid::Uuid;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Foundation::TypedEventHandler;

/// Device identifiers are the 48-bit Bluetooth address in hex
pub fn device_id(address: u64) -> String {
    format!("{:012X}", address)
}

pub fn parse_device_id(id: &str) -> Result<u64> {
    u64::from_str_radix(id, 16).map_err(|e| anyhow::anyhow!("Invalid device id '{}': {}", id, e))
}

pub struct BleScanner {
    watcher: Option<BluetoothLEAdvertisementWatcher>,
    sink: TransportEventSink,
}

impl BleScanner {
    pub fn new(sink: TransportEventSink) -> Self {
        Self {
            watcher: None,
            sink,
        }
    }

    /// Start an active, unfiltered scan
    pub fn start(&mut self) -> Result<()> {
        // Stop any existing scan
        self.stop()?;

        info!("Starting BLE scan");
        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let sink = self.sink.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let adv = args.Advertisement()?;
                    let uuids = adv.ServiceUuids()?;
                    let mut service_uuids = Vec::new();
                    for i in 0..uuids.Size()? {
                        service_uuids.push(Uuid::from_u128(uuids.GetAt(i)?.to_u128()));
                    }

                    let name = adv.LocalName()?.to_string();
                    let address = args.BluetoothAddress()?;
                    let rssi = args.RawSignalStrengthInDBm()?;

                    sink.emit(TransportEvent::Discovered(Advertisement {
                        device: DeviceHandle::new(
                            device_id(address),
                            (!name.is_empty()).then_some(name),
                        ),
                        service_uuids,
                        rssi: Some(rssi),
                    }));
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;
        self.watcher = Some(watcher);

        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if let Some(watcher) = self.watcher.take() {
            info!("Stopping BLE scan...");
            watcher.Stop()?;
        }
        Ok(())
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_round_trip() {
        let id = device_id(0xD1_2A_44_00_9F_01);
        assert_eq!(id, "D12A44009F01");
        assert_eq!(parse_device_id(&id).unwrap(), 0xD1_2A_44_00_9F_01);
        assert!(parse_device_id("zz").is_err());
    }
}
