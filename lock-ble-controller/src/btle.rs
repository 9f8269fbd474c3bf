//! `btleplug` backed [`Central`]
//!
//! Scanning for locks, and the transport [`crate::ble::LockClient`] uses on
//! desktop platforms.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central as _, CentralEvent, CharPropFlags, Characteristic as GattCharacteristic,
    Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::{StreamExt, future};
use lock_proto::{Properties, SERVICE_UUID};

use crate::central::{Attribute, Central, ValueStream};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct BtleConfig {
    /// ATT MTU reported to the protocol layer; btleplug does not expose
    /// the negotiated value
    pub mtu: u16,
    /// Applied to every transport call, and to the gap between two
    /// notification values
    pub timeout: Duration,
    pub scan_duration: Duration,
}

impl Default for BtleConfig {
    fn default() -> Self {
        Self {
            mtu: 185,
            timeout: Duration::from_secs(10),
            scan_duration: Duration::from_secs(5),
        }
    }
}

/// A discovered BLE device
#[derive(Debug, Clone)]
pub struct LockDevice {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    /// Advertises the lock service
    pub is_lock: bool,
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(Error::NoAdapter)
}

pub struct BtleCentral {
    adapter: Adapter,
    config: BtleConfig,
}

impl BtleCentral {
    pub fn new(adapter: Adapter, config: BtleConfig) -> Self {
        Self { adapter, config }
    }

    /// Central on the default adapter
    pub async fn with_default_adapter(config: BtleConfig) -> Result<Self> {
        Ok(Self::new(get_adapter().await?, config))
    }

    pub fn config(&self) -> &BtleConfig {
        &self.config
    }

    /// Scan for `scan_duration` and list every device seen
    pub async fn scan(&self) -> Result<Vec<LockDevice>> {
        let peripherals = self.scan_peripherals().await?;
        let mut devices = Vec::new();

        for peripheral in peripherals {
            if let Some(props) = peripheral.properties().await? {
                let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
                let address = peripheral.address().to_string();
                let is_lock = props.services.contains(&SERVICE_UUID);

                devices.push(LockDevice {
                    name,
                    address,
                    rssi: props.rssi,
                    is_lock,
                });
            }
        }

        tracing::info!(found = devices.len(), "scan finished");
        Ok(devices)
    }

    /// Find a lock by name/address pattern, or the first lock advertising
    /// the lock service
    pub async fn find_device(&self, target: Option<&str>) -> Result<Peripheral> {
        for peripheral in self.scan_peripherals().await? {
            if let Some(props) = peripheral.properties().await? {
                let name = props.local_name.unwrap_or_default();
                let addr = peripheral.address().to_string();

                let matches = match target {
                    Some(t) => name.contains(t) || addr.contains(t),
                    None => props.services.contains(&SERVICE_UUID),
                };

                if matches {
                    tracing::info!(%name, %addr, "found lock");
                    return Ok(peripheral);
                }
            }
        }

        Err(Error::DeviceNotFound)
    }

    async fn scan_peripherals(&self) -> Result<Vec<Peripheral>> {
        tracing::debug!(duration = ?self.config.scan_duration, "scanning");
        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(self.config.scan_duration).await;

        let peripherals = self.adapter.peripherals().await;
        self.adapter.stop_scan().await?;
        Ok(peripherals?)
    }

    async fn timed<T>(&self, call: impl Future<Output = btleplug::Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Timeout),
        }
    }

    fn characteristic(
        peripheral: &Peripheral,
        attribute: &Attribute,
    ) -> Result<GattCharacteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == attribute.uuid && c.service_uuid == attribute.service)
            .ok_or(Error::CharacteristicNotFound(attribute.uuid))
    }
}

fn properties(flags: CharPropFlags) -> Properties {
    let mut properties = Properties::empty();
    if flags.contains(CharPropFlags::READ) {
        properties |= Properties::READ;
    }
    if flags.intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE) {
        properties |= Properties::WRITE;
    }
    if flags.intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE) {
        properties |= Properties::NOTIFY;
    }
    properties
}

#[async_trait]
impl Central for BtleCentral {
    type Peripheral = Peripheral;

    async fn connect(&self, peripheral: &Peripheral) -> Result<()> {
        self.timed(peripheral.connect()).await
    }

    async fn discover(&self, peripheral: &Peripheral) -> Result<Vec<Attribute>> {
        self.timed(peripheral.discover_services()).await?;

        Ok(peripheral
            .characteristics()
            .into_iter()
            .map(|c| Attribute {
                uuid: c.uuid,
                service: c.service_uuid,
                properties: properties(c.properties),
            })
            .collect())
    }

    async fn read(&self, peripheral: &Peripheral, attribute: &Attribute) -> Result<Vec<u8>> {
        let characteristic = Self::characteristic(peripheral, attribute)?;
        self.timed(peripheral.read(&characteristic)).await
    }

    async fn write(
        &self,
        peripheral: &Peripheral,
        attribute: &Attribute,
        value: &[u8],
        with_response: bool,
    ) -> Result<()> {
        let characteristic = Self::characteristic(peripheral, attribute)?;
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.timed(peripheral.write(&characteristic, value, write_type))
            .await
    }

    async fn notify(&self, peripheral: &Peripheral, attribute: &Attribute) -> Result<ValueStream> {
        let characteristic = Self::characteristic(peripheral, attribute)?;
        // Take the notification stream before subscribing so nothing is lost
        let notifications = self.timed(peripheral.notifications()).await?;
        let events = self.timed(self.adapter.events()).await?;
        self.timed(peripheral.subscribe(&characteristic)).await?;

        // The notification stream outlives the link; cut it on disconnect
        let id = peripheral.id();
        let disconnected = events
            .filter(move |event| {
                future::ready(matches!(event, CentralEvent::DeviceDisconnected(d) if *d == id))
            })
            .into_future();

        let uuid = attribute.uuid;
        Ok(notifications
            .filter_map(move |n| async move { (n.uuid == uuid).then_some(n.value) })
            .take_until(disconnected)
            .boxed())
    }

    async fn stop_notify(&self, peripheral: &Peripheral, attribute: &Attribute) -> Result<()> {
        let characteristic = Self::characteristic(peripheral, attribute)?;
        self.timed(peripheral.unsubscribe(&characteristic)).await
    }

    async fn disconnect(&self, peripheral: &Peripheral) -> Result<()> {
        self.timed(peripheral.disconnect()).await
    }

    async fn mtu(&self, _peripheral: &Peripheral) -> Result<u16> {
        Ok(self.config.mtu)
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_mapping() {
        assert_eq!(properties(CharPropFlags::READ), Properties::READ);
        assert_eq!(
            properties(CharPropFlags::WRITE_WITHOUT_RESPONSE | CharPropFlags::READ),
            Properties::READ | Properties::WRITE
        );
        assert_eq!(properties(CharPropFlags::INDICATE), Properties::NOTIFY);
        assert_eq!(properties(CharPropFlags::BROADCAST), Properties::empty());
    }
}
