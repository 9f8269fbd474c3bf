//! Transport capability the lock client runs on

use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use lock_proto::Properties;
use uuid::Uuid;

use crate::Result;

/// Raw characteristic values as they arrive
pub type ValueStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// A discovered characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    pub uuid: Uuid,
    pub service: Uuid,
    pub properties: Properties,
}

/// A BLE central able to talk to peripherals of type `Self::Peripheral`
///
/// Implementations own timeouts; nothing above this trait retries.
#[async_trait::async_trait]
pub trait Central: Send + Sync {
    /// Opaque handle to one peripheral
    type Peripheral: Clone + Send + Sync + 'static;

    async fn connect(&self, peripheral: &Self::Peripheral) -> Result<()>;

    /// Discover services and return every characteristic found
    async fn discover(&self, peripheral: &Self::Peripheral) -> Result<Vec<Attribute>>;

    async fn read(&self, peripheral: &Self::Peripheral, attribute: &Attribute) -> Result<Vec<u8>>;

    async fn write(
        &self,
        peripheral: &Self::Peripheral,
        attribute: &Attribute,
        value: &[u8],
        with_response: bool,
    ) -> Result<()>;

    /// Subscribe to `attribute`. The stream should end when the peripheral
    /// disconnects; a stalled stream is cut off after [`Central::timeout`].
    async fn notify(
        &self,
        peripheral: &Self::Peripheral,
        attribute: &Attribute,
    ) -> Result<ValueStream>;

    async fn stop_notify(
        &self,
        peripheral: &Self::Peripheral,
        attribute: &Attribute,
    ) -> Result<()>;

    async fn disconnect(&self, peripheral: &Self::Peripheral) -> Result<()>;

    /// Negotiated ATT MTU
    async fn mtu(&self, peripheral: &Self::Peripheral) -> Result<u16>;

    /// Longest wait for the next notification value
    fn timeout(&self) -> Duration;
}
