//! Connect, discover, execute, disconnect
//!
//! Every lock operation runs inside one transaction. The peripheral is
//! disconnected exactly once whatever the outcome, and the first error wins:
//! a failing disconnect only surfaces when everything before it succeeded.
//! If the transaction future is dropped mid-flight, the disconnect is
//! spawned onto the runtime instead.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lock_proto::Characteristic;

use crate::central::{Attribute, Central, ValueStream};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Disconnected,
    Connecting,
    Connected,
    Executing,
    Disconnecting,
}

/// A connected peripheral with its discovered characteristics
pub struct Session<C: Central> {
    central: Arc<C>,
    peripheral: C::Peripheral,
    attributes: Vec<Attribute>,
    mtu: u16,
}

impl<C: Central> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            central: self.central.clone(),
            peripheral: self.peripheral.clone(),
            attributes: self.attributes.clone(),
            mtu: self.mtu,
        }
    }
}

impl<C: Central> Session<C> {
    pub fn central(&self) -> &Arc<C> {
        &self.central
    }

    pub fn peripheral(&self) -> &C::Peripheral {
        &self.peripheral
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Idle limit for notification streams
    pub fn timeout(&self) -> Duration {
        self.central.timeout()
    }

    pub fn attribute(&self, characteristic: Characteristic) -> Result<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.uuid == characteristic.uuid())
            .ok_or(Error::CharacteristicNotFound(characteristic.uuid()))
    }

    pub async fn read(&self, characteristic: Characteristic) -> Result<Vec<u8>> {
        let attribute = self.attribute(characteristic)?;
        self.central.read(&self.peripheral, attribute).await
    }

    pub async fn write(&self, characteristic: Characteristic, value: &[u8]) -> Result<()> {
        let attribute = self.attribute(characteristic)?;
        self.central
            .write(&self.peripheral, attribute, value, true)
            .await
    }

    pub async fn notify(&self, characteristic: Characteristic) -> Result<ValueStream> {
        let attribute = self.attribute(characteristic)?;
        self.central.notify(&self.peripheral, attribute).await
    }
}

/// Disconnects on drop unless the transaction already did
struct DisconnectGuard<C: Central + 'static> {
    central: Option<Arc<C>>,
    peripheral: C::Peripheral,
}

impl<C: Central + 'static> DisconnectGuard<C> {
    async fn disconnect(mut self) -> Result<()> {
        match self.central.take() {
            Some(central) => central.disconnect(&self.peripheral).await,
            None => Ok(()),
        }
    }
}

impl<C: Central + 'static> Drop for DisconnectGuard<C> {
    fn drop(&mut self) {
        let Some(central) = self.central.take() else {
            return;
        };
        let peripheral = self.peripheral.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("transaction dropped, disconnecting in background");
                handle.spawn(async move {
                    if let Err(e) = central.disconnect(&peripheral).await {
                        tracing::warn!(error = %e, "background disconnect failed");
                    }
                });
            }
            Err(_) => tracing::warn!("transaction dropped outside a runtime, not disconnecting"),
        }
    }
}

pub struct Transaction<C: Central + 'static> {
    central: Arc<C>,
    peripheral: C::Peripheral,
    state: TransactionState,
}

impl<C: Central + 'static> Transaction<C> {
    pub fn new(central: Arc<C>, peripheral: C::Peripheral) -> Self {
        Self {
            central,
            peripheral,
            state: TransactionState::Disconnected,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn transition(&mut self, next: TransactionState) {
        tracing::debug!(from = ?self.state, to = ?next, "transaction state");
        self.state = next;
    }

    /// Connect, check that every `required` characteristic is present with
    /// its properties, run `operation`, then disconnect
    pub async fn run<T, F, Fut>(&mut self, required: &[Characteristic], operation: F) -> Result<T>
    where
        F: FnOnce(Session<C>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = DisconnectGuard {
            central: Some(self.central.clone()),
            peripheral: self.peripheral.clone(),
        };

        let result = self.execute(required, operation).await;

        self.transition(TransactionState::Disconnecting);
        let disconnected = guard.disconnect().await;
        self.transition(TransactionState::Disconnected);

        match (result, disconnected) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(disconnect)) => {
                tracing::warn!(
                    error = %disconnect,
                    "disconnect after failed operation also failed"
                );
                Err(e)
            }
        }
    }

    async fn execute<T, F, Fut>(&mut self, required: &[Characteristic], operation: F) -> Result<T>
    where
        F: FnOnce(Session<C>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.transition(TransactionState::Connecting);
        self.central.connect(&self.peripheral).await?;
        self.transition(TransactionState::Connected);

        let attributes = self.central.discover(&self.peripheral).await?;
        check_required(&attributes, required)?;
        let mtu = self.central.mtu(&self.peripheral).await?;

        self.transition(TransactionState::Executing);
        operation(Session {
            central: self.central.clone(),
            peripheral: self.peripheral.clone(),
            attributes,
            mtu,
        })
        .await
    }
}

/// Run `operation` in a fresh transaction
pub async fn with_connection<C, T, F, Fut>(
    central: Arc<C>,
    peripheral: C::Peripheral,
    required: &[Characteristic],
    operation: F,
) -> Result<T>
where
    C: Central + 'static,
    F: FnOnce(Session<C>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    Transaction::new(central, peripheral)
        .run(required, operation)
        .await
}

fn check_required(attributes: &[Attribute], required: &[Characteristic]) -> Result<()> {
    for characteristic in required {
        if !attributes.iter().any(|a| a.service == characteristic.service()) {
            return Err(Error::ServiceNotFound(characteristic.service()));
        }
        let attribute = attributes
            .iter()
            .find(|a| a.uuid == characteristic.uuid())
            .ok_or(Error::CharacteristicNotFound(characteristic.uuid()))?;
        if !attribute.properties.contains(characteristic.properties()) {
            return Err(Error::InvalidAttribute(characteristic.uuid()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lock_proto::Properties;

    fn attribute(characteristic: Characteristic) -> Attribute {
        Attribute {
            uuid: characteristic.uuid(),
            service: characteristic.service(),
            properties: characteristic.properties(),
        }
    }

    #[test]
    fn test_check_required() {
        let all: Vec<_> = Characteristic::ALL.into_iter().map(attribute).collect();
        assert!(check_required(&all, &Characteristic::ALL).is_ok());

        let missing: Vec<_> = all
            .iter()
            .copied()
            .filter(|a| a.uuid != Characteristic::Unlock.uuid())
            .collect();
        assert!(matches!(
            check_required(&missing, &[Characteristic::Unlock]),
            Err(Error::CharacteristicNotFound(uuid)) if uuid == Characteristic::Unlock.uuid()
        ));

        assert!(matches!(
            check_required(&[], &[Characteristic::Information]),
            Err(Error::ServiceNotFound(uuid)) if uuid == lock_proto::SERVICE_UUID
        ));

        let mut read_only = all.clone();
        for a in &mut read_only {
            a.properties = Properties::READ;
        }
        assert!(matches!(
            check_required(&read_only, &[Characteristic::ListKeys]),
            Err(Error::InvalidAttribute(_))
        ));
    }
}
