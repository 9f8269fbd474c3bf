//! A simulated lock behind a mock [`Central`]
//!
//! Writes and reads go to a `lock_mcu::LockServer`; notification responses
//! are pushed to whoever subscribed. Faults can be injected per call kind.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::channel::mpsc;
use futures::StreamExt;
use lock_ble_controller::{Attribute, Central, Error, LockClient, Result, ValueStream};
use lock_mcu::{LockConfig, LockServer, MemoryEventLog, MemoryKeyStore};
use lock_proto::chunk::{Chunk, Reassembler};
use lock_proto::{Characteristic, KeyCredentials, KeyData, TlvConfig};
use uuid::Uuid;

pub type Peripheral = u32;

pub const LOCK_ID: Uuid = Uuid::from_u128(0x10c4);

pub fn shipped() -> KeyCredentials {
    KeyCredentials::new(Uuid::from_u128(0x5e7), KeyData::from_bytes([0x5e; 32]))
}

pub fn owner() -> KeyCredentials {
    KeyCredentials::new(Uuid::from_u128(1), KeyData::from_bytes([1; 32]))
}

/// Which calls fail, and how
#[derive(Debug, Default, Clone)]
pub struct Faults {
    pub connect: bool,
    pub discover: bool,
    pub read: bool,
    pub write: bool,
    pub disconnect: bool,
    /// Accept writes without applying them
    pub ignore_writes: bool,
    /// Flip a bit in every notification value
    pub corrupt_notifications: bool,
    /// Drop the link after this many notification values
    pub disconnect_after_notifications: Option<usize>,
    /// Keep the link up but go silent after this many complete values
    pub stall_after_pages: Option<usize>,
    /// Characteristics left out of discovery
    pub hidden: Vec<Characteristic>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub connect: usize,
    pub disconnect: usize,
    pub write: usize,
    pub notify: usize,
    pub stop_notify: usize,
}

pub struct MockCentral {
    lock: Mutex<LockServer<MemoryKeyStore, MemoryEventLog>>,
    faults: Mutex<Faults>,
    calls: Mutex<Calls>,
    subscribers: Mutex<HashMap<Uuid, mpsc::UnboundedSender<Vec<u8>>>>,
    mtu: u16,
    timeout: Mutex<Duration>,
}

fn injected() -> Error {
    Error::Timeout
}

impl MockCentral {
    pub fn new(mtu: u16) -> Arc<Self> {
        let config = LockConfig::new(LOCK_ID, shipped());
        Arc::new(Self {
            lock: Mutex::new(LockServer::new(
                config,
                MemoryKeyStore::new(),
                MemoryEventLog::new(),
            )),
            faults: Mutex::new(Faults::default()),
            calls: Mutex::new(Calls::default()),
            subscribers: Mutex::new(HashMap::new()),
            mtu,
            timeout: Mutex::new(Duration::from_secs(5)),
        })
    }

    pub fn set_faults(&self, faults: Faults) {
        *self.faults.lock().unwrap() = faults;
    }

    pub fn faults(&self) -> Faults {
        self.faults.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Calls {
        *self.calls.lock().unwrap()
    }

    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock().unwrap() = timeout;
    }

    /// Open notification subscriptions
    pub fn subscriptions(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    pub fn reset_calls(&self) {
        *self.calls.lock().unwrap() = Calls::default();
    }

    pub fn with_lock<T>(
        &self,
        f: impl FnOnce(&mut LockServer<MemoryKeyStore, MemoryEventLog>) -> T,
    ) -> T {
        f(&mut self.lock.lock().unwrap())
    }

    fn deliver(&self, characteristic: Characteristic, values: Vec<Vec<u8>>) {
        let faults = self.faults();
        let mut subscribers = self.subscribers.lock().unwrap();
        let Some(sender) = subscribers.get(&characteristic.uuid()).cloned() else {
            return;
        };

        let mut reassembler = Reassembler::new();
        let mut pages = 0;

        for (i, mut value) in values.into_iter().enumerate() {
            if faults.disconnect_after_notifications == Some(i) {
                subscribers.remove(&characteristic.uuid());
                return;
            }
            if faults.stall_after_pages == Some(pages) {
                return;
            }
            if let Ok(chunk) = lock_proto::tlv::decode::<Chunk>(&value, &TlvConfig::default()) {
                if let Ok(Some(_)) = reassembler.push(chunk) {
                    pages += 1;
                }
            }
            if faults.corrupt_notifications {
                if let Some(last) = value.last_mut() {
                    *last ^= 0x01;
                }
            }
            let _ = sender.unbounded_send(value);
        }
    }
}

#[async_trait]
impl Central for MockCentral {
    type Peripheral = Peripheral;

    async fn connect(&self, _peripheral: &Peripheral) -> Result<()> {
        self.calls.lock().unwrap().connect += 1;
        if self.faults().connect {
            return Err(injected());
        }
        Ok(())
    }

    async fn discover(&self, _peripheral: &Peripheral) -> Result<Vec<Attribute>> {
        let faults = self.faults();
        if faults.discover {
            return Err(injected());
        }
        Ok(Characteristic::ALL
            .into_iter()
            .filter(|c| !faults.hidden.contains(c))
            .map(|c| Attribute {
                uuid: c.uuid(),
                service: c.service(),
                properties: c.properties(),
            })
            .collect())
    }

    async fn read(&self, _peripheral: &Peripheral, attribute: &Attribute) -> Result<Vec<u8>> {
        if self.faults().read {
            return Err(injected());
        }
        self.lock
            .lock()
            .unwrap()
            .read(&attribute.uuid)
            .map_err(|_| Error::InvalidAttribute(attribute.uuid))
    }

    async fn write(
        &self,
        _peripheral: &Peripheral,
        attribute: &Attribute,
        value: &[u8],
        _with_response: bool,
    ) -> Result<()> {
        self.calls.lock().unwrap().write += 1;
        let faults = self.faults();
        if faults.write {
            return Err(injected());
        }
        if faults.ignore_writes {
            return Ok(());
        }

        // A rejected write surfaces as an ATT error
        let response = self
            .lock
            .lock()
            .unwrap()
            .write(&attribute.uuid, value, self.mtu, Utc::now())
            .map_err(|e| Error::Bluetooth(btleplug::Error::Other(Box::new(e))))?;

        if let Some(notifications) = response.notifications {
            self.deliver(notifications.characteristic, notifications.values);
        }
        Ok(())
    }

    async fn notify(&self, _peripheral: &Peripheral, attribute: &Attribute) -> Result<ValueStream> {
        self.calls.lock().unwrap().notify += 1;
        let (sender, receiver) = mpsc::unbounded();
        self.subscribers
            .lock()
            .unwrap()
            .insert(attribute.uuid, sender);
        Ok(receiver.boxed())
    }

    async fn stop_notify(&self, _peripheral: &Peripheral, attribute: &Attribute) -> Result<()> {
        self.calls.lock().unwrap().stop_notify += 1;
        self.subscribers.lock().unwrap().remove(&attribute.uuid);
        Ok(())
    }

    async fn disconnect(&self, _peripheral: &Peripheral) -> Result<()> {
        self.calls.lock().unwrap().disconnect += 1;
        self.subscribers.lock().unwrap().clear();
        if self.faults().disconnect {
            return Err(Error::Disconnected);
        }
        Ok(())
    }

    async fn mtu(&self, _peripheral: &Peripheral) -> Result<u16> {
        Ok(self.mtu)
    }

    fn timeout(&self) -> Duration {
        *self.timeout.lock().unwrap()
    }
}

pub fn client(central: &Arc<MockCentral>) -> LockClient<MockCentral> {
    LockClient::new(central.clone(), 7)
}

/// A lock already set up with [`owner`]
pub async fn configured(mtu: u16) -> (Arc<MockCentral>, LockClient<MockCentral>) {
    let central = MockCentral::new(mtu);
    let client = client(&central);
    client.setup(&shipped(), &owner()).await.unwrap();
    central.reset_calls();
    (central, client)
}
