use uuid::Uuid;

/// Everything a lock operation over BLE can fail with
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Proto(#[from] lock_proto::Error),
    #[error("service {0} not found")]
    ServiceNotFound(Uuid),
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    /// The characteristic exists but lacks a required property
    #[error("characteristic {0} does not support this operation")]
    InvalidAttribute(Uuid),
    #[error("peripheral disconnected")]
    Disconnected,
    #[error("operation timed out")]
    Timeout,
    #[error("bluetooth: {0}")]
    Bluetooth(#[source] btleplug::Error),
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("no lock found")]
    DeviceNotFound,
}

impl Error {
    pub fn is_invalid_data(&self) -> bool {
        matches!(self, Self::Proto(lock_proto::Error::InvalidData(_)))
    }
}

impl From<btleplug::Error> for Error {
    fn from(e: btleplug::Error) -> Self {
        match e {
            btleplug::Error::NotConnected => Self::Disconnected,
            btleplug::Error::TimedOut(_) => Self::Timeout,
            e => Self::Bluetooth(e),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
