//! Lock wire protocol - value types, TLV codec, envelope crypto and chunking
//!
//! Shared by the lock firmware (`lock-mcu`) and BLE clients
//! (`lock-ble-controller`). Everything here is synchronous and free of I/O.

pub mod ble;
pub mod chunk;
pub mod crypto;
pub mod event;
pub mod model;
pub mod permission;
pub mod request;
pub mod tlv;

pub use ble::{Characteristic, Notification, PayloadKind, Properties, Request, SERVICE_UUID};
pub use chunk::{Chunk, Reassembler};
pub use crypto::{Authentication, AuthenticationMessage, EncryptedData, EncryptedRequest};
pub use event::{EventKind, EventPredicate, LockEvent};
pub use model::{
    FirmwareVersion, Key, KeyCredentials, KeyData, KeyKind, KeyListItem, LockInformation,
    LockStatus, NewKey, UnlockAction,
};
pub use permission::{Permission, Schedule, TimeInterval, Weekdays};
pub use request::{
    ConfirmNewKeyRequest, CreateNewKeyRequest, EventsNotification, KeysNotification,
    ListEventsRequest, ListKeysRequest, RemoveKeyRequest, SetupRequest, UnlockRequest,
};
pub use tlv::TlvConfig;

/// Protocol-level failures
///
/// Decryption and authentication failures are deliberately opaque: they never
/// say which check failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Malformed TLV, unexpected shape or a value outside its domain
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// The AEAD primitive refused to encrypt
    #[error("encryption failed")]
    Encryption,
    /// Wrong secret, wrong key id, tampering or truncation
    #[error("decryption failed")]
    Decryption,
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
