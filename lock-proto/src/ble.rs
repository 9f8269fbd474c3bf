//! BLE GATT catalog of the lock service
//!
//! Every characteristic lives in one service and has a fixed payload kind
//! that decides how its value is encoded:
//!
//! * `Plain`: TLV of the value, readable by anyone (`Information`)
//! * `Encrypted`: TLV of an [`EncryptedRequest`] wrapping the TLV request
//! * `Authenticated`: TLV of an [`Authentication`] only (`ListKeys`)
//! * `Chunked`: TLV [`Chunk`]s of an encrypted notification value

use std::fmt;

use uuid::Uuid;

use crate::chunk::{self, Chunk};
use crate::crypto::{Authentication, EncryptedData, EncryptedRequest};
use crate::model::KeyCredentials;
use crate::tlv::{self, TlvConfig, TlvDecode, TlvEncode};
use crate::{Error, Result};

/// BLE Service UUID: 4c4f1000-5e7c-1c3e-0000-000000000000
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x4c4f1000_5e7c_1c3e_0000_000000000000);

const fn characteristic_uuid(index: u128) -> Uuid {
    Uuid::from_u128(0x4c4f1000_5e7c_1c3e_0000_000000000000 | (index << 96))
}

bitflags::bitflags! {
    /// GATT properties a characteristic must offer
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Properties: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const NOTIFY = 1 << 2;
    }
}

/// How a characteristic value is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Plain,
    Authenticated,
    Encrypted,
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Lock identity and status (read)
    Information,
    /// Claim an unconfigured lock (write)
    Setup,
    Unlock,
    /// Invite a new key (write, administrators)
    CreateNewKey,
    /// Accept an invitation (write, invitation credentials)
    ConfirmNewKey,
    RemoveKey,
    /// Trigger a key list (write, administrators)
    ListKeys,
    /// Pages of the key list (notify)
    KeysNotification,
    /// Trigger an event list (write)
    ListEvents,
    /// Pages of the event list (notify)
    EventsNotification,
}

impl Characteristic {
    pub const ALL: [Characteristic; 10] = [
        Self::Information,
        Self::Setup,
        Self::Unlock,
        Self::CreateNewKey,
        Self::ConfirmNewKey,
        Self::RemoveKey,
        Self::ListKeys,
        Self::KeysNotification,
        Self::ListEvents,
        Self::EventsNotification,
    ];

    pub fn uuid(self) -> Uuid {
        match self {
            Self::Information => characteristic_uuid(0x1),
            Self::Setup => characteristic_uuid(0x2),
            Self::Unlock => characteristic_uuid(0x3),
            Self::CreateNewKey => characteristic_uuid(0x4),
            Self::ConfirmNewKey => characteristic_uuid(0x5),
            Self::RemoveKey => characteristic_uuid(0x6),
            Self::ListKeys => characteristic_uuid(0x7),
            Self::KeysNotification => characteristic_uuid(0x8),
            Self::ListEvents => characteristic_uuid(0x9),
            Self::EventsNotification => characteristic_uuid(0xa),
        }
    }

    pub fn service(self) -> Uuid {
        SERVICE_UUID
    }

    pub fn properties(self) -> Properties {
        match self {
            Self::Information => Properties::READ,
            Self::KeysNotification | Self::EventsNotification => Properties::NOTIFY,
            _ => Properties::WRITE,
        }
    }

    pub fn payload(self) -> PayloadKind {
        match self {
            Self::Information => PayloadKind::Plain,
            Self::ListKeys => PayloadKind::Authenticated,
            Self::KeysNotification | Self::EventsNotification => PayloadKind::Chunked,
            Self::Setup
            | Self::Unlock
            | Self::CreateNewKey
            | Self::ConfirmNewKey
            | Self::RemoveKey
            | Self::ListEvents => PayloadKind::Encrypted,
        }
    }

    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.uuid() == *uuid)
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Information => "information",
            Self::Setup => "setup",
            Self::Unlock => "unlock",
            Self::CreateNewKey => "create-new-key",
            Self::ConfirmNewKey => "confirm-new-key",
            Self::RemoveKey => "remove-key",
            Self::ListKeys => "list-keys",
            Self::KeysNotification => "keys-notification",
            Self::ListEvents => "list-events",
            Self::EventsNotification => "events-notification",
        };
        write!(f, "{name} ({})", self.uuid())
    }
}

/// A value written by the client to a write characteristic
pub trait Request: TlvEncode + TlvDecode {
    const CHARACTERISTIC: Characteristic;
}

/// A page the lock notifies back on a notify characteristic
pub trait Notification: TlvEncode + TlvDecode {
    const CHARACTERISTIC: Characteristic;

    /// Set on the final page of a response
    fn is_last(&self) -> bool;
}

pub fn encode_plain<T: TlvEncode>(value: &T, config: &TlvConfig) -> Vec<u8> {
    tlv::encode(value, config)
}

pub fn decode_plain<T: TlvDecode>(bytes: &[u8], config: &TlvConfig) -> Result<T> {
    tlv::decode(bytes, config)
}

/// Encode a request for its characteristic under `credentials`
pub fn encode_request<R: Request>(
    request: &R,
    credentials: &KeyCredentials,
    config: &TlvConfig,
) -> Result<Vec<u8>> {
    match R::CHARACTERISTIC.payload() {
        PayloadKind::Encrypted => {
            let plaintext = tlv::encode(request, config);
            let sealed = EncryptedRequest::seal(&plaintext, credentials)?;
            Ok(tlv::encode(&sealed, config))
        }
        PayloadKind::Authenticated => Ok(tlv::encode(&Authentication::new(credentials), config)),
        kind => Err(Error::invalid(format!(
            "{} carries {kind:?} values, not requests",
            R::CHARACTERISTIC
        ))),
    }
}

/// Encrypt a notification for `credentials` and split it into chunk values
/// that each fit one notification at `mtu`
pub fn encode_notification<N: Notification>(
    notification: &N,
    credentials: &KeyCredentials,
    mtu: u16,
    config: &TlvConfig,
) -> Result<Vec<Vec<u8>>> {
    let plaintext = tlv::encode(notification, config);
    let envelope = EncryptedData::encrypt(&plaintext, &credentials.secret, &credentials.id)?;
    let chunks = Chunk::split(&envelope.to_bytes(), chunk::payload_size(mtu));

    tracing::debug!(
        characteristic = %N::CHARACTERISTIC,
        chunks = chunks.len(),
        "notification encoded"
    );

    Ok(chunks
        .iter()
        .map(|chunk| tlv::encode(chunk, config))
        .collect())
}

/// Decrypt and decode one reassembled notification value
pub fn decode_notification<N: Notification>(
    envelope: &[u8],
    credentials: &KeyCredentials,
    config: &TlvConfig,
) -> Result<N> {
    let plaintext =
        EncryptedData::from_bytes(envelope)?.decrypt(&credentials.secret, &credentials.id)?;
    tlv::decode(&plaintext, config)
}
