//! Keys, credentials and lock information

use std::fmt;

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::permission::Permission;
use crate::tlv::{TlvDecode, TlvEncode, TlvReader, TlvWriter};
use crate::{Error, Result};

pub const KEY_DATA_LEN: usize = 32;

/// Symmetric secret shared by one key holder and the lock
///
/// Never printed, wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyData([u8; KEY_DATA_LEN]);

impl KeyData {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_DATA_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_DATA_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        <[u8; KEY_DATA_LEN]>::try_from(bytes)
            .map(Self)
            .map_err(|_| {
                Error::invalid(format!(
                    "key data must be {KEY_DATA_LEN} bytes, got {}",
                    bytes.len()
                ))
            })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_DATA_LEN] {
        &self.0
    }
}

impl fmt::Debug for KeyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyData(..)")
    }
}

/// What a client needs to talk to the lock as one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCredentials {
    pub id: Uuid,
    pub secret: KeyData,
}

impl KeyCredentials {
    pub fn new(id: Uuid, secret: KeyData) -> Self {
        Self { id, secret }
    }
}

/// Whether an id refers to a confirmed key or a pending invitation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Key = 0,
    NewKey = 1,
}

impl TryFrom<u8> for KeyKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Key),
            1 => Ok(Self::NewKey),
            other => Err(Error::invalid(format!("unknown key kind {other}"))),
        }
    }
}

/// A confirmed key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub id: Uuid,
    pub name: String,
    pub created: DateTime<Utc>,
    pub permission: Permission,
}

impl Key {
    const ID: u8 = 0x01;
    const NAME: u8 = 0x02;
    const CREATED: u8 = 0x03;
    const PERMISSION: u8 = 0x04;
}

impl TlvEncode for Key {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        writer.uuid(Self::ID, &self.id);
        writer.string(Self::NAME, &self.name);
        writer.date(Self::CREATED, &self.created);
        writer.nested(Self::PERMISSION, &self.permission);
    }
}

impl TlvDecode for Key {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        Ok(Self {
            id: reader.uuid(Self::ID)?,
            name: reader.string(Self::NAME)?,
            created: reader.date(Self::CREATED)?,
            permission: reader.nested(Self::PERMISSION)?,
        })
    }
}

/// An invitation waiting to be confirmed by its recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewKey {
    pub id: Uuid,
    pub name: String,
    pub created: DateTime<Utc>,
    pub permission: Permission,
    pub expiration: DateTime<Utc>,
}

impl NewKey {
    const ID: u8 = 0x01;
    const NAME: u8 = 0x02;
    const CREATED: u8 = 0x03;
    const PERMISSION: u8 = 0x04;
    const EXPIRATION: u8 = 0x05;

    pub fn is_expired(&self, now: &DateTime<Utc>) -> bool {
        *now >= self.expiration
    }

    /// The key this invitation becomes once confirmed
    pub fn confirm(self, now: DateTime<Utc>) -> Key {
        Key {
            id: self.id,
            name: self.name,
            created: now,
            permission: self.permission,
        }
    }
}

impl TlvEncode for NewKey {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        writer.uuid(Self::ID, &self.id);
        writer.string(Self::NAME, &self.name);
        writer.date(Self::CREATED, &self.created);
        writer.nested(Self::PERMISSION, &self.permission);
        writer.date(Self::EXPIRATION, &self.expiration);
    }
}

impl TlvDecode for NewKey {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        Ok(Self {
            id: reader.uuid(Self::ID)?,
            name: reader.string(Self::NAME)?,
            created: reader.date(Self::CREATED)?,
            permission: reader.nested(Self::PERMISSION)?,
            expiration: reader.date(Self::EXPIRATION)?,
        })
    }
}

/// One entry of the lock's key list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyListItem {
    Key(Key),
    NewKey(NewKey),
}

impl KeyListItem {
    const KEY: u8 = 0x01;
    const NEW_KEY: u8 = 0x02;

    pub fn id(&self) -> Uuid {
        match self {
            Self::Key(key) => key.id,
            Self::NewKey(key) => key.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Key(key) => &key.name,
            Self::NewKey(key) => &key.name,
        }
    }

    pub fn permission(&self) -> &Permission {
        match self {
            Self::Key(key) => &key.permission,
            Self::NewKey(key) => &key.permission,
        }
    }

    pub fn kind(&self) -> KeyKind {
        match self {
            Self::Key(_) => KeyKind::Key,
            Self::NewKey(_) => KeyKind::NewKey,
        }
    }
}

impl TlvEncode for KeyListItem {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        match self {
            Self::Key(key) => writer.nested(Self::KEY, key),
            Self::NewKey(key) => writer.nested(Self::NEW_KEY, key),
        }
    }
}

impl TlvDecode for KeyListItem {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        if let Some(key) = reader.optional_nested(Self::KEY)? {
            return Ok(Self::Key(key));
        }
        match reader.optional_nested(Self::NEW_KEY)? {
            Some(key) => Ok(Self::NewKey(key)),
            None => Err(Error::invalid("key list item carries neither key nor new key")),
        }
    }
}

/// Whether the lock still waits for its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Setup = 0,
    Unlock = 1,
}

impl TryFrom<u8> for LockStatus {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Setup),
            1 => Ok(Self::Unlock),
            other => Err(Error::invalid(format!("unknown lock status {other}"))),
        }
    }
}

/// How the lock may be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UnlockAction {
    #[default]
    Default = 0,
    Button = 1,
}

impl TryFrom<u8> for UnlockAction {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Default),
            1 => Ok(Self::Button),
            other => Err(Error::invalid(format!("unknown unlock action {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Plaintext identity and state of a lock, readable without a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInformation {
    pub id: Uuid,
    pub build: u64,
    pub version: FirmwareVersion,
    pub status: LockStatus,
    pub unlock_actions: Vec<UnlockAction>,
}

impl LockInformation {
    const ID: u8 = 0x01;
    const BUILD: u8 = 0x02;
    const VERSION: u8 = 0x03;
    const STATUS: u8 = 0x04;
    const UNLOCK_ACTIONS: u8 = 0x05;
}

impl TlvEncode for LockInformation {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        writer.uuid(Self::ID, &self.id);
        writer.u64(Self::BUILD, self.build);
        writer.bytes(
            Self::VERSION,
            &[self.version.major, self.version.minor, self.version.patch],
        );
        writer.u8(Self::STATUS, self.status as u8);
        let actions: Vec<u8> = self.unlock_actions.iter().map(|a| *a as u8).collect();
        writer.bytes(Self::UNLOCK_ACTIONS, &actions);
    }
}

impl TlvDecode for LockInformation {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        let [major, minor, patch] = reader.array::<3>(Self::VERSION)?;
        let unlock_actions: Vec<UnlockAction> = reader
            .bytes(Self::UNLOCK_ACTIONS)?
            .iter()
            .map(|raw| UnlockAction::try_from(*raw))
            .collect::<Result<_>>()?;

        Ok(Self {
            id: reader.uuid(Self::ID)?,
            build: reader.u64(Self::BUILD)?,
            version: FirmwareVersion {
                major,
                minor,
                patch,
            },
            status: LockStatus::try_from(reader.u8(Self::STATUS)?)?,
            unlock_actions,
        })
    }
}
