//! Requests written to the lock and the notifications it answers with

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::ble::{Characteristic, Notification, Request};
use crate::event::{EventPredicate, LockEvent};
use crate::model::{KeyData, KeyKind, KeyListItem, NewKey, UnlockAction};
use crate::permission::Permission;
use crate::tlv::{TlvDecode, TlvEncode, TlvReader, TlvWriter};
use crate::Result;

fn key_data(reader: &TlvReader<'_>, tag: u8) -> Result<KeyData> {
    KeyData::from_slice(reader.bytes(tag)?)
}

/// Claims an unconfigured lock; `id` and `secret` become the owner key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupRequest {
    pub id: Uuid,
    pub secret: KeyData,
}

impl SetupRequest {
    const ID: u8 = 0x01;
    const SECRET: u8 = 0x02;
}

impl TlvEncode for SetupRequest {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        writer.uuid(Self::ID, &self.id);
        writer.bytes(Self::SECRET, self.secret.as_bytes());
    }
}

impl TlvDecode for SetupRequest {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        Ok(Self {
            id: reader.uuid(Self::ID)?,
            secret: key_data(reader, Self::SECRET)?,
        })
    }
}

impl Request for SetupRequest {
    const CHARACTERISTIC: Characteristic = Characteristic::Setup;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnlockRequest {
    pub action: UnlockAction,
}

impl UnlockRequest {
    const ACTION: u8 = 0x01;
}

impl TlvEncode for UnlockRequest {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        writer.u8(Self::ACTION, self.action as u8);
    }
}

impl TlvDecode for UnlockRequest {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        Ok(Self {
            action: UnlockAction::try_from(reader.u8(Self::ACTION)?)?,
        })
    }
}

impl Request for UnlockRequest {
    const CHARACTERISTIC: Characteristic = Characteristic::Unlock;
}

/// Invites a new key; `secret` is the one-time invitation secret the
/// recipient uses to confirm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateNewKeyRequest {
    pub id: Uuid,
    pub name: String,
    pub permission: Permission,
    pub expiration: DateTime<Utc>,
    pub secret: KeyData,
}

impl CreateNewKeyRequest {
    const ID: u8 = 0x01;
    const NAME: u8 = 0x02;
    const PERMISSION: u8 = 0x03;
    const EXPIRATION: u8 = 0x04;
    const SECRET: u8 = 0x05;

    pub fn new_key(&self, created: DateTime<Utc>) -> NewKey {
        NewKey {
            id: self.id,
            name: self.name.clone(),
            created,
            permission: self.permission.clone(),
            expiration: self.expiration,
        }
    }
}

impl TlvEncode for CreateNewKeyRequest {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        writer.uuid(Self::ID, &self.id);
        writer.string(Self::NAME, &self.name);
        writer.nested(Self::PERMISSION, &self.permission);
        writer.date(Self::EXPIRATION, &self.expiration);
        writer.bytes(Self::SECRET, self.secret.as_bytes());
    }
}

impl TlvDecode for CreateNewKeyRequest {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        Ok(Self {
            id: reader.uuid(Self::ID)?,
            name: reader.string(Self::NAME)?,
            permission: reader.nested(Self::PERMISSION)?,
            expiration: reader.date(Self::EXPIRATION)?,
            secret: key_data(reader, Self::SECRET)?,
        })
    }
}

impl Request for CreateNewKeyRequest {
    const CHARACTERISTIC: Characteristic = Characteristic::CreateNewKey;
}

/// Sent by an invitee under the invitation credentials; `secret` replaces
/// the invitation secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmNewKeyRequest {
    pub secret: KeyData,
}

impl ConfirmNewKeyRequest {
    const SECRET: u8 = 0x01;
}

impl TlvEncode for ConfirmNewKeyRequest {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        writer.bytes(Self::SECRET, self.secret.as_bytes());
    }
}

impl TlvDecode for ConfirmNewKeyRequest {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        Ok(Self {
            secret: key_data(reader, Self::SECRET)?,
        })
    }
}

impl Request for ConfirmNewKeyRequest {
    const CHARACTERISTIC: Characteristic = Characteristic::ConfirmNewKey;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveKeyRequest {
    pub id: Uuid,
    pub kind: KeyKind,
}

impl RemoveKeyRequest {
    const ID: u8 = 0x01;
    const KIND: u8 = 0x02;
}

impl TlvEncode for RemoveKeyRequest {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        writer.uuid(Self::ID, &self.id);
        writer.u8(Self::KIND, self.kind as u8);
    }
}

impl TlvDecode for RemoveKeyRequest {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        Ok(Self {
            id: reader.uuid(Self::ID)?,
            kind: KeyKind::try_from(reader.u8(Self::KIND)?)?,
        })
    }
}

impl Request for RemoveKeyRequest {
    const CHARACTERISTIC: Characteristic = Characteristic::RemoveKey;
}

/// Asks for the key list. Carries no body: the written value is only the
/// proof of key possession.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListKeysRequest;

impl TlvEncode for ListKeysRequest {
    fn encode_tlv(&self, _writer: &mut TlvWriter<'_>) {}
}

impl TlvDecode for ListKeysRequest {
    fn decode_tlv(_reader: &TlvReader<'_>) -> Result<Self> {
        Ok(Self)
    }
}

impl Request for ListKeysRequest {
    const CHARACTERISTIC: Characteristic = Characteristic::ListKeys;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListEventsRequest {
    pub offset: u32,
    pub limit: Option<u32>,
    pub predicate: Option<EventPredicate>,
}

impl ListEventsRequest {
    const OFFSET: u8 = 0x01;
    const LIMIT: u8 = 0x02;
    const PREDICATE: u8 = 0x03;

    /// Filter, then skip `offset`, then keep at most `limit`
    pub fn apply<'a>(&self, events: impl IntoIterator<Item = &'a LockEvent>) -> Vec<LockEvent> {
        let limit = self.limit.map_or(usize::MAX, |limit| limit as usize);
        events
            .into_iter()
            .filter(|event| self.predicate.as_ref().is_none_or(|p| p.matches(event)))
            .skip(self.offset as usize)
            .take(limit)
            .cloned()
            .collect()
    }
}

impl TlvEncode for ListEventsRequest {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        writer.u32(Self::OFFSET, self.offset);
        if let Some(limit) = self.limit {
            writer.u32(Self::LIMIT, limit);
        }
        if let Some(predicate) = &self.predicate {
            writer.nested(Self::PREDICATE, predicate);
        }
    }
}

impl TlvDecode for ListEventsRequest {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        Ok(Self {
            offset: reader.u32(Self::OFFSET)?,
            limit: reader.optional_u32(Self::LIMIT)?,
            predicate: reader.optional_nested(Self::PREDICATE)?,
        })
    }
}

impl Request for ListEventsRequest {
    const CHARACTERISTIC: Characteristic = Characteristic::ListEvents;
}

/// One page of the key list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysNotification {
    pub keys: Vec<KeyListItem>,
    pub is_last: bool,
}

impl KeysNotification {
    const KEY: u8 = 0x01;
    const IS_LAST: u8 = 0x02;
}

impl TlvEncode for KeysNotification {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        for key in &self.keys {
            writer.nested(Self::KEY, key);
        }
        writer.bool(Self::IS_LAST, self.is_last);
    }
}

impl TlvDecode for KeysNotification {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        Ok(Self {
            keys: reader.list(Self::KEY)?,
            is_last: reader.bool(Self::IS_LAST)?,
        })
    }
}

impl Notification for KeysNotification {
    const CHARACTERISTIC: Characteristic = Characteristic::KeysNotification;

    fn is_last(&self) -> bool {
        self.is_last
    }
}

/// One page of the event history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventsNotification {
    pub events: Vec<LockEvent>,
    pub is_last: bool,
}

impl EventsNotification {
    const EVENT: u8 = 0x01;
    const IS_LAST: u8 = 0x02;
}

impl TlvEncode for EventsNotification {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        for event in &self.events {
            writer.nested(Self::EVENT, event);
        }
        writer.bool(Self::IS_LAST, self.is_last);
    }
}

impl TlvDecode for EventsNotification {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        Ok(Self {
            events: reader.list(Self::EVENT)?,
            is_last: reader.bool(Self::IS_LAST)?,
        })
    }
}

impl Notification for EventsNotification {
    const CHARACTERISTIC: Characteristic = Characteristic::EventsNotification;

    fn is_last(&self) -> bool {
        self.is_last
    }
}
