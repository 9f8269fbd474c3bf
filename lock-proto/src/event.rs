//! Lock history events and the filter used to list them

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{KeyKind, UnlockAction};
use crate::tlv::{TlvDecode, TlvEncode, TlvReader, TlvWriter};
use crate::{Error, Result};

/// Something a key did to the lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEvent {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    /// Key that performed the action
    pub key: Uuid,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Setup,
    Unlock { action: UnlockAction },
    CreateNewKey { new_key: Uuid },
    ConfirmNewKey { new_key: Uuid },
    RemoveKey { removed: Uuid, kind: KeyKind },
}

impl LockEvent {
    const ID: u8 = 0x01;
    const DATE: u8 = 0x02;
    const KEY: u8 = 0x03;
    const TYPE: u8 = 0x04;
    const ACTION: u8 = 0x05;
    const TARGET: u8 = 0x06;
    const KEY_KIND: u8 = 0x07;
}

impl TlvEncode for LockEvent {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        writer.uuid(Self::ID, &self.id);
        writer.date(Self::DATE, &self.date);
        writer.uuid(Self::KEY, &self.key);
        match &self.kind {
            EventKind::Setup => writer.u8(Self::TYPE, 0),
            EventKind::Unlock { action } => {
                writer.u8(Self::TYPE, 1);
                writer.u8(Self::ACTION, *action as u8);
            }
            EventKind::CreateNewKey { new_key } => {
                writer.u8(Self::TYPE, 2);
                writer.uuid(Self::TARGET, new_key);
            }
            EventKind::ConfirmNewKey { new_key } => {
                writer.u8(Self::TYPE, 3);
                writer.uuid(Self::TARGET, new_key);
            }
            EventKind::RemoveKey { removed, kind } => {
                writer.u8(Self::TYPE, 4);
                writer.uuid(Self::TARGET, removed);
                writer.u8(Self::KEY_KIND, *kind as u8);
            }
        }
    }
}

impl TlvDecode for LockEvent {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        let kind = match reader.u8(Self::TYPE)? {
            0 => EventKind::Setup,
            1 => EventKind::Unlock {
                action: UnlockAction::try_from(reader.u8(Self::ACTION)?)?,
            },
            2 => EventKind::CreateNewKey {
                new_key: reader.uuid(Self::TARGET)?,
            },
            3 => EventKind::ConfirmNewKey {
                new_key: reader.uuid(Self::TARGET)?,
            },
            4 => EventKind::RemoveKey {
                removed: reader.uuid(Self::TARGET)?,
                kind: KeyKind::try_from(reader.u8(Self::KEY_KIND)?)?,
            },
            other => return Err(Error::invalid(format!("unknown event type {other}"))),
        };

        Ok(Self {
            id: reader.uuid(Self::ID)?,
            date: reader.date(Self::DATE)?,
            key: reader.uuid(Self::KEY)?,
            kind,
        })
    }
}

/// Narrows an event listing; empty `keys` matches every key
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventPredicate {
    pub keys: Vec<Uuid>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl EventPredicate {
    const KEY: u8 = 0x01;
    const START: u8 = 0x02;
    const END: u8 = 0x03;

    pub fn matches(&self, event: &LockEvent) -> bool {
        (self.keys.is_empty() || self.keys.contains(&event.key))
            && self.start.is_none_or(|start| event.date >= start)
            && self.end.is_none_or(|end| event.date <= end)
    }
}

impl TlvEncode for EventPredicate {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        for key in &self.keys {
            writer.uuid(Self::KEY, key);
        }
        if let Some(start) = &self.start {
            writer.date(Self::START, start);
        }
        if let Some(end) = &self.end {
            writer.date(Self::END, end);
        }
    }
}

impl TlvDecode for EventPredicate {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        Ok(Self {
            keys: reader.uuid_list(Self::KEY)?,
            start: reader.optional_date(Self::START)?,
            end: reader.optional_date(Self::END)?,
        })
    }
}
