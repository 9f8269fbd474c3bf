//! Lock service GATT handling
//!
//! Protocol types and the characteristic catalog are in `lock_proto`. This
//! module decides what a client may do with them.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use lock_proto::ble::{self, Characteristic, Notification, Properties, Request};
use lock_proto::crypto::{Authentication, EncryptedRequest};
use lock_proto::tlv::{self, TlvConfig};
use lock_proto::{
    ConfirmNewKeyRequest, CreateNewKeyRequest, EventKind, EventPredicate, EventsNotification,
    FirmwareVersion, Key, KeyCredentials, KeyKind, KeysNotification, ListEventsRequest,
    LockEvent, LockInformation, LockStatus, NewKey, Permission, RemoveKeyRequest, SetupRequest,
    UnlockAction, UnlockRequest,
};
use uuid::Uuid;

use crate::storage::{EventLog, KeyStore};

// Re-export protocol constants for convenience
pub use lock_proto::ble::SERVICE_UUID;

/// Why the lock refused a read or write
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Proto(#[from] lock_proto::Error),
    #[error("unknown key {0}")]
    UnknownKey(Uuid),
    #[error("authentication failed for key {0}")]
    AuthenticationFailed(Uuid),
    #[error("key {0} is not allowed to do this")]
    PermissionDenied(Uuid),
    #[error("lock is already set up")]
    AlreadySetup,
    #[error("lock is not set up")]
    NotSetup,
    #[error("invitation {0} has expired")]
    InvitationExpired(Uuid),
    #[error("storage: {0}")]
    Store(String),
    #[error("characteristic {0} does not support this operation")]
    InvalidAttribute(Uuid),
}

fn store_error(e: impl std::fmt::Display) -> ServerError {
    ServerError::Store(e.to_string())
}

/// Fixed facts about this lock
#[derive(Debug, Clone)]
pub struct LockConfig {
    pub id: Uuid,
    pub build: u64,
    pub version: FirmwareVersion,
    pub unlock_actions: Vec<UnlockAction>,
    /// Credentials shipped with the lock, accepted by setup only
    pub setup: KeyCredentials,
    /// Zone schedules are evaluated in
    pub timezone: FixedOffset,
    /// Entries per notification page
    pub page_size: usize,
}

impl LockConfig {
    pub fn new(id: Uuid, setup: KeyCredentials) -> Self {
        Self {
            id,
            build: 1,
            version: FirmwareVersion {
                major: 0,
                minor: 1,
                patch: 0,
            },
            unlock_actions: vec![UnlockAction::Default],
            setup,
            timezone: Utc.fix(),
            page_size: 8,
        }
    }
}

/// An authorized write, already applied to the key store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockCommand {
    Setup { owner: Uuid },
    /// Firmware must drive the actuator
    Unlock { key: Uuid, action: UnlockAction },
    CreateNewKey { key: Uuid, new_key: Uuid },
    ConfirmNewKey { key: Uuid },
    RemoveKey { key: Uuid, removed: Uuid, kind: KeyKind },
    ListKeys { key: Uuid },
    ListEvents { key: Uuid },
}

/// Chunk values to send, in order, on a notify characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notifications {
    pub characteristic: Characteristic,
    pub values: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub command: LockCommand,
    pub notifications: Option<Notifications>,
}

impl Response {
    fn command(command: LockCommand) -> Self {
        Self {
            command,
            notifications: None,
        }
    }
}

/// Validates a write against the setup state of the lock
///
/// Setup is only accepted before an owner exists, everything else only after.
pub fn validate_command(
    characteristic: Characteristic,
    is_configured: bool,
) -> Result<(), ServerError> {
    match (characteristic, is_configured) {
        (Characteristic::Setup, true) => Err(ServerError::AlreadySetup),
        (Characteristic::Setup, false) => Ok(()),
        (_, false) => Err(ServerError::NotSetup),
        (_, true) => Ok(()),
    }
}

pub struct LockServer<S, L> {
    config: LockConfig,
    store: S,
    log: L,
    tlv: TlvConfig,
}

impl<S: KeyStore, L: EventLog> LockServer<S, L> {
    pub fn new(config: LockConfig, store: S, log: L) -> Self {
        Self {
            config,
            store,
            log,
            tlv: TlvConfig::default(),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn information(&self) -> Result<LockInformation, ServerError> {
        let status = if self.store.is_configured().map_err(store_error)? {
            LockStatus::Unlock
        } else {
            LockStatus::Setup
        };

        Ok(LockInformation {
            id: self.config.id,
            build: self.config.build,
            version: self.config.version,
            status,
            unlock_actions: self.config.unlock_actions.clone(),
        })
    }

    /// Value of a readable characteristic
    pub fn read(&self, uuid: &Uuid) -> Result<Vec<u8>, ServerError> {
        match characteristic(uuid, Properties::READ)? {
            Characteristic::Information => {
                Ok(ble::encode_plain(&self.information()?, &self.tlv))
            }
            _ => Err(ServerError::InvalidAttribute(*uuid)),
        }
    }

    /// Handle a write; `mtu` sizes the chunks of any notification response
    pub fn write(
        &mut self,
        uuid: &Uuid,
        value: &[u8],
        mtu: u16,
        now: DateTime<Utc>,
    ) -> Result<Response, ServerError> {
        let characteristic = characteristic(uuid, Properties::WRITE)?;
        validate_command(
            characteristic,
            self.store.is_configured().map_err(store_error)?,
        )?;

        let response = match characteristic {
            Characteristic::Setup => self.setup(value, now)?,
            Characteristic::Unlock => self.unlock(value, now)?,
            Characteristic::CreateNewKey => self.create_new_key(value, now)?,
            Characteristic::ConfirmNewKey => self.confirm_new_key(value, now)?,
            Characteristic::RemoveKey => self.remove_key(value, now)?,
            Characteristic::ListKeys => self.list_keys(value, mtu, now)?,
            Characteristic::ListEvents => self.list_events(value, mtu, now)?,
            _ => return Err(ServerError::InvalidAttribute(*uuid)),
        };

        tracing::info!(command = ?response.command, "write accepted");
        Ok(response)
    }

    fn setup(&mut self, value: &[u8], now: DateTime<Utc>) -> Result<Response, ServerError> {
        let sealed: EncryptedRequest = tlv::decode(value, &self.tlv)?;
        let setup = &self.config.setup;
        if sealed.key_id() != setup.id {
            return Err(ServerError::UnknownKey(sealed.key_id()));
        }
        let request: SetupRequest = self.open(&sealed, setup)?;

        let owner = Key {
            id: request.id,
            name: "Owner".to_string(),
            created: now,
            permission: Permission::Owner,
        };
        self.store
            .add_key(owner, request.secret)
            .map_err(store_error)?;
        self.record(request.id, EventKind::Setup, now)?;

        Ok(Response::command(LockCommand::Setup { owner: request.id }))
    }

    fn unlock(&mut self, value: &[u8], now: DateTime<Utc>) -> Result<Response, ServerError> {
        let (key, _, request): (_, _, UnlockRequest) = self.authorize(value)?;

        if !key
            .permission
            .is_valid(&now.with_timezone(&self.config.timezone))
        {
            return Err(ServerError::PermissionDenied(key.id));
        }
        if !self.config.unlock_actions.contains(&request.action) {
            return Err(lock_proto::Error::invalid(format!(
                "unlock action {:?} not supported",
                request.action
            ))
            .into());
        }

        self.record(
            key.id,
            EventKind::Unlock {
                action: request.action,
            },
            now,
        )?;

        Ok(Response::command(LockCommand::Unlock {
            key: key.id,
            action: request.action,
        }))
    }

    fn create_new_key(
        &mut self,
        value: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Response, ServerError> {
        let (key, _, request): (_, _, CreateNewKeyRequest) = self.authorize(value)?;
        require_administrator(&key)?;

        // There is exactly one owner, created by setup
        if request.permission == Permission::Owner {
            return Err(ServerError::PermissionDenied(key.id));
        }
        if self.store.secret(&request.id).map_err(store_error)?.is_some() {
            return Err(
                lock_proto::Error::invalid(format!("key id {} already in use", request.id))
                    .into(),
            );
        }

        let new_key: NewKey = request.new_key(now);
        self.store
            .add_new_key(new_key, request.secret)
            .map_err(store_error)?;
        self.record(key.id, EventKind::CreateNewKey { new_key: request.id }, now)?;

        Ok(Response::command(LockCommand::CreateNewKey {
            key: key.id,
            new_key: request.id,
        }))
    }

    fn confirm_new_key(
        &mut self,
        value: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Response, ServerError> {
        let (credentials, request): (_, ConfirmNewKeyRequest) = self.authenticate(value)?;
        let id = credentials.id;
        let new_key = self
            .store
            .new_key(&id)
            .map_err(store_error)?
            .ok_or(ServerError::UnknownKey(id))?;

        if new_key.is_expired(&now) {
            return Err(ServerError::InvitationExpired(id));
        }

        self.store
            .confirm_new_key(new_key.confirm(now), request.secret)
            .map_err(store_error)?;
        self.record(id, EventKind::ConfirmNewKey { new_key: id }, now)?;

        Ok(Response::command(LockCommand::ConfirmNewKey { key: id }))
    }

    fn remove_key(&mut self, value: &[u8], now: DateTime<Utc>) -> Result<Response, ServerError> {
        let (key, _, request): (_, _, RemoveKeyRequest) = self.authorize(value)?;
        require_administrator(&key)?;

        if request.kind == KeyKind::Key {
            let target = self.store.key(&request.id).map_err(store_error)?;
            if target.is_some_and(|target| target.permission == Permission::Owner) {
                return Err(ServerError::PermissionDenied(key.id));
            }
        }
        if !self
            .store
            .remove_key(&request.id, request.kind)
            .map_err(store_error)?
        {
            return Err(ServerError::UnknownKey(request.id));
        }

        self.record(
            key.id,
            EventKind::RemoveKey {
                removed: request.id,
                kind: request.kind,
            },
            now,
        )?;

        Ok(Response::command(LockCommand::RemoveKey {
            key: key.id,
            removed: request.id,
            kind: request.kind,
        }))
    }

    fn list_keys(
        &mut self,
        value: &[u8],
        mtu: u16,
        _now: DateTime<Utc>,
    ) -> Result<Response, ServerError> {
        let authentication: Authentication = tlv::decode(value, &self.tlv)?;
        let id = authentication.key_id();
        let secret = self
            .store
            .secret(&id)
            .map_err(store_error)?
            .ok_or(ServerError::UnknownKey(id))?;
        if !authentication.verify(&secret) {
            tracing::warn!(key = %id, "authentication failed");
            return Err(ServerError::AuthenticationFailed(id));
        }
        let key = self.confirmed_key(&id)?;
        require_administrator(&key)?;

        let keys = self.store.keys().map_err(store_error)?;
        let pages = paginate(keys, self.config.page_size, |keys, is_last| {
            KeysNotification { keys, is_last }
        });
        let credentials = KeyCredentials::new(id, secret);

        Ok(Response {
            command: LockCommand::ListKeys { key: id },
            notifications: Some(self.notify(pages.as_slice(), &credentials, mtu)?),
        })
    }

    fn list_events(
        &mut self,
        value: &[u8],
        mtu: u16,
        _now: DateTime<Utc>,
    ) -> Result<Response, ServerError> {
        let (key, credentials, mut request): (_, _, ListEventsRequest) = self.authorize(value)?;

        // Without administrator rights a key only sees its own history
        if !key.permission.is_administrator() {
            let predicate = request.predicate.get_or_insert_with(EventPredicate::default);
            predicate.keys = vec![key.id];
        }

        let events = self.log.events().map_err(store_error)?;
        let pages = paginate(request.apply(&events), self.config.page_size, |events, is_last| {
            EventsNotification { events, is_last }
        });

        Ok(Response {
            command: LockCommand::ListEvents { key: key.id },
            notifications: Some(self.notify(pages.as_slice(), &credentials, mtu)?),
        })
    }

    /// Decrypt an encrypted write for whichever key or invitation signed it
    fn authenticate<R: Request>(
        &self,
        value: &[u8],
    ) -> Result<(KeyCredentials, R), ServerError> {
        let sealed: EncryptedRequest = tlv::decode(value, &self.tlv)?;
        let id = sealed.key_id();
        let secret = self
            .store
            .secret(&id)
            .map_err(store_error)?
            .ok_or(ServerError::UnknownKey(id))?;
        let credentials = KeyCredentials::new(id, secret);
        let request = self.open(&sealed, &credentials)?;
        Ok((credentials, request))
    }

    /// Like `authenticate`, but only confirmed keys are accepted
    fn authorize<R: Request>(
        &self,
        value: &[u8],
    ) -> Result<(Key, KeyCredentials, R), ServerError> {
        let (credentials, request) = self.authenticate(value)?;
        let key = self.confirmed_key(&credentials.id)?;
        Ok((key, credentials, request))
    }

    fn open<R: Request>(
        &self,
        sealed: &EncryptedRequest,
        credentials: &KeyCredentials,
    ) -> Result<R, ServerError> {
        let plaintext = sealed.open(&credentials.secret).map_err(|_| {
            tracing::warn!(key = %credentials.id, "authentication failed");
            ServerError::AuthenticationFailed(credentials.id)
        })?;
        Ok(tlv::decode(&plaintext, &self.tlv)?)
    }

    fn confirmed_key(&self, id: &Uuid) -> Result<Key, ServerError> {
        self.store
            .key(id)
            .map_err(store_error)?
            .ok_or(ServerError::UnknownKey(*id))
    }

    fn record(
        &mut self,
        key: Uuid,
        kind: EventKind,
        now: DateTime<Utc>,
    ) -> Result<(), ServerError> {
        self.log
            .record(LockEvent {
                id: Uuid::new_v4(),
                date: now,
                key,
                kind,
            })
            .map_err(store_error)
    }

    fn notify<N: Notification>(
        &self,
        pages: &[N],
        credentials: &KeyCredentials,
        mtu: u16,
    ) -> Result<Notifications, ServerError> {
        let mut values = Vec::new();
        for page in pages {
            values.extend(ble::encode_notification(page, credentials, mtu, &self.tlv)?);
        }
        tracing::debug!(pages = pages.len(), chunks = values.len(), "response paged");

        Ok(Notifications {
            characteristic: N::CHARACTERISTIC,
            values,
        })
    }
}

fn characteristic(uuid: &Uuid, required: Properties) -> Result<Characteristic, ServerError> {
    Characteristic::from_uuid(uuid)
        .filter(|c| c.properties().contains(required))
        .ok_or(ServerError::InvalidAttribute(*uuid))
}

fn require_administrator(key: &Key) -> Result<(), ServerError> {
    if key.permission.is_administrator() {
        Ok(())
    } else {
        Err(ServerError::PermissionDenied(key.id))
    }
}

/// Split `items` into pages, the last one flagged; an empty list is one
/// empty last page
fn paginate<T: Clone, N>(
    items: Vec<T>,
    page_size: usize,
    page: impl Fn(Vec<T>, bool) -> N,
) -> Vec<N> {
    if items.is_empty() {
        return vec![page(Vec::new(), true)];
    }
    let count = items.len().div_ceil(page_size.max(1));
    items
        .chunks(page_size.max(1))
        .enumerate()
        .map(|(i, chunk)| page(chunk.to_vec(), i + 1 == count))
        .collect()
}
