//! BLE client for locks
//!
//! Each call is one transaction: connect, discover, write or read, then
//! disconnect. List calls subscribe to the notification characteristic
//! before writing the request that triggers it.

use std::sync::Arc;

use lock_proto::ble::{self, Notification, Request};
use lock_proto::{
    Characteristic, ConfirmNewKeyRequest, CreateNewKeyRequest, EventsNotification,
    KeyCredentials, KeyData, KeyKind, KeyListItem, KeysNotification, ListEventsRequest,
    ListKeysRequest, LockEvent, LockInformation, LockStatus, RemoveKeyRequest, SetupRequest,
    TlvConfig, UnlockAction, UnlockRequest,
};
use uuid::Uuid;

use crate::central::Central;
use crate::notify::NotificationStream;
use crate::transaction::with_connection;
use crate::Result;

/// Client for one lock peripheral
pub struct LockClient<C: Central + 'static> {
    central: Arc<C>,
    peripheral: C::Peripheral,
    config: TlvConfig,
}

impl<C: Central + 'static> LockClient<C> {
    pub fn new(central: Arc<C>, peripheral: C::Peripheral) -> Self {
        Self {
            central,
            peripheral,
            config: TlvConfig::default(),
        }
    }

    /// Read the plaintext identity and status, no key needed
    pub async fn read_information(&self) -> Result<LockInformation> {
        let config = self.config;
        with_connection(
            self.central.clone(),
            self.peripheral.clone(),
            &[Characteristic::Information],
            |session| async move {
                let value = session.read(Characteristic::Information).await?;
                Ok(ble::decode_plain(&value, &config)?)
            },
        )
        .await
    }

    /// Claim an unconfigured lock with the credentials shipped with it;
    /// `owner` becomes the owner key
    ///
    /// The lock status is read back and must have left setup.
    pub async fn setup(
        &self,
        shipped: &KeyCredentials,
        owner: &KeyCredentials,
    ) -> Result<LockInformation> {
        let request = SetupRequest {
            id: owner.id,
            secret: owner.secret.clone(),
        };
        let value = ble::encode_request(&request, shipped, &self.config)?;
        let config = self.config;

        let information = with_connection(
            self.central.clone(),
            self.peripheral.clone(),
            &[Characteristic::Setup, Characteristic::Information],
            |session| async move {
                session.write(Characteristic::Setup, &value).await?;
                let value = session.read(Characteristic::Information).await?;
                Ok(ble::decode_plain::<LockInformation>(&value, &config)?)
            },
        )
        .await?;

        if information.status == LockStatus::Setup {
            return Err(lock_proto::Error::invalid("lock is still in setup").into());
        }
        tracing::info!(lock = %information.id, owner = %owner.id, "lock set up");
        Ok(information)
    }

    pub async fn unlock(&self, credentials: &KeyCredentials, action: UnlockAction) -> Result<()> {
        self.send(credentials, &UnlockRequest { action }).await?;
        tracing::info!(key = %credentials.id, ?action, "unlocked");
        Ok(())
    }

    /// Invite a key; hand `request.id` and `request.secret` to the invitee
    pub async fn create_new_key(
        &self,
        credentials: &KeyCredentials,
        request: &CreateNewKeyRequest,
    ) -> Result<()> {
        self.send(credentials, request).await?;
        tracing::info!(new_key = %request.id, "key invited");
        Ok(())
    }

    /// Accept an invitation, replacing its secret by a freshly generated
    /// one. Returns the credentials of the confirmed key.
    pub async fn confirm_new_key(&self, invitation: &KeyCredentials) -> Result<KeyCredentials> {
        let secret = KeyData::generate();
        let request = ConfirmNewKeyRequest {
            secret: secret.clone(),
        };
        self.send(invitation, &request).await?;
        tracing::info!(key = %invitation.id, "invitation confirmed");
        Ok(KeyCredentials::new(invitation.id, secret))
    }

    pub async fn remove_key(
        &self,
        credentials: &KeyCredentials,
        id: Uuid,
        kind: KeyKind,
    ) -> Result<()> {
        self.send(credentials, &RemoveKeyRequest { id, kind }).await?;
        tracing::info!(removed = %id, ?kind, "key removed");
        Ok(())
    }

    pub async fn list_keys(&self, credentials: &KeyCredentials) -> Result<Vec<KeyListItem>> {
        let pages: Vec<KeysNotification> = self.list(credentials, &ListKeysRequest).await?;
        Ok(pages.into_iter().flat_map(|page| page.keys).collect())
    }

    pub async fn list_events(
        &self,
        credentials: &KeyCredentials,
        request: &ListEventsRequest,
    ) -> Result<Vec<LockEvent>> {
        let pages: Vec<EventsNotification> = self.list(credentials, request).await?;
        Ok(pages.into_iter().flat_map(|page| page.events).collect())
    }

    async fn send<R: Request>(&self, credentials: &KeyCredentials, request: &R) -> Result<()> {
        let value = ble::encode_request(request, credentials, &self.config)?;
        with_connection(
            self.central.clone(),
            self.peripheral.clone(),
            &[R::CHARACTERISTIC],
            |session| async move { session.write(R::CHARACTERISTIC, &value).await },
        )
        .await
    }

    async fn list<R, N>(&self, credentials: &KeyCredentials, request: &R) -> Result<Vec<N>>
    where
        R: Request,
        N: Notification + Send + 'static,
    {
        let value = ble::encode_request(request, credentials, &self.config)?;
        let credentials = credentials.clone();
        let config = self.config;

        let pages = with_connection(
            self.central.clone(),
            self.peripheral.clone(),
            &[R::CHARACTERISTIC, N::CHARACTERISTIC],
            |session| async move {
                let stream =
                    NotificationStream::<N>::subscribe(&session, credentials, config).await?;
                session.write(R::CHARACTERISTIC, &value).await?;
                stream.collect().await
            },
        )
        .await?;

        tracing::debug!(pages = pages.len(), characteristic = %N::CHARACTERISTIC, "list received");
        Ok(pages)
    }
}

impl<C: Central + 'static> Clone for LockClient<C> {
    fn clone(&self) -> Self {
        Self {
            central: self.central.clone(),
            peripheral: self.peripheral.clone(),
            config: self.config,
        }
    }
}
