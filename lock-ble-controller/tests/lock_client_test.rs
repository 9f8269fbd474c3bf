mod common;

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use common::{Faults, MockCentral, LOCK_ID};
use futures::StreamExt;
use lock_ble_controller::{Error, LockClient, NotificationStream, with_connection};
use lock_mcu::EventLog;
use lock_proto::ble;
use lock_proto::{
    Characteristic, CreateNewKeyRequest, EventKind, KeyCredentials, KeyData, KeyKind,
    KeysNotification, ListEventsRequest, ListKeysRequest, LockStatus, Permission, TlvConfig,
    UnlockAction,
};
use uuid::Uuid;

fn invitation(id: u128, permission: Permission) -> CreateNewKeyRequest {
    CreateNewKeyRequest {
        id: Uuid::from_u128(id),
        name: format!("Guest {id}"),
        permission,
        expiration: Utc::now() + Duration::days(1),
        secret: KeyData::generate(),
    }
}

fn credentials(request: &CreateNewKeyRequest) -> KeyCredentials {
    KeyCredentials::new(request.id, request.secret.clone())
}

/// Enough invitations that the key list spans two pages
async fn invite_page_worth(client: &LockClient<MockCentral>) {
    for i in 0..9 {
        client
            .create_new_key(&common::owner(), &invitation(200 + i, Permission::Anytime))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_fresh_lock_reports_setup() {
    let central = MockCentral::new(185);
    let information = common::client(&central).read_information().await.unwrap();

    assert_eq!(information.id, LOCK_ID);
    assert_eq!(information.status, LockStatus::Setup);
    assert_eq!(central.calls().disconnect, 1);
}

#[tokio::test]
async fn test_setup_claims_lock() {
    let central = MockCentral::new(185);
    let client = common::client(&central);

    let information = client
        .setup(&common::shipped(), &common::owner())
        .await
        .unwrap();
    assert_eq!(information.status, LockStatus::Unlock);
    assert_eq!(central.calls().connect, 1);
    assert_eq!(central.calls().disconnect, 1);

    // The shipped credentials are spent
    let again = client.setup(&common::shipped(), &common::owner()).await;
    assert!(matches!(again, Err(Error::Bluetooth(_))));
}

#[tokio::test]
async fn test_setup_ignored_by_lock_is_invalid_data() {
    let central = MockCentral::new(185);
    central.set_faults(Faults {
        ignore_writes: true,
        ..Default::default()
    });

    let err = common::client(&central)
        .setup(&common::shipped(), &common::owner())
        .await
        .unwrap_err();

    assert!(err.is_invalid_data());
    assert_eq!(central.calls().disconnect, 1);
}

#[tokio::test]
async fn test_unlock() {
    let (central, client) = common::configured(185).await;

    client
        .unlock(&common::owner(), UnlockAction::Default)
        .await
        .unwrap();

    let unlocks = central.with_lock(|lock| {
        lock.log()
            .events()
            .unwrap()
            .into_iter()
            .filter(|e| matches!(e.kind, EventKind::Unlock { .. }))
            .count()
    });
    assert_eq!(unlocks, 1);
}

#[tokio::test]
async fn test_unlock_with_wrong_secret_is_rejected() {
    let (central, client) = common::configured(185).await;
    let forged = KeyCredentials::new(common::owner().id, KeyData::from_bytes([2; 32]));

    let result = client.unlock(&forged, UnlockAction::Default).await;

    assert!(matches!(result, Err(Error::Bluetooth(_))));
    assert_eq!(central.calls().disconnect, 1);
}

#[tokio::test]
async fn test_invite_confirm_and_list_keys_over_small_mtu() {
    let (central, client) = common::configured(35).await;
    let owner = common::owner();

    let invitations: Vec<_> = (0..10)
        .map(|i| invitation(100 + i, Permission::Anytime))
        .collect();
    for request in &invitations {
        client.create_new_key(&owner, request).await.unwrap();
    }

    let confirmed = client
        .confirm_new_key(&credentials(&invitations[0]))
        .await
        .unwrap();
    assert_eq!(confirmed.id, invitations[0].id);
    assert_ne!(confirmed.secret, invitations[0].secret);
    client
        .unlock(&confirmed, UnlockAction::Default)
        .await
        .unwrap();

    central.reset_calls();
    let keys = client.list_keys(&owner).await.unwrap();

    assert_eq!(keys.len(), 11);
    assert_eq!(
        keys.iter().filter(|k| k.kind() == KeyKind::NewKey).count(),
        9
    );
    assert!(keys.iter().any(|k| k.permission() == &Permission::Owner));
    assert_eq!(central.calls().notify, 1);
    assert_eq!(central.calls().stop_notify, 1);
    assert_eq!(central.calls().disconnect, 1);
}

#[tokio::test]
async fn test_pending_invitation_cannot_unlock() {
    let (_central, client) = common::configured(185).await;
    let request = invitation(7, Permission::Anytime);
    client
        .create_new_key(&common::owner(), &request)
        .await
        .unwrap();

    let result = client
        .unlock(&credentials(&request), UnlockAction::Default)
        .await;
    assert!(matches!(result, Err(Error::Bluetooth(_))));
}

#[tokio::test]
async fn test_list_events_of_guest_is_restricted_to_its_key() {
    let (_central, client) = common::configured(35).await;
    let owner = common::owner();

    client.unlock(&owner, UnlockAction::Default).await.unwrap();
    let request = invitation(9, Permission::Anytime);
    client.create_new_key(&owner, &request).await.unwrap();
    let guest = client
        .confirm_new_key(&credentials(&request))
        .await
        .unwrap();
    client.unlock(&guest, UnlockAction::Default).await.unwrap();

    let all = client
        .list_events(&owner, &ListEventsRequest::default())
        .await
        .unwrap();
    // setup, owner unlock, invite, confirm, guest unlock
    assert_eq!(all.len(), 5);

    let own = client
        .list_events(&guest, &ListEventsRequest::default())
        .await
        .unwrap();
    assert!(!own.is_empty());
    assert!(own.iter().all(|e| e.key == guest.id));
}

#[tokio::test]
async fn test_list_events_paging() {
    let (_central, client) = common::configured(185).await;
    let owner = common::owner();
    for _ in 0..4 {
        client.unlock(&owner, UnlockAction::Default).await.unwrap();
    }

    let events = client
        .list_events(
            &owner,
            &ListEventsRequest {
                offset: 1,
                limit: Some(2),
                predicate: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .all(|e| matches!(e.kind, EventKind::Unlock { .. })));
}

#[tokio::test]
async fn test_remove_key() {
    let (_central, client) = common::configured(185).await;
    let owner = common::owner();
    let request = invitation(11, Permission::Anytime);
    client.create_new_key(&owner, &request).await.unwrap();
    let guest = client
        .confirm_new_key(&credentials(&request))
        .await
        .unwrap();

    client
        .remove_key(&owner, guest.id, KeyKind::Key)
        .await
        .unwrap();

    let keys = client.list_keys(&owner).await.unwrap();
    assert_eq!(keys.len(), 1);
    assert!(client
        .unlock(&guest, UnlockAction::Default)
        .await
        .is_err());
}

#[tokio::test]
async fn test_owner_cannot_be_removed() {
    let (_central, client) = common::configured(185).await;
    let owner = common::owner();

    let result = client.remove_key(&owner, owner.id, KeyKind::Key).await;

    assert!(matches!(result, Err(Error::Bluetooth(_))));
}

#[tokio::test]
async fn test_corrupt_notification_stops_subscription() {
    let (central, client) = common::configured(35).await;
    central.set_faults(Faults {
        corrupt_notifications: true,
        ..Default::default()
    });

    let result = client.list_keys(&common::owner()).await;

    assert!(matches!(
        result,
        Err(Error::Proto(lock_proto::Error::Decryption))
    ));
    assert_eq!(central.calls().stop_notify, 1);
    assert_eq!(central.calls().disconnect, 1);
}

#[tokio::test]
async fn test_link_lost_mid_list_is_disconnected() {
    let (central, client) = common::configured(35).await;
    central.set_faults(Faults {
        disconnect_after_notifications: Some(1),
        ..Default::default()
    });

    let result = client.list_keys(&common::owner()).await;

    assert!(matches!(result, Err(Error::Disconnected)));
    assert_eq!(central.calls().disconnect, 1);
}

#[tokio::test]
async fn test_silent_link_mid_list_times_out() {
    let (central, client) = common::configured(35).await;
    invite_page_worth(&client).await;
    central.set_timeout(StdDuration::from_millis(100));
    central.set_faults(Faults {
        stall_after_pages: Some(1),
        ..Default::default()
    });
    central.reset_calls();

    let result = client.list_keys(&common::owner()).await;

    assert!(matches!(result, Err(Error::Timeout)));
    assert_eq!(central.calls().stop_notify, 1);
    assert_eq!(central.calls().disconnect, 1);
}

#[tokio::test]
async fn test_dropping_stream_releases_subscription() {
    let (central, client) = common::configured(35).await;
    invite_page_worth(&client).await;
    central.set_faults(Faults {
        stall_after_pages: Some(1),
        ..Default::default()
    });
    central.reset_calls();

    let owner = common::owner();
    let config = TlvConfig::default();
    let request = ble::encode_request(&ListKeysRequest, &owner, &config).unwrap();
    let mock = central.clone();

    with_connection(
        central.clone(),
        7,
        &[Characteristic::ListKeys, Characteristic::KeysNotification],
        |session| async move {
            let mut stream =
                NotificationStream::<KeysNotification>::subscribe(&session, owner, config).await?;
            session.write(Characteristic::ListKeys, &request).await?;

            let first = stream.next().await.unwrap()?;
            assert!(!first.is_last);
            assert_eq!(first.keys.len(), 8);
            assert_eq!(mock.subscriptions(), 1);

            drop(stream);
            tokio::time::sleep(StdDuration::from_millis(50)).await;

            // Released before the transaction disconnects
            assert_eq!(mock.calls().stop_notify, 1);
            assert_eq!(mock.subscriptions(), 0);
            Ok(())
        },
    )
    .await
    .unwrap();

    assert_eq!(central.calls().disconnect, 1);
}
