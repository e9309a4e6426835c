//! End-to-end session tests over the in-memory radio

use std::sync::Arc;
use std::time::Duration;

use bluechat_core::{
    CapabilityTier, ConnectionResult, Message, RuntimePermissions, SessionState,
    CONNECTION_INTERRUPTED, NON_PAIRED_DEVICE, NO_PERMISSION,
};
use bluechat_rfcomm::{
    AdapterEvent, ConnectionStream, MemoryAdapter, MemoryRadio, RfcommConfig, SessionController,
};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);
const HOST: &str = "00:00:00:00:00:01";
const GUEST: &str = "00:00:00:00:00:02";

fn controller_for(adapter: &MemoryAdapter, permissions: RuntimePermissions) -> SessionController {
    SessionController::new(
        Arc::new(adapter.clone()),
        Arc::new(permissions),
        RfcommConfig::new(),
    )
    .unwrap()
}

fn paired_pair() -> (MemoryRadio, MemoryAdapter, MemoryAdapter) {
    let radio = MemoryRadio::new();
    let host = radio.adapter("Host", HOST);
    let guest = radio.adapter("Guest", GUEST);
    radio.pair(&host, &guest);
    (radio, host, guest)
}

async fn next(stream: &mut ConnectionStream) -> Option<ConnectionResult> {
    timeout(WAIT, stream.next_result())
        .await
        .expect("timed out waiting for a connection result")
}

async fn wait_for_state(controller: &SessionController, state: SessionState) {
    let mut states = controller.session_state();
    timeout(WAIT, states.wait_for(|current| *current == state))
        .await
        .expect("timed out waiting for session state")
        .unwrap();
}

/// Start a server on `server` and dial it from `client`
async fn establish(
    server: &SessionController,
    client: &SessionController,
    host: &MemoryAdapter,
) -> (ConnectionStream, ConnectionStream) {
    let mut accepted = server.start_server();
    wait_for_state(server, SessionState::Accepting).await;

    let mut dialed = client.connect(&host.device());
    assert_eq!(next(&mut dialed).await, Some(ConnectionResult::Established));
    assert_eq!(next(&mut accepted).await, Some(ConnectionResult::Established));
    (accepted, dialed)
}

#[tokio::test]
async fn test_messages_flow_both_ways_in_order() {
    let (_radio, host, guest) = paired_pair();
    let server = controller_for(&host, RuntimePermissions::legacy());
    let client = controller_for(&guest, RuntimePermissions::legacy());

    let (mut accepted, mut dialed) = establish(&server, &client, &host).await;
    assert_eq!(*server.session_state().borrow(), SessionState::Established);
    assert!(!server.is_listening());

    let sent = client.send_message("hello").await.unwrap();
    assert_eq!(sent, Message::outgoing("hello", "Guest"));
    assert_eq!(
        next(&mut accepted).await,
        Some(ConnectionResult::Transferred(Message::incoming("hello", "Guest")))
    );

    for body in ["first", "second"] {
        server.send_message(body).await.unwrap();
        assert_eq!(
            next(&mut dialed).await,
            Some(ConnectionResult::Transferred(Message::incoming(body, "Host")))
        );
    }
}

#[tokio::test]
async fn test_missing_permission_yields_single_error() {
    let (_radio, host, _guest) = paired_pair();
    let controller = controller_for(&host, RuntimePermissions::new(CapabilityTier::RuntimeGranted));

    let mut server = controller.start_server();
    assert_eq!(next(&mut server).await, Some(ConnectionResult::error(NO_PERMISSION)));
    assert_eq!(next(&mut server).await, None);

    let mut client = controller.connect(&host.device());
    assert_eq!(next(&mut client).await, Some(ConnectionResult::error(NO_PERMISSION)));
    assert_eq!(next(&mut client).await, None);

    assert!(controller.send_message("hi").await.is_none());
    assert!(controller.paired_devices().borrow().is_empty());
}

#[tokio::test]
async fn test_send_without_session_returns_none() {
    let (_radio, host, _guest) = paired_pair();
    let controller = controller_for(&host, RuntimePermissions::legacy());

    assert!(!controller.has_session());
    assert!(controller.send_message("nobody listens").await.is_none());
}

#[tokio::test]
async fn test_close_twice_is_a_no_op() {
    let (radio, host, _guest) = paired_pair();
    let controller = controller_for(&host, RuntimePermissions::legacy());

    let _server = controller.start_server();
    wait_for_state(&controller, SessionState::Accepting).await;
    assert_eq!(radio.listener_count(), 1);

    controller.close();
    controller.close();
    assert_eq!(radio.listener_count(), 0);
    assert_eq!(*controller.session_state().borrow(), SessionState::Idle);
}

#[tokio::test]
async fn test_dial_without_listener_reports_interruption() {
    let (_radio, host, guest) = paired_pair();
    let client = controller_for(&guest, RuntimePermissions::legacy());

    let mut dialed = client.connect(&host.device());
    assert_eq!(
        next(&mut dialed).await,
        Some(ConnectionResult::error(CONNECTION_INTERRUPTED))
    );
    assert_eq!(next(&mut dialed).await, None);
}

#[tokio::test]
async fn test_dropping_server_stream_allows_relisten() {
    let (radio, host, guest) = paired_pair();
    let server = controller_for(&host, RuntimePermissions::legacy());
    let client = controller_for(&guest, RuntimePermissions::legacy());

    let first = server.start_server();
    wait_for_state(&server, SessionState::Accepting).await;
    drop(first);

    let (_accepted, _dialed) = establish(&server, &client, &host).await;
    assert_eq!(radio.listener_count(), 0);
}

#[tokio::test]
async fn test_peer_close_ends_stream_without_error() {
    let (_radio, host, guest) = paired_pair();
    let server = controller_for(&host, RuntimePermissions::legacy());
    let client = controller_for(&guest, RuntimePermissions::legacy());

    let (_accepted, mut dialed) = establish(&server, &client, &host).await;
    server.close();

    assert_eq!(next(&mut dialed).await, None);
    wait_for_state(&client, SessionState::Idle).await;
    assert!(client.send_message("too late").await.is_none());
}

#[tokio::test]
async fn test_link_events_from_bonded_devices_update_connectivity() {
    let (_radio, host, guest) = paired_pair();
    let controller = controller_for(&host, RuntimePermissions::legacy());
    let mut connected = controller.connected();

    host.emit(AdapterEvent::LinkConnected(guest.device()));
    timeout(WAIT, connected.wait_for(|up| *up)).await.unwrap().unwrap();

    host.emit(AdapterEvent::LinkDisconnected(guest.device()));
    timeout(WAIT, connected.wait_for(|up| !*up)).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_link_event_from_stranger_is_reported() {
    let (radio, host, guest) = paired_pair();
    let stranger = radio.adapter("Stranger", "00:00:00:00:00:09");
    let controller = controller_for(&host, RuntimePermissions::legacy());
    let mut connected = controller.connected();
    let mut errors = controller.errors();

    host.emit(AdapterEvent::LinkConnected(guest.device()));
    timeout(WAIT, connected.wait_for(|up| *up)).await.unwrap().unwrap();

    host.emit(AdapterEvent::LinkDisconnected(stranger.device()));

    let error = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert_eq!(error, NON_PAIRED_DEVICE);
    assert!(!connected.has_changed().unwrap());
    assert!(*connected.borrow());
}

#[tokio::test]
async fn test_unbonded_device_link_events_become_errors() {
    let (_radio, host, guest) = paired_pair();
    let controller = controller_for(&host, RuntimePermissions::legacy());
    let mut errors = controller.errors();

    host.unbond(GUEST);
    host.emit(AdapterEvent::LinkConnected(guest.device()));

    let error = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert_eq!(error, NON_PAIRED_DEVICE);
    assert!(!*controller.connected().borrow());
}

#[tokio::test]
async fn test_discovery_lists_unbonded_devices_once() {
    let (radio, host, guest) = paired_pair();
    let stranger = radio.anonymous_adapter("00:00:00:00:00:09");
    let controller = controller_for(&host, RuntimePermissions::legacy());

    let mut paired = controller.paired_devices();
    timeout(WAIT, paired.wait_for(|devices| !devices.is_empty()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(*paired.borrow(), vec![guest.device()]);

    let mut scanned = controller.scanned_devices();
    controller.start_discovery();
    controller.start_discovery();
    timeout(WAIT, scanned.wait_for(|devices| !devices.is_empty()))
        .await
        .unwrap()
        .unwrap();

    controller.stop_discovery().await;
    assert!(!host.is_discovering());
    assert_eq!(*controller.scanned_devices().borrow(), vec![stranger.device()]);
}

#[tokio::test]
async fn test_unnamed_adapter_signs_with_fallback_name() {
    let radio = MemoryRadio::new();
    let host = radio.adapter("Host", HOST);
    let guest = radio.anonymous_adapter(GUEST);
    radio.pair(&host, &guest);

    let server = controller_for(&host, RuntimePermissions::legacy());
    let client = controller_for(&guest, RuntimePermissions::legacy());
    let (mut accepted, _dialed) = establish(&server, &client, &host).await;

    let sent = client.send_message("who am i").await.unwrap();
    assert_eq!(sent.sender, "Unknown name");
    assert_eq!(
        next(&mut accepted).await,
        Some(ConnectionResult::Transferred(Message::incoming(
            "who am i",
            "Unknown name"
        )))
    );
}

#[tokio::test]
async fn test_dropping_controller_withdraws_listener() {
    let (radio, host, _guest) = paired_pair();
    let controller = controller_for(&host, RuntimePermissions::legacy());

    let _server = controller.start_server();
    wait_for_state(&controller, SessionState::Accepting).await;
    assert!(controller.is_listening());

    drop(controller);
    assert_eq!(radio.listener_count(), 0);
}

#[tokio::test]
async fn test_cancelling_dialed_stream_releases_socket() {
    let (_radio, host, guest) = paired_pair();
    let server = controller_for(&host, RuntimePermissions::legacy());
    let client = controller_for(&guest, RuntimePermissions::legacy());

    let (mut accepted, dialed) = establish(&server, &client, &host).await;
    drop(dialed);

    // The client's close path hangs up on the server
    assert_eq!(next(&mut accepted).await, None);
    assert!(!client.has_session());
    wait_for_state(&client, SessionState::Idle).await;

    // Roles swap: the guest listens and the host dials it
    let (_accepted, _dialed) = establish(&client, &server, &guest).await;
    assert!(client.has_session());
    assert!(server.has_session());
}

#[tokio::test]
async fn test_connect_cancels_discovery() {
    let (_radio, host, guest) = paired_pair();
    let server = controller_for(&host, RuntimePermissions::legacy());
    let client = controller_for(&guest, RuntimePermissions::legacy());

    client.start_discovery();
    timeout(WAIT, async {
        while !guest.is_discovering() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("discovery never started");

    let (_accepted, _dialed) = establish(&server, &client, &host).await;
    assert!(!guest.is_discovering());
}

#[tokio::test]
async fn test_close_while_accepting_ends_without_established() {
    let (radio, host, _guest) = paired_pair();
    let server = controller_for(&host, RuntimePermissions::legacy());

    let mut accepted = server.start_server();
    wait_for_state(&server, SessionState::Accepting).await;
    server.close();

    assert_eq!(next(&mut accepted).await, None);
    assert_eq!(radio.listener_count(), 0);
    assert!(!server.has_session());
}
