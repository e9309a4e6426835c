//! Behaviour of the core crate as seen by transport backends

use bluechat_core::codec::{decode, encode};
use bluechat_core::{
    Capability, CapabilityTier, ConnectionResult, Device, Message, PermissionGate,
    RuntimePermissions, SessionState, CONNECTION_INTERRUPTED,
};

#[test]
fn test_outgoing_frame_arrives_as_incoming_message() {
    let sent = Message::outgoing("see you at 5", "Pixel 7");
    let frame = encode(&sent);

    // The receiver reuses a larger buffer for every read
    let mut buffer = vec![b'!'; 1024];
    buffer[..frame.len()].copy_from_slice(&frame);
    let received = decode(&buffer, frame.len(), false);

    assert_eq!(received, Message::incoming("see you at 5", "Pixel 7"));
    assert_eq!(received.to_string(), "[Pixel 7] see you at 5");
}

#[test]
fn test_devices_deduplicate_by_name_and_address() {
    let mut listing: Vec<Device> = Vec::new();
    for device in [
        Device::named("Speaker", "AA:BB:CC:00:11:22"),
        Device::named("Speaker", "AA:BB:CC:00:11:22"),
        Device::new(None, "AA:BB:CC:00:11:22"),
    ] {
        if !listing.contains(&device) {
            listing.push(device);
        }
    }

    assert_eq!(listing.len(), 2);
    assert!(listing[0].same_address(&listing[1]));
    assert_eq!(listing[1].display_name(), "AA:BB:CC:00:11:22");
}

#[test]
fn test_runtime_grants_can_be_withdrawn() {
    let gate = RuntimePermissions::new(CapabilityTier::RuntimeGranted);
    assert!(!gate.allows(Capability::Connect));

    gate.grant(Capability::Connect);
    assert!(gate.can_connect());
    assert!(!gate.can_scan());

    gate.revoke(Capability::Connect);
    assert!(!gate.can_connect());
}

#[test]
fn test_result_sequence_shape() {
    let sequence = [
        ConnectionResult::Established,
        ConnectionResult::Transferred(Message::incoming("hi", "bob")),
        ConnectionResult::error(CONNECTION_INTERRUPTED),
    ];

    let terminal: Vec<_> = sequence.iter().filter(|r| r.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    assert!(sequence.last().unwrap().is_terminal());
    assert!(!SessionState::Closing.is_active());
    assert!(SessionState::Dialing.is_active());
}
