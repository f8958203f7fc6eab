//! End-to-end session flows over the wire protocol.
//!
//! Each test drives real `Session`s with JSON frames against a controller
//! backed by the in-memory store and the mock media collaborator.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::time::Duration;

use futures::future::join_all;
use serde_json::{json, Value};
use venue_test_utils::{TestClient, TestUser, TestVenueServer};

async fn create_camera(client: &mut TestClient, name: &str, sender_id: Option<&str>) -> String {
    let data = client
        .call("camera.create", json!({ "name": name, "senderId": sender_id }))
        .await;
    data["cameraId"].as_str().unwrap().to_string()
}

fn portal_targets(camera_state: &Value) -> Vec<String> {
    camera_state["portals"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["toCameraId"].as_str().unwrap().to_string())
        .collect()
}

async fn wait_until_unloaded(server: &TestVenueServer) {
    for _ in 0..100 {
        let status = server.controller.status().await.unwrap();
        if status.loaded + status.loading + status.unloading == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Venue never unloaded");
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_concurrent_joins_share_one_load() {
    let server = TestVenueServer::new();
    let owner = TestUser::moderator("owner");
    let venue_id = server.create_venue("hall", &owner).await;
    server.open_venue(venue_id).await;

    let mut clients: Vec<TestClient> = (0..5)
        .map(|i| server.connect(&TestUser::user(&format!("guest-{i}"))))
        .collect();
    let responses = join_all(
        clients
            .iter_mut()
            .map(|c| c.request("venue.join", json!({ "venueId": venue_id }))),
    )
    .await;

    assert!(responses.iter().all(|r| r.was_success));
    assert_eq!(server.store.venue_reads(), 1);
    assert_eq!(server.media.routers_created(), 1);
    assert_eq!(server.controller.status().await.unwrap().loaded, 1);
}

#[tokio::test]
async fn test_last_leave_unloads_exactly_once() {
    let server = TestVenueServer::new();
    let owner = TestUser::moderator("owner");
    let venue_id = server.create_venue("hall", &owner).await;
    server.open_venue(venue_id).await;

    let mut a = server.connect(&owner);
    let mut b = server.connect(&TestUser::user("bob"));
    a.call("venue.join", json!({ "venueId": venue_id })).await;
    b.call("venue.join", json!({ "venueId": venue_id })).await;

    a.call("venue.leave", Value::Null).await;
    assert_eq!(server.controller.status().await.unwrap().loaded, 1);
    b.disconnect().await;
    wait_until_unloaded(&server).await;

    let routers = server.media.routers();
    assert_eq!(routers.len(), 1);
    assert_eq!(routers[0].close_calls(), 1);

    // A later join loads a fresh instance.
    a.call("venue.join", json!({ "venueId": venue_id })).await;
    assert_eq!(server.media.routers_created(), 2);
}

#[tokio::test]
async fn test_delete_requires_unloaded_venue() {
    let server = TestVenueServer::new();
    let owner = TestUser::moderator("owner");
    let mut client = server.connect(&owner);

    let created = client.call("venue.create", json!({ "name": "studio" })).await;
    let venue_id = created["venueId"].clone();

    let mine = client.call("venue.listMine", Value::Null).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
    assert_eq!(mine[0]["name"], "studio");

    client.call("venue.join", json!({ "venueId": venue_id })).await;
    let loaded = client.call("venue.listLoaded", Value::Null).await;
    assert_eq!(loaded[0]["venueId"], venue_id);

    client.call_err("venue.delete", json!({ "venueId": venue_id })).await;

    client.call("venue.leave", Value::Null).await;
    wait_until_unloaded(&server).await;
    client.call("venue.delete", json!({ "venueId": venue_id })).await;

    let mine = client.call("venue.listMine", Value::Null).await;
    assert!(mine.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_notifies_sessions() {
    let server = TestVenueServer::new();
    let owner = TestUser::moderator("owner");
    let venue_id = server.create_venue("hall", &owner).await;

    let mut client = server.connect(&owner);
    client.call("venue.join", json!({ "venueId": venue_id })).await;

    server
        .controller
        .shutdown(Duration::from_secs(5))
        .await
        .unwrap();

    let left = client.next_message("venue.left").await;
    assert_eq!(left["venueId"], json!(venue_id));
    assert_eq!(server.media.routers()[0].close_calls(), 1);
}

// ============================================================================
// Access
// ============================================================================

#[tokio::test]
async fn test_private_venue_admits_after_doors_open() {
    let server = TestVenueServer::new();
    let owner = TestUser::moderator("owner");
    let venue_id = server.create_venue("hall", &owner).await;

    let mut guest = server.connect(&TestUser::user("bob"));
    let message = guest
        .call_err("venue.join", json!({ "venueId": venue_id }))
        .await;
    assert_eq!(message, "The venue is not open");
    assert_eq!(server.media.routers_created(), 0);

    let mut host = server.connect(&owner);
    host.call("venue.join", json!({ "venueId": venue_id })).await;
    host.call("venue.update", json!({ "doorsManuallyOpened": true }))
        .await;

    guest.call("venue.join", json!({ "venueId": venue_id })).await;
    let state = guest.call("venue.getState", Value::Null).await;
    assert_eq!(state["doorsAreOpen"], true);
}

#[tokio::test]
async fn test_guard_rejection_leaves_state_unchanged() {
    let server = TestVenueServer::new();
    let owner = TestUser::moderator("owner");
    let venue_id = server.create_venue("hall", &owner).await;
    server.open_venue(venue_id).await;

    let mut host = server.connect(&owner);
    host.call("venue.join", json!({ "venueId": venue_id })).await;
    let mut user = server.connect(&TestUser::user("bob"));
    user.call("venue.join", json!({ "venueId": venue_id })).await;

    let public_before = host.call("venue.getState", Value::Null).await;
    let admin_before = host.call("venue.getAdminState", Value::Null).await;

    let message = user
        .call_err("camera.create", json!({ "name": "sneaky" }))
        .await;
    assert!(message.contains("moderator"));
    user.call_err("venue.update", json!({ "name": "renamed" }))
        .await;
    user.call_err("venue.getAdminState", Value::Null).await;
    user.call_err("venue.load", json!({ "venueId": venue_id }))
        .await;

    let public_after = host.call("venue.getState", Value::Null).await;
    let admin_after = host.call("venue.getAdminState", Value::Null).await;
    assert_eq!(public_before, public_after);
    assert_eq!(admin_before, admin_after);
}

#[tokio::test]
async fn test_disconnect_during_join_leaves_no_member() {
    let server = TestVenueServer::new();
    let owner = TestUser::moderator("owner");
    let venue_id = server.create_venue("hall", &owner).await;
    server.open_venue(venue_id).await;

    let mut host = server.connect(&owner);
    host.call("venue.join", json!({ "venueId": venue_id })).await;
    let mut guest = server.connect(&TestUser::user("bob"));

    // The venue actor is busy on a store write that has not returned, so the
    // guest's join queues behind it and the guest gives up waiting.
    server.store.set_stalled(true);
    let (update, ()) = tokio::join!(
        host.request("venue.update", json!({ "name": "renamed" })),
        async {
            while server.store.stalled_calls() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            guest
                .abandon_request(
                    "venue.join",
                    json!({ "venueId": venue_id }),
                    Duration::from_millis(100),
                )
                .await;
            server.store.set_stalled(false);
        }
    );
    assert!(update.was_success);
    guest.disconnect().await;

    let venue = server.controller.loaded_handles().await.unwrap().remove(0);
    let stats = venue.stats().await.unwrap();
    assert_eq!(stats.receivers, 1);
    let admin = host.call("venue.getAdminState", Value::Null).await;
    assert_eq!(admin["sessions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_venue_procedures_require_membership() {
    let server = TestVenueServer::new();
    let mut client = server.connect(&TestUser::moderator("owner"));

    let message = client.call_err("venue.getState", Value::Null).await;
    assert_eq!(message, "Not in a venue");
    client.call_err("camera.leave", Value::Null).await;
}

// ============================================================================
// Camera graph
// ============================================================================

#[tokio::test]
async fn test_portals_are_directed() {
    let server = TestVenueServer::new();
    let owner = TestUser::moderator("owner");
    let venue_id = server.create_venue("hall", &owner).await;

    let mut host = server.connect(&owner);
    host.call("venue.join", json!({ "venueId": venue_id })).await;
    let a = create_camera(&mut host, "a", None).await;
    let b = create_camera(&mut host, "b", None).await;
    host.call(
        "camera.setPortal",
        json!({ "fromCameraId": a, "toCameraId": b, "x": 0.5, "y": 0.5, "distance": 3.0 }),
    )
    .await;

    let at_a = host.call("camera.join", json!({ "cameraId": a })).await;
    assert_eq!(portal_targets(&at_a), vec![b.clone()]);
    let at_b = host.call("camera.join", json!({ "cameraId": b })).await;
    assert!(portal_targets(&at_b).is_empty());

    host.call_err(
        "camera.setPortal",
        json!({ "fromCameraId": a, "toCameraId": a, "x": 0.5, "y": 0.5, "distance": 1.0 }),
    )
    .await;
    host.call_err(
        "camera.setPortal",
        json!({ "fromCameraId": a, "toCameraId": b, "x": 1.5, "y": 0.5, "distance": 1.0 }),
    )
    .await;
}

#[tokio::test]
async fn test_camera_delete_evicts_receivers_and_stale_portals() {
    let server = TestVenueServer::new();
    let owner = TestUser::moderator("owner");
    let venue_id = server.create_venue("hall", &owner).await;
    server.open_venue(venue_id).await;

    let mut host = server.connect(&owner);
    host.call("venue.join", json!({ "venueId": venue_id })).await;
    let a = create_camera(&mut host, "a", None).await;
    let b = create_camera(&mut host, "b", None).await;
    host.call(
        "camera.setPortal",
        json!({ "fromCameraId": a, "toCameraId": b, "x": 0.1, "y": 0.9, "distance": 2.0 }),
    )
    .await;
    host.call("camera.setMainAudio", json!({ "cameraId": b }))
        .await;

    let mut viewer = server.connect(&TestUser::user("viewer"));
    viewer.call("venue.join", json!({ "venueId": venue_id })).await;
    viewer.call("camera.join", json!({ "cameraId": b })).await;

    host.call("camera.delete", json!({ "cameraId": b })).await;

    let left = viewer.next_message("camera.left").await;
    assert_eq!(left["cameraId"], json!(b));
    let state = viewer.call("session.getState", Value::Null).await;
    assert_eq!(state["cameraId"], Value::Null);

    let at_a = viewer.call("camera.join", json!({ "cameraId": a })).await;
    assert!(portal_targets(&at_a).is_empty());

    let admin = host.call("venue.getAdminState", Value::Null).await;
    assert_eq!(admin["cameras"].as_array().unwrap().len(), 1);
    assert_eq!(admin["mainAudioCameraId"], Value::Null);
}

// ============================================================================
// Publishers
// ============================================================================

#[tokio::test]
async fn test_publisher_auto_attach_and_duplicate_sender() {
    let server = TestVenueServer::new();
    let owner = TestUser::moderator("owner");
    let venue_id = server.create_venue("hall", &owner).await;
    server.open_venue(venue_id).await;

    let mut host = server.connect(&owner);
    host.call("venue.join", json!({ "venueId": venue_id })).await;
    let stage = create_camera(&mut host, "stage", Some("cam-a")).await;

    let mut sender = server.connect_sender(&TestUser::user("rig"), "cam-a");
    let joined = sender.call("venue.join", json!({ "venueId": venue_id })).await;
    assert_eq!(joined["cameraId"], json!(stage));

    let mut duplicate = server.connect_sender(&TestUser::user("rig-2"), "cam-a");
    duplicate
        .call_err("venue.join", json!({ "venueId": venue_id }))
        .await;

    let mut stray = server.connect_sender(&TestUser::user("rig-3"), "cam-z");
    let joined = stray.call("venue.join", json!({ "venueId": venue_id })).await;
    assert_eq!(joined["cameraId"], Value::Null);

    let admin = host.call("venue.getAdminState", Value::Null).await;
    let detached = admin["detachedSenders"].as_array().unwrap();
    assert_eq!(detached.len(), 1);
    assert_eq!(detached[0]["senderId"], "cam-z");

    // Publishers cannot watch cameras.
    sender
        .call_err("camera.join", json!({ "cameraId": stage }))
        .await;
}

// ============================================================================
// Subscriptions and protocol
// ============================================================================

#[tokio::test]
async fn test_subscription_ack_then_pushes() {
    let server = TestVenueServer::new();
    let owner = TestUser::moderator("owner");
    let venue_id = server.create_venue("hall", &owner).await;

    let mut host = server.connect(&owner);
    host.call("venue.join", json!({ "venueId": venue_id })).await;
    host.subscribe("venue.state").await;

    let snapshot = host.next_message("venue.state").await;
    assert_eq!(snapshot["name"], "hall");

    host.call("venue.update", json!({ "name": "grand hall" }))
        .await;
    let pushed = host.next_message("venue.state").await;
    assert_eq!(pushed["name"], "grand hall");

    host.call("session.unsubscribe", json!({ "slot": "venue.state" }))
        .await;
    host.call("venue.update", json!({ "name": "hall" })).await;
    assert!(host.latest_message("venue.state").await.is_none());
}

#[tokio::test]
async fn test_unknown_subject_and_malformed_frames() {
    let server = TestVenueServer::new();
    let mut client = server.connect(&TestUser::user("bob"));

    let message = client.call_err("venue.teleport", Value::Null).await;
    assert!(message.contains("venue.teleport"));

    // Dropped without a response; the session keeps working.
    client.send_text("not json").await;
    client
        .send_text(r#"{"type":"request","subject":"session.getState"}"#)
        .await;

    let state = client.call("session.getState", Value::Null).await;
    assert_eq!(state["username"], "bob");
    assert_eq!(state["clientType"], "client");
}

#[tokio::test]
async fn test_display_name_change_reaches_admin_state() {
    let server = TestVenueServer::new();
    let owner = TestUser::moderator("owner");
    let venue_id = server.create_venue("hall", &owner).await;

    let mut host = server.connect(&owner);
    host.call("venue.join", json!({ "venueId": venue_id })).await;
    host.call("session.setDisplayName", json!({ "username": "  Host  " }))
        .await;
    host.call_err("session.setDisplayName", json!({ "username": "   " }))
        .await;

    let admin = host.call("venue.getAdminState", Value::Null).await;
    assert_eq!(admin["sessions"][0]["username"], "Host");
}
