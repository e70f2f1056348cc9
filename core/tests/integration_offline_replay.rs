// Integration test: offline editing, replay and single-user fallback
//
// Edits made while the server is unreachable wait in the outbox and go out
// after the next snapshot. Running out of reconnect attempts degrades to
// single-user mode until the user retries.

mod common;

use common::{fast_config, one_track_session, wait_for_status, wait_until, SharedGrid, TestServer};
use stepsync_core::{Action, ClientMessage, ConnectionState, SyncError, SyncRuntime};

#[tokio::test]
async fn test_offline_edits_replay_after_reconnect() {
    stepsync_core::logging::init_tracing("debug");

    let server = TestServer::start(one_track_session()).await;
    let grid = SharedGrid::default();
    let handle = SyncRuntime::new(&server.url)
        .with_config(fast_config())
        .with_state_source(Box::new(grid.clone()))
        .spawn(grid.clone())
        .unwrap();

    handle.connect("jam").await.unwrap();
    wait_for_status(&handle, |s| s.player_id.is_some()).await;
    wait_until("snapshot loaded", || grid.snapshot().tracks.len() == 1).await;

    server.set_accepting(false);
    server.drop_connections();
    wait_for_status(&handle, |s| s.state == ConnectionState::Connecting).await;

    let toggle = Action::ToggleStep {
        track_id: "kick".into(),
        step: 3,
    };
    grid.apply(&toggle);
    handle.send_action(toggle).await.unwrap();
    let status = wait_for_status(&handle, |s| s.queued_messages == 1).await;
    assert_ne!(status.state, ConnectionState::Connected);
    assert!(!server.state().track("kick").unwrap().step(3));

    server.set_accepting(true);
    wait_until("queued toggle replayed", || {
        server.state().track("kick").unwrap().step(3)
    })
    .await;
    wait_for_status(&handle, |s| {
        s.state == ConnectionState::Connected && s.queued_messages == 0
    })
    .await;

    // Snapshot wiped the optimistic edit, the replay re-applied it
    assert!(grid.snapshot().track("kick").unwrap().step(3));
    wait_for_status(&handle, |s| s.mutations.total_confirmed >= 1).await;

    // Replayed with a fresh sequence number in the new generation
    let replayed = server
        .received()
        .into_iter()
        .find(|e| matches!(e.message, ClientMessage::ToggleStep { step: 3, .. }))
        .unwrap();
    assert_eq!(replayed.seq, Some(1));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_drops_queued_edits() {
    let server = TestServer::start(one_track_session()).await;
    server.set_accepting(false);
    let grid = SharedGrid::default();
    let handle = SyncRuntime::new(&server.url)
        .with_config(fast_config())
        .spawn(grid.clone())
        .unwrap();

    handle.connect("jam").await.unwrap();
    handle
        .send_action(Action::SetTempo { tempo: 140.0 })
        .await
        .unwrap();
    wait_for_status(&handle, |s| s.queued_messages == 1).await;

    handle.disconnect().await.unwrap();
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.queued_messages, 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_degrades_then_recovers_on_retry() {
    let server = TestServer::start(one_track_session()).await;
    server.set_accepting(false);

    let mut config = fast_config();
    config.reconnect.max_attempts = 3;
    let grid = SharedGrid::default();
    let handle = SyncRuntime::new(&server.url)
        .with_config(config)
        .with_state_source(Box::new(grid.clone()))
        .spawn(grid.clone())
        .unwrap();

    let mut updates = handle.subscribe().await.unwrap();
    handle.connect("jam").await.unwrap();

    let status = wait_for_status(&handle, |s| s.state == ConnectionState::Degraded).await;
    assert_eq!(status.reconnect_attempts, 3);
    assert!(status.error.is_some());

    // Subscribers saw every transition on the way down
    let mut seen = Vec::new();
    while let Ok(update) = updates.try_recv() {
        seen.push(update.state);
    }
    assert_eq!(seen.first(), Some(&ConnectionState::Disconnected));
    assert!(seen.contains(&ConnectionState::Connecting));
    assert_eq!(seen.last(), Some(&ConnectionState::Degraded));

    // Edits keep working single-user and are held for later
    handle
        .send_action(Action::SetTempo { tempo: 90.0 })
        .await
        .unwrap();

    server.set_accepting(true);
    handle.retry_connection().await.unwrap();
    let status = wait_for_status(&handle, |s| {
        s.state == ConnectionState::Connected && s.player_id.is_some()
    })
    .await;
    assert!(status.error.is_none());
    wait_until("held tempo replayed", || server.state().tempo == 90.0).await;

    // Retrying is only meaningful from degraded
    assert!(matches!(
        handle.retry_connection().await,
        Err(SyncError::InvalidState { .. })
    ));

    handle.shutdown().await.unwrap();
}
