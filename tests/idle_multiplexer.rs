//! Push notifications multiplexed with commands through the driver task.

mod common;

use std::time::Duration;

use common::{eventually, FakeMpd};
use mpd_session::client::{event_loop, ChannelListener, ClientEvent, ClientHandle};
use mpd_session::protocol::IdleEvents;
use mpd_session::{ConnectionState, MpdClient};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

async fn spawn_connected(server: &FakeMpd) -> (ClientHandle, UnboundedReceiver<ClientEvent>) {
    let (listener, events) = ChannelListener::new();
    let client = MpdClient::new(server.settings(), Box::new(listener));
    let (handle, _task) = event_loop::spawn(client);
    handle.connect().await.expect("connect");
    (handle, events)
}

/// Receives events until one matches, failing after two seconds.
async fn next_matching<F>(events: &mut UnboundedReceiver<ClientEvent>, mut matches: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Some(event) if matches(&event) => return event,
                Some(_) => continue,
                None => panic!("listener channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Every `noidle` on the wire directly follows an `idle`.
fn noidle_follows_idle(log: &[String]) -> bool {
    log.iter()
        .enumerate()
        .filter(|(_, line)| *line == "noidle")
        .all(|(i, _)| i > 0 && log[i - 1] == "idle")
}

#[tokio::test]
async fn connect_delivers_every_category() {
    let server = FakeMpd::start(&["a.flac"]).await;
    let (_handle, mut events) = spawn_connected(&server).await;

    assert!(matches!(
        next_matching(&mut events, |_| true).await,
        ClientEvent::Connected { .. }
    ));
    assert_eq!(
        next_matching(&mut events, |_| true).await,
        ClientEvent::Updated(IdleEvents::ALL)
    );
}

#[tokio::test]
async fn session_enters_idle_after_connect() {
    let server = FakeMpd::start(&["a.flac"]).await;
    let (handle, _events) = spawn_connected(&server).await;

    assert!(eventually(|| server.count("idle") == 1).await);
    let snapshot = handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.state, ConnectionState::Listening);
}

#[tokio::test]
async fn push_notification_refreshes_mirror() {
    let server = FakeMpd::start(&["a.flac", "b.flac"]).await;
    let (handle, mut events) = spawn_connected(&server).await;
    next_matching(&mut events, |e| *e == ClientEvent::Updated(IdleEvents::ALL)).await;
    assert!(eventually(|| server.count("idle") == 1).await);

    server.external_add("c.flac");

    let event = next_matching(&mut events, |e| matches!(e, ClientEvent::Updated(_))).await;
    let ClientEvent::Updated(changed) = event else {
        unreachable!()
    };
    assert!(changed.contains(IdleEvents::QUEUE));

    let snapshot = handle.snapshot().await.expect("snapshot");
    let ids: Vec<u32> = snapshot.queue.iter().map(|s| s.id).collect();
    assert_eq!(ids, server.ids());
    assert_eq!(snapshot.queue_version, Some(server.version()));
    assert_eq!(server.count("plchanges 10"), 1);
}

#[tokio::test]
async fn mixer_change_is_reported() {
    let server = FakeMpd::start(&[]).await;
    let (handle, mut events) = spawn_connected(&server).await;
    next_matching(&mut events, |e| *e == ClientEvent::Updated(IdleEvents::ALL)).await;
    assert!(eventually(|| server.count("idle") == 1).await);

    server.external_volume(80);

    next_matching(&mut events, |e| {
        matches!(e, ClientEvent::Updated(changed) if changed.contains(IdleEvents::MIXER))
    })
    .await;
    let snapshot = handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.status.and_then(|s| s.volume), Some(80));
}

#[tokio::test]
async fn command_interrupts_idle_once() {
    let server = FakeMpd::start(&["a.flac", "b.flac", "c.flac"]).await;
    let (handle, _events) = spawn_connected(&server).await;
    assert!(eventually(|| server.count("idle") == 1).await);
    server.clear_log();

    handle.delete(0).await.expect("delete");

    let log = server.log();
    assert_eq!(
        &log[..5],
        &[
            "noidle".to_string(),
            "command_list_ok_begin".to_string(),
            "deleteid 1".to_string(),
            "status".to_string(),
            "command_list_end".to_string(),
        ]
    );
    assert_eq!(server.ids(), vec![2, 3]);
}

#[tokio::test]
async fn idle_reentry_never_stacks() {
    let server = FakeMpd::start(&["a.flac", "b.flac", "c.flac", "d.flac"]).await;
    let (handle, _events) = spawn_connected(&server).await;
    assert!(eventually(|| server.count("idle") == 1).await);

    handle.set_volume(30).await.expect("volume");
    handle.volume_up().await.expect("volume up");
    handle.move_song(0, 3).await.expect("move");
    handle.delete_range(1, 3).await.expect("delete range");
    handle.update().await.expect("update");

    assert!(eventually(|| handle_is_listening(&server)).await);
    let log = server.log();
    assert!(noidle_follows_idle(&log), "unexpected wire order: {:?}", log);

    let snapshot = handle.snapshot().await.expect("snapshot");
    let ids: Vec<u32> = snapshot.queue.iter().map(|s| s.id).collect();
    assert_eq!(ids, server.ids());
    assert!(!snapshot.queue_dirty);
}

/// The last line the server saw is an `idle` it has not answered.
fn handle_is_listening(server: &FakeMpd) -> bool {
    server.log().last().map(String::as_str) == Some("idle")
}

#[tokio::test]
async fn dropped_connection_is_reported_once() {
    let server = FakeMpd::start(&["a.flac"]).await;
    let (handle, mut events) = spawn_connected(&server).await;
    assert!(eventually(|| server.count("idle") == 1).await);
    let epoch = handle.snapshot().await.expect("snapshot").epoch;

    server.drop_connections();

    assert!(matches!(
        next_matching(&mut events, |e| matches!(e, ClientEvent::ConnectionLost(_))).await,
        ClientEvent::ConnectionLost(_)
    ));
    let snapshot = handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert_eq!(snapshot.epoch, epoch + 1);
    assert!(snapshot.queue.is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, ClientEvent::ConnectionLost(_)),
            "second loss reported"
        );
    }
}

#[tokio::test]
async fn reconnect_after_loss() {
    let server = FakeMpd::start(&["a.flac", "b.flac"]).await;
    let (handle, mut events) = spawn_connected(&server).await;
    assert!(eventually(|| server.count("idle") == 1).await);

    server.drop_connections();
    next_matching(&mut events, |e| matches!(e, ClientEvent::ConnectionLost(_))).await;

    handle.connect().await.expect("reconnect");
    let snapshot = handle.snapshot().await.expect("snapshot");
    assert!(matches!(
        snapshot.state,
        ConnectionState::Idle | ConnectionState::Listening
    ));
    assert_eq!(snapshot.queue.len(), 2);
}

#[tokio::test]
async fn permission_challenge_is_answered_and_retried() {
    let server = FakeMpd::with_password(&["a.flac", "b.flac"], "pw").await;
    let (listener, mut events) = ChannelListener::new();
    let mut client = MpdClient::new(server.settings(), Box::new(listener.with_password("pw")));

    client.connect().await.expect("connect");
    client.update().await.expect("update after password");

    assert!(server.log().contains(&"password \"pw\"".to_string()));
    assert_eq!(client.queue().len(), 2);
    assert_eq!(client.settings().password.as_deref(), Some("pw"));

    assert!(matches!(events.try_recv(), Ok(ClientEvent::Connected { .. })));
    assert_eq!(events.try_recv().ok(), Some(ClientEvent::AuthChallenge));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn unanswered_permission_error_keeps_session() {
    let server = FakeMpd::with_password(&["a.flac"], "pw").await;
    let (listener, mut events) = ChannelListener::new();
    let mut client = MpdClient::new(server.settings(), Box::new(listener));

    client.connect().await.expect("connect");
    let err = client.update().await.expect_err("denied");
    assert!(err.is_permission_denied());
    assert!(client.is_connected());

    assert!(matches!(events.try_recv(), Ok(ClientEvent::Connected { .. })));
    assert_eq!(events.try_recv().ok(), Some(ClientEvent::AuthChallenge));
    assert!(matches!(events.try_recv(), Ok(ClientEvent::Error(_))));
    assert_eq!(server.count("password \"pw\""), 0);
}
