use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use team_chat::{
    ChatCore, ConnectionState, CoreOptions, Endpoint, Link, LinkEvent, LinkEventKind, LinkFrame,
    ReconnectPolicy, Storage, SubmitOutcome, WsLink,
};

const WAIT: Duration = Duration::from_secs(5);

fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for link event")
        .expect("event channel closed")
}

/// Skip `Connecting` notices and return the next meaningful event.
async fn next_significant(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEventKind {
    loop {
        let event = next_event(rx).await;
        if !matches!(event.kind, LinkEventKind::Connecting { .. }) {
            return event.kind;
        }
    }
}

/// Accepts connections forever and answers every task with an agent reply
/// tagged with the same session.
async fn echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if let Message::Text(text) = msg {
                        let task: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                        let reply = json!({
                            "type": "agent_message",
                            "agent": "Echo",
                            "content": format!("echo: {}", task["task"].as_str().unwrap_or_default()),
                            "sessionId": task["sessionId"],
                        });
                        if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });
    format!("ws://{addr}/ws/agent-team")
}

#[tokio::test]
async fn send_and_receive() {
    let url = echo_server().await;
    let (mut link, mut rx) = WsLink::channel(fast_policy(3));
    link.open(&url, 7);

    let first = next_event(&mut rx).await;
    assert_eq!(first, LinkEvent::new(7, LinkEventKind::Connecting { attempt: 1 }));
    assert_eq!(next_significant(&mut rx).await, LinkEventKind::Opened);

    let task = json!({"task": "ping", "sessionId": "s-1", "timestamp": "2025-01-01T00:00:00.000Z"});
    link.send(LinkFrame::new("m-1", task.to_string())).unwrap();

    let LinkEventKind::Frame(text) = next_significant(&mut rx).await else {
        panic!("expected a frame");
    };
    let reply: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(reply["content"], "echo: ping");
    assert_eq!(reply["sessionId"], "s-1");

    link.close();
}

#[tokio::test]
async fn reconnects_after_server_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        // First connection is closed right after the handshake, the second stays up.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        accepted_tx.send(1).unwrap();
        ws.close(None).await.unwrap();
        drop(ws);

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        accepted_tx.send(2).unwrap();
        while ws.next().await.is_some() {}
    });

    let (mut link, mut rx) = WsLink::channel(fast_policy(3));
    link.open(&format!("ws://{addr}"), 1);

    assert_eq!(next_significant(&mut rx).await, LinkEventKind::Opened);
    assert!(matches!(
        next_significant(&mut rx).await,
        LinkEventKind::Closed { .. }
    ));
    assert_eq!(next_significant(&mut rx).await, LinkEventKind::Opened);
    assert_eq!(accepted_rx.recv().await, Some(1));
    assert_eq!(accepted_rx.recv().await, Some(2));

    link.close();
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    // Bind and immediately drop to get a port nobody listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let (mut link, mut rx) = WsLink::channel(fast_policy(2));
    link.open(&format!("ws://{addr}"), 3);

    let mut kinds = Vec::new();
    loop {
        let event = next_event(&mut rx).await;
        assert_eq!(event.generation, 3);
        let done = matches!(event.kind, LinkEventKind::GaveUp { .. });
        kinds.push(event.kind);
        if done {
            break;
        }
    }

    assert!(matches!(kinds[0], LinkEventKind::Connecting { attempt: 1 }));
    assert!(matches!(kinds[1], LinkEventKind::Closed { .. }));
    assert!(matches!(kinds[2], LinkEventKind::Connecting { attempt: 2 }));
    assert!(matches!(kinds[3], LinkEventKind::GaveUp { .. }));
    assert_eq!(kinds.len(), 4);
}

/// Accepts one connection, closes it right after the handshake, then stops
/// listening so every reconnect is refused.
async fn one_shot_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(listener);
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = ws.close(None).await;
    });
    format!("ws://{addr}")
}

#[tokio::test]
async fn frames_queued_while_down_are_returned_on_give_up() {
    let url = one_shot_server().await;
    let (mut link, mut rx) = WsLink::channel(ReconnectPolicy {
        max_attempts: 2,
        initial_delay: Duration::from_millis(200),
        max_delay: Duration::from_millis(200),
    });
    link.open(&url, 1);

    assert_eq!(next_significant(&mut rx).await, LinkEventKind::Opened);
    assert!(matches!(
        next_significant(&mut rx).await,
        LinkEventKind::Closed { .. }
    ));

    // Accepted during the backoff; the reconnect is refused.
    link.send(LinkFrame::new("m-1", "first")).unwrap();
    link.send(LinkFrame::new("m-2", "second")).unwrap();

    let LinkEventKind::GaveUp { undelivered, .. } = next_significant(&mut rx).await else {
        panic!("expected the link to give up");
    };
    let ids: Vec<&str> = undelivered.iter().map(|f| f.message_id.as_str()).collect();
    assert_eq!(ids, vec!["m-1", "m-2"]);
    assert!(link.send(LinkFrame::new("m-3", "late")).is_err());
}

#[tokio::test]
async fn chat_core_keeps_submit_pending_when_server_goes_away() {
    let url = one_shot_server().await;
    let (link, mut rx) = WsLink::channel(ReconnectPolicy {
        max_attempts: 2,
        initial_delay: Duration::from_millis(200),
        max_delay: Duration::from_millis(200),
    });
    let mut core = ChatCore::new(Storage::in_memory(), link, CoreOptions::default());
    let session = core.new_session();

    core.connect(Endpoint::new(url, None));
    while !core.connection_status_view().connected {
        core.handle_link_event(next_event(&mut rx).await);
    }
    loop {
        let event = next_event(&mut rx).await;
        let closed = matches!(event.kind, LinkEventKind::Closed { .. });
        core.handle_link_event(event);
        if closed {
            break;
        }
    }

    // Submitted while the link is between attempts: queued by the core.
    assert!(matches!(core.submit("still here"), SubmitOutcome::Queued { .. }));

    while core.connection_state() != ConnectionState::Errored {
        core.handle_link_event(next_event(&mut rx).await);
    }
    let view = core.session_view(&session.id).unwrap();
    assert_eq!(view.messages.len(), 1);
    assert!(view.messages[0].pending);
    core.shutdown();
}

#[tokio::test]
async fn close_sends_close_frame_and_stops_events() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
        closed_tx.send(()).unwrap();
    });

    let (mut link, mut rx) = WsLink::channel(fast_policy(3));
    link.open(&format!("ws://{addr}"), 1);
    assert_eq!(next_significant(&mut rx).await, LinkEventKind::Opened);

    link.close();
    link.close();
    tokio::time::timeout(WAIT, closed_rx.recv())
        .await
        .expect("server never saw the close")
        .unwrap();

    // Nothing follows the teardown.
    let later = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(later.is_err(), "unexpected event after close: {later:?}");
}

#[tokio::test]
async fn chat_core_over_websocket() {
    let url = echo_server().await;
    let (link, mut rx) = WsLink::channel(fast_policy(3));
    let mut core = ChatCore::new(Storage::in_memory(), link, CoreOptions::default());

    let session = core.new_session();
    let queued = core.submit("written before connecting");
    assert!(matches!(queued, SubmitOutcome::Queued { .. }));

    core.connect(Endpoint::new(url, Some("secret token".into())));
    while !core.connection_status_view().connected {
        core.handle_link_event(next_event(&mut rx).await);
    }
    // The queued message went out on open; wait for its reply.
    while core.session_view(&session.id).unwrap().messages.len() < 2 {
        core.handle_link_event(next_event(&mut rx).await);
    }

    let sent = core.submit("plan the sprint");
    assert!(matches!(sent, SubmitOutcome::Sent { .. }));

    while core.session_view(&session.id).unwrap().messages.len() < 4 {
        core.handle_link_event(next_event(&mut rx).await);
    }

    let view = core.session_view(&session.id).unwrap();
    let contents: Vec<&str> = view.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec![
            "written before connecting",
            "echo: written before connecting",
            "plan the sprint",
            "echo: plan the sprint",
        ]
    );
    assert!(view.messages.iter().all(|m| !m.pending));
    assert!(!view.awaiting_reply);

    core.shutdown();
}
