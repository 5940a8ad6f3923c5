use futures_util::{SinkExt, StreamExt};
use std::time::{Duration, Instant};
use tandem_channel::ConnectionManager;
use tandem_core::{
    ChannelEvent, ChannelKind, ChannelSignal, ConnectionState, Inbound, Outbound, ReconnectPolicy,
};
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a channel event")
        .expect("event stream closed")
}

async fn wait_for_state(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>, wanted: ConnectionState) {
    loop {
        if next_event(rx).await.signal == ChannelSignal::StateChanged(wanted) {
            return;
        }
    }
}

/// Echo server: the first connection answers one text and one binary frame,
/// then closes; later connections stay open.
async fn spawn_echo_server() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut accepted = 0;
        while let Ok((tcp, _)) = listener.accept().await {
            accepted += 1;
            let Ok(mut ws) = accept_async(tcp).await else {
                continue;
            };
            if accepted == 1 {
                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    ws.send(Message::Text(format!("you sent: {text}"))).await.unwrap();
                }
                if let Some(Ok(Message::Binary(data))) = ws.next().await {
                    ws.send(Message::Binary(data)).await.unwrap();
                }
                let _ = ws.close(None).await;
                while let Some(Ok(_)) = ws.next().await {}
            } else {
                tokio::spawn(async move { while let Some(Ok(_)) = ws.next().await {} });
            }
        }
    });
    (format!("ws://{addr}/ws/1"), handle)
}

#[tokio::test]
async fn test_send_is_noop_before_connect() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let manager = ConnectionManager::new(
        ChannelKind::Text,
        "ws://127.0.0.1:9/ws/1",
        ReconnectPolicy::default(),
        tx,
    );
    assert_eq!(manager.state(), ConnectionState::Uninstantiated);
    assert!(!manager.send(Outbound::Text("hi".into())));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_exchange_then_reconnect_after_server_close() {
    init_tracing();
    let (url, server) = spawn_echo_server().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let policy = ReconnectPolicy::new(3, Duration::from_millis(50));
    let mut manager = ConnectionManager::new(ChannelKind::Text, url, policy, tx);

    manager.connect();
    manager.connect();
    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::state(ChannelKind::Text, ConnectionState::Connecting)
    );
    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::state(ChannelKind::Text, ConnectionState::Open)
    );
    assert_eq!(manager.state(), ConnectionState::Open);

    assert!(manager.send(Outbound::Text("hi".into())));
    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::received(ChannelKind::Text, Inbound::Text("you sent: hi".into()))
    );
    assert!(manager.send(Outbound::Binary(vec![1u8, 2, 3].into())));
    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::received(ChannelKind::Text, Inbound::Binary(vec![1u8, 2, 3].into()))
    );

    // The server closes: Open -> Closing -> Closed, then a retry after the delay.
    assert_eq!(
        next_event(&mut rx).await.signal,
        ChannelSignal::StateChanged(ConnectionState::Closing)
    );
    assert_eq!(
        next_event(&mut rx).await.signal,
        ChannelSignal::StateChanged(ConnectionState::Closed)
    );
    let closed_at = Instant::now();
    assert_eq!(
        next_event(&mut rx).await.signal,
        ChannelSignal::StateChanged(ConnectionState::Connecting)
    );
    assert!(closed_at.elapsed() >= Duration::from_millis(40));
    wait_for_state(&mut rx, ConnectionState::Open).await;

    manager.shutdown();
    assert_eq!(manager.state(), ConnectionState::Closed);
    server.abort();
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    init_tracing();
    // Reserve a port, then free it so every connect is refused.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let delay = Duration::from_millis(20);
    let mut manager =
        ConnectionManager::new(ChannelKind::Audio, format!("ws://{addr}/ws/audio/1"), ReconnectPolicy::new(3, delay), tx);
    manager.connect();

    let mut connecting = Vec::new();
    let mut closed = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
            Ok(Some(event)) => {
                assert_eq!(event.kind, ChannelKind::Audio);
                match event.signal {
                    ChannelSignal::StateChanged(ConnectionState::Connecting) => connecting.push(Instant::now()),
                    ChannelSignal::StateChanged(ConnectionState::Closed) => closed.push(Instant::now()),
                    other => panic!("unexpected event {other:?}"),
                }
            }
            _ => break,
        }
    }

    // The first attempt plus three retries, each retry one delay after a close.
    assert_eq!(connecting.len(), 4);
    assert_eq!(closed.len(), 4);
    for (close, retry) in closed.iter().zip(connecting.iter().skip(1)) {
        assert!(retry.duration_since(*close) >= delay / 2);
    }
    assert_eq!(manager.state(), ConnectionState::Closed);
    assert!(!manager.send(Outbound::Text("hello".into())));
}
