//! Reconnecting WebSocket channel.
//!
//! A [`ConnectionManager`] owns one WebSocket endpoint for the lifetime of a
//! session. It connects lazily, reports every state change and inbound payload
//! to a single subscriber, and reconnects with a fixed delay until its
//! [`ReconnectPolicy`] is exhausted, after which it stays `Closed`.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tandem_core::{
    Channel, ChannelEvent, ChannelKind, CloseInfo, ConnectionState, Inbound, Outbound,
    ReconnectDecision, ReconnectPolicy, ReconnectTracker,
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use tracing::{Instrument, debug, info, info_span, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Publishes state changes and payloads of one channel to its subscriber.
#[derive(Clone)]
struct Reporter {
    kind: ChannelKind,
    state: Arc<watch::Sender<ConnectionState>>,
    subscriber: mpsc::UnboundedSender<ChannelEvent>,
}

impl Reporter {
    fn set(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            debug!(state = %next, "Channel state transition.");
            let _ = self.subscriber.send(ChannelEvent::state(self.kind, next));
        }
    }

    fn deliver(&self, payload: Inbound) {
        let _ = self.subscriber.send(ChannelEvent::received(self.kind, payload));
    }
}

pub struct ConnectionManager {
    kind: ChannelKind,
    url: String,
    policy: ReconnectPolicy,
    reporter: Reporter,
    state_rx: watch::Receiver<ConnectionState>,
    outbound_tx: Option<mpsc::UnboundedSender<Outbound>>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Creates an unstarted manager. `subscriber` receives every event this
    /// channel produces and is its only observer.
    pub fn new(
        kind: ChannelKind,
        url: impl Into<String>,
        policy: ReconnectPolicy,
        subscriber: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Uninstantiated);
        Self {
            kind,
            url: url.into(),
            policy,
            reporter: Reporter {
                kind,
                state: Arc::new(state_tx),
                subscriber,
            },
            state_rx,
            outbound_tx: None,
            task: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Spawns the socket task on the current Tokio runtime. Calling it again
    /// has no effect, including after the channel gave up.
    pub fn connect(&mut self) {
        if self.task.is_some() {
            return;
        }
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let span = info_span!("channel", channel = %self.kind, url = %self.url);
        let task = tokio::spawn(
            run(
                self.url.clone(),
                ReconnectTracker::new(self.policy.clone()),
                self.reporter.clone(),
                outbound_rx,
            )
            .instrument(span),
        );
        self.outbound_tx = Some(outbound_tx);
        self.task = Some(task);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Hands `payload` to the socket if the channel is `Open`; otherwise
    /// drops it and returns `false`.
    pub fn send(&self, payload: Outbound) -> bool {
        if !self.state().is_open() {
            debug!(channel = %self.kind, "Channel not open; dropping outbound payload.");
            return false;
        }
        match &self.outbound_tx {
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    /// Stops the socket task, closing the socket and cancelling any pending
    /// retry. The channel ends in `Closed`.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.outbound_tx = None;
            self.reporter.state.send_replace(ConnectionState::Closed);
            info!(channel = %self.kind, "Channel shut down.");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Channel for ConnectionManager {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn state(&self) -> ConnectionState {
        ConnectionManager::state(self)
    }

    fn connect(&mut self) {
        ConnectionManager::connect(self)
    }

    fn send(&self, payload: Outbound) -> bool {
        ConnectionManager::send(self, payload)
    }
}

/// Connect, pump, and retry until the tracker gives up.
async fn run(
    url: String,
    mut tracker: ReconnectTracker,
    reporter: Reporter,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    loop {
        reporter.set(ConnectionState::Connecting);
        let close = match connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                // Anything accepted while the previous socket was going down is stale.
                while outbound_rx.try_recv().is_ok() {}
                tracker.on_open();
                reporter.set(ConnectionState::Open);
                info!("Channel connected.");
                let close = pump(socket, &reporter, &mut outbound_rx).await;
                reporter.set(ConnectionState::Closing);
                close
            }
            Err(e) => {
                warn!(error = %e, "Connection attempt failed.");
                CloseInfo::connect_failed(e.to_string())
            }
        };
        reporter.set(ConnectionState::Closed);

        match tracker.on_closed(&close) {
            ReconnectDecision::Retry { attempt, delay } => {
                info!(
                    attempt,
                    max_attempts = tracker.policy().max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    code = ?close.code,
                    "Channel closed; reconnecting after delay."
                );
                tokio::time::sleep(delay).await;
            }
            ReconnectDecision::GiveUp(reason) => {
                warn!(?reason, attempts = tracker.attempts(), "Channel closed for good.");
                return;
            }
        }
    }
}

/// Moves payloads between the socket and the session until the socket ends.
async fn pump(
    socket: Socket,
    reporter: &Reporter,
    outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>,
) -> CloseInfo {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            Some(payload) = outbound_rx.recv() => {
                let message = match payload {
                    Outbound::Text(text) => Message::Text(text),
                    Outbound::Binary(data) => Message::Binary(data.to_vec()),
                };
                if let Err(e) = sink.send(message).await {
                    warn!(error = %e, "Failed to write to socket.");
                    return CloseInfo { code: None, reason: e.to_string() };
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => reporter.deliver(Inbound::Text(text)),
                Some(Ok(Message::Binary(data))) => reporter.deliver(Inbound::Binary(Bytes::from(data))),
                Some(Ok(Message::Close(frame))) => {
                    let info = frame
                        .map(|f| CloseInfo { code: Some(u16::from(f.code)), reason: f.reason.to_string() })
                        .unwrap_or_default();
                    info!(code = ?info.code, reason = %info.reason, "Server closed the channel.");
                    let _ = sink.close().await;
                    return info;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Socket error.");
                    return CloseInfo { code: None, reason: e.to_string() };
                }
                None => return CloseInfo::default(),
            },
        }
    }
}
