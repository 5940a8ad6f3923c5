//! Connection State and Reconnection Policy
//!
//! This module holds the transport-independent half of a reconnecting channel:
//! the readiness state machine, the payload types exchanged with the socket,
//! and the bounded fixed-delay retry accounting. The socket runtime itself
//! lives in the `tandem-channel` crate and drives a [`ReconnectTracker`].

use bytes::Bytes;
use serde::Serialize;
use std::{fmt, sync::Arc, time::Duration};

/// Default number of reconnection attempts before a channel gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Default fixed delay between reconnection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3000);

/// Readiness of a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// The channel has never been asked to connect.
    Uninstantiated,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }

    /// The status label shown by the presentation layer.
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Uninstantiated => "Uninstantiated",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Open => "Open",
            ConnectionState::Closing => "Closing",
            ConnectionState::Closed => "Closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identifies which of the two session channels an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Text,
    Audio,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Text => write!(f, "text"),
            ChannelKind::Audio => write!(f, "audio"),
        }
    }
}

/// A payload received from a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Bytes),
}

/// A payload to transmit over a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Binary(Bytes),
}

/// What a channel reports to its single subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    StateChanged(ConnectionState),
    Received(Inbound),
}

/// An observable event emitted by one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    pub kind: ChannelKind,
    pub signal: ChannelSignal,
}

impl ChannelEvent {
    pub fn state(kind: ChannelKind, state: ConnectionState) -> Self {
        Self {
            kind,
            signal: ChannelSignal::StateChanged(state),
        }
    }

    pub fn received(kind: ChannelKind, payload: Inbound) -> Self {
        Self {
            kind,
            signal: ChannelSignal::Received(payload),
        }
    }
}

/// Why a connection ended. A failed connect carries no close code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseInfo {
    pub fn connect_failed(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
        }
    }
}

type RetryPredicate = Arc<dyn Fn(&CloseInfo) -> bool + Send + Sync>;

/// Bounded fixed-delay reconnection policy. Immutable once built.
#[derive(Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    delay: Duration,
    should_retry: RetryPredicate,
}

impl ReconnectPolicy {
    /// A policy that retries every close, up to `max_attempts` times.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            should_retry: Arc::new(|_| true),
        }
    }

    /// Replaces the retry predicate.
    pub fn with_predicate<F>(self, predicate: F) -> Self
    where
        F: Fn(&CloseInfo) -> bool + Send + Sync + 'static,
    {
        Self {
            should_retry: Arc::new(predicate),
            ..self
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn should_retry(&self, info: &CloseInfo) -> bool {
        (self.should_retry)(info)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

impl fmt::Debug for ReconnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

/// Outcome of a close as judged by the [`ReconnectTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Re-enter `Connecting` after `delay`. `attempt` is 1-based.
    Retry { attempt: u32, delay: Duration },
    /// Remain `Closed` for good.
    GiveUp(GiveUpReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The policy predicate declined to retry this close.
    Declined,
    /// All attempts were used without reaching `Open`.
    Exhausted,
}

/// Per-channel retry counter. Counters of different channels are independent.
#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    policy: ReconnectPolicy,
    attempts: u32,
    terminal: bool,
}

impl ReconnectTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            terminal: false,
        }
    }

    /// Number of retries made since the channel was last `Open`.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Reaching `Open` resets the attempt counter.
    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    /// Decides what follows a transition into `Closed`.
    pub fn on_closed(&mut self, info: &CloseInfo) -> ReconnectDecision {
        if self.terminal {
            return ReconnectDecision::GiveUp(GiveUpReason::Exhausted);
        }
        if !self.policy.should_retry(info) {
            self.terminal = true;
            return ReconnectDecision::GiveUp(GiveUpReason::Declined);
        }
        if self.attempts >= self.policy.max_attempts {
            self.terminal = true;
            return ReconnectDecision::GiveUp(GiveUpReason::Exhausted);
        }
        self.attempts += 1;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay: self.policy.delay,
        }
    }
}

/// The controller's view of one reconnecting channel.
///
/// Implemented by `tandem_channel::ConnectionManager` over a real WebSocket and
/// by in-memory fakes in tests.
pub trait Channel: Send {
    fn kind(&self) -> ChannelKind;

    /// Current readiness. Read-only outside the owning manager.
    fn state(&self) -> ConnectionState;

    /// Starts connecting if the channel was never started. Idempotent.
    fn connect(&mut self);

    /// Transmits `payload` if the channel is `Open`.
    ///
    /// Returns `false` without buffering anything when it is not.
    fn send(&self, payload: Outbound) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed() -> CloseInfo {
        CloseInfo {
            code: Some(1006),
            reason: "abnormal".to_string(),
        }
    }

    #[test]
    fn test_default_policy_values() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts(), 10);
        assert_eq!(policy.delay(), Duration::from_millis(3000));
        assert!(policy.should_retry(&closed()));
    }

    #[test]
    fn test_retries_with_fixed_delay_until_exhausted() {
        let mut tracker = ReconnectTracker::new(ReconnectPolicy::default());
        for expected in 1..=10 {
            assert_eq!(
                tracker.on_closed(&closed()),
                ReconnectDecision::Retry {
                    attempt: expected,
                    delay: Duration::from_millis(3000),
                }
            );
        }
        assert_eq!(
            tracker.on_closed(&closed()),
            ReconnectDecision::GiveUp(GiveUpReason::Exhausted)
        );
        assert!(tracker.is_terminal());
        // Terminal stays terminal, even if something reports another close.
        assert_eq!(
            tracker.on_closed(&closed()),
            ReconnectDecision::GiveUp(GiveUpReason::Exhausted)
        );
    }

    #[test]
    fn test_open_resets_attempts() {
        let mut tracker = ReconnectTracker::new(ReconnectPolicy::new(3, Duration::from_millis(5)));
        tracker.on_closed(&closed());
        tracker.on_closed(&closed());
        assert_eq!(tracker.attempts(), 2);

        tracker.on_open();
        assert_eq!(tracker.attempts(), 0);
        for _ in 0..3 {
            assert!(matches!(
                tracker.on_closed(&closed()),
                ReconnectDecision::Retry { .. }
            ));
        }
        assert!(matches!(
            tracker.on_closed(&closed()),
            ReconnectDecision::GiveUp(_)
        ));
    }

    #[test]
    fn test_predicate_can_decline() {
        let policy = ReconnectPolicy::default().with_predicate(|info| info.code != Some(1000));
        let mut tracker = ReconnectTracker::new(policy);

        assert!(matches!(
            tracker.on_closed(&CloseInfo::connect_failed("refused")),
            ReconnectDecision::Retry { attempt: 1, .. }
        ));
        let normal = CloseInfo {
            code: Some(1000),
            reason: String::new(),
        };
        assert_eq!(
            tracker.on_closed(&normal),
            ReconnectDecision::GiveUp(GiveUpReason::Declined)
        );
        assert!(tracker.is_terminal());
    }

    #[test]
    fn test_zero_attempts_never_retries() {
        let mut tracker = ReconnectTracker::new(ReconnectPolicy::new(0, Duration::ZERO));
        assert_eq!(
            tracker.on_closed(&closed()),
            ReconnectDecision::GiveUp(GiveUpReason::Exhausted)
        );
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(ConnectionState::Open.to_string(), "Open");
        assert_eq!(ConnectionState::Uninstantiated.label(), "Uninstantiated");
        assert!(ConnectionState::Open.is_open());
        assert!(!ConnectionState::Closing.is_open());
        assert_eq!(ChannelKind::Audio.to_string(), "audio");
    }
}
