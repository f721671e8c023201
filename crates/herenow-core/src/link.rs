//! Link State Machine
//!
//! Explicit connection lifecycle management for the single realtime channel.
//! A `LinkState` is consumed by `transition`, which returns the next state
//! plus an ordered list of effects (open/close the transport, start/stop the
//! heartbeat, schedule/cancel the reconnect timer). Effects are executed by
//! an outer driver, which keeps this table independently testable without a
//! network or timers.

use core::time::Duration;

use crate::retry::RetryPolicy;
use crate::types::Credential;

// ----------------------------------------------------------------------------
// Link State Types
// ----------------------------------------------------------------------------

/// Lifecycle state of the realtime channel
#[derive(Debug, Clone)]
pub enum LinkState {
    /// No credential, no channel
    Idle,
    /// Open attempt in flight
    Connecting(ConnectingLink),
    /// Channel live, heartbeat active
    Open(OpenLink),
    /// Delayed retry scheduled after an unexpected close
    Reconnecting(ReconnectingLink),
    /// Retry ceiling exhausted; terminal until the credential changes or a
    /// manual reconnect is requested
    Failed(FailedLink),
}

/// State while an open attempt is in flight
#[derive(Debug, Clone)]
pub struct ConnectingLink {
    pub credential: Credential,
    /// 0-based index of this attempt within the current failure sequence
    pub attempt: u32,
}

/// State while the channel is live
#[derive(Debug, Clone)]
pub struct OpenLink {
    pub credential: Credential,
}

/// State while a reconnect timer is pending
#[derive(Debug, Clone)]
pub struct ReconnectingLink {
    pub credential: Credential,
    /// Attempt index of the upcoming retry
    pub attempt: u32,
    /// Delay before the retry fires
    pub delay: Duration,
}

/// Terminal state after the retry ceiling is exhausted
#[derive(Debug, Clone)]
pub struct FailedLink {
    pub credential: Credential,
}

// ----------------------------------------------------------------------------
// Events and Effects
// ----------------------------------------------------------------------------

/// Events that drive link state transitions
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The external credential signal changed
    CredentialChanged(Option<Credential>),
    /// Explicit (re)connect request, e.g. from a reconnect user action
    ConnectRequested(Credential),
    /// The transport reported a successful open
    ChannelOpened,
    /// The transport closed, for any reason (failed open included)
    ChannelClosed { reason: String },
    /// The pending reconnect timer fired
    RetryTimerFired,
    /// Explicit close request
    CloseRequested,
}

/// Side effects requested by a transition, executed in order by the driver.
///
/// Cancel/stop effects always precede replacing effects so a stale timer can
/// never outlive the state that owned it.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a new channel with the given credential
    OpenChannel { credential: Credential },
    /// Close the live channel handle and abort any in-flight open
    CloseChannel,
    /// Start the heartbeat timer (implicitly stopping any prior one)
    StartHeartbeat,
    /// Stop the heartbeat timer
    StopHeartbeat,
    /// Arm the reconnect timer
    ScheduleReconnect { delay: Duration },
    /// Disarm the pending reconnect timer
    CancelReconnect,
    /// Signal the application layer that the link is permanently lost
    NotifyLost,
}

/// Result of a state transition
#[derive(Debug)]
pub struct Transition {
    pub new_state: LinkState,
    pub effects: Vec<Effect>,
}

// ----------------------------------------------------------------------------
// Observable Status
// ----------------------------------------------------------------------------

/// Summary of the link state published to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Failed,
}

impl LinkStatus {
    /// Whether the channel is currently open
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkStatus::Open)
    }
}

// ----------------------------------------------------------------------------
// State Machine Implementation
// ----------------------------------------------------------------------------

impl LinkState {
    /// Initial state
    pub fn new() -> Self {
        LinkState::Idle
    }

    /// Current state name for logging
    pub fn state_name(&self) -> &'static str {
        match self {
            LinkState::Idle => "Idle",
            LinkState::Connecting(_) => "Connecting",
            LinkState::Open(_) => "Open",
            LinkState::Reconnecting(_) => "Reconnecting",
            LinkState::Failed(_) => "Failed",
        }
    }

    /// Observable status summary
    pub fn status(&self) -> LinkStatus {
        match self {
            LinkState::Idle => LinkStatus::Idle,
            LinkState::Connecting(_) => LinkStatus::Connecting,
            LinkState::Open(_) => LinkStatus::Open,
            LinkState::Reconnecting(_) => LinkStatus::Reconnecting,
            LinkState::Failed(_) => LinkStatus::Failed,
        }
    }

    /// Whether messages may be sent in this state
    pub fn can_send(&self) -> bool {
        matches!(self, LinkState::Open(_))
    }

    /// Credential held by the current state, if any
    pub fn credential(&self) -> Option<&Credential> {
        match self {
            LinkState::Idle => None,
            LinkState::Connecting(s) => Some(&s.credential),
            LinkState::Open(s) => Some(&s.credential),
            LinkState::Reconnecting(s) => Some(&s.credential),
            LinkState::Failed(s) => Some(&s.credential),
        }
    }

    /// Process an event and transition to the next state (consumes self).
    ///
    /// The function is total: (state, event) pairs with no defined behavior
    /// leave the state unchanged and request no effects. The retry policy is
    /// consulted only when a channel closes unexpectedly.
    pub fn transition(self, event: LinkEvent, policy: &RetryPolicy) -> Transition {
        match (self, event) {
            // Credential loss and explicit close preempt everything.
            (LinkState::Idle, LinkEvent::CredentialChanged(None))
            | (LinkState::Idle, LinkEvent::CloseRequested) => stay(LinkState::Idle),
            (_, LinkEvent::CredentialChanged(None)) | (_, LinkEvent::CloseRequested) => {
                Transition {
                    new_state: LinkState::Idle,
                    effects: teardown_effects(),
                }
            }

            // From Idle
            (LinkState::Idle, LinkEvent::CredentialChanged(Some(credential)))
            | (LinkState::Idle, LinkEvent::ConnectRequested(credential)) => {
                begin_connect(credential, 0, Vec::new())
            }

            // From Connecting
            (LinkState::Connecting(s), LinkEvent::ChannelOpened) => Transition {
                new_state: LinkState::Open(OpenLink {
                    credential: s.credential,
                }),
                effects: vec![Effect::StartHeartbeat],
            },
            (LinkState::Connecting(s), LinkEvent::ChannelClosed { .. }) => {
                close_and_maybe_retry(s.credential, s.attempt, policy, Vec::new())
            }
            // A live open attempt suppresses concurrent connects.
            (LinkState::Connecting(s), LinkEvent::ConnectRequested(_)) => {
                stay(LinkState::Connecting(s))
            }
            (LinkState::Connecting(s), LinkEvent::CredentialChanged(Some(credential))) => {
                replace_credential(LinkState::Connecting(s), credential)
            }

            // From Open
            (LinkState::Open(s), LinkEvent::ChannelClosed { .. }) => {
                // The successful open reset the attempt counter; backoff
                // starts over at delay(0).
                close_and_maybe_retry(s.credential, 0, policy, vec![Effect::StopHeartbeat])
            }
            (LinkState::Open(s), LinkEvent::ConnectRequested(_)) => stay(LinkState::Open(s)),
            (LinkState::Open(s), LinkEvent::CredentialChanged(Some(credential))) => {
                replace_credential(LinkState::Open(s), credential)
            }

            // From Reconnecting
            (LinkState::Reconnecting(s), LinkEvent::RetryTimerFired) => {
                begin_connect(s.credential, s.attempt, Vec::new())
            }
            (LinkState::Reconnecting(_), LinkEvent::ConnectRequested(credential)) => {
                // Manual connect cancels the pending timer and resets the
                // attempt counter.
                begin_connect(credential, 0, vec![Effect::CancelReconnect])
            }
            (LinkState::Reconnecting(s), LinkEvent::CredentialChanged(Some(credential))) => {
                replace_credential(LinkState::Reconnecting(s), credential)
            }

            // From Failed
            (LinkState::Failed(_), LinkEvent::ConnectRequested(credential)) => {
                begin_connect(credential, 0, Vec::new())
            }
            (LinkState::Failed(s), LinkEvent::CredentialChanged(Some(credential))) => {
                if credential == s.credential {
                    // Same credential re-observed; Failed never retries on
                    // its own.
                    stay(LinkState::Failed(s))
                } else {
                    begin_connect(credential, 0, Vec::new())
                }
            }

            // Everything else is a stale or meaningless event.
            (state, _) => stay(state),
        }
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Transition Helpers
// ----------------------------------------------------------------------------

fn stay(state: LinkState) -> Transition {
    Transition {
        new_state: state,
        effects: Vec::new(),
    }
}

/// Full teardown: stop timers before discarding the handle.
fn teardown_effects() -> Vec<Effect> {
    vec![
        Effect::StopHeartbeat,
        Effect::CancelReconnect,
        Effect::CloseChannel,
    ]
}

fn begin_connect(credential: Credential, attempt: u32, mut effects: Vec<Effect>) -> Transition {
    effects.push(Effect::OpenChannel {
        credential: credential.clone(),
    });
    Transition {
        new_state: LinkState::Connecting(ConnectingLink {
            credential,
            attempt,
        }),
        effects,
    }
}

/// Shared close handling: consult the policy and either schedule the next
/// attempt or declare the link lost.
fn close_and_maybe_retry(
    credential: Credential,
    failed_attempt: u32,
    policy: &RetryPolicy,
    mut effects: Vec<Effect>,
) -> Transition {
    let next_attempt = failed_attempt + 1;
    if policy.should_retry(next_attempt) {
        let delay = policy.delay(failed_attempt);
        effects.push(Effect::ScheduleReconnect { delay });
        Transition {
            new_state: LinkState::Reconnecting(ReconnectingLink {
                credential,
                attempt: next_attempt,
                delay,
            }),
            effects,
        }
    } else {
        effects.push(Effect::NotifyLost);
        Transition {
            new_state: LinkState::Failed(FailedLink { credential }),
            effects,
        }
    }
}

/// Credential changed while the link is active: unchanged values are a
/// no-op, a new value tears everything down and reconnects with it.
fn replace_credential(state: LinkState, credential: Credential) -> Transition {
    if state.credential() == Some(&credential) {
        return stay(state);
    }
    begin_connect(credential, 0, teardown_effects())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> Credential {
        Credential::new("token-1")
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    fn open_link(state: LinkState) -> LinkState {
        let state = state
            .transition(LinkEvent::ConnectRequested(credential()), &policy())
            .new_state;
        state.transition(LinkEvent::ChannelOpened, &policy()).new_state
    }

    fn closed(reason: &str) -> LinkEvent {
        LinkEvent::ChannelClosed {
            reason: reason.into(),
        }
    }

    #[test]
    fn test_initial_state() {
        let state = LinkState::new();
        assert_eq!(state.state_name(), "Idle");
        assert_eq!(state.status(), LinkStatus::Idle);
        assert!(!state.can_send());
        assert!(state.credential().is_none());
    }

    #[test]
    fn test_credential_starts_connect() {
        let transition = LinkState::new().transition(
            LinkEvent::CredentialChanged(Some(credential())),
            &policy(),
        );
        assert_eq!(transition.new_state.state_name(), "Connecting");
        assert_eq!(
            transition.effects,
            vec![Effect::OpenChannel {
                credential: credential()
            }]
        );
    }

    #[test]
    fn test_open_starts_heartbeat_and_allows_send() {
        let state = LinkState::new()
            .transition(LinkEvent::ConnectRequested(credential()), &policy())
            .new_state;
        let transition = state.transition(LinkEvent::ChannelOpened, &policy());
        assert_eq!(transition.new_state.state_name(), "Open");
        assert_eq!(transition.effects, vec![Effect::StartHeartbeat]);
        assert!(transition.new_state.can_send());
        assert!(transition.new_state.status().is_connected());
    }

    #[test]
    fn test_concurrent_connect_is_suppressed() {
        // While Connecting
        let state = LinkState::new()
            .transition(LinkEvent::ConnectRequested(credential()), &policy())
            .new_state;
        let transition =
            state.transition(LinkEvent::ConnectRequested(credential()), &policy());
        assert_eq!(transition.new_state.state_name(), "Connecting");
        assert!(transition.effects.is_empty());

        // While Open
        let state = open_link(LinkState::new());
        let transition =
            state.transition(LinkEvent::ConnectRequested(credential()), &policy());
        assert_eq!(transition.new_state.state_name(), "Open");
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn test_close_from_open_stops_heartbeat_then_schedules_first_delay() {
        let state = open_link(LinkState::new());
        let transition = state.transition(closed("peer closed"), &policy());

        assert_eq!(transition.new_state.state_name(), "Reconnecting");
        assert_eq!(
            transition.effects,
            vec![
                Effect::StopHeartbeat,
                Effect::ScheduleReconnect {
                    delay: Duration::from_millis(1000)
                }
            ]
        );
        match transition.new_state {
            LinkState::Reconnecting(s) => {
                assert_eq!(s.attempt, 1);
                assert_eq!(s.delay, Duration::from_millis(1000));
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_retry_ceiling_walk() {
        // Five consecutive failed opens exhaust the ceiling; no sixth
        // attempt is scheduled.
        let policy = policy();
        let mut state = LinkState::new()
            .transition(LinkEvent::ConnectRequested(credential()), &policy)
            .new_state;
        let mut delays = Vec::new();
        let mut opens = 1u32;

        loop {
            let transition = state.transition(closed("refused"), &policy);
            state = transition.new_state;
            match &state {
                LinkState::Reconnecting(s) => {
                    delays.push(s.delay);
                    let fired = state.transition(LinkEvent::RetryTimerFired, &policy);
                    assert!(fired
                        .effects
                        .iter()
                        .any(|e| matches!(e, Effect::OpenChannel { .. })));
                    opens += 1;
                    state = fired.new_state;
                }
                LinkState::Failed(_) => break,
                other => panic!("unexpected state {:?}", other),
            }
        }

        assert_eq!(opens, 5);
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(8000),
            ]
        );

        // Terminal: further timer or close events change nothing.
        let transition = state.transition(LinkEvent::RetryTimerFired, &policy);
        assert_eq!(transition.new_state.state_name(), "Failed");
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn test_ceiling_exhaustion_notifies_application() {
        let policy = RetryPolicy::new(1, Duration::from_millis(1000));
        let state = LinkState::new()
            .transition(LinkEvent::ConnectRequested(credential()), &policy)
            .new_state;
        let transition = state.transition(closed("refused"), &policy);
        assert_eq!(transition.new_state.state_name(), "Failed");
        assert_eq!(transition.effects, vec![Effect::NotifyLost]);
    }

    #[test]
    fn test_successful_open_resets_attempt_counter() {
        let policy = policy();
        // Fail twice, then succeed.
        let mut state = LinkState::new()
            .transition(LinkEvent::ConnectRequested(credential()), &policy)
            .new_state;
        for _ in 0..2 {
            state = state.transition(closed("refused"), &policy).new_state;
            state = state.transition(LinkEvent::RetryTimerFired, &policy).new_state;
        }
        state = state.transition(LinkEvent::ChannelOpened, &policy).new_state;
        assert_eq!(state.state_name(), "Open");

        // The next close starts backoff over at delay(0).
        let transition = state.transition(closed("peer closed"), &policy);
        match transition.new_state {
            LinkState::Reconnecting(s) => {
                assert_eq!(s.attempt, 1);
                assert_eq!(s.delay, Duration::from_millis(1000));
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_credential_loss_preempts_pending_retry() {
        let policy = policy();
        let state = open_link(LinkState::new());
        let state = state.transition(closed("peer closed"), &policy).new_state;
        assert_eq!(state.state_name(), "Reconnecting");

        let transition = state.transition(LinkEvent::CredentialChanged(None), &policy);
        assert_eq!(transition.new_state.state_name(), "Idle");
        assert_eq!(transition.effects, teardown_effects());

        // The stale timer firing afterwards is a no-op.
        let transition = transition
            .new_state
            .transition(LinkEvent::RetryTimerFired, &policy);
        assert_eq!(transition.new_state.state_name(), "Idle");
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn test_credential_loss_tears_down_open_channel() {
        let state = open_link(LinkState::new());
        let transition = state.transition(LinkEvent::CredentialChanged(None), &policy());
        assert_eq!(transition.new_state.state_name(), "Idle");
        // Heartbeat stops before the handle is discarded.
        assert_eq!(
            transition.effects,
            vec![
                Effect::StopHeartbeat,
                Effect::CancelReconnect,
                Effect::CloseChannel
            ]
        );
    }

    #[test]
    fn test_manual_connect_from_reconnecting_cancels_timer() {
        let policy = policy();
        let state = open_link(LinkState::new());
        let state = state.transition(closed("peer closed"), &policy).new_state;

        let transition =
            state.transition(LinkEvent::ConnectRequested(credential()), &policy);
        assert_eq!(transition.new_state.state_name(), "Connecting");
        assert_eq!(
            transition.effects,
            vec![
                Effect::CancelReconnect,
                Effect::OpenChannel {
                    credential: credential()
                }
            ]
        );
        match transition.new_state {
            LinkState::Connecting(s) => assert_eq!(s.attempt, 0),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_manual_reconnect_from_failed_resets_counter() {
        let policy = RetryPolicy::new(1, Duration::from_millis(1000));
        let state = LinkState::new()
            .transition(LinkEvent::ConnectRequested(credential()), &policy)
            .new_state;
        let state = state.transition(closed("refused"), &policy).new_state;
        assert_eq!(state.state_name(), "Failed");

        let transition =
            state.transition(LinkEvent::ConnectRequested(credential()), &policy);
        assert_eq!(transition.new_state.state_name(), "Connecting");
        match transition.new_state {
            LinkState::Connecting(s) => assert_eq!(s.attempt, 0),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_new_credential_replaces_open_channel() {
        let state = open_link(LinkState::new());
        let replacement = Credential::new("token-2");
        let transition = state.transition(
            LinkEvent::CredentialChanged(Some(replacement.clone())),
            &policy(),
        );

        assert_eq!(transition.new_state.state_name(), "Connecting");
        assert_eq!(
            transition.effects,
            vec![
                Effect::StopHeartbeat,
                Effect::CancelReconnect,
                Effect::CloseChannel,
                Effect::OpenChannel {
                    credential: replacement
                }
            ]
        );
    }

    #[test]
    fn test_unchanged_credential_is_a_no_op() {
        let state = open_link(LinkState::new());
        let transition = state.transition(
            LinkEvent::CredentialChanged(Some(credential())),
            &policy(),
        );
        assert_eq!(transition.new_state.state_name(), "Open");
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn test_failed_ignores_same_credential_but_accepts_new_one() {
        let policy = RetryPolicy::new(1, Duration::from_millis(1000));
        let state = LinkState::new()
            .transition(LinkEvent::ConnectRequested(credential()), &policy)
            .new_state;
        let state = state.transition(closed("refused"), &policy).new_state;

        let transition = state.transition(
            LinkEvent::CredentialChanged(Some(credential())),
            &policy,
        );
        assert_eq!(transition.new_state.state_name(), "Failed");
        assert!(transition.effects.is_empty());

        let transition = transition.new_state.transition(
            LinkEvent::CredentialChanged(Some(Credential::new("token-2"))),
            &policy,
        );
        assert_eq!(transition.new_state.state_name(), "Connecting");
    }

    #[test]
    fn test_close_requested_behaves_like_credential_loss() {
        let state = open_link(LinkState::new());
        let transition = state.transition(LinkEvent::CloseRequested, &policy());
        assert_eq!(transition.new_state.state_name(), "Idle");
        assert_eq!(transition.effects, teardown_effects());
    }

    #[test]
    fn test_stale_transport_events_are_ignored() {
        let transition = LinkState::new().transition(closed("late close"), &policy());
        assert_eq!(transition.new_state.state_name(), "Idle");
        assert!(transition.effects.is_empty());

        let transition = LinkState::new().transition(LinkEvent::ChannelOpened, &policy());
        assert_eq!(transition.new_state.state_name(), "Idle");
        assert!(transition.effects.is_empty());
    }
}
