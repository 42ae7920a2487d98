//! The channel lifecycle state machine.
//!
//! Transitions are pure functions over the current state, the reported event,
//! and the deployment policy. Keeping the decision logic free of side effects
//! means the reconnect-versus-abandon policy can be tested exhaustively
//! without a pool or a conductor; the manager applies the returned decision
//! and performs the side effects (reconnect attempts, pool removal).

use serde::{Deserialize, Serialize};

/// Lifecycle state of a pooled channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelState {
    /// A connection attempt is in progress.
    Connecting,
    /// The channel is connected and can carry traffic.
    Ready,
    /// The connection dropped; the reconnect policy decides what happens next.
    Interrupted,
    /// The channel was closed on request. Terminal.
    Closed,
    /// The channel was abandoned after an unrecoverable failure. Terminal.
    ClosedUnexpectedly,
}

impl ChannelState {
    /// Whether this state is terminal.
    ///
    /// Entering a terminal state removes the channel from the pool as a side
    /// effect of the transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Closed | ChannelState::ClosedUnexpectedly)
    }
}

/// A connection outcome reported by the [`Conductor`](crate::Conductor).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A connect or reconnect attempt completed successfully.
    Ready,
    /// The connection dropped unexpectedly.
    Interrupted,
    /// A previously initiated close completed.
    Closed,
}

/// Deployment policy consulted when a channel is interrupted.
#[derive(Clone, Copy, Debug)]
pub struct LifecyclePolicy {
    /// Whether interrupted channels are reconnected automatically while in use.
    pub reopen_on_interrupt: bool,
}

/// Decision taken for a channel sitting in [`ChannelState::Interrupted`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterruptDecision {
    /// Consume one reconnect attempt and ask the conductor to reconnect.
    Reconnect,
    /// Abandon the channel; it enters [`ChannelState::ClosedUnexpectedly`].
    Abandon,
}

/// Returns the state entered when `event` is applied in `state`, or `None`
/// when the event does not cause a transition.
///
/// Terminal states absorb every event. A `Ready` event is only meaningful
/// while a connect attempt is outstanding.
pub fn apply(state: ChannelState, event: ChannelEvent) -> Option<ChannelState> {
    if state.is_terminal() {
        return None;
    }
    match event {
        ChannelEvent::Ready => {
            matches!(state, ChannelState::Connecting | ChannelState::Interrupted)
                .then_some(ChannelState::Ready)
        }
        ChannelEvent::Interrupted => Some(ChannelState::Interrupted),
        ChannelEvent::Closed => Some(ChannelState::Closed),
    }
}

/// Decides whether an interrupted channel is reconnected or abandoned.
///
/// Reconnection happens only while the policy allows it, the channel still
/// has at least one holder, and reconnect attempts remain.
pub fn on_interrupted(
    policy: LifecyclePolicy,
    in_use: bool,
    attempts_left: u32,
) -> InterruptDecision {
    if policy.reopen_on_interrupt && in_use && attempts_left > 0 {
        InterruptDecision::Reconnect
    } else {
        InterruptDecision::Abandon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_only_completes_outstanding_connects() {
        assert_eq!(
            apply(ChannelState::Connecting, ChannelEvent::Ready),
            Some(ChannelState::Ready)
        );
        assert_eq!(
            apply(ChannelState::Interrupted, ChannelEvent::Ready),
            Some(ChannelState::Ready)
        );
        assert_eq!(apply(ChannelState::Ready, ChannelEvent::Ready), None);
    }

    #[test]
    fn terminal_states_absorb_events() {
        for event in [
            ChannelEvent::Ready,
            ChannelEvent::Interrupted,
            ChannelEvent::Closed,
        ] {
            assert_eq!(apply(ChannelState::Closed, event), None);
            assert_eq!(apply(ChannelState::ClosedUnexpectedly, event), None);
        }
    }

    #[test]
    fn close_applies_in_any_live_state() {
        for state in [
            ChannelState::Connecting,
            ChannelState::Ready,
            ChannelState::Interrupted,
        ] {
            assert_eq!(
                apply(state, ChannelEvent::Closed),
                Some(ChannelState::Closed)
            );
        }
    }

    #[test]
    fn reconnect_requires_policy_use_and_budget() {
        let reopen = LifecyclePolicy {
            reopen_on_interrupt: true,
        };
        let keep_closed = LifecyclePolicy {
            reopen_on_interrupt: false,
        };

        assert_eq!(on_interrupted(reopen, true, 3), InterruptDecision::Reconnect);
        assert_eq!(on_interrupted(reopen, true, 0), InterruptDecision::Abandon);
        assert_eq!(on_interrupted(reopen, false, 3), InterruptDecision::Abandon);
        assert_eq!(
            on_interrupted(keep_closed, true, 3),
            InterruptDecision::Abandon
        );
    }
}
