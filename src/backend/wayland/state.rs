//! Idle/active state machine fed by `ext-idle-notify-v1` events.
//!
//! The compositor only tells us when the threshold is crossed (`idled`) and
//! when input comes back (`resumed`). Everything in between is derived from
//! the wall clock at query time.

use tracing::debug;
use tracing::trace;

use crate::backend::millis_to_secs;
use crate::config::IdleThreshold;

/// Inbound notification, stamped with the wall clock (Unix epoch ms) at the
/// moment it was dispatched off the connection.
///
/// The protocol carries no timestamp, so `at_ms` is when we read the event,
/// not when the compositor sent it. Events that sat on the socket between
/// queries are stamped late, and the idle time derived from them is short by
/// that delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleEvent {
    /// No input for the subscribed threshold.
    Idled { at_ms: u64 },
    /// Input arrived after an `Idled`.
    Resumed { at_ms: u64 },
}

/// Tracker state. `idle_since_ms` is set iff the last applied event was
/// [`IdleEvent::Idled`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleState {
    /// Last time we know the user was active.
    last_activity_ms: u64,

    /// When the compositor declared the session idle.
    idle_since_ms: Option<u64>,

    /// Threshold the notification was subscribed with.
    threshold: IdleThreshold,
}

impl IdleState {
    /// Create an active state with `now_ms` as the last activity.
    pub fn new(now_ms: u64, threshold: IdleThreshold) -> Self {
        Self {
            last_activity_ms: now_ms,
            idle_since_ms: None,
            threshold,
        }
    }

    /// Apply one event. A later event always overrides an earlier one.
    pub fn apply(&mut self, event: IdleEvent) {
        let was_idle = self.is_idle();

        match event {
            IdleEvent::Idled { at_ms } => {
                self.idle_since_ms = Some(at_ms);
            }
            IdleEvent::Resumed { at_ms } => {
                self.idle_since_ms = None;
                self.last_activity_ms = at_ms;
            }
        }

        if was_idle == self.is_idle() {
            trace!("Idle event {:?}, state unchanged", event);
        } else {
            debug!("Idle state changed: {} -> {}", was_idle, self.is_idle());
        }
    }

    /// Apply events in arrival order.
    pub fn apply_all(&mut self, events: impl IntoIterator<Item = IdleEvent>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Whether the compositor currently reports the session idle.
    pub fn is_idle(&self) -> bool {
        self.idle_since_ms.is_some()
    }

    /// Timestamp of the `idled` event, while idle.
    pub fn idle_since_ms(&self) -> Option<u64> {
        self.idle_since_ms
    }

    /// Last known activity timestamp.
    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    /// Idle duration at `now_ms`.
    ///
    /// While idle, the `idled` event fires once the threshold has already
    /// elapsed, so the threshold is added to the time since the event.
    /// While active, it is the time since the last activity we saw.
    ///
    /// The compositor only reports crossings, so activity between a `resumed`
    /// and the query is invisible here. A session that stays active for longer
    /// than the threshold keeps reporting the time since construction or the
    /// last `resumed`, which can exceed the threshold even though no `idled`
    /// arrived. Only the idle branch is authoritative.
    pub fn idle_seconds(&self, now_ms: u64) -> f64 {
        match self.idle_since_ms {
            Some(since) => millis_to_secs(
                now_ms
                    .saturating_sub(since)
                    .saturating_add(self.threshold.as_millis()),
            ),
            None => millis_to_secs(now_ms.saturating_sub(self.last_activity_ms)),
        }
    }
}
