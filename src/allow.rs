//! Temporary allow: a timed override that suspends every blocking rule.
//!
//! The override is explicit state. A request moves it to
//! [`OverrideState::Overridden`] with a fresh [`RestoreToken`]; a request
//! while already overridden supersedes the pending token so only the last
//! one can fire. Restoration is driven by the caller's clock through
//! [`TempAllow::due`].

use std::time::{Duration, Instant};

/// Identifies one scheduled restoration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RestoreToken(u64);

/// Whether blocking rules are in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverrideState {
    #[default]
    Active,
    Overridden {
        expires_at: Instant,
        token: RestoreToken,
    },
    /// Rules are off and no restoration is pending.
    Suspended,
}

/// Outcome of an override request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    pub token: RestoreToken,
    pub expires_at: Instant,
    /// The pending restoration this request cancelled, if any.
    pub superseded: Option<RestoreToken>,
}

impl OverrideState {
    /// Apply an override request at `now`.
    pub fn request(self, now: Instant, window: Duration, token: RestoreToken) -> (Self, Scheduled) {
        let superseded = match self {
            OverrideState::Overridden { token, .. } => Some(token),
            _ => None,
        };
        let expires_at = now + window;
        (
            OverrideState::Overridden { expires_at, token },
            Scheduled {
                token,
                expires_at,
                superseded,
            },
        )
    }

    /// Drop the pending restoration if `token` is the pending one.
    pub fn cancel(self, token: RestoreToken) -> (Self, bool) {
        match self {
            OverrideState::Overridden { token: pending, .. } if pending == token => {
                (OverrideState::Suspended, true)
            }
            other => (other, false),
        }
    }

    /// Restore if `token` is the pending one; stale tokens are ignored.
    pub fn restore(self, token: RestoreToken) -> (Self, bool) {
        match self {
            OverrideState::Overridden { token: pending, .. } if pending == token => {
                (OverrideState::Active, true)
            }
            other => (other, false),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, OverrideState::Active)
    }
}

/// Owns the override state and hands out tokens.
#[derive(Debug)]
pub struct TempAllow {
    state: OverrideState,
    window: Duration,
    next_token: u64,
}

impl TempAllow {
    pub fn new(window: Duration) -> Self {
        Self {
            state: OverrideState::Active,
            window,
            next_token: 0,
        }
    }

    pub fn state(&self) -> OverrideState {
        self.state
    }

    /// True while blocking rules are in force.
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Start or extend the override.
    pub fn request(&mut self, now: Instant) -> Scheduled {
        self.next_token += 1;
        let (state, scheduled) = self
            .state
            .request(now, self.window, RestoreToken(self.next_token));
        if let Some(old) = scheduled.superseded {
            log::debug!("Override {:?} superseded by {:?}", old, scheduled.token);
        }
        self.state = state;
        scheduled
    }

    /// Cancel a pending restoration without restoring.
    ///
    /// Rules stay suspended until a new request schedules another one.
    pub fn cancel(&mut self, token: RestoreToken) -> bool {
        let (state, cancelled) = self.state.cancel(token);
        self.state = state;
        cancelled
    }

    /// The restoration that should fire at `now`, if any.
    pub fn due(&self, now: Instant) -> Option<RestoreToken> {
        match self.state {
            OverrideState::Overridden { expires_at, token } if now >= expires_at => Some(token),
            _ => None,
        }
    }

    /// Fire the restoration for `token`. Returns whether it took effect.
    pub fn restore(&mut self, token: RestoreToken) -> bool {
        let (state, restored) = self.state.restore(token);
        self.state = state;
        restored
    }

    /// When the pending restoration is due.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            OverrideState::Overridden { expires_at, .. } => Some(expires_at),
            _ => None,
        }
    }
}
