use crate::config::SessionPolicy;
use crate::types::{Credentials, Phase, Snapshot};

/// Highest dot animation frame before wrapping back to zero
pub const MAX_DOTS_PHASE: u8 = 3;

/// Provisioning session record - the complete orchestrator state
///
/// Only the transition methods below mutate it, and only the update
/// functions call them. The presentation layer sees [`Snapshot`]s.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Model {
    policy: SessionPolicy,

    /// Generation id, bumped on every new session (0 = none started yet)
    pub session: u64,
    pub phase: Phase,
    pub retry_count: u32,
    pub countdown_seconds: u32,
    pub dots_phase: u8,

    /// Credentials of the running session, reused for every retry
    pub credentials: Option<Credentials>,

    /// Set while an executor invocation for this session is pending
    pub attempt_in_flight: bool,
}

impl Model {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Whether an event armed for `session` still belongs to the running session
    pub fn is_current(&self, session: u64) -> bool {
        self.session != 0 && self.session == session
    }

    pub fn retries_left(&self) -> bool {
        self.retry_count < self.policy.max_retries
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            session: self.session,
            phase: self.phase,
            retry_count: self.retry_count,
            countdown_seconds: self.countdown_seconds,
            dots_phase: self.dots_phase,
        }
    }

    /// Discard the previous session and open a fresh one
    ///
    /// Returns the new session id. Phase stays untouched until
    /// [`Model::enter_connecting`] runs.
    pub fn start_session(&mut self, credentials: Credentials) -> u64 {
        self.session += 1;
        self.retry_count = 0;
        self.countdown_seconds = self.policy.countdown_start_seconds;
        self.dots_phase = 0;
        self.credentials = Some(credentials);
        self.attempt_in_flight = false;
        self.session
    }

    pub fn enter_connecting(&mut self) {
        self.phase = Phase::Connecting;
        self.countdown_seconds = self.policy.countdown_start_seconds;
        self.attempt_in_flight = true;
    }

    pub fn enter_retrying(&mut self) {
        self.phase = Phase::Retrying;
        self.retry_count += 1;
        self.attempt_in_flight = false;
    }

    pub fn succeed(&mut self) {
        self.phase = Phase::Succeeded;
        self.attempt_in_flight = false;
    }

    pub fn fail(&mut self) {
        self.phase = Phase::Failed;
        self.attempt_in_flight = false;
    }

    pub fn advance_dots(&mut self) {
        self.dots_phase = if self.dots_phase >= MAX_DOTS_PHASE {
            0
        } else {
            self.dots_phase + 1
        };
    }

    /// Decrement the countdown, returns false once it already sits at zero
    pub fn tick_countdown(&mut self) -> bool {
        if self.countdown_seconds == 0 {
            return false;
        }
        self.countdown_seconds -= 1;
        true
    }
}
