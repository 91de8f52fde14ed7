use crate::types::{AttemptOutcome, Credentials};

/// Events that drive the provisioning session
///
/// Everything except `BeginProvisioning` is produced by the runtime and
/// carries the id of the session it was armed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // Caller
    BeginProvisioning(Credentials),

    // Executor
    AttemptCompleted {
        session: u64,
        outcome: AttemptOutcome,
    },

    // Timers
    RetryDelayElapsed {
        session: u64,
    },
    DotsTick {
        session: u64,
    },
    CountdownTick {
        session: u64,
    },
}

/// Side effects requested by the update functions, performed by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Publish a fresh snapshot
    Render,
    /// Invoke the executor once for this session
    Attempt {
        session: u64,
        credentials: Credentials,
    },
    /// Arm the fixed inter-retry delay
    ScheduleRetry { session: u64 },
    /// (Re)arm the dot and countdown tickers
    StartTickers { session: u64 },
    StopTickers,
    /// Drop everything armed for the previous session: attempt, retry delay, tickers
    CancelSession,
}
