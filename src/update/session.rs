use log::{debug, info, warn};

use crate::events::Effect;
use crate::model::Model;
use crate::types::{AttemptOutcome, Credentials, Phase, ReentryPolicy};

/// Handle a provisioning trigger from the caller
pub fn handle_begin(credentials: Credentials, model: &mut Model) -> Vec<Effect> {
    let mut effects = Vec::new();

    if model.phase.is_active() {
        match model.policy().reentry {
            ReentryPolicy::Ignore => {
                debug!(
                    "ignoring provisioning trigger, session {} still {:?}",
                    model.session, model.phase
                );
                return effects;
            }
            ReentryPolicy::Restart => {
                info!(
                    "restarting provisioning, superseding session {}",
                    model.session
                );
                effects.push(Effect::CancelSession);
            }
        }
    }

    let session = model.start_session(credentials);
    debug!("session {session} started");

    effects.extend(enter_connecting(session, model));
    effects
}

/// Handle the outcome of an executor invocation
pub fn handle_attempt_completed(
    session: u64,
    outcome: AttemptOutcome,
    model: &mut Model,
) -> Vec<Effect> {
    if !model.is_current(session)
        || model.phase != Phase::Connecting
        || !model.attempt_in_flight
    {
        debug!("dropping stale outcome {outcome:?} of session {session}");
        return Vec::new();
    }

    match outcome {
        AttemptOutcome::Success => {
            info!("device accepted the credentials (session {session})");
            model.succeed();
            vec![Effect::StopTickers, Effect::Render]
        }
        AttemptOutcome::ApplicationFailure => {
            warn!("device rejected the credentials (session {session})");
            model.fail();
            vec![Effect::StopTickers, Effect::Render]
        }
        AttemptOutcome::TransportError if model.retries_left() => {
            model.enter_retrying();
            info!(
                "retrying connection, retry count: {} (session {session})",
                model.retry_count
            );
            vec![Effect::ScheduleRetry { session }, Effect::Render]
        }
        AttemptOutcome::TransportError => {
            warn!(
                "giving up after {} retries (session {session})",
                model.retry_count
            );
            model.fail();
            vec![Effect::StopTickers, Effect::Render]
        }
    }
}

/// Handle expiry of the inter-retry delay
pub fn handle_retry_delay_elapsed(session: u64, model: &mut Model) -> Vec<Effect> {
    if !model.is_current(session) || model.phase != Phase::Retrying {
        debug!("dropping stale retry delay of session {session}");
        return Vec::new();
    }

    enter_connecting(session, model)
}

/// Entry action of `Connecting` - the only place an attempt is requested
fn enter_connecting(session: u64, model: &mut Model) -> Vec<Effect> {
    if model.attempt_in_flight {
        debug!("session {session} already has an attempt in flight");
        return Vec::new();
    }

    let Some(credentials) = model.credentials.clone() else {
        warn!("session {session} has no credentials, failing");
        model.fail();
        return vec![Effect::StopTickers, Effect::Render];
    };

    model.enter_connecting();
    info!(
        "attempting connection, retry count: {} (session {session})",
        model.retry_count
    );

    vec![
        Effect::StartTickers { session },
        Effect::Attempt {
            session,
            credentials,
        },
        Effect::Render,
    ]
}
