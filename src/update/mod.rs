mod session;
mod ticker;


use crate::events::{Effect, Event};
use crate::model::Model;

/// Main update dispatcher - routes events to the session or ticker handlers
///
/// Returns the effects the runtime has to perform, in order. An empty list
/// means the event was stale or irrelevant and the model is unchanged.
pub fn update(event: Event, model: &mut Model) -> Vec<Effect> {
    match event {
        Event::BeginProvisioning(credentials) => session::handle_begin(credentials, model),
        Event::AttemptCompleted { session, outcome } => {
            session::handle_attempt_completed(session, outcome, model)
        }
        Event::RetryDelayElapsed { session } => session::handle_retry_delay_elapsed(session, model),
        Event::DotsTick { session } => ticker::handle_dots_tick(session, model),
        Event::CountdownTick { session } => ticker::handle_countdown_tick(session, model),
    }
}
