use crate::events::Effect;
use crate::model::Model;
use crate::types::Phase;

/// Advance the progress dots while the session is active
pub fn handle_dots_tick(session: u64, model: &mut Model) -> Vec<Effect> {
    if !model.is_current(session) || !model.phase.is_active() {
        return Vec::new();
    }

    model.advance_dots();
    vec![Effect::Render]
}

/// Count down while an attempt is running; the executor owns the real deadline
pub fn handle_countdown_tick(session: u64, model: &mut Model) -> Vec<Effect> {
    if !model.is_current(session) || model.phase != Phase::Connecting {
        return Vec::new();
    }

    if model.tick_countdown() {
        vec![Effect::Render]
    } else {
        Vec::new()
    }
}
