pub mod config;
pub mod events;
pub mod executor;
pub mod http_client;
pub mod model;
pub mod provisioner;
pub mod types;
pub mod update;

pub use crate::{
    config::ProvisionerConfig,
    events::{Effect, Event},
    executor::{AttemptExecutor, HttpAttemptExecutor, execute_with_timeout},
    model::Model,
    provisioner::Provisioner,
    types::*,
    update::update,
};
