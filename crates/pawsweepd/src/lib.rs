//! pawsweep daemon library - exposes modules for testing.

pub mod actuator;
pub mod capture;
pub mod config;
pub mod coordinator;
pub mod inference;
pub mod live;
pub mod presence;
pub mod routes;
pub mod sequencer;
pub mod server;
pub mod ws;
