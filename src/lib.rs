pub mod config;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod loader;
pub mod logging;
pub mod orchestrator;
pub mod project;
pub mod registry;
pub mod sandbox;
pub mod server;
pub mod session;
pub mod storage;
pub mod surface;
pub mod transform;
pub mod ui;
