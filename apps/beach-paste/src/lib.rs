pub mod config;
pub mod session;
pub mod signaling;
pub mod telemetry;
pub mod transport;
