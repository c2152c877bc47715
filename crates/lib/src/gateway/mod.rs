//! Gateway: HTTP server that hosts the dispatcher, plus channel connectors.

pub mod protocol;
mod server;

pub use server::{build_dispatcher, respond, run_gateway, GatewayState, APOLOGY};
