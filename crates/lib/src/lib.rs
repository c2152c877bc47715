//! Turnbot core library — turn dispatcher, command handlers, message store, per-conversation
//! state, telemetry, and the gateway/channels that host them. Used by the CLI.

pub mod channels;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod init;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod turn;
