//! Communication channels (e.g. Telegram).
//!
//! Channel trait and registry so the gateway can start/stop channel connectors and deliver
//! replies. Connectors turn their native updates into [`crate::turn::Turn`]s and send them to
//! the gateway's inbound queue.

mod registry;
mod telegram;

pub use registry::{ChannelError, ChannelHandle, ChannelRegistry};
pub use telegram::{TelegramChannel, TelegramUpdate};
