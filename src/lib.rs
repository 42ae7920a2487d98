#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]
#![deny(unused_must_use)]

pub mod channel;
pub mod conductor;
pub mod deferred;
pub mod error;
pub mod lifecycle;
pub mod manager;
mod pool;
pub mod request;

pub use channel::{ChannelId, ChannelRef};
pub use conductor::Conductor;
pub use error::{CloseAllError, RequestError};
pub use lifecycle::{ChannelEvent, ChannelState};
pub use manager::{
    ChannelEvents, ChannelManager, ChannelManagerOptions, ChannelManagerRef,
    CHANNEL_RECONNECT_ATTEMPTS,
};
pub use request::PendingChannel;
