//! Error types for channel requests and bulk close operations.

use std::{error, fmt};

/// Error that can occur when requesting a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestError {
    /// No request ticket or pool slot was available.
    ///
    /// Covers both request-ticket exhaustion on the synchronous path and a
    /// pool insertion rejected because every pooled channel was in use.
    CapacityExhausted,
    /// The channel closed unexpectedly before the request could complete.
    ChannelClosed,
    /// The channel manager was dropped before the request could complete.
    ManagerStopped,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::CapacityExhausted => {
                write!(f, "could not schedule opening a channel; capacities are exhausted")
            }
            RequestError::ChannelClosed => write!(f, "channel closed unexpectedly"),
            RequestError::ManagerStopped => write!(f, "channel manager stopped"),
        }
    }
}

impl error::Error for RequestError {}

/// Error resolved by [`close_all_channels`] when at least one pooled channel
/// failed to close cleanly.
///
/// The bulk close surfaces a single aggregate failure; which channel failed
/// is not distinguishable from this error alone.
///
/// [`close_all_channels`]: crate::manager::ChannelManagerRef::close_all_channels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloseAllError;

impl fmt::Display for CloseAllError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "one or more channels did not close cleanly")
    }
}

impl error::Error for CloseAllError {}
