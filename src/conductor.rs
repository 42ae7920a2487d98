//! The collaborator that performs the actual connection work.

use std::net::SocketAddr;

use bytes::Bytes;

use crate::channel::ChannelRef;

/// Performs connect, close, and frame I/O on behalf of the channel manager.
///
/// The manager calls these methods exclusively from its maintenance loop, so
/// implementations never see concurrent calls. Asynchronous outcomes
/// (connection established, connection dropped, close completed) are
/// reported back through a [`ChannelEvents`] handle, which routes them into
/// the same loop.
///
/// [`ChannelEvents`]: crate::manager::ChannelEvents
pub trait Conductor: Send + 'static {
    /// Constructs a handle for a new channel to `remote_addr` and begins
    /// connecting it.
    ///
    /// `reconnect_budget` is the number of automatic reconnection attempts
    /// the manager will grant this channel before abandoning it.
    fn new_channel(&mut self, remote_addr: SocketAddr, reconnect_budget: u32) -> ChannelRef;

    /// Attempts to (re)connect `channel`.
    ///
    /// Returns whether the attempt was accepted for processing. Acceptance
    /// is not success; the eventual outcome arrives as a
    /// [`ChannelEvent`](crate::lifecycle::ChannelEvent).
    fn connect_channel(&mut self, channel: &ChannelRef) -> bool;

    /// Initiates closing `channel`.
    ///
    /// Returns whether a close was actually started; `false` means the
    /// channel can be treated as already closed and nothing needs waiting
    /// for.
    fn close_channel(&mut self, channel: &ChannelRef) -> bool;

    /// Attempts to schedule sending an opaque control frame on `channel`.
    ///
    /// Used for keep-alive probing. Returns whether the send was scheduled.
    fn schedule_control_frame(&mut self, channel: &ChannelRef, frame: &Bytes) -> bool;
}
