//! Channel identity and the caller-facing channel handle.
//!
//! A [`ChannelRef`] is a cheap, cloneable handle over a pooled channel. The
//! channel's lifecycle state lives inside the maintenance loop and is never
//! touched from here; the handle only carries the pieces callers legitimately
//! read or update concurrently: the identity, the remote address, the usage
//! counter, and the last-used timestamp consulted by the eviction policy.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

static CHANNEL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A process-unique identifier for a channel.
///
/// Ids are allocated from a global sequence and never reused, so an id
/// remains a valid way to refer to a channel in events and logs even after
/// the channel has left the pool.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(u64);

impl ChannelId {
    pub(crate) fn next() -> Self {
        ChannelId(CHANNEL_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct ChannelShared {
    id: ChannelId,
    remote_addr: SocketAddr,
    usage: AtomicUsize,
    last_used: AtomicU64,
}

/// A cloneable handle to a logical point-to-point connection.
///
/// Handles are handed out when a channel request is fulfilled and passed back
/// through [`ChannelManagerRef::return_channel`] once the caller is done.
/// Cloning a handle does not count as an additional holder; usage is tracked
/// per fulfilled request.
///
/// [`ChannelManagerRef::return_channel`]: crate::manager::ChannelManagerRef::return_channel
#[derive(Clone)]
pub struct ChannelRef {
    shared: Arc<ChannelShared>,
}

impl ChannelRef {
    /// Creates a handle for a new channel to `remote_addr`.
    ///
    /// Called by [`Conductor`] implementations from
    /// [`new_channel`](crate::conductor::Conductor::new_channel). The handle
    /// starts with a usage count of zero.
    ///
    /// [`Conductor`]: crate::conductor::Conductor
    pub fn new(remote_addr: SocketAddr) -> Self {
        ChannelRef {
            shared: Arc::new(ChannelShared {
                id: ChannelId::next(),
                remote_addr,
                usage: AtomicUsize::new(0),
                last_used: AtomicU64::new(now_millis()),
            }),
        }
    }

    /// The channel's id.
    pub fn id(&self) -> ChannelId {
        self.shared.id
    }

    /// The remote address this channel connects to.
    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote_addr
    }

    /// Number of concurrent holders of this channel.
    pub fn usage(&self) -> usize {
        self.shared.usage.load(Ordering::Acquire)
    }

    /// Whether any caller currently holds this channel.
    ///
    /// In-use channels are never selected for eviction and are eligible for
    /// automatic reconnection when interrupted.
    pub fn is_in_use(&self) -> bool {
        self.usage() > 0
    }

    pub(crate) fn count_usage_begin(&self) {
        self.shared.usage.fetch_add(1, Ordering::AcqRel);
        self.touch();
    }

    pub(crate) fn count_usage_end(&self) {
        // Saturate rather than underflow if a caller returns a channel twice.
        let _ = self
            .shared
            .usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |usage| {
                usage.checked_sub(1)
            });
        self.touch();
    }

    pub(crate) fn last_used_millis(&self) -> u64 {
        self.shared.last_used.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn set_last_used_millis_for_tests(&self, millis: u64) {
        self.shared.last_used.store(millis, Ordering::Release);
    }

    fn touch(&self) {
        self.shared.last_used.store(now_millis(), Ordering::Release);
    }
}

impl PartialEq for ChannelRef {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id == other.shared.id
    }
}

impl Eq for ChannelRef {}

impl fmt::Debug for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRef")
            .field("id", &self.shared.id)
            .field("remote_addr", &self.shared.remote_addr)
            .field("usage", &self.usage())
            .finish()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
