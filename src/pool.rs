//! Index-slot arena for pooled channels with idle-LRU eviction.
//!
//! Slots are reused through a free list, giving O(1) insertion and removal.
//! Lookups and the eviction scan are linear over a deliberately small pool;
//! if capacities ever grow large this needs an auxiliary idle-ordering index.

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::{
    channel::{ChannelId, ChannelRef},
    error::RequestError,
    lifecycle::ChannelState,
    request::ChannelRequest,
};

/// A pooled channel together with the state only the maintenance loop touches.
#[derive(Debug)]
pub(crate) struct ChannelEntry {
    pub(crate) channel: ChannelRef,
    pub(crate) state: ChannelState,
    pub(crate) last_keep_alive: Instant,
    pub(crate) reconnect_attempts_left: u32,
    ready_listeners: Vec<ChannelRequest>,
    close_listeners: Vec<oneshot::Sender<()>>,
}

impl ChannelEntry {
    pub(crate) fn new(channel: ChannelRef, reconnect_budget: u32, now: Instant) -> Self {
        ChannelEntry {
            channel,
            state: ChannelState::Connecting,
            last_keep_alive: now,
            reconnect_attempts_left: reconnect_budget,
            ready_listeners: Vec::new(),
            close_listeners: Vec::new(),
        }
    }

    /// Registers `request` to be fulfilled once this channel is ready.
    ///
    /// Fulfilled immediately when the channel is already ready; failed
    /// immediately when it is already terminal.
    pub(crate) fn listen_for_ready(&mut self, request: ChannelRequest) {
        match self.state {
            ChannelState::Ready => request.fulfill(&self.channel),
            state if state.is_terminal() => request.fail(RequestError::ChannelClosed),
            _ => self.ready_listeners.push(request),
        }
    }

    /// Registers a close-confirmation listener, completed only when the
    /// channel reaches a clean [`ChannelState::Closed`].
    pub(crate) fn listen_for_close(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.close_listeners.push(tx);
        rx
    }

    pub(crate) fn fulfill_ready_listeners(&mut self) {
        for request in self.ready_listeners.drain(..) {
            request.fulfill(&self.channel);
        }
    }

    pub(crate) fn fail_ready_listeners(&mut self, err: RequestError) {
        for request in self.ready_listeners.drain(..) {
            request.fail(err);
        }
    }

    pub(crate) fn complete_close_listeners(&mut self) {
        for listener in self.close_listeners.drain(..) {
            let _ = listener.send(());
        }
    }
}

/// Outcome of inserting into the pool.
#[derive(Debug)]
pub(crate) enum Insert {
    /// The entry was stored in a free slot.
    Stored,
    /// The entry was stored by evicting the returned idle channel.
    Evicting(ChannelEntry),
    /// The pool is full and no pooled channel is idle; the entry is handed
    /// back to the caller.
    Rejected(ChannelEntry),
}

/// Bounded store of channels keyed by remote address.
///
/// Storage grows lazily up to the configured capacity; beyond that an
/// insertion either evicts the least recently used idle channel or is
/// rejected deterministically.
#[derive(Debug)]
pub(crate) struct ChannelPool {
    slots: Vec<Option<ChannelEntry>>,
    free: Vec<usize>,
    len: usize,
    capacity: usize,
}

impl ChannelPool {
    pub(crate) fn new(capacity: usize) -> Self {
        ChannelPool {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            capacity,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn insert(&mut self, entry: ChannelEntry) -> Insert {
        if let Some(index) = self.free.pop() {
            self.slots[index] = Some(entry);
            self.len += 1;
            return Insert::Stored;
        }
        if self.slots.len() < self.capacity {
            self.slots.push(Some(entry));
            self.len += 1;
            return Insert::Stored;
        }
        match self.eviction_candidate() {
            Some(index) => {
                let evicted = self.slots[index]
                    .replace(entry)
                    .expect("eviction candidate slot is occupied");
                Insert::Evicting(evicted)
            }
            None => Insert::Rejected(entry),
        }
    }

    /// The idle channel with the smallest last-used timestamp, first found
    /// winning ties. In-use channels are never candidates.
    fn eviction_candidate(&self) -> Option<usize> {
        let mut minimal_last_used = u64::MAX;
        let mut candidate = None;

        for (index, slot) in self.slots.iter().enumerate() {
            let Some(entry) = slot else { continue };
            let last_used = entry.channel.last_used_millis();
            if !entry.channel.is_in_use() && last_used < minimal_last_used {
                candidate = Some(index);
                minimal_last_used = last_used;
            }
        }

        candidate
    }

    pub(crate) fn remove(&mut self, id: ChannelId) -> Option<ChannelEntry> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|entry| entry.channel.id() == id))?;
        let entry = self.slots[index].take();
        self.free.push(index);
        self.len -= 1;
        entry
    }

    pub(crate) fn get_mut(&mut self, id: ChannelId) -> Option<&mut ChannelEntry> {
        self.slots
            .iter_mut()
            .filter_map(Option::as_mut)
            .find(|entry| entry.channel.id() == id)
    }

    pub(crate) fn find_by_addr_mut(
        &mut self,
        remote_addr: std::net::SocketAddr,
    ) -> Option<&mut ChannelEntry> {
        self.slots
            .iter_mut()
            .filter_map(Option::as_mut)
            .find(|entry| entry.channel.remote_addr() == remote_addr)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut ChannelEntry> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;

    fn addr(port: u16) -> SocketAddr {
        ([127, 0, 0, 1], port).into()
    }

    fn entry(port: u16, last_used: u64) -> ChannelEntry {
        let channel = ChannelRef::new(addr(port));
        channel.set_last_used_millis_for_tests(last_used);
        ChannelEntry::new(channel, 3, Instant::now())
    }

    #[test]
    fn grows_only_up_to_capacity() {
        let mut pool = ChannelPool::new(2);
        assert!(matches!(pool.insert(entry(1, 10)), Insert::Stored));
        assert!(matches!(pool.insert(entry(2, 20)), Insert::Stored));
        assert_eq!(pool.len(), 2);

        // Full, but both are idle: the oldest gets evicted.
        match pool.insert(entry(3, 30)) {
            Insert::Evicting(evicted) => assert_eq!(evicted.channel.remote_addr(), addr(1)),
            other => panic!("expected eviction, got {other:?}"),
        }
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn eviction_skips_in_use_channels() {
        let mut pool = ChannelPool::new(2);
        let oldest = entry(1, 10);
        oldest.channel.count_usage_begin();
        pool.insert(oldest);
        pool.insert(entry(2, 20));

        // The oldest channel is in use, so the younger idle one goes.
        match pool.insert(entry(3, 30)) {
            Insert::Evicting(evicted) => assert_eq!(evicted.channel.remote_addr(), addr(2)),
            other => panic!("expected eviction, got {other:?}"),
        }
    }

    #[test]
    fn insertion_rejected_when_no_channel_is_idle() {
        let mut pool = ChannelPool::new(1);
        let busy = entry(1, 10);
        busy.channel.count_usage_begin();
        pool.insert(busy);

        match pool.insert(entry(2, 20)) {
            Insert::Rejected(rejected) => assert_eq!(rejected.channel.remote_addr(), addr(2)),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn removal_frees_the_slot_for_reuse() {
        let mut pool = ChannelPool::new(1);
        pool.insert(entry(1, 10));
        let id = pool.find_by_addr_mut(addr(1)).unwrap().channel.id();

        assert!(pool.remove(id).is_some());
        assert_eq!(pool.len(), 0);
        assert!(pool.remove(id).is_none());

        assert!(matches!(pool.insert(entry(2, 20)), Insert::Stored));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn lookup_by_address_and_id() {
        let mut pool = ChannelPool::new(4);
        pool.insert(entry(1, 10));
        pool.insert(entry(2, 20));

        let id = pool.find_by_addr_mut(addr(2)).unwrap().channel.id();
        assert_eq!(pool.get_mut(id).unwrap().channel.remote_addr(), addr(2));
        assert!(pool.find_by_addr_mut(addr(9)).is_none());
    }
}
