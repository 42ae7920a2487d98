//! The channel manager: pooling, deduplication, keep-alive, reconnection.
//!
//! [`ChannelManager`] owns all pool and channel state and mutates it only
//! inside [`maintain_state`], which a host scheduler calls repeatedly.
//! Everything reaching the manager from other threads goes through one of
//! two bounded hand-offs (request tickets, the pending-request queue) or the
//! deferred command queue, so no locks guard channel or pool fields.
//!
//! [`maintain_state`]: ChannelManager::maintain_state

use std::{fmt, future::Future, net::SocketAddr, time::Duration};

use bytes::Bytes;
use futures::future::try_join_all;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::{
    channel::{ChannelId, ChannelRef},
    conductor::Conductor,
    deferred::{DeferredCommandContext, DeferredCommands},
    error::{CloseAllError, RequestError},
    lifecycle::{self, ChannelEvent, ChannelState, InterruptDecision, LifecyclePolicy},
    pool::{ChannelEntry, ChannelPool, Insert},
    request::{ChannelRequest, PendingChannel, RequestPool},
};

/// Number of automatic reconnection attempts granted to every channel.
pub const CHANNEL_RECONNECT_ATTEMPTS: u32 = 3;

/// Configuration for a [`ChannelManager`].
#[derive(Clone, Debug)]
pub struct ChannelManagerOptions {
    /// Maximum number of pooled channels.
    pub initial_capacity: usize,
    /// Bound on in-flight channel requests; exhaustion is the backpressure
    /// signal.
    pub request_capacity: usize,
    /// How often each ready channel has a keep-alive frame scheduled.
    pub keep_alive_period: Duration,
    /// Whether interrupted channels are reconnected automatically while in
    /// use.
    pub reopen_on_interrupt: bool,
    /// Reconnect attempts granted per channel.
    pub reconnect_budget: u32,
    /// Opaque pre-built keep-alive payload supplied by the protocol layer.
    pub keep_alive_frame: Bytes,
}

impl Default for ChannelManagerOptions {
    fn default() -> Self {
        ChannelManagerOptions {
            initial_capacity: 64,
            request_capacity: 64,
            keep_alive_period: Duration::from_secs(30),
            reopen_on_interrupt: true,
            reconnect_budget: CHANNEL_RECONNECT_ATTEMPTS,
            keep_alive_frame: Bytes::new(),
        }
    }
}

/// State owned exclusively by the maintenance loop.
struct ManagerState {
    conductor: Box<dyn Conductor>,
    pool: ChannelPool,
    policy: LifecyclePolicy,
    reconnect_budget: u32,
    keep_alive_period: Duration,
    keep_alive_frame: Bytes,
}

/// Establishes, deduplicates, pools, monitors, and tears down channels to
/// remote peers.
///
/// The manager itself lives on one thread (or one cooperatively scheduled
/// task); callers elsewhere hold a [`ChannelManagerRef`] and the host's
/// [`Conductor`] reports outcomes through [`ChannelEvents`]. The host
/// scheduler drives the manager by calling [`maintain_state`] repeatedly and
/// can use the returned work count to decide whether to keep scheduling it
/// without idling.
///
/// [`maintain_state`]: ChannelManager::maintain_state
pub struct ChannelManager {
    state: ManagerState,
    commands: DeferredCommandContext<ManagerState>,
    pending_requests: mpsc::Receiver<ChannelRequest>,
    handle: ChannelManagerRef,
}

impl ChannelManager {
    /// Creates a manager driving `conductor` with the given options.
    pub fn new(conductor: impl Conductor, options: ChannelManagerOptions) -> Self {
        let commands = DeferredCommandContext::new();
        let (pending_tx, pending_rx) = mpsc::channel(options.request_capacity.max(1));
        let handle = ChannelManagerRef {
            requests: RequestPool::new(options.request_capacity),
            pending: pending_tx,
            commands: commands.handle(),
        };
        ChannelManager {
            state: ManagerState {
                conductor: Box::new(conductor),
                pool: ChannelPool::new(options.initial_capacity),
                policy: LifecyclePolicy {
                    reopen_on_interrupt: options.reopen_on_interrupt,
                },
                reconnect_budget: options.reconnect_budget,
                keep_alive_period: options.keep_alive_period,
                keep_alive_frame: options.keep_alive_frame,
            },
            commands,
            pending_requests: pending_rx,
            handle,
        }
    }

    /// Returns a cloneable handle for submitting work from any thread.
    pub fn handle(&self) -> ChannelManagerRef {
        self.handle.clone()
    }

    /// Returns the handle the host's [`Conductor`] uses to report connection
    /// outcomes.
    pub fn events(&self) -> ChannelEvents {
        ChannelEvents {
            commands: self.commands.handle(),
        }
    }

    /// Number of channels currently pooled.
    pub fn channel_count(&self) -> usize {
        self.state.pool.len()
    }

    /// Runs one maintenance tick: drains deferred commands, resolves pending
    /// channel requests, and scans pooled channels for due keep-alives.
    ///
    /// This is the only method that mutates shared state. Returns the number
    /// of work units performed, which a host scheduler can use to back off
    /// when the manager is idle.
    pub fn maintain_state(&mut self) -> usize {
        let mut work_count = 0;
        work_count += self.commands.drain(&mut self.state);
        work_count += self.work_on_channel_requests();
        work_count += self.state.send_keep_alive_messages();

        if work_count > 0 {
            trace!(work_count, "maintenance tick");
        }
        work_count
    }

    fn work_on_channel_requests(&mut self) -> usize {
        let mut work_count = 0;
        while let Ok(request) = self.pending_requests.try_recv() {
            self.state.handle_channel_request(request);
            work_count += 1;
        }
        work_count
    }
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("channel_count", &self.state.pool.len())
            .finish_non_exhaustive()
    }
}

impl ManagerState {
    /// Resolves one drained request: reuse the pooled channel for the
    /// address, or create and admit a new one.
    fn handle_channel_request(&mut self, request: ChannelRequest) {
        let remote_addr = request.remote_addr;
        if let Some(entry) = self.pool.find_by_addr_mut(remote_addr) {
            entry.listen_for_ready(request);
            return;
        }

        let channel = self
            .conductor
            .new_channel(remote_addr, self.reconnect_budget);
        debug!(channel_id = %channel.id(), %remote_addr, "opening channel");

        let mut entry = ChannelEntry::new(channel, self.reconnect_budget, Instant::now());
        entry.listen_for_ready(request);

        match self.pool.insert(entry) {
            Insert::Stored => {}
            Insert::Evicting(evicted) => self.evict(evicted),
            Insert::Rejected(mut rejected) => {
                warn!(%remote_addr, "channel pool full with no idle channel; rejecting request");
                self.conductor.close_channel(&rejected.channel);
                rejected.fail_ready_listeners(RequestError::CapacityExhausted);
            }
        }
    }

    fn evict(&mut self, mut evicted: ChannelEntry) {
        debug!(
            channel_id = %evicted.channel.id(),
            remote_addr = %evicted.channel.remote_addr(),
            "evicting idle channel"
        );
        self.conductor.close_channel(&evicted.channel);
        evicted.fail_ready_listeners(RequestError::ChannelClosed);
        // Close listeners are dropped: a pending bulk close observes the
        // eviction as a failed confirmation.
    }

    /// Applies a conductor-reported event to the channel's state machine and
    /// performs the resulting side effects.
    fn apply_event(&mut self, id: ChannelId, event: ChannelEvent) {
        let next = match self.pool.get_mut(id) {
            Some(entry) => match lifecycle::apply(entry.state, event) {
                Some(next) => {
                    entry.state = next;
                    next
                }
                None => return,
            },
            None => {
                debug!(channel_id = %id, ?event, "event for unpooled channel dropped");
                return;
            }
        };

        match next {
            ChannelState::Ready => {
                debug!(channel_id = %id, "channel ready");
                if let Some(entry) = self.pool.get_mut(id) {
                    entry.fulfill_ready_listeners();
                }
            }
            ChannelState::Interrupted => self.try_reopen_channel(id),
            ChannelState::Closed => self.remove_channel(id, ChannelState::Closed),
            ChannelState::Connecting | ChannelState::ClosedUnexpectedly => {}
        }
    }

    /// Runs the interrupted-channel policy until the channel is either
    /// reconnecting or abandoned.
    ///
    /// Each consulted attempt consumes budget whether or not the conductor
    /// accepts it, so a conductor that refuses every attempt drains the
    /// budget within a single tick.
    fn try_reopen_channel(&mut self, id: ChannelId) {
        loop {
            let Some(entry) = self.pool.get_mut(id) else { return };
            let decision = lifecycle::on_interrupted(
                self.policy,
                entry.channel.is_in_use(),
                entry.reconnect_attempts_left,
            );
            match decision {
                InterruptDecision::Reconnect => {
                    entry.reconnect_attempts_left -= 1;
                    entry.last_keep_alive = Instant::now();
                    debug!(
                        channel_id = %id,
                        attempts_left = entry.reconnect_attempts_left,
                        "reconnecting interrupted channel"
                    );
                    if self.conductor.connect_channel(&entry.channel) {
                        entry.state = ChannelState::Connecting;
                        return;
                    }
                    // Attempt not accepted; stay interrupted and consult the
                    // policy again.
                }
                InterruptDecision::Abandon => {
                    warn!(channel_id = %id, "abandoning interrupted channel");
                    self.remove_channel(id, ChannelState::ClosedUnexpectedly);
                    return;
                }
            }
        }
    }

    /// Moves a channel into a terminal state and out of the pool.
    ///
    /// Pending ready-listeners fail; close confirmations complete only on a
    /// clean close.
    fn remove_channel(&mut self, id: ChannelId, terminal: ChannelState) {
        let Some(mut entry) = self.pool.remove(id) else { return };
        entry.state = terminal;
        debug!(channel_id = %id, state = ?terminal, "channel removed from pool");

        entry.fail_ready_listeners(RequestError::ChannelClosed);
        if terminal == ChannelState::Closed {
            entry.complete_close_listeners();
        }
    }

    fn send_keep_alive_messages(&mut self) -> usize {
        let now = Instant::now();
        let mut work_count = 0;

        for entry in self.pool.iter_mut() {
            if entry.state == ChannelState::Ready
                && now.duration_since(entry.last_keep_alive) > self.keep_alive_period
            {
                if self
                    .conductor
                    .schedule_control_frame(&entry.channel, &self.keep_alive_frame)
                {
                    entry.last_keep_alive = now;
                } else {
                    trace!(channel_id = %entry.channel.id(), "keep-alive frame not scheduled");
                }
                work_count += 1;
            }
        }

        work_count
    }
}

/// Cloneable handle for submitting work to a [`ChannelManager`] from any
/// thread.
#[derive(Clone, Debug)]
pub struct ChannelManagerRef {
    requests: RequestPool,
    pending: mpsc::Sender<ChannelRequest>,
    commands: DeferredCommands<ManagerState>,
}

impl ChannelManagerRef {
    /// Requests a channel to `remote_addr` without blocking.
    ///
    /// Returns `None` when request capacity is exhausted; this is the
    /// backpressure signal, and callers should retry later rather than
    /// queue. The returned future resolves once the maintenance loop has a
    /// ready channel for the address; dropping it cancels the request.
    pub fn request_channel_async(&self, remote_addr: SocketAddr) -> Option<PendingChannel> {
        let (request, pending) = self.requests.reserve(remote_addr)?;
        // The queue bound matches the ticket count, so a held ticket
        // guarantees a slot; failure here means the manager is gone.
        if let Err(err) = self.pending.try_send(request) {
            let request = match err {
                TrySendError::Full(request) | TrySendError::Closed(request) => request,
            };
            request.fail(RequestError::ManagerStopped);
        }
        Some(pending)
    }

    /// Requests a channel to `remote_addr`, blocking the calling thread
    /// until it is ready.
    ///
    /// A thin wrapper over [`request_channel_async`] that waits on its
    /// future. Fails with [`RequestError::CapacityExhausted`] when no
    /// request ticket is available.
    ///
    /// Must not be called from the maintenance-loop thread (only that thread
    /// can resolve the request, so doing so deadlocks) nor from within an
    /// async context. Callers wanting a wait timeout must apply their own.
    ///
    /// [`request_channel_async`]: ChannelManagerRef::request_channel_async
    pub fn request_channel(&self, remote_addr: SocketAddr) -> Result<ChannelRef, RequestError> {
        match self.request_channel_async(remote_addr) {
            Some(pending) => pending.blocking_recv(),
            None => Err(RequestError::CapacityExhausted),
        }
    }

    /// Returns a channel obtained from a fulfilled request.
    ///
    /// Decrements the usage count; once it reaches zero the channel is idle
    /// and eligible for eviction, and interruptions are no longer
    /// reconnected.
    pub fn return_channel(&self, channel: &ChannelRef) {
        channel.count_usage_end();
    }

    /// Asks the conductor to close every pooled channel.
    ///
    /// The returned future resolves once every close that was actually
    /// started has confirmed. Channels whose close was not started are
    /// treated as already closed and not waited for. If any confirmation
    /// fails, a single aggregate [`CloseAllError`] is surfaced instead of
    /// partial results.
    ///
    /// The close sweep runs inside the next maintenance tick.
    pub fn close_all_channels(&self) -> impl Future<Output = Result<(), CloseAllError>> {
        let scheduled = self.commands.run(|state: &mut ManagerState| {
            let mut confirmations = Vec::new();
            for entry in state.pool.iter_mut() {
                if state.conductor.close_channel(&entry.channel) {
                    confirmations.push(entry.listen_for_close());
                }
                // A `false` return means the channel is already closed and
                // there is nothing to wait for.
            }
            debug!(
                awaiting = confirmations.len(),
                "bulk close initiated"
            );
            confirmations
        });

        async move {
            let confirmations = scheduled.await.ok_or(CloseAllError)?;
            try_join_all(confirmations)
                .await
                .map_err(|_| CloseAllError)?;
            Ok(())
        }
    }
}

/// Handle a [`Conductor`] uses to report connection outcomes back into the
/// maintenance loop.
#[derive(Clone, Debug)]
pub struct ChannelEvents {
    commands: DeferredCommands<ManagerState>,
}

impl ChannelEvents {
    /// Reports a connection outcome for the channel with `id`.
    ///
    /// The event is applied inside the next maintenance tick. Events for
    /// channels no longer pooled are dropped.
    pub fn notify(&self, id: ChannelId, event: ChannelEvent) {
        self.commands
            .push(move |state: &mut ManagerState| state.apply_event(id, event));
    }
}
