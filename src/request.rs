//! Bounded request tickets and the pending-channel future.
//!
//! Opening a channel starts by reserving a ticket from the request pool.
//! The ticket travels through the pending-request queue into the maintenance
//! loop, where it is either fulfilled immediately, parked as a ready-listener
//! on a channel, or failed. The reservation is released when the ticket is
//! resolved, so the number of in-flight requests never exceeds the pool's
//! capacity; an exhausted pool is the backpressure signal.

use std::{
    fmt,
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};

use crate::{channel::ChannelRef, error::RequestError};

/// Bounded pool of "open channel" tickets.
#[derive(Clone, Debug)]
pub(crate) struct RequestPool {
    tickets: Arc<Semaphore>,
}

impl RequestPool {
    pub(crate) fn new(capacity: usize) -> Self {
        RequestPool {
            tickets: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Reserves a ticket for a request to `remote_addr`, or `None` when the
    /// pool is exhausted.
    pub(crate) fn reserve(
        &self,
        remote_addr: SocketAddr,
    ) -> Option<(ChannelRequest, PendingChannel)> {
        let permit = Arc::clone(&self.tickets).try_acquire_owned().ok()?;
        let (tx, rx) = oneshot::channel();
        let request = ChannelRequest {
            remote_addr,
            tx,
            _permit: permit,
        };
        Some((request, PendingChannel { rx }))
    }
}

/// An in-flight "open channel" ticket.
///
/// Holds its pool reservation until dropped, which happens when the request
/// is fulfilled, failed, or cancelled.
#[derive(Debug)]
pub(crate) struct ChannelRequest {
    pub(crate) remote_addr: SocketAddr,
    tx: oneshot::Sender<Result<ChannelRef, RequestError>>,
    _permit: OwnedSemaphorePermit,
}

impl ChannelRequest {
    /// Completes the request with a ready channel, counting one usage holder.
    ///
    /// The increment is rolled back when the requester has already cancelled,
    /// so cancelled requests never leak usage.
    pub(crate) fn fulfill(self, channel: &ChannelRef) {
        channel.count_usage_begin();
        if self.tx.send(Ok(channel.clone())).is_err() {
            channel.count_usage_end();
        }
    }

    /// Fails the request.
    pub(crate) fn fail(self, err: RequestError) {
        let _ = self.tx.send(Err(err));
    }
}

/// Future resolving to the requested channel.
///
/// Returned by [`request_channel_async`]. Dropping it cancels the request;
/// a fulfillment racing the drop is rolled back by the maintenance loop.
///
/// [`request_channel_async`]: crate::manager::ChannelManagerRef::request_channel_async
pub struct PendingChannel {
    rx: oneshot::Receiver<Result<ChannelRef, RequestError>>,
}

impl PendingChannel {
    /// Blocking wait used by the synchronous request path.
    pub(crate) fn blocking_recv(self) -> Result<ChannelRef, RequestError> {
        self.rx
            .blocking_recv()
            .unwrap_or(Err(RequestError::ManagerStopped))
    }
}

impl Future for PendingChannel {
    type Output = Result<ChannelRef, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| match result {
            Ok(resolution) => resolution,
            Err(_) => Err(RequestError::ManagerStopped),
        })
    }
}

impl fmt::Debug for PendingChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingChannel").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        ([127, 0, 0, 1], 7100).into()
    }

    #[test]
    fn exhaustion_yields_no_ticket() {
        let pool = RequestPool::new(1);
        let first = pool.reserve(addr());
        assert!(first.is_some());
        assert!(pool.reserve(addr()).is_none());

        drop(first);
        assert!(pool.reserve(addr()).is_some());
    }

    #[tokio::test]
    async fn fulfillment_counts_usage() {
        let pool = RequestPool::new(1);
        let (request, pending) = pool.reserve(addr()).unwrap();
        let channel = ChannelRef::new(addr());

        request.fulfill(&channel);
        assert_eq!(channel.usage(), 1);
        assert_eq!(pending.await.unwrap().id(), channel.id());
    }

    #[test]
    fn cancelled_fulfillment_rolls_back_usage() {
        let pool = RequestPool::new(1);
        let (request, pending) = pool.reserve(addr()).unwrap();
        let channel = ChannelRef::new(addr());

        drop(pending);
        request.fulfill(&channel);
        assert_eq!(channel.usage(), 0);
    }

    #[tokio::test]
    async fn failure_surfaces_to_the_future() {
        let pool = RequestPool::new(1);
        let (request, pending) = pool.reserve(addr()).unwrap();

        request.fail(RequestError::CapacityExhausted);
        assert_eq!(pending.await, Err(RequestError::CapacityExhausted));
    }
}
