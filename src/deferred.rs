//! A single-consumer command queue for running arbitrary actions inside the
//! maintenance loop.
//!
//! Any thread may enqueue a command through a [`DeferredCommands`] handle;
//! only the loop that owns the matching [`DeferredCommandContext`] ever
//! executes them, during its tick. This gives enqueuers exclusive, lock-free
//! access to state owned by that loop without the loop taking any locks.

use std::{fmt, future::Future};

use tokio::sync::{mpsc, oneshot};

type Command<T> = Box<dyn FnOnce(&mut T) + Send>;

/// The consumer side of the command queue, owned by the maintenance loop.
pub struct DeferredCommandContext<T> {
    tx: mpsc::UnboundedSender<Command<T>>,
    rx: mpsc::UnboundedReceiver<Command<T>>,
}

impl<T> DeferredCommandContext<T> {
    /// Creates an empty command queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        DeferredCommandContext { tx, rx }
    }

    /// Returns a cloneable producer handle.
    pub fn handle(&self) -> DeferredCommands<T> {
        DeferredCommands {
            tx: self.tx.clone(),
        }
    }

    /// Executes every queued command against `target`, returning the number
    /// of commands run.
    pub fn drain(&mut self, target: &mut T) -> usize {
        let mut work_count = 0;
        while let Ok(command) = self.rx.try_recv() {
            command(target);
            work_count += 1;
        }
        work_count
    }
}

impl<T> Default for DeferredCommandContext<T> {
    fn default() -> Self {
        DeferredCommandContext::new()
    }
}

impl<T> fmt::Debug for DeferredCommandContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredCommandContext").finish_non_exhaustive()
    }
}

/// A cloneable handle for scheduling commands onto a maintenance loop.
pub struct DeferredCommands<T> {
    tx: mpsc::UnboundedSender<Command<T>>,
}

impl<T> DeferredCommands<T> {
    /// Schedules `command` to run inside the next maintenance tick.
    ///
    /// The command is silently dropped if the owning loop has gone away.
    pub fn push<F>(&self, command: F)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        let _ = self.tx.send(Box::new(command));
    }

    /// Schedules `command` and returns a future for the value it produces.
    ///
    /// The command is enqueued immediately; the returned future is detached
    /// from this handle. Resolves to `None` if the owning loop was dropped
    /// before the command ran.
    pub fn run<F, R>(&self, command: F) -> impl Future<Output = Option<R>>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.push(move |target| {
            let _ = tx.send(command(target));
        });
        async move { rx.await.ok() }
    }
}

impl<T> Clone for DeferredCommands<T> {
    fn clone(&self) -> Self {
        DeferredCommands {
            tx: self.tx.clone(),
        }
    }
}

impl<T> fmt::Debug for DeferredCommands<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredCommands").finish_non_exhaustive()
    }
}
