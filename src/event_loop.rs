//! Event loop collaborator.
//!
//! The routing layer only needs "run this later on the loop thread". This
//! module defines that seam and ships a loop backed by a tokio
//! current-thread runtime on its own OS thread.

use super::{context::ContextRegistry, errors::JobError, model::ContextTag};
use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Schedules callbacks onto the loop thread. Must not block the caller.
pub trait EventLoop: Send + Sync {
    fn schedule(&self, callback: Callback);
}

impl<L: EventLoop + ?Sized> EventLoop for Arc<L> {
    #[inline]
    fn schedule(&self, callback: Callback) {
        (**self).schedule(callback)
    }
}

/// Cloneable sender side of a [`LoopThread`].
#[derive(Clone, Debug)]
pub struct LoopHandle {
    sender: mpsc::UnboundedSender<Callback>,
}

impl EventLoop for LoopHandle {
    fn schedule(&self, callback: Callback) {
        if self.sender.send(callback).is_err() {
            tracing::warn!("event loop has stopped, callback dropped");
        }
    }
}

/// Dedicated event loop thread.
///
/// Callbacks run one at a time, in the order they were scheduled, inside a
/// tokio current-thread runtime, so a callback may `tokio::spawn` futures
/// that also stay on the loop thread.
pub struct LoopThread {
    handle: LoopHandle,
    token: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl LoopThread {
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let (sender, receiver) = mpsc::unbounded_channel::<Callback>();
        let token = CancellationToken::new();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let cancelled = token.clone();
        let thread = thread::Builder::new().name(name.into()).spawn(move || {
            ContextRegistry::new().mark_as(ContextTag::LoopThread);
            runtime.block_on(serve(receiver, cancelled));
        })?;

        Ok(Self {
            handle: LoopHandle { sender },
            token,
            thread: Some(thread),
        })
    }

    #[inline]
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Stops the loop after the callbacks already queued have run, then
    /// joins the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.token.cancel();
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            tracing::error!("event loop thread panicked");
        }
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve(mut receiver: mpsc::UnboundedReceiver<Callback>, cancelled: CancellationToken) {
    loop {
        tokio::select! {
            callback = receiver.recv() => match callback {
                Some(callback) => run_callback(callback),
                None => break,
            },
            _ = cancelled.cancelled() => {
                receiver.close();
                while let Ok(callback) = receiver.try_recv() {
                    run_callback(callback);
                }
                break;
            }
        }
    }
    tracing::debug!("event loop stopped");
}

fn run_callback(callback: Callback) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        let err = JobError::from_panic(payload);
        tracing::error!(error = %err, "event loop callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::time::Duration;

    #[test]
    fn callbacks_run_in_order_on_loop_thread() {
        let event_loop = LoopThread::spawn("test-loop").unwrap();
        let handle = event_loop.handle();
        let (tx, rx) = channel::unbounded();

        for i in 0..5 {
            let tx = tx.clone();
            handle.schedule(Box::new(move || {
                let on_loop = ContextRegistry::new().current_has(ContextTag::LoopThread);
                tx.send((i, on_loop, thread::current().name().map(str::to_owned))).unwrap();
            }));
        }

        for expected in 0..5 {
            let (i, on_loop, name) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(i, expected);
            assert!(on_loop);
            assert_eq!(name.as_deref(), Some("test-loop"));
        }
        event_loop.shutdown();
    }

    #[test]
    fn panicking_callback_does_not_stop_loop() {
        let event_loop = LoopThread::spawn("panic-loop").unwrap();
        let handle = event_loop.handle();
        let (tx, rx) = channel::bounded(1);

        handle.schedule(Box::new(|| panic!("callback failure")));
        handle.schedule(Box::new(move || tx.send(()).unwrap()));

        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn shutdown_drains_then_drops_late_callbacks() {
        let event_loop = LoopThread::spawn("drain-loop").unwrap();
        let handle = event_loop.handle();
        let (tx, rx) = channel::unbounded();

        for i in 0..3 {
            let tx = tx.clone();
            handle.schedule(Box::new(move || tx.send(i).unwrap()));
        }
        event_loop.shutdown();
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![0, 1, 2]);

        let tx_late = tx.clone();
        handle.schedule(Box::new(move || tx_late.send(99).unwrap()));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }
}
