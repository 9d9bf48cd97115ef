//! Routing of plain functions to the execution context they need.
//!
//! A [`Routed`] function checks the calling thread's tags on every call and
//! either runs inline or hands the call to its target context:
//!
//! - [`RunOnLoop`]: inline on the loop thread, otherwise scheduled there.
//! - [`RunInPool`]: inline on a pool worker, otherwise submitted to the pool.
//! - [`AssertInPool`]: always inline, with a warning when the caller is not a
//!   pool worker.
//!
//! Redispatched calls are fire-and-forget; only [`AssertInPool`] hands back
//! the function's result.

use super::{
    context::ContextRegistry,
    errors::SpawnError,
    event_loop::EventLoop,
    model::ContextTag,
    pool::ThreadPool,
};
use std::{backtrace::Backtrace, borrow::Cow, sync::Arc};

/// Side channel for "this call may block a thread it should not".
pub trait Diagnostics: Send + Sync {
    fn warn(&self, message: &str);
}

/// Default diagnostics: `tracing` warning with the caller's backtrace
/// (captured only when `RUST_BACKTRACE` is set).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn warn(&self, message: &str) {
        let backtrace = Backtrace::capture();
        tracing::warn!(%backtrace, "{message}");
    }
}

impl<D: Diagnostics + ?Sized> Diagnostics for Arc<D> {
    #[inline]
    fn warn(&self, message: &str) {
        (**self).warn(message)
    }
}

/// Decides where a call runs.
pub trait DispatchPolicy {
    type Output<R>;

    fn invoke<F, R>(&self, name: &str, f: F) -> Self::Output<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static;
}

#[derive(Clone)]
pub struct RunOnLoop<L> {
    event_loop: L,
    registry: ContextRegistry,
}

impl<L: EventLoop> RunOnLoop<L> {
    pub fn new(event_loop: L) -> Self {
        Self {
            event_loop,
            registry: ContextRegistry::new(),
        }
    }
}

impl<L: EventLoop> DispatchPolicy for RunOnLoop<L> {
    type Output<R> = ();

    fn invoke<F, R>(&self, _name: &str, f: F)
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.registry.current_has(ContextTag::LoopThread) {
            f();
            return;
        }
        self.event_loop.schedule(Box::new(move || {
            f();
        }));
    }
}

#[derive(Clone)]
pub struct RunInPool {
    pool: ThreadPool,
    registry: ContextRegistry,
}

impl RunInPool {
    pub fn new(pool: ThreadPool) -> Self {
        Self {
            pool,
            registry: ContextRegistry::new(),
        }
    }
}

impl DispatchPolicy for RunInPool {
    type Output<R> = Result<(), SpawnError>;

    fn invoke<F, R>(&self, _name: &str, f: F) -> Result<(), SpawnError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.registry.current_has(ContextTag::PoolWorker) {
            f();
            return Ok(());
        }
        self.pool.submit(move || {
            f();
        })
    }
}

#[derive(Clone)]
pub struct AssertInPool<D> {
    diagnostics: D,
    registry: ContextRegistry,
}

impl<D: Diagnostics> AssertInPool<D> {
    pub fn new(diagnostics: D) -> Self {
        Self {
            diagnostics,
            registry: ContextRegistry::new(),
        }
    }
}

impl<D: Diagnostics> AssertInPool<D> {
    /// Runs `f` on the calling thread, warning first when that thread is not
    /// a pool worker. Nothing leaves the thread, so no `Send` bounds apply.
    pub fn run<F, R>(&self, name: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        if !self.registry.current_has(ContextTag::PoolWorker) {
            self.diagnostics
                .warn(&format!("Blocking call to {name} not in thread pool"));
        }
        f()
    }
}

impl<D: Diagnostics> DispatchPolicy for AssertInPool<D> {
    type Output<R> = R;

    #[inline]
    fn invoke<F, R>(&self, name: &str, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.run(name, f)
    }
}

/// A function bound to a [`DispatchPolicy`].
///
/// Arguments travel as one value; use a tuple for several. Cloning shares
/// the wrapped function.
pub struct Routed<P, F> {
    policy: P,
    func: Arc<F>,
    name: Cow<'static, str>,
}

impl<P: Clone, F> Clone for Routed<P, F> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            func: Arc::clone(&self.func),
            name: self.name.clone(),
        }
    }
}

impl<P: DispatchPolicy, F> Routed<P, F> {
    pub fn new(policy: P, func: F) -> Self {
        Self {
            policy,
            func: Arc::new(func),
            name: Cow::Borrowed(std::any::type_name::<F>()),
        }
    }

    /// Overrides the name used in diagnostics.
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hands the call to the policy, moving `args` along with it.
    pub fn dispatch<A, R>(&self, args: A) -> P::Output<R>
    where
        F: Fn(A) -> R + Send + Sync + 'static,
        A: Send + 'static,
        R: Send + 'static,
    {
        let func = Arc::clone(&self.func);
        self.policy.invoke(&self.name, move || func(args))
    }
}

impl<L: EventLoop, F> Routed<RunOnLoop<L>, F> {
    pub fn call<A, R>(&self, args: A)
    where
        F: Fn(A) -> R + Send + Sync + 'static,
        A: Send + 'static,
        R: Send + 'static,
    {
        self.dispatch(args)
    }
}

impl<F> Routed<RunInPool, F> {
    pub fn call<A, R>(&self, args: A) -> Result<(), SpawnError>
    where
        F: Fn(A) -> R + Send + Sync + 'static,
        A: Send + 'static,
        R: Send + 'static,
    {
        self.dispatch(args)
    }
}

impl<D: Diagnostics, F> Routed<AssertInPool<D>, F> {
    /// Always inline, so `args` may borrow and the result need not be `Send`.
    pub fn call<A, R>(&self, args: A) -> R
    where
        F: Fn(A) -> R,
    {
        self.policy.run(&self.name, || (*self.func)(args))
    }
}

pub fn run_on_loop<L, F>(event_loop: L, func: F) -> Routed<RunOnLoop<L>, F>
where
    L: EventLoop,
{
    Routed::new(RunOnLoop::new(event_loop), func)
}

pub fn run_in_pool<F>(pool: ThreadPool, func: F) -> Routed<RunInPool, F> {
    Routed::new(RunInPool::new(pool), func)
}

pub fn assert_in_pool<F>(func: F) -> Routed<AssertInPool<TracingDiagnostics>, F> {
    Routed::new(AssertInPool::new(TracingDiagnostics), func)
}

pub fn assert_in_pool_with<D, F>(diagnostics: D, func: F) -> Routed<AssertInPool<D>, F>
where
    D: Diagnostics,
{
    Routed::new(AssertInPool::new(diagnostics), func)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::Callback;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    #[derive(Default)]
    struct ManualLoop {
        pending: Mutex<Vec<Callback>>,
    }

    impl EventLoop for ManualLoop {
        fn schedule(&self, callback: Callback) {
            self.pending.lock().unwrap().push(callback);
        }
    }

    #[derive(Default)]
    struct CountingDiagnostics {
        warnings: Mutex<Vec<String>>,
    }

    impl Diagnostics for CountingDiagnostics {
        fn warn(&self, message: &str) {
            self.warnings.lock().unwrap().push(message.to_string());
        }
    }

    fn bump(counter: Arc<AtomicUsize>) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn run_on_loop_schedules_from_foreign_thread() {
        let event_loop = Arc::new(ManualLoop::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let routed = run_on_loop(event_loop.clone(), bump);

        std::thread::scope(|s| {
            s.spawn(|| routed.call(hits.clone()));
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let pending = std::mem::take(&mut *event_loop.pending.lock().unwrap());
        assert_eq!(pending.len(), 1);
        for callback in pending {
            callback();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_on_loop_inline_on_loop_thread() {
        let event_loop = Arc::new(ManualLoop::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let routed = run_on_loop(event_loop.clone(), bump);

        std::thread::scope(|s| {
            s.spawn(|| {
                ContextRegistry::new().mark_as(ContextTag::LoopThread);
                routed.call(hits.clone());
                assert_eq!(hits.load(Ordering::SeqCst), 1);
            });
        });
        assert!(event_loop.pending.lock().unwrap().is_empty());
    }

    #[test]
    fn assert_in_pool_warns_once_off_pool() {
        let diagnostics = Arc::new(CountingDiagnostics::default());
        let routed = assert_in_pool_with(diagnostics.clone(), |(a, b): (i32, i32)| a + b).named("add");

        let off_pool = std::thread::spawn({
            let routed = routed.clone();
            move || routed.call((2, 3))
        })
        .join()
        .unwrap();
        assert_eq!(off_pool, 5);
        assert_eq!(
            *diagnostics.warnings.lock().unwrap(),
            vec!["Blocking call to add not in thread pool".to_string()]
        );

        let on_pool = std::thread::spawn(move || {
            ContextRegistry::new().mark_as(ContextTag::PoolWorker);
            routed.call((2, 3))
        })
        .join()
        .unwrap();
        assert_eq!(on_pool, 5);
        assert_eq!(diagnostics.warnings.lock().unwrap().len(), 1);
    }

    #[test]
    fn assert_in_pool_call_and_dispatch_agree() {
        let diagnostics = Arc::new(CountingDiagnostics::default());
        let words = assert_in_pool_with(diagnostics.clone(), |text: &str| {
            text.split_whitespace().count()
        })
        .named("words");

        let line = String::from("a borrowed line of text");
        assert_eq!(words.call(line.as_str()), 5);

        let owned = assert_in_pool_with(diagnostics.clone(), |text: String| text.len());
        assert_eq!(owned.dispatch(line.clone()), line.len());
        assert_eq!(diagnostics.warnings.lock().unwrap().len(), 2);
    }

    #[test]
    fn default_name_is_function_path() {
        let routed = assert_in_pool(bump);
        assert!(routed.name().ends_with("bump"), "{}", routed.name());
    }
}
