//! Worker pool engine shared by every executor entry point
//!
//! Layout of one invocation:
//! ```text
//! source ──▶ dispatcher ──relay (cap W)──▶ worker 0..W ──sink──▶ MapResults
//!                 ▲                            │  │                  ▲
//!                 └──── completion signals ◀───┘  └── failure ───────┘
//! ```

use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// Payload of a panic raised by a transformation
pub(crate) type PanicPayload = Box<dyn Any + Send>;

/// Halt flag plus payload channel shared by the workers and the dispatcher
///
/// The first panic halts the whole pool: the dispatcher stops feeding, idle
/// workers stop claiming, and the consumer receives the payload on its next
/// receive instead of waiting for the source to close.
#[derive(Clone)]
pub(crate) struct FailureSignal {
    halted: Arc<AtomicBool>,
    payloads: Sender<PanicPayload>,
}

impl FailureSignal {
    /// Signal for a pool of `workers`, plus the receiving end for the consumer
    pub(crate) fn new(workers: usize) -> (Self, Receiver<PanicPayload>) {
        // Every worker plus the dispatcher raises at most once
        let (payloads, failures) = channel::bounded(workers + 1);
        let signal = Self {
            halted: Arc::new(AtomicBool::new(false)),
            payloads,
        };
        (signal, failures)
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Halt the pool and hand `payload` to the consumer
    pub(crate) fn raise(&self, payload: PanicPayload) {
        self.halted.store(true, Ordering::Release);
        let _ = self.payloads.try_send(payload);
    }
}

/// Per-worker state, moved into the worker thread
///
/// `handler` processes one relay unit, sending its results into the sink, and
/// returns `false` once the sink has been abandoned by its consumer.
pub(crate) struct Worker<U, R, H> {
    pub(crate) worker_id: usize,
    pub(crate) relay: Receiver<U>,
    pub(crate) sink: Sender<R>,
    pub(crate) done: Sender<()>,
    pub(crate) failure: FailureSignal,
    pub(crate) handler: Arc<H>,
}

impl<U, R, H> Worker<U, R, H>
where
    H: Fn(U, &Sender<R>) -> bool,
{
    /// Claim units until the relay is closed and empty, then signal completion once
    ///
    /// A panic in the handler is forwarded through the failure signal before
    /// the sink is released, so the consumer sees it no later than the end of
    /// the output.
    pub(crate) fn run(self) {
        let Worker {
            worker_id,
            relay,
            sink,
            done,
            failure,
            handler,
        } = self;

        let mut claimed = 0usize;
        while let Ok(unit) = relay.recv() {
            if failure.is_raised() {
                tracing::debug!(worker_id, "pool halted by a panic, worker stopping");
                break;
            }
            claimed += 1;
            match panic::catch_unwind(AssertUnwindSafe(|| (*handler)(unit, &sink))) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(worker_id, "result receiver dropped, worker stopping early");
                    break;
                }
                Err(payload) => {
                    tracing::error!(worker_id, "transformation panicked, halting the pool");
                    failure.raise(payload);
                    break;
                }
            }
        }

        // Release the sink before signalling so the dispatcher holds the last sender
        drop(sink);
        tracing::trace!(worker_id, claimed, "worker completed");
        let _ = done.send(());
    }
}

/// Send every unit of `source` into the relay, then close it
///
/// Stops early if the pool has been halted by a panic or every worker has
/// already exited. Either way `source` is dropped on return.
pub(crate) fn feed<U, I>(relay: Sender<U>, source: I, failure: &FailureSignal) -> usize
where
    I: IntoIterator<Item = U>,
{
    let mut dispatched = 0usize;
    for unit in source {
        if failure.is_raised() {
            tracing::debug!(dispatched, "pool halted by a panic, dispatch stopped");
            break;
        }
        if relay.send(unit).is_err() {
            tracing::debug!(dispatched, "no workers left to claim work, dispatch stopped");
            break;
        }
        dispatched += 1;
    }
    dispatched
}

/// Wait for one completion signal per worker
///
/// Returns fewer than `workers` only when a worker exited without signalling,
/// which means it panicked outside its handler.
pub(crate) fn await_completion(done: &Receiver<()>, workers: usize) -> usize {
    let mut completed = 0;
    while completed < workers {
        if done.recv().is_err() {
            break;
        }
        completed += 1;
    }
    completed
}

/// Detached pool of `'static` worker threads fed by a dispatcher thread
pub(crate) struct WorkerPool<U, R> {
    relay: Sender<U>,
    done: Receiver<()>,
    sink: Sender<R>,
    failure: FailureSignal,
    handles: Vec<JoinHandle<()>>,
    thread_name: String,
}

impl<U, R> WorkerPool<U, R>
where
    U: Send + 'static,
    R: Send + 'static,
{
    /// Spawn `workers` threads, all idle until the pool is launched
    ///
    /// If a spawn fails, the relay is dropped on return and the workers
    /// already running exit on their own.
    pub(crate) fn spawn<H>(
        workers: usize,
        thread_name: &str,
        sink: Sender<R>,
        failure: FailureSignal,
        handler: H,
    ) -> Result<Self>
    where
        H: Fn(U, &Sender<R>) -> bool + Send + Sync + 'static,
    {
        assert!(workers > 0, "worker pool requires at least one worker");

        let (relay_tx, relay_rx) = channel::bounded(workers);
        let (done_tx, done_rx) = channel::bounded(workers);
        let handler = Arc::new(handler);

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let worker = Worker {
                worker_id,
                relay: relay_rx.clone(),
                sink: sink.clone(),
                done: done_tx.clone(),
                failure: failure.clone(),
                handler: handler.clone(),
            };
            let handle = thread::Builder::new()
                .name(format!("{thread_name}-{worker_id}"))
                .spawn(move || worker.run())
                .with_context(|| format!("Failed to spawn worker thread {worker_id}"))?;
            handles.push(handle);
        }

        Ok(Self {
            relay: relay_tx,
            done: done_rx,
            sink,
            failure,
            handles,
            thread_name: thread_name.to_string(),
        })
    }

    /// Hand `source` to a dispatcher thread and return its handle
    pub(crate) fn launch<I>(self, source: I) -> Result<JoinHandle<()>>
    where
        I: IntoIterator<Item = U> + Send + 'static,
    {
        let name = format!("{}-dispatch", self.thread_name);
        thread::Builder::new()
            .name(name)
            .spawn(move || self.dispatch(source))
            .context("Failed to spawn dispatcher thread")
    }

    fn dispatch<I>(self, source: I)
    where
        I: IntoIterator<Item = U>,
    {
        let WorkerPool {
            relay,
            done,
            sink,
            failure,
            handles,
            ..
        } = self;
        let workers = handles.len();

        let dispatched = feed(relay, source, &failure);
        let completed = await_completion(&done, workers);

        for handle in handles {
            if let Err(payload) = handle.join() {
                failure.raise(payload);
            }
        }

        tracing::trace!(
            dispatched,
            completed,
            workers,
            halted = failure.is_raised(),
            "dispatcher finished"
        );

        // Closes the output: every worker has released its sender by now
        drop(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn doubling(item: u32, sink: &Sender<u32>) -> bool {
        sink.send(item * 2).is_ok()
    }

    fn launch_pool<H>(
        workers: usize,
        name: &str,
        sink: Sender<u32>,
        source: impl IntoIterator<Item = u32> + Send + 'static,
        handler: H,
    ) -> (JoinHandle<()>, Receiver<PanicPayload>)
    where
        H: Fn(u32, &Sender<u32>) -> bool + Send + Sync + 'static,
    {
        let (failure, failures) = FailureSignal::new(workers);
        let pool = WorkerPool::spawn(workers, name, sink, failure, handler).unwrap();
        assert_eq!(pool.handles.len(), workers);
        (pool.launch(source).unwrap(), failures)
    }

    #[test]
    fn test_pool_processes_every_unit() {
        let (sink_tx, sink_rx) = channel::unbounded();
        let (dispatcher, failures) = launch_pool(3, "pool-test", sink_tx, 1..=10u32, doubling);

        let mut results: Vec<u32> = sink_rx.iter().collect();
        dispatcher.join().unwrap();

        results.sort();
        assert_eq!(results, (1..=10).map(|x| x * 2).collect::<Vec<_>>());
        assert!(failures.try_recv().is_err());
    }

    #[test]
    fn test_output_closes_for_empty_source() {
        let (sink_tx, sink_rx) = channel::bounded(0);
        let (dispatcher, _failures) = launch_pool(2, "pool-empty", sink_tx, std::iter::empty(), doubling);

        assert_eq!(sink_rx.iter().count(), 0);
        dispatcher.join().unwrap();
    }

    #[test]
    fn test_worker_signals_completion_once() {
        let (relay_tx, relay_rx) = channel::bounded(1);
        let (sink_tx, sink_rx) = channel::unbounded();
        let (done_tx, done_rx) = channel::unbounded();
        let (failure, _failures) = FailureSignal::new(1);

        let worker = Worker {
            worker_id: 0,
            relay: relay_rx,
            sink: sink_tx,
            done: done_tx,
            failure: failure.clone(),
            handler: Arc::new(doubling),
        };
        let handle = thread::spawn(move || worker.run());

        assert_eq!(feed(relay_tx, vec![1, 2, 3], &failure), 3);
        handle.join().unwrap();

        assert_eq!(sink_rx.iter().collect::<Vec<_>>(), vec![2, 4, 6]);
        assert_eq!(done_rx.iter().count(), 1);
    }

    #[test]
    fn test_feed_stops_once_halted() {
        let (relay_tx, relay_rx) = channel::unbounded();
        let (failure, failures) = FailureSignal::new(1);
        failure.raise(Box::new("halted"));

        assert_eq!(feed(relay_tx, 0..100u32, &failure), 0);
        assert!(relay_rx.try_recv().is_err());
        assert!(failures.try_recv().is_ok());
    }

    #[test]
    fn test_await_completion_stops_when_signals_vanish() {
        let (done_tx, done_rx) = channel::unbounded::<()>();
        done_tx.send(()).unwrap();
        drop(done_tx);
        assert_eq!(await_completion(&done_rx, 3), 1);
    }

    #[test]
    fn test_worker_panic_halts_pool() {
        // Small buffer and no reader until the panic has been observed
        let (sink_tx, sink_rx) = channel::bounded::<u32>(4);
        let (dispatcher, failures) = launch_pool(2, "pool-panic", sink_tx, 1..=1_000u32, |item, sink| {
            if item == 3 {
                panic!("transform failed on 3");
            }
            sink.send(item).is_ok()
        });

        let payload = failures.recv_timeout(Duration::from_secs(10)).unwrap();
        let message = payload.downcast_ref::<&str>().copied().unwrap_or_default();
        assert_eq!(message, "transform failed on 3");

        // The pool winds down instead of draining the whole source
        let delivered = sink_rx.iter().count();
        dispatcher.join().unwrap();
        assert!(delivered <= 8, "delivered {delivered} items after the panic");
    }
}
