use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver, Sender, select};
use std::any::Any;
use std::panic;
use std::sync::Arc;

use super::batch::{Batch, BatchPlan};
use super::pool::{FailureSignal, PanicPayload, Worker, WorkerPool, await_completion, feed};
use super::results::MapResults;
use super::workers::{ConcurrencyLimit, Parallelism, SystemConcurrency};

/// Default prefix for worker thread names
pub const DEFAULT_THREAD_NAME: &str = "fanmap-worker";

/// Parallel map executor
///
/// Every call resolves the worker count afresh from the [`Parallelism`] and the
/// concurrency limit, so a limit that changes between calls is honoured by the
/// next call without rebuilding the executor.
#[derive(Debug, Clone)]
pub struct ParallelExecutor<L = SystemConcurrency> {
    parallelism: Parallelism,
    limit: L,
    output_capacity: usize,
    thread_name: String,
}

impl ParallelExecutor<SystemConcurrency> {
    pub fn new(parallelism: Parallelism) -> Self {
        Self {
            parallelism,
            limit: SystemConcurrency,
            output_capacity: 0,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl Default for ParallelExecutor<SystemConcurrency> {
    fn default() -> Self {
        Self::new(Parallelism::AUTO)
    }
}

impl<L: ConcurrencyLimit> ParallelExecutor<L> {
    /// Swap the source of the ambient default concurrency
    pub fn with_limit<M: ConcurrencyLimit>(self, limit: M) -> ParallelExecutor<M> {
        ParallelExecutor {
            parallelism: self.parallelism,
            limit,
            output_capacity: self.output_capacity,
            thread_name: self.thread_name,
        }
    }

    /// Buffer size of the output channel (0 = rendezvous with the consumer)
    pub fn with_output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn parallelism(&self) -> Parallelism {
        self.parallelism
    }

    pub fn limit(&self) -> &L {
        &self.limit
    }

    pub fn output_capacity(&self) -> usize {
        self.output_capacity
    }

    /// Worker count a call made right now would use
    pub fn num_workers(&self) -> usize {
        self.parallelism.resolve(&self.limit)
    }

    /// Map `transform` over a stream of items
    ///
    /// `source` is drained on a dispatcher thread until it ends; for a
    /// `crossbeam::channel::Receiver` that is when every sender has been
    /// dropped. Between the source and the workers sits a relay of capacity
    /// `W`, so a slow result consumer holds back the producer by at most `W`
    /// buffered items.
    ///
    /// # Errors
    /// Returns an error if a worker or the dispatcher thread cannot be spawned.
    pub fn stream_map<T, R, F, I>(&self, transform: F, source: I) -> Result<MapResults<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
        I: IntoIterator<Item = T> + Send + 'static,
    {
        let workers = self.num_workers();
        tracing::debug!(
            workers,
            parallelism = %self.parallelism,
            "Starting stream map"
        );

        let (sink_tx, sink_rx) = channel::bounded(self.output_capacity);
        let (failure, failures) = FailureSignal::new(workers);
        let pool = WorkerPool::spawn(
            workers,
            &self.thread_name,
            sink_tx,
            failure,
            move |item: T, sink: &Sender<R>| sink.send(transform(item)).is_ok(),
        )?;
        let dispatcher = pool.launch(source)?;

        Ok(MapResults::new(sink_rx, failures, dispatcher, workers))
    }

    /// Map `transform` over an in-memory sequence, dispatched in contiguous batches
    ///
    /// The input is split into batches of `max(1, len / (2 × W))` elements.
    /// Each batch is claimed whole by one worker and processed in input order;
    /// batches themselves complete in any order.
    ///
    /// # Errors
    /// Returns an error if a worker or the dispatcher thread cannot be spawned.
    pub fn batch_map<T, R, F>(&self, transform: F, items: Vec<T>) -> Result<MapResults<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let workers = self.num_workers();
        let plan = BatchPlan::new(items.len(), workers);
        tracing::debug!(
            workers,
            items = plan.len(),
            batch_size = plan.batch_size(),
            batches = plan.batch_count(),
            "Starting batch map"
        );

        let (sink_tx, sink_rx) = channel::bounded(self.output_capacity);
        let (failure, failures) = FailureSignal::new(workers);
        let pool = WorkerPool::spawn(
            workers,
            &self.thread_name,
            sink_tx,
            failure,
            move |batch: Batch<T>, sink: &Sender<R>| {
                tracing::trace!(start = batch.start, len = batch.items.len(), "Claimed batch");
                batch
                    .items
                    .into_iter()
                    .all(|item| sink.send(transform(item)).is_ok())
            },
        )?;
        let dispatcher = pool.launch(plan.split(items))?;

        Ok(MapResults::new(sink_rx, failures, dispatcher, workers))
    }

    /// Batch map over borrowed data, delivering results to `consume` on the calling thread
    ///
    /// Runs the same batching as [`batch_map`](Self::batch_map), but inside a
    /// thread scope, so neither the items nor `transform` need to be `'static`.
    /// Returns once every result has been consumed and every thread has exited.
    ///
    /// # Errors
    /// Returns an error if a worker or the dispatcher thread cannot be spawned.
    ///
    /// # Panics
    /// A panic from `transform` halts the remaining work and is re-raised
    /// once every thread has been joined.
    pub fn scoped_batch_map<T, R, F, C>(&self, items: &[T], transform: F, mut consume: C) -> Result<usize>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
        C: FnMut(R),
    {
        let workers = self.num_workers();
        let plan = BatchPlan::new(items.len(), workers);
        tracing::debug!(
            workers,
            items = plan.len(),
            batch_size = plan.batch_size(),
            batches = plan.batch_count(),
            "Starting scoped batch map"
        );

        let transform = &transform;
        let outcome = crossbeam::thread::scope(|s| -> Result<Result<usize, PanicPayload>> {
            let (relay_tx, relay_rx) = channel::bounded::<&[T]>(workers);
            let (done_tx, done_rx) = channel::bounded(workers);
            let (sink_tx, sink_rx) = channel::bounded(self.output_capacity);
            let (failure, failures) = FailureSignal::new(workers);
            let handler = Arc::new(move |batch: &[T], sink: &Sender<R>| {
                batch.iter().all(|item| sink.send(transform(item)).is_ok())
            });

            for worker_id in 0..workers {
                let worker = Worker {
                    worker_id,
                    relay: relay_rx.clone(),
                    sink: sink_tx.clone(),
                    done: done_tx.clone(),
                    failure: failure.clone(),
                    handler: handler.clone(),
                };
                s.builder()
                    .name(format!("{}-{worker_id}", self.thread_name))
                    .spawn(move |_| worker.run())
                    .with_context(|| format!("Failed to spawn worker thread {worker_id}"))?;
            }
            drop(relay_rx);
            drop(done_tx);

            let batches = plan.slices(items);
            s.builder()
                .name(format!("{}-dispatch", self.thread_name))
                .spawn(move |_| {
                    feed(relay_tx, batches, &failure);
                    await_completion(&done_rx, workers);
                    drop(sink_tx);
                })
                .context("Failed to spawn dispatcher thread")?;

            // Returning drops the output, which releases any worker still sending
            Ok(deliver(&sink_rx, &failures, &mut consume))
        });

        match outcome {
            Ok(Ok(Ok(delivered))) => Ok(delivered),
            Ok(Ok(Err(payload))) => {
                tracing::error!("Transformation panicked during scoped batch map, propagating");
                panic::resume_unwind(payload)
            }
            Ok(Err(err)) => Err(err),
            Err(payload) => {
                tracing::error!("Worker panicked during scoped batch map, propagating");
                panic::resume_unwind(first_panic(payload))
            }
        }
    }
}

/// Hand results to `consume` until the output closes or a worker panics
fn deliver<R, C>(
    results: &Receiver<R>,
    failures: &Receiver<PanicPayload>,
    consume: &mut C,
) -> Result<usize, PanicPayload>
where
    C: FnMut(R),
{
    let mut delivered = 0usize;
    loop {
        let next = select! {
            recv(results) -> result => Ok(result.ok()),
            recv(failures) -> payload => match payload {
                Ok(payload) => Err(payload),
                // Every worker is gone, only buffered results remain
                Err(_) => Ok(results.recv().ok()),
            },
        };
        match next? {
            Some(result) => {
                consume(result);
                delivered += 1;
            }
            None => break,
        }
    }

    // Raised before the last sender was released
    match failures.try_recv() {
        Ok(payload) => Err(payload),
        Err(_) => Ok(delivered),
    }
}

/// Unwrap the per-thread payloads crossbeam collects, keeping the first one
fn first_panic(payload: Box<dyn Any + Send>) -> Box<dyn Any + Send> {
    match payload.downcast::<Vec<Box<dyn Any + Send>>>() {
        Ok(mut panics) if !panics.is_empty() => panics.swap_remove(0),
        Ok(_) => Box::new("scoped worker panicked"),
        Err(payload) => payload,
    }
}
