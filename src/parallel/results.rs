use crossbeam::channel::{Receiver, select};
use std::iter::FusedIterator;
use std::panic;
use std::thread::{self, JoinHandle};

use super::pool::PanicPayload;

/// Output channel of a parallel map
///
/// Yields results in completion order, not input order. A panic raised by the
/// transformation halts the pool and is re-raised on the consuming thread by
/// the next [`recv`](Self::recv), even while the source is still open. The
/// channel otherwise closes once every worker has finished, at which point
/// the dispatcher is joined.
///
/// Dropping this early abandons the remaining output: workers stop at their
/// next send and the dispatcher stops pulling from the source. A panic that
/// has not been received by then is logged at `error` level and discarded.
#[derive(Debug)]
pub struct MapResults<R> {
    receiver: Receiver<R>,
    failures: Receiver<PanicPayload>,
    dispatcher: Option<JoinHandle<()>>,
    workers: usize,
}

impl<R> MapResults<R> {
    pub(crate) fn new(
        receiver: Receiver<R>,
        failures: Receiver<PanicPayload>,
        dispatcher: JoinHandle<()>,
        workers: usize,
    ) -> Self {
        Self {
            receiver,
            failures,
            dispatcher: Some(dispatcher),
            workers,
        }
    }

    /// Worker count resolved for this invocation
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Block for the next result; `None` once all workers are done
    ///
    /// # Panics
    /// Re-raises the panic of a transformation, as soon as it has happened.
    pub fn recv(&mut self) -> Option<R> {
        if let Ok(payload) = self.failures.try_recv() {
            panic::resume_unwind(payload);
        }

        let next = select! {
            recv(self.receiver) -> result => result.ok(),
            recv(self.failures) -> payload => match payload {
                Ok(payload) => panic::resume_unwind(payload),
                // Every worker is gone, only buffered results remain
                Err(_) => self.receiver.recv().ok(),
            },
        };

        if next.is_none() {
            self.finish();
        }
        next
    }

    /// Raw receiver, for use with `crossbeam::channel::select!`
    ///
    /// Draining through this bypasses panic propagation until the next
    /// [`recv`](Self::recv) call.
    pub fn receiver(&self) -> &Receiver<R> {
        &self.receiver
    }

    fn finish(&mut self) {
        // Raised before the last sender was released
        if let Ok(payload) = self.failures.try_recv() {
            panic::resume_unwind(payload);
        }
        if let Some(dispatcher) = self.dispatcher.take()
            && let Err(payload) = dispatcher.join()
        {
            panic::resume_unwind(payload);
        }
    }
}

impl<R> Drop for MapResults<R> {
    fn drop(&mut self) {
        if thread::panicking() {
            return;
        }
        if self.failures.try_recv().is_ok() {
            tracing::error!("transformation panicked after its results were abandoned");
        }
        if let Some(dispatcher) = self.dispatcher.take()
            && dispatcher.is_finished()
            && dispatcher.join().is_err()
        {
            tracing::error!("dispatcher panicked after its results were abandoned");
        }
    }
}

impl<R> Iterator for MapResults<R> {
    type Item = R;

    fn next(&mut self) -> Option<R> {
        self.recv()
    }
}

impl<R> FusedIterator for MapResults<R> {}
