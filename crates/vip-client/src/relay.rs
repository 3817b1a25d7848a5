//! Capture loop and relay worker pool.
//!
//! Both run on dedicated OS threads since every call they make blocks. The
//! capture thread fills pooled buffers and hands them to the workers over a
//! bounded channel; each worker transmits the frame toward the VIP and returns
//! the buffer to the pool.

use crate::lifecycle::Lifecycle;
use crate::metrics::MetricsRegistry;
use crate::platform::{CaptureHandle, RawSender, RawTransmit, is_idle_read};
use crate::pool::{BufferPool, PacketBuffer};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// State shared by the capture thread and every relay worker
#[derive(Clone)]
pub struct RelayContext {
    pub pool: Arc<BufferPool>,
    pub lifecycle: Arc<Lifecycle>,
    pub metrics: Option<Arc<MetricsRegistry>>,
    /// Upper bound on how long a blocked loop waits before re-checking state
    pub poll_interval: Duration,
}

/// Open one transmit path per relay worker.
pub fn open_senders(
    transmit: &dyn RawTransmit,
    destination: IpAddr,
    count: usize,
) -> io::Result<Vec<Box<dyn RawSender>>> {
    (0..count).map(|_| transmit.open(destination)).collect()
}

/// Running capture thread and relay workers
pub struct RelayPipeline {
    capture: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    /// Kept so buffers enqueued after the workers exit can still be reclaimed
    leftover: Receiver<PacketBuffer>,
    pool: Arc<BufferPool>,
}

impl RelayPipeline {
    /// Start one relay worker per sender and the capture thread.
    ///
    /// `on_fatal` is called from the capture thread if a read fails while the
    /// client is still running.
    pub fn start<F>(
        context: RelayContext,
        capture: Arc<dyn CaptureHandle>,
        senders: Vec<Box<dyn RawSender>>,
        queue_depth: usize,
        on_fatal: F,
    ) -> io::Result<Self>
    where
        F: FnOnce(io::Error) + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(queue_depth.max(1));
        let worker_count = senders.len();

        let mut workers = Vec::with_capacity(worker_count);
        for (id, sender) in senders.into_iter().enumerate() {
            let worker = RelayWorker {
                id,
                sender,
                rx: rx.clone(),
                context: context.clone(),
            };
            match thread::Builder::new()
                .name(format!("relay-{}", id))
                .spawn(move || worker.run())
            {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Dropping tx disconnects the workers already running
                    drop(tx);
                    join_all(workers);
                    return Err(e);
                }
            }
        }

        let pool = context.pool.clone();
        let capture = match thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                if let Some(e) = capture_loop(&context, capture.as_ref(), &tx) {
                    on_fatal(e);
                }
            }) {
            Ok(handle) => handle,
            Err(e) => {
                join_all(workers);
                return Err(e);
            }
        };

        info!(workers = worker_count, queue_depth, "Relay pipeline started");

        Ok(Self {
            capture: Some(capture),
            workers,
            leftover: rx,
            pool,
        })
    }

    /// Wait for the capture thread and every worker, then reclaim any buffer
    /// still sitting in the queue. Blocks the calling thread.
    pub fn join(mut self) {
        if let Some(capture) = self.capture.take() {
            if capture.join().is_err() {
                error!("Capture thread panicked");
            }
        }
        join_all(std::mem::take(&mut self.workers));

        let mut reclaimed = 0;
        for buffer in self.leftover.try_iter() {
            self.pool.release(buffer);
            reclaimed += 1;
        }
        debug!(
            reclaimed,
            allocated = self.pool.allocated(),
            idle = self.pool.idle_count(),
            "Relay pipeline stopped"
        );
    }
}

fn join_all(workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        let name = worker.thread().name().unwrap_or("relay").to_string();
        if worker.join().is_err() {
            error!(thread = %name, "Relay worker panicked");
        }
    }
}

/// Read frames until the client stops or the capture handle fails.
///
/// Returns the read error if it happened while the client was still running.
fn capture_loop(
    context: &RelayContext,
    capture: &dyn CaptureHandle,
    tx: &Sender<PacketBuffer>,
) -> Option<io::Error> {
    let pool = &context.pool;
    // Buffer kept across idle reads so a quiet interface doesn't churn the pool
    let mut held: Option<PacketBuffer> = None;
    let mut failure = None;

    while context.lifecycle.is_running() {
        let mut buffer = held.take().unwrap_or_else(|| pool.acquire());

        match capture.read_frame(buffer.payload_mut()) {
            Ok(size) => {
                buffer.set_len(size);
                trace!(size, "Captured frame");
                if let Some(metrics) = &context.metrics {
                    metrics.record_capture();
                    metrics.update_pool_allocated(pool.allocated());
                }
                if !enqueue(context, tx, buffer) {
                    break;
                }
            }
            Err(e) if is_idle_read(&e) => {
                held = Some(buffer);
            }
            Err(e) => {
                pool.release(buffer);
                if context.lifecycle.is_running() {
                    error!(error = %e, "Capture read failed");
                    if let Some(metrics) = &context.metrics {
                        metrics.record_error("capture_read");
                    }
                    failure = Some(e);
                } else {
                    debug!(error = %e, "Capture read ended during shutdown");
                }
                break;
            }
        }
    }

    if let Some(buffer) = held {
        pool.release(buffer);
    }
    debug!("Capture loop exited");
    failure
}

/// Hand a buffer to the workers, waiting while the queue is full.
///
/// Returns false if the buffer could not be queued; it is back in the pool.
fn enqueue(context: &RelayContext, tx: &Sender<PacketBuffer>, mut buffer: PacketBuffer) -> bool {
    loop {
        match tx.send_timeout(buffer, context.poll_interval) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => {
                if !context.lifecycle.is_running() {
                    context.pool.release(returned);
                    return false;
                }
                buffer = returned;
            }
            Err(SendTimeoutError::Disconnected(returned)) => {
                context.pool.release(returned);
                return false;
            }
        }
    }
}

/// A relay worker and the transmit path it owns
struct RelayWorker {
    id: usize,
    sender: Box<dyn RawSender>,
    rx: Receiver<PacketBuffer>,
    context: RelayContext,
}

impl RelayWorker {
    fn run(mut self) {
        trace!(worker = self.id, "Relay worker started");

        while self.context.lifecycle.is_running() {
            match self.rx.recv_timeout(self.context.poll_interval) {
                Ok(buffer) => self.relay(buffer),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        // Frames still queued are dropped, their buffers go back to the pool
        for buffer in self.rx.try_iter() {
            self.context.pool.release(buffer);
        }
        trace!(worker = self.id, "Relay worker exited");
        // self.sender is dropped here, closing the transmit path
    }

    fn relay(&mut self, buffer: PacketBuffer) {
        match self.sender.send(buffer.frame()) {
            Ok(sent) => {
                trace!(worker = self.id, size = sent, "Relayed frame");
                if let Some(metrics) = &self.context.metrics {
                    metrics.record_relay(sent);
                }
            }
            Err(e) => {
                warn!(worker = self.id, size = buffer.len(), error = %e, "Failed to relay frame");
                if let Some(metrics) = &self.context.metrics {
                    metrics.record_error("relay_send");
                }
            }
        }
        self.context.pool.release(buffer);
    }
}
