//! Deferred-work bridge for real-time plugin hosting.
//!
//! Real-time thread -> shared request ring -> queue thread -> per-worker
//! response ring -> real-time thread.
//!
//! One [`WorkQueue`] owns one background thread servicing every registered
//! [`Worker`]. All requests travel through a single shared channel and are
//! dispatched in strict submission order, even when several workers
//! interleave; responses travel through each worker's private channel, so
//! the real-time side never contends with another worker's traffic.

use crate::ring::RingBuffer;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Request frames carry a size prefix plus the owning worker's id.
const REQUEST_HEADER: usize = 8;
/// Response frames carry a size prefix only.
const RESPONSE_HEADER: usize = 4;

const DEFAULT_REQUEST_CAPACITY: usize = 2048;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WorkError {
    /// The channel lacks `size + frame-header` bytes of free space.
    /// Non-fatal; the caller decides whether to retry or drop.
    #[error("not enough space in the work channel")]
    NoSpace,
    /// Empty payloads are never scheduled.
    #[error("empty work payload")]
    Empty,
    /// The worker was deregistered, or the queue is shutting down.
    #[error("worker is not registered with a running queue")]
    Unregistered,
}

/// Receives requests on the queue thread and responses on the real-time
/// thread. `process_request` must not stall: there is one consumer thread,
/// so a stalled request delays every other worker's pending requests.
pub trait WorkHandler: Send + Sync {
    /// Called on the queue thread, in FIFO submission order across all
    /// workers. Use `responder` to push a reply toward the real-time side.
    fn process_request(&self, data: &[u8], responder: &WorkResponder<'_>);

    /// Called on the real-time side for each drained response frame.
    fn process_response(&self, data: &[u8]);
}

/// Writes response frames into the owning worker's private channel.
/// Handed to [`WorkHandler::process_request`]; also the target of the
/// host-side respond callback in FFI bridges.
pub struct WorkResponder<'a> {
    ring: &'a RingBuffer,
}

impl WorkResponder<'_> {
    pub fn respond(&self, data: &[u8]) -> Result<(), WorkError> {
        write_response_frame(self.ring, data)
    }
}

fn write_response_frame(ring: &RingBuffer, data: &[u8]) -> Result<(), WorkError> {
    if !ring.can_write(RESPONSE_HEADER + data.len()) {
        return Err(WorkError::NoSpace);
    }
    ring.write(&(data.len() as u32).to_ne_bytes());
    ring.write(data);
    Ok(())
}

struct WorkerInner {
    id: u32,
    responses: RingBuffer,
    working: AtomicBool,
    /// Cleared when the owning [`Worker`] deregisters, so the scheduling
    /// path can refuse without touching the registry lock.
    alive: AtomicBool,
    handler: Arc<dyn WorkHandler>,
}

struct Shared {
    requests: RingBuffer,
    workers: Mutex<Vec<Arc<WorkerInner>>>,
    wake_tx: crossbeam_channel::Sender<()>,
    next_id: AtomicU32,
    running: AtomicBool,
}

impl Shared {
    fn worker(&self, id: u32) -> Option<Arc<WorkerInner>> {
        if id == 0 {
            return None;
        }
        self.workers.lock().iter().find(|w| w.id == id).cloned()
    }

    /// Lock-free: liveness is two atomic loads, so the real-time side
    /// never contends with register/deregister on the registry lock. A
    /// frame that races a deregistration is consumed and dropped on the
    /// queue thread.
    fn schedule(&self, worker: &WorkerInner, data: &[u8]) -> Result<(), WorkError> {
        if data.is_empty() {
            return Err(WorkError::Empty);
        }
        if !self.running.load(Ordering::Acquire) || !worker.alive.load(Ordering::Acquire) {
            return Err(WorkError::Unregistered);
        }
        if !self.requests.can_write(REQUEST_HEADER + data.len()) {
            return Err(WorkError::NoSpace);
        }
        self.requests.write(&(data.len() as u32).to_ne_bytes());
        self.requests.write(&worker.id.to_ne_bytes());
        self.requests.write(data);
        // One wake per frame. The wake channel holds at least as many
        // tokens as the ring holds frames, so a full channel already
        // implies a pending wake.
        let _ = self.wake_tx.try_send(());
        Ok(())
    }

    /// A frame is ready once its size prefix and full payload are
    /// readable. A visible prefix without its payload means the producer
    /// is mid-frame: wait for more producer activity.
    fn request_ready(&self) -> bool {
        let mut prefix = [0u8; 4];
        if self.requests.peek(&mut prefix) == 0 {
            return false;
        }
        let size = u32::from_ne_bytes(prefix) as usize;
        self.requests.can_read(REQUEST_HEADER + size)
    }
}

/// Background work queue shared by many workers.
///
/// The thread is spawned at construction and joined on drop.
pub struct WorkQueue {
    shared: Arc<Shared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WorkQueue {
    pub fn new(name: &str) -> Self {
        Self::with_capacity(name, DEFAULT_REQUEST_CAPACITY)
    }

    /// `request_capacity` is rounded up to a power of two.
    pub fn with_capacity(name: &str, request_capacity: usize) -> Self {
        let requests = RingBuffer::new(request_capacity);
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(requests.capacity());
        let shared = Arc::new(Shared {
            requests,
            workers: Mutex::new(Vec::new()),
            wake_tx,
            next_id: AtomicU32::new(1),
            running: AtomicBool::new(true),
        });

        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || queue_main(thread_shared, wake_rx))
            .expect("failed to spawn work queue thread");

        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Bytes a request with `size` payload bytes occupies in the channel.
    pub fn required_space(size: usize) -> usize {
        size + REQUEST_HEADER
    }

    /// Register a handler for scheduling. Worker ids are assigned
    /// monotonically starting at 1; id 0 is reserved as invalid.
    pub fn register(&self, handler: Arc<dyn WorkHandler>, response_capacity: usize) -> Worker {
        let inner = Arc::new(WorkerInner {
            id: self.shared.next_id.fetch_add(1, Ordering::Relaxed),
            responses: RingBuffer::new(response_capacity),
            working: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            handler,
        });
        tracing::debug!(id = inner.id, "registering worker");
        self.shared.workers.lock().push(Arc::clone(&inner));
        Worker {
            inner,
            shared: Arc::clone(&self.shared),
            scratch: vec![0; response_capacity],
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        let _ = self.shared.wake_tx.try_send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn queue_main(shared: Arc<Shared>, wake_rx: crossbeam_channel::Receiver<()>) {
    let mut scratch: Vec<u8> = Vec::new();

    'outer: while wake_rx.recv().is_ok() {
        if !shared.running.load(Ordering::Acquire) {
            break;
        }

        // Each wake corresponds to one scheduled frame. The frame may not
        // be fully visible yet; an incomplete frame is a wait condition,
        // never an error.
        while !shared.request_ready() {
            if !shared.running.load(Ordering::Acquire) {
                break 'outer;
            }
            thread::sleep(Duration::from_millis(1));
        }

        let mut prefix = [0u8; 4];
        if shared.requests.read(&mut prefix) == 0 {
            continue;
        }
        let size = u32::from_ne_bytes(prefix) as usize;

        let mut id_bytes = [0u8; 4];
        if shared.requests.read(&mut id_bytes) == 0 {
            tracing::warn!("work queue: request missing worker id");
            continue;
        }
        let id = u32::from_ne_bytes(id_bytes);

        if scratch.len() < size {
            scratch.resize(size.next_power_of_two(), 0);
        }
        if shared.requests.read(&mut scratch[..size]) < size {
            tracing::warn!(id, size, "work queue: request missing payload");
            continue;
        }

        // The worker may have deregistered since scheduling; the payload
        // is consumed either way to keep the channel framed.
        let Some(worker) = shared.worker(id) else {
            tracing::debug!(id, "dropping request for deregistered worker");
            continue;
        };

        worker.working.store(true, Ordering::Release);
        let responder = WorkResponder {
            ring: &worker.responses,
        };
        worker.handler.process_request(&scratch[..size], &responder);
        worker.working.store(false, Ordering::Release);
    }
}

/// One registered participant in a [`WorkQueue`].
///
/// Owned by whatever drives the real-time side of the bridge; the queue
/// thread reaches it through the shared registry. Deregisters on drop,
/// waiting out an in-flight request first.
pub struct Worker {
    inner: Arc<WorkerInner>,
    shared: Arc<Shared>,
    scratch: Vec<u8>,
}

impl Worker {
    pub fn id(&self) -> u32 {
        self.inner.id
    }

    /// True while the queue thread is inside `process_request`. Advisory
    /// only: it is never set on the scheduling path, so callers that need
    /// single-outstanding-work semantics must self-throttle.
    pub fn is_working(&self) -> bool {
        self.inner.working.load(Ordering::Acquire)
    }

    /// Schedule deferred work (real-time thread). Non-blocking and
    /// lock-free: fails fast with [`WorkError::NoSpace`] when the shared
    /// channel lacks room, leaving the channel untouched.
    pub fn schedule(&self, data: &[u8]) -> Result<(), WorkError> {
        self.shared.schedule(&self.inner, data)
    }

    /// Cheap cloneable handle for scheduling from FFI callbacks.
    pub fn scheduler(&self) -> WorkScheduler {
        WorkScheduler {
            shared: Arc::clone(&self.shared),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Push a response frame directly (work-thread side of the bridge).
    pub fn write_response(&self, data: &[u8]) -> Result<(), WorkError> {
        write_response_frame(&self.inner.responses, data)
    }

    /// Drain every complete response frame, invoking
    /// [`WorkHandler::process_response`] per frame (real-time thread).
    /// Returns the number of frames delivered.
    pub fn process_responses(&mut self) -> usize {
        let mut delivered = 0;
        while self.process_one_response() {
            delivered += 1;
        }
        delivered
    }

    /// Drain at most one complete response frame (real-time thread).
    /// Returns true if a frame was delivered.
    pub fn process_one_response(&mut self) -> bool {
        let ring = &self.inner.responses;
        let mut prefix = [0u8; 4];
        if ring.peek(&mut prefix) == 0 {
            return false;
        }
        let size = u32::from_ne_bytes(prefix) as usize;
        // deliver next cycle if the payload isn't complete yet
        if size > 0 && !ring.can_read(RESPONSE_HEADER + size) {
            return false;
        }
        ring.skip(RESPONSE_HEADER);
        if self.scratch.len() < size {
            self.scratch.resize(size.next_power_of_two(), 0);
        }
        if size > 0 && ring.read(&mut self.scratch[..size]) < size {
            return false;
        }
        self.inner.handler.process_response(&self.scratch[..size]);
        true
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.inner.alive.store(false, Ordering::Release);
        while self.is_working() {
            thread::sleep(Duration::from_millis(1));
        }
        tracing::debug!(id = self.inner.id, "removing worker");
        self.shared.workers.lock().retain(|w| w.id != self.inner.id);
    }
}

/// Cloneable scheduling handle decoupled from the [`Worker`]'s lifetime.
/// Scheduling after the worker deregistered fails with
/// [`WorkError::Unregistered`].
#[derive(Clone)]
pub struct WorkScheduler {
    shared: Arc<Shared>,
    inner: Arc<WorkerInner>,
}

impl WorkScheduler {
    pub fn schedule(&self, data: &[u8]) -> Result<(), WorkError> {
        self.shared.schedule(&self.inner, data)
    }
}
