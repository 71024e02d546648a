//! Single-threaded cooperative event loops.
//!
//! An [`EventLoopGroup`] owns a fixed set of threads, each running a
//! current-thread tokio runtime. Every connection is registered with exactly
//! one [`EventLoop`] and all of its pipeline work runs there. Work is handed
//! to a loop with [`EventLoop::spawn`]; nothing ever blocks a loop thread.
//!
//! [`SharedEventLoopGroup`] is an explicit, reference-counted handle that
//! creates its group lazily on the first [`SharedEventLoopGroup::acquire`]
//! and shuts it down when the last reference is released.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::ThreadId;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{NioError, NioResult};

/// A single event loop thread.
#[derive(Clone)]
pub struct EventLoop {
    inner: Arc<EventLoopInner>,
}

struct EventLoopInner {
    index: usize,
    handle: Handle,
    thread_id: ThreadId,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    terminated: watch::Receiver<bool>,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("index", &self.inner.index)
            .field("thread_id", &self.inner.thread_id)
            .finish_non_exhaustive()
    }
}

impl EventLoop {
    fn start(group_name: &str, index: usize) -> NioResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| NioError::io("failed to build event loop runtime", e))?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (terminated_tx, terminated_rx) = watch::channel(false);

        let thread = std::thread::Builder::new()
            .name(format!("{group_name}-{index}"))
            .spawn(move || {
                runtime.block_on(async {
                    // Resolves on an explicit shutdown or when the group is dropped.
                    let _ = shutdown_rx.await;
                });
                runtime.shutdown_background();
                terminated_tx.send_replace(true);
            })
            .map_err(|e| NioError::io("failed to spawn event loop thread", e))?;

        Ok(Self {
            inner: Arc::new(EventLoopInner {
                index,
                handle,
                thread_id: thread.thread().id(),
                shutdown: Mutex::new(Some(shutdown_tx)),
                terminated: terminated_rx,
            }),
        })
    }

    /// Position of this loop within its group.
    #[must_use]
    pub fn index(&self) -> usize {
        self.inner.index
    }

    /// Thread driving this loop.
    #[must_use]
    pub fn thread_id(&self) -> ThreadId {
        self.inner.thread_id
    }

    /// Whether the calling thread is this loop's thread.
    #[must_use]
    pub fn in_event_loop(&self) -> bool {
        std::thread::current().id() == self.inner.thread_id
    }

    /// Runtime handle of this loop.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Schedule a task on this loop.
    ///
    /// After shutdown the task is dropped without running and its handle
    /// resolves with a cancellation error.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.handle.spawn(future)
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.lock().is_none()
    }

    fn shutdown(&self) {
        if let Some(tx) = self.inner.shutdown.lock().take() {
            let _ = tx.send(());
        }
    }

    async fn terminated(&self) {
        let mut rx = self.inner.terminated.clone();
        // An error means the thread is gone, which is termination as well.
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// A fixed group of event loops handed out round-robin.
#[derive(Clone)]
pub struct EventLoopGroup {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    loops: Vec<EventLoop>,
    next: AtomicUsize,
    shut_down: AtomicBool,
}

impl fmt::Debug for EventLoopGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopGroup")
            .field("loops", &self.inner.loops.len())
            .field("shut_down", &self.inner.shut_down.load(Ordering::Relaxed))
            .finish()
    }
}

impl EventLoopGroup {
    /// Start a group of `threads` loops named `rustack-nio-event-loop-N`.
    pub fn new(threads: usize) -> NioResult<Self> {
        Self::with_name("rustack-nio-event-loop", threads)
    }

    /// Start a group whose threads are named `{name}-N`.
    pub fn with_name(name: &str, threads: usize) -> NioResult<Self> {
        if threads == 0 {
            return Err(NioError::Config(
                "an event loop group needs at least one thread".to_owned(),
            ));
        }
        let loops = (0..threads)
            .map(|index| EventLoop::start(name, index))
            .collect::<NioResult<Vec<_>>>()?;
        debug!(threads, name, "started event loop group");
        Ok(Self {
            inner: Arc::new(GroupInner {
                loops,
                next: AtomicUsize::new(0),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Next loop, round-robin.
    #[must_use]
    pub fn next(&self) -> EventLoop {
        let i = self.inner.next.fetch_add(1, Ordering::Relaxed) % self.inner.loops.len();
        self.inner.loops[i].clone()
    }

    /// All loops of this group.
    #[must_use]
    pub fn loops(&self) -> &[EventLoop] {
        &self.inner.loops
    }

    /// Whether the calling thread belongs to this group.
    #[must_use]
    pub fn in_event_loop(&self) -> bool {
        self.inner.loops.iter().any(EventLoop::in_event_loop)
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Ask every loop to stop. Tasks still queued are dropped.
    pub fn shutdown_gracefully(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(threads = self.inner.loops.len(), "shutting down event loop group");
        for event_loop in &self.inner.loops {
            event_loop.shutdown();
        }
    }

    /// Resolve once every loop thread has exited.
    pub async fn terminated(&self) {
        for event_loop in &self.inner.loops {
            event_loop.terminated().await;
        }
    }
}

/// Explicit shared handle to a lazily created, reference-counted group.
pub struct SharedEventLoopGroup {
    threads: usize,
    state: Mutex<SharedState>,
}

#[derive(Default)]
struct SharedState {
    group: Option<EventLoopGroup>,
    references: usize,
}

impl fmt::Debug for SharedEventLoopGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SharedEventLoopGroup")
            .field("threads", &self.threads)
            .field("references", &state.references)
            .field("started", &state.group.is_some())
            .finish()
    }
}

impl SharedEventLoopGroup {
    /// Create a handle; no thread starts until the first acquire.
    #[must_use]
    pub fn new(threads: usize) -> Arc<Self> {
        Arc::new(Self {
            threads,
            state: Mutex::new(SharedState::default()),
        })
    }

    /// Take a reference, starting the group if this is the first one.
    pub fn acquire(self: &Arc<Self>) -> NioResult<SharedEventLoopGroupRef> {
        let mut state = self.state.lock();
        let group = match &state.group {
            Some(group) => group.clone(),
            None => {
                let group = EventLoopGroup::with_name("rustack-nio-shared-event-loop", self.threads)?;
                state.group = Some(group.clone());
                group
            }
        };
        state.references += 1;
        Ok(SharedEventLoopGroupRef {
            owner: Arc::clone(self),
            group,
            released: AtomicBool::new(false),
        })
    }

    /// Number of outstanding references.
    #[must_use]
    pub fn reference_count(&self) -> usize {
        self.state.lock().references
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.references = state.references.saturating_sub(1);
        if state.references == 0 {
            if let Some(group) = state.group.take() {
                group.shutdown_gracefully();
            }
        }
    }
}

/// One reference to a [`SharedEventLoopGroup`].
///
/// Releasing is idempotent; dropping an unreleased reference releases it.
pub struct SharedEventLoopGroupRef {
    owner: Arc<SharedEventLoopGroup>,
    group: EventLoopGroup,
    released: AtomicBool,
}

impl fmt::Debug for SharedEventLoopGroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEventLoopGroupRef")
            .field("group", &self.group)
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish()
    }
}

impl SharedEventLoopGroupRef {
    /// The shared group.
    #[must_use]
    pub fn group(&self) -> &EventLoopGroup {
        &self.group
    }

    /// Give the reference back. Only the last release shuts the group down.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            warn!("shared event loop group reference released twice");
            return;
        }
        self.owner.release();
    }
}

impl Drop for SharedEventLoopGroupRef {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.owner.release();
        }
    }
}
