//! Deterministic single-threaded executor for tests and demos.
//!
//! [`Lab`] drives stream futures cooperatively on one thread: tasks run
//! from a FIFO ready queue, and whenever nothing is runnable the executor
//! turns the reactor to wait for readiness or timer wakeups. Scheduling is
//! deterministic — wakeup order is the order wakeups were issued.
//!
//! This is test tooling, not a scheduler surface: production embedders
//! drive streams from their own task system and reactor loop.
//!
//! # Example
//!
//! ```ignore
//! let reactor = PollReactor::new()?;
//! let mut lab = Lab::new(reactor.handle());
//! let stream = MemoryStream::new(0);
//! let writer = stream.clone();
//! lab.spawn(async move {
//!     writer.write(b"hello", Duration::ZERO).await.unwrap();
//! });
//! let bytes = lab.block_on(async move { stream.read(0, None, Duration::ZERO).await })?;
//! ```

use crate::reactor::Handle;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

/// Task id of the `block_on` future.
const MAIN: usize = usize::MAX;

struct ReadyQueue {
    ready: Mutex<VecDeque<usize>>,
}

struct TaskWaker {
    queue: Arc<ReadyQueue>,
    id: usize,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.queue.ready.lock().push_back(self.id);
    }
}

type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

/// Deterministic single-threaded executor bound to one reactor.
pub struct Lab {
    handle: Handle,
    queue: Arc<ReadyQueue>,
    tasks: Vec<Option<LocalFuture>>,
}

impl Lab {
    /// Creates an executor driving `handle`.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            queue: Arc::new(ReadyQueue {
                ready: Mutex::new(VecDeque::new()),
            }),
            tasks: Vec::new(),
        }
    }

    /// Returns the reactor handle this executor drives.
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Queues a background task. Tasks start running inside
    /// [`block_on`](Self::block_on), in spawn order.
    pub fn spawn(&mut self, fut: impl Future<Output = ()> + 'static) {
        let id = self.tasks.len();
        self.tasks.push(Some(Box::pin(fut)));
        self.queue.ready.lock().push_back(id);
    }

    /// Runs `fut` to completion, driving spawned tasks and the reactor.
    ///
    /// # Panics
    ///
    /// Panics on deadlock — nothing runnable while the reactor has no armed
    /// watcher or pending timer — and on a reactor turn error.
    pub fn block_on<T>(&mut self, fut: impl Future<Output = T>) -> T {
        let mut main = std::pin::pin!(fut);
        let main_waker = self.waker(MAIN);
        self.queue.ready.lock().push_back(MAIN);

        loop {
            while let Some(id) = self.pop_ready() {
                if id == MAIN {
                    let mut cx = Context::from_waker(&main_waker);
                    if let Poll::Ready(value) = main.as_mut().poll(&mut cx) {
                        return value;
                    }
                } else {
                    self.poll_task(id);
                }
            }
            assert!(
                self.handle.has_armed(),
                "lab deadlock: no runnable task and reactor idle"
            );
            self.handle
                .turn(None)
                .expect("lab reactor turn failed");
        }
    }

    /// Runs until all spawned tasks have completed.
    ///
    /// # Panics
    ///
    /// Panics on deadlock, like [`block_on`](Self::block_on).
    pub fn run_until_idle(&mut self) {
        loop {
            while let Some(id) = self.pop_ready() {
                if id != MAIN {
                    self.poll_task(id);
                }
            }
            if self.tasks.iter().all(Option::is_none) {
                return;
            }
            assert!(
                self.handle.has_armed(),
                "lab deadlock: no runnable task and reactor idle"
            );
            self.handle
                .turn(None)
                .expect("lab reactor turn failed");
        }
    }

    fn waker(&self, id: usize) -> Waker {
        Waker::from(Arc::new(TaskWaker {
            queue: self.queue.clone(),
            id,
        }))
    }

    fn pop_ready(&self) -> Option<usize> {
        self.queue.ready.lock().pop_front()
    }

    fn poll_task(&mut self, id: usize) {
        let Some(slot) = self.tasks.get_mut(id) else {
            return;
        };
        let Some(task) = slot.as_mut() else {
            return; // completed task woken again; spurious
        };
        let waker = Waker::from(Arc::new(TaskWaker {
            queue: self.queue.clone(),
            id,
        }));
        let mut cx = Context::from_waker(&waker);
        if task.as_mut().poll(&mut cx).is_ready() {
            self.tasks[id] = None;
        }
    }
}

impl std::fmt::Debug for Lab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lab")
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}
