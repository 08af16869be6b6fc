//! Completion callback execution. The endpoint never runs a user callback on
//! the thread that observed the OS completion; it hands the fire-and-reset
//! step to an [Executor], which may run it on any worker thread. The bundled
//! [ThreadPool] is a plain run-queue pool; anything that can run a boxed
//! closure from any thread satisfies the trait.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::{cmp, fmt, io, thread};

use crossbeam_utils::sync::WaitGroup;

/// A unit of work scheduled onto an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs completion closures. Implementations must tolerate `run` being called
/// from any thread, including from within a job they are currently executing
/// (a completion callback arming the next operation ends up here).
pub trait Executor: Send + Sync {
    fn run(&self, job: Job);
}

enum Message {
    Run(Job),
    Close,
}

struct PoolState {
    tx: Mutex<Sender<Message>>,
    rx: Mutex<Receiver<Message>>,
    cnt: AtomicUsize,
    size: usize,
}

impl PoolState {
    fn send(&self, msg: Message) {
        self.tx
            .lock()
            .expect("executor sender lock poisoned")
            .send(msg)
            .expect("executor channel closed");
    }

    fn work(&self) {
        loop {
            let msg = self.rx.lock().expect("executor receiver lock poisoned").recv();
            match msg {
                Ok(Message::Run(job)) => job(),
                Ok(Message::Close) | Err(_) => break,
            }
        }
    }
}

/// A fixed-size worker pool draining a shared run queue. Cloning shares the
/// pool; the workers shut down when the last clone is dropped.
pub struct ThreadPool {
    state: Arc<PoolState>,
    wg: Option<WaitGroup>,
}

impl ThreadPool {
    /// A pool with one worker per CPU and default thread naming.
    pub fn new() -> io::Result<ThreadPool> {
        ThreadPoolBuilder::new().create()
    }

    pub fn builder() -> ThreadPoolBuilder {
        ThreadPoolBuilder::new()
    }

    /// Block until every worker has exited. Meaningful only after all other
    /// clones of the pool have been dropped.
    pub fn wait(mut self) {
        let wg = self.wg.take();
        drop(self);
        if let Some(wg) = wg {
            wg.wait();
        }
    }
}

impl Executor for ThreadPool {
    fn run(&self, job: Job) {
        self.state.send(Message::Run(job));
    }
}

impl Clone for ThreadPool {
    fn clone(&self) -> Self {
        self.state.cnt.fetch_add(1, Ordering::Relaxed);
        ThreadPool {
            state: self.state.clone(),
            wg: self.wg.clone(),
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if self.state.cnt.fetch_sub(1, Ordering::Relaxed) == 1 {
            for _ in 0..self.state.size {
                self.state.send(Message::Close);
            }
        }
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("size", &self.state.size)
            .finish()
    }
}

/// Worker pool configuration.
pub struct ThreadPoolBuilder {
    pool_size: usize,
    stack_size: usize,
    name_prefix: Option<String>,
}

impl ThreadPoolBuilder {
    pub fn new() -> ThreadPoolBuilder {
        ThreadPoolBuilder {
            pool_size: cmp::max(1, num_cpus::get()),
            stack_size: 0,
            name_prefix: None,
        }
    }

    /// Number of worker threads. Panics on zero.
    pub fn pool_size(&mut self, size: usize) -> &mut Self {
        assert!(size > 0);
        self.pool_size = size;
        self
    }

    /// Worker stack size in bytes; zero keeps the platform default.
    pub fn stack_size(&mut self, stack_size: usize) -> &mut Self {
        self.stack_size = stack_size;
        self
    }

    /// Prefix for worker thread names, e.g. `rpc-io-` yields `rpc-io-0` etc.
    pub fn name_prefix<S: Into<String>>(&mut self, name_prefix: S) -> &mut Self {
        self.name_prefix = Some(name_prefix.into());
        self
    }

    pub fn create(&mut self) -> io::Result<ThreadPool> {
        let (tx, rx) = mpsc::channel();
        let wg = WaitGroup::new();
        let state = Arc::new(PoolState {
            tx: Mutex::new(tx),
            rx: Mutex::new(rx),
            cnt: AtomicUsize::new(1),
            size: self.pool_size,
        });

        for counter in 0..self.pool_size {
            let state = state.clone();
            let wg = wg.clone();
            let mut builder = thread::Builder::new();
            if let Some(ref prefix) = self.name_prefix {
                builder = builder.name(format!("{}{}", prefix, counter));
            }
            if self.stack_size > 0 {
                builder = builder.stack_size(self.stack_size);
            }
            builder.spawn(move || {
                state.work();
                drop(wg)
            })?;
        }

        Ok(ThreadPool {
            state,
            wg: Some(wg),
        })
    }
}

impl Default for ThreadPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}
