//! Bounded worker pool with per-key sequencing
//!
//! Worker threads are started lazily, one per runnable job, until the
//! concurrency limit is reached. Jobs submitted with [`Sequencing::Fifo`]
//! share a queue per key: only the head of that queue is ever runnable, so
//! jobs for one key run one after another in submission order while jobs
//! for other keys proceed in parallel.

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{PoolError, Result};
use crate::handle::{Completion, JobHandle, JobId};

/// How a job is ordered relative to other jobs with the same key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Sequencing {
    /// Runs after every earlier FIFO job with the same key has finished
    #[default]
    Fifo,
    /// Runs as soon as a worker is free, regardless of key
    Concurrent,
}

/// Outcome of [`TaskPool::shutdown`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    /// Queued jobs that never started; their handles resolve `PoolShutDown`
    pub cancelled: usize,
    /// Jobs still running when the timeout elapsed; their handles resolve `ShutdownTimeout`
    pub abandoned: usize,
    /// Time spent waiting for running jobs
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// True when every running job finished before the timeout
    pub fn is_clean(&self) -> bool {
        self.abandoned == 0
    }
}

type FailFn = Arc<dyn Fn(PoolError) + Send + Sync>;

struct QueuedJob<K> {
    id: JobId,
    key: Option<K>,
    run: Box<dyn FnOnce() + Send>,
    fail: FailFn,
}

struct PoolState<K> {
    ready: VecDeque<QueuedJob<K>>,
    /// A key is present while one of its FIFO jobs is ready or running
    waiting: HashMap<K, VecDeque<QueuedJob<K>>>,
    running: HashMap<JobId, FailFn>,
    workers: usize,
    idle: usize,
    spawned: usize,
    max_tasks: usize,
    shut_down: bool,
    next_id: u64,
}

impl<K> PoolState<K> {
    fn queued(&self) -> usize {
        self.ready.len() + self.waiting.values().map(VecDeque::len).sum::<usize>()
    }

    /// Mark the pool shut down and take every job that has not started
    fn close(&mut self) -> Vec<QueuedJob<K>> {
        self.shut_down = true;
        let mut cancelled: Vec<QueuedJob<K>> = self.ready.drain(..).collect();
        for (_, queue) in self.waiting.drain() {
            cancelled.extend(queue);
        }
        cancelled
    }
}

impl<K: Eq + Hash> PoolState<K> {

    /// Promote the next FIFO job for `key`, or release the key
    fn advance(&mut self, key: &K) {
        let next = match self.waiting.get_mut(key) {
            Some(queue) => queue.pop_front(),
            None => return,
        };
        match next {
            Some(job) => self.ready.push_back(job),
            None => {
                self.waiting.remove(key);
            }
        }
    }
}

struct Shared<K> {
    state: Mutex<PoolState<K>>,
    /// Signalled when a job becomes runnable or workers should re-check limits
    work: Condvar,
    /// Signalled when a job finishes or a worker exits
    done: Condvar,
}

/// Worker pool running keyed jobs with a bounded concurrency limit
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use task_pool::{Sequencing, TaskPool};
///
/// let pool: TaskPool<u32> = TaskPool::new(2);
/// let handle = pool.submit(7, Sequencing::Fifo, || 6 * 7).unwrap();
/// assert_eq!(handle.wait(), Ok(42));
///
/// let report = pool.shutdown(Duration::from_secs(1));
/// assert!(report.is_clean());
/// ```
pub struct TaskPool<K> {
    shared: Arc<Shared<K>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    name: String,
}

impl<K> TaskPool<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    /// Create a pool allowing `max_tasks` concurrent jobs (at least one)
    pub fn new(max_tasks: usize) -> Self {
        Self::with_name("task-pool", max_tasks)
    }

    /// Create a pool whose worker threads are named `<name>-worker-<n>`
    pub fn with_name(name: impl Into<String>, max_tasks: usize) -> Self {
        let state = PoolState {
            ready: VecDeque::new(),
            waiting: HashMap::new(),
            running: HashMap::new(),
            workers: 0,
            idle: 0,
            spawned: 0,
            max_tasks: max_tasks.max(1),
            shut_down: false,
            next_id: 0,
        };

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                work: Condvar::new(),
                done: Condvar::new(),
            }),
            threads: Mutex::new(Vec::new()),
            name: name.into(),
        }
    }

    /// Queue a job and return a handle to its result
    ///
    /// Panics inside the job are caught and reported as
    /// [`PoolError::Panicked`] on the handle.
    pub fn submit<T, F>(&self, key: K, sequencing: Sequencing, job: F) -> Result<JobHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if state.shut_down {
            return Err(PoolError::PoolShutDown);
        }

        let id = JobId(state.next_id);
        state.next_id += 1;

        let completion = Arc::new(Completion::new());
        let run_completion = Arc::clone(&completion);
        let run: Box<dyn FnOnce() + Send> = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(job))
                .map_err(|payload| PoolError::Panicked(panic_message(payload.as_ref())));
            if let Err(PoolError::Panicked(message)) = &outcome {
                tracing::warn!("{} panicked: {}", id, message);
            }
            if !run_completion.complete(outcome) {
                tracing::debug!("{} finished after its handle was already resolved", id);
            }
        });
        let fail_completion = Arc::clone(&completion);
        let fail: FailFn = Arc::new(move |err| {
            fail_completion.complete(Err(err));
        });

        let queued = QueuedJob {
            id,
            key: match sequencing {
                Sequencing::Fifo => Some(key.clone()),
                Sequencing::Concurrent => None,
            },
            run,
            fail,
        };

        // A key in the waiting map already has a job ahead of this one
        let blocked = match sequencing {
            Sequencing::Fifo => match state.waiting.get_mut(&key) {
                Some(queue) => {
                    queue.push_back(queued);
                    None
                }
                None => {
                    state.waiting.insert(key.clone(), VecDeque::new());
                    Some(queued)
                }
            },
            Sequencing::Concurrent => Some(queued),
        };

        match blocked {
            Some(job) => {
                state.ready.push_back(job);
                tracing::debug!("{} ready (key {:?}, {:?})", id, key, sequencing);
            }
            None => tracing::debug!("{} waiting behind earlier jobs for key {:?}", id, key),
        }

        if let Err(e) = self.spawn_needed(&mut state) {
            if state.workers == 0 {
                // Nothing will ever run the queue; undo and report
                let cancelled = state.close();
                state.shut_down = false;
                drop(state);
                for job in cancelled {
                    (job.fail)(e.clone());
                }
                return Err(e);
            }
            tracing::warn!("Running with {} workers: {}", state.workers, e);
        }

        self.shared.work.notify_one();
        Ok(JobHandle::new(id, completion))
    }

    /// Change the concurrency limit (at least one)
    ///
    /// Raising the limit starts workers for already queued jobs. Lowering it
    /// lets surplus workers exit after their current job.
    pub fn set_max_tasks(&self, max_tasks: usize) {
        let mut state = self.shared.state.lock();
        let max_tasks = max_tasks.max(1);
        if state.max_tasks == max_tasks {
            return;
        }
        tracing::debug!(
            "{}: max tasks {} -> {}",
            self.name,
            state.max_tasks,
            max_tasks
        );
        state.max_tasks = max_tasks;

        if !state.shut_down {
            if let Err(e) = self.spawn_needed(&mut state) {
                tracing::warn!("Could not start additional workers: {}", e);
            }
        }
        self.shared.work.notify_all();
    }

    pub fn max_tasks(&self) -> usize {
        self.shared.state.lock().max_tasks
    }

    /// Number of jobs currently executing
    pub fn running(&self) -> usize {
        self.shared.state.lock().running.len()
    }

    /// Number of jobs submitted but not yet started
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queued()
    }

    /// Number of live worker threads
    pub fn workers(&self) -> usize {
        self.shared.state.lock().workers
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.state.lock().shut_down
    }

    /// Stop accepting jobs and wait up to `timeout` for running ones
    ///
    /// Jobs are never preempted. Queued jobs are cancelled immediately and
    /// jobs still running at the deadline are abandoned: their handles
    /// resolve with [`PoolError::ShutdownTimeout`] and their worker threads
    /// are detached. Calling this again waits for any remaining jobs anew.
    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let start = Instant::now();
        let deadline = start + timeout;

        let mut state = self.shared.state.lock();
        let first = !state.shut_down;
        let cancelled = state.close();
        self.shared.work.notify_all();

        if first {
            tracing::info!(
                "{}: shutting down ({} queued, {} running)",
                self.name,
                cancelled.len(),
                state.running.len()
            );
        }

        let cancelled_count = cancelled.len();
        for job in cancelled {
            (job.fail)(PoolError::PoolShutDown);
        }

        while !state.running.is_empty() {
            if self.shared.done.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        let abandoned: Vec<(JobId, FailFn)> = state
            .running
            .iter()
            .map(|(id, fail)| (*id, Arc::clone(fail)))
            .collect();
        drop(state);

        for (id, fail) in &abandoned {
            tracing::warn!("{}: abandoning {} after shutdown timeout", self.name, id);
            fail(PoolError::ShutdownTimeout);
        }

        if abandoned.is_empty() {
            let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
            for handle in threads {
                if handle.join().is_err() {
                    tracing::error!("{}: worker thread panicked", self.name);
                }
            }
        }

        let report = ShutdownReport {
            cancelled: cancelled_count,
            abandoned: abandoned.len(),
            elapsed: start.elapsed(),
        };
        if first {
            tracing::info!("{}: shutdown complete {:?}", self.name, report);
        }
        report
    }

    /// Start workers until every ready job has one, within the limit
    fn spawn_needed(&self, state: &mut PoolState<K>) -> Result<()> {
        loop {
            // Workers not running a job will pick up ready work
            let available = state.workers.saturating_sub(state.running.len());
            if available >= state.ready.len() || state.workers >= state.max_tasks {
                return Ok(());
            }

            state.spawned += 1;
            let thread_name = format!("{}-worker-{}", self.name, state.spawned);
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker_loop(shared))
                .map_err(|e| PoolError::Spawn(e.to_string()))?;

            state.workers += 1;
            tracing::debug!("Started {}", thread_name);

            let mut threads = self.threads.lock();
            threads.retain(|t| !t.is_finished());
            threads.push(handle);
        }
    }
}

impl<K> Drop for TaskPool<K> {
    fn drop(&mut self) {
        let cancelled = {
            let mut state = self.shared.state.lock();
            if state.shut_down {
                return;
            }
            state.close()
        };
        self.shared.work.notify_all();
        for job in cancelled {
            (job.fail)(PoolError::PoolShutDown);
        }
    }
}

impl<K> Debug for TaskPool<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TaskPool")
            .field("name", &self.name)
            .field("max_tasks", &state.max_tasks)
            .field("workers", &state.workers)
            .field("running", &state.running.len())
            .field("shut_down", &state.shut_down)
            .finish()
    }
}

fn worker_loop<K: Eq + Hash>(shared: Arc<Shared<K>>) {
    let mut state = shared.state.lock();
    loop {
        if state.shut_down || state.workers > state.max_tasks {
            break;
        }

        let Some(job) = state.ready.pop_front() else {
            state.idle += 1;
            shared.work.wait(&mut state);
            state.idle -= 1;
            continue;
        };

        let QueuedJob { id, key, run, fail } = job;
        state.running.insert(id, fail);
        MutexGuard::unlocked(&mut state, run);
        state.running.remove(&id);
        if let Some(key) = key {
            state.advance(&key);
        }
        shared.done.notify_all();
    }

    state.workers -= 1;
    if !state.ready.is_empty() {
        shared.work.notify_one();
    }
    shared.done.notify_all();
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
