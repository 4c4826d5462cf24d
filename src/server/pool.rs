use crate::{
    http::types::StatusCode,
    limits::{OverloadPolicy, ServerLimits},
    server::connection::{self, Engine},
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::{
    io,
    net::{SocketAddr, TcpStream},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};
use tracing::{debug, info, trace, warn};

type Job = (TcpStream, SocketAddr);

#[derive(Debug, Default)]
struct Counters {
    live: AtomicUsize,
    idle: AtomicUsize,
    spawned: AtomicUsize,
}

/// Elastic pool of worker threads fed through a bounded queue.
///
/// Starts with `min_workers` threads and grows one thread at a time, up to
/// `max_workers`, whenever a connection is queued while nobody is idle. Threads
/// above `min_workers` exit after `idle_worker_timeout` without work.
pub(crate) struct WorkerPool<R: 'static> {
    engine: Arc<Engine<R>>,
    limits: ServerLimits,
    counters: Arc<Counters>,

    queue: Option<Sender<Job>>,
    jobs: Receiver<Job>,

    // Each worker holds a clone; disconnection means they have all exited
    done: Option<Sender<()>>,
    all_done: Receiver<()>,
}

impl<R: 'static> WorkerPool<R> {
    pub(crate) fn new(engine: Arc<Engine<R>>, limits: ServerLimits) -> io::Result<Self> {
        let (queue, jobs) = channel::bounded(limits.max_pending_connections);
        let (done, all_done) = channel::bounded(0);

        let pool = Self {
            engine,
            limits,
            counters: Arc::default(),
            queue: Some(queue),
            jobs,
            done: Some(done),
            all_done,
        };

        for _ in 0..pool.limits.min_workers {
            pool.spawn_worker()?;
        }
        Ok(pool)
    }

    /// Hands an accepted connection to the workers, applying the overload
    /// policy when the queue is full.
    pub(crate) fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        let Some(queue) = &self.queue else {
            return;
        };

        match queue.try_send((stream, peer)) {
            Ok(()) => trace!(%peer, "connection queued"),
            Err(TrySendError::Full(job)) => self.overloaded(queue, job),
            Err(TrySendError::Disconnected(_)) => return,
        }

        if self.counters.idle.load(Ordering::Acquire) == 0
            && self.counters.live.load(Ordering::Acquire) < self.limits.max_workers
        {
            if let Err(error) = self.spawn_worker() {
                warn!(%error, "couldn't spawn worker thread");
            }
        }
    }

    fn overloaded(&self, queue: &Sender<Job>, (stream, peer): Job) {
        match self.limits.overload_policy {
            OverloadPolicy::Reject => {
                warn!(%peer, "queue full, rejecting connection");
                connection::refuse(
                    stream,
                    StatusCode::ServiceUnavailable,
                    &self.engine.connection_limits,
                );
            }
            OverloadPolicy::Shed => {
                warn!(%peer, "queue full, dropping connection");
            }
            OverloadPolicy::Block => {
                debug!(%peer, "queue full, waiting for a free slot");
                if queue.send((stream, peer)).is_err() {
                    warn!(%peer, "workers gone, dropping connection");
                }
            }
        }
    }

    fn spawn_worker(&self) -> io::Result<()> {
        let id = self.counters.spawned.fetch_add(1, Ordering::Relaxed);
        let worker = Worker {
            engine: self.engine.clone(),
            counters: self.counters.clone(),
            jobs: self.jobs.clone(),
            min_workers: self.limits.min_workers,
            idle_timeout: self.limits.idle_worker_timeout,
            _done: self.done.clone(),
        };

        self.counters.live.fetch_add(1, Ordering::AcqRel);
        let spawned = thread::Builder::new()
            .name(format!("ember-worker-{id}"))
            .spawn(move || worker.run());

        if spawned.is_err() {
            self.counters.live.fetch_sub(1, Ordering::AcqRel);
        }
        spawned.map(drop)
    }

    /// Stops taking connections and waits up to `timeout` for the workers to
    /// drain the queue and finish what they are running.
    pub(crate) fn shutdown(mut self, timeout: Duration) {
        drop(self.queue.take());
        drop(self.done.take());

        let busy = self.counters.live.load(Ordering::Acquire);
        info!(busy, "waiting for workers to finish");

        match self.all_done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => info!("all workers finished"),
            Err(RecvTimeoutError::Timeout) => warn!(
                busy = self.counters.live.load(Ordering::Acquire),
                ?timeout,
                "shutdown timeout elapsed, leaving busy workers behind"
            ),
        }
    }
}

struct Worker<R: 'static> {
    engine: Arc<Engine<R>>,
    counters: Arc<Counters>,
    jobs: Receiver<Job>,
    min_workers: usize,
    idle_timeout: Duration,
    _done: Option<Sender<()>>,
}

impl<R: 'static> Worker<R> {
    fn run(self) {
        trace!("worker started");

        loop {
            self.counters.idle.fetch_add(1, Ordering::AcqRel);
            let job = self.jobs.recv_timeout(self.idle_timeout);
            self.counters.idle.fetch_sub(1, Ordering::AcqRel);

            match job {
                Ok((stream, peer)) => self.engine.serve(stream, peer),
                Err(RecvTimeoutError::Timeout) if self.retire() => break,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.counters.live.fetch_sub(1, Ordering::AcqRel);
                    break;
                }
            }
        }

        trace!("worker stopped");
    }

    /// Leaves the pool if it is above its floor.
    fn retire(&self) -> bool {
        self.counters
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live > self.min_workers).then(|| live - 1)
            })
            .is_ok()
    }
}
