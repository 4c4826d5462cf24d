//! Engine configuration: worker pool sizing, socket timeouts and parser limits
//!
//! Every struct here has conservative defaults; override only the fields you
//! care about:
//!
//! ```no_run
//! # use ember_http::Response;
//! use ember_http::{Server, limits::{ReqLimits, ServerLimits}};
//!
//! let server = Server::builder()
//!     .port(8080)
//!     .server_limits(ServerLimits {
//!         max_workers: 64, // More parallel connections
//!         ..ServerLimits::default()
//!     })
//!     .request_limits(ReqLimits {
//!         body_ceiling: 1024 * 1024, // 1 MiB without Content-Length
//!         ..ReqLimits::default()
//!     })
//!     .start(|_: &ember_http::Request| Response::new())
//!     .unwrap();
//!
//! server.join();
//! ```

use crate::errors::Error;
use std::time::Duration;

/// Controls the acceptor and the worker pool behind it.
///
/// # Connection management
/// ```text
///                          [------------]
///                          [ Tcp accept ] <=== accept_timeout elapses: check stop signal
///                          [------------]
///                                ||
///                                || TCP_STREAM
///                                \/
/// [--------------]  Yes  /-----------------\  No   [-----------------]
/// [ Add to queue ] <==== | Room in queue?  | ====> [ overload_policy ]
/// [--------------]       \-----------------/       [-----------------]
///        ||
///        \/
/// [---------]   Yes   /--------------------------\   No   [------------------------]
/// [ Worker  ] <====== | Is there an idle worker? | =====> [ Spawn one if < max,    ]
/// [---------]         \--------------------------/        [ otherwise wait in queue ]
/// ```
///
/// Each worker runs one connection to completion (parse, handle, write, close)
/// before taking the next one from the queue.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Workers kept alive even when idle, at least one (default: `1`).
    pub min_workers: usize,

    /// Maximum number of connections processed in parallel (default: `20`).
    pub max_workers: usize,

    /// Capacity of the queue between the acceptor and the workers (default: `256`).
    ///
    /// When it is full, [`overload_policy`](Self::overload_policy) decides what
    /// happens to the freshly accepted connection.
    pub max_pending_connections: usize,

    /// What to do with a connection that doesn't fit in the queue (default: [`OverloadPolicy::Reject`]).
    pub overload_policy: OverloadPolicy,

    /// How long a worker above `min_workers` may sit idle before exiting (default: `30 seconds`).
    pub idle_worker_timeout: Duration,

    /// How long a single `accept` may block before the stop signal is checked (default: `1 second`).
    pub accept_timeout: Duration,

    /// How long [`Server::join`](crate::Server::join) waits for in-flight work after
    /// a stop (default: `60 seconds`).
    ///
    /// Best effort: workers still busy after the deadline are left running.
    pub shutdown_timeout: Duration,

    /// Listen backlog handed to the OS (default: `None`, meaning `max_workers * 4`).
    pub listen_backlog: Option<i32>,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 20,
            max_pending_connections: 256,
            overload_policy: OverloadPolicy::Reject,
            idle_worker_timeout: Duration::from_secs(30),
            accept_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(60),
            listen_backlog: None,
        }
    }
}

impl ServerLimits {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        // A zero floor could let the last worker retire with a job still queued
        if self.min_workers == 0 {
            return Err(Error::InvalidLimits("min_workers must be at least 1"));
        }
        if self.min_workers > self.max_workers {
            return Err(Error::InvalidLimits("min_workers exceeds max_workers"));
        }
        if self.max_pending_connections == 0 {
            return Err(Error::InvalidLimits(
                "max_pending_connections must be at least 1",
            ));
        }
        if self.accept_timeout.is_zero() {
            return Err(Error::InvalidLimits("accept_timeout must be non-zero"));
        }
        Ok(())
    }

    pub(crate) fn backlog(&self) -> i32 {
        self.listen_backlog.unwrap_or_else(|| {
            i32::try_from(self.max_workers.saturating_mul(4)).unwrap_or(i32::MAX)
        })
    }
}

/// What the acceptor does with a connection when the pending queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverloadPolicy {
    /// Answer `HTTP/1.0 503 Service Unavailable` and close.
    Reject,
    /// Close the connection without writing anything.
    Shed,
    /// Hold the acceptor until a slot frees up. New connections pile up in the
    /// OS listen backlog meanwhile.
    Block,
}

/// Per-connection socket timeouts.
///
/// Both default to `None`: a client that stalls mid-request holds its worker
/// until the OS gives up on the socket. Set them to bound that.
#[derive(Debug, Clone, Default)]
pub struct ConnLimits {
    /// Maximum time a single read from the client may block.
    pub socket_read_timeout: Option<Duration>,

    /// Maximum time a single write to the client may block.
    pub socket_write_timeout: Option<Duration>,
}

/// Limits applied while parsing a request.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Longest accepted request or header line, terminator excluded (default: `8 KiB`).
    pub max_line_length: usize,

    /// Maximum number of header lines, continuations included (default: `128`).
    pub max_headers: usize,

    /// Bytes read for a body without a usable `Content-Length` (default: `16 MiB`).
    pub body_ceiling: u64,

    /// Size of each read while consuming the body (default: `4096`).
    pub body_chunk_size: usize,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            max_line_length: 8 * 1024,
            max_headers: 128,
            body_ceiling: 16 * 1024 * 1024,
            body_chunk_size: 4096,
        }
    }
}
