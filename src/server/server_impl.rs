use crate::{
    errors::Error,
    http::{request::Request, response::Response},
    limits::{ConnLimits, ReqLimits, ServerLimits},
    server::{connection::Engine, pool::WorkerPool},
};
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, error, info, warn};

/// Turns each request into a response.
///
/// Called on worker threads, possibly many at once, so `&self` is shared.
/// Closures `Fn(&R) -> Response` implement it directly.
///
/// A panic inside `handle` is caught: the client gets an empty
/// `500 Internal Server Error` and the worker moves on.
///
/// # Examples
///
/// A closure:
/// ```
/// use ember_http::{Handler, Request, Response};
///
/// fn assert_handler(_: impl Handler) {}
///
/// assert_handler(|request: &Request| {
///     let mut response = Response::new();
///     response.text(request.path());
///     response
/// });
/// ```
/// A struct with shared state:
/// ```
/// use ember_http::{Handler, Request, Response, StatusCode};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// struct Counter(AtomicUsize);
///
/// impl Handler for Counter {
///     fn handle(&self, _: &Request) -> Response {
///         let count = self.0.fetch_add(1, Ordering::Relaxed) + 1;
///
///         let mut response = Response::new();
///         response.status(StatusCode::Ok).text(&format!("request #{count}"));
///         response
///     }
/// }
/// ```
pub trait Handler<R = Request>
where
    Self: Send + Sync + 'static,
{
    fn handle(&self, request: &R) -> Response;
}

impl<R, F> Handler<R> for F
where
    F: Fn(&R) -> Response + Send + Sync + 'static,
{
    #[inline]
    fn handle(&self, request: &R) -> Response {
        self(request)
    }
}

/// Builds the request value a [`Handler`] receives from an accepted connection.
///
/// The default is [`Request::from_stream`]. An `Err` closes the connection
/// without a response.
pub type RequestFactory<R> =
    Arc<dyn Fn(TcpStream, &ReqLimits) -> Result<R, Error> + Send + Sync + 'static>;

/// A running HTTP/1.0 engine.
///
/// Each accepted connection carries exactly one request: it is parsed, handed
/// to the [`Handler`], answered and closed. Connections are served by a
/// bounded pool of worker threads (see [`ServerLimits`]).
///
/// Dropping a `Server` asks it to stop without waiting; use [`join`](Self::join)
/// to wait.
///
/// # Examples
///
/// ```no_run
/// use ember_http::{Request, Response, Server};
///
/// let server = Server::builder()
///     .port(8080)
///     .start(|request: &Request| {
///         let mut response = Response::new();
///         response.text(&format!("Hello from {}", request.path()));
///         response
///     })
///     .unwrap();
///
/// println!("listening on {}", server.local_addr());
/// server.join();
/// ```
#[derive(Debug)]
pub struct Server {
    local_addr: SocketAddr,
    stop: StopHandle,
    acceptor: Option<JoinHandle<()>>,
}

impl Server {
    /// Creates a builder listening on `0.0.0.0:80` with default limits.
    #[inline]
    pub fn builder() -> ServerBuilder<Request> {
        let factory: RequestFactory<Request> = Arc::new(Request::from_stream);

        ServerBuilder {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 80,
            factory,

            server_limits: None,
            connection_limits: None,
            request_limits: None,
        }
    }

    /// The address actually bound, with the real port when `0` was requested.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections.
    ///
    /// Takes effect within one [`accept_timeout`](ServerLimits::accept_timeout).
    /// Queued and in-flight connections are still served. Calling it again
    /// does nothing.
    #[inline]
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// A handle that can stop the server from another thread.
    #[inline]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Blocks until the server has stopped and its workers have finished, or
    /// until [`shutdown_timeout`](ServerLimits::shutdown_timeout) has passed
    /// since the stop.
    pub fn join(mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                error!("acceptor thread panicked");
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

/// Stops a [`Server`] from anywhere. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StopHandle(Sender<()>);

impl StopHandle {
    /// See [`Server::stop`].
    pub fn stop(&self) {
        // Full means a stop is already pending
        let _ = self.0.try_send(());
    }
}

/// Configures and starts a [`Server`].
///
/// `R` is the request type handed to the handler, [`Request`] unless changed
/// with [`request_factory`](Self::request_factory).
pub struct ServerBuilder<R = Request> {
    address: IpAddr,
    port: u16,
    factory: RequestFactory<R>,

    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    request_limits: Option<ReqLimits>,
}

impl<R: 'static> ServerBuilder<R> {
    /// Local address to bind (default: `0.0.0.0`).
    #[inline(always)]
    pub fn address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    /// Port to bind (default: `80`). `0` picks a free port; see
    /// [`Server::local_addr`].
    #[inline(always)]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets worker pool and acceptor limits.
    ///
    /// ```no_run
    /// use ember_http::{limits::{OverloadPolicy, ServerLimits}, Request, Response, Server};
    ///
    /// let server = Server::builder()
    ///     .port(8080)
    ///     .server_limits(ServerLimits {
    ///         max_workers: 8,
    ///         overload_policy: OverloadPolicy::Block,
    ///         ..ServerLimits::default()
    ///     })
    ///     .start(|_: &Request| Response::new())
    ///     .unwrap();
    /// # server.join();
    /// ```
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Sets per-connection socket timeouts.
    ///
    /// ```no_run
    /// use ember_http::{limits::ConnLimits, Request, Response, Server};
    /// use std::time::Duration;
    ///
    /// let server = Server::builder()
    ///     .port(8080)
    ///     .connection_limits(ConnLimits {
    ///         socket_read_timeout: Some(Duration::from_secs(10)),
    ///         ..ConnLimits::default()
    ///     })
    ///     .start(|_: &Request| Response::new())
    ///     .unwrap();
    /// # server.join();
    /// ```
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Sets request parsing limits, passed to the request factory.
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Replaces how requests are built, and with it the request type.
    ///
    /// ```no_run
    /// use ember_http::{limits::ReqLimits, Error, Response, Server};
    /// use std::{io::{BufRead, BufReader}, net::TcpStream};
    ///
    /// struct Line(String);
    ///
    /// let server = Server::builder()
    ///     .port(8080)
    ///     .request_factory(|stream: TcpStream, _: &ReqLimits| -> Result<Line, Error> {
    ///         let mut line = String::new();
    ///         BufReader::new(stream).read_line(&mut line)?;
    ///         Ok(Line(line))
    ///     })
    ///     .start(|line: &Line| {
    ///         let mut response = Response::new();
    ///         response.text(&line.0);
    ///         response
    ///     })
    ///     .unwrap();
    /// # server.join();
    /// ```
    pub fn request_factory<NewR, F>(self, factory: F) -> ServerBuilder<NewR>
    where
        NewR: 'static,
        F: Fn(TcpStream, &ReqLimits) -> Result<NewR, Error> + Send + Sync + 'static,
    {
        ServerBuilder {
            address: self.address,
            port: self.port,
            factory: Arc::new(factory),

            server_limits: self.server_limits,
            connection_limits: self.connection_limits,
            request_limits: self.request_limits,
        }
    }

    /// Binds the listener, starts the workers and the acceptor thread.
    ///
    /// # Errors
    /// - [`Error::InvalidLimits`] for inconsistent [`ServerLimits`]
    /// - [`Error::Bind`] when the address can't be listened on
    /// - [`Error::Io`] when threads can't be spawned
    pub fn start<H: Handler<R>>(self, handler: H) -> Result<Server, Error> {
        let server_limits = self.server_limits.unwrap_or_default();
        server_limits.validate()?;

        let addr = SocketAddr::new(self.address, self.port);
        let listener = bind(addr, &server_limits).map_err(|source| Error::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let engine = Engine {
            handler: Box::new(handler),
            factory: self.factory,
            request_limits: self.request_limits.unwrap_or_default(),
            connection_limits: self.connection_limits.unwrap_or_default(),
        };
        let pool = WorkerPool::new(Arc::new(engine), server_limits.clone())?;

        let (stop, stopped) = channel::bounded(1);
        let acceptor = thread::Builder::new()
            .name("ember-acceptor".to_owned())
            .spawn(move || accept_loop(listener, stopped, pool, server_limits))?;

        info!(%local_addr, "server started");
        Ok(Server {
            local_addr,
            stop: StopHandle(stop),
            acceptor: Some(acceptor),
        })
    }
}

fn bind(addr: SocketAddr, limits: &ServerLimits) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    #[cfg(unix)]
    socket.set_reuse_address(true)?;

    socket.bind(&addr.into())?;
    socket.listen(limits.backlog())?;
    // Lets `accept` return periodically so the stop signal gets noticed
    socket.set_read_timeout(Some(limits.accept_timeout))?;

    Ok(socket.into())
}

fn accept_loop<R: 'static>(
    listener: TcpListener,
    stopped: Receiver<()>,
    pool: WorkerPool<R>,
    limits: ServerLimits,
) {
    loop {
        if stop_requested(&stopped) {
            break;
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                if stop_requested(&stopped) {
                    debug!(%peer, "stopping, connection closed unserved");
                    drop(stream);
                    break;
                }
                pool.dispatch(stream, peer);
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => {
                warn!(%error, "accept failed");
                // Back off so a persistent failure doesn't spin
                if stopped.recv_timeout(Duration::from_millis(10)).is_ok() {
                    break;
                }
            }
        }
    }

    drop(listener);
    info!("stopped accepting connections");
    pool.shutdown(limits.shutdown_timeout);
}

fn stop_requested(stopped: &Receiver<()>) -> bool {
    !matches!(stopped.try_recv(), Err(TryRecvError::Empty))
}
