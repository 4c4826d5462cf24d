use crate::{
    errors::Error,
    http::{response::Response, types::StatusCode},
    limits::{ConnLimits, ReqLimits},
    server::server_impl::{Handler, RequestFactory},
};
use std::{
    any::Any,
    io,
    net::{Shutdown, SocketAddr, TcpStream},
    panic::{self, AssertUnwindSafe},
};
use tracing::{debug, debug_span, error, warn};

/// Everything a worker needs to serve a connection.
pub(crate) struct Engine<R> {
    pub(crate) handler: Box<dyn Handler<R>>,
    pub(crate) factory: RequestFactory<R>,
    pub(crate) request_limits: ReqLimits,
    pub(crate) connection_limits: ConnLimits,
}

impl<R: 'static> Engine<R> {
    /// Runs one connection to completion: parse, handle, write, close.
    ///
    /// A request that can't be parsed is dropped without a response. A handler
    /// that panics gets an empty `500 Internal Server Error` sent in its place.
    pub(crate) fn serve(&self, stream: TcpStream, peer: SocketAddr) {
        let span = debug_span!("connection", %peer);
        let _enter = span.enter();

        if let Err(error) = self.connection_limits.apply(&stream) {
            warn!(%error, "couldn't configure connection socket");
            return;
        }

        let reader = match stream.try_clone() {
            Ok(reader) => reader,
            Err(error) => {
                warn!(%error, "couldn't clone connection socket");
                return;
            }
        };

        let request = match self.read_request(reader) {
            Ok(request) => request,
            Err(error) => {
                unreadable(&error, peer);
                return;
            }
        };

        let response = match panic::catch_unwind(AssertUnwindSafe(|| self.handler.handle(&request)))
        {
            Ok(response) => response,
            Err(payload) => {
                error!(panic = panic_message(&*payload), "handler panicked");
                Response::empty(StatusCode::InternalServerError)
            }
        };

        let mut writer = &stream;
        match response.write_to(&mut writer) {
            Ok(()) => debug!(status = response.status_code(), "response sent"),
            Err(error) => warn!(%error, "couldn't write response"),
        }

        // Flush a FIN before the socket is dropped
        let _ = stream.shutdown(Shutdown::Write);
    }

    fn read_request(&self, reader: TcpStream) -> Result<R, Error> {
        panic::catch_unwind(AssertUnwindSafe(|| {
            (self.factory)(reader, &self.request_limits)
        }))
        .unwrap_or_else(|payload| {
            error!(panic = panic_message(&*payload), "request factory panicked");
            Err(Error::Io(io::Error::other("request factory panicked")))
        })
    }
}

impl ConnLimits {
    /// Sets both socket timeouts, clearing them when unset.
    ///
    /// Accepted sockets may inherit the listener's accept timeout, so this
    /// always runs.
    pub(crate) fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_read_timeout(self.socket_read_timeout)?;
        stream.set_write_timeout(self.socket_write_timeout)
    }
}

/// Client mistakes stay at debug; a failing transport is worth a warning.
fn unreadable(error: &Error, peer: SocketAddr) {
    if error.is_malformed_request() {
        debug!(%peer, %error, "malformed request, closing without a response");
    } else {
        warn!(%peer, %error, "couldn't read request, closing connection");
    }
}

/// Writes a canned response to a connection that won't be served, then closes it.
pub(crate) fn refuse(stream: TcpStream, status: StatusCode, limits: &ConnLimits) {
    if let Err(error) = limits.apply(&stream) {
        debug!(%error, "couldn't configure refused socket");
    }

    let mut writer = &stream;
    if let Err(error) = Response::empty(status).write_to(&mut writer) {
        debug!(%error, "couldn't write refusal");
    }
    let _ = stream.shutdown(Shutdown::Write);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Request, RequestLine};
    use std::{
        io::{Read, Write},
        net::TcpListener,
        sync::{Arc, Mutex},
        thread,
        time::Duration,
    };

    fn engine<R: 'static>(factory: RequestFactory<R>, handler: impl Handler<R>) -> Engine<R> {
        Engine {
            handler: Box::new(handler),
            factory,
            request_limits: ReqLimits::default(),
            connection_limits: ConnLimits {
                socket_read_timeout: Some(Duration::from_secs(5)),
                socket_write_timeout: Some(Duration::from_secs(5)),
            },
        }
    }

    fn default_engine(handler: impl Handler) -> Engine<Request> {
        let factory: RequestFactory<Request> = Arc::new(Request::from_stream);
        engine(factory, handler)
    }

    /// Sends `raw` to an engine serving a single connection, returns what came back.
    fn round_trip<R: 'static>(engine: Engine<R>, raw: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, peer) = listener.accept().unwrap();
            engine.serve(stream, peer);
        });

        let mut client = TcpStream::connect(addr).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        client.write_all(raw.as_bytes()).unwrap();

        let mut out = String::new();
        let _ = client.read_to_string(&mut out);
        server.join().unwrap();
        out
    }

    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Serves one connection on this thread and returns everything it logged.
    fn serve_logged<R: 'static>(engine: Engine<R>, raw: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = thread::spawn(move || {
            let mut client = TcpStream::connect(addr).unwrap();
            client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            let _ = client.write_all(raw.as_bytes());
            let _ = client.read_to_end(&mut Vec::new());
        });
        let (stream, peer) = listener.accept().unwrap();

        let logs = Arc::new(Mutex::new(Vec::new()));
        let sink = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || Capture(sink.clone()))
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || engine.serve(stream, peer));
        client.join().unwrap();

        let logs = logs.lock().unwrap();
        String::from_utf8_lossy(&logs).into_owned()
    }

    #[test]
    fn serves_one_request() {
        let engine = default_engine(|request: &Request| {
            let mut response = Response::new();
            response
                .header("Content-Type", "text/plain")
                .text(&format!("{} {}", request.method(), request.path()));
            response
        });

        assert_eq!(
            round_trip(engine, "GET /hello HTTP/1.0\r\n\r\n"),
            "HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 10\r\n\r\nGET /hello"
        );
    }

    #[test]
    fn malformed_request_gets_no_response() {
        let engine = default_engine(|_: &Request| Response::new());
        assert_eq!(round_trip(engine, "\r\n"), "");
    }

    #[test]
    fn malformed_request_logged_as_client_failure() {
        let engine = default_engine(|_: &Request| Response::new());
        let logs = serve_logged(engine, "\r\n");

        assert!(logs.contains("DEBUG"), "{logs}");
        assert!(logs.contains("malformed request"), "{logs}");
        assert!(!logs.contains("WARN"), "{logs}");
    }

    #[test]
    fn transport_failure_logged_as_warning() {
        let factory: RequestFactory<Request> =
            Arc::new(|_: TcpStream, _: &ReqLimits| -> Result<Request, Error> {
                Err(io::Error::from(io::ErrorKind::ConnectionReset).into())
            });
        let engine = engine(factory, |_: &Request| Response::new());
        let logs = serve_logged(engine, "GET / HTTP/1.0\r\n\r\n");

        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("couldn't read request"), "{logs}");
        assert!(!logs.contains("malformed request"), "{logs}");
    }

    #[test]
    fn handler_panic_becomes_500() {
        let engine = default_engine(|_: &Request| -> Response { panic!("boom") });

        assert_eq!(
            round_trip(engine, "GET / HTTP/1.0\r\n\r\n"),
            "HTTP/1.0 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn custom_request_type() {
        struct FirstLine(String);

        let factory: RequestFactory<FirstLine> =
            Arc::new(|mut stream: TcpStream, _: &ReqLimits| -> Result<FirstLine, Error> {
                let mut buf = [0u8; 64];
                let read = stream.read(&mut buf)?;
                let text = String::from_utf8_lossy(&buf[..read]);
                Ok(FirstLine(text.lines().next().unwrap_or_default().to_owned()))
            });

        let engine = engine(factory, |line: &FirstLine| {
            let mut response = Response::new();
            response.text(RequestLine::split(&line.0).target.unwrap_or("-"));
            response
        });

        let out = round_trip(engine, "GET /custom HTTP/1.0\r\n\r\n");
        assert!(out.ends_with("\r\n\r\n/custom"), "{out:?}");
    }

    #[test]
    fn panic_messages() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let fixed: Box<dyn Any + Send> = Box::new("fixed");
        let other: Box<dyn Any + Send> = Box::new(7u8);

        assert_eq!(panic_message(&*owned), "owned");
        assert_eq!(panic_message(&*fixed), "fixed");
        assert_eq!(panic_message(&*other), "non-string panic payload");
    }
}
