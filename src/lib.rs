//! ember_http - a small, thread-per-connection HTTP/1.0 engine
//!
//! Accepts TCP connections, reads one request from each, hands it to your
//! [`Handler`], writes the [`Response`] and closes the connection. There is no
//! keep-alive, no chunked encoding and no TLS: it is meant for embedding a
//! plain HTTP endpoint into a larger program.
//!
//! # Features
//!
//! - **Bounded worker pool** - elastic between a minimum and a maximum number
//!   of threads, with a bounded queue and an [overload policy](limits::OverloadPolicy)
//! - **Lenient parsing** - `CRLF`, `LF` or `CR` line endings, folded headers,
//!   case-insensitive header lookup
//! - **Lazy bodies** - the body is read on first access, bounded by
//!   `Content-Length`, decoded in the declared charset
//! - **Form support** - query strings and `application/x-www-form-urlencoded`
//!   bodies are decoded into [`Request::parameter`]
//! - **Typed access** - [`Request::header_as`] and [`Request::parameter_as`]
//!   convert through [`FromStr`](std::str::FromStr), including [`HttpDate`]
//! - **Graceful stop** - queued and in-flight connections finish after
//!   [`Server::stop`]
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use ember_http::{Request, Response, Server, StatusCode};
//!
//! let server = Server::builder()
//!     .port(8080)
//!     .start(|request: &Request| {
//!         let mut response = Response::new();
//!         match request.path() {
//!             "/hello" => response
//!                 .header("Content-Type", "text/plain")
//!                 .text("Hello World!"),
//!             _ => response.status(StatusCode::NotFound),
//!         };
//!         response
//!     })
//!     .unwrap();
//!
//! server.join();
//! ```
//! Parameters, typed headers and dates:
//! ```no_run
//! use ember_http::{HttpDate, Request, Response, Server, StatusCode};
//!
//! let server = Server::builder()
//!     .port(8080)
//!     .start(|request: &Request| {
//!         let page = request.parameter_as::<u32>("page").unwrap_or(1);
//!         let since = request.header_as::<HttpDate>("If-Modified-Since");
//!
//!         let mut response = Response::new();
//!         if since.is_some() {
//!             response.status(StatusCode::NotModified);
//!         } else {
//!             response
//!                 .header("Last-Modified", HttpDate::now())
//!                 .header("Content-Type", "text/plain; charset=UTF-8")
//!                 .text(&format!("page {page}"));
//!         }
//!         response
//!     })
//!     .unwrap();
//!
//! server.join();
//! ```
//! Advanced configuration:
//! ```no_run
//! use ember_http::{
//!     limits::{ConnLimits, OverloadPolicy, ReqLimits, ServerLimits},
//!     Request, Response, Server,
//! };
//! use std::{net::Ipv4Addr, time::Duration};
//!
//! let server = Server::builder()
//!     .address(Ipv4Addr::LOCALHOST.into())
//!     .port(8080)
//!     .server_limits(ServerLimits {
//!         min_workers: 4,
//!         max_workers: 64,
//!         overload_policy: OverloadPolicy::Shed,
//!         ..ServerLimits::default()
//!     })
//!     .connection_limits(ConnLimits {
//!         socket_read_timeout: Some(Duration::from_secs(5)),
//!         socket_write_timeout: Some(Duration::from_secs(5)),
//!     })
//!     .request_limits(ReqLimits {
//!         max_headers: 32,
//!         body_ceiling: 1024 * 1024,
//!         ..ReqLimits::default()
//!     })
//!     .start(|_: &Request| Response::new())
//!     .unwrap();
//!
//! let stop = server.stop_handle();
//! std::thread::spawn(move || {
//!     std::thread::sleep(Duration::from_secs(60));
//!     stop.stop();
//! });
//! server.join();
//! ```
//!
//! # Logging
//!
//! Events go through [`tracing`]; install any subscriber to see them. Nothing
//! is logged above `debug` for well-behaved traffic.

pub(crate) mod http {
    pub(crate) mod body;
    pub(crate) mod coerce;
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod pool;
    pub(crate) mod server_impl;
}
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    errors::Error,
    http::{
        coerce::{coerce, HttpDate, InvalidDate},
        query,
        request::{Request, RequestLine},
        response::{write_response, BodyWriter, HeaderValue, Response, WriteBuffer},
        types::StatusCode,
    },
    server::server_impl::{Handler, RequestFactory, Server, ServerBuilder, StopHandle},
};
