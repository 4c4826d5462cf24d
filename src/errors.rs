use std::{io, net::SocketAddr};

/// Errors produced while starting the engine or building a [`Request`](crate::Request).
///
/// Coercion never produces an error: a value that can't be converted simply
/// comes back as `None` (see [`coerce`](crate::coerce)).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying stream failed (reset, timeout, closed while writing...).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The request line did not contain a request-target.
    #[error("malformed request line")]
    MalformedRequestLine,

    /// A request or header line exceeded [`ReqLimits::max_line_length`](crate::limits::ReqLimits::max_line_length).
    #[error("request line longer than {0} bytes")]
    LineTooLong(usize),

    /// More header lines than [`ReqLimits::max_headers`](crate::limits::ReqLimits::max_headers).
    #[error("more than {0} header lines")]
    TooManyHeaders(usize),

    /// The body was declared in a charset that has no decoder.
    #[error("unsupported charset: {0}")]
    UnsupportedCharset(String),

    /// Another thread panicked while it was reading the request body.
    #[error("request body reader poisoned by a panicking reader")]
    BodyLockPoisoned,

    /// The listening socket could not be set up.
    #[error("couldn't listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Rejected [`ServerLimits`](crate::limits::ServerLimits).
    #[error("invalid server limits: {0}")]
    InvalidLimits(&'static str),
}

impl Error {
    /// `true` for errors caused by what the client sent rather than by the transport.
    pub fn is_malformed_request(&self) -> bool {
        matches!(
            self,
            Error::MalformedRequestLine | Error::LineTooLong(_) | Error::TooManyHeaders(_)
        )
    }
}
