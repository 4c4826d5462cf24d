use crate::{
    errors::Error,
    http::{
        body::{Body, BodyFraming},
        coerce::coerce,
    },
    limits::ReqLimits,
    query::{self, DEFAULT_CHARSET},
};
use memchr::memchr2;
use std::{
    collections::HashMap,
    fmt,
    io::{BufRead, BufReader, Read},
    net::{SocketAddr, TcpStream},
    str::FromStr,
};
use tracing::{debug, warn};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// An HTTP/1.0 request read from a byte stream.
///
/// The request line and headers are parsed eagerly; the body stays on the
/// stream until [`body`](Self::body) is first called.
///
/// # Input format
///
/// - `SP`: ASCII space (0x20)
/// - `EOL`: `CRLF`, a bare `LF` or a bare `CR`. A stream that ends mid-line
///   ends that line.
///
/// Lines that are valid UTF-8 are read as UTF-8; anything else is read as
/// ISO-8859-1, one byte per character.
///
/// ## First line
/// ```text
/// [METHOD] SP [TARGET] SP [VERSION] EOL
/// ```
/// Only the request-target is mandatory in spirit, but a line without both
/// spaces is rejected with [`Error::MalformedRequestLine`]. Everything after
/// the second space, spaces included, is the version.
///
/// ## Headers
/// ```text
/// [NAME] ":" [SP] [VALUE] EOL
/// ```
/// | Input                  | Result                                                |
/// |------------------------|-------------------------------------------------------|
/// | `X-Test: foo`          | `X-Test` = `foo`                                      |
/// | `X-Test:foo`           | `X-Test` = `foo` (the space is optional)              |
/// | `X-Test:`              | `X-Test` = empty                                      |
/// | `SP bar` after the above | value becomes `foobar` (folded, no separator)       |
/// | `no colon here`        | ignored                                               |
/// | `: nameless`           | ignored                                               |
///
/// Names keep their case. A repeated name replaces the earlier value. Lookup
/// tries an exact match first and falls back to a case-insensitive one.
///
/// An empty line (or the end of the stream) ends the headers.
///
/// ## Parameters
/// Query-string parameters are decoded as UTF-8. When `Content-Type` starts
/// with `application/x-www-form-urlencoded` the body is read right away, decoded
/// in the charset named by `Content-Type`, and its parameters override the
/// query's.
///
/// # Examples
/// ```
/// use ember_http::{limits::ReqLimits, Request};
///
/// let raw: &[u8] = b"GET /search?q=hello+world HTTP/1.0\r\nHost: example.com:8080\r\n\r\n";
/// let request = Request::parse(raw, None, &ReqLimits::default()).unwrap();
///
/// assert_eq!(request.method(), "GET");
/// assert_eq!(request.path(), "/search");
/// assert_eq!(request.parameter("q"), Some("hello world"));
/// assert_eq!(request.hostname(), Some("example.com"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: String,
    uri: String,
    protocol: String,
    path: String,
    query_string: Option<String>,

    hostname: Option<String>,
    peer_addr: Option<SocketAddr>,

    headers: HashMap<String, String>,
    parameters: HashMap<String, String>,
    body: Body,
}

impl Request {
    /// Reads a request from an accepted connection, remembering the peer address.
    pub fn from_stream(stream: TcpStream, limits: &ReqLimits) -> Result<Self, Error> {
        let peer_addr = stream.peer_addr().ok();
        Self::parse(stream, peer_addr, limits)
    }

    /// Reads a request from any byte stream.
    ///
    /// `peer_addr` is only used as the hostname when there is no `Host` header.
    pub fn parse<R>(
        reader: R,
        peer_addr: Option<SocketAddr>,
        limits: &ReqLimits,
    ) -> Result<Self, Error>
    where
        R: Read + Send + 'static,
    {
        let mut reader = BufReader::new(reader);

        let line = read_line(&mut reader, limits.max_line_length)?;
        let RequestLine {
            method: Some(method),
            target: Some(uri),
            version: Some(protocol),
        } = RequestLine::split(&line)
        else {
            return Err(Error::MalformedRequestLine);
        };
        let (method, uri, protocol) = (method.to_owned(), uri.to_owned(), protocol.to_owned());

        let headers = read_headers(&mut reader, limits)?;

        let (path, query_string) = match uri.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (uri.clone(), None),
        };

        let mut parameters = HashMap::new();
        if let Some(query) = &query_string {
            query::decode_into(&mut parameters, query, DEFAULT_CHARSET);
        }

        let hostname = match find_header(&headers, "Host") {
            Some(host) => host.split(':').next().map(str::to_owned),
            None => peer_addr.map(|addr| addr.ip().to_string()),
        };

        let content_type = find_header(&headers, "Content-Type");
        let charset = query::charset(content_type).to_owned();
        let is_form = content_type.is_some_and(|value| value.starts_with(FORM_CONTENT_TYPE));

        // Lengths past i32::MAX count as unparsable and fall back to the ceiling
        let limit = match find_header(&headers, "Content-Length").and_then(coerce::<i32>) {
            Some(length) => u64::try_from(length).unwrap_or(0),
            None => limits.body_ceiling,
        };
        let body = Body::new(
            Box::new(reader),
            BodyFraming {
                limit,
                chunk_size: limits.body_chunk_size,
                charset,
            },
        );

        if is_form {
            match body.text() {
                Ok(form) => query::decode_into(&mut parameters, form, &body.framing().charset),
                Err(Error::UnsupportedCharset(charset)) => {
                    warn!(%charset, "unsupported form charset, ignoring body parameters");
                }
                Err(error) => return Err(error),
            }
        }

        Ok(Self {
            method,
            uri,
            protocol,
            path,
            query_string,
            hostname,
            peer_addr,
            headers,
            parameters,
            body,
        })
    }
}

impl Request {
    /// Method token, e.g. `GET`. Not validated.
    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The full request-target, query included.
    #[inline]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Everything after the second space of the request line, e.g. `HTTP/1.0`.
    #[inline]
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// The request-target up to the first `?`.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The request-target after the first `?`. `None` when there is no `?`,
    /// `Some("")` when it ends with one.
    #[inline]
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// `Host` without its port, or else the peer's IP address.
    #[inline]
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Header value by name: exact match first, then case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// [`header`](Self::header) converted with [`coerce`].
    pub fn header_as<T>(&self, name: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.header(name).and_then(coerce)
    }

    /// All headers, names as sent.
    #[inline]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Decoded query or form parameter, matched exactly.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// [`parameter`](Self::parameter) converted with [`coerce`].
    pub fn parameter_as<T>(&self, name: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.parameter(name).and_then(coerce)
    }

    #[inline]
    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    /// The body as text.
    ///
    /// Read on first call: at most `Content-Length` bytes (nothing for a
    /// negative length), or [`ReqLimits::body_ceiling`] bytes when the header
    /// is missing or unparsable. The charset comes from `Content-Type` and
    /// defaults to UTF-8. Later calls, from any thread, get the same text.
    pub fn body(&self) -> Result<&str, Error> {
        self.body.text()
    }
}

/// The three space-separated parts of a request line.
///
/// Splitting never fails: parts that can't be found are `None`.
///
/// # Examples
/// ```
/// use ember_http::RequestLine;
///
/// let line = RequestLine::split("GET /index.html HTTP/1.0");
/// assert_eq!(line.method, Some("GET"));
/// assert_eq!(line.target, Some("/index.html"));
/// assert_eq!(line.version, Some("HTTP/1.0"));
///
/// assert_eq!(RequestLine::split("GET").method, None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestLine<'a> {
    /// Text before the first space, if that space isn't the first character.
    pub method: Option<&'a str>,
    /// Text between the first and second spaces.
    pub target: Option<&'a str>,
    /// Text after the second space.
    pub version: Option<&'a str>,
}

impl<'a> RequestLine<'a> {
    pub fn split(line: &'a str) -> Self {
        let Some(first) = line.find(' ').filter(|&pos| pos > 0) else {
            return Self::default();
        };
        let method = Some(&line[..first]);

        let rest = &line[first + 1..];
        match rest.find(' ') {
            Some(second) => Self {
                method,
                target: Some(&rest[..second]),
                version: Some(&rest[second + 1..]),
            },
            None => Self {
                method,
                ..Self::default()
            },
        }
    }
}

fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .or_else(|| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
        .map(String::as_str)
}

fn read_headers<R: BufRead>(
    reader: &mut R,
    limits: &ReqLimits,
) -> Result<HashMap<String, String>, Error> {
    let mut headers = HashMap::new();
    let mut last: Option<String> = None;
    let mut count = 0;

    loop {
        let line = read_line(reader, limits.max_line_length)?;
        if line.is_empty() {
            return Ok(headers);
        }

        count += 1;
        if count > limits.max_headers {
            return Err(Error::TooManyHeaders(limits.max_headers));
        }

        if line.starts_with([' ', '\t']) {
            match last.as_ref().and_then(|name| headers.get_mut(name)) {
                Some(value) => value.push_str(line.trim()),
                None => debug!(%line, "continuation line without a header, ignored"),
            }
            continue;
        }

        let Some((name, value)) = line.split_once(':').filter(|(name, _)| !name.is_empty()) else {
            debug!(%line, "header line without a name, ignored");
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);

        headers.insert(name.to_owned(), value.to_owned());
        last = Some(name.to_owned());
    }
}

/// Reads one line, without its terminator.
///
/// `CRLF`, `LF` and a lone `CR` all end a line; the end of the stream ends the
/// last one, so an exhausted stream yields an empty line.
fn read_line<R: BufRead>(reader: &mut R, max_length: usize) -> Result<String, Error> {
    let mut line = Vec::new();

    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            break;
        }

        match memchr2(b'\r', b'\n', buf) {
            Some(pos) => {
                let is_cr = buf[pos] == b'\r';
                line.extend_from_slice(&buf[..pos]);
                reader.consume(pos + 1);

                if is_cr {
                    skip_lf(reader)?;
                }
                break;
            }
            None => {
                let len = buf.len();
                line.extend_from_slice(buf);
                reader.consume(len);
            }
        }

        if line.len() > max_length {
            return Err(Error::LineTooLong(max_length));
        }
    }

    if line.len() > max_length {
        return Err(Error::LineTooLong(max_length));
    }
    Ok(decode_line(line))
}

fn skip_lf<R: BufRead>(reader: &mut R) -> Result<(), Error> {
    if reader.fill_buf()?.first() == Some(&b'\n') {
        reader.consume(1);
    }
    Ok(())
}

fn decode_line(bytes: Vec<u8>) -> String {
    match simdutf8::basic::from_utf8(&bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}
