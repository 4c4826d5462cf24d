//! Response model and its HTTP/1.0 wire form.

use crate::{
    http::{coerce::HttpDate, types::StatusCode},
    query,
};
use encoding_rs::{Encoding, UTF_8};
use std::{
    borrow::Cow,
    fmt,
    io::{self, Write},
    rc::Rc,
    sync::Arc,
    time::SystemTime,
};
use tracing::warn;

pub use write::{BodyWriter, WriteBuffer};

/// A header value: text, or a point in time rendered as an HTTP date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Text(String),
    Date(SystemTime),
}

impl HeaderValue {
    /// The value as text, `None` for dates.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(text) => Some(text),
            HeaderValue::Date(_) => None,
        }
    }

    fn write_to(&self, buffer: &mut Vec<u8>) {
        match self {
            HeaderValue::Text(text) => buffer.extend_from_slice(text.as_bytes()),
            HeaderValue::Date(time) => {
                buffer.extend_from_slice(httpdate::fmt_http_date(*time).as_bytes())
            }
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Text(text) => f.write_str(text),
            HeaderValue::Date(time) => f.write_str(&httpdate::fmt_http_date(*time)),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

impl From<SystemTime> for HeaderValue {
    fn from(value: SystemTime) -> Self {
        HeaderValue::Date(value)
    }
}

impl From<HttpDate> for HeaderValue {
    fn from(value: HttpDate) -> Self {
        HeaderValue::Date(value.system_time())
    }
}

macro_rules! header_value_from_number {
    ($($t:ty),*) => {
        $(impl From<$t> for HeaderValue {
            #[inline] fn from(value: $t) -> Self {
                HeaderValue::Text(value.to_string())
            }
        })*
    };
}

header_value_from_number!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

/// An HTTP/1.0 response under construction.
///
/// Starts as `200 OK` with no headers and no body. Setters chain:
///
/// ```
/// use ember_http::{Response, StatusCode};
///
/// let mut response = Response::new();
/// response
///     .status(StatusCode::NotFound)
///     .header("Content-Type", "text/plain")
///     .text("nope");
///
/// let mut wire = Vec::new();
/// response.write_to(&mut wire).unwrap();
/// assert_eq!(
///     wire,
///     b"HTTP/1.0 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 4\r\n\r\nnope"
/// );
/// ```
///
/// Header names are matched case-insensitively when replacing, and written in
/// the order they were first set, with the case they were last set with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status_code: u16,
    status_message: String,
    headers: Vec<(String, HeaderValue)>,
    body: Option<Vec<u8>>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status_code: StatusCode::Ok.code(),
            status_message: StatusCode::Ok.reason().to_owned(),
            headers: Vec::new(),
            body: None,
        }
    }
}

impl Response {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// A bodyless response with only `Content-Length: 0`.
    pub(crate) fn empty(status: StatusCode) -> Self {
        let mut response = Self::new();
        response.status(status).body(Vec::<u8>::new());
        response
    }

    /// Sets the status code and its standard reason phrase.
    #[inline]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status_line(status.code(), status.reason())
    }

    /// Sets an arbitrary status code and reason phrase.
    pub fn status_line(&mut self, code: u16, message: impl Into<String>) -> &mut Self {
        self.status_code = code;
        self.status_message = message.into();
        self
    }

    /// Sets a header, replacing any earlier one with the same name in any case.
    ///
    /// ```
    /// use ember_http::{HeaderValue, HttpDate, Response};
    ///
    /// let mut response = Response::new();
    /// response
    ///     .header("X-Retries", 3)
    ///     .header("Last-Modified", HttpDate::now())
    ///     .header("x-retries", "4");
    ///
    /// assert_eq!(response.headers().len(), 2);
    /// assert_eq!(response.get_header("X-RETRIES"), Some(&HeaderValue::from("4")));
    /// ```
    pub fn header<N, V>(&mut self, name: N, value: V) -> &mut Self
    where
        N: Into<String>,
        V: Into<HeaderValue>,
    {
        let name = name.into();
        let value = value.into();

        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(slot) => *slot = (name, value),
            None => self.headers.push((name, value)),
        }
        self
    }

    /// Sets the body bytes as given and updates `Content-Length`.
    pub fn body<T: WriteBuffer>(&mut self, data: T) -> &mut Self {
        let mut buffer = Vec::new();
        data.write_to(&mut buffer);
        self.set_body(buffer)
    }

    /// Builds the body through a writer and updates `Content-Length`.
    ///
    /// ```
    /// use ember_http::Response;
    /// use std::io::Write;
    ///
    /// let mut response = Response::new();
    /// response.body_with(|w| {
    ///     w.write("total: ");
    ///     w.write(42u32);
    ///     write!(w, " of {}", 50).unwrap();
    /// });
    ///
    /// assert_eq!(response.body_bytes(), Some(&b"total: 42 of 50"[..]));
    /// ```
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) -> &mut Self {
        let mut buffer = Vec::new();
        f(&mut BodyWriter(&mut buffer));
        self.set_body(buffer)
    }

    /// Sets the body from text, encoded in the charset named by this response's
    /// `Content-Type` (UTF-8 when there is none), and updates `Content-Length`.
    ///
    /// An unknown charset is logged and the text is sent as UTF-8.
    pub fn text(&mut self, text: &str) -> &mut Self {
        let content_type = self.get_header("Content-Type").and_then(HeaderValue::as_text);
        let charset = query::charset(content_type);

        let encoding = Encoding::for_label(charset.as_bytes()).unwrap_or_else(|| {
            warn!(charset, "unsupported response charset, sending UTF-8");
            UTF_8
        });
        let (bytes, _, _) = encoding.encode(text);

        let bytes = bytes.into_owned();
        self.set_body(bytes)
    }

    fn set_body(&mut self, body: Vec<u8>) -> &mut Self {
        let length = body.len();
        self.body = Some(body);
        self.header("Content-Length", length)
    }
}

impl Response {
    #[inline]
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    #[inline]
    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    /// Header value by name, ignoring case.
    pub fn get_header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    #[inline]
    pub fn headers(&self) -> &[(String, HeaderValue)] {
        &self.headers
    }

    /// `None` until a body has been set.
    #[inline]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Writes the whole response with [`write_response`].
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        write_response(
            out,
            self.status_code,
            &self.status_message,
            &self.headers,
            self.body.as_deref(),
        )
    }
}

/// Serializes an HTTP/1.0 response and flushes it.
///
/// Emits `HTTP/1.0 <code> <message>`, one `Name: value` line per header, an
/// empty line and the body bytes, all `CRLF`-terminated. Date values are
/// written in IMF-fixdate form. Nothing is added: `Content-Length` appears
/// only if it is in `headers`.
///
/// ```
/// use ember_http::{write_response, HeaderValue};
///
/// let headers = [("Content-Type".to_owned(), HeaderValue::from("text/plain"))];
/// let mut wire = Vec::new();
/// write_response(&mut wire, 404, "Not Found", &headers, Some(b"nope")).unwrap();
///
/// assert_eq!(wire, b"HTTP/1.0 404 Not Found\r\nContent-Type: text/plain\r\n\r\nnope");
/// ```
pub fn write_response<W: Write + ?Sized>(
    out: &mut W,
    status_code: u16,
    status_message: &str,
    headers: &[(String, HeaderValue)],
    body: Option<&[u8]>,
) -> io::Result<()> {
    let mut buffer = Vec::with_capacity(128 + body.map_or(0, <[u8]>::len));

    buffer.extend_from_slice(b"HTTP/1.0 ");
    buffer.extend_from_slice(status_code.to_string().as_bytes());
    buffer.push(b' ');
    buffer.extend_from_slice(status_message.as_bytes());
    buffer.extend_from_slice(b"\r\n");

    for (name, value) in headers {
        buffer.extend_from_slice(name.as_bytes());
        buffer.extend_from_slice(b": ");
        value.write_to(&mut buffer);
        buffer.extend_from_slice(b"\r\n");
    }
    buffer.extend_from_slice(b"\r\n");

    if let Some(body) = body {
        buffer.extend_from_slice(body);
    }

    out.write_all(&buffer)?;
    out.flush()
}

pub mod write {
    use super::*;

    /// Writer handed to [`Response::body_with`].
    ///
    /// Accepts anything implementing [`WriteBuffer`] and also implements
    /// [`std::io::Write`], so `write!` works too.
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends a value to the body.
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Something that can be appended to a response body as raw bytes.
    ///
    /// Implemented for strings, byte slices, booleans, chars and integers.
    /// Strings go in as UTF-8 regardless of `Content-Type`; use
    /// [`Response::text`] to honor the declared charset.
    ///
    /// # Example
    /// ```
    /// use ember_http::WriteBuffer;
    ///
    /// struct Csv(Vec<&'static str>);
    ///
    /// impl WriteBuffer for Csv {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         buffer.extend_from_slice(self.0.join(",").as_bytes())
    ///     }
    /// }
    /// ```
    pub trait WriteBuffer {
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let closure = $conn;
                    closure(self, buffer);
                }
            })*
        };
        (number => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    buffer.extend_from_slice(self.to_string().as_bytes());
                }
            })*
        };
    }

    impl<T: WriteBuffer + ?Sized> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl WriteBuffer for str {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self.as_bytes());
        }
    }
    impl WriteBuffer for [u8] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => String, Box<str>, Cow<'_, str>, Arc<str>, Rc<str>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => Vec<u8>, Box<[u8]>, Cow<'_, [u8]>, Arc<[u8]>, Rc<[u8]>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        number => u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize
    }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn wire(response: &Response) -> String {
        let mut out = Vec::new();
        response.write_to(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn defaults() {
        let response = Response::new();

        assert_eq!(response.status_code(), 200);
        assert_eq!(response.status_message(), "OK");
        assert!(response.headers().is_empty());
        assert_eq!(response.body_bytes(), None);
        assert_eq!(wire(&response), "HTTP/1.0 200 OK\r\n\r\n");
    }

    #[test]
    fn write_response_exact_bytes() {
        let headers = [("Content-Type".to_owned(), HeaderValue::from("text/plain"))];
        let mut out = Vec::new();
        write_response(&mut out, 404, "Not Found", &headers, Some(b"nope")).unwrap();

        assert_eq!(
            out,
            b"HTTP/1.0 404 Not Found\r\nContent-Type: text/plain\r\n\r\nnope"
        );
    }

    #[test]
    fn write_response_without_body() {
        let mut out = Vec::new();
        write_response(&mut out, 204, "No Content", &[], None).unwrap();

        assert_eq!(out, b"HTTP/1.0 204 No Content\r\n\r\n");
    }

    #[test]
    fn date_headers() {
        let time = UNIX_EPOCH + Duration::from_secs(784111777);
        let mut response = Response::new();
        response.header("Date", time);

        assert_eq!(
            wire(&response),
            "HTTP/1.0 200 OK\r\nDate: Sun, 06 Nov 1994 08:49:37 GMT\r\n\r\n"
        );
        assert_eq!(response.get_header("date").and_then(HeaderValue::as_text), None);
    }

    #[test]
    fn header_replacement_keeps_position() {
        let mut response = Response::new();
        response
            .header("Content-Type", "text/html")
            .header("X-Id", 7)
            .header("content-type", "text/plain");

        assert_eq!(
            response.headers(),
            &[
                ("content-type".to_owned(), HeaderValue::from("text/plain")),
                ("X-Id".to_owned(), HeaderValue::from("7")),
            ]
        );
    }

    #[test]
    fn content_length_tracks_body() {
        let mut response = Response::new();
        response.body("first body");
        assert_eq!(
            response.get_header("Content-Length"),
            Some(&HeaderValue::from(10))
        );

        response.body(vec![1u8, 2, 3]);
        assert_eq!(
            response.get_header("content-length"),
            Some(&HeaderValue::from(3))
        );
        assert_eq!(response.body_bytes(), Some(&[1u8, 2, 3][..]));
        assert_eq!(response.headers().len(), 1);
    }

    #[test]
    fn body_types() {
        fn body_of<T: WriteBuffer>(data: T) -> Vec<u8> {
            let mut response = Response::new();
            response.body(data);
            response.body_bytes().unwrap().to_vec()
        }

        assert_eq!(body_of("str"), b"str");
        assert_eq!(body_of(String::from("string")), b"string");
        assert_eq!(body_of(b"array"), b"array");
        assert_eq!(body_of(Cow::Borrowed("cow")), b"cow");
        assert_eq!(body_of(Arc::<str>::from("arc")), b"arc");
        assert_eq!(body_of(-1234), b"-1234");
        assert_eq!(body_of('é'), "é".as_bytes());
    }

    #[test]
    fn body_with_writer() {
        let mut response = Response::new();
        response.body_with(|w| {
            w.write("on=");
            w.write(true);
            w.write(',');
        });

        assert_eq!(wire(&response), "HTTP/1.0 200 OK\r\nContent-Length: 6\r\n\r\non=true,");
    }

    #[test]
    fn text_uses_content_type_charset() {
        let mut response = Response::new();
        response
            .header("Content-Type", "text/plain; charset=ISO-8859-1")
            .text("café");
        assert_eq!(response.body_bytes(), Some(&b"caf\xe9"[..]));
        assert_eq!(
            response.get_header("Content-Length"),
            Some(&HeaderValue::from(4))
        );

        let mut response = Response::new();
        response.text("café");
        assert_eq!(response.body_bytes(), Some("café".as_bytes()));

        let mut response = Response::new();
        response
            .header("Content-Type", "text/plain; charset=x-unknown")
            .text("café");
        assert_eq!(response.body_bytes(), Some("café".as_bytes()));
    }

    #[test]
    fn status() {
        let mut response = Response::new();
        response.status(StatusCode::ServiceUnavailable);
        assert_eq!(response.status_code(), 503);
        assert_eq!(response.status_message(), "Service Unavailable");

        response.status_line(299, "Custom Thing");
        assert_eq!(wire(&response), "HTTP/1.0 299 Custom Thing\r\n\r\n");
    }

    #[test]
    fn empty_response() {
        assert_eq!(
            wire(&Response::empty(StatusCode::InternalServerError)),
            "HTTP/1.0 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn write_failure_is_reported() {
        struct Broken;

        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::ErrorKind::BrokenPipe.into())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let error = Response::new().write_to(&mut Broken).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
    }
}
