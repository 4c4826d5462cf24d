//! Lazy, read-once request body.

use crate::errors::Error;
use encoding_rs::{CoderResult, Decoder, Encoding};
use std::{
    fmt,
    io::{self, BufRead, Read},
    sync::{Mutex, OnceLock},
};

/// How much of the stream belongs to the body and how to decode it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BodyFraming {
    pub(crate) limit: u64,
    pub(crate) chunk_size: usize,
    pub(crate) charset: String,
}

/// The unread rest of a request, decoded into text on first access.
///
/// The first caller of [`Body::text`] reads the stream while holding the lock;
/// concurrent callers wait on that lock and then get the cached outcome.
/// Exactly one physical read ever happens, and a read that failed keeps
/// failing the same way instead of resuming from wherever the stream stopped.
pub(crate) struct Body {
    source: Mutex<Box<dyn BufRead + Send>>,
    framing: BodyFraming,
    outcome: OnceLock<Result<String, ReadFailure>>,
}

impl Body {
    pub(crate) fn new(source: Box<dyn BufRead + Send>, framing: BodyFraming) -> Self {
        Self {
            source: Mutex::new(source),
            framing,
            outcome: OnceLock::new(),
        }
    }

    pub(crate) fn text(&self) -> Result<&str, Error> {
        if let Some(outcome) = self.outcome.get() {
            return settled(outcome);
        }

        let mut source = self.source.lock().map_err(|_| Error::BodyLockPoisoned)?;
        // Someone else may have finished while we waited for the lock
        if let Some(outcome) = self.outcome.get() {
            return settled(outcome);
        }

        let outcome = read_text(&mut *source, &self.framing).map_err(ReadFailure::from);
        settled(self.outcome.get_or_init(|| outcome))
    }

    pub(crate) fn framing(&self) -> &BodyFraming {
        &self.framing
    }
}

fn settled(outcome: &Result<String, ReadFailure>) -> Result<&str, Error> {
    outcome.as_deref().map_err(ReadFailure::to_error)
}

/// A failed body read, kept so every later call reports it again.
#[derive(Debug)]
enum ReadFailure {
    Io(io::ErrorKind, String),
    Charset(String),
}

impl ReadFailure {
    fn to_error(&self) -> Error {
        match self {
            ReadFailure::Io(kind, message) => Error::Io(io::Error::new(*kind, message.clone())),
            ReadFailure::Charset(charset) => Error::UnsupportedCharset(charset.clone()),
        }
    }
}

impl From<Error> for ReadFailure {
    fn from(error: Error) -> Self {
        match error {
            Error::UnsupportedCharset(charset) => ReadFailure::Charset(charset),
            Error::Io(e) => ReadFailure::Io(e.kind(), e.to_string()),
            other => ReadFailure::Io(io::ErrorKind::Other, other.to_string()),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("framing", &self.framing)
            .field("outcome", &self.outcome.get())
            .finish_non_exhaustive()
    }
}

/// Reads at most `framing.limit` bytes in `framing.chunk_size` pieces and decodes them.
///
/// Decoding is streaming, so a character split across two chunks comes out whole.
pub(crate) fn read_text<R: Read + ?Sized>(
    reader: &mut R,
    framing: &BodyFraming,
) -> Result<String, Error> {
    let encoding = Encoding::for_label(framing.charset.as_bytes())
        .ok_or_else(|| Error::UnsupportedCharset(framing.charset.clone()))?;
    let mut decoder = encoding.new_decoder_without_bom_handling();

    let mut text = String::new();
    let mut chunk = vec![0; framing.chunk_size.max(1)];
    let mut remaining = framing.limit;

    while remaining > 0 {
        let want = usize::try_from(remaining).map_or(chunk.len(), |r| r.min(chunk.len()));
        let count = match reader.read(&mut chunk[..want]) {
            Ok(0) => break,
            Ok(count) => count,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        decode_chunk(&mut decoder, &chunk[..count], &mut text, false);
        remaining -= count as u64;
    }
    decode_chunk(&mut decoder, &[], &mut text, true);

    Ok(text)
}

fn decode_chunk(decoder: &mut Decoder, mut src: &[u8], dst: &mut String, last: bool) {
    loop {
        let needed = decoder
            .max_utf8_buffer_length(src.len())
            .unwrap_or(src.len().saturating_mul(3).saturating_add(4));
        dst.reserve(needed);

        let (result, read, _) = decoder.decode_to_string(src, dst, last);
        src = &src[read..];
        if result == CoderResult::InputEmpty {
            return;
        }
    }
}
