//! `application/x-www-form-urlencoded` decoding, shared by query strings and form bodies.

use encoding_rs::Encoding;
use memchr::{memchr, memmem};
use std::{borrow::Cow, collections::HashMap};
use tracing::warn;

/// Charset used when a header doesn't name one.
pub const DEFAULT_CHARSET: &str = "UTF-8";

/// Decodes `name=value&name=value` pairs into `params`.
///
/// `+` is a space and `%XX` escapes are bytes, which are then read in `charset`.
/// A pair without `=` gets an empty value, and a later pair replaces an earlier
/// one with the same name. Empty segments (`a=1&&b=2`) are skipped.
///
/// An unknown charset is logged and nothing is inserted: a client sending a
/// bogus charset loses its parameters, not its request.
///
/// # Examples
/// ```
/// use ember_http::query::decode_into;
/// use std::collections::HashMap;
///
/// let mut params = HashMap::new();
/// decode_into(&mut params, "q=hello+world&x=1&x=2&flag", "UTF-8");
///
/// assert_eq!(params["q"], "hello world");
/// assert_eq!(params["x"], "2");
/// assert_eq!(params["flag"], "");
/// ```
pub fn decode_into(params: &mut HashMap<String, String>, encoded: &str, charset: &str) {
    let Some(encoding) = Encoding::for_label(charset.as_bytes()) else {
        warn!(charset, "unsupported charset, dropping url-encoded parameters");
        return;
    };

    let data = encoded.as_bytes();
    let mut start = 0;
    while start < data.len() {
        let end = memchr(b'&', &data[start..])
            .map(|pos| start + pos)
            .unwrap_or(data.len());

        let pair = &data[start..end];
        start = end + 1;
        if pair.is_empty() {
            continue;
        }

        let (name, value) = match memchr(b'=', pair) {
            Some(eq) => (&pair[..eq], &pair[eq + 1..]),
            None => (pair, &b""[..]),
        };

        params.insert(
            decode_component(name, encoding),
            decode_component(value, encoding),
        );
    }
}

/// Percent-decodes one name or value and interprets the bytes in `encoding`.
fn decode_component(raw: &[u8], encoding: &'static Encoding) -> String {
    let spaced: Cow<[u8]> = match memchr(b'+', raw) {
        Some(_) => Cow::Owned(
            raw.iter()
                .map(|&b| if b == b'+' { b' ' } else { b })
                .collect(),
        ),
        None => Cow::Borrowed(raw),
    };

    let bytes = urlencoding::decode_binary(&spaced);
    let (text, _, _) = encoding.decode(&bytes);
    text.into_owned()
}

/// Returns the charset named by a `Content-Type`-style header value.
///
/// Takes the token after the last `charset=`, up to whitespace or `;`, with
/// surrounding quotes removed. Falls back to [`DEFAULT_CHARSET`] when the value
/// is absent or names no charset.
///
/// # Examples
/// ```
/// use ember_http::query::charset;
///
/// assert_eq!(charset(Some("text/html; charset=ISO-8859-1")), "ISO-8859-1");
/// assert_eq!(charset(Some("text/plain")), "UTF-8");
/// assert_eq!(charset(None), "UTF-8");
/// ```
pub fn charset(content_type: Option<&str>) -> &str {
    const KEY: &[u8] = b"charset=";

    let Some(value) = content_type else {
        return DEFAULT_CHARSET;
    };
    let Some(pos) = memmem::rfind(value.as_bytes(), KEY) else {
        return DEFAULT_CHARSET;
    };

    let rest = &value[pos + KEY.len()..];
    let end = rest
        .find(|c: char| c.is_whitespace() || c == ';')
        .unwrap_or(rest.len());
    let token = rest[..end].trim_matches('"');

    match token.is_empty() {
        true => DEFAULT_CHARSET,
        false => token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(encoded: &str, charset: &str) -> HashMap<String, String> {
        let mut params = HashMap::new();
        decode_into(&mut params, encoded, charset);
        params
    }

    #[test]
    fn basic() {
        let params = decode("q=hello+world&x=1", "UTF-8");

        assert_eq!(params.len(), 2);
        assert_eq!(params["q"], "hello world");
        assert_eq!(params["x"], "1");
    }

    #[test]
    fn full() {
        let params = decode("flag&empty=&=val&&key=value", "UTF-8");

        assert_eq!(params.len(), 4);
        assert_eq!(params["flag"], "");
        assert_eq!(params["empty"], "");
        assert_eq!(params[""], "val");
        assert_eq!(params["key"], "value");
    }

    #[test]
    fn value_keeps_later_equals() {
        let params = decode("expr=a%3Db=c", "UTF-8");
        assert_eq!(params["expr"], "a=b=c");
    }

    #[test]
    fn last_occurrence_wins() {
        let params = decode("a=1&a=2&a=3", "UTF-8");
        assert_eq!(params["a"], "3");
    }

    #[test]
    fn percent_escapes() {
        #[rustfmt::skip]
        let cases = [
            ("email=user%40example.com", "email", "user@example.com"),
            ("path=%2Fapi%2Fusers",      "path",  "/api/users"),
            ("plus=1%2B1",               "plus",  "1+1"),
            ("utf=caf%C3%A9",            "utf",   "café"),
            ("bad=100%",                 "bad",   "100%"),
            ("bad=%zz",                  "bad",   "%zz"),
        ];

        for (encoded, name, value) in cases {
            assert_eq!(decode(encoded, "UTF-8")[name], value, "{encoded}");
        }
    }

    #[test]
    fn decoded_names() {
        let params = decode("first+name=Ada&last%20name=Lovelace", "UTF-8");
        assert_eq!(params["first name"], "Ada");
        assert_eq!(params["last name"], "Lovelace");
    }

    #[test]
    fn latin1_charset() {
        let params = decode("name=caf%E9", "ISO-8859-1");
        assert_eq!(params["name"], "café");
    }

    #[test]
    fn unsupported_charset_is_dropped() {
        let mut params = HashMap::new();
        params.insert("kept".to_owned(), "yes".to_owned());

        decode_into(&mut params, "a=1&b=2", "x-no-such-charset");

        assert_eq!(params.len(), 1);
        assert_eq!(params["kept"], "yes");
    }

    #[test]
    fn merges_into_existing() {
        let mut params = decode("a=query&b=query", "UTF-8");
        decode_into(&mut params, "b=body&c=body", "UTF-8");

        assert_eq!(params["a"], "query");
        assert_eq!(params["b"], "body");
        assert_eq!(params["c"], "body");
    }

    #[test]
    fn charset_extraction() {
        #[rustfmt::skip]
        let cases = [
            (None,                                                         "UTF-8"),
            (Some("application/x-www-form-urlencoded"),                    "UTF-8"),
            (Some("application/x-www-form-urlencoded; charset=ISO-8859-1"), "ISO-8859-1"),
            (Some("text/html;charset=utf-8"),                              "utf-8"),
            (Some("text/html; charset=\"windows-1252\""),                  "windows-1252"),
            (Some("text/html; charset=utf-8; format=flowed"),              "utf-8"),
            (Some("text/html; charset= utf-8"),                            "UTF-8"),
        ];

        for (value, expected) in cases {
            assert_eq!(charset(value), expected, "{value:?}");
        }
    }
}
