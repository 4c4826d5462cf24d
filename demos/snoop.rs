//! Renders everything the parser saw about a request as an HTML page.
//!
//! ```text
//! RUST_LOG=ember_http=debug cargo run --example snoop
//! curl 'http://127.0.0.1:8080/some/path?a=1&b=two+words' -H 'X-Thing: yes'
//! ```

use ember_http::{Handler, Request, Response, Server};
use std::{collections::BTreeMap, fmt::Write, net::Ipv4Addr};
use tracing_subscriber::EnvFilter;

struct Snoop;

impl Handler for Snoop {
    fn handle(&self, request: &Request) -> Response {
        let mut response = Response::new();
        response
            .header("Content-Type", "text/html; charset=UTF-8")
            .text(&render(request));
        response
    }
}

fn render(request: &Request) -> String {
    let mut page = String::from(
        "<!DOCTYPE html><html><head><title>Snoop</title></head><body><h1>Snoop</h1>",
    );

    page.push_str("<h2>Info</h2>");
    for (label, value) in [
        ("Request Protocol", Some(request.protocol())),
        ("Request Method", Some(request.method())),
        ("Request URI", Some(request.uri())),
        ("Host", request.hostname()),
        ("Path", Some(request.path())),
        ("Query String", request.query_string()),
    ] {
        let _ = write!(page, "<div>{label}: {}</div>", escape(value.unwrap_or("")));
    }

    page.push_str("<h2>Headers</h2>");
    for (name, value) in sorted(request.headers()) {
        let _ = write!(page, "<div>{}: {}</div>", escape(name), escape(value));
    }

    if !request.parameters().is_empty() {
        page.push_str("<h2>Parameters</h2>");
        for (name, value) in sorted(request.parameters()) {
            let _ = write!(page, "<div>{} = {}</div>", escape(name), escape(value));
        }
    }

    page.push_str("</body></html>");
    page
}

fn sorted<'a>(
    map: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> BTreeMap<&'a str, &'a str> {
    map.into_iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect()
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let server = Server::builder()
        .address(Ipv4Addr::LOCALHOST.into())
        .port(8080)
        .start(Snoop)
        .expect("failed to start the snoop server");

    tracing::info!(addr = %server.local_addr(), "snoop ready");
    server.join();
}
