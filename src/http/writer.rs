use url::Url;

use crate::transport::Transfer;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Headers the transport owns; caller-supplied values are dropped.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Request target for the request line: path plus query.
pub fn request_target(url: &Url) -> String {
    let path = if url.path().is_empty() { "/" } else { url.path() };
    match url.query() {
        Some(q) => format!("{}?{}", path, q),
        None => path.to_string(),
    }
}

/// `Host` header value, port included when it is not the default one.
pub fn host_header(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Serializes a transfer into HTTP/1.1 request bytes.
///
/// Every request is sent with `Connection: close`, so the response body may
/// be read until the peer closes.
pub fn serialize_request(transfer: &Transfer, url: &Url, user_agent: &str) -> Vec<u8> {
    let mut buf = Vec::new();

    // Request line
    let request_line = format!(
        "{} {} {}\r\n",
        transfer.method,
        request_target(url),
        HTTP_VERSION
    );
    buf.extend_from_slice(request_line.as_bytes());

    if let Some(host) = host_header(url) {
        push_header(&mut buf, "host", &host);
    }

    let mut has_user_agent = false;
    for (k, v) in &transfer.headers {
        if HOP_BY_HOP.contains(&k.as_str()) {
            continue;
        }
        if k == "user-agent" {
            has_user_agent = true;
        }
        push_header(&mut buf, k, v);
    }

    if !has_user_agent && !user_agent.is_empty() {
        push_header(&mut buf, "user-agent", user_agent);
    }

    let body_len = transfer.body.as_ref().map(|b| b.len()).unwrap_or(0);
    if transfer.body.is_some() || transfer.method.carries_body() {
        push_header(&mut buf, "content-length", &body_len.to_string());
    }

    push_header(&mut buf, "connection", "close");

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    if let Some(body) = &transfer.body {
        buf.extend_from_slice(body);
    }

    buf
}

fn push_header(buf: &mut Vec<u8>, key: &str, value: &str) {
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value.as_bytes());
    buf.extend_from_slice(b"\r\n");
}
