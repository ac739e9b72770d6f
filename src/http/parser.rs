use crate::http::message::{Cookie, CookieAttr};

/// Parsed `HTTP/<version> <code> <reason>` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: String,
    /// `None` when the second token is missing or not a number
    pub code: Option<u16>,
    pub reason: String,
}

/// What a single raw header line turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderLine {
    Status(StatusLine),
    /// Lower-cased, trimmed field name and trimmed value
    Field { name: String, value: String },
    /// Blank separator lines and colon-less garbage
    Ignored,
}

/// Classifies one raw header line as delivered by the transport.
///
/// Trailing CR/LF are tolerated. A colon-less line is a status line only if
/// it starts with `HTTP` (any case).
pub fn parse_header_line(line: &str) -> HeaderLine {
    let line = line.trim_end_matches(['\r', '\n']);

    match line.split_once(':') {
        Some((name, value)) => HeaderLine::Field {
            name: name.trim().to_ascii_lowercase(),
            value: value.trim().to_string(),
        },
        None => match parse_status_line(line) {
            Some(status) => HeaderLine::Status(status),
            None => HeaderLine::Ignored,
        },
    }
}

/// Parses a status line, `None` if the line does not start with `HTTP`.
pub fn parse_status_line(line: &str) -> Option<StatusLine> {
    let prefix = line.get(..4)?;
    if !prefix.eq_ignore_ascii_case("HTTP") {
        return None;
    }

    let mut parts = line.split(' ').filter(|p| !p.is_empty());
    let version = parts.next()?.to_string();
    let code = parts.next().and_then(|c| c.parse::<u16>().ok());
    let reason = parts.collect::<Vec<_>>().join(" ");

    Some(StatusLine {
        version,
        code,
        reason,
    })
}

/// Parses the value of a `Set-Cookie` header.
///
/// The first `;`-segment is the cookie identity, every later segment an
/// attribute. Returns `None` for an empty value or an empty cookie name.
pub fn parse_set_cookie(value: &str) -> Option<(String, Cookie)> {
    let mut segments = value.split(';');

    let (name, cookie_value) = split_pair(segments.next()?);
    if name.is_empty() {
        return None;
    }

    let mut cookie = Cookie {
        value: cookie_value.map(str::to_string),
        ..Cookie::default()
    };

    for segment in segments {
        let (attr, attr_value) = split_pair(segment);
        if attr.is_empty() {
            continue;
        }
        let attr_value = match attr_value {
            Some(v) => CookieAttr::Value(v.to_string()),
            None => CookieAttr::Flag,
        };
        cookie.attributes.insert(attr.to_string(), attr_value);
    }

    Some((name.to_string(), cookie))
}

fn split_pair(segment: &str) -> (&str, Option<&str>) {
    match segment.split_once('=') {
        Some((k, v)) => (k.trim(), Some(v.trim())),
        None => (segment.trim(), None),
    }
}
