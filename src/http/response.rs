use serde::de::DeserializeOwned;

use crate::error::{BodyFormat, DecodeFailure, Error, Result};
use crate::http::message::{Cookie, Message};
use crate::http::parser::{self, HeaderLine};

/// Lowest status code treated as an error by [`ResponseMessage::validate_status`].
pub const ERROR_STATUS_MIN: u16 = 400;

/// Highest status code treated as an error.
pub const ERROR_STATUS_MAX: u16 = 599;

/// Returns the standard reason phrase for a status code.
///
/// ```
/// # use httpcall::http::response::canonical_reason;
/// assert_eq!(canonical_reason(200), Some("OK"));
/// assert_eq!(canonical_reason(404), Some("Not Found"));
/// assert_eq!(canonical_reason(799), None);
/// ```
pub fn canonical_reason(code: u16) -> Option<&'static str> {
    let reason = match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => return None,
    };
    Some(reason)
}

/// A response as it is being received.
///
/// Reset before every execution attempt, then filled line by line through
/// [`parse_header_line`](Self::parse_header_line) and chunk by chunk through
/// [`append_body`](Self::append_body).
#[derive(Debug, Clone, Default)]
pub struct ResponseMessage {
    message: Message,
    status_code: Option<u16>,
    reason_phrase: String,
    protocol_version: String,
}

impl ResponseMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn reason_phrase(&self) -> &str {
        &self.reason_phrase
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.message.header(name)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.message.cookie(name)
    }

    pub fn cookie_entry(&self, name: &str) -> Option<&Cookie> {
        self.message.cookies().get(name)
    }

    pub fn raw_body(&self) -> Option<&[u8]> {
        self.message.raw_body()
    }

    /// Body as text, lossily decoded.
    pub fn body_text(&self) -> Option<String> {
        self.raw_body()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn append_body(&mut self, chunk: &[u8]) {
        self.message.append_body(chunk);
    }

    /// Empties the message before a new execution attempt.
    pub fn reset(&mut self) -> &mut Self {
        self.message.reset();
        self.status_code = None;
        self.reason_phrase.clear();
        self.protocol_version.clear();
        self
    }

    /// Feeds one raw header line; returns `false` if it was ignored.
    ///
    /// Status lines set code, reason and version. Field lines are stored
    /// lower-cased; `Set-Cookie` lines also populate the cookie map.
    ///
    /// Any line containing a `:` is a field line, so a status line whose
    /// reason has a colon (`HTTP/1.1 500 Error: x`) leaves `status_code()`
    /// unset. The transport reads status lines positionally, so
    /// [`TransferInfo::status_code`](crate::transport::TransferInfo) still
    /// reports the code in that case.
    pub fn parse_header_line(&mut self, line: &str) -> bool {
        match parser::parse_header_line(line) {
            HeaderLine::Status(status) => {
                self.protocol_version = status.version;
                self.status_code = status.code;
                self.reason_phrase = status.reason;
                true
            }
            HeaderLine::Field { name, value } => {
                if name == "set-cookie" && !value.is_empty() {
                    if let Some((cookie_name, cookie)) = parser::parse_set_cookie(&value) {
                        self.message.set_cookie(cookie_name, cookie);
                    }
                }
                self.message.set_header(&name, value);
                true
            }
            HeaderLine::Ignored => false,
        }
    }

    /// Fails with [`Error::HttpResponse`] when the status is in the error range.
    pub fn validate_status(&self) -> Result<&Self> {
        match self.status_code {
            Some(code) if (ERROR_STATUS_MIN..=ERROR_STATUS_MAX).contains(&code) => {
                let message = if self.reason_phrase.is_empty() {
                    canonical_reason(code)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("HTTP status {}", code))
                } else {
                    self.reason_phrase.clone()
                };
                Err(Error::HttpResponse {
                    status: code,
                    message,
                })
            }
            _ => Ok(self),
        }
    }

    /// Decodes the body as loosely typed JSON. A `null` body yields `Value::Null`.
    pub fn body_as_json(&self) -> Result<serde_json::Value> {
        self.body_as()
    }

    /// Decodes the body as JSON into `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        let text = self.structured_body(BodyFormat::Json)?;

        serde_json::from_str(text).map_err(|e| Error::MalformedResponse {
            format: BodyFormat::Json,
            kind: json_failure(&e),
            detail: e.to_string(),
        })
    }

    /// Parses the body as an XML document.
    pub fn body_as_xml(&self) -> Result<roxmltree::Document<'_>> {
        let text = self.structured_body(BodyFormat::Xml)?;

        roxmltree::Document::parse(text).map_err(|e| Error::MalformedResponse {
            format: BodyFormat::Xml,
            kind: DecodeFailure::Xml,
            detail: e.to_string(),
        })
    }

    fn structured_body(&self, format: BodyFormat) -> Result<&str> {
        let body = match self.raw_body() {
            Some(b) if !b.is_empty() => b,
            _ => return Err(Error::EmptyBody),
        };

        std::str::from_utf8(body).map_err(|e| Error::MalformedResponse {
            format,
            kind: DecodeFailure::Encoding,
            detail: e.to_string(),
        })
    }
}

fn json_failure(e: &serde_json::Error) -> DecodeFailure {
    use serde_json::error::Category;

    match e.classify() {
        Category::Eof => DecodeFailure::UnexpectedEnd,
        Category::Data => DecodeFailure::Data,
        Category::Syntax if e.to_string().contains("recursion limit") => {
            DecodeFailure::DepthExceeded
        }
        Category::Syntax | Category::Io => DecodeFailure::Syntax,
    }
}
