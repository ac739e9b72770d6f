//! HTTP message model.
//!
//! # Architecture
//!
//! - **`message`**: Headers, cookies and raw body shared by requests and responses
//! - **`parser`**: Parses raw response header lines and `Set-Cookie` values
//! - **`request`**: Outgoing request representation and compilation into URL, headers and body
//! - **`response`**: Incoming response, status validation and body decoding
//! - **`writer`**: Serializes a transfer into HTTP/1.1 request bytes
//!
//! # Response Assembly
//!
//! A response is filled incrementally while its transfer runs:
//!
//! ```text
//!   "HTTP/1.1 200 OK"        ──► status code, reason phrase, version
//!   "Content-Type: text/html" ──► headers["content-type"]
//!   "Set-Cookie: a=1; Path=/" ──► headers + cookies["a"]
//!   body chunk, body chunk    ──► raw body
//! ```

pub mod message;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
