//! One HTTP/1.1 exchange over plain TCP.
//!
//! Each transfer registered with a [`TcpMultiplexer`](super::TcpMultiplexer)
//! runs [`run_transfer`] as a task. Header lines and body chunks are sent back
//! over a channel as soon as they are read, and the task finishes by sending
//! exactly one [`Signal::Done`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::timeout;
use url::Url;

use crate::http::parser;
use crate::http::request::Method;
use crate::http::writer;
use crate::transport::tcp::TcpConfig;
use crate::transport::{Transfer, TransferCode, TransferEvent, TransferInfo, TransferOutcome};

/// Default buffer size for reads
const BUFFER_SIZE: usize = 8192;

/// Message from a transfer task to its multiplexer.
#[derive(Debug)]
pub(crate) enum Signal {
    Event(usize, TransferEvent),
    Done(usize, TransferOutcome),
}

#[derive(Debug)]
struct Failure {
    code: TransferCode,
    message: String,
}

impl Failure {
    fn new(code: TransferCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

struct EventSink {
    token: usize,
    tx: UnboundedSender<Signal>,
    verbose: bool,
}

impl EventSink {
    fn emit(&self, event: TransferEvent) {
        // The multiplexer may already be gone; nothing left to tell.
        let _ = self.tx.send(Signal::Event(self.token, event));
    }

    fn debug(&self, line: impl FnOnce() -> String) {
        if self.verbose {
            self.emit(TransferEvent::Debug(line()));
        }
    }
}

/// Runs one transfer to completion, honouring its overall timeout.
pub(crate) async fn run_transfer(
    token: usize,
    transfer: Transfer,
    config: Arc<TcpConfig>,
    tx: UnboundedSender<Signal>,
) {
    let started = Instant::now();
    let sink = EventSink {
        token,
        tx: tx.clone(),
        verbose: transfer.verbose,
    };
    let mut info = TransferInfo {
        effective_url: transfer.url.clone(),
        ..TransferInfo::default()
    };

    let result = if transfer.timeout.is_zero() {
        Some(exchange(&transfer, &config, &sink, &mut info).await)
    } else {
        timeout(transfer.timeout, exchange(&transfer, &config, &sink, &mut info))
            .await
            .ok()
    };

    info.total_seconds = started.elapsed().as_secs_f64();

    let outcome = match result {
        Some(Ok(())) => TransferOutcome::ok(info),
        Some(Err(failure)) => {
            sink.debug(|| format!("* {}", failure.message));
            TransferOutcome::failed(failure.code, failure.message, info)
        }
        None => {
            let message = format!(
                "Operation timed out after {} milliseconds with {} bytes received",
                started.elapsed().as_millis(),
                info.bytes_received
            );
            sink.debug(|| format!("* {}", message));
            TransferOutcome::failed(TransferCode::OperationTimedOut, message, info)
        }
    };

    tracing::trace!(token, code = outcome.code, "Transfer finished");
    let _ = tx.send(Signal::Done(token, outcome));
}

async fn exchange(
    transfer: &Transfer,
    config: &TcpConfig,
    sink: &EventSink,
    info: &mut TransferInfo,
) -> Result<(), Failure> {
    let url = Url::parse(&transfer.url)
        .map_err(|e| Failure::new(TransferCode::UrlMalformat, format!("URL rejected: {}", e)))?;

    if url.scheme() != "http" {
        return Err(Failure::new(
            TransferCode::UnsupportedProtocol,
            format!("Protocol \"{}\" not supported", url.scheme()),
        ));
    }

    let host = url
        .host_str()
        .ok_or_else(|| Failure::new(TransferCode::UrlMalformat, "No host part in the URL"))?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(80);

    let mut stream = connect(&host, port, config.connect_timeout, sink).await?;

    // Send the request
    let request_bytes = writer::serialize_request(transfer, &url, &config.user_agent);
    if sink.verbose {
        trace_request(&request_bytes, sink);
    }
    stream
        .write_all(&request_bytes)
        .await
        .map_err(|e| Failure::new(TransferCode::SendError, e.to_string()))?;
    stream
        .flush()
        .await
        .map_err(|e| Failure::new(TransferCode::SendError, e.to_string()))?;
    info.bytes_sent = request_bytes.len() as u64;

    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
    let head = read_head(&mut stream, &mut buffer, config, sink).await?;
    info.status_code = Some(head.status);

    let body_allowed = transfer.method != Method::HEAD
        && head.status != 204
        && head.status != 304;

    if body_allowed {
        if head.chunked {
            read_chunked_body(&mut stream, &mut buffer, config, sink, info).await?;
        } else if let Some(length) = head.content_length {
            read_sized_body(&mut stream, &mut buffer, length, sink, info).await?;
        } else {
            read_body_to_close(&mut stream, &mut buffer, sink, info).await?;
        }
    }

    sink.debug(|| format!("* Closing connection to {}", host));
    Ok(())
}

async fn connect(
    host: &str,
    port: u16,
    connect_timeout: Duration,
    sink: &EventSink,
) -> Result<TcpStream, Failure> {
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| {
            Failure::new(
                TransferCode::CouldntResolveHost,
                format!("Could not resolve host: {} ({})", host, e),
            )
        })?
        .collect();

    if addrs.is_empty() {
        return Err(Failure::new(
            TransferCode::CouldntResolveHost,
            format!("Could not resolve host: {}", host),
        ));
    }

    sink.debug(|| format!("*   Trying {}...", addrs[0]));

    let stream = timeout(connect_timeout, TcpStream::connect(&addrs[..]))
        .await
        .map_err(|_| {
            Failure::new(
                TransferCode::OperationTimedOut,
                format!(
                    "Connection timed out after {} milliseconds",
                    connect_timeout.as_millis()
                ),
            )
        })?
        .map_err(|e| {
            Failure::new(
                TransferCode::CouldntConnect,
                format!("Failed to connect to {} port {}: {}", host, port, e),
            )
        })?;

    sink.debug(|| {
        let peer = stream
            .peer_addr()
            .map(|a| a.ip().to_string())
            .unwrap_or_default();
        format!("* Connected to {} ({}) port {}", host, peer, port)
    });

    Ok(stream)
}

fn trace_request(bytes: &[u8], sink: &EventSink) {
    let head_end = bytes
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap_or(bytes.len());

    for line in String::from_utf8_lossy(&bytes[..head_end]).split("\r\n") {
        sink.emit(TransferEvent::Debug(format!("> {}", line)));
    }
}

struct ResponseHead {
    status: u16,
    content_length: Option<usize>,
    chunked: bool,
}

/// Reads header blocks until a final (non-1xx) one, emitting every line.
async fn read_head(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    config: &TcpConfig,
    sink: &EventSink,
) -> Result<ResponseHead, Failure> {
    let mut header_bytes = 0usize;

    loop {
        let status_line = read_line(stream, buffer, config.max_header_bytes).await?;
        header_bytes += status_line.len();

        let status = parser::parse_status_line(&status_line)
            .and_then(|s| s.code)
            .ok_or_else(|| {
                Failure::new(TransferCode::WeirdServerReply, "Invalid status line received")
            })?;

        sink.debug(|| format!("< {}", status_line));
        sink.emit(TransferEvent::HeaderLine(status_line));

        let mut head = ResponseHead {
            status,
            content_length: None,
            chunked: false,
        };

        loop {
            let line = read_line(stream, buffer, config.max_header_bytes).await?;
            header_bytes += line.len();
            if header_bytes > config.max_header_bytes {
                return Err(Failure::new(
                    TransferCode::WeirdServerReply,
                    "Response headers too large",
                ));
            }

            sink.debug(|| format!("< {}", line));

            if line.is_empty() {
                sink.emit(TransferEvent::HeaderLine(line));
                break;
            }

            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                let value = value.trim();
                if name.eq_ignore_ascii_case("content-length") {
                    let length = value.parse::<usize>().map_err(|_| {
                        Failure::new(TransferCode::WeirdServerReply, "Invalid Content-Length")
                    })?;
                    head.content_length = Some(length);
                } else if name.eq_ignore_ascii_case("transfer-encoding")
                    && value.to_ascii_lowercase().contains("chunked")
                {
                    head.chunked = true;
                }
            }

            sink.emit(TransferEvent::HeaderLine(line));
        }

        if !(100..200).contains(&status) {
            return Ok(head);
        }
    }
}

/// Reads one CRLF (or LF) terminated line, without the terminator.
async fn read_line(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    max_len: usize,
) -> Result<String, Failure> {
    loop {
        if let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let raw = buffer.split_to(pos + 1);
            let line = String::from_utf8_lossy(&raw);
            return Ok(line.trim_end_matches(['\r', '\n']).to_string());
        }

        if buffer.len() > max_len {
            return Err(Failure::new(
                TransferCode::WeirdServerReply,
                "Header line too long",
            ));
        }

        if read_more(stream, buffer).await? == 0 {
            return Err(Failure::new(
                TransferCode::RecvError,
                "Connection closed before complete response received",
            ));
        }
    }
}

async fn read_more(stream: &mut TcpStream, buffer: &mut BytesMut) -> Result<usize, Failure> {
    buffer.reserve(BUFFER_SIZE);
    stream
        .read_buf(buffer)
        .await
        .map_err(|e| Failure::new(TransferCode::RecvError, e.to_string()))
}

fn emit_body(chunk: Bytes, sink: &EventSink, info: &mut TransferInfo) {
    if chunk.is_empty() {
        return;
    }
    info.bytes_received += chunk.len() as u64;
    sink.emit(TransferEvent::BodyChunk(chunk));
}

async fn read_sized_body(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    length: usize,
    sink: &EventSink,
    info: &mut TransferInfo,
) -> Result<(), Failure> {
    let mut remaining = length;

    while remaining > 0 {
        if buffer.is_empty() && read_more(stream, buffer).await? == 0 {
            return Err(Failure::new(
                TransferCode::RecvError,
                format!("transfer closed with {} bytes remaining to read", remaining),
            ));
        }

        let take = buffer.len().min(remaining);
        remaining -= take;
        emit_body(buffer.split_to(take).freeze(), sink, info);
    }

    Ok(())
}

async fn read_body_to_close(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    sink: &EventSink,
    info: &mut TransferInfo,
) -> Result<(), Failure> {
    loop {
        if !buffer.is_empty() {
            emit_body(buffer.split().freeze(), sink, info);
        }
        if read_more(stream, buffer).await? == 0 {
            return Ok(());
        }
    }
}

async fn read_chunked_body(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    config: &TcpConfig,
    sink: &EventSink,
    info: &mut TransferInfo,
) -> Result<(), Failure> {
    loop {
        let size_line = read_line(stream, buffer, config.max_header_bytes).await?;
        let size_field = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_field, 16).map_err(|_| {
            Failure::new(
                TransferCode::RecvError,
                "Problem in the chunked-encoded data: invalid chunk size",
            )
        })?;

        if size == 0 {
            // Trailers, up to the terminating blank line
            loop {
                let trailer = read_line(stream, buffer, config.max_header_bytes).await?;
                if trailer.is_empty() {
                    return Ok(());
                }
            }
        }

        let framed = size.checked_add(2).ok_or_else(|| {
            Failure::new(
                TransferCode::RecvError,
                "Problem in the chunked-encoded data: chunk size too large",
            )
        })?;

        while buffer.len() < framed {
            if read_more(stream, buffer).await? == 0 {
                return Err(Failure::new(
                    TransferCode::RecvError,
                    "Connection closed inside a chunk",
                ));
            }
        }

        let chunk = buffer.split_to(size).freeze();
        buffer.advance(2);
        emit_body(chunk, sink, info);
    }
}
