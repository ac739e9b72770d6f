//! Transfer-engine contract.
//!
//! The call layer never touches sockets. It hands a [`Transfer`] to a
//! [`Multiplexer`] under a numeric token, pumps the multiplexer, and receives
//! [`TransferEvent`]s tagged with that token. When no transfers remain in
//! flight it removes each token and gets back a [`TransferOutcome`].
//!
//! ```text
//!   add(token, transfer) ──► perform() ──► events (token, HeaderLine | BodyChunk | Debug)
//!                              ▲   │
//!                              │   └── Progress { running, call_again }
//!                  wait(timeout)
//!   remove(token) ──► TransferOutcome { code, message, info }
//! ```
//!
//! [`tcp::TcpEngine`] is the bundled engine. Tests plug in scripted ones.

pub mod exchange;
pub mod tcp;

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;
use crate::http::request::Method;

pub use tcp::{TcpConfig, TcpEngine, TcpMultiplexer};

/// Everything an engine needs to run one HTTP exchange.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub method: Method,
    /// Final URL, query string included
    pub url: String,
    /// Lower-cased header names with their values
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub timeout: Duration,
    /// Emit [`TransferEvent::Debug`] trace lines
    pub verbose: bool,
}

/// Streaming output of a transfer, delivered in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// One raw response header line, status line included
    HeaderLine(String),
    BodyChunk(Bytes),
    /// One verbose trace line
    Debug(String),
}

/// Result codes of a finished transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferCode {
    Ok,
    UnsupportedProtocol,
    UrlMalformat,
    CouldntResolveHost,
    CouldntConnect,
    WeirdServerReply,
    OperationTimedOut,
    Aborted,
    SendError,
    RecvError,
}

impl TransferCode {
    pub fn code(&self) -> i32 {
        match self {
            TransferCode::Ok => 0,
            TransferCode::UnsupportedProtocol => 1,
            TransferCode::UrlMalformat => 3,
            TransferCode::CouldntResolveHost => 6,
            TransferCode::CouldntConnect => 7,
            TransferCode::WeirdServerReply => 8,
            TransferCode::OperationTimedOut => 28,
            TransferCode::Aborted => 42,
            TransferCode::SendError => 55,
            TransferCode::RecvError => 56,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let parsed = match code {
            0 => TransferCode::Ok,
            1 => TransferCode::UnsupportedProtocol,
            3 => TransferCode::UrlMalformat,
            6 => TransferCode::CouldntResolveHost,
            7 => TransferCode::CouldntConnect,
            8 => TransferCode::WeirdServerReply,
            28 => TransferCode::OperationTimedOut,
            42 => TransferCode::Aborted,
            55 => TransferCode::SendError,
            56 => TransferCode::RecvError,
            _ => return None,
        };
        Some(parsed)
    }
}

impl fmt::Display for TransferCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TransferCode::Ok => "No error",
            TransferCode::UnsupportedProtocol => "Unsupported protocol",
            TransferCode::UrlMalformat => "URL using bad/illegal format",
            TransferCode::CouldntResolveHost => "Couldn't resolve host name",
            TransferCode::CouldntConnect => "Couldn't connect to server",
            TransferCode::WeirdServerReply => "Weird server reply",
            TransferCode::OperationTimedOut => "Timeout was reached",
            TransferCode::Aborted => "Transfer aborted",
            TransferCode::SendError => "Failed sending data to the peer",
            TransferCode::RecvError => "Failure when receiving data from the peer",
        };
        f.write_str(text)
    }
}

/// Final metadata of one transfer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferInfo {
    pub effective_url: String,
    pub status_code: Option<u16>,
    pub total_seconds: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// What a removed transfer hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    /// 0 on success, otherwise a [`TransferCode`] number
    pub code: i32,
    /// Empty on success
    pub message: String,
    pub info: TransferInfo,
}

impl TransferOutcome {
    pub fn ok(info: TransferInfo) -> Self {
        Self {
            code: 0,
            message: String::new(),
            info,
        }
    }

    pub fn failed(code: TransferCode, message: impl Into<String>, info: TransferInfo) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            info,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Result of one non-blocking pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Transfers still in flight
    pub running: usize,
    /// More work is available right now; pump again before waiting
    pub call_again: bool,
}

/// Result of a bounded readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Number of transfers that became ready; 0 on timeout
    Ready(usize),
    /// The multiplexer has no blocking wait; the driver falls back to sleeping
    Unsupported,
}

/// Tracks many transfers and reports their progress from one thread.
pub trait Multiplexer {
    /// Registers a transfer under `token`. Tokens are unique per multiplexer.
    fn add(&mut self, token: usize, transfer: Transfer) -> Result<()>;

    /// Advances every transfer without blocking, appending produced events.
    fn perform(&mut self, events: &mut Vec<(usize, TransferEvent)>) -> Result<Progress>;

    /// Blocks for at most `timeout` until some transfer can make progress.
    fn wait(&mut self, timeout: Duration) -> Result<Readiness>;

    /// Deregisters a transfer and returns its outcome. A transfer removed
    /// before it finished is reported as aborted.
    fn remove(&mut self, token: usize) -> Result<TransferOutcome>;

    /// Status code of the multiplexer itself, 0 when healthy.
    fn status(&self) -> i32 {
        0
    }
}

/// Factory for multiplexers, one per execution.
pub trait Engine {
    type Multi: Multiplexer;

    fn multiplexer(&self) -> Result<Self::Multi>;
}
