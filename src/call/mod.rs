//! A single HTTP call: one request, one response, one lifecycle.
//!
//! # Call State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Created   │ ← request built, nothing sent
//!        └──────┬──────┘
//!               │ transfer opened, timer starts
//!               ▼
//!        ┌─────────────┐
//!        │   Running   │ ← header lines and body chunks arrive
//!        └──────┬──────┘
//!               │ transfer closed, timer stops
//!               ▼
//!        ┌─────────────┐
//!        │  Completed  │ ← error code/message and timing are final
//!        └─────────────┘
//! ```
//!
//! Any other transition fails with [`Error::InvalidStateTransition`]. A call
//! runs at most once.

pub mod stats;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::error::{Error, Result};
use crate::http::request::RequestMessage;
use crate::http::response::ResponseMessage;
use crate::multi::{self, PollSettings};
use crate::transport::{
    Engine, Multiplexer, TcpEngine, Transfer, TransferCode, TransferEvent, TransferInfo,
    TransferOutcome,
};

pub use stats::CallStats;

/// Timeout applied to new calls, in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    Created,
    Running,
    Completed,
}

impl CallState {
    pub fn title(&self) -> &'static str {
        match self {
            CallState::Created => "Created",
            CallState::Running => "Running",
            CallState::Completed => "Completed",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// One request/response pair executed through an [`Engine`].
pub struct Call<E: Engine = TcpEngine> {
    engine: E,
    request: RequestMessage,
    response: ResponseMessage,
    state: CallState,
    started_at: Option<Instant>,
    start_timestamp: Option<SystemTime>,
    execution_seconds: f64,
    timeout_seconds: f64,
    error_code: i32,
    error_message: String,
    debug_mode: bool,
    debug_info: Option<String>,
    transfer_info: Option<TransferInfo>,
    stats: Option<Arc<CallStats>>,
    poll: PollSettings,
}

impl Call<TcpEngine> {
    /// Wraps a request into a call on the default TCP engine.
    pub fn new(request: RequestMessage) -> Self {
        Self::with_engine(request, TcpEngine::default())
    }

    /// Builds the request from a verb and URI first.
    pub fn create(verb: &str, uri: impl Into<String>) -> Result<Self> {
        Ok(Self::new(RequestMessage::create(verb, uri)?))
    }
}

impl<E: Engine> Call<E> {
    pub fn with_engine(request: RequestMessage, engine: E) -> Self {
        Self::with_response(request, ResponseMessage::new(), engine)
    }

    /// Uses a caller-supplied response message as the receiving end.
    pub fn with_response(request: RequestMessage, response: ResponseMessage, engine: E) -> Self {
        Self {
            engine,
            request,
            response,
            state: CallState::Created,
            started_at: None,
            start_timestamp: None,
            execution_seconds: 0.0,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            error_code: 0,
            error_message: String::new(),
            debug_mode: false,
            debug_info: None,
            transfer_info: None,
            stats: None,
            poll: PollSettings::default(),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn request(&self) -> &RequestMessage {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut RequestMessage {
        &mut self.request
    }

    pub fn response(&self) -> &ResponseMessage {
        &self.response
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Wall-clock time the call entered `Running`.
    pub fn start_timestamp(&self) -> Option<SystemTime> {
        self.start_timestamp
    }

    /// Time between `Running` and `Completed`; 0 until completed.
    pub fn execution_seconds(&self) -> f64 {
        self.execution_seconds
    }

    pub fn timeout_seconds(&self) -> f64 {
        self.timeout_seconds
    }

    /// Per-call transfer timeout. 0 disables it.
    pub fn set_timeout_seconds(&mut self, seconds: f64) -> &mut Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Transfer error code, 0 on success. Meaningful once completed.
    pub fn error_code(&self) -> i32 {
        self.error_code
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn has_error(&self) -> bool {
        self.error_code != 0
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    /// Capture a verbose transfer trace. Must be set before execution.
    pub fn set_debug_mode(&mut self, debug_mode: bool) -> &mut Self {
        self.debug_mode = debug_mode;
        self
    }

    /// Verbose trace captured during execution in debug mode.
    pub fn debug_info(&self) -> Option<&str> {
        self.debug_info.as_deref()
    }

    /// Final transfer metadata, once completed.
    pub fn transfer_info(&self) -> Option<&TransferInfo> {
        self.transfer_info.as_ref()
    }

    pub fn attach_stats(&mut self, stats: Arc<CallStats>) -> &mut Self {
        self.stats = Some(stats);
        self
    }

    pub fn stats(&self) -> Option<&Arc<CallStats>> {
        self.stats.as_ref()
    }

    pub fn set_poll_settings(&mut self, poll: PollSettings) -> &mut Self {
        self.poll = poll;
        self
    }

    /// Moves the call along its lifecycle, starting or stopping its timer.
    pub fn set_state(&mut self, new_state: CallState) -> Result<()> {
        let allowed = matches!(
            (self.state, new_state),
            (CallState::Created, CallState::Running) | (CallState::Running, CallState::Completed)
        );
        if !allowed {
            return Err(Error::InvalidStateTransition {
                from: self.state,
                to: new_state,
            });
        }

        match new_state {
            CallState::Running => self.start_timer(),
            CallState::Completed => self.stop_timer(),
            CallState::Created => {}
        }

        tracing::trace!(
            method = %self.request.method(),
            uri = %self.request.uri(),
            from = %self.state,
            to = %new_state,
            "Call state changed"
        );
        self.state = new_state;
        Ok(())
    }

    fn start_timer(&mut self) {
        self.started_at = Some(Instant::now());
        self.start_timestamp = Some(SystemTime::now());
        if let Some(stats) = &self.stats {
            stats.record_start();
        }
    }

    fn stop_timer(&mut self) {
        let elapsed = self
            .started_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);
        self.execution_seconds = elapsed.as_secs_f64();
        if let Some(stats) = &self.stats {
            stats.record_completion(elapsed);
        }
    }

    /// Compiles the request into a transfer without touching call state.
    pub(crate) fn prepare_transfer(&self) -> Result<Transfer> {
        let mut headers = self.request.compile_header_lines();
        let body = self.request.compile_body()?;

        if let Some(content_type) = body.as_ref().and_then(|b| b.content_type.clone()) {
            if self.request.header("content-type").is_none() {
                headers.push(("content-type".to_string(), content_type));
            }
        }

        Ok(Transfer {
            method: self.request.method(),
            url: self.request.compile_url(),
            headers,
            body: body.map(|b| b.bytes),
            timeout: Duration::try_from_secs_f64(self.timeout_seconds).unwrap_or(Duration::ZERO),
            verbose: self.debug_mode,
        })
    }

    /// Resets the response and enters `Running`.
    pub(crate) fn begin_transfer(&mut self) -> Result<()> {
        if self.state != CallState::Created {
            return Err(Error::InvalidStateTransition {
                from: self.state,
                to: CallState::Running,
            });
        }

        self.response.reset();
        self.error_code = 0;
        self.error_message.clear();
        self.debug_info = self.debug_mode.then(String::new);
        self.transfer_info = None;

        self.set_state(CallState::Running)
    }

    /// Routes one transfer event into this call's response.
    pub(crate) fn apply_event(&mut self, event: TransferEvent) {
        match event {
            TransferEvent::HeaderLine(line) => {
                self.response.parse_header_line(&line);
            }
            TransferEvent::BodyChunk(chunk) => self.response.append_body(&chunk),
            TransferEvent::Debug(line) => {
                if let Some(trace) = &mut self.debug_info {
                    trace.push_str(&line);
                    trace.push('\n');
                }
            }
        }
    }

    /// Enters `Completed` and records what the transfer reported.
    pub(crate) fn finish_transfer(&mut self, outcome: TransferOutcome) -> Result<()> {
        self.set_state(CallState::Completed)?;

        self.error_code = outcome.code;
        self.error_message = outcome.message;
        self.transfer_info = Some(outcome.info);

        if self.error_code != 0 {
            tracing::warn!(
                method = %self.request.method(),
                uri = %self.request.uri(),
                code = self.error_code,
                error = %self.error_message,
                "Transfer failed"
            );
        } else {
            tracing::debug!(
                method = %self.request.method(),
                uri = %self.request.uri(),
                status = ?self.response.status_code(),
                seconds = self.execution_seconds,
                "Transfer completed"
            );
        }
        Ok(())
    }

    /// Executes the request on its own and returns the response.
    ///
    /// Fails with [`Error::Transfer`] when the transfer failed before any
    /// body arrived. HTTP error statuses are not checked here; see
    /// [`ResponseMessage::validate_status`].
    pub fn exec(&mut self) -> Result<&ResponseMessage> {
        const TOKEN: usize = 0;

        let mut mux = self.engine.multiplexer()?;
        let transfer = self.prepare_transfer()?;
        self.begin_transfer()?;

        let poll = self.poll;
        let driven = mux
            .add(TOKEN, transfer)
            .and_then(|_| multi::drive(&mut mux, &poll, |_, event| self.apply_event(event)));

        let outcome = match mux.remove(TOKEN) {
            Ok(outcome) => outcome,
            Err(e) => {
                TransferOutcome::failed(TransferCode::Aborted, e.to_string(), TransferInfo::default())
            }
        };
        self.finish_transfer(outcome)?;
        driven?;

        if self.response.raw_body().is_none() && self.error_code != 0 {
            return Err(Error::Transfer {
                code: self.error_code,
                message: self.error_message.clone(),
            });
        }

        Ok(&self.response)
    }
}

impl<E: Engine> fmt::Debug for Call<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("method", &self.request.method())
            .field("uri", &self.request.uri())
            .field("state", &self.state)
            .field("error_code", &self.error_code)
            .field("execution_seconds", &self.execution_seconds)
            .finish()
    }
}
