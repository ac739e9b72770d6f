//! Parallel multi-call driver.
//!
//! A [`MultiCall`] opens one transfer per call, registers them all with a
//! single [`Multiplexer`] and drives it from the current thread until nothing
//! is left in flight. Events come back tagged with the token of their
//! transfer; the token is the call's position in the keyed list, so an event
//! can only ever reach the call that issued the transfer.
//!
//! Per-call failures (refused connections, timeouts) end up on the call's
//! `error_code`/`error_message`. `exec` only fails for setup errors and for
//! multiplexer-level failures.

use std::fmt;
use std::time::{Duration, Instant, SystemTime};

use crate::call::{Call, CallState};
use crate::error::{Error, Result};
use crate::http::request::RequestMessage;
use crate::transport::{
    Engine, Multiplexer, Progress, Readiness, TcpEngine, TransferCode, TransferEvent, TransferInfo,
    TransferOutcome,
};

/// How the driver waits between pumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Upper bound of one readiness wait
    pub wait_timeout: Duration,
    /// Sleep between pumps when the multiplexer cannot wait for readiness
    pub fallback_interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(1),
            fallback_interval: Duration::from_millis(10),
        }
    }
}

/// Pumps `mux` until no transfer is in flight, handing every event to
/// `on_event` in arrival order.
pub(crate) fn drive<M: Multiplexer>(
    mux: &mut M,
    poll: &PollSettings,
    mut on_event: impl FnMut(usize, TransferEvent),
) -> Result<()> {
    let mut events = Vec::new();
    let mut degraded = false;

    let mut progress = pump(mux, &mut events, &mut on_event)?;

    while progress.running > 0 {
        match mux.wait(poll.wait_timeout)? {
            Readiness::Ready(ready) => {
                tracing::trace!(ready, running = progress.running, "Multiplexer ready");
            }
            Readiness::Unsupported => {
                if !degraded {
                    tracing::warn!(
                        interval_ms = poll.fallback_interval.as_millis() as u64,
                        "Multiplexer cannot wait for readiness, falling back to polling"
                    );
                    degraded = true;
                }
                std::thread::sleep(poll.fallback_interval);
            }
        }

        progress = pump(mux, &mut events, &mut on_event)?;
    }

    Ok(())
}

/// Performs until the multiplexer reports no immediate further progress.
fn pump<M: Multiplexer>(
    mux: &mut M,
    events: &mut Vec<(usize, TransferEvent)>,
    on_event: &mut impl FnMut(usize, TransferEvent),
) -> Result<Progress> {
    loop {
        let progress = mux.perform(events)?;
        for (token, event) in events.drain(..) {
            on_event(token, event);
        }
        if !progress.call_again {
            return Ok(progress);
        }
    }
}

/// Something the driver can execute.
pub enum CallInput<E: Engine = TcpEngine> {
    /// Wrapped into a new call on the driver's engine
    Request(RequestMessage),
    /// Executed as is; must not have run yet
    Call(Call<E>),
}

impl<E: Engine> From<RequestMessage> for CallInput<E> {
    fn from(request: RequestMessage) -> Self {
        CallInput::Request(request)
    }
}

impl<E: Engine> From<Call<E>> for CallInput<E> {
    fn from(call: Call<E>) -> Self {
        CallInput::Call(call)
    }
}

/// A keyed batch of calls executed concurrently.
pub struct MultiCall<K, E: Engine = TcpEngine> {
    engine: E,
    calls: Vec<(K, Call<E>)>,
    error_code: i32,
    start_timestamp: Option<SystemTime>,
    execution_seconds: f64,
    poll: PollSettings,
}

impl<K: PartialEq + fmt::Debug> MultiCall<K, TcpEngine> {
    /// Batch on the default TCP engine.
    pub fn parallel<I, T>(inputs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, T)>,
        T: Into<CallInput<TcpEngine>>,
    {
        Self::new(TcpEngine::default(), inputs)
    }
}

impl<K: PartialEq + fmt::Debug, E: Engine + Clone> MultiCall<K, E> {
    /// Builds the batch. Requests are wrapped into calls on `engine`; calls
    /// that already left `Created` are rejected.
    pub fn new<I, T>(engine: E, inputs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, T)>,
        T: Into<CallInput<E>>,
    {
        let mut multi = Self {
            engine,
            calls: Vec::new(),
            error_code: 0,
            start_timestamp: None,
            execution_seconds: 0.0,
            poll: PollSettings::default(),
        };

        for (key, input) in inputs {
            let call = match input.into() {
                CallInput::Request(request) => Call::with_engine(request, multi.engine.clone()),
                CallInput::Call(call) if call.state() == CallState::Created => call,
                CallInput::Call(call) => {
                    return Err(Error::UnsupportedRequestObject(format!(
                        "call {:?} is already {}",
                        key,
                        call.state()
                    )));
                }
            };
            multi.set_call(key, Some(call));
        }

        Ok(multi)
    }

    /// Sets the call under `key`, replacing any previous one; `None` removes it.
    pub fn set_call(&mut self, key: K, call: Option<Call<E>>) {
        let position = self.calls.iter().position(|(k, _)| *k == key);
        match (position, call) {
            (Some(i), Some(call)) => self.calls[i].1 = call,
            (None, Some(call)) => self.calls.push((key, call)),
            (Some(i), None) => {
                self.calls.remove(i);
            }
            (None, None) => {}
        }
    }

    pub fn call(&self, key: &K) -> Option<&Call<E>> {
        self.calls.iter().find(|(k, _)| k == key).map(|(_, c)| c)
    }

    /// Calls in insertion order.
    pub fn calls(&self) -> &[(K, Call<E>)] {
        &self.calls
    }

    pub fn into_calls(self) -> Vec<(K, Call<E>)> {
        self.calls
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Multiplexer status after `exec`, 0 when healthy.
    pub fn error_code(&self) -> i32 {
        self.error_code
    }

    pub fn start_timestamp(&self) -> Option<SystemTime> {
        self.start_timestamp
    }

    /// Duration of the whole batch, not of individual calls.
    pub fn execution_seconds(&self) -> f64 {
        self.execution_seconds
    }

    pub fn set_poll_settings(&mut self, poll: PollSettings) -> &mut Self {
        self.poll = poll;
        self
    }

    /// Executes every call and returns once all of them completed.
    pub fn exec(&mut self) -> Result<&mut Self> {
        let mut mux = self.engine.multiplexer()?;

        // Compile everything first so a bad request leaves every call untouched.
        let transfers = self
            .calls
            .iter()
            .map(|(_, call)| call.prepare_transfer())
            .collect::<Result<Vec<_>>>()?;

        let mut registration = Ok(());
        for (token, ((_, call), transfer)) in self.calls.iter_mut().zip(transfers).enumerate() {
            registration = call
                .begin_transfer()
                .and_then(|()| mux.add(token, transfer));
            if registration.is_err() {
                break;
            }
        }
        if let Err(e) = registration {
            self.abort_all(&mut mux, &e)?;
            return Err(e);
        }

        tracing::debug!(calls = self.calls.len(), "Executing multi-call");

        self.start_timestamp = Some(SystemTime::now());
        let started = Instant::now();

        let calls = &mut self.calls;
        let driven = drive(&mut mux, &self.poll, |token, event| match calls.get_mut(token) {
            Some((_, call)) => call.apply_event(event),
            None => tracing::warn!(token, "Event for unknown transfer dropped"),
        });

        self.execution_seconds = started.elapsed().as_secs_f64();

        for (token, (_, call)) in self.calls.iter_mut().enumerate() {
            let outcome = mux.remove(token).unwrap_or_else(|e| {
                TransferOutcome::failed(TransferCode::Aborted, e.to_string(), TransferInfo::default())
            });
            call.finish_transfer(outcome)?;
        }

        self.error_code = match &driven {
            Err(Error::Multiplexer { code, .. }) => *code,
            _ => mux.status(),
        };
        driven?;

        let failed = self.calls.iter().filter(|(_, c)| c.has_error()).count();
        tracing::info!(
            calls = self.calls.len(),
            failed,
            seconds = self.execution_seconds,
            "Multi-call completed"
        );

        Ok(self)
    }

    /// Completes every call with an `Aborted` outcome after registration
    /// failed. Calls that were already added are pulled out of `mux` first.
    fn abort_all(&mut self, mux: &mut E::Multi, cause: &Error) -> Result<()> {
        let message = format!("Transfer not started: {}", cause);
        for (token, (_, call)) in self.calls.iter_mut().enumerate() {
            if call.state() == CallState::Created {
                call.begin_transfer()?;
            }
            if call.state() == CallState::Running {
                let _ = mux.remove(token);
                call.finish_transfer(TransferOutcome::failed(
                    TransferCode::Aborted,
                    message.clone(),
                    TransferInfo::default(),
                ))?;
            }
        }

        self.error_code = match cause {
            Error::Multiplexer { code, .. } => *code,
            _ => TransferCode::Aborted.code(),
        };
        tracing::warn!(calls = self.calls.len(), error = %cause, "Multi-call setup failed");
        Ok(())
    }
}
