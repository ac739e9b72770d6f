//! The bundled transfer engine.
//!
//! A [`TcpMultiplexer`] owns a current-thread tokio runtime. Every registered
//! transfer is spawned onto it as a task, so all sockets are driven from the
//! caller's thread, and only while the caller is inside
//! [`perform`](Multiplexer::perform) or [`wait`](Multiplexer::wait).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::transport::exchange::{self, Signal};
use crate::transport::{
    Engine, Multiplexer, Progress, Readiness, Transfer, TransferCode, TransferEvent, TransferInfo,
    TransferOutcome,
};

/// Settings shared by every transfer of a [`TcpEngine`].
#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub connect_timeout: Duration,
    /// Sent unless the request sets its own `User-Agent`
    pub user_agent: String,
    pub max_header_bytes: usize,
    /// Upper bound of signals drained by one `perform`
    pub max_signals_per_perform: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            user_agent: concat!("httpcall/", env!("CARGO_PKG_VERSION")).to_string(),
            max_header_bytes: 64 * 1024,
            max_signals_per_perform: 256,
        }
    }
}

/// Plain-TCP HTTP/1.1 engine.
#[derive(Debug, Clone, Default)]
pub struct TcpEngine {
    config: Arc<TcpConfig>,
}

impl TcpEngine {
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }
}

impl Engine for TcpEngine {
    type Multi = TcpMultiplexer;

    fn multiplexer(&self) -> Result<TcpMultiplexer> {
        TcpMultiplexer::new(self.config.clone())
    }
}

pub struct TcpMultiplexer {
    runtime: Runtime,
    config: Arc<TcpConfig>,
    tx: UnboundedSender<Signal>,
    rx: UnboundedReceiver<Signal>,
    tasks: HashMap<usize, JoinHandle<()>>,
    outcomes: HashMap<usize, TransferOutcome>,
    in_flight: usize,
    /// Signal picked up by `wait`, handed out by the next `perform`
    stashed: Option<Signal>,
}

impl TcpMultiplexer {
    pub fn new(config: Arc<TcpConfig>) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let (tx, rx) = mpsc::unbounded_channel();

        Ok(Self {
            runtime,
            config,
            tx,
            rx,
            tasks: HashMap::new(),
            outcomes: HashMap::new(),
            in_flight: 0,
            stashed: None,
        })
    }

    fn route(&mut self, signal: Signal, events: &mut Vec<(usize, TransferEvent)>) {
        match signal {
            Signal::Event(token, event) => events.push((token, event)),
            Signal::Done(token, outcome) => {
                self.tasks.remove(&token);
                self.outcomes.insert(token, outcome);
                self.in_flight = self.in_flight.saturating_sub(1);
            }
        }
    }

    /// Records an outcome for every task that ended without a `Done` signal,
    /// which only happens when the exchange panicked.
    fn reap_silent_tasks(&mut self) {
        let silent: Vec<usize> = self
            .tasks
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(token, _)| *token)
            .collect();

        for token in silent {
            self.tasks.remove(&token);
            tracing::warn!(token, "Transfer task ended without an outcome");
            self.outcomes.insert(
                token,
                TransferOutcome::failed(
                    TransferCode::RecvError,
                    "Transfer task ended without completing",
                    TransferInfo::default(),
                ),
            );
            self.in_flight = self.in_flight.saturating_sub(1);
        }
    }
}

impl Multiplexer for TcpMultiplexer {
    fn add(&mut self, token: usize, transfer: Transfer) -> Result<()> {
        if self.tasks.contains_key(&token) || self.outcomes.contains_key(&token) {
            return Err(Error::multiplexer(
                1,
                format!("token {} is already registered", token),
            ));
        }

        tracing::debug!(token, method = %transfer.method, url = %transfer.url, "Adding transfer");

        let task = exchange::run_transfer(token, transfer, self.config.clone(), self.tx.clone());
        let handle = self.runtime.spawn(task);
        self.tasks.insert(token, handle);
        self.in_flight += 1;

        Ok(())
    }

    fn perform(&mut self, events: &mut Vec<(usize, TransferEvent)>) -> Result<Progress> {
        // One scheduler turn: run ready tasks, poll the IO driver without blocking.
        self.runtime.block_on(tokio::task::yield_now());

        let limit = self.config.max_signals_per_perform.max(1);
        let mut drained = 0;

        if let Some(signal) = self.stashed.take() {
            self.route(signal, events);
            drained += 1;
        }

        while drained < limit {
            match self.rx.try_recv() {
                Ok(signal) => {
                    self.route(signal, events);
                    drained += 1;
                }
                Err(_) => break,
            }
        }

        // With the channel empty, a finished task still in `tasks` never sent
        // its outcome.
        if drained < limit && self.stashed.is_none() {
            self.reap_silent_tasks();
        }

        Ok(Progress {
            running: self.in_flight,
            call_again: drained >= limit,
        })
    }

    fn wait(&mut self, timeout: Duration) -> Result<Readiness> {
        if self.stashed.is_some() {
            return Ok(Readiness::Ready(1));
        }

        let rx = &mut self.rx;
        let received = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, rx.recv()).await });

        match received {
            Ok(Some(signal)) => {
                self.stashed = Some(signal);
                Ok(Readiness::Ready(1))
            }
            Ok(None) => Err(Error::multiplexer(2, "transfer channel closed")),
            Err(_) => Ok(Readiness::Ready(0)),
        }
    }

    fn remove(&mut self, token: usize) -> Result<TransferOutcome> {
        if let Some(outcome) = self.outcomes.remove(&token) {
            return Ok(outcome);
        }

        match self.tasks.remove(&token) {
            Some(handle) => {
                handle.abort();
                self.in_flight = self.in_flight.saturating_sub(1);
                Ok(TransferOutcome::failed(
                    TransferCode::Aborted,
                    "Transfer removed before completion",
                    TransferInfo::default(),
                ))
            }
            None => Err(Error::multiplexer(
                3,
                format!("token {} is not registered", token),
            )),
        }
    }
}
