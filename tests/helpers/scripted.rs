use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use httpcall::error::{Error, Result};
use httpcall::transport::{
    Engine, Multiplexer, Progress, Readiness, Transfer, TransferCode, TransferEvent, TransferInfo,
    TransferOutcome,
};

/// Events a scripted transfer emits, followed by its outcome.
#[derive(Debug, Clone)]
pub struct Script {
    pub events: Vec<TransferEvent>,
    pub outcome: TransferOutcome,
}

impl Script {
    /// `200 OK` whose body is sent in two chunks.
    pub fn ok(body: &str) -> Self {
        let (head, tail) = body.split_at(body.len() / 2);
        Self {
            events: vec![
                TransferEvent::HeaderLine("HTTP/1.1 200 OK".to_string()),
                TransferEvent::HeaderLine(format!("Content-Length: {}", body.len())),
                TransferEvent::HeaderLine(String::new()),
                TransferEvent::BodyChunk(Bytes::copy_from_slice(head.as_bytes())),
                TransferEvent::BodyChunk(Bytes::copy_from_slice(tail.as_bytes())),
            ],
            outcome: TransferOutcome::ok(TransferInfo {
                status_code: Some(200),
                bytes_received: body.len() as u64,
                ..TransferInfo::default()
            }),
        }
    }

    /// Fails before any byte arrives.
    pub fn refused() -> Self {
        Self {
            events: Vec::new(),
            outcome: TransferOutcome::failed(
                TransferCode::CouldntConnect,
                "Failed to connect: Connection refused",
                TransferInfo::default(),
            ),
        }
    }
}

type Responder = dyn Fn(&Transfer) -> Script + Send + Sync;

/// Counters shared by every multiplexer of one engine.
#[derive(Debug, Default)]
pub struct ScriptStats {
    pub added: AtomicUsize,
    pub performs: AtomicUsize,
    pub waits: AtomicUsize,
    pub unsupported_waits: AtomicUsize,
    pub urls: Mutex<Vec<String>>,
}

/// Engine whose transfers replay scripts, one event per pump, in a
/// pseudo-random interleaving driven by `seed`.
#[derive(Clone)]
pub struct ScriptedEngine {
    responder: Arc<Responder>,
    seed: u64,
    supports_wait: bool,
    fail_after_performs: Option<usize>,
    reject_adds_after: Option<usize>,
    status: i32,
    pub stats: Arc<ScriptStats>,
}

impl ScriptedEngine {
    pub fn new<F>(seed: u64, responder: F) -> Self
    where
        F: Fn(&Transfer) -> Script + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            seed: seed.max(1),
            supports_wait: true,
            fail_after_performs: None,
            reject_adds_after: None,
            status: 0,
            stats: Arc::new(ScriptStats::default()),
        }
    }

    /// Answers every request with its own URL as the body.
    pub fn echo(seed: u64) -> Self {
        Self::new(seed, |transfer| Script::ok(&format!("response for {}", transfer.url)))
    }

    /// Multiplexers report that they cannot wait for readiness.
    #[allow(dead_code)]
    pub fn without_wait(mut self) -> Self {
        self.supports_wait = false;
        self
    }

    /// `perform` fails with a multiplexer error after `performs` successful pumps.
    #[allow(dead_code)]
    pub fn failing_after(mut self, performs: usize) -> Self {
        self.fail_after_performs = Some(performs);
        self
    }

    /// `add` fails with a multiplexer error once `accepted` transfers are registered.
    #[allow(dead_code)]
    pub fn rejecting_adds_after(mut self, accepted: usize) -> Self {
        self.reject_adds_after = Some(accepted);
        self
    }

    #[allow(dead_code)]
    pub fn with_status(mut self, status: i32) -> Self {
        self.status = status;
        self
    }
}

impl Engine for ScriptedEngine {
    type Multi = ScriptedMultiplexer;

    fn multiplexer(&self) -> Result<ScriptedMultiplexer> {
        Ok(ScriptedMultiplexer {
            engine: self.clone(),
            rng: self.seed,
            pending: Vec::new(),
            finished: HashMap::new(),
            performs: 0,
        })
    }
}

pub struct ScriptedMultiplexer {
    engine: ScriptedEngine,
    rng: u64,
    pending: Vec<(usize, VecDeque<TransferEvent>, TransferOutcome)>,
    finished: HashMap<usize, TransferOutcome>,
    performs: usize,
}

impl ScriptedMultiplexer {
    fn next_random(&mut self) -> u64 {
        // xorshift64
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        x
    }
}

impl Multiplexer for ScriptedMultiplexer {
    fn add(&mut self, token: usize, transfer: Transfer) -> Result<()> {
        if self.pending.iter().any(|(t, _, _)| *t == token) || self.finished.contains_key(&token) {
            return Err(Error::multiplexer(1, format!("token {} is already registered", token)));
        }
        if let Some(accepted) = self.engine.reject_adds_after {
            if self.pending.len() + self.finished.len() >= accepted {
                return Err(Error::multiplexer(5, "scripted multiplexer is full"));
            }
        }

        let script = (self.engine.responder)(&transfer);
        self.engine.stats.added.fetch_add(1, Ordering::SeqCst);
        self.engine.stats.urls.lock().unwrap().push(transfer.url.clone());
        self.pending
            .push((token, script.events.into(), script.outcome));
        Ok(())
    }

    fn perform(&mut self, events: &mut Vec<(usize, TransferEvent)>) -> Result<Progress> {
        if let Some(limit) = self.engine.fail_after_performs {
            if self.performs >= limit {
                return Err(Error::multiplexer(9, "scripted multiplexer failure"));
            }
        }
        self.performs += 1;
        self.engine.stats.performs.fetch_add(1, Ordering::SeqCst);

        if self.pending.is_empty() {
            return Ok(Progress {
                running: 0,
                call_again: false,
            });
        }

        let index = (self.next_random() % self.pending.len() as u64) as usize;
        let (token, queue, _) = &mut self.pending[index];
        let token = *token;

        match queue.pop_front() {
            Some(event) => events.push((token, event)),
            None => {
                let (_, _, outcome) = self.pending.swap_remove(index);
                self.finished.insert(token, outcome);
            }
        }

        Ok(Progress {
            running: self.pending.len(),
            call_again: self.next_random() % 3 == 0,
        })
    }

    fn wait(&mut self, _timeout: Duration) -> Result<Readiness> {
        self.engine.stats.waits.fetch_add(1, Ordering::SeqCst);
        if !self.engine.supports_wait {
            self.engine
                .stats
                .unsupported_waits
                .fetch_add(1, Ordering::SeqCst);
            return Ok(Readiness::Unsupported);
        }
        Ok(Readiness::Ready(self.pending.len().min(1)))
    }

    fn remove(&mut self, token: usize) -> Result<TransferOutcome> {
        if let Some(outcome) = self.finished.remove(&token) {
            return Ok(outcome);
        }
        match self.pending.iter().position(|(t, _, _)| *t == token) {
            Some(index) => {
                self.pending.swap_remove(index);
                Ok(TransferOutcome::failed(
                    TransferCode::Aborted,
                    "Transfer removed before completion",
                    TransferInfo::default(),
                ))
            }
            None => Err(Error::multiplexer(3, format!("token {} is not registered", token))),
        }
    }

    fn status(&self) -> i32 {
        self.engine.status
    }
}
