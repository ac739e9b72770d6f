//! Buffered executor: collects calls and runs them in parallel batches.
//!
//! Calls accumulate in a pending queue until `buffer_size` of them are
//! waiting, then the whole queue is flushed through one [`MultiCall`].
//! Nothing flushes implicitly on drop; call
//! [`invoke_all`](BufferedExecutor::invoke_all) once more at shutdown.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::call::{Call, CallState, CallStats};
use crate::error::{Error, Result};
use crate::multi::{MultiCall, PollSettings};
use crate::transport::{Engine, TcpEngine};

/// Name of an executor notification, used to subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorEventKind {
    BeforeFlush,
    CallCompleted,
    AfterFlush,
}

impl ExecutorEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutorEventKind::BeforeFlush => "before-flush",
            ExecutorEventKind::CallCompleted => "call-completed",
            ExecutorEventKind::AfterFlush => "after-flush",
        }
    }
}

impl fmt::Display for ExecutorEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload handed to listeners.
pub enum ExecutorEvent<'a, E: Engine = TcpEngine> {
    /// A non-empty queue is about to run
    BeforeFlush { pending: usize },
    /// One call of the running batch completed; fired in submission order
    CallCompleted { index: usize, call: &'a Call<E> },
    /// The batch finished and the totals were updated. `error_code` is the
    /// multiplexer status of the batch, 0 when healthy.
    AfterFlush {
        executed: usize,
        batch_seconds: f64,
        error_code: i32,
    },
}

impl<E: Engine> ExecutorEvent<'_, E> {
    pub fn kind(&self) -> ExecutorEventKind {
        match self {
            ExecutorEvent::BeforeFlush { .. } => ExecutorEventKind::BeforeFlush,
            ExecutorEvent::CallCompleted { .. } => ExecutorEventKind::CallCompleted,
            ExecutorEvent::AfterFlush { .. } => ExecutorEventKind::AfterFlush,
        }
    }
}

type Listener<E> = Box<dyn FnMut(&ExecutorEvent<'_, E>)>;

pub struct BufferedExecutor<E: Engine = TcpEngine> {
    engine: E,
    buffer_size: usize,
    queue: Vec<Call<E>>,
    listeners: HashMap<ExecutorEventKind, Vec<Listener<E>>>,
    stats: Arc<CallStats>,
    poll: PollSettings,
    total_executed_call_count: u64,
    total_call_execution_seconds: f64,
    last_error_code: i32,
}

impl BufferedExecutor<TcpEngine> {
    pub fn new(buffer_size: usize) -> Self {
        Self::with_engine(TcpEngine::default(), buffer_size)
    }
}

impl<E: Engine + Clone> BufferedExecutor<E> {
    /// A `buffer_size` of 0 behaves like 1: every submit flushes.
    pub fn with_engine(engine: E, buffer_size: usize) -> Self {
        Self {
            engine,
            buffer_size: buffer_size.max(1),
            queue: Vec::new(),
            listeners: HashMap::new(),
            stats: Arc::new(CallStats::new()),
            poll: PollSettings::default(),
            total_executed_call_count: 0,
            total_call_execution_seconds: 0.0,
            last_error_code: 0,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn set_poll_settings(&mut self, poll: PollSettings) -> &mut Self {
        self.poll = poll;
        self
    }

    /// Registers `listener` for every future event of `kind`.
    pub fn subscribe<F>(&mut self, kind: ExecutorEventKind, listener: F) -> &mut Self
    where
        F: FnMut(&ExecutorEvent<'_, E>) + 'static,
    {
        self.listeners
            .entry(kind)
            .or_default()
            .push(Box::new(listener));
        self
    }

    pub fn has_listener(&self, kind: ExecutorEventKind) -> bool {
        self.listeners.get(&kind).is_some_and(|l| !l.is_empty())
    }

    fn dispatch(&mut self, event: &ExecutorEvent<'_, E>) {
        if let Some(listeners) = self.listeners.get_mut(&event.kind()) {
            for listener in listeners.iter_mut() {
                listener(event);
            }
        }
    }

    /// Queues a call. Returns the executed batch when this submit filled the
    /// buffer, otherwise an empty list.
    pub fn submit(&mut self, mut call: Call<E>) -> Result<Vec<Call<E>>> {
        if call.state() != CallState::Created {
            return Err(Error::UnsupportedRequestObject(format!(
                "cannot submit a call that is already {}",
                call.state()
            )));
        }

        call.attach_stats(self.stats.clone());
        self.queue.push(call);
        tracing::trace!(
            pending = self.queue.len(),
            buffer_size = self.buffer_size,
            "Call submitted"
        );

        if self.queue.len() >= self.buffer_size {
            return self.invoke_all();
        }
        Ok(Vec::new())
    }

    /// Executes every pending call as one parallel batch.
    ///
    /// A multiplexer-level failure does not lose the batch: its calls come
    /// back completed with an `Aborted` code and the failure is kept in
    /// [`last_error_code`](Self::last_error_code). When the batch could not
    /// start at all, the calls stay queued and the error is returned.
    pub fn invoke_all(&mut self) -> Result<Vec<Call<E>>> {
        if self.queue.is_empty() {
            return Ok(Vec::new());
        }

        let pending = self.queue.len();
        self.dispatch(&ExecutorEvent::BeforeFlush { pending });

        let batch = std::mem::take(&mut self.queue);
        let mut multi = MultiCall::new(self.engine.clone(), batch.into_iter().enumerate())?;
        multi.set_poll_settings(self.poll);
        let executed = multi.exec().map(|_| ());

        let batch_seconds = multi.execution_seconds();
        let error_code = multi.error_code();
        let calls: Vec<Call<E>> = multi.into_calls().into_iter().map(|(_, c)| c).collect();

        if let Err(e) = executed {
            if calls.iter().all(|c| c.state() == CallState::Created) {
                tracing::warn!(pending, error = %e, "Flush could not start, calls stay queued");
                self.queue = calls;
                return Err(e);
            }
            tracing::warn!(pending, error_code, error = %e, "Flush hit a multiplexer failure");
        }
        self.last_error_code = error_code;

        for (index, call) in calls.iter().enumerate() {
            self.dispatch(&ExecutorEvent::CallCompleted { index, call });
        }

        self.total_executed_call_count += pending as u64;
        self.total_call_execution_seconds += batch_seconds;

        self.dispatch(&ExecutorEvent::AfterFlush {
            executed: pending,
            batch_seconds,
            error_code,
        });

        tracing::info!(
            executed = pending,
            batch_seconds,
            throughput = self.mean_throughput(),
            "Flushed call buffer"
        );

        Ok(calls)
    }

    /// Calls waiting for the next flush.
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn total_executed_call_count(&self) -> u64 {
        self.total_executed_call_count
    }

    /// Sum of batch durations, not of individual call durations.
    pub fn total_call_execution_seconds(&self) -> f64 {
        self.total_call_execution_seconds
    }

    /// Executed calls per second of batch time, 0 before any time was recorded.
    pub fn mean_throughput(&self) -> f64 {
        if self.total_call_execution_seconds <= 0.0 {
            return 0.0;
        }
        self.total_executed_call_count as f64 / self.total_call_execution_seconds
    }

    /// Multiplexer status of the most recent flush, 0 when healthy.
    pub fn last_error_code(&self) -> i32 {
        self.last_error_code
    }

    /// Takes every queued call back out without running it.
    pub fn drain_pending(&mut self) -> Vec<Call<E>> {
        std::mem::take(&mut self.queue)
    }

    /// Per-call accumulator shared with every submitted call.
    pub fn call_stats(&self) -> &Arc<CallStats> {
        &self.stats
    }
}

impl<E: Engine> fmt::Debug for BufferedExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedExecutor")
            .field("buffer_size", &self.buffer_size)
            .field("pending", &self.queue.len())
            .field("total_executed_call_count", &self.total_executed_call_count)
            .field("total_call_execution_seconds", &self.total_call_execution_seconds)
            .finish()
    }
}
