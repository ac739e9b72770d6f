//! httpcall - Parallel HTTP call layer
//!
//! Individual HTTP calls with a strict lifecycle, a driver that runs many of
//! them concurrently over one multiplexed event loop, and a buffered executor
//! that batches submitted calls.

pub mod call;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod multi;
pub mod transport;

pub use call::{Call, CallState, CallStats};
pub use error::{Error, Result};
pub use executor::{BufferedExecutor, ExecutorEvent, ExecutorEventKind};
pub use http::request::{Method, RequestMessage};
pub use http::response::ResponseMessage;
pub use multi::{CallInput, MultiCall, PollSettings};
