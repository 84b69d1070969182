//! Threaded, non-blocking uploader variant (spec.md §4.7, §5).
//!
//! Wraps [`Uploader`] behind a single worker thread and a FIFO request
//! queue, mirroring the request/reply actor shape this codebase uses for
//! its async services, translated to blocking primitives because the
//! uploader core talks to the database synchronously.

use std::sync::mpsc;
use std::thread::JoinHandle;

use serde_json::{Map, Value};
use tracing::error;

use crate::config::UploaderConfig;
use crate::error::{Result, UploaderError};
use crate::time::{Clock, SystemClock};
use crate::uploader::{DbClientFactory, HttpDbClientFactory, Uploader};

type Reply<T> = mpsc::Sender<Result<T>>;

/// A submitted request's result, delivered once the worker thread processes
/// it. Submission itself never blocks (spec.md §4.7); call `.recv()` on this
/// handle to block until the result is ready, or `.try_recv()` to poll,
/// mirroring the original connector's `unblock()`/`complete()` two-phase
/// test protocol as an ordinary channel read.
pub type Pending<T> = mpsc::Receiver<Result<T>>;

enum Command {
    ListenerTelemetry(Map<String, Value>, Option<i64>, Reply<String>),
    ListenerInformation(Map<String, Value>, Option<i64>, Reply<String>),
    PayloadTelemetry(Vec<u8>, Map<String, Value>, Option<i64>, Reply<String>),
    Flights(Reply<Vec<Value>>),
    Payloads(Reply<Vec<Value>>),
    ReInit(UploaderConfig, Reply<()>),
    Reset(Reply<()>),
}

/// Non-blocking uploader: every public method enqueues a request and
/// returns a [`Pending`] handle immediately — the call never waits on the
/// worker thread or the network. The queue preserves submission order;
/// `re_init` and `reset` are ordinary queued commands like any other
/// request, so a request submitted after one is guaranteed to observe it
/// once the worker reaches that point in the queue, regardless of whether
/// the caller blocked on the earlier handle (spec.md §4.7).
pub struct ThreadedUploader {
    tx: mpsc::Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadedUploader {
    /// Spawn the worker thread, uninitialised until `re_init` is queued.
    pub fn new() -> Self {
        Self::with_factory_and_clock(Box::new(HttpDbClientFactory), Box::new(SystemClock))
    }

    /// Spawn with an injected factory/clock, for tests.
    pub fn with_factory_and_clock(factory: Box<dyn DbClientFactory>, clock: Box<dyn Clock>) -> Self {
        let (tx, rx) = mpsc::channel::<Command>();
        let worker = std::thread::spawn(move || {
            let mut uploader = Uploader::uninitialised(factory, clock);
            for command in rx {
                run_command(&mut uploader, command);
            }
        });
        ThreadedUploader {
            tx,
            worker: Some(worker),
        }
    }

    /// Enqueue `make`'s command and return its reply handle immediately,
    /// without waiting for the worker thread to process it.
    fn send<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Pending<T> {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self.tx.send(make(reply_tx)).is_err() {
            // The worker thread is gone; report it through a fresh handle
            // rather than returning one that would never receive anything
            // (the original `reply_tx` was dropped with the failed send).
            let (fallback_tx, fallback_rx) = mpsc::channel();
            let _ = fallback_tx.send(Err(UploaderError::NotInitialised));
            return fallback_rx;
        }
        reply_rx
    }

    /// Enqueue a `re_init` request (spec.md §4.7). Returns immediately;
    /// `.recv()` the handle to block until the worker has applied it.
    pub fn re_init(&self, config: UploaderConfig) -> Pending<()> {
        self.send(|reply| Command::ReInit(config, reply))
    }

    /// Enqueue a `reset` request. Returns immediately.
    pub fn reset(&self) -> Pending<()> {
        self.send(Command::Reset)
    }

    pub fn listener_telemetry(&self, data: Map<String, Value>, time_created: Option<i64>) -> Pending<String> {
        self.send(|reply| Command::ListenerTelemetry(data, time_created, reply))
    }

    pub fn listener_information(&self, data: Map<String, Value>, time_created: Option<i64>) -> Pending<String> {
        self.send(|reply| Command::ListenerInformation(data, time_created, reply))
    }

    pub fn payload_telemetry(
        &self,
        raw: Vec<u8>,
        metadata: Map<String, Value>,
        time_created: Option<i64>,
    ) -> Pending<String> {
        self.send(|reply| Command::PayloadTelemetry(raw, metadata, time_created, reply))
    }

    pub fn flights(&self) -> Pending<Vec<Value>> {
        self.send(Command::Flights)
    }

    pub fn payloads(&self) -> Pending<Vec<Value>> {
        self.send(Command::Payloads)
    }
}

impl Default for ThreadedUploader {
    fn default() -> Self {
        Self::new()
    }
}

fn run_command(uploader: &mut Uploader, command: Command) {
    match command {
        Command::ListenerTelemetry(data, time_created, reply) => {
            let _ = reply.send(uploader.listener_telemetry(data, time_created));
        }
        Command::ListenerInformation(data, time_created, reply) => {
            let _ = reply.send(uploader.listener_information(data, time_created));
        }
        Command::PayloadTelemetry(raw, metadata, time_created, reply) => {
            let _ = reply.send(uploader.payload_telemetry(&raw, metadata, time_created));
        }
        Command::Flights(reply) => {
            let _ = reply.send(uploader.flights());
        }
        Command::Payloads(reply) => {
            let _ = reply.send(uploader.payloads());
        }
        Command::ReInit(config, reply) => {
            let _ = reply.send(uploader.re_init(config));
        }
        Command::Reset(reply) => {
            uploader.reset();
            let _ = reply.send(Ok(()));
        }
    }
}

/// Drains the queue by closing the channel, then joins the worker thread so
/// no request is dropped mid-flight.
impl Drop for ThreadedUploader {
    fn drop(&mut self) {
        // Dropping `tx` (by letting the last clone go) closes the channel;
        // there is exactly one sender, owned by `self`, so this happens
        // implicitly once the field is dropped after this impl returns.
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("uploader worker thread panicked");
            }
        }
    }
}
