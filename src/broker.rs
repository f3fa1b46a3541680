//! The broker: owns one worker process and routes calls to it.
//!
//! A [`Broker`] is an explicit value rather than process-wide state. It is
//! cheap to clone; clones share the same worker, so handlers and services
//! receive it by injection.
//!
//! # Architecture
//!
//! ```text
//! submit() ──► admission (Semaphore) ──► dispatch()
//!                                          │
//!                      outbound mpsc ◄─────┤
//!                           │              │ wait_for(key)
//!                      writer task         ▼
//!                           │         PendingTable ◄── collector task
//!                     worker stdin                          │
//!                           └──────► worker process ──► worker stdout
//! ```
//!
//! - Exactly one writer task serializes calls onto the worker's stdin
//! - Exactly one collector task reads responses and publishes them by key
//! - Waiters sleep until their key is published; there is no polling

pub(crate) mod pending;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Instant;

use tokio::process::Child;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::BrokerConfig;
use crate::envelope::{Arguments, Call, CallKey, Response};
use crate::error::{BrokerError, BrokerResult, LockResultExt};
use crate::transport::{
    CollectorHandle, WorkerCommand, WorkerProcess, WriterTaskHandle, spawn_collector_task,
    spawn_worker, spawn_writer_task, terminate,
};
use pending::PendingTable;

/// Handle to a running worker and its transport.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    config: BrokerConfig,
    table: Arc<PendingTable>,
    outbound: mpsc::Sender<Call>,
    /// Bounds concurrently dispatched submissions to `pool_capacity`.
    admission: Arc<Semaphore>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    worker_pid: u32,
    methods: Vec<String>,
    /// Taken by `shutdown()`; dropped with the broker otherwise (kill_on_drop).
    child: Mutex<Option<Child>>,
    tasks: Mutex<Option<TransportTasks>>,
}

struct TransportTasks {
    writer: WriterTaskHandle,
    collector: CollectorHandle,
}

impl TransportTasks {
    fn cancel(&self) {
        self.writer.cancel();
        self.collector.cancel();
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("worker_pid", &self.inner.worker_pid)
            .field("methods", &self.inner.methods)
            .field("in_flight", &self.in_flight())
            .field("available", &self.is_available())
            .finish()
    }
}

impl Broker {
    /// Spawn the worker described by `command` and wait for it to become
    /// ready.
    ///
    /// The worker builds its handlers before announcing readiness, so a
    /// factory failure surfaces here as [`BrokerError::Startup`].
    pub async fn spawn(config: BrokerConfig, command: &WorkerCommand) -> BrokerResult<Self> {
        config.validate()?;

        let WorkerProcess {
            child,
            stdin,
            stdout,
        } = spawn_worker(command)?;

        let table = Arc::new(PendingTable::new());
        let (outbound, outbound_rx) = mpsc::channel(config.outbound_queue_capacity);
        let (ready_tx, ready_rx) = oneshot::channel();

        let tasks = TransportTasks {
            writer: spawn_writer_task(stdin, outbound_rx, Arc::clone(&table)),
            collector: spawn_collector_task(stdout, Arc::clone(&table), ready_tx),
        };

        let ready = match tokio::time::timeout(config.startup_timeout(), ready_rx).await {
            Ok(Ok(ready)) => ready,
            Ok(Err(_)) => {
                let reason = table
                    .closed_reason()
                    .unwrap_or_else(|| "collector stopped".to_string());
                tasks.cancel();
                terminate(child, config.shutdown_timeout()).await;
                return Err(BrokerError::startup(format!(
                    "worker exited before announcing readiness ({})",
                    reason
                )));
            }
            Err(_) => {
                tasks.cancel();
                terminate(child, config.shutdown_timeout()).await;
                return Err(BrokerError::startup(format!(
                    "no ready message within {:?}",
                    config.startup_timeout()
                )));
            }
        };

        log::info!(
            target: "offload::broker",
            "Worker {} ready with {} method(s)",
            ready.pid,
            ready.methods.len()
        );

        let admission = Arc::new(Semaphore::new(config.pool_capacity));
        Ok(Self {
            inner: Arc::new(BrokerInner {
                config,
                table,
                outbound,
                admission,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                worker_pid: ready.pid,
                methods: ready.methods,
                child: Mutex::new(Some(child)),
                tasks: Mutex::new(Some(tasks)),
            }),
        })
    }

    /// Spawn the current executable as the worker, passing `args` so it can
    /// detect worker mode.
    pub async fn spawn_current_exe<I, A>(config: BrokerConfig, args: I) -> BrokerResult<Self>
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let command = WorkerCommand::current_exe(args)?;
        Self::spawn(config, &command).await
    }

    /// Submit a call for asynchronous execution.
    ///
    /// At most `pool_capacity` submissions are dispatched at once; later ones
    /// wait for a free slot. The returned [`Submission`] resolves to the
    /// call's response.
    pub fn submit(&self, call: Call) -> Submission {
        let key = call.key();
        let broker = self.clone();
        let handle = tokio::spawn(async move {
            let _permit = Arc::clone(&broker.inner.admission)
                .acquire_owned()
                .await
                .map_err(|_| BrokerError::unavailable("broker shut down"))?;
            let _slot = InFlightSlot::enter(&broker.inner);
            broker.dispatch(call).await
        });

        Submission { key, handle }
    }

    /// Send `call` and wait for its response.
    ///
    /// Bypasses the admission pool. Fails with
    /// [`BrokerError::WorkerUnavailable`] if the worker is gone, and with
    /// [`BrokerError::Timeout`] if the call timeout elapses first.
    pub async fn dispatch(&self, call: Call) -> BrokerResult<Response> {
        let inner = &self.inner;
        if let Some(reason) = inner.table.closed_reason() {
            return Err(BrokerError::unavailable(reason));
        }

        let key = call.key();
        log::debug!(
            target: "offload::broker",
            "Dispatching {} (key={})",
            call.target_method(),
            key
        );

        let started = Instant::now();
        let enqueued = AtomicBool::new(false);
        let exchange = async {
            inner.outbound.send(call).await.map_err(|_| {
                match inner.table.closed_reason() {
                    Some(reason) => BrokerError::unavailable(reason),
                    None => BrokerError::transport("outbound queue closed"),
                }
            })?;
            enqueued.store(true, Ordering::SeqCst);
            inner.table.wait_for(key).await
        };

        let Some(limit) = inner.config.call_timeout() else {
            return exchange.await;
        };

        if let Ok(result) = tokio::time::timeout(limit, exchange).await {
            return result;
        }

        // A call still waiting for queue space was never sent, so no response
        // can arrive and there is nothing to abandon.
        if enqueued.load(Ordering::SeqCst) {
            if let Some(response) = inner.table.abandon(key) {
                // Arrived right at the deadline.
                return Ok(response);
            }
        }

        let elapsed = started.elapsed();
        log::warn!(
            target: "offload::broker",
            "Call {} timed out after {:?}",
            key,
            elapsed
        );
        Err(BrokerError::Timeout { key, elapsed })
    }

    /// Submit `method` with `arguments` and wait for the response.
    pub async fn call(&self, method: &str, arguments: Arguments) -> BrokerResult<Response> {
        self.submit(Call::with_arguments(method, arguments)).await
    }

    /// Submissions currently holding an admission slot.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Highest value [`in_flight`](Self::in_flight) has reached.
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    /// Responses published but not yet claimed by their waiter.
    pub fn pending_responses(&self) -> usize {
        self.inner.table.len()
    }

    /// Whether the worker channel is still open.
    pub fn is_available(&self) -> bool {
        self.inner.table.closed_reason().is_none()
    }

    /// Why the worker became unavailable, if it did.
    pub fn unavailable_reason(&self) -> Option<String> {
        self.inner.table.closed_reason()
    }

    /// Process id announced by the worker.
    pub fn worker_pid(&self) -> u32 {
        self.inner.worker_pid
    }

    /// Methods the worker registered, sorted.
    pub fn methods(&self) -> &[String] {
        &self.inner.methods
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Stop accepting calls and terminate the worker.
    ///
    /// Outstanding waiters fail with `WorkerUnavailable`. Calling this more
    /// than once is harmless.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.admission.close();
        inner.table.close("broker shut down");

        let tasks = inner.tasks.lock().recover_poison("Broker::shutdown").take();
        if let Some(tasks) = tasks {
            tasks.cancel();
        }

        let child = inner.child.lock().recover_poison("Broker::shutdown").take();
        if let Some(child) = child {
            log::info!(
                target: "offload::broker",
                "Shutting down worker {}",
                inner.worker_pid
            );
            terminate(child, inner.config.shutdown_timeout()).await;
        }
    }
}

/// Counts a submission as in flight while alive.
struct InFlightSlot<'a> {
    inner: &'a BrokerInner,
}

impl<'a> InFlightSlot<'a> {
    fn enter(inner: &'a BrokerInner) -> Self {
        let now = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Future of a submitted call.
///
/// Dropping it does not cancel the call; the response is then discarded.
#[derive(Debug)]
pub struct Submission {
    key: CallKey,
    handle: JoinHandle<BrokerResult<Response>>,
}

impl Submission {
    /// Key of the submitted call.
    pub fn key(&self) -> CallKey {
        self.key
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Future for Submission {
    type Output = BrokerResult<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle)
            .poll(cx)
            .map(|joined| joined.unwrap_or_else(|e| Err(BrokerError::TaskFailed(e.to_string()))))
    }
}
