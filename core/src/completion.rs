//! Single-fulfillment completions for process exits
//!
//! Every registry entry owns one [`CompletionCell`]: a fulfill-once slot plus
//! a list of continuations. Fulfillment stores the outcome and drains the
//! list under the lock; continuations attached afterwards see the stored
//! outcome immediately, so none is ever dropped.
//!
//! Continuations never run on the thread performing the fulfillment. Each is
//! dispatched as its own blocking task on the runtime captured when the
//! registry was built, so one panicking continuation cannot stop the others.
//!
//! [`CompletionFuture`] is the caller-facing side: awaitable, pollable with
//! [`CompletionFuture::try_get`], and able to register continuations with
//! [`CompletionFuture::then`].

use crate::error::WatchError;
use crate::handle::ProcessHandle;
use schema::ExitRecord;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::warn;

/// A process's exit as delivered to continuations: its handle plus the record
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessExit {
    /// The process that exited
    pub handle: ProcessHandle,
    /// How it exited
    pub record: ExitRecord,
}

/// Result carried by a fulfilled completion
pub type ExitOutcome = std::result::Result<ProcessExit, WatchError>;

/// What the cell stores; the handle is attached on the way out so the entry
/// owning the cell does not reference itself.
pub(crate) type RawOutcome = std::result::Result<ExitRecord, WatchError>;

type Continuation = Box<dyn FnOnce(RawOutcome) + Send + 'static>;

struct CellState {
    outcome: Option<RawOutcome>,
    continuations: Vec<Continuation>,
}

/// Fulfill-once slot with drained continuation list
pub(crate) struct CompletionCell {
    pid: u32,
    state: Mutex<CellState>,
    tx: watch::Sender<Option<RawOutcome>>,
    runtime: tokio::runtime::Handle,
}

impl CompletionCell {
    pub(crate) fn new(pid: u32, runtime: tokio::runtime::Handle) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            pid,
            state: Mutex::new(CellState {
                outcome: None,
                continuations: Vec::new(),
            }),
            tx,
            runtime,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CellState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the outcome and release every waiting continuation.
    ///
    /// Returns `false` without changing anything if already fulfilled.
    pub(crate) fn fulfill(&self, outcome: RawOutcome) -> bool {
        let drained = {
            let mut state = self.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.continuations)
        };

        self.tx.send_replace(Some(outcome.clone()));
        for continuation in drained {
            self.dispatch(continuation, outcome.clone());
        }
        true
    }

    /// Register a continuation; runs right away if the outcome is already known
    pub(crate) fn attach(&self, continuation: Continuation) {
        let ready = {
            let mut state = self.lock();
            match state.outcome.clone() {
                Some(outcome) => Some((continuation, outcome)),
                None => {
                    state.continuations.push(continuation);
                    None
                }
            }
        };
        if let Some((continuation, outcome)) = ready {
            self.dispatch(continuation, outcome);
        }
    }

    pub(crate) fn peek(&self) -> Option<RawOutcome> {
        self.lock().outcome.clone()
    }

    pub(crate) fn is_done(&self) -> bool {
        self.lock().outcome.is_some()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<RawOutcome>> {
        self.tx.subscribe()
    }

    fn dispatch(&self, continuation: Continuation, outcome: RawOutcome) {
        let pid = self.pid;
        let task = self
            .runtime
            .spawn_blocking(move || continuation(outcome));
        self.runtime.spawn(async move {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!("Exit continuation for process {} panicked", pid);
                }
            }
        });
    }
}

impl fmt::Debug for CompletionCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("CompletionCell")
            .field("pid", &self.pid)
            .field("outcome", &state.outcome)
            .field("pending_continuations", &state.continuations.len())
            .finish()
    }
}

/// Asynchronous result of a process's exit
///
/// Cloning is cheap; every clone observes the same single fulfillment.
#[derive(Clone)]
pub struct CompletionFuture {
    handle: ProcessHandle,
    rx: watch::Receiver<Option<RawOutcome>>,
}

impl CompletionFuture {
    pub(crate) fn new(handle: ProcessHandle) -> Self {
        let rx = handle.entry().completion.subscribe();
        Self { handle, rx }
    }

    /// The process this completion belongs to
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// Whether the exit has been delivered
    pub fn is_done(&self) -> bool {
        self.handle.entry().completion.is_done()
    }

    /// The outcome if already delivered, without waiting
    pub fn try_get(&self) -> Option<ExitOutcome> {
        self.handle
            .entry()
            .completion
            .peek()
            .map(|raw| self.resolve(raw))
    }

    /// Register a continuation to run once with the outcome.
    ///
    /// Continuations run on the blocking pool, never on the thread that
    /// delivers the exit. Attaching after delivery runs it immediately.
    pub fn then<F>(&self, continuation: F) -> &Self
    where
        F: FnOnce(ExitOutcome) + Send + 'static,
    {
        let handle = self.handle.clone();
        self.handle
            .entry()
            .completion
            .attach(Box::new(move |raw: RawOutcome| {
                continuation(raw.map(|record| ProcessExit { handle, record }))
            }));
        self
    }

    /// Wait for the outcome
    pub async fn wait(&self) -> ExitOutcome {
        let mut rx = self.rx.clone();
        let raw = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };
        let raw = raw.unwrap_or_else(|| {
            Err(WatchError::WaitFailed {
                pid: self.handle.pid(),
                message: "completion channel closed".to_string(),
            })
        });
        self.resolve(raw)
    }

    fn resolve(&self, raw: RawOutcome) -> ExitOutcome {
        raw.map(|record| ProcessExit {
            handle: self.handle.clone(),
            record,
        })
    }
}

impl IntoFuture for CompletionFuture {
    type Output = ExitOutcome;
    type IntoFuture = Pin<Box<dyn Future<Output = ExitOutcome> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

impl fmt::Debug for CompletionFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionFuture")
            .field("handle", &self.handle)
            .field("done", &self.is_done())
            .finish()
    }
}
