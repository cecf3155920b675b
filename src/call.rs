/// In-flight call model: correlation keys, results and completion handles

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;

/// Where a request goes: protocol, pipe and destination address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route {
    pub protocol: u8,
    pub pipe: u8,
    pub address: u32,
}

impl Route {
    pub fn new(protocol: u8, pipe: u8, address: u32) -> Self {
        Self { protocol, pipe, address }
    }

    /// Correlation key for a call on this route
    pub fn key(&self, service_id: u16, token: u16) -> CallKey {
        CallKey {
            route: *self,
            service_id,
            token,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proto {} pipe {} addr {:#010x}", self.protocol, self.pipe, self.address)
    }
}

/// Correlation key: (protocol, pipe, address, service id, token)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallKey {
    pub route: Route,
    pub service_id: u16,
    pub token: u16,
}

impl CallKey {
    pub fn new(protocol: u8, pipe: u8, address: u32, service_id: u16, token: u16) -> Self {
        Route::new(protocol, pipe, address).key(service_id, token)
    }
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rid {} token {}", self.route, self.service_id, self.token)
    }
}

/// 调用结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallResult {
    /// An ACK arrived
    Ok,
    /// Nothing arrived before the timeout elapsed
    Timeout,
    /// The peer answered with RST carrying this error code
    RemoteError(u8),
    /// The issuer cancelled the call before it resolved
    Cancelled,
}

impl CallResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, CallResult::Ok)
    }
}

impl fmt::Display for CallResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallResult::Ok => write!(f, "ok"),
            CallResult::Timeout => write!(f, "timeout"),
            CallResult::RemoteError(code) => write!(f, "remote error {}", code),
            CallResult::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Response payload plus result, as seen by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub payload: Bytes,
    pub result: CallResult,
}

impl CallOutcome {
    pub fn new(payload: Bytes, result: CallResult) -> Self {
        Self { payload, result }
    }

    pub fn ok(payload: Bytes) -> Self {
        Self::new(payload, CallResult::Ok)
    }

    pub fn timeout() -> Self {
        Self::new(Bytes::new(), CallResult::Timeout)
    }

    pub fn remote_error(code: u8) -> Self {
        Self::new(Bytes::new(), CallResult::RemoteError(code))
    }

    pub fn cancelled() -> Self {
        Self::new(Bytes::new(), CallResult::Cancelled)
    }

    pub fn into_parts(self) -> (Bytes, CallResult) {
        (self.payload, self.result)
    }
}

/// Completion callback for asynchronous calls
pub type Callback = Box<dyn FnOnce(Bytes, CallResult) + Send + 'static>;

/// Slot a blocked caller sleeps on until the call is resolved
#[derive(Debug, Default)]
pub struct Waiter {
    slot: Mutex<Option<CallOutcome>>,
    ready: Condvar,
}

impl Waiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn fill(&self, outcome: CallOutcome) {
        let mut slot = self.slot.lock();
        *slot = Some(outcome);
        self.ready.notify_all();
    }

    /// Block until the slot is filled or `deadline` passes
    pub fn wait_until(&self, deadline: Instant) -> Option<CallOutcome> {
        let mut slot = self.slot.lock();
        while slot.is_none() {
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.take()
    }

    /// Block until the slot is filled
    pub fn wait(&self) -> CallOutcome {
        let mut slot = self.slot.lock();
        loop {
            if let Some(outcome) = slot.take() {
                return outcome;
            }
            self.ready.wait(&mut slot);
        }
    }
}

/// Handle the table keeps on a blocked caller's waiter
///
/// Dropping it without filling it wakes the caller with `Cancelled`, so a
/// blocking call removed from the table without completion never strands
/// its thread.
pub(crate) struct WaiterSlot(Option<Arc<Waiter>>);

impl WaiterSlot {
    fn fill(mut self, outcome: CallOutcome) {
        if let Some(waiter) = self.0.take() {
            waiter.fill(outcome);
        }
    }
}

impl Drop for WaiterSlot {
    fn drop(&mut self) {
        if let Some(waiter) = self.0.take() {
            waiter.fill(CallOutcome::cancelled());
        }
    }
}

/// How a resolved call reports back to whoever issued it
pub(crate) enum Completion {
    /// A thread blocked in `call_sync`
    Blocking(WaiterSlot),
    /// A task awaiting `call`
    Future(oneshot::Sender<CallOutcome>),
    /// A fire-and-continue caller with a callback
    Callback(Callback),
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Blocking(_) => write!(f, "Blocking"),
            Completion::Future(_) => write!(f, "Future"),
            Completion::Callback(_) => write!(f, "Callback"),
        }
    }
}

/// One in-flight call, owned by the pending table until resolved
#[derive(Debug)]
pub struct PendingCall {
    key: CallKey,
    timeout: Duration,
    started_at: Instant,
    request: Bytes,
    completion: Completion,
}

impl PendingCall {
    /// Asynchronous call resolved through `callback`
    pub fn with_callback<F>(
        key: CallKey,
        timeout: Duration,
        started_at: Instant,
        request: Bytes,
        callback: F,
    ) -> Self
    where
        F: FnOnce(Bytes, CallResult) + Send + 'static,
    {
        Self {
            key,
            timeout,
            started_at,
            request,
            completion: Completion::Callback(Box::new(callback)),
        }
    }

    /// Synchronous call; the returned waiter is what the caller blocks on
    pub fn blocking(key: CallKey, timeout: Duration, started_at: Instant, request: Bytes) -> (Self, Arc<Waiter>) {
        let waiter = Arc::new(Waiter::new());
        let call = Self {
            key,
            timeout,
            started_at,
            request,
            completion: Completion::Blocking(WaiterSlot(Some(waiter.clone()))),
        };
        (call, waiter)
    }

    /// Call awaited as a future
    pub fn future(
        key: CallKey,
        timeout: Duration,
        started_at: Instant,
        request: Bytes,
    ) -> (Self, oneshot::Receiver<CallOutcome>) {
        let (tx, rx) = oneshot::channel();
        let call = Self {
            key,
            timeout,
            started_at,
            request,
            completion: Completion::Future(tx),
        };
        (call, rx)
    }

    pub fn key(&self) -> &CallKey {
        &self.key
    }

    pub(crate) fn set_token(&mut self, token: u16) {
        self.key.token = token;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Request payload, kept for diagnostics only
    pub fn request(&self) -> &Bytes {
        &self.request
    }

    /// True when a completion callback was supplied; only these are reaped
    pub fn is_async(&self) -> bool {
        matches!(self.completion, Completion::Callback(_))
    }

    /// Strictly more than `timeout` has elapsed since the call started
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started_at) > self.timeout
    }

    /// Deliver the outcome. Consumes the call, so it can only happen once.
    pub fn complete(self, outcome: CallOutcome) {
        match self.completion {
            Completion::Blocking(slot) => slot.fill(outcome),
            Completion::Future(tx) => {
                if tx.send(outcome).is_err() {
                    tracing::debug!("Caller dropped before completion: {}", self.key);
                }
            }
            Completion::Callback(callback) => callback(outcome.payload, outcome.result),
        }
    }
}
