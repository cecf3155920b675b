use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::call::{CallKey, CallOutcome, CallResult, PendingCall, Route, Waiter};
use crate::config::WaitlistConfig;
use crate::error::WaitlistError;
use crate::frame::{Frame, FrameCode, FrameError};
use crate::stats::{WaitlistStats, WaitlistStatsSnapshot};
use crate::token::TokenAllocator;
use crate::transport::{
    dispatch, BlockTransfer, FrameSink, Inbound, PendingTable, ReaperHandle, SegmentingBlockTransfer,
};
use crate::Result;

/// Client side of the RPC layer
///
/// Sends requests through a [`FrameSink`], tracks them in a
/// [`PendingTable`] and matches inbound ACK/RST frames back to them.
/// Share it behind an `Arc` between the calling threads, the receive
/// path and the reaper.
pub struct Waitlist<S: FrameSink> {
    table: Arc<PendingTable>,
    sink: S,
    blocks: Box<dyn BlockTransfer>,
    tokens: TokenAllocator,
    config: WaitlistConfig,
    stats: Arc<WaitlistStats>,
}

impl<S: FrameSink> Waitlist<S> {
    pub fn new(sink: S, config: WaitlistConfig) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(WaitlistStats::new());
        Ok(Self {
            table: Arc::new(PendingTable::with_stats(stats.clone())),
            sink,
            blocks: Box::new(SegmentingBlockTransfer),
            tokens: TokenAllocator::new(config.token_strategy),
            config,
            stats,
        })
    }

    /// Replace the block transfer used for oversized payloads
    pub fn with_block_transfer(mut self, blocks: impl BlockTransfer + 'static) -> Self {
        self.blocks = Box::new(blocks);
        self
    }

    pub fn config(&self) -> &WaitlistConfig {
        &self.config
    }

    pub fn table(&self) -> &Arc<PendingTable> {
        &self.table
    }

    pub fn pending_count(&self) -> usize {
        self.table.len()
    }

    pub fn stats(&self) -> WaitlistStatsSnapshot {
        self.stats.snapshot()
    }

    /// Blocking call
    ///
    /// A zero `timeout` sends a NON frame and returns `(empty, Ok)` at once
    /// without registering anything. Otherwise the calling thread sleeps
    /// until an ACK or RST resolves the call, or the timeout elapses, in
    /// which case the call removes itself and reports `Timeout`.
    ///
    /// Must not be called from inside an async task; use [`Waitlist::call`].
    pub fn call_sync(
        &self,
        route: Route,
        service_id: u16,
        timeout: Duration,
        payload: impl Into<Bytes>,
    ) -> Result<CallOutcome> {
        let payload = payload.into();
        if timeout.is_zero() {
            self.send_non(route, service_id, payload)?;
            return Ok(CallOutcome::ok(Bytes::new()));
        }

        let started_at = Instant::now();
        let (call, waiter) = PendingCall::blocking(route.key(service_id, 0), timeout, started_at, payload.clone());
        let key = self.start(route, call, &payload)?;

        // A deadline past the end of the clock means wait indefinitely
        let resolved = match started_at.checked_add(timeout) {
            Some(deadline) => waiter.wait_until(deadline),
            None => Some(waiter.wait()),
        };

        match resolved {
            Some(outcome) => Ok(outcome),
            None => Ok(self.settle_blocking(&key, timeout, &waiter)),
        }
    }

    /// Settle a blocking call whose deadline passed
    ///
    /// If the call is still pending it is removed and reported as timed
    /// out. Otherwise a resolver already took it out of the table and its
    /// outcome is on the way; a call dropped without completion fills the
    /// waiter with `Cancelled`, so this wait always ends.
    fn settle_blocking(&self, key: &CallKey, timeout: Duration, waiter: &Waiter) -> CallOutcome {
        match self.table.remove(key) {
            Some(_) => {
                WaitlistStats::incr(&self.stats.timed_out);
                tracing::debug!("[TIMEOUT] Blocking call timed out after {:?}: {}", timeout, key);
                CallOutcome::timeout()
            }
            None => waiter.wait(),
        }
    }

    /// Awaitable call with the same semantics as [`Waitlist::call_sync`]
    pub async fn call(
        &self,
        route: Route,
        service_id: u16,
        timeout: Duration,
        payload: impl Into<Bytes>,
    ) -> Result<CallOutcome> {
        let payload = payload.into();
        if timeout.is_zero() {
            self.send_non(route, service_id, payload)?;
            return Ok(CallOutcome::ok(Bytes::new()));
        }

        let (call, mut rx) = PendingCall::future(route.key(service_id, 0), timeout, Instant::now(), payload.clone());
        let key = self.start(route, call, &payload)?;

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            // The call was dropped without being completed
            Ok(Err(_)) => Ok(CallOutcome::cancelled()),
            Err(_) => Ok(self.settle_future(&key, timeout, rx).await),
        }
    }

    /// Future counterpart of [`Waitlist::settle_blocking`]
    async fn settle_future(&self, key: &CallKey, timeout: Duration, rx: oneshot::Receiver<CallOutcome>) -> CallOutcome {
        match self.table.remove(key) {
            Some(_) => {
                WaitlistStats::incr(&self.stats.timed_out);
                tracing::debug!("[TIMEOUT] Call timed out after {:?}: {}", timeout, key);
                CallOutcome::timeout()
            }
            None => rx.await.unwrap_or_else(|_| CallOutcome::cancelled()),
        }
    }

    /// Non-blocking call
    ///
    /// With a zero `timeout` or no callback this only sends a NON frame and
    /// returns `None`. Otherwise the call is registered, the request sent,
    /// and the key returned; `on_complete` later runs exactly once with the
    /// ACK payload, the RST error, a timeout from the reaper, or a cancel.
    /// Timeouts need a running reaper (see [`Waitlist::spawn_reaper`]).
    pub fn call_async<F>(
        &self,
        route: Route,
        service_id: u16,
        timeout: Duration,
        payload: impl Into<Bytes>,
        on_complete: Option<F>,
    ) -> Result<Option<CallKey>>
    where
        F: FnOnce(Bytes, CallResult) + Send + 'static,
    {
        let payload = payload.into();
        let on_complete = match on_complete {
            Some(callback) if !timeout.is_zero() => callback,
            _ => {
                self.send_non(route, service_id, payload)?;
                return Ok(None);
            }
        };

        let call = PendingCall::with_callback(
            route.key(service_id, 0),
            timeout,
            Instant::now(),
            payload.clone(),
            on_complete,
        );
        self.start(route, call, &payload).map(Some)
    }

    /// Send a NON request; nothing is registered and no response is awaited
    pub fn send_non(&self, route: Route, service_id: u16, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        self.transmit(&route, FrameCode::Non, service_id, 0, &payload)?;
        WaitlistStats::incr(&self.stats.fire_and_forget);
        Ok(())
    }

    /// Resolve a pending call as cancelled
    ///
    /// Returns false when the call already resolved or never existed.
    pub fn cancel(&self, key: &CallKey) -> bool {
        self.table.cancel(key)
    }

    /// Cancel every pending call, e.g. when the transport goes away
    pub fn cancel_all(&self) -> usize {
        self.table.cancel_all()
    }

    pub fn on_ack_frame(&self, route: &Route, frame: &Frame) -> bool {
        dispatch::on_ack_frame(&self.table, route, frame)
    }

    pub fn on_reset_frame(&self, route: &Route, frame: &Frame) -> bool {
        dispatch::on_reset_frame(&self.table, route, frame)
    }

    /// Feed raw bytes received from `route`
    pub fn handle_bytes(&self, route: &Route, bytes: &[u8]) -> std::result::Result<Inbound, FrameError> {
        dispatch::handle_bytes(&self.table, route, bytes)
    }

    /// Start the timeout reaper for asynchronous calls
    pub fn spawn_reaper(&self, cancel: CancellationToken) -> ReaperHandle {
        ReaperHandle::spawn(self.table.clone(), self.config.reap_interval, cancel)
    }

    /// Register `call` under a fresh token, then send its request
    ///
    /// Registration comes first so that a fast response cannot arrive
    /// before the call is in the table. If sending fails the call is
    /// withdrawn without being completed and the error returned.
    fn start(&self, route: Route, call: PendingCall, payload: &Bytes) -> Result<CallKey> {
        let key = self.register_with_fresh_token(call)?;

        if let Err(e) = self.transmit(&route, FrameCode::Con, key.service_id, key.token, payload) {
            WaitlistStats::incr(&self.stats.send_failures);
            if self.table.remove(&key).is_some() {
                tracing::warn!("[SEND] Request failed, call withdrawn: {}: {}", key, e);
                return Err(e);
            }
            // A response (or cancel) won the race and already completed the call
            tracing::warn!("[SEND] Request failed after call resolved: {}: {}", key, e);
        }
        Ok(key)
    }

    fn register_with_fresh_token(&self, mut call: PendingCall) -> Result<CallKey> {
        let attempts = self.config.max_token_attempts;
        for _ in 0..attempts {
            call.set_token(self.tokens.next_token());
            let key = *call.key();
            match self.table.try_register(call) {
                Ok(()) => return Ok(key),
                Err(returned) => call = returned,
            }
        }
        Err(WaitlistError::TokensExhausted { attempts })
    }

    fn transmit(&self, route: &Route, code: FrameCode, service_id: u16, token: u16, payload: &Bytes) -> Result<()> {
        let limit = self.config.max_frame_payload;
        if payload.len() >= limit {
            self.blocks
                .send_blocks(&self.sink, route, code, service_id, token, payload, limit)?;
        } else {
            let frame = Frame::new(code, service_id, token, payload.clone())?;
            self.sink.send_frame(route, &frame)?;
        }
        Ok(())
    }
}

impl<S: FrameSink> std::fmt::Debug for Waitlist<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waitlist")
            .field("pending", &self.table.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelSink;
    use crate::token::TokenStrategy;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn route() -> Route {
        Route::new(1, 0, 0x0a00_0001)
    }

    #[test]
    fn test_token_collision_retries_next_token() {
        let (sink, mut rx) = ChannelSink::new();
        let waitlist = Waitlist::new(sink, WaitlistConfig::default()).unwrap();

        // Occupy the first sequential token
        let blocker = PendingCall::with_callback(route().key(5, 1), Duration::from_secs(1), Instant::now(), Bytes::new(), |_, _| {});
        waitlist.table().register(blocker).unwrap();

        let key = waitlist
            .call_async(route(), 5, Duration::from_secs(1), &b"x"[..], Some(|_: Bytes, _: CallResult| {}))
            .unwrap()
            .unwrap();
        assert_eq!(key.token, 2);

        let (_, frame) = rx.try_recv().unwrap();
        assert_eq!(frame.token(), 2);
        assert_eq!(frame.code(), FrameCode::Con);
    }

    #[test]
    fn test_tokens_exhausted() {
        let (sink, _rx) = ChannelSink::new();
        let config = WaitlistConfig::default()
            .with_token_strategy(TokenStrategy::Sequential)
            .with_max_token_attempts(2);
        let waitlist = Waitlist::new(sink, config).unwrap();
        for token in 1..=2 {
            let call = PendingCall::with_callback(route().key(5, token), Duration::from_secs(1), Instant::now(), Bytes::new(), |_, _| {});
            waitlist.table().register(call).unwrap();
        }

        let err = waitlist
            .call_async(route(), 5, Duration::from_secs(1), Bytes::new(), Some(|_: Bytes, _: CallResult| {}))
            .unwrap_err();
        assert!(matches!(err, WaitlistError::TokensExhausted { attempts: 2 }));
        assert_eq!(waitlist.pending_count(), 2);
    }

    #[test]
    fn test_send_failure_withdraws_call() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        let waitlist = Waitlist::new(sink, WaitlistConfig::default()).unwrap();

        let err = waitlist
            .call_async(route(), 5, Duration::from_secs(1), Bytes::new(), Some(|_: Bytes, _: CallResult| {
                panic!("withdrawn calls are never completed");
            }))
            .unwrap_err();
        assert_eq!(err.error_code(), "TRANSPORT_ERROR");
        assert_eq!(waitlist.pending_count(), 0);
        assert_eq!(waitlist.stats().send_failures, 1);
    }

    fn waitlist() -> (Waitlist<ChannelSink>, UnboundedReceiver<(Route, Frame)>) {
        let (sink, rx) = ChannelSink::new();
        (Waitlist::new(sink, WaitlistConfig::default()).unwrap(), rx)
    }

    #[test]
    fn test_ack_racing_deadline_beats_timeout() {
        let (waitlist, _rx) = waitlist();
        let key = route().key(5, 1);
        let timeout = Duration::from_millis(10);
        let (call, waiter) = PendingCall::blocking(key, timeout, Instant::now(), Bytes::new());
        waitlist.table().register(call).unwrap();

        // A resolver has matched the call but not delivered the outcome yet
        let matched = waitlist.table().remove(&key).unwrap();
        let resolver = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            matched.complete(CallOutcome::ok(Bytes::from_static(b"late ack")));
        });

        let outcome = waitlist.settle_blocking(&key, timeout, &waiter);
        resolver.join().unwrap();

        assert_eq!(outcome, CallOutcome::ok(Bytes::from_static(b"late ack")));
        assert_eq!(waitlist.stats().timed_out, 0);
    }

    #[tokio::test]
    async fn test_reset_racing_deadline_beats_timeout() {
        let (waitlist, _rx) = waitlist();
        let key = route().key(5, 2);
        let timeout = Duration::from_millis(10);
        let (call, rx) = PendingCall::future(key, timeout, Instant::now(), Bytes::new());
        waitlist.table().register(call).unwrap();

        let matched = waitlist.table().remove(&key).unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            matched.complete(CallOutcome::remote_error(3));
        });

        let outcome = waitlist.settle_future(&key, timeout, rx).await;
        assert_eq!(outcome, CallOutcome::remote_error(3));
        assert_eq!(waitlist.stats().timed_out, 0);
    }

    #[test]
    fn test_still_pending_at_deadline_times_out() {
        let (waitlist, _rx) = waitlist();
        let key = route().key(5, 3);
        let timeout = Duration::from_millis(10);
        let (call, waiter) = PendingCall::blocking(key, timeout, Instant::now(), Bytes::new());
        waitlist.table().register(call).unwrap();

        assert_eq!(waitlist.settle_blocking(&key, timeout, &waiter), CallOutcome::timeout());
        assert_eq!(waitlist.pending_count(), 0);
        assert_eq!(waitlist.stats().timed_out, 1);
    }

    #[test]
    fn test_withdrawn_call_does_not_strand_settling_caller() {
        let (waitlist, _rx) = waitlist();
        let key = route().key(5, 4);
        let timeout = Duration::from_millis(10);
        let (call, waiter) = PendingCall::blocking(key, timeout, Instant::now(), Bytes::new());
        waitlist.table().register(call).unwrap();

        drop(waitlist.table().remove(&key));
        assert_eq!(waitlist.settle_blocking(&key, timeout, &waiter), CallOutcome::cancelled());
    }

    #[test]
    fn test_drained_table_wakes_blocked_caller() {
        let (waitlist, _rx) = waitlist();
        let waitlist = Arc::new(waitlist);
        let caller = {
            let waitlist = waitlist.clone();
            std::thread::spawn(move || waitlist.call_sync(route(), 5, Duration::from_secs(30), Bytes::new()))
        };

        while waitlist.pending_count() == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(waitlist.table().drain().len(), 1);

        let started = Instant::now();
        let outcome = caller.join().unwrap().unwrap();
        assert_eq!(outcome.result, CallResult::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (sink, _rx) = ChannelSink::new();
        let err = Waitlist::new(sink, WaitlistConfig::default().with_max_frame_payload(0)).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }
}
