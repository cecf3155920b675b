/// 等待调用表
///
/// Registry of in-flight calls shared by callers, the receive path and the
/// reaper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::call::{CallKey, CallOutcome, PendingCall};
use crate::error::WaitlistError;
use crate::stats::WaitlistStats;

/// Pending-call table
///
/// Every in-flight call lives here, keyed by its correlation key, behind a
/// single coarse lock. A call is removed from the map in the same critical
/// section that matches it, so exactly one of ACK, RST, timeout or cancel
/// can ever resolve it. Completions (callbacks, waiter wake-ups, oneshot
/// sends) always run after the lock is released.
///
/// A linear scan over a `Vec` of calls gives the same observable behavior;
/// the map only makes matching O(1).
pub struct PendingTable {
    calls: Mutex<HashMap<CallKey, PendingCall>>,
    stats: Arc<WaitlistStats>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::with_stats(Arc::new(WaitlistStats::new()))
    }

    pub fn with_stats(stats: Arc<WaitlistStats>) -> Self {
        Self {
            calls: Mutex::new(HashMap::with_capacity(64)),
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<WaitlistStats> {
        &self.stats
    }

    /// Register a call
    ///
    /// A colliding key is an error and leaves the existing call untouched.
    pub fn register(&self, call: PendingCall) -> Result<(), WaitlistError> {
        self.try_register(call).map_err(|call| WaitlistError::DuplicateCall { key: *call.key() })
    }

    /// Register a call, handing it back on a key collision
    pub(crate) fn try_register(&self, call: PendingCall) -> Result<(), PendingCall> {
        let key = *call.key();
        {
            let mut calls = self.calls.lock();
            if calls.contains_key(&key) {
                drop(calls);
                tracing::warn!("[REGISTER] Correlation key already pending: {}", key);
                return Err(call);
            }
            calls.insert(key, call);
        }

        WaitlistStats::incr(&self.stats.registered);
        tracing::debug!("[REGISTER] Call registered: {}", key);
        Ok(())
    }

    /// Match an ACK against a pending call and deliver its payload
    pub fn resolve_ack(&self, key: &CallKey, payload: Bytes) -> bool {
        let resolved = self.resolve(key, CallOutcome::ok(payload));
        if resolved {
            WaitlistStats::incr(&self.stats.acked);
        }
        resolved
    }

    /// Match an RST against a pending call and deliver its error code
    pub fn resolve_reset(&self, key: &CallKey, error_code: u8) -> bool {
        let resolved = self.resolve(key, CallOutcome::remote_error(error_code));
        if resolved {
            WaitlistStats::incr(&self.stats.reset);
        }
        resolved
    }

    fn resolve(&self, key: &CallKey, outcome: CallOutcome) -> bool {
        let call = self.calls.lock().remove(key);
        match call {
            Some(call) => {
                tracing::debug!("[COMPLETE] Call resolved ({}): {}", outcome.result, key);
                call.complete(outcome);
                true
            }
            None => {
                WaitlistStats::incr(&self.stats.unmatched);
                tracing::debug!("[COMPLETE] No pending call for response ({}): {}", outcome.result, key);
                false
            }
        }
    }

    /// Remove every asynchronous call that has expired at `now`
    ///
    /// Callbacks are not invoked; the caller completes the returned calls
    /// with a timeout once the lock is released. Blocking and future calls
    /// time themselves out and are never reaped here.
    pub fn reap_expired(&self, now: Instant) -> Vec<PendingCall> {
        let expired: Vec<PendingCall> = {
            let mut calls = self.calls.lock();
            let keys: Vec<CallKey> = calls
                .iter()
                .filter(|(_, call)| call.is_async() && call.is_expired(now))
                .map(|(key, _)| *key)
                .collect();
            keys.iter().filter_map(|key| calls.remove(key)).collect()
        };

        if !expired.is_empty() {
            WaitlistStats::add(&self.stats.timed_out, expired.len());
            tracing::debug!("[REAP] {} call(s) expired", expired.len());
        }
        expired
    }

    /// Take a call out without completing it
    ///
    /// Only the call's own issuer may do this (self-timeout, failed send).
    pub(crate) fn remove(&self, key: &CallKey) -> Option<PendingCall> {
        self.calls.lock().remove(key)
    }

    /// Resolve a pending call as cancelled
    pub fn cancel(&self, key: &CallKey) -> bool {
        match self.remove(key) {
            Some(call) => {
                WaitlistStats::incr(&self.stats.cancelled);
                tracing::debug!("[CANCEL] Call cancelled: {}", key);
                call.complete(CallOutcome::cancelled());
                true
            }
            None => false,
        }
    }

    /// Cancel every pending call, returning how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let drained = self.drain();
        let count = drained.len();
        for call in drained {
            call.complete(CallOutcome::cancelled());
        }
        if count > 0 {
            WaitlistStats::add(&self.stats.cancelled, count);
            tracing::debug!("[CANCEL] {} pending call(s) cancelled", count);
        }
        count
    }

    /// Remove every pending call without completing any of them
    pub(crate) fn drain(&self) -> Vec<PendingCall> {
        self.calls.lock().drain().map(|(_, call)| call).collect()
    }

    pub fn contains(&self, key: &CallKey) -> bool {
        self.calls.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PendingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTable")
            .field("pending", &self.len())
            .finish()
    }
}
