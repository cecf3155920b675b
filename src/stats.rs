use std::sync::atomic::{AtomicU64, Ordering};

/// 调用统计
#[derive(Debug, Default)]
pub struct WaitlistStats {
    pub registered: AtomicU64,
    pub acked: AtomicU64,
    pub reset: AtomicU64,
    pub timed_out: AtomicU64,
    pub cancelled: AtomicU64,
    /// ACK/RST frames that matched no pending call
    pub unmatched: AtomicU64,
    pub fire_and_forget: AtomicU64,
    pub send_failures: AtomicU64,
}

/// 统计快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitlistStatsSnapshot {
    pub registered: u64,
    pub acked: u64,
    pub reset: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub unmatched: u64,
    pub fire_and_forget: u64,
    pub send_failures: u64,
}

impl WaitlistStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WaitlistStatsSnapshot {
        WaitlistStatsSnapshot {
            registered: self.registered.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            reset: self.reset.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            fire_and_forget: self.fire_and_forget.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

impl WaitlistStatsSnapshot {
    /// Calls that reached a terminal state
    pub fn resolved(&self) -> u64 {
        self.acked + self.reset + self.timed_out + self.cancelled
    }
}
