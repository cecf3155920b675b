/// waitlist - 不可靠传输上的RPC请求/响应关联层
///
/// Requests go out as CON frames (response expected) or NON frames
/// (fire-and-forget). Every CON call waits in a pending table keyed by
/// (protocol, pipe, address, service id, token) until an ACK or RST frame
/// resolves it, or its timeout elapses. Blocking callers time themselves
/// out; callback-based calls are expired by a cancellable reaper task.
///
/// ```no_run
/// use std::time::Duration;
/// use waitlist::{ChannelSink, Route, Waitlist, WaitlistConfig};
///
/// # fn main() -> waitlist::Result<()> {
/// let (sink, _outbound) = ChannelSink::new();
/// let waitlist = Waitlist::new(sink, WaitlistConfig::default())?;
/// let outcome = waitlist.call_sync(Route::new(1, 0, 0x0a00_0001), 42, Duration::from_millis(500), "ping")?;
/// println!("{}: {:?}", outcome.result, outcome.payload);
/// # Ok(())
/// # }
/// ```

pub mod call;
pub mod config;
pub mod error;
pub mod frame;
pub mod stats;
pub mod token;
pub mod transport;
pub mod waitlist;

// 重新导出核心类型
pub use call::{CallKey, CallOutcome, CallResult, Callback, PendingCall, Route, Waiter};
pub use config::{ConfigError, WaitlistConfig};
pub use error::WaitlistError;
pub use frame::{BlockFlag, ControlWord, Frame, FrameCode, FrameError};
pub use stats::{WaitlistStats, WaitlistStatsSnapshot};
pub use token::{TokenAllocator, TokenStrategy};
pub use transport::{
    BlockTransfer, ChannelSink, FrameSink, Inbound, PendingTable, ReaperHandle, SegmentingBlockTransfer,
};
pub use waitlist::Waitlist;

// 便捷的类型别名
pub type Result<T> = std::result::Result<T, WaitlistError>;
