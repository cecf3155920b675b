pub mod dispatch;
pub mod pending;
pub mod reaper;

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::call::Route;
use crate::error::WaitlistError;
use crate::frame::{BlockFlag, Frame, FrameCode};

pub use dispatch::Inbound;
pub use pending::PendingTable;
pub use reaper::{ReaperHandle, sweep};

/// Send primitive of the underlying transport
///
/// Delivery is best effort; an `Ok` only means the frame was handed off.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, route: &Route, frame: &Frame) -> Result<(), WaitlistError>;
}

impl<T: FrameSink + ?Sized> FrameSink for Arc<T> {
    fn send_frame(&self, route: &Route, frame: &Frame) -> Result<(), WaitlistError> {
        (**self).send_frame(route, frame)
    }
}

/// Fallback used for payloads too large for a single frame
pub trait BlockTransfer: Send + Sync {
    /// Send `payload` as a series of frames, returning how many were sent
    #[allow(clippy::too_many_arguments)]
    fn send_blocks(
        &self,
        sink: &dyn FrameSink,
        route: &Route,
        code: FrameCode,
        rid: u16,
        token: u16,
        payload: &Bytes,
        block_size: usize,
    ) -> Result<usize, WaitlistError>;
}

/// Splits a payload into `block_size` chunks, numbering each frame's block
/// flag and setting the more bit on all but the last
#[derive(Debug, Default, Clone, Copy)]
pub struct SegmentingBlockTransfer;

impl BlockTransfer for SegmentingBlockTransfer {
    fn send_blocks(
        &self,
        sink: &dyn FrameSink,
        route: &Route,
        code: FrameCode,
        rid: u16,
        token: u16,
        payload: &Bytes,
        block_size: usize,
    ) -> Result<usize, WaitlistError> {
        if block_size == 0 {
            return Err(WaitlistError::config_error("max_frame_payload", "block size must be non-zero"));
        }

        let len = payload.len();
        let mut sent = 0;
        for (number, start) in (0..len).step_by(block_size).enumerate() {
            let end = (start + block_size).min(len);
            let frame = Frame::new(code, rid, token, payload.slice(start..end))?
                .with_block(BlockFlag::block(number, end < len));
            sink.send_frame(route, &frame)?;
            sent += 1;
        }

        tracing::debug!("[BLOCK] {} bytes sent as {} block(s) to {}", len, sent, route);
        Ok(sent)
    }
}

/// Sink that forwards frames into a tokio channel, for bridging to a socket task
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(Route, Frame)>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Route, Frame)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FrameSink for ChannelSink {
    fn send_frame(&self, route: &Route, frame: &Frame) -> Result<(), WaitlistError> {
        self.tx
            .send((*route, frame.clone()))
            .map_err(|_| WaitlistError::transport_error("frame channel closed", false))
    }
}
