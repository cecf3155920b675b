/// Inbound frame dispatch
///
/// Entry points for the receive path. All of them may be called
/// concurrently from any number of receive threads or tasks.

use crate::call::Route;
use crate::frame::{Frame, FrameCode, FrameError};
use crate::transport::pending::PendingTable;

/// What an inbound frame turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// An ACK; `matched` is false for stale, duplicate or unknown tokens
    Ack { matched: bool },
    /// An RST; `matched` as for `Ack`
    Reset { matched: bool },
    /// A CON or NON request for the local server side
    Request(Frame),
}

/// Resolve the pending call an ACK frame answers
pub fn on_ack_frame(table: &PendingTable, route: &Route, frame: &Frame) -> bool {
    table.resolve_ack(&route.key(frame.rid(), frame.token()), frame.payload.clone())
}

/// Resolve the pending call an RST frame rejects
pub fn on_reset_frame(table: &PendingTable, route: &Route, frame: &Frame) -> bool {
    table.resolve_reset(&route.key(frame.rid(), frame.token()), frame.error_code())
}

/// Decode raw bytes from `route` and route them by frame code
pub fn handle_bytes(table: &PendingTable, route: &Route, bytes: &[u8]) -> Result<Inbound, FrameError> {
    let frame = Frame::from_bytes(bytes)?;
    Ok(handle_frame(table, route, frame))
}

pub fn handle_frame(table: &PendingTable, route: &Route, frame: Frame) -> Inbound {
    match frame.code() {
        FrameCode::Ack => Inbound::Ack {
            matched: on_ack_frame(table, route, &frame),
        },
        FrameCode::Rst => Inbound::Reset {
            matched: on_reset_frame(table, route, &frame),
        },
        FrameCode::Con | FrameCode::Non => Inbound::Request(frame),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{CallResult, PendingCall};
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn test_dispatch_by_code() {
        let table = PendingTable::new();
        let route = Route::new(2, 1, 0x0a00_0003);
        let log = Arc::new(Mutex::new(Vec::new()));

        for token in [1, 2] {
            let log = log.clone();
            let call = PendingCall::with_callback(
                route.key(8, token),
                Duration::from_secs(1),
                Instant::now(),
                Bytes::new(),
                move |payload, result| log.lock().push((token, payload, result)),
            );
            table.register(call).unwrap();
        }

        let ack = Frame::ack(8, 1, &b"pong"[..]).unwrap().to_bytes();
        assert_eq!(handle_bytes(&table, &route, &ack).unwrap(), Inbound::Ack { matched: true });

        let rst = Frame::rst(8, 2, 6).unwrap().to_bytes();
        assert_eq!(handle_bytes(&table, &route, &rst).unwrap(), Inbound::Reset { matched: true });
        assert_eq!(handle_bytes(&table, &route, &rst).unwrap(), Inbound::Reset { matched: false });

        let request = Frame::con(8, 3, &b"ping"[..]).unwrap();
        assert_eq!(
            handle_bytes(&table, &route, &request.to_bytes()).unwrap(),
            Inbound::Request(request)
        );

        assert_eq!(
            log.lock().as_slice(),
            &[
                (1, Bytes::from_static(b"pong"), CallResult::Ok),
                (2, Bytes::new(), CallResult::RemoteError(6)),
            ]
        );
    }

    #[test]
    fn test_response_from_other_route_does_not_match() {
        let table = PendingTable::new();
        let route = Route::new(2, 1, 0x0a00_0003);
        let call = PendingCall::with_callback(route.key(8, 1), Duration::from_secs(1), Instant::now(), Bytes::new(), |_, _| {});
        table.register(call).unwrap();

        let frame = Frame::ack(8, 1, Bytes::new()).unwrap();
        assert!(!on_ack_frame(&table, &Route::new(2, 1, 0x0a00_0004), &frame));
        assert!(!on_ack_frame(&table, &Route::new(2, 2, 0x0a00_0003), &frame));
        assert!(table.contains(&route.key(8, 1)));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let table = PendingTable::new();
        let err = handle_bytes(&table, &Route::new(1, 0, 1), &[0xff; 4]).unwrap_err();
        assert_eq!(err, FrameError::ShortHeader(4));
        assert!(table.is_empty());
    }
}
