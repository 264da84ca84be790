//! Arbitrary bytes after a valid handshake, fed in arbitrary chunks. The
//! engine must never panic, must stop consuming once closed, and must ask
//! for the transport to be closed at most once.

#![no_main]

use std::time::{Duration, Instant};

use bytes::BytesMut;
use echoframe_core::{Connection, ConnectionAction, ConnectionConfig};
use libfuzzer_sys::fuzz_target;

const REQUEST: &[u8] = b"GET / HTTP/1.1\r\n\
    Host: localhost\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
    Sec-WebSocket-Version: 13\r\n\r\n";

fuzz_target!(|data: &[u8]| {
    let Some((&chunk, data)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(chunk).max(1);

    let config = ConnectionConfig {
        max_frame_size: 64 * 1024,
        max_message_size: 256 * 1024,
        ..Default::default()
    };
    let mut now = Instant::now();
    let mut conn = Connection::new(config, now);
    if conn.handshake(REQUEST, now).is_err() {
        return;
    }

    let mut buf = BytesMut::new();
    let mut closes = 0;
    for piece in data.chunks(chunk) {
        buf.extend_from_slice(piece);
        now += Duration::from_millis(10);
        loop {
            let Ok(actions) = conn.receive(&mut buf, now) else {
                return;
            };
            let delivered = actions.iter().any(|a| matches!(a, ConnectionAction::Deliver(_)));
            closes += actions.iter().filter(|a| matches!(a, ConnectionAction::Close { .. })).count();
            if !delivered {
                break;
            }
        }
        if conn.is_closed() {
            assert!(buf.is_empty());
        }
    }

    assert!(closes <= 1);
    conn.finish();
    assert!(conn.is_closed());
});
