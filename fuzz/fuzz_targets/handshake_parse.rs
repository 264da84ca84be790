//! Arbitrary request heads must be accepted or rejected without panicking,
//! and every rejection must be a well-formed HTTP response.

#![no_main]

use echoframe_core::{HttpResponse, ServerHandshake, handshake::find_head_end};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let handshake = ServerHandshake::new().with_path("/ws");
    match handshake.negotiate(data) {
        Ok(response) => {
            let bytes = response.to_bytes();
            let parsed = HttpResponse::parse(&bytes).ok();
            assert_eq!(parsed.map(|r| r.status), Some(101));
        },
        Err(err) => {
            let bytes = err.rejection();
            let end = find_head_end(&bytes);
            assert!(end.is_some());
            let parsed = end.and_then(|end| HttpResponse::parse(&bytes[..end]).ok());
            assert_eq!(parsed.map(|r| r.status), Some(err.status()));
        },
    }
});
