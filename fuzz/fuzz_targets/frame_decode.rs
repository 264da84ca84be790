//! Frame decoding must never panic, and a decoded frame must re-encode to
//! something that decodes to the same frame.

#![no_main]

use bytes::BytesMut;
use echoframe_proto::FrameCodec;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let server = FrameCodec::server().with_max_payload(1 << 20);
    let client = FrameCodec::client().with_max_payload(1 << 20);

    let mut buf = BytesMut::from(data);
    while let Ok(Some(frame)) = server.decode(&mut buf) {
        let mut wire = BytesMut::new();
        client.encode(&frame, [0xA5, 0x5A, 0x3C, 0xC3], &mut wire);
        let again = server.decode(&mut wire).ok().flatten();
        assert_eq!(again.as_ref(), Some(&frame));
        assert!(wire.is_empty());
    }
});
