//! Payload masking.

/// XOR `buf` in place with the rolling masking key (`key[i % 4]`).
///
/// Masking is an involution: applying the same key twice restores the input.
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    let word = u32::from_ne_bytes(key);

    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let value = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ word;
        chunk.copy_from_slice(&value.to_ne_bytes());
    }

    for (byte, k) in chunks.into_remainder().iter_mut().zip(key) {
        *byte ^= k;
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn naive(buf: &mut [u8], key: [u8; 4]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    #[test]
    fn rfc_example() {
        // RFC 6455 section 5.7: masked "Hello"
        let mut payload = *b"\x7f\x9f\x4d\x51\x58";
        apply_mask(&mut payload, [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(&payload, b"Hello");
    }

    #[test]
    fn empty_buffer_untouched() {
        let mut payload: [u8; 0] = [];
        apply_mask(&mut payload, [1, 2, 3, 4]);
    }

    proptest! {
        #[test]
        fn matches_bytewise_xor(data in proptest::collection::vec(any::<u8>(), 0..64), key in any::<[u8; 4]>()) {
            let mut fast = data.clone();
            let mut slow = data.clone();
            apply_mask(&mut fast, key);
            naive(&mut slow, key);
            prop_assert_eq!(&fast, &slow);

            apply_mask(&mut fast, key);
            prop_assert_eq!(fast, data);
        }
    }
}
