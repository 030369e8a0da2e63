//! Property-based tests for the compact graph container.

#![allow(clippy::disallowed_methods)]

use proptest::prelude::*;
use touch_scorer::container::{open, seal, HEADER_SIZE};

proptest! {
    /// Property: sealed payloads open to the same bytes
    #[test]
    fn seal_open_preserves_payload(payload in prop::collection::vec(any::<u8>(), 0..512), quantized in any::<bool>()) {
        let sealed = seal(&payload, quantized);
        prop_assert_eq!(sealed.len(), HEADER_SIZE + payload.len());

        let (header, opened) = open(&sealed).unwrap();
        prop_assert_eq!(opened, &payload[..]);
        prop_assert_eq!(header.quantized, quantized);
        prop_assert_eq!(header.payload_size as usize, payload.len());
    }

    /// Property: flipping any payload byte is detected
    #[test]
    fn corrupted_payload_rejected(payload in prop::collection::vec(any::<u8>(), 1..256), index in any::<prop::sample::Index>()) {
        let mut sealed = seal(&payload, true);
        let at = HEADER_SIZE + index.index(payload.len());
        sealed[at] ^= 0xFF;
        prop_assert!(open(&sealed).is_err());
    }

    /// Property: truncated containers are rejected
    #[test]
    fn truncated_rejected(payload in prop::collection::vec(any::<u8>(), 1..256), cut in 1..64usize) {
        let sealed = seal(&payload, false);
        let keep = sealed.len().saturating_sub(cut);
        prop_assert!(open(&sealed[..keep]).is_err());
    }
}
