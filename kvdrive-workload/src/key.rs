//! Key synthesis.
//!
//! Preloaded key ranges are never held in memory. Every key is re-derived from
//! its integer position, so a range of millions of keys costs nothing to track.
//!
//! Layout of a derived key (16 bytes):
//! ```text
//! [0..4]   scramble: u32   - LCG transform of index+1, decorrelates neighbours
//! [4..8]   index: u32      - raw position, for tracing a key back to its slot
//! [8..12]  zero            - byte 11 == 0 marks a derived key
//! [12..16] 0x000000ff      - fixed marker
//! ```
//!
//! Keys created during a run are time-ordered UUIDs with bit 1 of byte 11 set,
//! so the two families never collide.

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Length of every key produced by this module.
pub const KEY_LEN: usize = 16;

const LCG_MULTIPLIER: u64 = 25_214_903_917;
const LCG_INCREMENT: u64 = 11;
const DERIVED_MARKER: u32 = 0xff;
const DYNAMIC_MARKER_BYTE: usize = 11;
const DYNAMIC_MARKER_BIT: u8 = 0x02;

/// Derives the deterministic key for position `index` of a preloaded range.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // Both truncations are part of the key layout.
pub fn derive_key(index: u64) -> Bytes {
    let scramble = (index
        .wrapping_add(1)
        .wrapping_mul(LCG_MULTIPLIER)
        .wrapping_add(LCG_INCREMENT)
        >> 5)
        & 0x7fff_ffff;

    let mut buf = BytesMut::with_capacity(KEY_LEN);
    buf.put_u32(scramble as u32);
    buf.put_u32(index as u32);
    buf.put_u32(0);
    buf.put_u32(DERIVED_MARKER);
    buf.freeze()
}

/// Generates a fresh key for a record created during the run.
#[must_use]
pub fn new_dynamic_key() -> Bytes {
    let mut key = *Uuid::now_v7().as_bytes();
    key[DYNAMIC_MARKER_BYTE] |= DYNAMIC_MARKER_BIT;
    Bytes::copy_from_slice(&key)
}

/// Returns true if `key` was produced by [`new_dynamic_key`].
#[must_use]
pub fn is_dynamic_key(key: &[u8]) -> bool {
    key.len() == KEY_LEN && key[DYNAMIC_MARKER_BYTE] & DYNAMIC_MARKER_BIT != 0
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_derive_key_deterministic() {
        for i in [0, 1, 7, 9_999, 10_000, 1 << 31, u64::from(u32::MAX) + 5] {
            assert_eq!(derive_key(i), derive_key(i));
        }
    }

    #[test]
    fn test_derive_key_unique() {
        let keys: HashSet<Bytes> = (0..200_000).map(derive_key).collect();
        assert_eq!(keys.len(), 200_000);
    }

    #[test]
    fn test_derive_key_layout() {
        let key = derive_key(0);
        assert_eq!(key.len(), KEY_LEN);

        // (1 * 25214903917 + 11) >> 5, masked to 31 bits.
        let expected = ((25_214_903_917_u64 + 11) >> 5) & 0x7fff_ffff;
        assert_eq!(&key[0..4], &(expected as u32).to_be_bytes());
        assert_eq!(&key[4..8], &0_u32.to_be_bytes());
        assert_eq!(&key[8..12], &[0, 0, 0, 0]);
        assert_eq!(&key[12..16], &0xff_u32.to_be_bytes());

        let key = derive_key(1234);
        assert_eq!(&key[4..8], &1234_u32.to_be_bytes());
    }

    #[test]
    fn test_sequential_indices_scrambled() {
        let a = derive_key(100);
        let b = derive_key(101);
        assert_ne!(a[0..4], b[0..4]);
    }

    #[test]
    fn test_dynamic_key_marker() {
        let key = new_dynamic_key();
        assert_eq!(key.len(), KEY_LEN);
        assert!(is_dynamic_key(&key));
        assert!(!is_dynamic_key(&derive_key(42)));
        assert_ne!(new_dynamic_key(), key);
    }
}
