//! MurmurHash3, x86 32-bit variant.
//!
//! Every replica must hash identically: digest equality is the only
//! convergence signal the sync protocol has.

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

/// Hash `data` with the given seed.
///
/// ```
/// use tessera_core::murmur::murmur3_32;
///
/// assert_eq!(murmur3_32(b"", 0), 0);
/// assert_eq!(murmur3_32(b"My hovercraft is full of eels.", 25), 2520298415);
/// ```
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let mut h = seed;
    let mut chunks = data.chunks_exact(4);

    for chunk in &mut chunks {
        let k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        h ^= scramble(k);
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k: u32 = 0;
        for (i, byte) in tail.iter().enumerate() {
            k |= u32::from(*byte) << (8 * i);
        }
        h ^= scramble(k);
    }

    h ^= data.len() as u32;
    fmix(h)
}

/// Hash a string with seed 0, the form used for Merkle digests.
pub fn hash_str(s: &str) -> u32 {
    murmur3_32(s.as_bytes(), 0)
}

fn scramble(k: u32) -> u32 {
    k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

fn fmix(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input() {
        assert_eq!(murmur3_32(b"", 0), 0);
        assert_eq!(murmur3_32(b"", 1), 1364076727);
        assert_eq!(murmur3_32(b"", 82412784), 2896484089);
    }

    #[test]
    fn known_sentences() {
        assert_eq!(
            murmur3_32(b"I will not buy this record, it is scratched.", 0),
            2832214938
        );
        assert_eq!(murmur3_32(b"My hovercraft is full of eels.", 0), 2953494853);
        assert_eq!(murmur3_32(b"My hovercraft is full of eels.", 25), 2520298415);
        assert_eq!(murmur3_32(b"My hovercraft is full of eels.", 128), 2204470254);
    }

    #[test]
    fn every_tail_length() {
        assert_eq!(hash_str("0"), 3530670207);
        assert_eq!(hash_str("01"), 1642882560);
        assert_eq!(hash_str("012"), 3966566284);
        assert_eq!(hash_str("0123"), 3558446240);
        assert_eq!(hash_str("01234"), 433070448);
    }
}
