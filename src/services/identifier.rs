//! Maps a content fingerprint to a short, deterministic item id.
//!
//! The fingerprint is folded through 32-bit FNV-1a into a seed, and the
//! seed drives a `StdRng` that draws each decimal digit independently.
//! The keyspace is tiny on purpose (10^width ids) so links stay short;
//! unrelated content can collide, in which case the newer upload replaces
//! the older one.

use rand::{Rng, SeedableRng, rngs::StdRng};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Derives item ids of a fixed number of decimal digits.
#[derive(Clone, Copy, Debug)]
pub struct IdAssigner {
    width: usize,
}

impl IdAssigner {
    pub fn new(width: usize) -> Self {
        Self { width }
    }

    /// Id for `fingerprint`. Equal fingerprints always give equal ids.
    pub fn assign(&self, fingerprint: &str) -> String {
        let seed = fnv1a_32(fingerprint.as_bytes());
        let mut rng = StdRng::seed_from_u64(u64::from(seed));
        (0..self.width)
            .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
            .collect()
    }
}

fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_fingerprint_same_id() {
        let assigner = IdAssigner::new(3);
        let fp = "9e107d9d372bb6826bd81d3542a419d6";
        assert_eq!(assigner.assign(fp), assigner.assign(fp));
        assert_eq!(IdAssigner::new(3).assign(fp), assigner.assign(fp));
    }

    #[test]
    fn ids_are_fixed_width_decimal() {
        for width in [1, 3, 8] {
            let assigner = IdAssigner::new(width);
            for fp in ["", "a", "d41d8cd98f00b204e9800998ecf8427e"] {
                let id = assigner.assign(fp);
                assert_eq!(id.len(), width);
                assert!(id.bytes().all(|b| b.is_ascii_digit()), "{id}");
            }
        }
    }

    #[test]
    fn fingerprints_spread_across_keyspace() {
        let assigner = IdAssigner::new(3);
        let ids: std::collections::HashSet<_> = (0..200)
            .map(|i| assigner.assign(&format!("{:032x}", i)))
            .collect();
        // 200 draws from 1000 ids; a broken seed would collapse to a handful
        assert!(ids.len() > 100, "only {} distinct ids", ids.len());
    }

    #[test]
    fn fnv_matches_reference_vectors() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
    }
}
