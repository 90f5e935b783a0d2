//! Stable non-cryptographic hashing used for routing decisions.
//!
//! Shard selection and IP-hash load balancing must map the same key to the
//! same bucket across processes and platforms, so they cannot use the
//! randomly seeded std hasher.

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash of a byte slice.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Inclusive range of the 32-bit hash space owned by a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashRange {
    pub start: u32,
    pub end: u32,
}

impl HashRange {
    /// Create an inclusive range.
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// The whole hash space.
    pub fn full() -> Self {
        Self::new(0, u32::MAX)
    }

    /// Check whether a hash falls inside this range.
    pub fn contains(&self, hash: u32) -> bool {
        hash >= self.start && hash <= self.end
    }

    /// Split the hash space into `count` contiguous, disjoint ranges that
    /// together cover every value.
    pub fn partition(count: u32) -> Vec<HashRange> {
        let count = count.max(1);
        let width = (u64::from(u32::MAX) + 1) / u64::from(count);
        (0..count)
            .map(|i| {
                let start = u64::from(i) * width;
                let end = if i == count - 1 {
                    u64::from(u32::MAX)
                } else {
                    start + width - 1
                };
                HashRange::new(start as u32, end as u32)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_vectors() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_partition_covers_space() {
        let ranges = HashRange::partition(3);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].start, 0);
        assert_eq!(ranges[2].end, u32::MAX);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end.wrapping_add(1), pair[1].start);
        }
    }
}
