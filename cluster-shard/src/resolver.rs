/// 1-based partition ordinal.
pub type PartitionOrdinal = u32;

/// Maps keys to partitions with CRC-32 modulo partition count.
///
/// Provides:
/// - Deterministic placement (no per-process seeding, stable across restarts)
/// - Hash tags: `user:{42}:name` and `cart:{42}` land on the same partition
/// - No resharding: the partition count is fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolver {
    partitions: u32,
}

impl Resolver {
    /// # Panics
    ///
    /// Panics if `partitions` is 0.
    pub fn new(partitions: u32) -> Self {
        assert!(partitions > 0, "partition count must be at least 1");
        Self { partitions }
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions
    }

    /// Partition owning an already-extracted hash key. Always in `1..=N`.
    #[inline]
    pub fn resolve(&self, hash_key: &[u8]) -> PartitionOrdinal {
        crc32fast::hash(hash_key) % self.partitions + 1
    }

    /// Partition owning a raw key, honouring `{tag}` sections.
    #[inline]
    pub fn resolve_key(&self, key: &[u8]) -> PartitionOrdinal {
        self.resolve(hash_key(key))
    }
}

/// Returns the bytes between the first `{` and the next `}` after it.
///
/// An empty tag (`{}`) is still a tag: every `{}` key hashes the empty string.
pub fn hash_tag(key: &[u8]) -> Option<&[u8]> {
    let open = key.iter().position(|&b| b == b'{')?;
    let rest = &key[open + 1..];
    let close = rest.iter().position(|&b| b == b'}')?;
    Some(&rest[..close])
}

/// The portion of `key` that feeds the hash: its tag if it has one, else all of it.
#[inline]
pub fn hash_key(key: &[u8]) -> &[u8] {
    hash_tag(key).unwrap_or(key)
}
