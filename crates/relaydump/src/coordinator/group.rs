use crate::error::{ConfigError, Error, Result};

/// Static rank-to-shard assignment and per-shard hand-off chains.
///
/// Shard `s` is written by every rank `r` with `r % shard_count == s`, in
/// ascending rank order. The assignment is fixed for the run, which makes
/// shard content ordering reproducible.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputGroup {
    size: usize,
    chains: Vec<Vec<usize>>,
}

impl OutputGroup {
    pub fn round_robin(size: usize, shard_count: usize) -> Result<Self> {
        if shard_count == 0 || shard_count > size {
            return Err(Error::Config(ConfigError::OutOfRange {
                option: "shard_count",
                value: shard_count.to_string(),
                fallback: format!("a count in 1..={size}"),
            }));
        }
        let chains = (0..shard_count)
            .map(|shard| (shard..size).step_by(shard_count).collect())
            .collect();
        Ok(Self { size, chains })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn shard_count(&self) -> usize {
        self.chains.len()
    }

    pub fn shard_of(&self, rank: usize) -> usize {
        rank % self.chains.len()
    }

    /// Ranks of `shard` in hand-off order.
    pub fn chain(&self, shard: usize) -> &[usize] {
        self.chains.get(shard).map_or(&[][..], Vec::as_slice)
    }

    pub fn chains(&self) -> &[Vec<usize>] {
        &self.chains
    }

    /// The rank that hands the token to `rank`, if any.
    pub fn predecessor(&self, rank: usize) -> Option<usize> {
        rank.checked_sub(self.chains.len())
    }

    /// The rank `rank` hands the token to, if any.
    pub fn successor(&self, rank: usize) -> Option<usize> {
        Some(rank + self.chains.len()).filter(|&next| next < self.size)
    }

    pub fn is_chain_head(&self, rank: usize) -> bool {
        self.predecessor(rank).is_none()
    }

    pub fn is_chain_tail(&self, rank: usize) -> bool {
        self.successor(rank).is_none()
    }
}
