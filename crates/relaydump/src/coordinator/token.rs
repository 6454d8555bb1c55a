use bytes::Bytes;

/// Exclusive write right for one shard during one cycle.
///
/// The token is a value: it is moved to the next holder through the
/// transport together with the container image accumulated so far.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub shard: usize,
    pub holder: usize,
    pub cycle: u32,
    /// Only the chain's first holder creates the container.
    pub create: bool,
    pub image: Bytes,
    pub poison: Option<Poison>,
}

/// Marks a chain whose container can no longer be trusted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Poison {
    pub origin: usize,
    pub reason: String,
}

impl Token {
    /// The token as minted for a chain's first holder.
    pub fn first(shard: usize, holder: usize, cycle: u32) -> Self {
        Self {
            shard,
            holder,
            cycle,
            create: true,
            image: Bytes::new(),
            poison: None,
        }
    }

    /// Re-addresses the token to `next`, who will open the existing image.
    pub fn passed_to(self, next: usize) -> Self {
        Self {
            holder: next,
            create: false,
            ..self
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poison.is_some()
    }

    /// Poisons the token unless an upstream holder already did.
    pub fn poison(&mut self, origin: usize, reason: impl Into<String>) {
        if self.poison.is_none() {
            self.poison = Some(Poison {
                origin,
                reason: reason.into(),
            });
        }
    }
}
