//! Exclusive-access hand-off of shard containers across workers.
//!
//! Each shard has a fixed chain of ranks in ascending order. The chain head
//! mints the shard's [`Token`]; every other member blocks in
//! [`TokenCoordinator::wait_for_token`] until its predecessor sends the token
//! over the transport. A holder closes its container before passing the
//! token on, so exactly one rank touches a shard at any instant.
//!
//! Backend failures do not stop the chain. The failing holder poisons the
//! token and still hands it off; downstream holders see the poison and fail
//! fast without touching the backend.

mod group;
mod token;

pub use group::*;
pub use token::*;

use crate::{
    backend::StructuredFileBackend,
    error::{BackendError, Error, Result},
    transport::{GroupTransport, Message, Tag},
};
use bytes::Bytes;

/// Transport options for token traffic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoFlags {
    pub tag: Tag,
}

/// Result of [`TokenCoordinator::hand_off`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandOff {
    /// The token was sent to the next member of the chain.
    Passed { to: usize },
    /// This rank was the chain's last member; the shard is complete.
    Completed,
}

/// One rank's participation in its shard's hand-off chain for one cycle.
pub struct TokenCoordinator<'t, T> {
    transport: &'t mut T,
    group: OutputGroup,
    flags: IoFlags,
    cycle: u32,
    rank: usize,
    shard: usize,
    held: Option<Token>,
    acquired: bool,
}

impl<'t, T: GroupTransport> TokenCoordinator<'t, T> {
    /// Partitions the group into `shard_count` round-robin chains.
    pub fn init(
        shard_count: usize,
        flags: IoFlags,
        transport: &'t mut T,
        cycle: u32,
    ) -> Result<Self> {
        let group = OutputGroup::round_robin(transport.size(), shard_count)?;
        let rank = transport.rank();
        let shard = group.shard_of(rank);
        Ok(Self {
            transport,
            group,
            flags,
            cycle,
            rank,
            shard,
            held: None,
            acquired: false,
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn shard(&self) -> usize {
        self.shard
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    pub fn group(&self) -> &OutputGroup {
        &self.group
    }

    pub fn is_chain_head(&self) -> bool {
        self.group.is_chain_head(self.rank)
    }

    pub fn is_chain_tail(&self) -> bool {
        self.group.is_chain_tail(self.rank)
    }

    /// The token, while this rank holds it.
    pub fn token(&self) -> Option<&Token> {
        self.held.as_ref()
    }

    /// Blocks until this rank holds its shard's token, then creates (chain
    /// head) or reopens the shard container.
    ///
    /// On `Err` the token is still held, poisoned, and must be passed on with
    /// [`TokenCoordinator::hand_off`].
    pub async fn wait_for_token<B: StructuredFileBackend>(
        &mut self,
        backend: &mut B,
        filename: &str,
    ) -> Result<B::Container> {
        if self.acquired {
            return Err(Error::Protocol {
                context: format!(
                    "rank {} already took shard {} in cycle {}",
                    self.rank, self.shard, self.cycle
                ),
            });
        }

        let token = match self.group.predecessor(self.rank) {
            None => Token::first(self.shard, self.rank, self.cycle),
            Some(from) => {
                let Message::Token(token) = self.transport.recv_from(from, self.flags.tag).await?;
                self.check(&token, from)?;
                token
            }
        };
        self.acquired = true;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            rank = self.rank,
            shard = self.shard,
            cycle = self.cycle,
            create = token.create,
            "Token acquired"
        );

        let token = self.held.insert(token);
        if let Some(poison) = &token.poison {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                rank = self.rank,
                origin = poison.origin,
                "Shard {} chain is poisoned: {}",
                self.shard,
                poison.reason
            );
            return Err(BackendError::Poisoned {
                origin: poison.origin,
                reason: poison.reason.clone(),
            }
            .into());
        }

        let opened = if token.create {
            backend.create(filename)
        } else {
            backend.open(filename, &token.image)
        };
        opened.map_err(|e| {
            token.poison(self.rank, e.to_string());
            e.into()
        })
    }

    /// Poisons the held token after a failure between acquire and hand-off.
    pub fn record_failure(&mut self, reason: impl Into<String>) {
        if let Some(token) = &mut self.held {
            token.poison(self.rank, reason);
        }
    }

    /// Closes `container` (when one was opened) and passes the token to the
    /// next chain member, or marks the shard complete at the chain's tail.
    ///
    /// The token is passed on even when closing fails; the close error is
    /// returned afterwards.
    pub async fn hand_off<B: StructuredFileBackend>(
        &mut self,
        backend: &mut B,
        container: Option<B::Container>,
    ) -> Result<HandOff> {
        let Some(mut token) = self.held.take() else {
            return Err(Error::Protocol {
                context: format!(
                    "rank {} handed off shard {} without holding its token",
                    self.rank, self.shard
                ),
            });
        };

        let mut close_err = None;
        if let Some(container) = container {
            match backend.close(container) {
                Ok(image) if !token.is_poisoned() => token.image = image,
                Ok(_) => {}
                Err(e) => {
                    token.poison(self.rank, e.to_string());
                    token.image = Bytes::new();
                    close_err = Some(e);
                }
            }
        }

        let outcome = match self.group.successor(self.rank) {
            Some(next) => {
                self.transport
                    .send(next, self.flags.tag, Message::Token(token.passed_to(next)))
                    .await?;
                HandOff::Passed { to: next }
            }
            None => HandOff::Completed,
        };

        #[cfg(feature = "tracing")]
        match outcome {
            HandOff::Passed { to } => {
                tracing::debug!(rank = self.rank, shard = self.shard, to, "Token handed off");
            }
            HandOff::Completed => {
                tracing::debug!(rank = self.rank, shard = self.shard, "Shard chain complete");
            }
        }

        match close_err {
            Some(e) => Err(e.into()),
            None => Ok(outcome),
        }
    }

    /// Collective teardown; every rank calls it once per cycle whether or
    /// not its own chain segment succeeded.
    pub async fn finish(self) -> Result<()> {
        if self.held.is_some() {
            return Err(Error::Protocol {
                context: format!(
                    "rank {} finished while still holding shard {}",
                    self.rank, self.shard
                ),
            });
        }
        self.transport.barrier().await
    }

    fn check(&self, token: &Token, from: usize) -> Result<()> {
        if token.shard != self.shard || token.cycle != self.cycle || token.holder != self.rank {
            return Err(Error::Protocol {
                context: format!(
                    "rank {} expected shard {} cycle {} from rank {from}, got shard {} cycle {} for rank {}",
                    self.rank, self.shard, self.cycle, token.shard, token.cycle, token.holder
                ),
            });
        }
        Ok(())
    }
}
