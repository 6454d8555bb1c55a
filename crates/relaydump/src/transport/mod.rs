//! Rank-addressed messaging between workers.
//!
//! Workers share no memory. Everything that crosses a worker boundary,
//! the shard token included, is a [`Message`] moved through a
//! [`GroupTransport`].

mod local;

pub use local::*;

use crate::{coordinator::Token, error::Result};
use core::future::Future;

/// Distinguishes independent conversations between the same pair of ranks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub u32);

impl Tag {
    /// Tag used for token hand-offs unless configured otherwise.
    pub const TOKEN: Self = Self(0x7a69);
}

impl Default for Tag {
    fn default() -> Self {
        Self::TOKEN
    }
}

/// Payload of a point-to-point message.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Token(Token),
}

/// A message together with its routing information.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub from: usize,
    pub tag: Tag,
    pub message: Message,
}

/// Group membership, collective barrier and tagged point-to-point messaging.
pub trait GroupTransport: Send {
    /// This worker's rank in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of workers in the group.
    fn size(&self) -> usize;

    /// Resolves once every rank of the group has entered the barrier.
    fn barrier(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Sends `message` to rank `to`.
    fn send(&mut self, to: usize, tag: Tag, message: Message)
    -> impl Future<Output = Result<()>> + Send;

    /// Receives the next message sent by `from` with `tag`. Messages that do
    /// not match are kept for later receives.
    fn recv_from(&mut self, from: usize, tag: Tag) -> impl Future<Output = Result<Message>> + Send;
}
