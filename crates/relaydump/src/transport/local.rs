use super::{Envelope, GroupTransport, Message, Tag};
use crate::error::{Error, Result};
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::{Barrier, mpsc};

/// Messages a rank may have in flight before senders wait.
pub const DEFAULT_INBOX_CAPACITY: usize = 64;

/// Constructor for an in-process group.
pub struct LocalGroup;

impl LocalGroup {
    /// Builds one connected endpoint per rank, in rank order.
    pub fn new(size: usize) -> Vec<LocalEndpoint> {
        Self::with_capacity(size, DEFAULT_INBOX_CAPACITY)
    }

    pub fn with_capacity(size: usize, capacity: usize) -> Vec<LocalEndpoint> {
        let (senders, inboxes): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::channel(capacity.max(1))).unzip();
        let peers: Arc<[mpsc::Sender<Envelope>]> = senders.into();
        let barrier = Arc::new(Barrier::new(size));

        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalEndpoint {
                rank,
                peers: Arc::clone(&peers),
                inbox,
                pending: VecDeque::new(),
                barrier: Arc::clone(&barrier),
            })
            .collect()
    }
}

/// One rank's view of a [`LocalGroup`].
pub struct LocalEndpoint {
    rank: usize,
    peers: Arc<[mpsc::Sender<Envelope>]>,
    inbox: mpsc::Receiver<Envelope>,
    pending: VecDeque<Envelope>,
    barrier: Arc<Barrier>,
}

impl core::fmt::Debug for LocalEndpoint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalEndpoint")
            .field("rank", &self.rank)
            .field("size", &self.peers.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl GroupTransport for LocalEndpoint {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    async fn barrier(&mut self) -> Result<()> {
        self.barrier.wait().await;
        Ok(())
    }

    async fn send(&mut self, to: usize, tag: Tag, message: Message) -> Result<()> {
        let peer = self.peers.get(to).ok_or_else(|| Error::Transport {
            context: format!("rank {to} is outside a group of {}", self.peers.len()),
        })?;
        let envelope = Envelope {
            from: self.rank,
            tag,
            message,
        };
        peer.send(envelope).await.map_err(|_| Error::Transport {
            context: format!("rank {to} inbox closed"),
        })
    }

    async fn recv_from(&mut self, from: usize, tag: Tag) -> Result<Message> {
        if from >= self.peers.len() {
            return Err(Error::Transport {
                context: format!("rank {from} is outside a group of {}", self.peers.len()),
            });
        }

        let wanted = |e: &Envelope| e.from == from && e.tag == tag;
        if let Some(i) = self.pending.iter().position(wanted) {
            if let Some(envelope) = self.pending.remove(i) {
                return Ok(envelope.message);
            }
        }

        loop {
            match self.inbox.recv().await {
                Some(envelope) if wanted(&envelope) => return Ok(envelope.message),
                Some(envelope) => self.pending.push_back(envelope),
                None => {
                    return Err(Error::Transport {
                        context: format!("rank {} inbox closed", self.rank),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::Token;

    fn token(shard: usize, holder: usize) -> Message {
        Message::Token(Token::first(shard, holder, 1))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn out_of_order_messages_are_buffered() {
        let mut eps = LocalGroup::new(3);
        let mut two = eps.pop().unwrap();
        let mut one = eps.pop().unwrap();
        let mut zero = eps.pop().unwrap();

        zero.send(2, Tag(1), token(0, 0)).await.unwrap();
        one.send(2, Tag::TOKEN, token(1, 1)).await.unwrap();
        zero.send(2, Tag::TOKEN, token(0, 2)).await.unwrap();

        assert_eq!(two.recv_from(1, Tag::TOKEN).await.unwrap(), token(1, 1));
        assert_eq!(two.recv_from(0, Tag::TOKEN).await.unwrap(), token(0, 2));
        assert_eq!(two.recv_from(0, Tag(1)).await.unwrap(), token(0, 0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn out_of_range_rank_is_a_transport_error() {
        let mut eps = LocalGroup::new(1);
        let err = eps[0].send(5, Tag::TOKEN, token(0, 0)).await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert!(err.is_fatal_for_process());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn barrier_releases_all_ranks() {
        let handles: Vec<_> = LocalGroup::new(4)
            .into_iter()
            .map(|mut ep| tokio::spawn(async move { ep.barrier().await.map(|()| ep.rank()) }))
            .collect();
        let mut ranks = Vec::new();
        for handle in handles {
            ranks.push(handle.await.unwrap().unwrap());
        }
        assert_eq!(ranks, vec![0, 1, 2, 3]);
    }
}
