use super::{ObjectStoreClient, PutCompletion, UploadCursor};
use bytes::{Bytes, BytesMut};
use core::num::NonZeroUsize;
use core::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

/// Default number of bytes requested per pull.
pub const DEFAULT_PULL_SIZE: NonZeroUsize = NonZeroUsize::MIN.saturating_add(64 * 1024 - 1);

/// In-process object store. Clones share the same objects.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    objects: Arc<Mutex<HashMap<String, Bytes>>>,
    puts: Arc<AtomicUsize>,
    pull_size: NonZeroUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_PULL_SIZE)
    }
}

impl MemoryStore {
    pub fn new(pull_size: NonZeroUsize) -> Self {
        Self {
            objects: Arc::default(),
            puts: Arc::default(),
            pull_size,
        }
    }

    /// Like [`MemoryStore::new`]; a zero pull size is raised to one.
    pub fn with_pull_size(pull_size: usize) -> Self {
        Self::new(NonZeroUsize::new(pull_size).unwrap_or(NonZeroUsize::MIN))
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().get(key).cloned()
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Completed PUTs, overwrites included.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }
}

impl ObjectStoreClient for MemoryStore {
    async fn put_object(
        &self,
        key: &str,
        content_length: usize,
        source: &mut UploadCursor,
    ) -> PutCompletion {
        let mut body = BytesMut::with_capacity(content_length);
        while let Some(chunk) = source.next_chunk(self.pull_size) {
            body.extend_from_slice(&chunk);
        }
        self.objects.lock().insert(key.to_owned(), body.freeze());
        self.puts.fetch_add(1, Ordering::Relaxed);
        PutCompletion::ok()
    }
}
