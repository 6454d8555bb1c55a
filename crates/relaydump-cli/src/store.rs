use crate::config::StoreConfig;
use core::num::NonZeroUsize;
use relaydump::{DirStore, MemoryStore, ObjectStoreClient, PutCompletion, UploadCursor};

/// The store selected on the command line.
#[derive(Clone, Debug)]
pub enum AnyStore {
    Memory(MemoryStore),
    Dir(DirStore),
    #[cfg(feature = "s3")]
    S3(relaydump::S3Store),
}

impl AnyStore {
    pub fn new(config: &StoreConfig, pull_size: NonZeroUsize) -> Self {
        match config {
            StoreConfig::Memory => Self::Memory(MemoryStore::new(pull_size)),
            StoreConfig::Dir(root) => Self::Dir(DirStore::new(root).with_pull_size(pull_size)),
            #[cfg(feature = "s3")]
            StoreConfig::S3(settings) => {
                Self::S3(relaydump::S3Store::new(settings).with_pull_size(pull_size))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Dir(_) => "dir",
            #[cfg(feature = "s3")]
            Self::S3(_) => "s3",
        }
    }
}

impl ObjectStoreClient for AnyStore {
    async fn put_object(
        &self,
        key: &str,
        content_length: usize,
        source: &mut UploadCursor,
    ) -> PutCompletion {
        match self {
            Self::Memory(store) => store.put_object(key, content_length, source).await,
            Self::Dir(store) => store.put_object(key, content_length, source).await,
            #[cfg(feature = "s3")]
            Self::S3(store) => store.put_object(key, content_length, source).await,
        }
    }
}
