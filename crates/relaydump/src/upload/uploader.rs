use super::{ObjectStoreClient, UploadCursor};
use crate::{error::ObjectStoreError, image::FileImage};
use core::num::NonZeroU32;

/// Outcome of a successful upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReceipt {
    pub key: String,
    pub bytes: usize,
    pub attempts: u32,
}

/// Streams file images into an [`ObjectStoreClient`].
///
/// With the default single attempt any failure is final. More attempts
/// rewind the cursor and reissue the whole PUT, which is safe because each
/// key is written by one atomic PUT.
#[derive(Clone, Debug)]
pub struct StreamUploader<C> {
    client: C,
    max_attempts: NonZeroU32,
}

impl<C: ObjectStoreClient> StreamUploader<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            max_attempts: NonZeroU32::MIN,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: NonZeroU32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Uploads `image` under `key`.
    ///
    /// A non-OK status, any error detail, or a cursor the client left
    /// undrained fails the attempt.
    pub async fn upload(
        &self,
        key: &str,
        image: &FileImage,
    ) -> Result<UploadReceipt, ObjectStoreError> {
        let mut cursor = UploadCursor::new(image.bytes.clone());
        let mut attempt = 1;
        loop {
            cursor.rewind();
            let completion = self.client.put_object(key, image.len(), &mut cursor).await;

            let outcome = if !completion.status.is_ok() {
                Err(ObjectStoreError::Rejected {
                    key: key.to_owned(),
                    status: completion.status.to_string(),
                    details: completion.details,
                })
            } else if !completion.details.is_empty() {
                Err(ObjectStoreError::ErrorDetail {
                    key: key.to_owned(),
                    details: completion.details,
                })
            } else if !cursor.is_drained() {
                Err(ObjectStoreError::Incomplete {
                    key: key.to_owned(),
                    sent: cursor.offset(),
                    expected: cursor.len(),
                })
            } else {
                Ok(())
            };

            match outcome {
                Ok(()) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(key, bytes = image.len(), attempt, "Upload complete");
                    return Ok(UploadReceipt {
                        key: key.to_owned(),
                        bytes: image.len(),
                        attempts: attempt,
                    });
                }
                Err(_e) if attempt < self.max_attempts.get() => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(attempt, "Retrying upload: {_e}");
                    attempt += 1;
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("{e}");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::{ErrorDetails, MemoryStore, PutCompletion};
    use bytes::Bytes;
    use parking_lot::Mutex;

    fn image(bytes: &'static [u8]) -> FileImage {
        FileImage {
            bytes: Bytes::from_static(bytes),
            shard: 0,
            cycle: 1,
        }
    }

    /// Replays scripted completions, draining the cursor only on `Ok`.
    struct Scripted(Mutex<Vec<PutCompletion>>);

    impl ObjectStoreClient for Scripted {
        async fn put_object(&self, _: &str, _: usize, source: &mut UploadCursor) -> PutCompletion {
            let next = self.0.lock().remove(0);
            if next.status.is_ok() {
                let mut buf = [0; 2];
                while source.pull(&mut buf) > 0 {}
            }
            next
        }
    }

    #[tokio::test]
    async fn memory_store_receives_exact_bytes() {
        let store = MemoryStore::with_pull_size(3);
        let uploader = StreamUploader::new(store.clone());
        let receipt = uploader.upload("k", &image(b"0123456789")).await.unwrap();
        assert_eq!(receipt.bytes, 10);
        assert_eq!(receipt.attempts, 1);
        assert_eq!(store.get("k").unwrap(), Bytes::from_static(b"0123456789"));
    }

    #[tokio::test]
    async fn error_detail_with_ok_status_is_fatal() {
        let details = ErrorDetails::message("slow down");
        let client = Scripted(Mutex::new(vec![PutCompletion {
            status: crate::upload::StoreStatus::Ok,
            details: details.clone(),
        }]));
        let err = StreamUploader::new(client)
            .upload("k", &image(b"abc"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ObjectStoreError::ErrorDetail {
                key: "k".into(),
                details
            }
        );
    }

    #[tokio::test]
    async fn short_transfer_is_incomplete() {
        struct Lazy;
        impl ObjectStoreClient for Lazy {
            async fn put_object(&self, _: &str, _: usize, source: &mut UploadCursor) -> PutCompletion {
                source.pull(&mut [0; 1]);
                PutCompletion::ok()
            }
        }
        let err = StreamUploader::new(Lazy)
            .upload("k", &image(b"abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::Incomplete { sent: 1, expected: 3, .. }));
    }

    #[tokio::test]
    async fn retries_only_when_allowed() {
        let script = || {
            Mutex::new(vec![
                PutCompletion::failed("InternalError", ErrorDetails::default()),
                PutCompletion::ok(),
            ])
        };

        let err = StreamUploader::new(Scripted(script()))
            .upload("k", &image(b"abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::Rejected { ref status, .. } if status == "InternalError"));

        let receipt = StreamUploader::new(Scripted(script()))
            .with_max_attempts(NonZeroU32::new(2).unwrap())
            .upload("k", &image(b"abc"))
            .await
            .unwrap();
        assert_eq!(receipt.attempts, 2);
    }
}
