use super::{DEFAULT_PULL_SIZE, ErrorDetails, ObjectStoreClient, PutCompletion, UploadCursor};
use core::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Object store backed by a local directory; each key becomes one file.
#[derive(Clone, Debug)]
pub struct DirStore {
    root: PathBuf,
    pull_size: NonZeroUsize,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pull_size: DEFAULT_PULL_SIZE,
        }
    }

    pub fn with_pull_size(mut self, pull_size: NonZeroUsize) -> Self {
        self.pull_size = pull_size;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ObjectStoreClient for DirStore {
    async fn put_object(
        &self,
        key: &str,
        content_length: usize,
        source: &mut UploadCursor,
    ) -> PutCompletion {
        let path = self.path_for(key);
        let mut body = Vec::with_capacity(content_length);
        let mut buf = vec![0; self.pull_size.get()];
        loop {
            let n = source.pull(&mut buf);
            if n == 0 {
                break;
            }
            body.extend_from_slice(&buf[..n]);
        }

        // Write to a sibling then rename so readers never see a partial object.
        let mut staged = path.clone().into_os_string();
        staged.push(".part");
        let staged = PathBuf::from(staged);
        let written = async {
            tokio::fs::create_dir_all(&self.root).await?;
            tokio::fs::write(&staged, &body).await?;
            tokio::fs::rename(&staged, &path).await
        }
        .await;

        match written {
            Ok(()) => PutCompletion::ok(),
            Err(e) => PutCompletion::failed(
                format!("{:?}", e.kind()),
                ErrorDetails {
                    message: Some(e.to_string()),
                    resource: Some(path.display().to_string()),
                    ..ErrorDetails::default()
                },
            ),
        }
    }
}
