use super::{DEFAULT_PULL_SIZE, ErrorDetails, ObjectStoreClient, PutCompletion, UploadCursor};
use core::num::NonZeroUsize;
use object_store::{
    ObjectStore, PutOptions, PutPayload,
    aws::{AmazonS3, AmazonS3Builder},
    path::Path,
};
use std::sync::Arc;

/// Process-wide S3 connection settings, read once at startup.
///
/// Nothing is validated up front; a missing value surfaces as a failed
/// upload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct S3Settings {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub host: Option<String>,
    pub region: Option<String>,
    pub bucket: Option<String>,
}

impl S3Settings {
    /// Reads `S3_ACCESS_KEY`, `S3_SECRET_KEY`, `S3_HOST`, `S3_REGION` and
    /// `S3_BUCKET`.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            access_key: var("S3_ACCESS_KEY"),
            secret_key: var("S3_SECRET_KEY"),
            host: var("S3_HOST"),
            region: var("S3_REGION"),
            bucket: var("S3_BUCKET"),
        }
    }

    fn build(&self) -> object_store::Result<AmazonS3> {
        let mut builder = AmazonS3Builder::new().with_virtual_hosted_style_request(false);
        if let Some(key) = &self.access_key {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = &self.secret_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(region) = &self.region {
            builder = builder.with_region(region);
        }
        if let Some(bucket) = &self.bucket {
            builder = builder.with_bucket_name(bucket);
        }
        if let Some(host) = &self.host {
            let endpoint = if host.contains("://") {
                host.clone()
            } else {
                format!("http://{host}")
            };
            builder = builder
                .with_allow_http(endpoint.starts_with("http://"))
                .with_endpoint(endpoint);
        }
        builder.build()
    }
}

/// S3-compatible store reached through `object_store`.
#[derive(Clone, Debug)]
pub struct S3Store {
    inner: Result<Arc<AmazonS3>, String>,
    pull_size: NonZeroUsize,
}

impl S3Store {
    pub fn new(settings: &S3Settings) -> Self {
        Self {
            inner: settings.build().map(Arc::new).map_err(|e| e.to_string()),
            pull_size: DEFAULT_PULL_SIZE,
        }
    }

    pub fn with_pull_size(mut self, pull_size: NonZeroUsize) -> Self {
        self.pull_size = pull_size;
        self
    }
}

impl ObjectStoreClient for S3Store {
    async fn put_object(
        &self,
        key: &str,
        content_length: usize,
        source: &mut UploadCursor,
    ) -> PutCompletion {
        let store = match &self.inner {
            Ok(store) => store,
            Err(reason) => {
                return PutCompletion::failed(
                    "ConfigurationError",
                    ErrorDetails {
                        message: Some(reason.clone()),
                        resource: Some(key.to_owned()),
                        ..ErrorDetails::default()
                    },
                );
            }
        };

        let payload: PutPayload =
            core::iter::from_fn(|| source.next_chunk(self.pull_size)).collect();
        debug_assert_eq!(payload.content_length(), content_length);

        match store
            .put_opts(&Path::from(key), payload, PutOptions::default())
            .await
        {
            Ok(_) => PutCompletion::ok(),
            Err(e) => PutCompletion::failed(
                status_of(&e),
                ErrorDetails {
                    message: Some(e.to_string()),
                    resource: Some(key.to_owned()),
                    further_details: std::error::Error::source(&e).map(ToString::to_string),
                    extra: Vec::new(),
                },
            ),
        }
    }
}

fn status_of(e: &object_store::Error) -> &'static str {
    match e {
        object_store::Error::NotFound { .. } => "NotFound",
        object_store::Error::AlreadyExists { .. } => "AlreadyExists",
        object_store::Error::Precondition { .. } => "PreconditionFailed",
        object_store::Error::PermissionDenied { .. } => "PermissionDenied",
        object_store::Error::Unauthenticated { .. } => "Unauthenticated",
        object_store::Error::NotImplemented { .. } => "NotImplemented",
        _ => "Generic",
    }
}
