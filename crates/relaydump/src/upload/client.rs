use super::UploadCursor;
use core::fmt;
use core::future::Future;

/// Terminal status of one PUT.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreStatus {
    Ok,
    /// Any non-success status, named by the store.
    Error(String),
}

impl StoreStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::Error(status) => f.write_str(status),
        }
    }
}

/// Structured error payload a store may attach to a completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorDetails {
    pub message: Option<String>,
    pub resource: Option<String>,
    pub further_details: Option<String>,
    pub extra: Vec<(String, String)>,
}

impl ErrorDetails {
    pub fn is_empty(&self) -> bool {
        self.message.is_none()
            && self.resource.is_none()
            && self.further_details.is_none()
            && self.extra.is_empty()
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(message) = &self.message {
            write!(f, "\n  Message: {message}")?;
        }
        if let Some(resource) = &self.resource {
            write!(f, "\n  Resource: {resource}")?;
        }
        if let Some(further) = &self.further_details {
            write!(f, "\n  Further Details: {further}")?;
        }
        if !self.extra.is_empty() {
            f.write_str("\n  Extra Details:")?;
            for (name, value) in &self.extra {
                write!(f, "\n    {name}: {value}")?;
            }
        }
        Ok(())
    }
}

/// What the store reports once a PUT has finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutCompletion {
    pub status: StoreStatus,
    pub details: ErrorDetails,
}

impl PutCompletion {
    pub fn ok() -> Self {
        Self {
            status: StoreStatus::Ok,
            details: ErrorDetails::default(),
        }
    }

    pub fn failed(status: impl Into<String>, details: ErrorDetails) -> Self {
        Self {
            status: StoreStatus::Error(status.into()),
            details,
        }
    }
}

/// A PUT-style object store.
///
/// The client drives the transfer: it pulls at most its own chunk size from
/// `source` per request until the cursor is drained, then reports a single
/// terminal [`PutCompletion`].
pub trait ObjectStoreClient: Send + Sync {
    fn put_object(
        &self,
        key: &str,
        content_length: usize,
        source: &mut UploadCursor,
    ) -> impl Future<Output = PutCompletion> + Send;
}

impl<C: ObjectStoreClient> ObjectStoreClient for std::sync::Arc<C> {
    fn put_object(
        &self,
        key: &str,
        content_length: usize,
        source: &mut UploadCursor,
    ) -> impl Future<Output = PutCompletion> + Send {
        (**self).put_object(key, content_length, source)
    }
}
