//! The structured-file container seam.
//!
//! Workers share no memory, so a container never outlives its holder's turn
//! as a live handle: [`StructuredFileBackend::close`] yields the full image
//! and the next holder reopens that image with
//! [`StructuredFileBackend::open`].

mod archive;

pub use archive::*;

use crate::{
    data::DatasetSpec,
    error::BackendError,
    plan::{CompressionPlan, FilterCapabilities},
};
use bytes::Bytes;

/// Hierarchical container library used to stage one shard's content.
///
/// The [`FilterCapabilities`] supertrait reports which filters this build can
/// apply; plans requesting anything else are degraded before they reach
/// [`StructuredFileBackend::write_dataset`].
pub trait StructuredFileBackend: FilterCapabilities {
    /// An open container.
    type Container;
    /// A namespace inside a container.
    type Group;

    /// Creates an empty container. Used only by a chain's first holder.
    fn create(&mut self, name: &str) -> Result<Self::Container, BackendError>;

    /// Reopens the image left by the previous holder for appending.
    fn open(&mut self, name: &str, image: &Bytes) -> Result<Self::Container, BackendError>;

    /// Creates the namespace `path` inside `container`.
    fn create_group(
        &mut self,
        container: &mut Self::Container,
        path: &str,
    ) -> Result<Self::Group, BackendError>;

    /// Creates `dataset` under `group`, applying `plan`, and writes its data.
    fn write_dataset(
        &mut self,
        container: &mut Self::Container,
        group: &Self::Group,
        dataset: &DatasetSpec<'_>,
        plan: &CompressionPlan,
    ) -> Result<(), BackendError>;

    /// Flushes pending writes and returns the container's full current image.
    /// The container stays open.
    fn snapshot(&mut self, container: &mut Self::Container) -> Result<Bytes, BackendError>;

    /// Flushes and closes the container, returning its final image.
    fn close(&mut self, container: Self::Container) -> Result<Bytes, BackendError>;
}
