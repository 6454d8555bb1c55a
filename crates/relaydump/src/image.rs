//! Building a shard's container image during the holder's turn.

use crate::{
    backend::StructuredFileBackend,
    data::{DataTree, DatasetSpec},
    error::BackendError,
    plan::{CompressionPlan, CompressionRequest},
};
use bytes::Bytes;

/// Serialized container content of one shard as of the current holder's turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileImage {
    pub bytes: Bytes,
    pub shard: usize,
    pub cycle: u32,
}

impl FileImage {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Writes datasets into an open container and snapshots it.
///
/// Holds no state of its own; everything lands in the backend container.
pub struct ImageBuilder<'b, B> {
    backend: &'b mut B,
}

impl<'b, B: StructuredFileBackend> ImageBuilder<'b, B> {
    pub fn new(backend: &'b mut B) -> Self {
        Self { backend }
    }

    /// Creates `dataset` under `group` with the given plan and writes its data.
    pub fn write_dataset(
        &mut self,
        container: &mut B::Container,
        group: &B::Group,
        dataset: &DatasetSpec<'_>,
        plan: &CompressionPlan,
    ) -> Result<(), BackendError> {
        self.backend.write_dataset(container, group, dataset, plan)
    }

    /// Writes every part of `tree` under its own `domain_*` namespace,
    /// resolving a plan per dataset. Returns the number of datasets written.
    pub fn write_parts(
        &mut self,
        container: &mut B::Container,
        tree: &DataTree,
        request: &CompressionRequest,
    ) -> Result<usize, BackendError> {
        let mut written = 0;
        for part in &tree.parts {
            let group = self.backend.create_group(container, &part.namespace())?;
            for var in &part.vars {
                let dataset = var.as_dataset();
                let count = dataset.element_count().ok_or_else(|| BackendError::Write {
                    dataset: format!("{}/{}", part.namespace(), dataset.name),
                    reason: format!("shape {:?} overflows the element count", dataset.shape),
                })?;
                let plan = request.resolve(count, dataset.shape, &*self.backend);
                self.write_dataset(container, &group, &dataset, &plan)?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Flushes the container and returns its byte-exact current image.
    ///
    /// Only valid while holding the shard's token, after all local datasets
    /// are written and before handing off.
    pub fn snapshot(
        &mut self,
        container: &mut B::Container,
        shard: usize,
        cycle: u32,
    ) -> Result<FileImage, BackendError> {
        let bytes = self.backend.snapshot(container)?;
        Ok(FileImage {
            bytes,
            shard,
            cycle,
        })
    }
}
