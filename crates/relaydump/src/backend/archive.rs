use super::StructuredFileBackend;
use crate::{
    data::{DatasetSpec, ElementKind},
    error::BackendError,
    plan::{CompressionPlan, FilterCapabilities, FilterKind, FilterStep, Layout},
};
use ::zip::{
    CompressionMethod, DateTime, ZipArchive, ZipWriter, result::ZipError,
    write::SimpleFileOptions,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Write};

/// Sidecar entry suffix holding a dataset's [`DatasetMeta`].
pub const META_SUFFIX: &str = ".json";

/// Layout and filter record stored next to every dataset entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub name: String,
    pub kind: ElementKind,
    pub shape: Vec<u64>,
    #[serde(flatten)]
    pub layout: Layout,
    pub filters: Vec<FilterStep>,
}

/// Container backend writing zip archives in memory.
///
/// Namespaces become directory entries and datasets become entries holding
/// little-endian element bytes. A chunked plan is recorded in the sidecar
/// but the entry is compressed as a whole. Only `shuffle` and `deflate` can
/// be applied.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZipBackend;

/// An open archive.
///
/// A finished image is kept as-is until another entry is written, so
/// snapshotting twice or closing right after a snapshot yields the same
/// bytes.
pub struct ZipContainer {
    name: String,
    state: ContainerState,
}

enum ContainerState {
    Writing(ZipWriter<Cursor<Vec<u8>>>),
    Finished(Bytes),
    Lost,
}

impl ZipContainer {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn writer(&mut self) -> Result<&mut ZipWriter<Cursor<Vec<u8>>>, BackendError> {
        if let ContainerState::Finished(image) = &self.state {
            let writer = rewrite(image).map_err(|e| BackendError::Write {
                dataset: self.name.clone(),
                reason: e.to_string(),
            })?;
            self.state = ContainerState::Writing(writer);
        }
        match &mut self.state {
            ContainerState::Writing(writer) => Ok(writer),
            _ => Err(BackendError::Write {
                dataset: self.name.clone(),
                reason: "container lost its writer after a failed snapshot".into(),
            }),
        }
    }

    /// Writes the central directory if entries were added since the last
    /// call and returns the complete image.
    fn finish(&mut self) -> Result<Bytes, String> {
        let image = match core::mem::replace(&mut self.state, ContainerState::Lost) {
            ContainerState::Writing(writer) => {
                Bytes::from(writer.finish().map_err(|e| e.to_string())?.into_inner())
            }
            ContainerState::Finished(image) => image,
            ContainerState::Lost => {
                return Err(format!("container `{}` is not open", self.name));
            }
        };
        self.state = ContainerState::Finished(image.clone());
        Ok(image)
    }
}

impl core::fmt::Debug for ZipContainer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ZipContainer")
            .field("name", &self.name)
            .field("open", &!matches!(self.state, ContainerState::Lost))
            .finish()
    }
}

/// A directory inside a [`ZipContainer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZipGroup {
    path: String,
}

impl ZipGroup {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl ZipBackend {
    pub const fn new() -> Self {
        Self
    }

    /// Lists the dataset entries (sidecars and directories excluded) of an
    /// image, in archive order.
    pub fn dataset_names(image: &[u8]) -> Result<Vec<String>, BackendError> {
        let archive = ZipArchive::new(Cursor::new(image)).map_err(read_err)?;
        Ok(archive
            .file_names()
            .filter(|n| !n.ends_with('/') && !n.ends_with(META_SUFFIX))
            .map(str::to_owned)
            .collect())
    }

    /// Reads one dataset back, undoing the shuffle filter.
    pub fn read_dataset(image: &[u8], path: &str) -> Result<(DatasetMeta, Vec<u8>), BackendError> {
        let mut archive = ZipArchive::new(Cursor::new(image)).map_err(read_err)?;

        let mut raw = Vec::new();
        archive
            .by_name(&format!("{path}{META_SUFFIX}"))
            .map_err(read_err)?
            .read_to_end(&mut raw)
            .map_err(read_err)?;
        let meta: DatasetMeta = serde_json::from_slice(&raw).map_err(read_err)?;

        let mut bytes = Vec::new();
        archive
            .by_name(path)
            .map_err(read_err)?
            .read_to_end(&mut bytes)
            .map_err(read_err)?;

        if meta.filters.contains(&FilterStep::Shuffle) {
            bytes = unshuffle(&bytes, meta.kind.size());
        }
        Ok((meta, bytes))
    }
}

impl FilterCapabilities for ZipBackend {
    fn supports(&self, filter: FilterKind) -> bool {
        matches!(filter, FilterKind::Shuffle | FilterKind::Deflate)
    }
}

impl StructuredFileBackend for ZipBackend {
    type Container = ZipContainer;
    type Group = ZipGroup;

    fn create(&mut self, name: &str) -> Result<ZipContainer, BackendError> {
        Ok(ZipContainer {
            name: name.to_owned(),
            state: ContainerState::Writing(ZipWriter::new(Cursor::new(Vec::new()))),
        })
    }

    fn open(&mut self, name: &str, image: &Bytes) -> Result<ZipContainer, BackendError> {
        ZipArchive::new(Cursor::new(image.clone())).map_err(|e| BackendError::Open {
            name: name.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(ZipContainer {
            name: name.to_owned(),
            state: ContainerState::Finished(image.clone()),
        })
    }

    fn create_group(
        &mut self,
        container: &mut ZipContainer,
        path: &str,
    ) -> Result<ZipGroup, BackendError> {
        let path = path.trim_end_matches('/');
        container
            .writer()?
            .add_directory(format!("{path}/"), entry_options())
            .map_err(|e| BackendError::Group {
                path: path.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(ZipGroup {
            path: path.to_owned(),
        })
    }

    fn write_dataset(
        &mut self,
        container: &mut ZipContainer,
        group: &ZipGroup,
        dataset: &DatasetSpec<'_>,
        plan: &CompressionPlan,
    ) -> Result<(), BackendError> {
        let entry = format!("{}/{}", group.path, dataset.name);
        let fail = |reason: String| BackendError::Write {
            dataset: entry.clone(),
            reason,
        };

        if let Some(step) = plan.filters().iter().find(|f| !self.supports(f.kind())) {
            return Err(fail(format!("filter `{}` is not available", step.name())));
        }
        if dataset.element_count() != Some(dataset.data.len() as u64) {
            return Err(fail(format!(
                "shape {:?} does not describe {} elements",
                dataset.shape,
                dataset.data.len()
            )));
        }

        let mut bytes = dataset.data.to_le_bytes();
        let mut options = entry_options();
        for step in plan.filters() {
            match step {
                FilterStep::Shuffle => bytes = shuffle(&bytes, dataset.kind().size()),
                FilterStep::Deflate { level } => {
                    options = options
                        .compression_method(CompressionMethod::Deflated)
                        .compression_level(Some(i64::from((*level).clamp(1, 9))));
                }
                FilterStep::Zfp { .. } | FilterStep::Szip { .. } => {}
            }
        }

        let meta = DatasetMeta {
            name: dataset.name.to_owned(),
            kind: dataset.kind(),
            shape: dataset.shape.to_vec(),
            layout: plan.layout().clone(),
            filters: plan.filters().to_vec(),
        };
        let meta = serde_json::to_vec(&meta).map_err(|e| fail(e.to_string()))?;

        let writer = container.writer()?;
        writer
            .start_file(entry.as_str(), options)
            .map_err(|e| fail(e.to_string()))?;
        writer.write_all(&bytes).map_err(|e| fail(e.to_string()))?;
        writer
            .start_file(format!("{entry}{META_SUFFIX}"), entry_options())
            .map_err(|e| fail(e.to_string()))?;
        writer.write_all(&meta).map_err(|e| fail(e.to_string()))?;
        Ok(())
    }

    fn snapshot(&mut self, container: &mut ZipContainer) -> Result<Bytes, BackendError> {
        container
            .finish()
            .map_err(|reason| BackendError::Snapshot { reason })
    }

    fn close(&mut self, mut container: ZipContainer) -> Result<Bytes, BackendError> {
        container
            .finish()
            .map_err(|reason| BackendError::Close { reason })
    }
}

/// Copies every entry of a finished image into a fresh writer, leaving the
/// old central directory behind.
fn rewrite(image: &Bytes) -> Result<ZipWriter<Cursor<Vec<u8>>>, ZipError> {
    let mut archive = ZipArchive::new(Cursor::new(image.clone()))?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(image.len())));
    for i in 0..archive.len() {
        writer.raw_copy_file(archive.by_index_raw(i)?)?;
    }
    Ok(writer)
}

fn entry_options() -> SimpleFileOptions {
    // Fixed timestamp keeps images byte-identical across runs.
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(DateTime::default())
}

fn read_err(e: impl core::fmt::Display) -> BackendError {
    BackendError::Read {
        reason: e.to_string(),
    }
}

/// Byte-transposes elements of `size` bytes.
fn shuffle(bytes: &[u8], size: usize) -> Vec<u8> {
    if size <= 1 {
        return bytes.to_vec();
    }
    let n = bytes.len() / size;
    let mut out = vec![0; bytes.len()];
    for (i, element) in bytes.chunks_exact(size).enumerate() {
        for (b, &byte) in element.iter().enumerate() {
            out[b * n + i] = byte;
        }
    }
    out
}

fn unshuffle(bytes: &[u8], size: usize) -> Vec<u8> {
    if size <= 1 {
        return bytes.to_vec();
    }
    let n = bytes.len() / size;
    let mut out = vec![0; bytes.len()];
    for (b, plane) in bytes.chunks_exact(n.max(1)).take(size).enumerate() {
        for (i, &byte) in plane.iter().enumerate() {
            out[i * size + b] = byte;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RawData;
    use crate::plan::resolve;

    fn write_one(
        backend: &mut ZipBackend,
        container: &mut ZipContainer,
        group: &str,
        name: &str,
        values: &[f64],
        plan: &CompressionPlan,
    ) {
        let group = backend.create_group(container, group).unwrap();
        let shape = [values.len() as u64];
        let ds = DatasetSpec::new(name, &shape, RawData::F64(values));
        backend.write_dataset(container, &group, &ds, plan).unwrap();
    }

    #[test]
    fn shuffle_round_trips() {
        let bytes: Vec<u8> = (0..24).collect();
        let shuffled = shuffle(&bytes, 8);
        assert_eq!(&shuffled[..3], &[0, 8, 16]);
        assert_eq!(unshuffle(&shuffled, 8), bytes);
    }

    #[test]
    fn reopened_image_grows_additively() {
        let mut backend = ZipBackend::new();
        let values: Vec<f64> = (0..2048).map(f64::from).collect();

        let mut c = backend.create("shard").unwrap();
        write_one(
            &mut backend,
            &mut c,
            "domain_0000000",
            "a",
            &values,
            &CompressionPlan::contiguous(),
        );
        let first = backend.close(c).unwrap();

        let plan = resolve(Some("gzip"), Some("level=5"), 2048, &[2048], &backend);
        assert!(plan.is_chunked());
        let mut c = backend.open("shard", &first).unwrap();
        write_one(&mut backend, &mut c, "domain_0000001", "a", &values, &plan);
        let snap = backend.snapshot(&mut c).unwrap();
        let last = backend.close(c).unwrap();

        assert_eq!(snap, last);
        assert!(last.len() > first.len());
        assert_eq!(
            ZipBackend::dataset_names(&last).unwrap(),
            vec!["domain_0000000/a", "domain_0000001/a"]
        );

        let (meta, bytes) = ZipBackend::read_dataset(&last, "domain_0000001/a").unwrap();
        assert_eq!(meta.filters, plan.filters());
        assert_eq!(meta.layout, *plan.layout());
        assert_eq!(bytes, RawData::F64(&values).to_le_bytes());
    }

    #[test]
    fn snapshot_keeps_container_writable() {
        let mut backend = ZipBackend::new();
        let mut c = backend.create("s").unwrap();
        write_one(&mut backend, &mut c, "g", "x", &[1.0], &CompressionPlan::contiguous());
        let snap = backend.snapshot(&mut c).unwrap();
        write_one(&mut backend, &mut c, "h", "y", &[2.0], &CompressionPlan::contiguous());
        let closed = backend.close(c).unwrap();

        assert_eq!(ZipBackend::dataset_names(&snap).unwrap(), vec!["g/x"]);
        assert_eq!(ZipBackend::dataset_names(&closed).unwrap(), vec!["g/x", "h/y"]);
    }

    #[test]
    fn close_returns_the_snapshot_image() {
        let mut backend = ZipBackend::new();
        let values: Vec<f64> = (0..256).map(f64::from).collect();
        let plain = CompressionPlan::contiguous();

        let mut c = backend.create("shard").unwrap();
        write_one(&mut backend, &mut c, "domain_0000000", "a", &values, &plain);
        let snap = backend.snapshot(&mut c).unwrap();
        assert_eq!(backend.snapshot(&mut c).unwrap(), snap);
        let head = backend.close(c).unwrap();
        assert_eq!(head, snap);

        let mut c = backend.create("shard").unwrap();
        write_one(&mut backend, &mut c, "domain_0000000", "a", &values, &plain);
        assert_eq!(backend.close(c).unwrap(), head);

        let mut c = backend.open("shard", &head).unwrap();
        write_one(&mut backend, &mut c, "domain_0000001", "a", &values, &plain);
        let snap = backend.snapshot(&mut c).unwrap();
        let tail = backend.close(c).unwrap();
        assert_eq!(tail, snap);

        // A second holder adds its entries and nothing else.
        let entry = tail.len() - head.len();
        let mut c = backend.open("shard", &tail).unwrap();
        write_one(&mut backend, &mut c, "domain_0000002", "a", &values, &plain);
        backend.snapshot(&mut c).unwrap();
        let third = backend.close(c).unwrap();
        assert_eq!(third.len() - tail.len(), entry);
    }

    #[test]
    fn reopening_without_writes_keeps_the_image() {
        let mut backend = ZipBackend::new();
        let mut c = backend.create("s").unwrap();
        write_one(&mut backend, &mut c, "g", "x", &[1.0], &CompressionPlan::contiguous());
        let first = backend.close(c).unwrap();

        let mut c = backend.open("s", &first).unwrap();
        assert_eq!(backend.snapshot(&mut c).unwrap(), first);
        assert_eq!(backend.close(c).unwrap(), first);
    }

    #[test]
    fn unsupported_filter_is_a_write_error() {
        let mut backend = ZipBackend::new();
        let mut c = backend.create("s").unwrap();
        let group = backend.create_group(&mut c, "g").unwrap();
        let plan = CompressionPlan::chunked(
            vec![4],
            vec![FilterStep::Zfp {
                mode: Default::default(),
            }],
        );
        let values = [0.0; 4];
        let ds = DatasetSpec::new("z", &[4], RawData::F64(&values));
        let err = backend.write_dataset(&mut c, &group, &ds, &plan).unwrap_err();
        assert!(matches!(err, BackendError::Write { .. }));
    }

    #[test]
    fn garbage_image_fails_to_open() {
        let mut backend = ZipBackend::new();
        let err = backend.open("s", &Bytes::from_static(b"not a zip")).unwrap_err();
        assert!(matches!(err, BackendError::Open { .. }));
    }
}
