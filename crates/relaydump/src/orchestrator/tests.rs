use super::*;
use crate::{
    backend::ZipBackend,
    data::DatasetSpec,
    error::{BackendError, Error, ObjectStoreError},
    plan::{CompressionPlan, FilterCapabilities, FilterKind, FilterStep},
    transport::LocalGroup,
    upload::{ErrorDetails, MemoryStore, PutCompletion, UploadCursor},
};
use bytes::Bytes;
use parking_lot::Mutex;

/// Snapshot and close output of every rank, in call order.
type ImageLog = Arc<Mutex<Vec<(usize, &'static str, Bytes)>>>;

/// [`ZipBackend`] that can be told to fail reopening a shard.
struct Flaky {
    inner: ZipBackend,
    rank: usize,
    fail_open: bool,
    log: ImageLog,
}

impl FilterCapabilities for Flaky {
    fn supports(&self, filter: FilterKind) -> bool {
        self.inner.supports(filter)
    }
}

impl StructuredFileBackend for Flaky {
    type Container = <ZipBackend as StructuredFileBackend>::Container;
    type Group = <ZipBackend as StructuredFileBackend>::Group;

    fn create(&mut self, name: &str) -> Result<Self::Container, BackendError> {
        self.inner.create(name)
    }

    fn open(&mut self, name: &str, image: &Bytes) -> Result<Self::Container, BackendError> {
        if self.fail_open {
            return Err(BackendError::Open {
                name: name.into(),
                reason: "disk on fire".into(),
            });
        }
        self.inner.open(name, image)
    }

    fn create_group(
        &mut self,
        container: &mut Self::Container,
        path: &str,
    ) -> Result<Self::Group, BackendError> {
        self.inner.create_group(container, path)
    }

    fn write_dataset(
        &mut self,
        container: &mut Self::Container,
        group: &Self::Group,
        dataset: &DatasetSpec<'_>,
        plan: &CompressionPlan,
    ) -> Result<(), BackendError> {
        self.inner.write_dataset(container, group, dataset, plan)
    }

    fn snapshot(&mut self, container: &mut Self::Container) -> Result<Bytes, BackendError> {
        let image = self.inner.snapshot(container)?;
        self.log.lock().push((self.rank, "snapshot", image.clone()));
        Ok(image)
    }

    fn close(&mut self, container: Self::Container) -> Result<Bytes, BackendError> {
        let image = self.inner.close(container)?;
        self.log.lock().push((self.rank, "close", image.clone()));
        Ok(image)
    }
}

/// Store that rejects every PUT after draining it.
#[derive(Clone)]
struct Rejecting;

impl ObjectStoreClient for Rejecting {
    async fn put_object(&self, _: &str, _: usize, source: &mut UploadCursor) -> PutCompletion {
        let mut sink = vec![0; source.len()];
        source.pull(&mut sink);
        PutCompletion::failed("AccessDenied", ErrorDetails::message("bucket is read-only"))
    }
}

const DIMS: [u64; 2] = [8, 8];

fn settings(mode: FileMode, policy: UploadPolicy) -> Arc<DumpSettings> {
    let mut settings = DumpSettings::new(PluginInfo::new("tag", "zip"));
    settings.filebase = "base".into();
    settings.ext = Some("ext".into());
    settings.mode = mode;
    settings.policy = policy;
    settings.compression = CompressionRequest::parse(Some("gzip"), Some("minsize=16"));
    Arc::new(settings)
}

async fn run_cycle<C>(
    size: usize,
    settings: Arc<DumpSettings>,
    store: C,
    fail_open: &[usize],
) -> Vec<Result<CycleReport>>
where
    C: ObjectStoreClient + Clone + 'static,
{
    run_logged_cycle(size, settings, store, fail_open, ImageLog::default()).await
}

async fn run_logged_cycle<C>(
    size: usize,
    settings: Arc<DumpSettings>,
    store: C,
    fail_open: &[usize],
    log: ImageLog,
) -> Vec<Result<CycleReport>>
where
    C: ObjectStoreClient + Clone + 'static,
{
    let handles: Vec<_> = LocalGroup::new(size)
        .into_iter()
        .enumerate()
        .map(|(rank, ep)| {
            let backend = Flaky {
                inner: ZipBackend::new(),
                rank,
                fail_open: fail_open.contains(&rank),
                log: Arc::clone(&log),
            };
            let mut orchestrator = DumpOrchestrator::new(
                ep,
                backend,
                StreamUploader::new(store.clone()),
                Arc::clone(&settings),
            );
            tokio::spawn(async move {
                let tree = DataTree::synthetic(rank, 1, &DIMS, 42);
                orchestrator.dump(&tree, 1, 0.5).await
            })
        })
        .collect();

    futures::future::try_join_all(handles).await.unwrap()
}

fn names_of(ranks: &[usize]) -> Vec<String> {
    ranks
        .iter()
        .flat_map(|rank| {
            ["pressure", "temperature", "material"]
                .map(|var| format!("domain_{rank:07}/{var}"))
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn four_workers_two_shards() {
    let store = MemoryStore::with_pull_size(100);
    let results = run_cycle(
        4,
        settings(FileMode::Fixed(2), UploadPolicy::EveryHolder),
        store.clone(),
        &[],
    )
    .await;

    let reports: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(
        reports.iter().map(|r| r.hand_off).collect::<Vec<_>>(),
        vec![
            HandOff::Passed { to: 2 },
            HandOff::Passed { to: 3 },
            HandOff::Completed,
            HandOff::Completed,
        ]
    );
    assert_eq!(reports[2].key, "base_tag_00000_001.ext");
    assert_eq!(reports[3].key, "base_tag_00001_001.ext");
    assert!(reports.iter().all(|r| r.datasets == 3 && r.cycle == 1));

    assert_eq!(
        store.keys(),
        vec!["base_tag_00000_001.ext", "base_tag_00001_001.ext"]
    );
    assert_eq!(store.put_count(), 4);

    let shard0 = store.get("base_tag_00000_001.ext").unwrap();
    assert_eq!(reports[2].image_len, shard0.len());
    assert_eq!(reports[2].upload.as_ref().unwrap().bytes, shard0.len());
    assert_eq!(ZipBackend::dataset_names(&shard0).unwrap(), names_of(&[0, 2]));

    let shard1 = store.get("base_tag_00001_001.ext").unwrap();
    assert_eq!(ZipBackend::dataset_names(&shard1).unwrap(), names_of(&[1, 3]));
}

#[tokio::test(flavor = "multi_thread")]
async fn uploaded_image_is_the_image_handed_on() {
    let store = MemoryStore::default();
    let log = ImageLog::default();
    let mut uncompressed = (*settings(FileMode::Fixed(2), UploadPolicy::EveryHolder)).clone();
    uncompressed.compression = CompressionRequest::parse(None, None);
    let results = run_logged_cycle(
        6,
        Arc::new(uncompressed),
        store.clone(),
        &[],
        Arc::clone(&log),
    )
    .await;
    assert!(results.iter().all(Result::is_ok));

    let log = log.lock();
    let image = |rank: usize, op: &str| {
        log.iter()
            .find(|(r, o, _)| *r == rank && *o == op)
            .map(|(_, _, bytes)| bytes.clone())
            .unwrap()
    };
    for rank in 0..6 {
        assert_eq!(image(rank, "snapshot"), image(rank, "close"), "rank {rank}");
    }

    // Uncompressed parts are the same size on every rank, so the image
    // grows by a fixed amount per hop.
    for (shard, chain) in [(0, [0, 2, 4]), (1, [1, 3, 5])] {
        let sizes = chain.map(|rank| image(rank, "close").len());
        assert_eq!(sizes[2] - sizes[1], sizes[1] - sizes[0]);

        let key = format!("base_tag_{shard:05}_001.ext");
        assert_eq!(store.get(&key).unwrap(), image(chain[2], "close"));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn datasets_round_trip_through_the_image() {
    let store = MemoryStore::default();
    let results = run_cycle(
        2,
        settings(FileMode::Fixed(1), UploadPolicy::ChainTail),
        store.clone(),
        &[],
    )
    .await;
    assert!(results.iter().all(Result::is_ok));

    let image = store.get("base_tag_00000_001.ext").unwrap();
    let tree = DataTree::synthetic(1, 1, &DIMS, 42);
    for var in &tree.parts[0].vars {
        let path = format!("domain_0000001/{}", var.name);
        let (meta, bytes) = ZipBackend::read_dataset(&image, &path).unwrap();
        assert_eq!(meta.shape, DIMS);
        assert_eq!(meta.filters[0], FilterStep::Shuffle);
        assert_eq!(meta.filters[1], FilterStep::Deflate { level: 9 });
        assert_eq!(bytes, var.as_dataset().data.to_le_bytes());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn images_are_deterministic_across_runs() {
    let first = MemoryStore::default();
    let second = MemoryStore::default();
    for store in [&first, &second] {
        let results = run_cycle(
            6,
            settings(FileMode::Fixed(3), UploadPolicy::ChainTail),
            store.clone(),
            &[],
        )
        .await;
        assert!(results.iter().all(Result::is_ok));
    }

    assert_eq!(first.keys().len(), 3);
    for key in first.keys() {
        assert_eq!(first.get(&key), second.get(&key), "{key}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_open_poisons_only_its_chain() {
    let store = MemoryStore::default();
    let results = run_cycle(
        6,
        settings(FileMode::Fixed(2), UploadPolicy::EveryHolder),
        store.clone(),
        &[2],
    )
    .await;

    assert!(matches!(
        results[2],
        Err(Error::BackendIo(BackendError::Open { .. }))
    ));
    assert!(matches!(
        results[4],
        Err(Error::BackendIo(BackendError::Poisoned { origin: 2, .. }))
    ));
    for rank in [0, 1, 3, 5] {
        assert!(results[rank].is_ok(), "rank {rank}");
    }

    // Only the head's upload of shard 0 ever landed.
    let shard0 = store.get("base_tag_00000_001.ext").unwrap();
    assert_eq!(ZipBackend::dataset_names(&shard0).unwrap(), names_of(&[0]));
    let shard1 = store.get("base_tag_00001_001.ext").unwrap();
    assert_eq!(ZipBackend::dataset_names(&shard1).unwrap(), names_of(&[1, 3, 5]));
}

#[tokio::test(flavor = "multi_thread")]
async fn store_rejection_is_fatal() {
    let results = run_cycle(
        2,
        settings(FileMode::PerWorker, UploadPolicy::EveryHolder),
        Rejecting,
        &[],
    )
    .await;

    for result in results {
        let err = result.unwrap_err();
        assert!(err.is_fatal_for_process());
        match err {
            Error::ObjectStore(ObjectStoreError::Rejected { status, details, .. }) => {
                assert_eq!(status, "AccessDenied");
                assert_eq!(details.message.as_deref(), Some("bucket is read-only"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn auto_and_shared_single_modes_are_rejected() {
    for mode in [FileMode::Auto, FileMode::SharedSingle] {
        let store = MemoryStore::default();
        let results = run_cycle(
            3,
            settings(mode, UploadPolicy::EveryHolder),
            store.clone(),
            &[],
        )
        .await;
        for result in results {
            assert!(matches!(result, Err(Error::UnsupportedMode { .. })));
        }
        assert_eq!(store.put_count(), 0);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn chain_tail_policy_uploads_once_per_shard() {
    let store = MemoryStore::default();
    let results = run_cycle(
        5,
        settings(FileMode::Fixed(2), UploadPolicy::ChainTail),
        store.clone(),
        &[],
    )
    .await;

    let uploaded: Vec<_> = results
        .iter()
        .map(|r| r.as_ref().unwrap().upload.is_some())
        .collect();
    assert_eq!(uploaded, vec![false, false, false, true, true]);
    assert_eq!(store.put_count(), 2);

    let shard0 = store.get("base_tag_00000_001.ext").unwrap();
    assert_eq!(ZipBackend::dataset_names(&shard0).unwrap(), names_of(&[0, 2, 4]));
}

#[test]
fn upload_policy_parses() {
    assert_eq!("chain-tail".parse::<UploadPolicy>(), Ok(UploadPolicy::ChainTail));
    assert_eq!("Every-Holder".parse::<UploadPolicy>(), Ok(UploadPolicy::EveryHolder));
    assert!("sometimes".parse::<UploadPolicy>().is_err());
    assert!(UploadPolicy::ChainTail.uploads(true));
    assert!(!UploadPolicy::ChainTail.uploads(false));
}

#[test]
fn object_key_uses_plugin_name_and_extension() {
    let mut settings = DumpSettings::new(PluginInfo::new("zips3", "zip"));
    assert_eq!(settings.object_key(3, 12), "relaydump_zips3_00003_012.zip");
    settings.ext = Some("h5".into());
    assert_eq!(settings.object_key(3, 12), "relaydump_zips3_00003_012.h5");
}

#[test]
fn phase_timings_sum() {
    let timings = PhaseTimings {
        barrier: Duration::from_millis(1),
        upload: Duration::from_millis(4),
        ..PhaseTimings::default()
    };
    assert_eq!(timings.total(), Duration::from_millis(5));
}
