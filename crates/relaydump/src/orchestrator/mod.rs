//! One checkpoint cycle, end to end.
//!
//! ```text
//! barrier -> shard count -> wait for token -> write parts -> snapshot
//!         -> upload -> hand off -> finish
//! ```
//!
//! Every rank runs [`DumpOrchestrator::dump`] once per cycle. A backend
//! failure poisons the shard's chain but the rank still hands off and
//! finishes so no peer deadlocks. Store, transport and mode errors are
//! returned immediately and are fatal for the whole group.

mod key;
mod mode;
#[cfg(test)]
mod tests;

pub use key::*;
pub use mode::*;

use crate::{
    backend::StructuredFileBackend,
    coordinator::{HandOff, IoFlags, TokenCoordinator},
    data::DataTree,
    error::Result,
    image::ImageBuilder,
    plan::CompressionRequest,
    registry::PluginInfo,
    transport::GroupTransport,
    upload::{ObjectStoreClient, StreamUploader, UploadReceipt},
};
use core::{str::FromStr, time::Duration};
use std::{sync::Arc, time::Instant};

/// Which holders of a shard upload its image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum UploadPolicy {
    /// Every holder uploads after its turn; the key is overwritten along the
    /// chain and the tail's upload is the complete shard.
    #[default]
    EveryHolder,
    /// Only the chain's last holder uploads.
    ChainTail,
}

impl UploadPolicy {
    pub fn uploads(self, is_chain_tail: bool) -> bool {
        match self {
            Self::EveryHolder => true,
            Self::ChainTail => is_chain_tail,
        }
    }
}

impl FromStr for UploadPolicy {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "every-holder" => Ok(Self::EveryHolder),
            "chain-tail" => Ok(Self::ChainTail),
            other => Err(format!(
                "unknown upload policy `{other}`, expected `every-holder` or `chain-tail`"
            )),
        }
    }
}

/// Run-wide dump options shared by every rank.
#[derive(Clone, Debug)]
pub struct DumpSettings {
    pub mode: FileMode,
    pub filebase: String,
    pub plugin: PluginInfo,
    /// Overrides the plugin's file extension.
    pub ext: Option<String>,
    pub compression: CompressionRequest,
    pub policy: UploadPolicy,
    pub flags: IoFlags,
}

impl DumpSettings {
    pub fn new(plugin: PluginInfo) -> Self {
        Self {
            mode: FileMode::default(),
            filebase: "relaydump".into(),
            plugin,
            ext: None,
            compression: CompressionRequest::none(),
            policy: UploadPolicy::default(),
            flags: IoFlags::default(),
        }
    }

    pub fn ext(&self) -> &str {
        self.ext.as_deref().unwrap_or(&self.plugin.ext)
    }

    pub fn object_key(&self, shard: usize, cycle: u32) -> String {
        ObjectKey {
            filebase: &self.filebase,
            tag: &self.plugin.name,
            shard,
            cycle,
            ext: self.ext(),
        }
        .to_string()
    }
}

/// Wall time spent in each phase of a cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseTimings {
    pub barrier: Duration,
    pub wait_for_token: Duration,
    pub build: Duration,
    pub upload: Duration,
    pub hand_off: Duration,
    pub finish: Duration,
}

impl PhaseTimings {
    pub fn phases(&self) -> [(&'static str, Duration); 6] {
        [
            ("barrier", self.barrier),
            ("wait_for_token", self.wait_for_token),
            ("build", self.build),
            ("upload", self.upload),
            ("hand_off", self.hand_off),
            ("finish", self.finish),
        ]
    }

    pub fn total(&self) -> Duration {
        self.phases().iter().map(|(_, d)| *d).sum()
    }
}

/// What one rank did during one cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    pub rank: usize,
    pub shard: usize,
    pub cycle: u32,
    pub time: f64,
    pub key: String,
    pub image_len: usize,
    pub datasets: usize,
    pub upload: Option<UploadReceipt>,
    pub hand_off: HandOff,
    pub timings: PhaseTimings,
}

/// Drives checkpoint cycles for one rank.
pub struct DumpOrchestrator<T, B, C> {
    transport: T,
    backend: B,
    uploader: StreamUploader<C>,
    settings: Arc<DumpSettings>,
}

impl<T, B, C> DumpOrchestrator<T, B, C>
where
    T: GroupTransport,
    B: StructuredFileBackend,
    C: ObjectStoreClient,
{
    pub fn new(
        transport: T,
        backend: B,
        uploader: StreamUploader<C>,
        settings: Arc<DumpSettings>,
    ) -> Self {
        Self {
            transport,
            backend,
            uploader,
            settings,
        }
    }

    pub fn rank(&self) -> usize {
        self.transport.rank()
    }

    pub fn settings(&self) -> &DumpSettings {
        &self.settings
    }

    /// Runs one cycle.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedMode`] for `MIFAUTO` and `SIF`.
    /// - [`Error::BackendIo`] when this rank's turn failed or its chain was
    ///   poisoned upstream. The token has been passed on and the cycle
    ///   finished.
    /// - [`Error::ObjectStore`] as soon as an upload fails; the rank stops
    ///   without handing off.
    /// - [`Error::Transport`] or [`Error::Protocol`] when messaging broke.
    ///
    /// [`Error::UnsupportedMode`]: crate::Error::UnsupportedMode
    /// [`Error::BackendIo`]: crate::Error::BackendIo
    /// [`Error::ObjectStore`]: crate::Error::ObjectStore
    /// [`Error::Transport`]: crate::Error::Transport
    /// [`Error::Protocol`]: crate::Error::Protocol
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(rank = self.transport.rank(), cycle = cycle)))]
    pub async fn dump(&mut self, tree: &DataTree, cycle: u32, time: f64) -> Result<CycleReport> {
        let settings = Arc::clone(&self.settings);
        let mut timings = PhaseTimings::default();

        let started = Instant::now();
        self.transport.barrier().await?;
        timings.barrier = started.elapsed();

        let (shard_count, _adjusted) = settings
            .mode
            .determine_shard_count(self.transport.size())?;
        #[cfg(feature = "tracing")]
        if let Some(warning) = &_adjusted {
            tracing::warn!("{warning}");
        }

        let mut coord =
            TokenCoordinator::init(shard_count, settings.flags, &mut self.transport, cycle)?;
        let shard = coord.shard();
        let key = settings.object_key(shard, cycle);

        let started = Instant::now();
        let opened = coord.wait_for_token(&mut self.backend, &key).await;
        timings.wait_for_token = started.elapsed();

        let mut failure = None;
        let mut container = match opened {
            Ok(container) => Some(container),
            Err(e) if e.is_fatal_for_process() => return Err(e),
            Err(e) => {
                failure = Some(e);
                None
            }
        };

        let mut image_len = 0;
        let mut datasets = 0;
        let mut upload = None;
        if let Some(container) = container.as_mut() {
            let started = Instant::now();
            let mut builder = ImageBuilder::new(&mut self.backend);
            let built = builder
                .write_parts(container, tree, &settings.compression)
                .and_then(|n| {
                    datasets = n;
                    builder.snapshot(container, shard, cycle)
                });
            timings.build = started.elapsed();

            match built {
                Ok(image) => {
                    image_len = image.len();
                    if settings.policy.uploads(coord.is_chain_tail()) {
                        let started = Instant::now();
                        upload = Some(self.uploader.upload(&key, &image).await?);
                        timings.upload = started.elapsed();
                    }
                }
                Err(e) => {
                    coord.record_failure(e.to_string());
                    failure = Some(e.into());
                }
            }
        }

        let started = Instant::now();
        let handed = coord.hand_off(&mut self.backend, container).await;
        timings.hand_off = started.elapsed();
        let hand_off = match handed {
            Ok(outcome) => outcome,
            Err(e) if e.is_fatal_for_process() => return Err(e),
            Err(e) => {
                failure.get_or_insert(e);
                match coord.group().successor(coord.rank()) {
                    Some(to) => HandOff::Passed { to },
                    None => HandOff::Completed,
                }
            }
        };

        let rank = coord.rank();
        let started = Instant::now();
        coord.finish().await?;
        timings.finish = started.elapsed();

        if let Some(e) = failure {
            #[cfg(feature = "tracing")]
            tracing::error!(rank, shard, cycle, "Dump failed: {e}");
            return Err(e);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(rank, shard, key = %key, image_len, datasets, "Dump complete");

        Ok(CycleReport {
            rank,
            shard,
            cycle,
            time,
            key,
            image_len,
            datasets,
            upload,
            hand_off,
            timings,
        })
    }
}
