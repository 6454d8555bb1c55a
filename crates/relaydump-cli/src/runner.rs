//! Drives an in-process worker group through every checkpoint cycle.
//!
//! One task per rank. Recoverable failures (a poisoned chain) are counted
//! and the cycle continues; the first process-fatal error cancels every
//! other rank, since peers may be blocked waiting on the failed one.

use crate::{config::DumpConfig, store::AnyStore, telemetry};
use relaydump::{
    CycleReport, DataTree, DumpOrchestrator, DumpSettings, LocalEndpoint, LocalGroup,
    StreamUploader, ZipBackend,
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

type Orchestrator = DumpOrchestrator<LocalEndpoint, ZipBackend, Arc<AnyStore>>;

/// What one rank did over the whole run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub rank: usize,
    pub completed: u32,
    pub failed: u32,
    pub uploaded_bytes: usize,
    pub cancelled: bool,
}

/// What the whole group did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub workers: Vec<WorkerSummary>,
}

impl RunSummary {
    pub fn completed(&self) -> u32 {
        self.workers.iter().map(|w| w.completed).sum()
    }

    pub fn failed(&self) -> u32 {
        self.workers.iter().map(|w| w.failed).sum()
    }

    pub fn uploaded_bytes(&self) -> usize {
        self.workers.iter().map(|w| w.uploaded_bytes).sum()
    }
}

pub async fn run(config: DumpConfig, store: Arc<AnyStore>) -> anyhow::Result<RunSummary> {
    let settings = Arc::new(config.settings.clone());
    let cancel = CancellationToken::new();

    #[cfg(feature = "tracing")]
    tracing::info!(
        workers = config.num_workers,
        mode = %settings.mode,
        store = store.name(),
        "Starting {} checkpoint cycles",
        config.num_dumps
    );

    let mut workers = JoinSet::new();
    for (rank, endpoint) in LocalGroup::new(config.num_workers).into_iter().enumerate() {
        let uploader =
            StreamUploader::new(Arc::clone(&store)).with_max_attempts(config.upload_attempts);
        let orchestrator =
            DumpOrchestrator::new(endpoint, ZipBackend::new(), uploader, Arc::clone(&settings));
        let tree = DataTree::synthetic(rank, config.parts_per_worker, &config.part_dims, config.seed);
        workers.spawn(worker(
            orchestrator,
            tree,
            config.num_dumps,
            cancel.clone(),
        ));
    }

    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                #[cfg(feature = "tracing")]
                tracing::info!("Received Ctrl+C signal, cancelling workers");
                cancel.cancel();
            }
        }
    });

    let mut summary = RunSummary::default();
    let mut fatal = None;
    while let Some(joined) = workers.join_next().await {
        match joined? {
            Ok(worker) => summary.workers.push(worker),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Aborting all workers: {e}");
                cancel.cancel();
                fatal.get_or_insert(e);
            }
        }
    }
    interrupt.abort();

    if let Some(e) = fatal {
        return Err(e.into());
    }
    summary.workers.sort_by_key(|w| w.rank);
    Ok(summary)
}

async fn worker(
    mut orchestrator: Orchestrator,
    tree: DataTree,
    num_dumps: u32,
    cancel: CancellationToken,
) -> Result<WorkerSummary, relaydump::Error> {
    let mut summary = WorkerSummary {
        rank: orchestrator.rank(),
        ..WorkerSummary::default()
    };

    for cycle in 1..=num_dumps {
        let time = f64::from(cycle);
        let dumped = tokio::select! {
            () = cancel.cancelled() => {
                summary.cancelled = true;
                return Ok(summary);
            }
            dumped = orchestrator.dump(&tree, cycle, time) => dumped,
        };

        match dumped {
            Ok(report) => {
                record(&report);
                summary.completed += 1;
                summary.uploaded_bytes += report.upload.as_ref().map_or(0, |u| u.bytes);
            }
            Err(e) if e.is_fatal_for_process() => return Err(e),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(rank = summary.rank, cycle, "Cycle lost: {_e}");
                telemetry::increment_cycle_failures();
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

fn record(report: &CycleReport) {
    for (phase, duration) in report.timings.phases() {
        telemetry::record_phase_duration(phase, duration.as_secs_f64() * 1e3);
    }
    if let Some(upload) = &report.upload {
        telemetry::increment_uploaded_bytes(upload.bytes as u64);
    }
    telemetry::increment_cycles();

    #[cfg(feature = "tracing")]
    tracing::debug!(
        rank = report.rank,
        shard = report.shard,
        cycle = report.cycle,
        key = %report.key,
        bytes = report.image_len,
        elapsed_ms = report.timings.total().as_secs_f64() * 1e3,
        "Cycle complete"
    );
}

/// Settings shared by every rank, for startup logs.
pub fn describe(settings: &DumpSettings) -> String {
    format!(
        "mode={} plugin={} key={} compression={} policy={:?}",
        settings.mode,
        settings.plugin.name,
        settings.object_key(0, 1),
        settings.compression.algorithm_name().unwrap_or("none"),
        settings.policy
    )
}
