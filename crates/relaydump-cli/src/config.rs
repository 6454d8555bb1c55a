use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use core::num::{NonZeroU32, NonZeroUsize};
use relaydump::{
    CompressionRequest, DumpSettings, FileMode, IoFlags, PluginRegistry, UploadPolicy,
};
use std::path::PathBuf;

/// Where uploaded file images end up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// Kept in process memory and dropped on exit.
    Memory,
    /// One file per object key under `--store-dir`.
    Dir,
    /// An S3-compatible bucket configured through `S3_*` variables.
    S3,
}

/// Runtime configuration for the `relaydump` binary.
///
/// Runs `num_workers` in-process workers through `num_dumps` checkpoint
/// cycles. Every worker owns synthetic mesh data and writes it into one of
/// the cycle's shared output files, taking turns with the other members of
/// its shard's chain.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "relaydump",
    version,
    about = "Writes checkpoint cycles of a worker group into shared files on an object store"
)]
pub struct CliArgs {
    /// Number of workers in the group.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 4)]
    pub num_workers: usize,

    /// Output file mode followed by an optional count: `MIF n`, `MIFMAX`,
    /// `MIFAUTO` or `SIF`.
    ///
    /// A malformed mode or count falls back to `MIF 4` with a warning.
    ///
    /// Environment variable: `PARALLEL_FILE_MODE`
    #[arg(
        long,
        env = "PARALLEL_FILE_MODE",
        num_args = 1..=2,
        value_delimiter = ' ',
        default_values = ["MIF", "4"]
    )]
    pub parallel_file_mode: Vec<String>,

    /// Compression algorithm followed by an optional `key=value,...` list,
    /// e.g. `gzip level=6,shuffle=1`.
    ///
    /// Environment variable: `COMPRESSION`
    #[arg(long, env = "COMPRESSION", num_args = 1..=2, value_delimiter = ' ')]
    pub compression: Vec<String>,

    /// Output plugin producing the file images.
    ///
    /// Environment variable: `INTERFACE`
    #[arg(long, env = "INTERFACE", default_value_t = String::from("zips3"))]
    pub interface: String,

    /// Leading component of every object key.
    ///
    /// Environment variable: `FILEBASE`
    #[arg(long, env = "FILEBASE", default_value_t = String::from("relaydump"))]
    pub filebase: String,

    /// Object key extension. Defaults to the plugin's extension.
    ///
    /// Environment variable: `FILEEXT`
    #[arg(long, env = "FILEEXT")]
    pub fileext: Option<String>,

    /// Number of checkpoint cycles to write.
    ///
    /// Environment variable: `NUM_DUMPS`
    #[arg(long, env = "NUM_DUMPS", default_value_t = 10)]
    pub num_dumps: u32,

    /// Mesh parts owned by each worker.
    ///
    /// Environment variable: `PARTS_PER_WORKER`
    #[arg(long, env = "PARTS_PER_WORKER", default_value_t = 1)]
    pub parts_per_worker: usize,

    /// Shape of every variable, comma separated.
    ///
    /// Environment variable: `PART_DIMS`
    #[arg(long, env = "PART_DIMS", value_delimiter = ',', default_values_t = [100, 100])]
    pub part_dims: Vec<u64>,

    /// Seed of the synthetic data.
    ///
    /// Environment variable: `SEED`
    #[arg(long, env = "SEED", default_value_t = 0)]
    pub seed: u64,

    /// Object store receiving the file images.
    ///
    /// Environment variable: `STORE`
    #[arg(long, env = "STORE", value_enum, default_value_t = StoreKind::Memory)]
    pub store: StoreKind,

    /// Root directory of the `dir` store.
    ///
    /// Environment variable: `STORE_DIR`
    #[arg(long, env = "STORE_DIR", default_value = "relaydump-out")]
    pub store_dir: PathBuf,

    /// Largest number of bytes a store pulls from an image per request.
    ///
    /// Environment variable: `PULL_SIZE`
    #[arg(long, env = "PULL_SIZE", default_value_t = 65536)]
    pub pull_size: usize,

    /// PUT attempts per image. `1` fails on the first store error.
    ///
    /// Environment variable: `UPLOAD_ATTEMPTS`
    #[arg(long, env = "UPLOAD_ATTEMPTS", default_value_t = 1)]
    pub upload_attempts: u32,

    /// Which holders upload a shard: `every-holder` or `chain-tail`.
    ///
    /// Environment variable: `UPLOAD_POLICY`
    #[arg(long, env = "UPLOAD_POLICY", default_value = "every-holder")]
    pub upload_policy: UploadPolicy,
}

#[derive(Clone, Debug)]
pub enum StoreConfig {
    Memory,
    Dir(PathBuf),
    #[cfg(feature = "s3")]
    S3(relaydump::S3Settings),
}

#[derive(Clone, Debug)]
pub struct DumpConfig {
    pub num_workers: usize,
    pub num_dumps: u32,
    pub parts_per_worker: usize,
    pub part_dims: Vec<u64>,
    pub seed: u64,
    pub store: StoreConfig,
    pub pull_size: NonZeroUsize,
    pub upload_attempts: NonZeroU32,
    pub settings: DumpSettings,
}

impl TryFrom<CliArgs> for DumpConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }
        let Some(pull_size) = NonZeroUsize::new(args.pull_size) else {
            bail!("PULL_SIZE must be greater than 0");
        };
        let Some(upload_attempts) = NonZeroU32::new(args.upload_attempts) else {
            bail!("UPLOAD_ATTEMPTS must be greater than 0");
        };
        if args.part_dims.is_empty() || args.part_dims.contains(&0) {
            bail!("PART_DIMS must be non-empty and free of zeros");
        }

        let registry = PluginRegistry::with_builtin()?;
        let plugin = registry
            .get(&args.interface)
            .with_context(|| format!("INTERFACE `{}`", args.interface))?
            .clone();

        let (mode, _warnings) = FileMode::parse(&args.parallel_file_mode);
        #[cfg(feature = "tracing")]
        for warning in &_warnings {
            tracing::warn!("{warning}");
        }

        let compression = CompressionRequest::parse(
            args.compression.first().map(String::as_str),
            args.compression.get(1).map(String::as_str),
        );
        #[cfg(feature = "tracing")]
        for dropped in compression.dropped() {
            tracing::warn!("Ignoring {dropped}");
        }

        let store = match args.store {
            StoreKind::Memory => StoreConfig::Memory,
            StoreKind::Dir => StoreConfig::Dir(args.store_dir),
            #[cfg(feature = "s3")]
            StoreKind::S3 => StoreConfig::S3(relaydump::S3Settings::from_env()),
            #[cfg(not(feature = "s3"))]
            StoreKind::S3 => bail!("STORE=s3 requires building with the `s3` feature"),
        };

        let mut settings = DumpSettings::new(plugin);
        settings.mode = mode;
        settings.filebase = args.filebase;
        settings.ext = args.fileext;
        settings.compression = compression;
        settings.policy = args.upload_policy;
        settings.flags = IoFlags::default();

        Ok(Self {
            num_workers: args.num_workers,
            num_dumps: args.num_dumps,
            parts_per_worker: args.parts_per_worker,
            part_dims: args.part_dims,
            seed: args.seed,
            store,
            pull_size,
            upload_attempts,
            settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<DumpConfig> {
        let args = CliArgs::try_parse_from(["relaydump"].iter().chain(args))?;
        DumpConfig::try_from(args)
    }

    #[test]
    fn defaults_resolve() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.settings.mode, FileMode::Fixed(4));
        assert_eq!(config.settings.plugin.name, "zips3");
        assert_eq!(config.settings.object_key(1, 2), "relaydump_zips3_00001_002.zip");
        assert_eq!(config.part_dims, vec![100, 100]);
        assert!(config.settings.compression.algorithm().is_none());
        assert!(matches!(config.store, StoreConfig::Memory));
    }

    #[test]
    fn mode_and_compression_take_two_words() {
        let config = parse(&[
            "--parallel-file-mode",
            "MIF",
            "2",
            "--compression",
            "gzip",
            "level=3,bogus=1",
            "--upload-policy",
            "chain-tail",
        ])
        .unwrap();
        assert_eq!(config.settings.mode, FileMode::Fixed(2));
        assert_eq!(config.settings.compression.algorithm_name(), Some("gzip"));
        assert_eq!(config.settings.compression.params().level, Some(3));
        assert_eq!(config.settings.compression.dropped().len(), 1);
        assert_eq!(config.settings.policy, UploadPolicy::ChainTail);

        let config = parse(&["--parallel-file-mode", "MIFMAX"]).unwrap();
        assert_eq!(config.settings.mode, FileMode::PerWorker);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(parse(&["--num-workers", "0"]).is_err());
        assert!(parse(&["--pull-size", "0"]).is_err());
        assert!(parse(&["--upload-attempts", "0"]).is_err());
        assert!(parse(&["--part-dims", "4,0"]).is_err());
        assert!(parse(&["--interface", "hdf5"]).is_err());
    }
}
