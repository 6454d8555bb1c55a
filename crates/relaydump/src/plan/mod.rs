//! Per-dataset storage layout and filter pipeline resolution.
//!
//! A textual compression request (`algorithm`, `"key=value,..."`) is parsed
//! once into a [`CompressionRequest`]. Each dataset then resolves its own
//! [`CompressionPlan`] from that request, its element count and its shape,
//! taking into account which filters the container backend can apply.

mod params;
mod resolver;

pub use params::*;
pub use resolver::*;

use serde::{Deserialize, Serialize};

/// Compression algorithms that can be requested by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Gzip,
    Zfp,
    Szip,
}

impl Algorithm {
    /// Matches `name` case-insensitively on the algorithm prefix, so `GZIP`
    /// and `gzip-9` both select [`Algorithm::Gzip`].
    pub fn from_name(name: &str) -> Option<Self> {
        let matches = |prefix: &str| {
            name.get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        };

        if matches("gzip") {
            Some(Self::Gzip)
        } else if matches("zfp") {
            Some(Self::Zfp)
        } else if matches("szip") {
            Some(Self::Szip)
        } else {
            None
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Zfp => "zfp",
            Self::Szip => "szip",
        }
    }

    /// The filter that implements this algorithm.
    pub const fn filter(self) -> FilterKind {
        match self {
            Self::Gzip => FilterKind::Deflate,
            Self::Zfp => FilterKind::Zfp,
            Self::Szip => FilterKind::Szip,
        }
    }

    /// Whether the byte-shuffle filter is prepended when `shuffle` is unset.
    pub const fn shuffles_by_default(self) -> bool {
        !matches!(self, Self::Zfp)
    }
}

/// Filters a backend may or may not be able to apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Shuffle,
    Deflate,
    Zfp,
    Szip,
}

/// Capability report consulted while resolving plans.
pub trait FilterCapabilities {
    fn supports(&self, filter: FilterKind) -> bool;
}

/// ZFP operating modes. Only one applies; the last one parsed wins.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZfpMode {
    /// Target bits per compressed value. `0.0` selects library defaults.
    Rate(f64),
    /// Bits of precision kept per value.
    Precision(i32),
    /// Absolute error tolerance per value.
    Accuracy(f64),
}

impl Default for ZfpMode {
    fn default() -> Self {
        Self::Rate(0.0)
    }
}

/// SZIP coding method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SzipMethod {
    /// Entropy coding (`ec`).
    EntropyCoding,
    /// Nearest neighbor (`nn`).
    #[default]
    NearestNeighbor,
}

/// One step of a filter pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", rename_all = "lowercase")]
pub enum FilterStep {
    Shuffle,
    Deflate { level: i32 },
    Zfp { mode: ZfpMode },
    Szip { method: SzipMethod, pixels_per_block: u32 },
}

impl FilterStep {
    pub const fn kind(&self) -> FilterKind {
        match self {
            Self::Shuffle => FilterKind::Shuffle,
            Self::Deflate { .. } => FilterKind::Deflate,
            Self::Zfp { .. } => FilterKind::Zfp,
            Self::Szip { .. } => FilterKind::Szip,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Shuffle => "shuffle",
            Self::Deflate { .. } => "deflate",
            Self::Zfp { .. } => "zfp",
            Self::Szip { .. } => "szip",
        }
    }
}

/// Storage layout of a dataset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "lowercase")]
pub enum Layout {
    #[default]
    Contiguous,
    Chunked { chunk: Vec<u64> },
}

/// Non-fatal condition noticed while resolving a plan.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PlanWarning {
    /// The backend cannot apply the requested algorithm in this build.
    Unavailable(Algorithm),
    /// The algorithm name matched nothing known.
    UnknownAlgorithm(String),
}

impl core::fmt::Display for PlanWarning {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unavailable(alg) => {
                write!(f, "{} compressor not available in this build", alg.name())
            }
            Self::UnknownAlgorithm(name) => write!(f, "unknown compression algorithm `{name}`"),
        }
    }
}

/// Resolved layout and filter pipeline for one dataset.
///
/// The layout is chunked if and only if the pipeline is non-empty; the
/// constructors are the only way to build a plan.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompressionPlan {
    layout: Layout,
    filters: Vec<FilterStep>,
    skipped_below_minsize: bool,
    warning: Option<PlanWarning>,
}

impl CompressionPlan {
    /// Contiguous layout, no filters.
    pub fn contiguous() -> Self {
        Self::default()
    }

    /// Contiguous because the dataset is smaller than `minsize`.
    pub fn below_minsize() -> Self {
        Self {
            skipped_below_minsize: true,
            ..Self::default()
        }
    }

    /// Contiguous because the requested algorithm cannot be honored.
    pub fn degraded(warning: PlanWarning) -> Self {
        Self {
            warning: Some(warning),
            ..Self::default()
        }
    }

    /// Chunked layout with a non-empty pipeline. An empty pipeline yields a
    /// contiguous plan.
    pub fn chunked(chunk: Vec<u64>, filters: Vec<FilterStep>) -> Self {
        if filters.is_empty() {
            return Self::contiguous();
        }
        Self {
            layout: Layout::Chunked { chunk },
            filters,
            ..Self::default()
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn chunk_shape(&self) -> Option<&[u64]> {
        match &self.layout {
            Layout::Contiguous => None,
            Layout::Chunked { chunk } => Some(chunk),
        }
    }

    pub fn filters(&self) -> &[FilterStep] {
        &self.filters
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.layout, Layout::Chunked { .. })
    }

    pub fn skipped_below_minsize(&self) -> bool {
        self.skipped_below_minsize
    }

    pub fn warning(&self) -> Option<&PlanWarning> {
        self.warning.as_ref()
    }

    pub fn has_filter(&self, kind: FilterKind) -> bool {
        self.filters.iter().any(|f| f.kind() == kind)
    }
}
