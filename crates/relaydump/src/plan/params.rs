use super::{Algorithm, SzipMethod, ZfpMode};
use crate::error::CompressionParamError;
use core::sync::atomic::{AtomicBool, Ordering};

/// Threshold below which compression is not attempted.
pub const DEFAULT_MINSIZE: i64 = 1024;
/// Deflate level used by `gzip` when `level` is not given.
pub const DEFAULT_GZIP_LEVEL: i32 = 9;
/// SZIP pixels per block when `block` is not given.
pub const DEFAULT_SZIP_BLOCK: u32 = 32;

/// Values parsed out of a `key=value,...` parameter string.
///
/// Every key is recognized regardless of the algorithm; there are no key
/// collisions between algorithms. A key left `None` falls back to the
/// algorithm default at resolution time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParamSet {
    pub minsize: Option<i64>,
    pub shuffle: Option<bool>,
    pub level: Option<i32>,
    pub zfp: Option<ZfpMode>,
    pub szip_method: Option<SzipMethod>,
    pub szip_block: Option<u32>,
    pub szip_chunk: Option<Vec<u64>>,
}

#[derive(Clone, Copy)]
enum Key {
    Minsize,
    Shuffle,
    Level,
    Rate,
    Precision,
    Accuracy,
    Method,
    Block,
    Chunk,
}

enum Fault {
    Malformed,
    OutOfRange,
}

// No key is a prefix of another, so match order is irrelevant.
const KEYS: &[(&str, Key)] = &[
    ("minsize=", Key::Minsize),
    ("shuffle=", Key::Shuffle),
    ("level=", Key::Level),
    ("rate=", Key::Rate),
    ("precision=", Key::Precision),
    ("accuracy=", Key::Accuracy),
    ("method=", Key::Method),
    ("block=", Key::Block),
    ("chunk=", Key::Chunk),
];

impl Key {
    fn apply(self, p: &mut ParamSet, v: &str) -> Result<(), Fault> {
        match self {
            Self::Minsize => p.minsize = Some(scan_int(v)?),
            // Zero or non-zero, so `shuffle=2` also enables it.
            Self::Shuffle => p.shuffle = Some(scan_int(v)? != 0),
            Self::Level => p.level = Some(narrow(scan_int(v)?)?),
            Self::Rate => p.zfp = Some(ZfpMode::Rate(scan_float(v)?)),
            Self::Precision => p.zfp = Some(ZfpMode::Precision(narrow(scan_int(v)?)?)),
            Self::Accuracy => p.zfp = Some(ZfpMode::Accuracy(scan_float(v)?)),
            Self::Method => {
                p.szip_method = Some(match scan_word(v)?.to_ascii_lowercase().as_str() {
                    "ec" => SzipMethod::EntropyCoding,
                    "nn" => SzipMethod::NearestNeighbor,
                    _ => return Err(Fault::OutOfRange),
                });
            }
            Self::Block => {
                let block = scan_uint(v)?;
                if block > 32 {
                    return Err(Fault::OutOfRange);
                }
                p.szip_block = Some(block);
            }
            Self::Chunk => {
                let dims = scan_word(v)?
                    .split(':')
                    .map(|d| match d.parse::<u64>() {
                        Ok(0) | Err(_) => Err(Fault::Malformed),
                        Ok(n) => Ok(n),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                p.szip_chunk = Some(dims);
            }
        }
        Ok(())
    }
}

impl ParamSet {
    /// Parses a comma-separated parameter string.
    ///
    /// Each token is first scanned into a scratch copy; only a successful
    /// scan is committed. Tokens that match no key or fail to scan are
    /// returned as dropped and otherwise ignored.
    pub fn parse(params: &str) -> (Self, Vec<CompressionParamError>) {
        let mut set = Self::default();
        let mut dropped = Vec::new();

        for token in params.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let Some(&(prefix, key)) = KEYS.iter().find(|(prefix, _)| {
                token
                    .get(..prefix.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
            }) else {
                dropped.push(CompressionParamError::UnknownKey {
                    token: token.to_owned(),
                });
                continue;
            };

            let mut scratch = set.clone();
            match key.apply(&mut scratch, &token[prefix.len()..]) {
                Ok(()) => set = scratch,
                Err(Fault::Malformed) => dropped.push(CompressionParamError::Malformed {
                    token: token.to_owned(),
                }),
                Err(Fault::OutOfRange) => dropped.push(CompressionParamError::OutOfRange {
                    token: token.to_owned(),
                }),
            }
        }

        (set, dropped)
    }

    pub fn minsize(&self) -> i64 {
        self.minsize.unwrap_or(DEFAULT_MINSIZE)
    }
}

/// A parsed per-dataset compression request.
///
/// Parsing happens once per run; [`CompressionRequest::resolve`] is then
/// called per dataset.
#[derive(Debug, Default)]
pub struct CompressionRequest {
    algorithm: Option<String>,
    params: ParamSet,
    dropped: Vec<CompressionParamError>,
    warned: AtomicBool,
}

impl Clone for CompressionRequest {
    fn clone(&self) -> Self {
        Self {
            algorithm: self.algorithm.clone(),
            params: self.params.clone(),
            dropped: self.dropped.clone(),
            warned: AtomicBool::new(self.warned.load(Ordering::Relaxed)),
        }
    }
}

impl CompressionRequest {
    /// No compression: every dataset resolves to a contiguous plan.
    pub fn none() -> Self {
        Self::default()
    }

    /// Parses an algorithm name and its parameter string.
    pub fn parse(algorithm: Option<&str>, params: Option<&str>) -> Self {
        let algorithm = algorithm
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_owned);
        let (params, dropped) = ParamSet::parse(params.unwrap_or_default());

        #[cfg(feature = "tracing")]
        for token in &dropped {
            tracing::debug!("Dropping compression parameter: {token}");
        }

        Self {
            algorithm,
            params,
            dropped,
            warned: AtomicBool::new(false),
        }
    }

    pub fn algorithm_name(&self) -> Option<&str> {
        self.algorithm.as_deref()
    }

    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm.as_deref().and_then(Algorithm::from_name)
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    /// Tokens that were ignored while parsing.
    pub fn dropped(&self) -> &[CompressionParamError] {
        &self.dropped
    }

    /// Returns `true` the first time it is called; used to warn only once per
    /// request about an algorithm that cannot be honored.
    pub(crate) fn first_warning(&self) -> bool {
        !self.warned.swap(true, Ordering::Relaxed)
    }
}

fn narrow(value: i64) -> Result<i32, Fault> {
    i32::try_from(value).map_err(|_| Fault::OutOfRange)
}

fn skip_ws(s: &str) -> &str {
    s.trim_start()
}

/// Reads a leading signed decimal integer; trailing text is ignored.
fn scan_int(s: &str) -> Result<i64, Fault> {
    let s = skip_ws(s);
    let bytes = s.as_bytes();
    let sign = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let digits = bytes[sign..].iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return Err(Fault::Malformed);
    }
    s[..sign + digits].parse().map_err(|_| Fault::OutOfRange)
}

/// Reads a leading unsigned decimal integer.
fn scan_uint(s: &str) -> Result<u32, Fault> {
    let s = skip_ws(s);
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Err(Fault::Malformed);
    }
    s[..digits].parse().map_err(|_| Fault::OutOfRange)
}

/// Reads the longest leading text that parses as a float.
fn scan_float(s: &str) -> Result<f64, Fault> {
    let s = skip_ws(s);
    let span = s
        .bytes()
        .take_while(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
        .count();
    (1..=span)
        .rev()
        .find_map(|end| s[..end].parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .ok_or(Fault::Malformed)
}

/// Reads a whitespace-delimited word.
fn scan_word(s: &str) -> Result<&str, Fault> {
    skip_ws(s)
        .split_whitespace()
        .next()
        .ok_or(Fault::Malformed)
}
