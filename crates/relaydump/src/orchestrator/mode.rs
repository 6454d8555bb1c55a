use crate::error::{ConfigError, Error, Result};
use core::fmt;

/// Shard count used when a fixed count is missing or malformed.
pub const DEFAULT_FILE_COUNT: usize = 4;

/// How many shared output files a cycle produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileMode {
    /// `MIF n`: exactly `n` shards.
    Fixed(usize),
    /// `MIFMAX`: one shard per worker.
    PerWorker,
    /// `MIFAUTO`: no sizing heuristic exists, always rejected.
    Auto,
    /// `SIF`: one file written collectively, always rejected.
    SharedSingle,
}

impl Default for FileMode {
    fn default() -> Self {
        Self::Fixed(DEFAULT_FILE_COUNT)
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(n) => write!(f, "MIF {n}"),
            Self::PerWorker => f.write_str("MIFMAX"),
            Self::Auto => f.write_str("MIFAUTO"),
            Self::SharedSingle => f.write_str("SIF"),
        }
    }
}

impl FileMode {
    /// Parses `MODE [COUNT]`. Malformed input never fails: each problem is
    /// reported as a [`ConfigError`] and replaced by the default.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> (Self, Vec<ConfigError>) {
        let mut warnings = Vec::new();
        let fallback = || Self::default().to_string();

        let Some(mode) = args.first().map(|s| s.as_ref().trim()) else {
            return (Self::default(), warnings);
        };
        let count = args.get(1).map(|s| s.as_ref().trim());

        let parsed = match mode.to_ascii_uppercase().as_str() {
            "MIFMAX" => Self::PerWorker,
            "MIFAUTO" => Self::Auto,
            "SIF" => Self::SharedSingle,
            "MIF" => match count.map(str::parse::<usize>) {
                Some(Ok(n)) => Self::Fixed(n),
                Some(Err(_)) => {
                    warnings.push(ConfigError::InvalidValue {
                        option: "parallel_file_mode",
                        value: count.unwrap_or_default().to_owned(),
                        fallback: fallback(),
                    });
                    Self::default()
                }
                None => {
                    warnings.push(ConfigError::MissingValue {
                        option: "parallel_file_mode",
                        fallback: fallback(),
                    });
                    Self::default()
                }
            },
            _ => {
                warnings.push(ConfigError::InvalidValue {
                    option: "parallel_file_mode",
                    value: mode.to_owned(),
                    fallback: fallback(),
                });
                Self::default()
            }
        };
        (parsed, warnings)
    }

    /// Number of shards for a group of `size` workers.
    ///
    /// A fixed count of zero becomes one and a count above `size` is clamped
    /// to `size`; either adjustment is returned as a warning.
    pub fn determine_shard_count(&self, size: usize) -> Result<(usize, Option<ConfigError>)> {
        match *self {
            Self::PerWorker => Ok((size, None)),
            Self::Fixed(0) => Ok((
                1,
                Some(ConfigError::OutOfRange {
                    option: "parallel_file_mode",
                    value: "0".into(),
                    fallback: "1".into(),
                }),
            )),
            Self::Fixed(n) if n > size => Ok((
                size,
                Some(ConfigError::OutOfRange {
                    option: "parallel_file_mode",
                    value: n.to_string(),
                    fallback: size.to_string(),
                }),
            )),
            Self::Fixed(n) => Ok((n, None)),
            Self::Auto | Self::SharedSingle => Err(Error::UnsupportedMode {
                mode: self.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_modes() {
        assert_eq!(FileMode::parse(&["MIF", "8"]), (FileMode::Fixed(8), vec![]));
        assert_eq!(FileMode::parse(&["mifmax"]), (FileMode::PerWorker, vec![]));
        assert_eq!(FileMode::parse(&["MIFAUTO"]), (FileMode::Auto, vec![]));
        assert_eq!(FileMode::parse(&["SIF"]), (FileMode::SharedSingle, vec![]));
        assert_eq!(FileMode::parse::<&str>(&[]), (FileMode::Fixed(4), vec![]));
    }

    #[test]
    fn malformed_mode_falls_back_with_warning() {
        let (mode, warnings) = FileMode::parse(&["MIF", "many"]);
        assert_eq!(mode, FileMode::Fixed(DEFAULT_FILE_COUNT));
        assert!(matches!(warnings[..], [ConfigError::InvalidValue { .. }]));

        let (mode, warnings) = FileMode::parse(&["MIF"]);
        assert_eq!(mode, FileMode::Fixed(DEFAULT_FILE_COUNT));
        assert!(matches!(warnings[..], [ConfigError::MissingValue { .. }]));

        let (_, warnings) = FileMode::parse(&["POSIX"]);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn shard_count_is_sanitised() {
        assert_eq!(FileMode::Fixed(2).determine_shard_count(4).unwrap(), (2, None));
        assert_eq!(FileMode::PerWorker.determine_shard_count(6).unwrap(), (6, None));

        let (count, warning) = FileMode::Fixed(0).determine_shard_count(4).unwrap();
        assert_eq!(count, 1);
        assert!(warning.is_some());

        let (count, warning) = FileMode::Fixed(9).determine_shard_count(4).unwrap();
        assert_eq!(count, 4);
        assert!(warning.is_some());
    }

    #[test]
    fn auto_and_shared_single_are_unsupported() {
        for mode in [FileMode::Auto, FileMode::SharedSingle] {
            let err = mode.determine_shard_count(4).unwrap_err();
            assert!(matches!(err, Error::UnsupportedMode { .. }));
            assert!(err.is_fatal_for_process());
        }
    }
}
