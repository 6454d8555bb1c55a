use core::fmt;

/// Object key of one shard's image: `{filebase}_{tag}_{shard:05}_{cycle:03}.{ext}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey<'a> {
    pub filebase: &'a str,
    pub tag: &'a str,
    pub shard: usize,
    pub cycle: u32,
    pub ext: &'a str,
}

impl fmt::Display for ObjectKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{:05}_{:03}.{}",
            self.filebase, self.tag, self.shard, self.cycle, self.ext
        )
    }
}
