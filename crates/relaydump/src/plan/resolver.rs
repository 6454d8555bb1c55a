use super::{
    Algorithm, CompressionPlan, CompressionRequest, DEFAULT_GZIP_LEVEL, DEFAULT_SZIP_BLOCK,
    FilterCapabilities, FilterKind, FilterStep, PlanWarning,
};

/// Resolves a plan straight from the textual request.
///
/// Convenience over [`CompressionRequest::parse`] followed by
/// [`CompressionRequest::resolve`] when a request is used only once.
pub fn resolve(
    algorithm: Option<&str>,
    params: Option<&str>,
    element_count: u64,
    shape: &[u64],
    caps: &impl FilterCapabilities,
) -> CompressionPlan {
    CompressionRequest::parse(algorithm, params).resolve(element_count, shape, caps)
}

impl CompressionRequest {
    /// Resolves the plan for one dataset.
    ///
    /// Never fails: an unknown or unavailable algorithm degrades to a
    /// contiguous plan carrying a [`PlanWarning`].
    pub fn resolve(
        &self,
        element_count: u64,
        shape: &[u64],
        caps: &impl FilterCapabilities,
    ) -> CompressionPlan {
        let Some(name) = self.algorithm_name() else {
            return CompressionPlan::contiguous();
        };

        let params = self.params();
        if i128::from(element_count) < i128::from(params.minsize()) {
            return CompressionPlan::below_minsize();
        }

        let Some(algorithm) = Algorithm::from_name(name) else {
            return self.degrade(PlanWarning::UnknownAlgorithm(name.to_owned()));
        };
        if !caps.supports(algorithm.filter()) {
            return self.degrade(PlanWarning::Unavailable(algorithm));
        }

        let mut chunk: Vec<u64> = shape.iter().map(|&d| d.max(1)).collect();
        let mut filters = Vec::with_capacity(2);

        let shuffle = params
            .shuffle
            .unwrap_or_else(|| algorithm.shuffles_by_default());
        if shuffle && caps.supports(FilterKind::Shuffle) {
            filters.push(FilterStep::Shuffle);
        }

        filters.push(match algorithm {
            Algorithm::Gzip => FilterStep::Deflate {
                level: params.level.unwrap_or(DEFAULT_GZIP_LEVEL),
            },
            Algorithm::Zfp => FilterStep::Zfp {
                mode: params.zfp.unwrap_or_default(),
            },
            Algorithm::Szip => {
                let ndims = chunk.len();
                if let Some(dims) = params.szip_chunk.as_deref().filter(|d| d.len() == ndims) {
                    chunk
                        .iter_mut()
                        .zip(dims)
                        .for_each(|(c, &d)| *c = d.clamp(1, *c));
                }
                FilterStep::Szip {
                    method: params.szip_method.unwrap_or_default(),
                    pixels_per_block: params.szip_block.unwrap_or(DEFAULT_SZIP_BLOCK),
                }
            }
        });

        CompressionPlan::chunked(chunk, filters)
    }

    fn degrade(&self, warning: PlanWarning) -> CompressionPlan {
        if self.first_warning() {
            #[cfg(feature = "tracing")]
            tracing::warn!("{warning}; writing uncompressed");
        }
        CompressionPlan::degraded(warning)
    }
}
