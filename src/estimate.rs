use log::{info, warn};

use crate::error::{ClusterError, Result};
use crate::template::TemplateFrequency;

/// Threshold used when none is configured: one percent of the corpus.
pub fn default_threshold(corpus_size: usize) -> usize {
    corpus_size / 100
}

/// Estimates the number of natural event types as the number of distinct
/// templates occurring strictly more than `threshold` times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterCountEstimator {
    pub threshold: Option<usize>,
    /// Used instead of failing when no template clears the threshold.
    pub min_clusters: Option<usize>,
}

impl ClusterCountEstimator {
    pub fn new(threshold: Option<usize>, min_clusters: Option<usize>) -> Self {
        Self {
            threshold,
            min_clusters,
        }
    }

    /// Returns n >= 1, or an error if the estimate degenerates to zero and
    /// no usable fallback is configured.
    pub fn estimate(&self, freq: &TemplateFrequency, corpus_size: usize) -> Result<usize> {
        let threshold = self
            .threshold
            .unwrap_or_else(|| default_threshold(corpus_size));
        let n = freq.iter().filter(|e| e.count > threshold).count();
        info!(
            "{} of {} templates occur more than {} times",
            n,
            freq.len(),
            threshold
        );
        if n > 0 {
            return Ok(n);
        }
        match self.min_clusters {
            Some(min) if min >= 1 => {
                warn!(
                    "no template exceeds threshold {}, falling back to {} clusters",
                    threshold, min
                );
                Ok(min)
            }
            Some(min) => Err(ClusterError::InvalidClusterCount(min)),
            None => Err(ClusterError::NoFrequentTemplates { threshold }),
        }
    }
}
