use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ClusterError, Result};
use crate::normalize::Policy;
use crate::output::NoisePolicy;

/// Where the number of clusters comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ClusterCountSource {
    Fixed {
        #[serde(default = "default_cluster_count")]
        count: usize,
    },
    /// Count the templates above a frequency threshold.
    Estimated {
        /// Defaults to one percent of the usable lines.
        #[serde(default)]
        threshold: Option<usize>,
        #[serde(default)]
        min_clusters: Option<usize>,
    },
}

impl Default for ClusterCountSource {
    fn default() -> Self {
        Self::Fixed {
            count: default_cluster_count(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Algorithm {
    #[serde(rename = "kmeans")]
    KMeans {
        #[serde(default = "default_n_init")]
        n_init: usize,
        #[serde(default = "default_max_iter")]
        max_iter: usize,
    },
    Dbscan {
        #[serde(default = "default_eps")]
        eps: f64,
        #[serde(default = "default_min_samples")]
        min_samples: usize,
    },
}

impl Default for Algorithm {
    fn default() -> Self {
        Self::KMeans {
            n_init: default_n_init(),
            max_iter: default_max_iter(),
        }
    }
}

/// Which text is written next to each cluster id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputText {
    #[default]
    Normalized,
    Original,
}

/// Top-level run configuration (`logclust.toml`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default = "default_input")]
    pub input: PathBuf,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    /// SQLite database for dictionaries and results. Nothing is persisted
    /// when absent.
    #[serde(default)]
    pub store: Option<PathBuf>,
    #[serde(default)]
    pub policy: Policy,
    /// Vocabulary cap for TF-IDF (default: 1000).
    #[serde(default = "default_max_features")]
    pub max_features: usize,
    /// SVD components (default: 100). 0 clusters the TF-IDF rows directly.
    #[serde(default = "default_components")]
    pub components: usize,
    #[serde(default)]
    pub clusters: ClusterCountSource,
    #[serde(default)]
    pub algorithm: Algorithm,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub output_text: OutputText,
    /// Applies to both the output file and the stored results.
    #[serde(default)]
    pub noise: NoisePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: default_input(),
            output: default_output(),
            store: None,
            policy: Policy::default(),
            max_features: default_max_features(),
            components: default_components(),
            clusters: ClusterCountSource::default(),
            algorithm: Algorithm::default(),
            seed: default_seed(),
            output_text: OutputText::default(),
            noise: NoisePolicy::default(),
        }
    }
}

fn default_input() -> PathBuf {
    PathBuf::from("HDFS.log")
}
fn default_output() -> PathBuf {
    PathBuf::from("clustered_logs.txt")
}
fn default_max_features() -> usize {
    1000
}
fn default_components() -> usize {
    100
}
fn default_cluster_count() -> usize {
    7
}
fn default_n_init() -> usize {
    10
}
fn default_max_iter() -> usize {
    300
}
fn default_eps() -> f64 {
    0.5
}
fn default_min_samples() -> usize {
    3
}
fn default_seed() -> u64 {
    42
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<PipelineConfig> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<PipelineConfig> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_features == 0 {
            return Err(ClusterError::Validation(
                "max_features must be at least 1".into(),
            ));
        }
        match self.clusters {
            ClusterCountSource::Fixed { count: 0 } => {
                return Err(ClusterError::InvalidClusterCount(0));
            }
            ClusterCountSource::Estimated {
                min_clusters: Some(0),
                ..
            } => {
                return Err(ClusterError::Validation(
                    "min_clusters must be at least 1".into(),
                ));
            }
            _ => {}
        }
        match self.algorithm {
            Algorithm::KMeans { n_init, max_iter } => {
                if n_init == 0 || max_iter == 0 {
                    return Err(ClusterError::Validation(
                        "kmeans n_init and max_iter must be at least 1".into(),
                    ));
                }
            }
            Algorithm::Dbscan { eps, min_samples } => {
                if !(eps.is_finite() && eps > 0.0) {
                    return Err(ClusterError::InvalidDensity(format!(
                        "eps must be positive, got {eps}"
                    )));
                }
                if min_samples == 0 {
                    return Err(ClusterError::InvalidDensity(
                        "min_samples must be at least 1".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// `None` when dimensionality reduction is disabled.
    pub fn reduction(&self) -> Option<usize> {
        (self.components > 0).then_some(self.components)
    }
}
