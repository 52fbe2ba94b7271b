use thiserror::Error;

/// Fatal conditions of a pipeline run. Any of these aborts the run before
/// output is persisted.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corpus contains no usable lines")]
    EmptyCorpus,

    #[error("vocabulary is empty, every line normalized to text without terms")]
    DegenerateVocabulary,

    #[error("no template occurs more than {threshold} times and no minimum cluster count is configured")]
    NoFrequentTemplates { threshold: usize },

    #[error("cluster count must be positive, got {0}")]
    InvalidClusterCount(usize),

    #[error("cannot form {clusters} clusters from {points} points")]
    TooFewPoints { points: usize, clusters: usize },

    #[error("invalid density parameters: {0}")]
    InvalidDensity(String),

    #[error("feature vectors have mismatched dimensions ({expected} vs {found})")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("failed to parse config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ClusterError>;

/// A single line that could not be processed. Recorded and logged, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    #[error("line {index} is not valid UTF-8")]
    InvalidEncoding { index: usize },
}
