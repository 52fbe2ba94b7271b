//! Groups the lines of a static log corpus into event clusters.
//!
//! A run normalizes volatile fields (timestamps, block ids, addresses, paths,
//! numbers), tallies numeric-free templates, optionally estimates the number
//! of event types from them, vectorizes the normalized text with TF-IDF and a
//! truncated SVD, and partitions the vectors with k-means or DBSCAN. Under the
//! interning policy every replaced value is kept in a per-category dictionary
//! so each placeholder can be expanded back to the original text.

pub mod cluster;
pub mod config;
pub mod corpus;
pub mod error;
pub mod estimate;
pub mod intern;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod store;
pub mod template;
pub mod vectorize;

pub use cluster::{ClusterAssignment, ClusterLabel, Clustering, Dbscan, KMeans, NOISE_ID};
pub use config::{Algorithm, ClusterCountSource, OutputText, PipelineConfig};
pub use corpus::{collect_log_files, Corpus, LogLine, SkippedLine, SourceFile};
pub use error::{ClusterError, LineError, Result};
pub use estimate::ClusterCountEstimator;
pub use intern::{DictionarySink, InternDictionary, InternTables};
pub use normalize::{Category, NormalizedLine, Normalizer, Policy};
pub use output::{format_record, write_atomically, write_records, NoisePolicy, SEPARATOR};
pub use pipeline::{Pipeline, RunOutput, RunSummary, SearchHit};
pub use store::SqliteStore;
pub use template::{extract_template, TemplateFrequency, TemplateParse};
pub use vectorize::{FeatureVector, TfidfVectorizer, TruncatedSvd, Vectorizer};
