//! One clustering run over a static corpus.
//!
//! The [`Pipeline`] holds only immutable configuration. Everything mutable
//! (interning tables, template counts, labels) is created by [`Pipeline::run`]
//! and handed back in a [`RunOutput`].

use std::io::Write;

use log::{debug, info, warn};
use serde::Serialize;

use crate::cluster::{ClusterAssignment, ClusterLabel, Clustering, Dbscan, KMeans};
use crate::config::{Algorithm, ClusterCountSource, OutputText, PipelineConfig};
use crate::corpus::Corpus;
use crate::error::{ClusterError, Result};
use crate::estimate::ClusterCountEstimator;
use crate::intern::{DictionarySink, InternTables};
use crate::normalize::{NormalizedLine, Normalizer, Policy};
use crate::output::{self, NoisePolicy};
use crate::store::SqliteStore;
use crate::template::{TemplateEntry, TemplateFrequency};
use crate::vectorize::Vectorizer;

const SUMMARY_TOP_TEMPLATES: usize = 10;

pub struct Pipeline {
    config: PipelineConfig,
    normalizer: Normalizer,
}

#[derive(Debug)]
pub struct RunOutput {
    /// One entry per usable corpus line, in corpus order.
    pub normalized: Vec<NormalizedLine>,
    pub templates: TemplateFrequency,
    /// `None` for density clustering, which picks its own count.
    pub cluster_count: Option<usize>,
    pub assignment: ClusterAssignment,
    pub tables: InternTables,
}

/// A line containing the search term, rebuilt to its raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub index: usize,
    pub line: String,
    pub label: ClusterLabel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub lines: usize,
    pub skipped: usize,
    pub templates: usize,
    pub top_templates: Vec<TemplateEntry>,
    pub requested_clusters: Option<usize>,
    pub clusters: usize,
    pub noise: usize,
    pub cluster_sizes: Vec<usize>,
    pub interned: usize,
    pub written: usize,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let normalizer = Normalizer::new(config.policy);
        Ok(Self { config, normalizer })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn cluster_count(&self, templates: &TemplateFrequency, usable: usize) -> Result<usize> {
        let n = match self.config.clusters {
            ClusterCountSource::Fixed { count } => count,
            ClusterCountSource::Estimated {
                threshold,
                min_clusters,
            } => ClusterCountEstimator::new(threshold, min_clusters).estimate(templates, usable)?,
        };
        if n == 0 {
            return Err(ClusterError::InvalidClusterCount(n));
        }
        Ok(n)
    }

    /// Normalizes, counts templates, vectorizes and clusters `corpus`.
    /// `tables` seeds the interning dictionaries; new entries go to `sink`.
    pub fn run(
        &self,
        corpus: &Corpus,
        mut tables: InternTables,
        mut sink: Option<&mut (dyn DictionarySink + '_)>,
    ) -> Result<RunOutput> {
        if corpus.is_empty() {
            return Err(ClusterError::EmptyCorpus);
        }
        if !corpus.skipped().is_empty() {
            warn!(
                "{} of {} lines skipped",
                corpus.skipped().len(),
                corpus.total()
            );
        }

        let mut normalized = Vec::with_capacity(corpus.len());
        for line in corpus.lines() {
            normalized.push(
                self.normalizer
                    .normalize(line, &mut tables, sink.as_deref_mut())?,
            );
        }
        info!(
            "normalized {} lines ({:?}), {} interned values",
            normalized.len(),
            self.config.policy,
            tables.entry_count()
        );

        let templates =
            TemplateFrequency::from_lines(corpus.lines().iter().map(|l| l.text.as_str()));
        info!("{} distinct templates", templates.len());
        for entry in templates.top(3) {
            debug!("template #{} x{}: {}", entry.id, entry.count, entry.template);
        }

        let (cluster_count, clusterer): (Option<usize>, Box<dyn Clustering>) =
            match self.config.algorithm {
                Algorithm::KMeans { n_init, max_iter } => {
                    let n = self.cluster_count(&templates, corpus.len())?;
                    let kmeans = KMeans {
                        n_init,
                        max_iter,
                        ..KMeans::new(n, self.config.seed)
                    };
                    (Some(n), Box::new(kmeans))
                }
                Algorithm::Dbscan { eps, min_samples } => {
                    (None, Box::new(Dbscan::new(eps, min_samples)))
                }
            };

        let vectors = Vectorizer::new(
            self.config.max_features,
            self.config.reduction(),
            self.config.seed,
        )
        .fit_transform(&normalized.iter().map(|l| l.text.as_str()).collect::<Vec<_>>())?;
        info!(
            "vectorized {} lines into {} dimensions",
            vectors.len(),
            vectors.first().map_or(0, Vec::len)
        );

        let assignment = clusterer.fit_predict(&vectors)?;
        info!(
            "assigned {} lines to {} clusters, {} noise",
            assignment.len(),
            assignment.cluster_count(),
            assignment.noise_count()
        );

        Ok(RunOutput {
            normalized,
            templates,
            cluster_count,
            assignment,
            tables,
        })
    }

    /// Reads the configured input, runs, persists results when a store is
    /// configured and then writes the output file.
    pub fn execute(&self) -> Result<RunSummary> {
        let (corpus, run, written) = self.materialize()?;
        Ok(run.summary(&corpus, written))
    }

    /// [`Pipeline::execute`] followed by a search of the clustered lines.
    pub fn execute_search(&self, term: &str) -> Result<(RunSummary, Vec<SearchHit>)> {
        let (corpus, run, written) = self.materialize()?;
        let hits = run.search(&corpus, term)?;
        info!("{} lines match {:?}", hits.len(), term);
        Ok((run.summary(&corpus, written), hits))
    }

    fn materialize(&self) -> Result<(Corpus, RunOutput, usize)> {
        let corpus = Corpus::from_path(&self.config.input)?;
        info!(
            "read {} lines from {}",
            corpus.total(),
            self.config.input.display()
        );

        let mut store = match &self.config.store {
            Some(path) => Some(SqliteStore::open(path)?),
            None => None,
        };
        let tables = match (&store, self.config.policy) {
            (Some(store), Policy::Interning) => store.load_tables()?,
            _ => InternTables::new(),
        };
        let sink = store.as_mut().map(|s| s as &mut dyn DictionarySink);
        let run = self.run(&corpus, tables, sink)?;

        // The output file only appears once the results are committed.
        if let Some(store) = store.as_mut() {
            store.insert_results(run.stored_records(self.config.noise))?;
        }
        let written = output::write_atomically(&self.config.output, |w| {
            run.write(&corpus, w, self.config.output_text, self.config.noise)
        })?;
        Ok((corpus, run, written))
    }
}

impl RunOutput {
    /// `(text, label)` pairs in corpus order.
    pub fn records<'a>(
        &'a self,
        corpus: &'a Corpus,
        text: OutputText,
    ) -> impl Iterator<Item = (&'a str, ClusterLabel)> + 'a {
        let labels = self.assignment.labels().iter().copied();
        let texts: Box<dyn Iterator<Item = &'a str> + 'a> = match text {
            OutputText::Normalized => Box::new(self.normalized.iter().map(|l| l.text.as_str())),
            OutputText::Original => Box::new(corpus.lines().iter().map(|l| l.text.as_str())),
        };
        texts.zip(labels)
    }

    /// Normalized `(text, label)` pairs for the store, under the same noise
    /// policy as the output file.
    fn stored_records(&self, noise: NoisePolicy) -> impl Iterator<Item = (&str, ClusterLabel)> {
        self.normalized
            .iter()
            .map(|l| l.text.as_str())
            .zip(self.assignment.labels().iter().copied())
            .filter(move |(_, label)| !(label.is_noise() && noise == NoisePolicy::Drop))
    }

    /// Lines whose raw text contains `term`, in corpus order. Interned lines
    /// are expanded through the run's tables; an empty term matches all.
    pub fn search(&self, corpus: &Corpus, term: &str) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        let rows = self.normalized.iter().zip(corpus.lines());
        for ((normalized, raw), &label) in rows.zip(self.assignment.labels()) {
            let line = if normalized.interned.is_empty() {
                raw.text.clone()
            } else {
                self.tables.expand(normalized).ok_or_else(|| {
                    ClusterError::Validation(format!(
                        "line {} has placeholders missing from the tables",
                        raw.index
                    ))
                })?
            };
            if line.contains(term) {
                hits.push(SearchHit {
                    index: raw.index,
                    line,
                    label,
                });
            }
        }
        Ok(hits)
    }

    pub fn write<W: Write + ?Sized>(
        &self,
        corpus: &Corpus,
        writer: &mut W,
        text: OutputText,
        noise: NoisePolicy,
    ) -> Result<usize> {
        output::write_records(writer, self.records(corpus, text), noise)
    }

    pub fn summary(&self, corpus: &Corpus, written: usize) -> RunSummary {
        RunSummary {
            lines: corpus.len(),
            skipped: corpus.skipped().len(),
            templates: self.templates.len(),
            top_templates: self
                .templates
                .top(SUMMARY_TOP_TEMPLATES)
                .into_iter()
                .cloned()
                .collect(),
            requested_clusters: self.cluster_count,
            clusters: self.assignment.cluster_count(),
            noise: self.assignment.noise_count(),
            cluster_sizes: self.assignment.sizes(),
            interned: self.tables.entry_count(),
            written,
        }
    }
}
