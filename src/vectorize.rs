//! Term-weighted bag-of-words features with optional linear reduction.
//!
//! Both the vocabulary and the reduction basis are fit on the corpus being
//! clustered and are not meant to be reused on other input.

use std::sync::LazyLock;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use rustc_hash::FxHashMap;

use crate::error::{ClusterError, Result};

pub type FeatureVector = Vec<f64>;

// Terms are runs of at least two word characters.
static TERM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w\w+\b").unwrap());

fn terms(doc: &str) -> Vec<String> {
    let lowered = doc.to_lowercase();
    TERM.find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Row-sparse matrix; each row is sorted by column.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseRows {
    pub dim: usize,
    pub rows: Vec<Vec<(usize, f64)>>,
}

impl SparseRows {
    pub fn to_dense(&self) -> Vec<FeatureVector> {
        self.rows
            .iter()
            .map(|row| {
                let mut dense = vec![0.0; self.dim];
                for &(j, v) in row {
                    dense[j] = v;
                }
                dense
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct TfidfModel {
    vocabulary: Vec<String>,
    index: FxHashMap<String, usize>,
    idf: Vec<f64>,
}

impl TfidfModel {
    /// Vocabulary in column order (lexical).
    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    pub fn idf(&self, term: &str) -> Option<f64> {
        self.index.get(term).map(|&j| self.idf[j])
    }

    /// L2-normalised tf-idf row. Terms outside the vocabulary are ignored.
    pub fn transform(&self, doc: &str) -> Vec<(usize, f64)> {
        let mut counts: FxHashMap<usize, f64> = FxHashMap::default();
        for term in terms(doc) {
            if let Some(&j) = self.index.get(&term) {
                *counts.entry(j).or_insert(0.0) += 1.0;
            }
        }
        let mut row: Vec<(usize, f64)> = counts
            .into_iter()
            .map(|(j, tf)| (j, tf * self.idf[j]))
            .collect();
        row.sort_by_key(|&(j, _)| j);
        let norm = row.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, v) in row.iter_mut() {
                *v /= norm;
            }
        }
        row
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TfidfVectorizer {
    pub max_features: usize,
}

impl Default for TfidfVectorizer {
    fn default() -> Self {
        Self { max_features: 1000 }
    }
}

impl TfidfVectorizer {
    pub fn new(max_features: usize) -> Self {
        Self { max_features }
    }

    /// Learns the vocabulary and idf weights, then transforms the same docs.
    /// Each doc is one line.
    pub fn fit_transform<S: AsRef<str>>(&self, docs: &[S]) -> Result<(TfidfModel, SparseRows)> {
        if docs.is_empty() {
            return Err(ClusterError::EmptyCorpus);
        }
        let mut term_counts: FxHashMap<String, usize> = FxHashMap::default();
        let mut doc_freq: FxHashMap<String, usize> = FxHashMap::default();
        for doc in docs {
            let doc_terms = terms(doc.as_ref());
            for term in &doc_terms {
                *term_counts.entry(term.clone()).or_insert(0) += 1;
            }
            let mut unique = doc_terms;
            unique.sort_unstable();
            unique.dedup();
            for term in unique {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }
        if term_counts.is_empty() {
            return Err(ClusterError::DegenerateVocabulary);
        }

        let mut ranked: Vec<(String, usize)> = term_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        if ranked.len() > self.max_features {
            debug!(
                "capping vocabulary of {} terms at {}",
                ranked.len(),
                self.max_features
            );
            ranked.truncate(self.max_features);
        }
        let mut vocabulary: Vec<String> = ranked.into_iter().map(|(t, _)| t).collect();
        vocabulary.sort();

        let n = docs.len() as f64;
        let idf = vocabulary
            .iter()
            .map(|t| {
                let df = doc_freq.get(t).copied().unwrap_or(0) as f64;
                ((1.0 + n) / (1.0 + df)).ln() + 1.0
            })
            .collect();
        let index = vocabulary
            .iter()
            .enumerate()
            .map(|(j, t)| (t.clone(), j))
            .collect();
        let model = TfidfModel {
            vocabulary,
            index,
            idf,
        };
        let rows = SparseRows {
            dim: model.vocabulary.len(),
            rows: docs.iter().map(|d| model.transform(d.as_ref())).collect(),
        };
        info!("vocabulary has {} terms", rows.dim);
        Ok((model, rows))
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// Modified Gram-Schmidt. Vectors that collapse numerically are zeroed.
fn orthonormalize(vectors: &mut [Vec<f64>]) {
    for i in 0..vectors.len() {
        let (done, rest) = vectors.split_at_mut(i);
        let v = &mut rest[0];
        for u in done.iter() {
            let proj = dot(v, u);
            for (x, y) in v.iter_mut().zip(u) {
                *x -= proj * y;
            }
        }
        let norm = dot(v, v).sqrt();
        if norm > 1e-12 {
            v.iter_mut().for_each(|x| *x /= norm);
        } else {
            v.iter_mut().for_each(|x| *x = 0.0);
        }
    }
}

/// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations.
/// Returns eigenvalues and eigenvectors (column `c` of the second value is
/// the vector for eigenvalue `c`).
fn jacobi_eigen(mut a: Vec<Vec<f64>>) -> (Vec<f64>, Vec<Vec<f64>>) {
    let m = a.len();
    let mut v: Vec<Vec<f64>> = (0..m)
        .map(|i| (0..m).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();
    for _ in 0..100 {
        let total: f64 = a.iter().flatten().map(|x| x * x).sum();
        let off: f64 = (0..m)
            .flat_map(|i| (0..m).filter(move |&j| j != i).map(move |j| (i, j)))
            .map(|(i, j)| a[i][j] * a[i][j])
            .sum();
        if total == 0.0 || off <= 1e-24 * total {
            break;
        }
        for p in 0..m {
            for q in p + 1..m {
                let apq = a[p][q];
                if apq == 0.0 {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for row in a.iter_mut() {
                    let (akp, akq) = (row[p], row[q]);
                    row[p] = c * akp - s * akq;
                    row[q] = s * akp + c * akq;
                }
                for k in 0..m {
                    let (apk, aqk) = (a[p][k], a[q][k]);
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
                for row in v.iter_mut() {
                    let (vkp, vkq) = (row[p], row[q]);
                    row[p] = c * vkp - s * vkq;
                    row[q] = s * vkp + c * vkq;
                }
            }
        }
    }
    ((0..m).map(|i| a[i][i]).collect(), v)
}

/// Fitted reduction basis.
#[derive(Debug, Clone)]
pub struct SvdModel {
    /// `components[c]` is a unit vector in feature space.
    pub components: Vec<Vec<f64>>,
    pub singular_values: Vec<f64>,
}

impl SvdModel {
    pub fn project(&self, row: &[(usize, f64)]) -> FeatureVector {
        self.components
            .iter()
            .map(|c| row.iter().map(|&(j, v)| v * c[j]).sum())
            .collect()
    }
}

/// Truncated SVD through seeded randomized subspace iteration on `XᵀX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncatedSvd {
    pub n_components: usize,
    pub n_iter: usize,
    pub n_oversamples: usize,
    pub seed: u64,
}

impl TruncatedSvd {
    pub fn new(n_components: usize, seed: u64) -> Self {
        Self {
            n_components,
            n_iter: 7,
            n_oversamples: 10,
            seed,
        }
    }

    pub fn fit(&self, x: &SparseRows) -> Result<SvdModel> {
        let d = x.dim;
        if d == 0 {
            return Err(ClusterError::DegenerateVocabulary);
        }
        let k = if self.n_components > d {
            warn!(
                "only {} features available, reducing to {} components instead of {}",
                d, d, self.n_components
            );
            d
        } else {
            self.n_components
        };
        if k == 0 {
            return Err(ClusterError::Validation(
                "reduction needs at least one component".to_string(),
            ));
        }

        let mut gram = vec![vec![0.0; d]; d];
        for row in &x.rows {
            for &(i, a) in row {
                for &(j, b) in row {
                    gram[i][j] += a * b;
                }
            }
        }
        let apply = |v: &[f64]| -> Vec<f64> { gram.iter().map(|g| dot(g, v)).collect() };

        let width = (k + self.n_oversamples).min(d);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut basis: Vec<Vec<f64>> = (0..width)
            .map(|_| (0..d).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect();
        orthonormalize(&mut basis);
        for _ in 0..self.n_iter {
            basis = basis.iter().map(|v| apply(v)).collect();
            orthonormalize(&mut basis);
        }

        // Rayleigh-Ritz on the subspace.
        let image: Vec<Vec<f64>> = basis.iter().map(|v| apply(v)).collect();
        let small: Vec<Vec<f64>> = basis
            .iter()
            .map(|bi| image.iter().map(|gj| dot(bi, gj)).collect())
            .collect();
        let (eigenvalues, eigenvectors) = jacobi_eigen(small);
        let mut order: Vec<usize> = (0..width).collect();
        order.sort_by(|&a, &b| eigenvalues[b].total_cmp(&eigenvalues[a]).then(a.cmp(&b)));

        let mut components = Vec::with_capacity(k);
        let mut singular_values = Vec::with_capacity(k);
        for &c in order.iter().take(k) {
            let mut component = vec![0.0; d];
            for (i, b) in basis.iter().enumerate() {
                let w = eigenvectors[i][c];
                for (x, y) in component.iter_mut().zip(b) {
                    *x += w * y;
                }
            }
            let pivot = component
                .iter()
                .copied()
                .fold(0.0_f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
            if pivot < 0.0 {
                component.iter_mut().for_each(|x| *x = -*x);
            }
            components.push(component);
            singular_values.push(eigenvalues[c].max(0.0).sqrt());
        }
        debug!("leading singular values: {:?}", &singular_values[..k.min(5)]);
        Ok(SvdModel {
            components,
            singular_values,
        })
    }

    pub fn fit_transform(&self, x: &SparseRows) -> Result<Vec<FeatureVector>> {
        let model = self.fit(x)?;
        Ok(x.rows.iter().map(|row| model.project(row)).collect())
    }
}

/// Text lines in, one feature vector per line out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vectorizer {
    pub tfidf: TfidfVectorizer,
    pub reduction: Option<TruncatedSvd>,
}

impl Vectorizer {
    pub fn new(max_features: usize, components: Option<usize>, seed: u64) -> Self {
        Self {
            tfidf: TfidfVectorizer::new(max_features),
            reduction: components
                .filter(|&c| c > 0)
                .map(|c| TruncatedSvd::new(c, seed)),
        }
    }

    pub fn fit_transform<S: AsRef<str>>(&self, docs: &[S]) -> Result<Vec<FeatureVector>> {
        let (_, rows) = self.tfidf.fit_transform(docs)?;
        match &self.reduction {
            Some(svd) => svd.fit_transform(&rows),
            None => Ok(rows.to_dense()),
        }
    }
}
