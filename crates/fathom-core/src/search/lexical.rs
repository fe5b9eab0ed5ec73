//! BM25 (Okapi) lexical index over an immutable corpus snapshot.
//!
//! The index is built once from a document list and never mutated; the
//! service replaces it wholesale on rebuild. Scoring follows the Okapi
//! variant:
//!
//! ```text
//! idf(t)      = ln(N - df(t) + 0.5) - ln(df(t) + 0.5)
//! score(D, Q) = sum over t in Q of idf(t) * f(t,D) * (k1 + 1)
//!                                  / (f(t,D) + k1 * (1 - b + b * |D| / avgdl))
//! ```
//!
//! Terms appearing in more than half the corpus get a negative IDF; those
//! are floored at `epsilon * mean_idf` so common terms still count a little.
//!
//! Corpus statistics are plain serde data, so a snapshot reproduces scores
//! bit for bit after [`LexicalIndex::load`].

use super::filter::MetadataFilter;
use super::snapshot::{check_format_version, read_json, write_json};
use super::tokenizer::{Tokenizer, TokenizerKind};
use super::types::{DocId, Document, RetrievalResult, SearchError, SourceKind};
use crate::config::{BM25_B, BM25_EPSILON, BM25_K1, SNAPSHOT_FORMAT_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, instrument};

/// BM25 Okapi parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    /// Term-frequency saturation
    pub k1: f32,
    /// Length normalization (0 = none, 1 = full)
    pub b: f32,
    /// Negative-IDF floor as a fraction of the mean IDF
    pub epsilon: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: BM25_K1,
            b: BM25_B,
            epsilon: BM25_EPSILON,
        }
    }
}

impl Bm25Params {
    pub(crate) fn validate(&self) -> Result<(), SearchError> {
        let ok = self.k1.is_finite()
            && self.k1 >= 0.0
            && (0.0..=1.0).contains(&self.b)
            && self.epsilon.is_finite()
            && self.epsilon >= 0.0;
        if ok {
            Ok(())
        } else {
            Err(SearchError::Configuration(format!(
                "invalid BM25 parameters: {self:?}"
            )))
        }
    }
}

/// Per-corpus statistics needed to score any query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CorpusStats {
    /// `(corpus position, term count)` for every document containing the
    /// term, in corpus order
    postings: HashMap<String, Vec<(u32, u32)>>,
    /// Token count per document
    doc_lens: Vec<u32>,
    /// Mean document length in tokens
    avgdl: f32,
    /// Inverse document frequency per term, negatives already floored
    idf: HashMap<String, f32>,
}

impl CorpusStats {
    fn compute(tokenized: &[Vec<String>], epsilon: f32) -> Self {
        let mut postings: HashMap<String, Vec<(u32, u32)>> = HashMap::new();
        let mut doc_lens = Vec::with_capacity(tokenized.len());

        for (position, tokens) in tokenized.iter().enumerate() {
            let mut freqs: HashMap<&str, u32> = HashMap::new();
            for token in tokens {
                *freqs.entry(token.as_str()).or_insert(0) += 1;
            }
            for (term, tf) in freqs {
                postings
                    .entry(term.to_string())
                    .or_default()
                    .push((position as u32, tf));
            }
            doc_lens.push(tokens.len() as u32);
        }

        let total_len: u64 = doc_lens.iter().map(|&l| u64::from(l)).sum();
        let avgdl = if tokenized.is_empty() {
            0.0
        } else {
            (total_len as f64 / tokenized.len() as f64) as f32
        };

        let n = tokenized.len() as f64;
        let mut idf: HashMap<String, f32> = HashMap::with_capacity(postings.len());
        let mut idf_sum = 0.0f64;
        let mut negative = Vec::new();
        for (term, docs) in &postings {
            let df = docs.len() as f64;
            let value = (n - df + 0.5).ln() - (df + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term.clone(), value as f32);
        }

        if !idf.is_empty() {
            let floor = (f64::from(epsilon) * idf_sum / idf.len() as f64) as f32;
            for term in negative {
                idf.insert(term, floor);
            }
        }

        Self {
            postings,
            doc_lens,
            avgdl,
            idf,
        }
    }

    /// Scores only the documents on each query term's postings list.
    fn scores(&self, query_tokens: &[String], params: &Bm25Params) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.doc_lens.len()];
        for token in query_tokens {
            let (Some(&idf), Some(docs)) = (self.idf.get(token), self.postings.get(token)) else {
                continue;
            };
            for &(position, tf) in docs {
                let i = position as usize;
                let tf = tf as f32;
                let length_ratio = if self.avgdl > 0.0 {
                    self.doc_lens[i] as f32 / self.avgdl
                } else {
                    1.0
                };
                let denom = tf + params.k1 * (1.0 - params.b + params.b * length_ratio);
                scores[i] += idf * (tf * (params.k1 + 1.0)) / denom;
            }
        }
        scores
    }

    /// True when every posting points inside a corpus of `n` documents.
    fn covers(&self, n: usize) -> bool {
        self.doc_lens.len() == n
            && self
                .postings
                .values()
                .flatten()
                .all(|&(position, _)| (position as usize) < n)
    }
}

/// On-disk form of a [`LexicalIndex`].
#[derive(Serialize, Deserialize)]
struct LexicalSnapshot {
    format_version: u32,
    tokenizer: String,
    params: Bm25Params,
    documents: Vec<Document>,
    stats: CorpusStats,
}

/// Immutable BM25 index over a document list.
///
/// # Thread Safety
///
/// Read-only after construction; share it behind an `Arc` and search from
/// any number of threads.
#[derive(Debug)]
pub struct LexicalIndex {
    tokenizer: Tokenizer,
    params: Bm25Params,
    documents: Vec<Document>,
    stats: CorpusStats,
}

impl LexicalIndex {
    /// Builds an index over `documents`, keeping their order as the
    /// tie-break order.
    ///
    /// # Errors
    ///
    /// [`SearchError::EmptyCorpus`] if `documents` is empty;
    /// [`SearchError::Configuration`] for invalid parameters.
    #[instrument(skip_all, fields(documents = documents.len(), tokenizer = %tokenizer.kind()))]
    pub fn build(
        documents: Vec<Document>,
        tokenizer: Tokenizer,
        params: Bm25Params,
    ) -> Result<Self, SearchError> {
        if documents.is_empty() {
            return Err(SearchError::EmptyCorpus);
        }
        params.validate()?;

        let tokenized: Vec<Vec<String>> = documents
            .iter()
            .map(|doc| tokenizer.tokenize(&doc.text))
            .collect();
        let stats = CorpusStats::compute(&tokenized, params.epsilon);

        debug!(
            vocabulary = stats.idf.len(),
            avgdl = stats.avgdl,
            "built lexical index"
        );

        Ok(Self {
            tokenizer,
            params,
            documents,
            stats,
        })
    }

    /// Number of indexed documents (always at least one).
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Always false; an index cannot be built over an empty corpus.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Indexed documents in corpus order.
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Strategy used for the corpus and for queries.
    pub fn tokenizer_kind(&self) -> TokenizerKind {
        self.tokenizer.kind()
    }

    /// Raw BM25 score of every document, in corpus order.
    pub fn scores(&self, query: &str) -> Vec<f32> {
        let tokens = self.tokenizer.tokenize(query);
        self.stats.scores(&tokens, &self.params)
    }

    /// Top `top_k` documents by raw BM25 score.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<RetrievalResult> {
        self.search_filtered(query, top_k, false, |_| true)
    }

    /// Top `top_k` documents by softmax-normalized score.
    ///
    /// The softmax runs over the whole corpus before truncation, so scores
    /// lie in (0, 1) and sum to 1 across all documents.
    pub fn search_normalized(&self, query: &str, top_k: usize) -> Vec<RetrievalResult> {
        self.search_filtered(query, top_k, true, |_| true)
    }

    /// Ranks only the documents admitted by `admit`.
    ///
    /// With `normalized`, the softmax runs over the admitted subset: for
    /// this query that subset is the corpus.
    pub fn search_filtered<F>(
        &self,
        query: &str,
        top_k: usize,
        normalized: bool,
        admit: F,
    ) -> Vec<RetrievalResult>
    where
        F: Fn(&Document) -> bool,
    {
        if top_k == 0 {
            return Vec::new();
        }

        let raw = self.scores(query);
        let mut ranked: Vec<(usize, f32)> = raw
            .into_iter()
            .enumerate()
            .filter(|(i, _)| admit(&self.documents[*i]))
            .collect();

        if normalized {
            softmax_in_place(&mut ranked);
        }

        // Stable sort: equal scores keep corpus order
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(top_k);

        ranked
            .into_iter()
            .map(|(i, score)| RetrievalResult {
                document: self.documents[i].clone(),
                score,
                source: SourceKind::Lexical,
            })
            .collect()
    }

    /// Convenience wrapper combining a metadata filter with an exclusion set.
    pub fn search_excluding(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
        excluded: &HashSet<DocId>,
    ) -> Vec<RetrievalResult> {
        self.search_filtered(query, top_k, true, |doc| {
            !excluded.contains(&doc.id) && filter.map_or(true, |f| f.matches(&doc.metadata))
        })
    }

    /// Writes the index (statistics, documents and tokenizer tag) to `path`.
    #[instrument(skip(self), fields(documents = self.documents.len()))]
    pub fn persist(&self, path: &Path) -> Result<(), SearchError> {
        let snapshot = LexicalSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            tokenizer: self.tokenizer.kind().tag().to_string(),
            params: self.params,
            documents: self.documents.clone(),
            stats: self.stats.clone(),
        };
        write_json(path, &snapshot)?;
        info!(path = %path.display(), "persisted lexical index");
        Ok(())
    }

    /// Loads an index written by [`persist`](Self::persist).
    ///
    /// # Errors
    ///
    /// [`SearchError::ConfigMismatch`] if the stored tokenizer tag is not a
    /// known strategy, or differs from `expected` when one is given.
    #[instrument]
    pub fn load(path: &Path, expected: Option<TokenizerKind>) -> Result<Self, SearchError> {
        let snapshot: LexicalSnapshot = read_json(path)?;
        check_format_version(snapshot.format_version)?;

        let expected_tag = expected.map_or("a known tokenizer", |k| k.tag());
        let kind: TokenizerKind =
            snapshot
                .tokenizer
                .parse()
                .map_err(|_| SearchError::ConfigMismatch {
                    field: "tokenizer",
                    expected: expected_tag.to_string(),
                    found: snapshot.tokenizer.clone(),
                })?;
        if let Some(expected) = expected {
            if expected != kind {
                return Err(SearchError::ConfigMismatch {
                    field: "tokenizer",
                    expected: expected.tag().to_string(),
                    found: kind.tag().to_string(),
                });
            }
        }

        let n = snapshot.documents.len();
        if n == 0 {
            return Err(SearchError::EmptyCorpus);
        }
        if !snapshot.stats.covers(n) {
            return Err(SearchError::Persistence(format!(
                "lexical snapshot {} has statistics for {} documents but lists {n}",
                path.display(),
                snapshot.stats.doc_lens.len()
            )));
        }

        info!(documents = n, tokenizer = %kind, "loaded lexical index");
        Ok(Self {
            tokenizer: Tokenizer::new(kind),
            params: snapshot.params,
            documents: snapshot.documents,
            stats: snapshot.stats,
        })
    }
}

/// Replaces each score with its softmax over the slice.
///
/// Computed in f64 with the max subtracted to keep `exp` in range.
fn softmax_in_place(scores: &mut [(usize, f32)]) {
    let Some(max) = scores.iter().map(|(_, s)| f64::from(*s)).reduce(f64::max) else {
        return;
    };
    let exps: Vec<f64> = scores
        .iter()
        .map(|(_, s)| (f64::from(*s) - max).exp())
        .collect();
    let sum: f64 = exps.iter().sum();
    for ((_, score), e) in scores.iter_mut().zip(exps) {
        *score = (e / sum) as f32;
    }
}
