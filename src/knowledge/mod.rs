//! Knowledge store: exact similarity search over embedded documents
//!
//! The index is built once (offline or at startup) and is read-only afterwards.
//! Queries embed the text through the injected `Embedder`.

pub mod embedding;
pub mod seed;

pub use embedding::{Embedder, GeminiEmbedder, HashingEmbedder};
pub use seed::{default_corpus, load_news, news_documents, NewsItem, SeedDocument, SYMBOL_KEY};

use crate::error::OrchestrationError;
use crate::models::{Document, RetrievalMatch, RetrievalResult};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Metadata equality filter applied before ranking
pub type MetadataFilter = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    InnerProduct,
}

/// On-disk index format
#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    metric: SimilarityMetric,
    /// Embedder the documents were embedded with; absent in older files
    #[serde(default)]
    embedder: Option<String>,
    #[serde(default)]
    dimension: Option<usize>,
    documents: Vec<Document>,
}

pub struct KnowledgeStore {
    documents: Vec<Document>,
    norms: Vec<f64>,
    dimension: Option<usize>,
    metric: SimilarityMetric,
    embedder: Arc<dyn Embedder>,
    /// Model recorded at ingestion time
    ingested_with: Option<String>,
    embed_timeout: Duration,
}

impl KnowledgeStore {
    /// Build a store over already-embedded documents
    pub fn from_documents(
        documents: Vec<Document>,
        embedder: Arc<dyn Embedder>,
        metric: SimilarityMetric,
    ) -> Result<Self> {
        let mut seen = HashSet::with_capacity(documents.len());
        let mut dimension = None;

        for doc in &documents {
            if !seen.insert(doc.id.as_str()) {
                return Err(OrchestrationError::InvalidInput(format!(
                    "duplicate document id '{}'",
                    doc.id
                )));
            }
            if doc.embedding.is_empty() || doc.embedding.iter().any(|v| !v.is_finite()) {
                return Err(OrchestrationError::InvalidInput(format!(
                    "document '{}' has an empty or non-finite embedding",
                    doc.id
                )));
            }
            match dimension {
                None => dimension = Some(doc.embedding.len()),
                Some(d) if d != doc.embedding.len() => {
                    return Err(OrchestrationError::InvalidInput(format!(
                        "document '{}' has dimension {}, index uses {}",
                        doc.id,
                        doc.embedding.len(),
                        d
                    )));
                }
                Some(_) => {}
            }
        }

        let norms = documents.iter().map(|d| norm(&d.embedding)).collect();
        let ingested_with = Some(embedder.model());

        Ok(Self {
            documents,
            norms,
            dimension,
            metric,
            embedder,
            ingested_with,
            embed_timeout: Duration::from_secs(10),
        })
    }

    /// Embed a seed corpus and build the index over it
    pub async fn build(
        corpus: &[SeedDocument],
        embedder: Arc<dyn Embedder>,
        metric: SimilarityMetric,
    ) -> Result<Self> {
        let mut documents = Vec::with_capacity(corpus.len());

        for seed in corpus {
            let embedding = embedder.embed(&seed.text).await?;
            documents.push(Document {
                id: seed.id.clone(),
                text: seed.text.clone(),
                embedding,
                metadata: seed.metadata.clone(),
            });
        }

        info!(documents = documents.len(), "Knowledge index built");
        Self::from_documents(documents, embedder, metric)
    }

    /// Load a persisted index. Whether `embedder` matches the one used at
    /// ingestion is checked separately with `embedder_mismatch`.
    pub fn load_index(path: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let file: IndexFile = serde_json::from_str(&raw)?;

        info!(
            path = %path.as_ref().display(),
            documents = file.documents.len(),
            embedder = file.embedder.as_deref().unwrap_or("unknown"),
            dimension = ?file.dimension,
            "Knowledge index loaded"
        );

        let mut store = Self::from_documents(file.documents, embedder, file.metric)?;
        if let (Some(recorded), Some(actual)) = (file.dimension, store.dimension) {
            if recorded != actual {
                return Err(OrchestrationError::InvalidInput(format!(
                    "index file declares dimension {}, documents have {}",
                    recorded, actual
                )));
            }
        }
        store.ingested_with = file.embedder;
        Ok(store)
    }

    pub fn save_index(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = IndexFile {
            metric: self.metric,
            embedder: self.ingested_with.clone(),
            dimension: self.dimension,
            documents: self.documents.clone(),
        };
        std::fs::write(path, serde_json::to_vec_pretty(&file)?)?;
        Ok(())
    }

    /// Why the active embedder cannot query this index, if it cannot.
    /// Makes one `embed` call when the embedder does not report its dimension.
    pub async fn embedder_mismatch(&self) -> Result<Option<String>> {
        let active = self.embedder.model();
        if let Some(recorded) = &self.ingested_with {
            if *recorded != active {
                return Ok(Some(format!(
                    "index built with '{}', active embedder is '{}'",
                    recorded, active
                )));
            }
        }

        let Some(indexed) = self.dimension else {
            return Ok(None);
        };
        let produced = match self.embedder.dimension() {
            Some(d) => d,
            None => tokio::time::timeout(self.embed_timeout, self.embedder.embed("dimension check"))
                .await
                .map_err(|_| {
                    OrchestrationError::EmbeddingUnavailable("dimension check timed out".to_string())
                })??
                .len(),
        };

        Ok((produced != indexed).then(|| {
            format!(
                "index uses dimension {}, active embedder produces {}",
                indexed, produced
            )
        }))
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Top-k documents by descending similarity, ties broken by id
    pub async fn query(
        &self,
        text: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<RetrievalResult> {
        self.search(text, top_k, |doc| matches_filter(doc, filter))
            .await
    }

    /// Retrieval for one instrument: a pass over documents tagged with
    /// `symbol` merged with a general pass over untagged documents.
    /// Documents tagged with another symbol are never returned.
    pub async fn query_for_symbol(
        &self,
        symbol: &str,
        query: &str,
        top_k: usize,
    ) -> Result<RetrievalResult> {
        let symbol = symbol.trim().to_uppercase();
        let scoped_filter = MetadataFilter::from([(SYMBOL_KEY.to_string(), symbol.clone())]);

        let scoped = self
            .query(&format!("{} {}", symbol, query), top_k, Some(&scoped_filter))
            .await?;
        let general = self
            .search(query, top_k, |doc| !doc.metadata.contains_key(SYMBOL_KEY))
            .await?;

        // Tagged and untagged candidates are disjoint, so ids stay unique.
        let mut merged: RetrievalResult = scoped.into_iter().chain(general).collect();
        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        merged.truncate(top_k);

        debug!(%symbol, matches = merged.len(), top_k, "Symbol-scoped query merged");
        Ok(merged)
    }

    async fn search(
        &self,
        text: &str,
        top_k: usize,
        keep: impl Fn(&Document) -> bool,
    ) -> Result<RetrievalResult> {
        let candidates: Vec<usize> = (0..self.documents.len())
            .filter(|&i| keep(&self.documents[i]))
            .collect();

        if candidates.is_empty() || top_k == 0 {
            debug!(top_k, "No candidate documents for query");
            return Ok(Vec::new());
        }

        let query_vec = self.embed_query(text).await?;
        let query_norm = norm(&query_vec);

        let mut scored: Vec<(usize, f64)> = candidates
            .into_iter()
            .map(|i| {
                let dot = dot(&self.documents[i].embedding, &query_vec);
                let score = match self.metric {
                    SimilarityMetric::InnerProduct => dot,
                    SimilarityMetric::Cosine => {
                        let denom = self.norms[i] * query_norm;
                        if denom > 0.0 {
                            dot / denom
                        } else {
                            0.0
                        }
                    }
                };
                (i, score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| self.documents[a.0].id.cmp(&self.documents[b.0].id))
        });
        scored.truncate(top_k);

        debug!(matches = scored.len(), top_k, "Knowledge query ranked");

        Ok(scored
            .into_iter()
            .map(|(i, score)| RetrievalMatch {
                document: self.documents[i].clone(),
                score,
            })
            .collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = tokio::time::timeout(self.embed_timeout, self.embedder.embed(text))
            .await
            .map_err(|_| {
                OrchestrationError::EmbeddingUnavailable(format!(
                    "embedding timed out after {} ms",
                    self.embed_timeout.as_millis()
                ))
            })?
            .map_err(|e| match e {
                OrchestrationError::EmbeddingUnavailable(_) => e,
                other => OrchestrationError::EmbeddingUnavailable(other.to_string()),
            })?;

        if let Some(dimension) = self.dimension {
            if embedding.len() != dimension {
                return Err(OrchestrationError::EmbeddingUnavailable(format!(
                    "query embedding has dimension {}, index uses {}",
                    embedding.len(),
                    dimension
                )));
            }
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(OrchestrationError::EmbeddingUnavailable(
                "query embedding contains non-finite values".to_string(),
            ));
        }

        Ok(embedding)
    }
}

fn matches_filter(doc: &Document, filter: Option<&MetadataFilter>) -> bool {
    filter.map_or(true, |f| {
        f.iter()
            .all(|(key, value)| doc.metadata.get(key) == Some(value))
    })
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum()
}

fn norm(v: &[f32]) -> f64 {
    v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio_test::assert_ok;

    /// Maps known phrases to fixed vectors
    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(match text {
                "momentum" => vec![1.0, 0.0, 0.0],
                "risk" => vec![0.0, 1.0, 0.0],
                "wrong" => vec![1.0, 0.0],
                _ => vec![0.5, 0.5, 0.0],
            })
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(OrchestrationError::Provider("embedding service down".to_string()))
        }
    }

    fn doc(id: &str, embedding: Vec<f32>, kind: &str) -> Document {
        Document {
            id: id.to_string(),
            text: format!("document {}", id),
            embedding,
            metadata: BTreeMap::from([("type".to_string(), kind.to_string())]),
        }
    }

    fn three_doc_store(embedder: Arc<dyn Embedder>) -> KnowledgeStore {
        KnowledgeStore::from_documents(
            vec![
                doc("rsi", vec![0.9, 0.1, 0.0], "indicator"),
                doc("volatility", vec![0.1, 0.9, 0.0], "concept"),
                doc("sma", vec![0.7, 0.0, 0.7], "indicator"),
            ],
            embedder,
            SimilarityMetric::Cosine,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_top_k_is_ordered_and_bounded() {
        let store = three_doc_store(Arc::new(FixedEmbedder));

        let results = store.query("momentum", 2, None).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
        assert_eq!(results[0].document.id, "rsi");
    }

    #[tokio::test]
    async fn test_results_unique_and_descending() {
        let store = three_doc_store(Arc::new(FixedEmbedder));

        for top_k in 0..5 {
            let results = store.query("anything", top_k, None).await.unwrap();
            assert!(results.len() <= top_k);
            assert!(results.windows(2).all(|w| w[0].score >= w[1].score));

            let ids: HashSet<_> = results.iter().map(|m| m.document.id.as_str()).collect();
            assert_eq!(ids.len(), results.len());
        }
    }

    #[tokio::test]
    async fn test_ties_broken_by_id() {
        let store = KnowledgeStore::from_documents(
            vec![
                doc("b", vec![1.0, 0.0, 0.0], "x"),
                doc("a", vec![2.0, 0.0, 0.0], "x"),
            ],
            Arc::new(FixedEmbedder),
            SimilarityMetric::Cosine,
        )
        .unwrap();

        let results = store.query("momentum", 2, None).await.unwrap();
        assert_eq!(results[0].document.id, "a");
        assert_eq!(results[1].document.id, "b");
    }

    #[tokio::test]
    async fn test_filter_restricts_candidates() {
        let store = three_doc_store(Arc::new(FixedEmbedder));
        let filter = MetadataFilter::from([("type".to_string(), "concept".to_string())]);

        let results = store.query("momentum", 3, Some(&filter)).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.id, "volatility");
    }

    #[tokio::test]
    async fn test_inner_product_metric_uses_magnitude() {
        let store = KnowledgeStore::from_documents(
            vec![
                doc("small", vec![1.0, 0.0, 0.0], "x"),
                doc("large", vec![3.0, 0.0, 0.0], "x"),
            ],
            Arc::new(FixedEmbedder),
            SimilarityMetric::InnerProduct,
        )
        .unwrap();

        let results = store.query("momentum", 2, None).await.unwrap();
        assert_eq!(results[0].document.id, "large");
        assert_eq!(results[0].score, 3.0);
    }

    #[tokio::test]
    async fn test_empty_index_returns_empty() {
        let store = KnowledgeStore::from_documents(
            vec![],
            Arc::new(FailingEmbedder),
            SimilarityMetric::Cosine,
        )
        .unwrap();

        let results = assert_ok!(store.query("anything", 5, None).await);
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_is_embedding_unavailable() {
        let store = three_doc_store(Arc::new(FailingEmbedder));
        let result = store.query("momentum", 2, None).await;
        assert!(matches!(result, Err(OrchestrationError::EmbeddingUnavailable(_))));
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch_rejected() {
        let store = three_doc_store(Arc::new(FixedEmbedder));
        let result = store.query("wrong", 2, None).await;
        assert!(matches!(result, Err(OrchestrationError::EmbeddingUnavailable(_))));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = KnowledgeStore::from_documents(
            vec![doc("a", vec![1.0], "x"), doc("a", vec![0.5], "x")],
            Arc::new(FixedEmbedder),
            SimilarityMetric::Cosine,
        );
        assert!(matches!(result, Err(OrchestrationError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_build_and_persist_round_trip() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(64));
        let store = KnowledgeStore::build(&default_corpus(), embedder.clone(), SimilarityMetric::Cosine)
            .await
            .unwrap();
        assert_eq!(store.len(), default_corpus().len());

        let path = std::env::temp_dir().join(format!("knowledge-{}.json", uuid::Uuid::new_v4()));
        store.save_index(&path).unwrap();
        let loaded = KnowledgeStore::load_index(&path, embedder).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.len(), store.len());
        let rsi_text = default_corpus()
            .into_iter()
            .find(|d| d.metadata.get("name").map(String::as_str) == Some("RSI"))
            .map(|d| d.text)
            .unwrap();
        let hits = loaded.query(&rsi_text, 1, None).await.unwrap();
        assert_eq!(hits[0].document.metadata.get("name").map(String::as_str), Some("RSI"));
    }

    #[tokio::test]
    async fn test_symbol_query_excludes_other_symbols() {
        let mut corpus = default_corpus();
        corpus.push(SeedDocument::news(
            "news_BTC_0",
            "BTC",
            "should I buy now? bitcoin buyers say buy now",
        ));
        corpus.push(SeedDocument::news(
            "news_SPY_0",
            "spy",
            "SPY buyers should watch the 200 day average now",
        ));
        let store = KnowledgeStore::build(
            &corpus,
            Arc::new(HashingEmbedder::new(64)),
            SimilarityMetric::Cosine,
        )
        .await
        .unwrap();

        let results = store
            .query_for_symbol("spy", "should I buy now?", 3)
            .await
            .unwrap();

        assert!(!results.is_empty() && results.len() <= 3);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        let ids: Vec<&str> = results.iter().map(|m| m.document.id.as_str()).collect();
        assert!(ids.contains(&"news_SPY_0"));
        assert!(!ids.contains(&"news_BTC_0"));
    }

    #[tokio::test]
    async fn test_symbol_query_merges_by_score_and_caps() {
        let store = KnowledgeStore::from_documents(
            vec![
                doc("rsi", vec![0.9, 0.1, 0.0], "indicator"),
                doc("sma", vec![0.7, 0.0, 0.7], "indicator"),
                Document {
                    metadata: BTreeMap::from([(SYMBOL_KEY.to_string(), "ETH".to_string())]),
                    ..doc("eth_news", vec![0.5, 0.5, 0.0], "news")
                },
            ],
            Arc::new(FixedEmbedder),
            SimilarityMetric::Cosine,
        )
        .unwrap();

        let results = store.query_for_symbol("eth", "anything", 2).await.unwrap();

        let ids: Vec<&str> = results.iter().map(|m| m.document.id.as_str()).collect();
        assert_eq!(ids, vec!["eth_news", "rsi"]);
    }

    #[tokio::test]
    async fn test_index_records_embedder_and_detects_mismatch() {
        let small: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(64));
        let store = KnowledgeStore::build(&default_corpus(), small.clone(), SimilarityMetric::Cosine)
            .await
            .unwrap();
        let path = std::env::temp_dir().join(format!("knowledge-{}.json", uuid::Uuid::new_v4()));
        store.save_index(&path).unwrap();

        let same = KnowledgeStore::load_index(&path, small).unwrap();
        let other = KnowledgeStore::load_index(&path, Arc::new(HashingEmbedder::new(256))).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(same.dimension(), Some(64));
        assert_eq!(same.embedder_mismatch().await.unwrap(), None);
        let reason = other.embedder_mismatch().await.unwrap().unwrap();
        assert!(reason.contains("hashing-fnv1a-64"));
    }

    #[tokio::test]
    async fn test_unlabelled_index_checks_embedded_dimension() {
        let path = std::env::temp_dir().join(format!("knowledge-{}.json", uuid::Uuid::new_v4()));
        let legacy = serde_json::json!({
            "metric": "cosine",
            "documents": [
                {"id": "a", "text": "momentum", "embedding": [1.0, 0.0], "metadata": {}}
            ]
        });
        std::fs::write(&path, legacy.to_string()).unwrap();

        let store = KnowledgeStore::load_index(&path, Arc::new(FixedEmbedder)).unwrap();
        std::fs::remove_file(&path).ok();

        let reason = store.embedder_mismatch().await.unwrap().unwrap();
        assert!(reason.contains("dimension 2"));
    }
}
