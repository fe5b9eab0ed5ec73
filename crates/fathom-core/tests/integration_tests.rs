//! End-to-end tests for the retrieval service.
//!
//! These tests exercise the full workflow against a real store:
//! 1. Mutation: store write → embedding → vector index → lexical staleness
//! 2. Search: BM25 + ANN retrieval → fusion → hits with provenance
//!
//! Run with: `cargo test -p fathom-core --test integration_tests`

use async_trait::async_trait;
use fathom_core::config::RetrievalConfig;
use fathom_core::embedding::EmbeddingProvider;
use fathom_core::error::EmbeddingError;
use fathom_core::search::{
    DocId, Document, FusionConfig, FusionMethod, MetadataFilter, RetrievalService,
    SearchResponse, SourceKind,
};
use fathom_core::storage::{DocumentStore, InMemoryDocumentStore, RedbDocumentStore};
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================================
// Test Fixtures
// ============================================================================

/// Embeds by counting words from three concept groups, so "canine" lands
/// next to "puppy" without sharing a single token with it.
struct ConceptEmbedder;

const ANIMALS: &[&str] = &["dog", "canine", "puppy", "hound", "wolf"];
const VEHICLES: &[&str] = &["car", "automobile", "truck", "engine"];
const WEATHER: &[&str] = &["rain", "storm", "cloud"];

#[async_trait]
impl EmbeddingProvider for ConceptEmbedder {
    fn model_id(&self) -> &str {
        "concept-test"
    }

    fn dimension(&self) -> usize {
        3
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0; 3];
        for word in text.split_whitespace() {
            let word = word.to_lowercase();
            for (axis, group) in [ANIMALS, VEHICLES, WEATHER].iter().enumerate() {
                if group.contains(&word.as_str()) {
                    vector[axis] += 1.0;
                }
            }
        }
        Ok(vector)
    }
}

fn equal_weights() -> RetrievalConfig {
    RetrievalConfig {
        fusion: FusionConfig {
            method: FusionMethod::ConvexCombination,
            lexical_weight: 0.5,
            vector_weight: 0.5,
            ..FusionConfig::default()
        },
        ..RetrievalConfig::default()
    }
}

/// D1 matches "zebra" lexically, D2 is about canines, D3 about cars.
async fn three_document_service() -> RetrievalService<InMemoryDocumentStore> {
    let store = InMemoryDocumentStore::new();
    for (id, text) in [
        ("D1", "zebra stripes savanna"),
        ("D2", "puppy hound"),
        ("D3", "automobile engine"),
    ] {
        store
            .put(&DocId::from(id), &Document::new(id, text))
            .await
            .unwrap();
    }
    RetrievalService::open(store, Arc::new(ConceptEmbedder), equal_weights())
        .await
        .unwrap()
}

fn ids(response: &SearchResponse) -> Vec<&str> {
    response.hits.iter().map(|h| h.document_id.as_str()).collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_lexical_and_semantic_matches_both_surface() {
    let service = three_document_service().await;

    let response = service.search("zebra canine", 2, None).await.unwrap();
    let mut top = ids(&response);
    top.sort_unstable();
    assert_eq!(top, vec!["D1", "D2"]);
    assert!(!response.is_partial());

    let d1 = response.hits.iter().find(|h| h.document_id.as_str() == "D1").unwrap();
    let d2 = response.hits.iter().find(|h| h.document_id.as_str() == "D2").unwrap();
    assert!(d1.lexical_score.unwrap() > d2.lexical_score.unwrap());
    assert!(d2.vector_score.unwrap() > d1.vector_score.unwrap());
}

#[tokio::test]
async fn test_new_document_found_by_vector_before_rebuild() {
    let service = three_document_service().await;

    service
        .add_document(Document::new("D4", "wolf"))
        .await
        .unwrap();

    let response = service.search("canine", 4, None).await.unwrap();
    let d4 = response
        .hits
        .iter()
        .find(|h| h.document_id.as_str() == "D4")
        .expect("D4 should be found through the vector index");
    assert!(d4.matched_sources.contains(&SourceKind::Vector));
    assert!(d4.lexical_score.is_none());

    // Lexical snapshot has not caught up yet
    assert_eq!(service.stats().await.unwrap().lexical_documents, 3);
}

#[tokio::test]
async fn test_deleted_document_never_returned() {
    let service = three_document_service().await;

    let before = service.search("puppy hound", 3, None).await.unwrap();
    assert_eq!(before.hits[0].document_id.as_str(), "D2");
    assert_eq!(
        before.hits[0].matched_sources,
        vec![SourceKind::Lexical, SourceKind::Vector]
    );

    assert!(service.delete_document(&DocId::from("D2")).await.unwrap());

    // Before the lexical rebuild: the stale snapshot still holds D2
    let response = service.search("puppy hound", 3, None).await.unwrap();
    assert!(!ids(&response).contains(&"D2"));

    service.rebuild_lexical().await.unwrap();
    let response = service.search("puppy hound", 3, None).await.unwrap();
    assert!(!ids(&response).contains(&"D2"));
}

#[tokio::test]
async fn test_filter_pushdown_returns_only_matching_tenant() {
    let store = InMemoryDocumentStore::new();
    for (id, text, company) in [
        ("y1", "puppy hound puppy", "Y"),
        ("y2", "puppy puppy", "Y"),
        ("x1", "hound", "X"),
        ("x2", "automobile", "X"),
    ] {
        let doc = Document::new(id, text).with_metadata("company_id", company);
        store.put(&doc.id, &doc).await.unwrap();
    }
    let service = RetrievalService::open(store, Arc::new(ConceptEmbedder), equal_weights())
        .await
        .unwrap();

    let unfiltered = service.search("puppy hound", 2, None).await.unwrap();
    assert_eq!(unfiltered.hits[0].document_id.as_str(), "y1");

    let filter = MetadataFilter::new().with("company_id", "X");
    let filtered = service.search("puppy hound", 2, Some(&filter)).await.unwrap();
    assert!(!filtered.hits.is_empty());
    assert!(filtered
        .hits
        .iter()
        .all(|h| h.metadata.get("company_id").map(String::as_str) == Some("X")));
    assert_eq!(filtered.hits[0].document_id.as_str(), "x1");
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_restart_from_redb_store_and_snapshots() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("documents.redb");
    let index_dir = temp.path().join("indices");

    let before = {
        let store = RedbDocumentStore::open(&db_path).unwrap();
        let service = RetrievalService::open(store, Arc::new(ConceptEmbedder), equal_weights())
            .await
            .unwrap();
        for (id, text) in [
            ("a", "storm cloud over the harbour"),
            ("b", "puppy chasing rain"),
            ("c", "truck engine repair"),
        ] {
            service.add_document(Document::new(id, text)).await.unwrap();
        }
        service.persist_indices(&index_dir).await.unwrap();
        service.search("rain storm", 3, None).await.unwrap()
    };

    let store = RedbDocumentStore::open(&db_path).unwrap();
    assert_eq!(store.count().await.unwrap(), 3);
    let service = RetrievalService::open_with_snapshots(
        store,
        Arc::new(ConceptEmbedder),
        equal_weights(),
        &index_dir,
    )
    .await
    .unwrap();

    let after = service.search("rain storm", 3, None).await.unwrap();
    assert_eq!(ids(&before), ids(&after));
    for (b, a) in before.hits.iter().zip(&after.hits) {
        assert!((b.score - a.score).abs() < 1e-6);
    }
    service.check_consistency().await.unwrap();
}

#[tokio::test]
async fn test_restart_without_snapshots_rebuilds_from_store() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("documents.redb");

    {
        let store = RedbDocumentStore::open(&db_path).unwrap();
        let service = RetrievalService::new(
            store,
            Arc::new(ConceptEmbedder),
            RetrievalConfig::default(),
        )
        .unwrap();
        service
            .add_document(Document::new("a", "canine").with_metadata("lang", "en"))
            .await
            .unwrap();
    }

    let store = RedbDocumentStore::open(&db_path).unwrap();
    let service = RetrievalService::open_with_snapshots(
        store,
        Arc::new(ConceptEmbedder),
        RetrievalConfig::default(),
        &temp.path().join("missing"),
    )
    .await
    .unwrap();

    let stats = service.stats().await.unwrap();
    assert_eq!(stats.vector_live, 1);
    assert_eq!(stats.lexical_documents, 1);

    let filter = MetadataFilter::new().with("lang", "en");
    let response = service.search("canine", 4, Some(&filter)).await.unwrap();
    assert_eq!(ids(&response), vec!["a"]);
}
