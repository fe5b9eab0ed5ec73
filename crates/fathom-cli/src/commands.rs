//! Command implementations.
//!
//! Each command works against a [`RetrievalService`] opened over the redb
//! store in the data directory. Index snapshots are loaded at startup and
//! written back by `main` after every mutating command.

use crate::config;
use anyhow::{anyhow, Context, Result};
use fathom_core::config::RetrievalConfig;
use fathom_core::embedding::build_provider;
use fathom_core::search::{
    CompactionStats, DocId, Document, MetadataFilter, ReindexReport, RetrievalService,
    SearchResponse,
};
use fathom_core::storage::{DocumentStore, RedbDocumentStore};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// Service type used by every command.
pub type Service = RetrievalService<RedbDocumentStore>;

/// Counts from an `ingest` run.
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// New documents stored
    pub added: usize,
    /// Existing documents replaced
    pub updated: usize,
    /// Documents stored but waiting for a vector reindex
    pub pending: usize,
}

/// What `rebuild` did.
#[derive(Debug, Serialize)]
pub struct RebuildSummary {
    pub reindex: ReindexReport,
    /// Documents in the rebuilt lexical index
    pub lexical_documents: usize,
    /// Present only when the vector index needed compaction
    pub compaction: Option<CompactionStats>,
}

/// Opens the store and indices under `data_dir`, creating it if needed.
pub async fn open_service(data_dir: &Path, retrieval_config: RetrievalConfig) -> Result<Service> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

    let db_path = config::database_path(data_dir);
    info!("Opening database: {}", db_path.display());
    let store = RedbDocumentStore::open(&db_path)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

    let embedder =
        build_provider(&retrieval_config.embedding).context("Failed to build embedding provider")?;

    RetrievalService::open_with_snapshots(
        store,
        embedder,
        retrieval_config,
        &config::index_dir(data_dir),
    )
    .await
    .context("Failed to open retrieval service")
}

/// Adds or replaces every document in a JSON Lines file.
///
/// Each non-blank line is a [`Document`] object. A document whose id is
/// already stored replaces the stored text and metadata.
pub async fn ingest(service: &Service, path: &Path) -> Result<IngestSummary> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut summary = IngestSummary::default();
    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let document: Document = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid document", path.display(), line_no + 1))?;

        let exists = service.store().get(&document.id).await?.is_some();
        let outcome = if exists {
            summary.updated += 1;
            service
                .update_document(&document.id, Some(document.text), Some(document.metadata))
                .await?
        } else {
            summary.added += 1;
            service.add_document(document).await?
        };

        if !outcome.is_indexed() {
            summary.pending += 1;
        }
    }

    if summary.pending > 0 {
        warn!(
            pending = summary.pending,
            "some documents were stored without vectors; run `fathom rebuild` to retry"
        );
    }
    info!(
        added = summary.added,
        updated = summary.updated,
        "ingest complete"
    );
    Ok(summary)
}

/// Runs a hybrid search restricted by `key=value` filters.
pub async fn search(
    service: &Service,
    query: &str,
    limit: usize,
    filters: &[String],
) -> Result<SearchResponse> {
    let filter = parse_filters(filters)?;
    let response = service
        .search(query, limit, filter.as_ref())
        .await
        .map_err(|e| anyhow!("Search failed: {}", e))?;
    Ok(response)
}

/// Deletes one document. Returns false if it did not exist.
pub async fn delete(service: &Service, id: &str) -> Result<bool> {
    let deleted = service.delete_document(&DocId::from(id)).await?;
    Ok(deleted)
}

/// Retries pending documents, rebuilds the lexical index and compacts the
/// vector index when tombstones pile up.
pub async fn rebuild(service: &Service) -> Result<RebuildSummary> {
    let reindex = service.reindex_pending().await?;
    let lexical_documents = service.rebuild_lexical().await?;

    let compaction = if service.stats().await?.needs_compaction {
        Some(service.compact_vectors().await?)
    } else {
        None
    };

    Ok(RebuildSummary {
        reindex,
        lexical_documents,
        compaction,
    })
}

/// Builds a filter from `key=value` arguments; `None` when there are none.
fn parse_filters(filters: &[String]) -> Result<Option<MetadataFilter>> {
    if filters.is_empty() {
        return Ok(None);
    }

    let mut filter = MetadataFilter::new();
    for raw in filters {
        let (key, value) = MetadataFilter::parse_pair(raw)
            .ok_or_else(|| anyhow!("Invalid filter \"{}\": expected key=value", raw))?;
        filter = filter.with(key, value);
    }
    Ok(Some(filter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_service() -> (TempDir, Service) {
        let dir = TempDir::new().unwrap();
        let service = open_service(dir.path(), RetrievalConfig::default())
            .await
            .unwrap();
        (dir, service)
    }

    fn write_jsonl(dir: &TempDir, name: &str, lines: &[&str]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    #[tokio::test]
    async fn test_ingest_adds_then_updates() {
        let (dir, service) = test_service().await;
        let path = write_jsonl(
            &dir,
            "docs.jsonl",
            &[
                r#"{"id": "a", "text": "rust borrow checker", "metadata": {"lang": "en"}}"#,
                "",
                r#"{"id": "b", "text": "tokio runtime"}"#,
            ],
        );

        let summary = ingest(&service, &path).await.unwrap();
        assert_eq!(
            summary,
            IngestSummary {
                added: 2,
                updated: 0,
                pending: 0
            }
        );

        let path = write_jsonl(
            &dir,
            "update.jsonl",
            &[r#"{"id": "a", "text": "lifetimes", "metadata": {}}"#],
        );
        let summary = ingest(&service, &path).await.unwrap();
        assert_eq!(summary.updated, 1);

        let stored = service.store().get(&DocId::from("a")).await.unwrap().unwrap();
        assert_eq!(stored.text, "lifetimes");
        assert!(stored.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_reports_line_number() {
        let (dir, service) = test_service().await;
        let path = write_jsonl(
            &dir,
            "bad.jsonl",
            &[r#"{"id": "a", "text": "ok"}"#, "{not json"],
        );

        let err = ingest(&service, &path).await.unwrap_err();
        assert!(err.to_string().contains(":2:"));
    }

    #[tokio::test]
    async fn test_search_with_filters() {
        let (dir, service) = test_service().await;
        let path = write_jsonl(
            &dir,
            "docs.jsonl",
            &[
                r#"{"id": "x", "text": "quarterly report", "metadata": {"company_id": "acme"}}"#,
                r#"{"id": "y", "text": "quarterly report", "metadata": {"company_id": "globex"}}"#,
            ],
        );
        ingest(&service, &path).await.unwrap();

        let response = search(&service, "quarterly", 5, &["company_id=acme".to_string()])
            .await
            .unwrap();
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].document_id.as_str(), "x");

        let err = search(&service, "quarterly", 5, &["nokey".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid filter"));
    }

    #[tokio::test]
    async fn test_delete_and_rebuild() {
        let (dir, service) = test_service().await;
        let path = write_jsonl(
            &dir,
            "docs.jsonl",
            &[r#"{"id": "a", "text": "alpha"}"#, r#"{"id": "b", "text": "beta"}"#],
        );
        ingest(&service, &path).await.unwrap();

        assert!(delete(&service, "a").await.unwrap());
        assert!(!delete(&service, "a").await.unwrap());

        let summary = rebuild(&service).await.unwrap();
        assert_eq!(summary.lexical_documents, 1);
        assert_eq!(summary.reindex, ReindexReport::default());

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.lexical_stale, 0);
    }

    #[tokio::test]
    async fn test_reopen_after_persist() {
        let dir = TempDir::new().unwrap();
        {
            let service = open_service(dir.path(), RetrievalConfig::default())
                .await
                .unwrap();
            service
                .add_document(Document::new("a", "persisted text"))
                .await
                .unwrap();
            service
                .persist_indices(&config::index_dir(dir.path()))
                .await
                .unwrap();
        }

        let service = open_service(dir.path(), RetrievalConfig::default())
            .await
            .unwrap();
        let response = search(&service, "persisted", 3, &[]).await.unwrap();
        assert_eq!(response.hits[0].document_id.as_str(), "a");
    }
}
