//! Output formatting for command results.
//!
//! Supports both human-readable terminal output and JSON for scripting.

use crate::commands::{IngestSummary, RebuildSummary};
use fathom_core::search::{SearchHit, SearchResponse, ServiceStats, SourceKind};
use serde::Serialize;
use std::collections::BTreeMap;

/// Maximum characters to show in text snippet
const SNIPPET_MAX_LEN: usize = 200;

/// JSON output structure for search results
#[derive(Serialize)]
pub struct JsonOutput {
    pub query: String,
    /// True when one retriever failed and only the other contributed
    pub partial: bool,
    /// Failed retrievers and their errors
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub results: Vec<JsonHit>,
}

/// Single hit in JSON format
#[derive(Serialize)]
pub struct JsonHit {
    pub id: String,
    /// Fused score
    pub score: f32,
    /// BM25 score, if the lexical index ranked this document
    pub lexical_score: Option<f32>,
    /// Similarity score, if the vector index ranked this document
    pub vector_score: Option<f32>,
    pub sources: Vec<SourceKind>,
    pub metadata: BTreeMap<String, String>,
    pub snippet: String,
}

impl From<&SearchHit> for JsonHit {
    fn from(hit: &SearchHit) -> Self {
        Self {
            id: hit.document_id.to_string(),
            score: hit.score,
            lexical_score: hit.lexical_score,
            vector_score: hit.vector_score,
            sources: hit.matched_sources.clone(),
            metadata: hit.metadata.clone(),
            snippet: truncate_text(&hit.text, SNIPPET_MAX_LEN),
        }
    }
}

/// Formats search results as JSON.
pub fn format_json(query: &str, response: &SearchResponse) -> String {
    let warnings = response
        .warning
        .iter()
        .flat_map(|w| w.failed_sources.iter())
        .map(|(source, error)| format!("{}: {}", source, error))
        .collect();
    let output = JsonOutput {
        query: query.to_string(),
        partial: response.is_partial(),
        warnings,
        results: response.hits.iter().map(JsonHit::from).collect(),
    };
    serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
}

/// Formats search results for human-readable terminal output.
pub fn format_human(query: &str, response: &SearchResponse) -> String {
    let mut output = String::new();
    if let Some(warning) = &response.warning {
        output.push_str(&format!("Warning: partial results ({})\n\n", warning));
    }

    let hits = &response.hits;
    if hits.is_empty() {
        output.push_str(&format!("No results found for \"{}\"", query));
        return output;
    }

    output.push_str(&format!(
        "Found {} result{} for \"{}\":\n\n",
        hits.len(),
        if hits.len() == 1 { "" } else { "s" },
        query
    ));

    for (i, hit) in hits.iter().enumerate() {
        output.push_str(&format!(
            "{}. {} (score: {:.2})\n",
            i + 1,
            hit.document_id,
            hit.score
        ));

        let mut score_parts = Vec::new();
        if let Some(ls) = hit.lexical_score {
            score_parts.push(format!("keyword: {:.2}", ls));
        }
        if let Some(vs) = hit.vector_score {
            score_parts.push(format!("semantic: {:.2}", vs));
        }
        if !score_parts.is_empty() {
            output.push_str(&format!("   [{}]\n", score_parts.join(", ")));
        }

        if !hit.metadata.is_empty() {
            let pairs: Vec<String> = hit
                .metadata
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            output.push_str(&format!("   {}\n", pairs.join(" ")));
        }

        let snippet = truncate_text(&hit.text, SNIPPET_MAX_LEN);
        output.push_str(&format!("   {}\n", indent_text(&snippet, "   ")));
        output.push('\n');
    }

    output.trim_end().to_string()
}

/// Formats an ingest summary.
pub fn format_ingest(summary: &IngestSummary) -> String {
    let mut output = format!(
        "Ingested {} document{} ({} added, {} updated)",
        summary.added + summary.updated,
        if summary.added + summary.updated == 1 { "" } else { "s" },
        summary.added,
        summary.updated
    );
    if summary.pending > 0 {
        output.push_str(&format!(
            "\n{} pending vector reindex; run `fathom rebuild` to retry",
            summary.pending
        ));
    }
    output
}

/// Formats a rebuild summary.
pub fn format_rebuild(summary: &RebuildSummary) -> String {
    let reindex = &summary.reindex;
    let mut lines = vec![
        format!(
            "Reindexed {} pending document{} ({} removed, {} still pending)",
            reindex.reindexed,
            if reindex.reindexed == 1 { "" } else { "s" },
            reindex.removed,
            reindex.still_pending
        ),
        format!(
            "Rebuilt lexical index over {} document{}",
            summary.lexical_documents,
            if summary.lexical_documents == 1 { "" } else { "s" }
        ),
    ];
    if let Some(compaction) = &summary.compaction {
        lines.push(format!(
            "Compacted vector index: {} slots removed in {}ms",
            compaction.slots_removed, compaction.duration_ms
        ));
    }
    lines.join("\n")
}

/// Formats index statistics as JSON.
pub fn format_stats_json(stats: &ServiceStats) -> String {
    serde_json::to_string_pretty(stats).unwrap_or_else(|_| "{}".to_string())
}

/// Formats index statistics for the terminal.
pub fn format_stats_human(stats: &ServiceStats) -> String {
    let mut output = String::new();
    output.push_str(&format!("Documents:        {}\n", stats.documents));
    output.push_str(&format!("Pending reindex:  {}\n", stats.pending_reindex));
    output.push_str(&format!(
        "Vector index:     {} live / {} slots ({:.1}% tombstones{})\n",
        stats.vector_live,
        stats.vector_slots,
        stats.tombstone_ratio * 100.0,
        if stats.needs_compaction {
            ", compaction advised"
        } else {
            ""
        }
    ));
    output.push_str(&format!(
        "Lexical index:    {} documents, {} stale\n",
        stats.lexical_documents, stats.lexical_stale
    ));
    output.push_str(&format!(
        "Embedding:        {} ({} dims)\n",
        stats.model_id, stats.dimension
    ));
    output.push_str(&format!(
        "Settings:         {} / {} / {} tokenizer / {} fusion",
        stats.index_kind, stats.metric, stats.tokenizer, stats.fusion
    ));
    output
}

/// Truncates text to a maximum length, adding ellipsis if needed.
fn truncate_text(text: &str, max_len: usize) -> String {
    let text = text.trim();
    if text.len() <= max_len {
        return text.to_string();
    }

    // Back off to a char boundary, then to a word boundary
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let truncated = &text[..end];
    if let Some(last_space) = truncated.rfind(' ') {
        format!("{}...", &truncated[..last_space])
    } else {
        format!("{}...", truncated)
    }
}

/// Indents all lines of text after the first line.
fn indent_text(text: &str, indent: &str) -> String {
    text.lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 {
                line.to_string()
            } else {
                format!("{}{}", indent, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fathom_core::search::{
        DistanceMetric, DocId, FusionMethod, IndexKind, PartialResultWarning, ReindexReport,
        TokenizerKind,
    };

    fn make_hit(id: &str, text: &str, score: f32) -> SearchHit {
        SearchHit {
            document_id: DocId::from(id),
            text: text.to_string(),
            metadata: BTreeMap::from([("company_id".to_string(), "acme".to_string())]),
            score,
            matched_sources: vec![SourceKind::Lexical, SourceKind::Vector],
            lexical_score: Some(score * 2.0),
            vector_score: Some(score * 0.9),
        }
    }

    fn response(hits: Vec<SearchHit>) -> SearchResponse {
        SearchResponse {
            hits,
            warning: None,
        }
    }

    #[test]
    fn test_format_human_empty() {
        let output = format_human("test query", &response(vec![]));
        assert!(output.contains("No results found"));
    }

    #[test]
    fn test_format_human_single() {
        let output = format_human("test", &response(vec![make_hit("doc-1", "Test content", 0.85)]));
        assert!(output.contains("1 result"));
        assert!(output.contains("doc-1"));
        assert!(output.contains("0.85"));
        assert!(output.contains("company_id=acme"));
    }

    #[test]
    fn test_format_human_partial_warning() {
        let mut partial = response(vec![make_hit("doc-1", "Test content", 0.5)]);
        partial.warning = Some(PartialResultWarning {
            failed_sources: vec![(SourceKind::Vector, "timed out".to_string())],
        });
        let output = format_human("test", &partial);
        assert!(output.starts_with("Warning: partial results"));
        assert!(output.contains("timed out"));
    }

    #[test]
    fn test_format_json() {
        let output = format_json("query", &response(vec![make_hit("doc-1", "Content here", 0.5)]));
        assert!(output.contains("\"query\": \"query\""));
        assert!(output.contains("\"id\": \"doc-1\""));
        assert!(output.contains("\"score\": 0.5"));
        assert!(output.contains("\"partial\": false"));
        assert!(!output.contains("warnings"));
    }

    #[test]
    fn test_format_ingest_and_rebuild() {
        let ingest = format_ingest(&IngestSummary {
            added: 2,
            updated: 1,
            pending: 1,
        });
        assert!(ingest.contains("Ingested 3 documents"));
        assert!(ingest.contains("1 pending"));

        let rebuild = format_rebuild(&RebuildSummary {
            reindex: ReindexReport::default(),
            lexical_documents: 1,
            compaction: None,
        });
        assert!(rebuild.contains("over 1 document"));
        assert!(!rebuild.contains("Compacted"));
    }

    #[test]
    fn test_format_stats_human() {
        let stats = ServiceStats {
            documents: 10,
            pending_reindex: 0,
            vector_live: 6,
            vector_slots: 10,
            tombstone_ratio: 0.4,
            needs_compaction: true,
            lexical_documents: 10,
            lexical_stale: 2,
            model_id: "hashing-64".to_string(),
            dimension: 64,
            index_kind: IndexKind::Hnsw,
            metric: DistanceMetric::Cosine,
            tokenizer: TokenizerKind::Word,
            fusion: FusionMethod::ReciprocalRank,
        };
        let output = format_stats_human(&stats);
        assert!(output.contains("6 live / 10 slots"));
        assert!(output.contains("40.0% tombstones, compaction advised"));
        assert!(output.contains("2 stale"));
    }

    #[test]
    fn test_truncate_text() {
        let short = "Short text";
        assert_eq!(truncate_text(short, 50), short);

        let long = "This is a much longer text that should be truncated at a reasonable point";
        let truncated = truncate_text(long, 30);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 33); // 30 + "..."

        // Never splits a multi-byte character
        let accented = "ééééééééééé";
        assert!(truncate_text(accented, 5).ends_with("..."));
    }
}
