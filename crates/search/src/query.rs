//! Query preprocessing and validation
//!
//! Turns a raw user query into a canonical, immutable `SearchQuery`:
//! validation, length capping, text normalization, inline filter
//! extraction, mode normalization, and parameter defaulting. Pure
//! aside from logging.

use crate::retrieval::{SearchMode, SearchQuery};
use docfuse_common::config::RetrievalConfig;
use docfuse_common::errors::{AppError, Result};
use regex_lite::Regex;
use std::collections::BTreeMap;

/// Bounds enforced on the requested result count
pub const TOP_K_MIN: usize = 1;
pub const TOP_K_MAX: usize = 100;

/// Handles query preprocessing and validation
pub struct QueryProcessor {
    max_query_length: usize,
    default_top_k: usize,
    default_min_similarity: f32,

    strip_pattern: Regex,
    whitespace_pattern: Regex,
    filetype_pattern: Regex,
    source_pattern: Regex,
}

impl QueryProcessor {
    pub fn new(config: &RetrievalConfig) -> Self {
        Self {
            max_query_length: config.max_query_length,
            default_top_k: config.final_top_k,
            default_min_similarity: config.min_similarity_threshold,

            // Word characters, whitespace, and basic punctuation survive
            strip_pattern: Regex::new(r#"[^\w\s\-.,?!:;'"]+"#).expect("valid strip pattern"),
            whitespace_pattern: Regex::new(r"\s+").expect("valid whitespace pattern"),
            filetype_pattern: Regex::new(r"(?i)filetype:(\w+)").expect("valid filetype pattern"),
            source_pattern: Regex::new(r"(?i)source:(\S+)").expect("valid source pattern"),
        }
    }

    /// Process and validate a search query
    ///
    /// Fails only on empty/whitespace input; everything else (overlong
    /// text, unknown mode, out-of-range parameters) is repaired with a
    /// warning.
    pub fn process(
        &self,
        raw_query: &str,
        mode: &str,
        top_k: Option<usize>,
        min_similarity: Option<f32>,
        filters: Option<BTreeMap<String, String>>,
    ) -> Result<SearchQuery> {
        if raw_query.trim().is_empty() {
            return Err(AppError::Validation {
                message: "Query cannot be empty".to_string(),
                field: Some("query".to_string()),
            });
        }

        let raw_query = self.truncate(raw_query);

        // Inline filters come out of the matching text but explicit
        // filters win on key collision
        let (cleaned, inline_filters) = self.extract_inline_filters(&raw_query);
        let filters = Self::merge_filters(inline_filters, filters);

        let normalized = self.normalize(&cleaned);
        if normalized.is_empty() {
            return Err(AppError::Validation {
                message: "Query is empty after normalization".to_string(),
                field: Some("query".to_string()),
            });
        }

        let mode = self.normalize_mode(mode);

        let top_k = top_k
            .unwrap_or(self.default_top_k)
            .clamp(TOP_K_MIN, TOP_K_MAX);
        let min_similarity = min_similarity
            .unwrap_or(self.default_min_similarity)
            .clamp(0.0, 1.0);

        Ok(SearchQuery {
            raw_text: raw_query,
            normalized_text: normalized,
            mode,
            top_k,
            min_similarity,
            filters,
        })
    }

    /// Cap the query at the configured maximum, on a char boundary
    fn truncate(&self, raw: &str) -> String {
        if raw.chars().count() <= self.max_query_length {
            return raw.to_string();
        }

        tracing::warn!(
            original_len = raw.chars().count(),
            max_len = self.max_query_length,
            "Query truncated"
        );
        raw.chars().take(self.max_query_length).collect()
    }

    /// Normalize query text
    ///
    /// Trim, lowercase, strip characters outside the allowed set,
    /// collapse whitespace runs, and collapse consecutive duplicate
    /// punctuation ("procedures!!" -> "procedures!"). Idempotent.
    pub fn normalize(&self, text: &str) -> String {
        let text = text.trim().to_lowercase();
        let text = self.strip_pattern.replace_all(&text, " ");
        let text = self.whitespace_pattern.replace_all(&text, " ");

        let mut out = String::with_capacity(text.len());
        let mut prev: Option<char> = None;
        for c in text.trim().chars() {
            if !c.is_alphanumeric() && !c.is_whitespace() && prev == Some(c) {
                continue;
            }
            out.push(c);
            prev = Some(c);
        }
        out
    }

    /// Validate and normalize the search mode
    ///
    /// Unrecognized values default to hybrid with a warning, never an
    /// error.
    pub fn normalize_mode(&self, mode: &str) -> SearchMode {
        match mode.trim().to_ascii_lowercase().as_str() {
            "hybrid" => SearchMode::Hybrid,
            "semantic" => SearchMode::Semantic,
            "keyword" => SearchMode::Keyword,
            other => {
                tracing::warn!(mode = other, "Invalid search mode, defaulting to hybrid");
                SearchMode::Hybrid
            }
        }
    }

    /// Extract `filetype:<value>` and `source:<value>` tokens from the
    /// query text (case-insensitive), removing them from the text used
    /// for matching
    fn extract_inline_filters(&self, query: &str) -> (String, BTreeMap<String, String>) {
        let mut filters = BTreeMap::new();
        let mut cleaned = query.to_string();

        if let Some(caps) = self.filetype_pattern.captures(query) {
            filters.insert("filetype".to_string(), caps[1].to_ascii_lowercase());
            cleaned = self.filetype_pattern.replace_all(&cleaned, "").into_owned();
        }

        if let Some(caps) = self.source_pattern.captures(&cleaned) {
            filters.insert("source".to_string(), caps[1].to_string());
            cleaned = self.source_pattern.replace_all(&cleaned, "").into_owned();
        }

        (cleaned, filters)
    }

    /// Merge inline filters with explicit caller filters; explicit
    /// entries win on key collision
    fn merge_filters(
        inline: BTreeMap<String, String>,
        explicit: Option<BTreeMap<String, String>>,
    ) -> Option<BTreeMap<String, String>> {
        let mut merged = inline;
        if let Some(explicit) = explicit {
            for (k, v) in explicit {
                merged.insert(k, v);
            }
        }
        if merged.is_empty() {
            None
        } else {
            Some(merged)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> QueryProcessor {
        QueryProcessor::new(&RetrievalConfig::default())
    }

    #[test]
    fn test_empty_query_rejected() {
        let err = processor().process("   ", "hybrid", None, None, None);
        assert!(matches!(err, Err(AppError::Validation { .. })));
    }

    #[test]
    fn test_basic_normalization() {
        let q = processor()
            .process("  What   Is RAG?  ", "hybrid", None, None, None)
            .unwrap();
        assert_eq!(q.normalized_text, "what is rag?");
        assert_eq!(q.raw_text, "  What   Is RAG?  ");
    }

    #[test]
    fn test_inline_filetype_filter_extraction() {
        let q = processor()
            .process("  Safety Procedures!! filetype:PDF  ", "hybrid", None, None, None)
            .unwrap();
        assert_eq!(q.normalized_text, "safety procedures!");
        assert_eq!(
            q.filters.as_ref().unwrap().get("filetype"),
            Some(&"pdf".to_string())
        );
    }

    #[test]
    fn test_inline_source_filter_extraction() {
        let q = processor()
            .process("onboarding source:handbook.docx checklist", "hybrid", None, None, None)
            .unwrap();
        assert_eq!(q.normalized_text, "onboarding checklist");
        assert_eq!(
            q.filters.as_ref().unwrap().get("source"),
            Some(&"handbook.docx".to_string())
        );
    }

    #[test]
    fn test_explicit_filters_win_on_collision() {
        let mut explicit = BTreeMap::new();
        explicit.insert("filetype".to_string(), "docx".to_string());

        let q = processor()
            .process("reports filetype:pdf", "hybrid", None, None, Some(explicit))
            .unwrap();
        assert_eq!(
            q.filters.as_ref().unwrap().get("filetype"),
            Some(&"docx".to_string())
        );
    }

    #[test]
    fn test_normalization_idempotent() {
        let p = processor();
        for raw in [
            "  Safety Procedures!! filetype:PDF  ",
            "hello---world...",
            "UPPER case   with\tmixed\nwhitespace",
            "symbols @#$% stripped & kept: -.,?!",
        ] {
            let once = p.normalize(raw);
            let twice = p.normalize(&once);
            assert_eq!(once, twice, "normalize not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn test_special_characters_stripped() {
        let q = processor()
            .process("budget <2026> @finance #summary", "hybrid", None, None, None)
            .unwrap();
        assert_eq!(q.normalized_text, "budget 2026 finance summary");
    }

    #[test]
    fn test_overlength_query_truncated_not_rejected() {
        let long = "word ".repeat(400); // 2000 chars
        let q = processor().process(&long, "hybrid", None, None, None).unwrap();
        assert_eq!(q.raw_text.chars().count(), 1000);
    }

    #[test]
    fn test_unknown_mode_defaults_to_hybrid() {
        let q = processor()
            .process("query", "fuzzy", None, None, None)
            .unwrap();
        assert_eq!(q.mode, SearchMode::Hybrid);
    }

    #[test]
    fn test_mode_case_insensitive() {
        let q = processor()
            .process("query", " Semantic ", None, None, None)
            .unwrap();
        assert_eq!(q.mode, SearchMode::Semantic);
    }

    #[test]
    fn test_parameter_defaults_and_clamping() {
        let p = processor();

        let q = p.process("query", "hybrid", None, None, None).unwrap();
        assert_eq!(q.top_k, 10);
        assert_eq!(q.min_similarity, 0.0);

        let q = p.process("query", "hybrid", Some(5000), Some(7.5), None).unwrap();
        assert_eq!(q.top_k, TOP_K_MAX);
        assert_eq!(q.min_similarity, 1.0);
    }

    #[test]
    fn test_query_of_only_filters_rejected() {
        let err = processor().process("filetype:pdf", "hybrid", None, None, None);
        assert!(matches!(err, Err(AppError::Validation { .. })));
    }
}
