//! Result fusion for hybrid search
//!
//! Two interchangeable algorithms:
//! - Reciprocal Rank Fusion (RRF), the default: needs no score
//!   normalization across heterogeneous scales (cosine vs. BM25),
//!   only rank position
//! - Weighted fusion: min-max normalizes each list, then combines
//!   with configured weights
//!
//! Fusion is deterministic for identical inputs. Ties are broken by
//! semantic rank, then keyword rank, then insertion order (the sort
//! is stable). A fusion failure falls back to the semantic list
//! (keyword when semantic is empty) and never aborts the search.

use super::{FusionInfo, SearchResult, SourceType};
use docfuse_common::config::RetrievalConfig;
use docfuse_common::errors::{AppError, Result};
use std::collections::HashMap;

/// Fusion algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionMethod {
    Rrf,
    Weighted,
}

impl FusionMethod {
    /// Parse the configured method name, defaulting to RRF
    pub fn from_config(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "rrf" => FusionMethod::Rrf,
            "weighted" => FusionMethod::Weighted,
            other => {
                tracing::warn!(method = other, "Unknown fusion method, using RRF");
                FusionMethod::Rrf
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FusionMethod::Rrf => "rrf",
            FusionMethod::Weighted => "weighted",
        }
    }
}

/// Combines two independently-ranked, possibly-overlapping result
/// lists into one ranked list with comparable scores
#[derive(Debug, Clone)]
pub struct FusionEngine {
    method: FusionMethod,

    /// RRF damping constant (larger flattens top-rank influence)
    rrf_k: f32,

    /// Weight for normalized semantic scores (weighted fusion)
    semantic_weight: f32,

    /// Weight for normalized keyword scores (weighted fusion)
    keyword_weight: f32,
}

/// A unique chunk under consideration during fusion
struct Candidate {
    result: SearchResult,
    semantic_rank: Option<usize>,
    keyword_rank: Option<usize>,
    combined: f32,
}

impl FusionEngine {
    pub fn new(config: &RetrievalConfig) -> Self {
        Self {
            method: FusionMethod::from_config(&config.fusion_method),
            rrf_k: config.rrf_k,
            semantic_weight: config.semantic_weight,
            keyword_weight: config.keyword_weight,
        }
    }

    pub fn method(&self) -> FusionMethod {
        self.method
    }

    /// Fuse the two ranked lists into at most `top_k` results
    ///
    /// Never fails: on an internal fusion error the semantic list is
    /// returned truncated (or the keyword list when semantic is
    /// empty), with the error recorded in the returned diagnostics.
    pub fn fuse(
        &self,
        semantic_results: Vec<SearchResult>,
        keyword_results: Vec<SearchResult>,
        top_k: usize,
    ) -> (Vec<SearchResult>, FusionInfo) {
        let semantic_count = semantic_results.len();
        let keyword_count = keyword_results.len();

        let outcome = match self.method {
            FusionMethod::Rrf => {
                self.reciprocal_rank_fusion(&semantic_results, &keyword_results, top_k)
            }
            FusionMethod::Weighted => {
                self.weighted_fusion(&semantic_results, &keyword_results, top_k)
            }
        };

        match outcome {
            Ok((results, info)) => {
                tracing::info!(
                    semantic = semantic_count,
                    keyword = keyword_count,
                    fused = results.len(),
                    method = self.method.as_str(),
                    "Fused search results"
                );
                (results, info)
            }
            Err(e) => {
                tracing::error!(error = %e, "Result fusion failed, falling back to single source");
                let fallback: Vec<SearchResult> = if semantic_results.is_empty() {
                    keyword_results.into_iter().take(top_k).collect()
                } else {
                    semantic_results.into_iter().take(top_k).collect()
                };
                let info = FusionInfo {
                    method: "fallback".to_string(),
                    semantic_count: Some(semantic_count),
                    keyword_count: Some(keyword_count),
                    error: Some(e.to_string()),
                    ..FusionInfo::default()
                };
                (fallback, info)
            }
        }
    }

    /// Reciprocal Rank Fusion: each list contributes 1/(k + rank) per
    /// chunk, summed across lists. Appearing in both lists yields two
    /// additive contributions, so overlapping chunks naturally rank
    /// above single-list chunks on ties.
    fn reciprocal_rank_fusion(
        &self,
        semantic_results: &[SearchResult],
        keyword_results: &[SearchResult],
        top_k: usize,
    ) -> Result<(Vec<SearchResult>, FusionInfo)> {
        let mut candidates = Self::collect_candidates(semantic_results, keyword_results);

        for candidate in &mut candidates {
            let mut score = 0.0f32;
            if let Some(rank) = candidate.semantic_rank {
                score += 1.0 / (self.rrf_k + rank as f32);
            }
            if let Some(rank) = candidate.keyword_rank {
                score += 1.0 / (self.rrf_k + rank as f32);
            }
            candidate.combined = score;
        }

        let overlap = candidates
            .iter()
            .filter(|c| c.semantic_rank.is_some() && c.keyword_rank.is_some())
            .count();
        let total_unique = candidates.len();

        let results = Self::rank_and_take(candidates, top_k);

        let info = FusionInfo {
            method: "rrf".to_string(),
            rrf_k: Some(self.rrf_k),
            semantic_count: Some(semantic_results.len()),
            keyword_count: Some(keyword_results.len()),
            total_unique: Some(total_unique),
            overlap_count: Some(overlap),
            ..FusionInfo::default()
        };

        Ok((results, info))
    }

    /// Weighted fusion: min-max normalize each list's raw scores into
    /// [0,1], then combine as `sw * semantic + kw * keyword`
    fn weighted_fusion(
        &self,
        semantic_results: &[SearchResult],
        keyword_results: &[SearchResult],
        top_k: usize,
    ) -> Result<(Vec<SearchResult>, FusionInfo)> {
        let semantic_norm = Self::normalize_scores(semantic_results)?;
        let keyword_norm = Self::normalize_scores(keyword_results)?;

        let mut candidates = Self::collect_candidates(semantic_results, keyword_results);

        for candidate in &mut candidates {
            let mut score = 0.0f32;
            if let Some(rank) = candidate.semantic_rank {
                score += self.semantic_weight * semantic_norm[rank - 1];
            }
            if let Some(rank) = candidate.keyword_rank {
                score += self.keyword_weight * keyword_norm[rank - 1];
            }
            candidate.combined = score;
        }

        let overlap = candidates
            .iter()
            .filter(|c| c.semantic_rank.is_some() && c.keyword_rank.is_some())
            .count();
        let total_unique = candidates.len();

        let results = Self::rank_and_take(candidates, top_k);

        let info = FusionInfo {
            method: "weighted".to_string(),
            semantic_weight: Some(self.semantic_weight),
            keyword_weight: Some(self.keyword_weight),
            semantic_count: Some(semantic_results.len()),
            keyword_count: Some(keyword_results.len()),
            total_unique: Some(total_unique),
            overlap_count: Some(overlap),
            ..FusionInfo::default()
        };

        Ok((results, info))
    }

    /// Build the de-duplicated candidate set with 1-based ranks
    ///
    /// Candidates keep insertion order: semantic list first, then
    /// keyword-only chunks. A chunk present in both lists keeps the
    /// semantic payload and adopts the keyword hit's raw score and
    /// highlights, so no per-source information is lost.
    fn collect_candidates(
        semantic_results: &[SearchResult],
        keyword_results: &[SearchResult],
    ) -> Vec<Candidate> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut candidates: Vec<Candidate> = Vec::with_capacity(
            semantic_results.len() + keyword_results.len(),
        );

        for (rank0, result) in semantic_results.iter().enumerate() {
            if index.contains_key(result.chunk_id.as_str()) {
                // Duplicate id within one list; first occurrence wins
                continue;
            }
            index.insert(result.chunk_id.as_str(), candidates.len());
            candidates.push(Candidate {
                result: result.clone(),
                semantic_rank: Some(rank0 + 1),
                keyword_rank: None,
                combined: 0.0,
            });
        }

        for (rank0, result) in keyword_results.iter().enumerate() {
            match index.get(result.chunk_id.as_str()) {
                Some(&i) => {
                    let candidate = &mut candidates[i];
                    if candidate.keyword_rank.is_none() {
                        candidate.keyword_rank = Some(rank0 + 1);
                        candidate.result.keyword_score = result.keyword_score;
                        if candidate.result.highlights.is_none() {
                            candidate.result.highlights = result.highlights.clone();
                        }
                    }
                }
                None => {
                    index.insert(result.chunk_id.as_str(), candidates.len());
                    candidates.push(Candidate {
                        result: result.clone(),
                        semantic_rank: None,
                        keyword_rank: Some(rank0 + 1),
                        combined: 0.0,
                    });
                }
            }
        }

        candidates
    }

    /// Min-max normalize a list's raw scores into [0,1], positionally
    ///
    /// A constant list (max == min) normalizes every member to 1.0.
    /// Non-finite scores are a fusion error and trigger the fallback.
    fn normalize_scores(results: &[SearchResult]) -> Result<Vec<f32>> {
        if results.is_empty() {
            return Ok(Vec::new());
        }

        if results.iter().any(|r| !r.score.is_finite()) {
            return Err(AppError::Fusion {
                message: "non-finite score in input list".to_string(),
            });
        }

        let max = results.iter().map(|r| r.score).fold(f32::MIN, f32::max);
        let min = results.iter().map(|r| r.score).fold(f32::MAX, f32::min);
        let range = max - min;

        if range == 0.0 {
            return Ok(vec![1.0; results.len()]);
        }

        Ok(results.iter().map(|r| (r.score - min) / range).collect())
    }

    /// Sort candidates by combined score and materialize the top `top_k`
    ///
    /// Tie-break chain: combined score descending, then semantic rank,
    /// then keyword rank, then insertion order (stable sort).
    fn rank_and_take(mut candidates: Vec<Candidate>, top_k: usize) -> Vec<SearchResult> {
        candidates.sort_by(|a, b| {
            b.combined
                .partial_cmp(&a.combined)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    a.semantic_rank
                        .unwrap_or(usize::MAX)
                        .cmp(&b.semantic_rank.unwrap_or(usize::MAX))
                })
                .then_with(|| {
                    a.keyword_rank
                        .unwrap_or(usize::MAX)
                        .cmp(&b.keyword_rank.unwrap_or(usize::MAX))
                })
        });

        candidates
            .into_iter()
            .take(top_k)
            .map(|c| {
                let mut result = c.result;
                result.score = c.combined;
                result.source_type = match (c.semantic_rank, c.keyword_rank) {
                    (Some(_), Some(_)) => SourceType::Hybrid,
                    (Some(_), None) => SourceType::Semantic,
                    (None, _) => SourceType::Keyword,
                };
                result
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_result(id: &str, score: f32, source: SourceType) -> SearchResult {
        SearchResult {
            chunk_id: id.to_string(),
            content: format!("content of {}", id),
            file_path: format!("/docs/{}.pdf", id),
            file_name: format!("{}.pdf", id),
            chunk_index: 0,
            score,
            semantic_score: match source {
                SourceType::Semantic => Some(score),
                _ => None,
            },
            keyword_score: match source {
                SourceType::Keyword => Some(score),
                _ => None,
            },
            source_type: source,
            page_number: None,
            highlights: None,
            file_type: None,
            total_chunks: None,
        }
    }

    fn semantic(id: &str, score: f32) -> SearchResult {
        make_result(id, score, SourceType::Semantic)
    }

    fn keyword(id: &str, score: f32) -> SearchResult {
        make_result(id, score, SourceType::Keyword)
    }

    fn rrf_engine() -> FusionEngine {
        FusionEngine::new(&RetrievalConfig::default())
    }

    fn weighted_engine() -> FusionEngine {
        let config = RetrievalConfig {
            fusion_method: "weighted".to_string(),
            ..RetrievalConfig::default()
        };
        FusionEngine::new(&config)
    }

    #[test]
    fn test_rrf_expected_ordering() {
        // Semantic: A, B, C (ranks 1-3); keyword: B, D (ranks 1-2); k=60.
        // Scores: A=1/61, B=1/62+1/61, C=1/63, D=1/62.
        // Order: B, A, D (C dropped by top_k=3).
        let sem = vec![semantic("A", 0.9), semantic("B", 0.8), semantic("C", 0.7)];
        let kw = vec![keyword("B", 12.0), keyword("D", 9.0)];

        let (results, info) = rrf_engine().fuse(sem, kw, 3);

        let ids: Vec<&str> = results.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A", "D"]);

        assert!((results[0].score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-6);
        assert!((results[1].score - 1.0 / 61.0).abs() < 1e-6);
        assert!((results[2].score - 1.0 / 62.0).abs() < 1e-6);

        assert_eq!(results[0].source_type, SourceType::Hybrid);
        assert_eq!(results[1].source_type, SourceType::Semantic);
        assert_eq!(results[2].source_type, SourceType::Keyword);

        assert_eq!(info.method, "rrf");
        assert_eq!(info.rrf_k, Some(60.0));
        assert_eq!(info.semantic_count, Some(3));
        assert_eq!(info.keyword_count, Some(2));
        assert_eq!(info.total_unique, Some(4));
        assert_eq!(info.overlap_count, Some(1));
    }

    #[test]
    fn test_rrf_preserves_per_source_scores() {
        let sem = vec![semantic("A", 0.9), semantic("B", 0.8)];
        let mut kw_b = keyword("B", 12.0);
        kw_b.highlights = Some(vec!["a <em>match</em>".to_string()]);
        let kw = vec![kw_b];

        let (results, _) = rrf_engine().fuse(sem, kw, 10);

        let b = results.iter().find(|r| r.chunk_id == "B").unwrap();
        assert_eq!(b.semantic_score, Some(0.8));
        assert_eq!(b.keyword_score, Some(12.0));
        assert!(b.highlights.is_some());
    }

    #[test]
    fn test_no_duplicate_chunk_ids() {
        let sem = vec![semantic("A", 0.9), semantic("B", 0.8), semantic("C", 0.7)];
        let kw = vec![keyword("B", 3.0), keyword("A", 2.0), keyword("D", 1.0)];

        let (results, _) = rrf_engine().fuse(sem, kw, 10);

        let mut ids: Vec<&str> = results.iter().map(|r| r.chunk_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), results.len());
        assert_eq!(results.len(), 4);
    }

    #[test]
    fn test_truncation_to_top_k() {
        let sem: Vec<_> = (0..10).map(|i| semantic(&format!("s{}", i), 1.0 - i as f32 * 0.05)).collect();
        let kw: Vec<_> = (0..10).map(|i| keyword(&format!("k{}", i), 10.0 - i as f32)).collect();

        let (results, _) = rrf_engine().fuse(sem.clone(), kw.clone(), 5);
        assert_eq!(results.len(), 5);

        // top_k larger than the unique set returns everything
        let (results, _) = rrf_engine().fuse(sem, kw, 100);
        assert_eq!(results.len(), 20);
    }

    #[test]
    fn test_empty_keyword_list_degrades_to_semantic_order() {
        let sem = vec![semantic("X", 0.9), semantic("Y", 0.8), semantic("Z", 0.7)];

        let (results, _) = rrf_engine().fuse(sem, vec![], 2);

        let ids: Vec<&str> = results.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["X", "Y"]);
        assert!(results.iter().all(|r| r.source_type == SourceType::Semantic));
    }

    #[test]
    fn test_empty_semantic_list_degrades_to_keyword_order() {
        let kw = vec![keyword("X", 5.0), keyword("Y", 4.0)];

        let (results, _) = rrf_engine().fuse(vec![], kw, 10);

        let ids: Vec<&str> = results.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["X", "Y"]);
        assert!(results.iter().all(|r| r.source_type == SourceType::Keyword));
    }

    #[test]
    fn test_both_empty() {
        let (results, info) = rrf_engine().fuse(vec![], vec![], 10);
        assert!(results.is_empty());
        assert_eq!(info.total_unique, Some(0));
    }

    #[test]
    fn test_determinism() {
        let sem = vec![semantic("A", 0.9), semantic("B", 0.8), semantic("C", 0.7)];
        let kw = vec![keyword("C", 8.0), keyword("D", 7.0), keyword("E", 6.0)];

        let (first, _) = rrf_engine().fuse(sem.clone(), kw.clone(), 10);
        for _ in 0..5 {
            let (again, _) = rrf_engine().fuse(sem.clone(), kw.clone(), 10);
            let a: Vec<&str> = first.iter().map(|r| r.chunk_id.as_str()).collect();
            let b: Vec<&str> = again.iter().map(|r| r.chunk_id.as_str()).collect();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_rank_monotonicity() {
        // Single-list chunks: rank 1 must strictly outscore rank 2
        let sem = vec![semantic("A", 0.9), semantic("B", 0.8), semantic("C", 0.7)];

        let (results, _) = rrf_engine().fuse(sem, vec![], 10);

        for pair in results.windows(2) {
            assert!(pair[0].score > pair[1].score);
        }
    }

    #[test]
    fn test_tie_break_prefers_earlier_semantic_rank() {
        // Two single-list chunks at the same rank in different lists
        // tie on combined score; semantic rank breaks the tie.
        let sem = vec![semantic("S", 0.9)];
        let kw = vec![keyword("K", 5.0)];

        let (results, _) = rrf_engine().fuse(sem, kw, 10);

        assert_eq!(results[0].chunk_id, "S");
        assert_eq!(results[1].chunk_id, "K");
        assert!((results[0].score - results[1].score).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_fusion_ordering() {
        // Normalized semantic: A=1.0, B=0.0; keyword: B=1.0, C=0.0.
        // Combined: A=0.7, B=0.3, C=0.0.
        let sem = vec![semantic("A", 0.9), semantic("B", 0.5)];
        let kw = vec![keyword("B", 10.0), keyword("C", 2.0)];

        let (results, info) = weighted_engine().fuse(sem, kw, 10);

        let ids: Vec<&str> = results.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert!((results[0].score - 0.7).abs() < 1e-6);
        assert!((results[1].score - 0.3).abs() < 1e-6);
        assert_eq!(results[1].source_type, SourceType::Hybrid);
        assert_eq!(info.method, "weighted");
    }

    #[test]
    fn test_weighted_constant_list_normalizes_to_one() {
        let sem = vec![semantic("A", 0.5), semantic("B", 0.5)];

        let (results, _) = weighted_engine().fuse(sem, vec![], 10);

        // max == min: every member normalizes to 1.0, weighted by 0.7
        assert!(results.iter().all(|r| (r.score - 0.7).abs() < 1e-6));
        // Order falls back to semantic rank
        assert_eq!(results[0].chunk_id, "A");
        assert_eq!(results[1].chunk_id, "B");
    }

    #[test]
    fn test_weighted_nan_score_falls_back() {
        let sem = vec![semantic("A", f32::NAN), semantic("B", 0.5)];
        let kw = vec![keyword("C", 3.0)];

        let (results, info) = weighted_engine().fuse(sem, kw, 1);

        // Fallback: semantic list truncated to top_k, error recorded
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "A");
        assert_eq!(info.method, "fallback");
        assert!(info.error.is_some());
    }

    #[test]
    fn test_unknown_method_defaults_to_rrf() {
        let config = RetrievalConfig {
            fusion_method: "bayesian".to_string(),
            ..RetrievalConfig::default()
        };
        let engine = FusionEngine::new(&config);
        assert_eq!(engine.method(), FusionMethod::Rrf);
    }
}
