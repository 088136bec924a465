//! Reciprocal Rank Fusion.
//!
//! `score(m) = Σ 1 / (k + rank)` over every ranking that contains `m`, with
//! 1-based ranks. The output is a pure function of the input rankings and `k`.

use std::cmp::Ordering;
use std::collections::HashMap;

use mnemo_adapters::{MemoryId, RetrievalMethod, RetrievalResult};

/// Result order used everywhere: score descending, then newer timestamp,
/// then smaller id.
pub fn compare_ranked(a: &RetrievalResult, b: &RetrievalResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.memory.timestamp.cmp(&a.memory.timestamp))
        .then_with(|| a.memory.id.cmp(&b.memory.id))
}

pub fn sort_ranked(results: &mut [RetrievalResult]) {
    results.sort_by(compare_ranked);
}

/// Fuse ranked lists into one, keeping at most `top_k` results.
///
/// A memory repeated within one list only counts at its best rank. The
/// memory body kept for each id is the one from the first list that
/// contains it.
pub fn reciprocal_rank_fusion(
    rankings: &[Vec<RetrievalResult>],
    k: f64,
    top_k: usize,
) -> Vec<RetrievalResult> {
    let mut fused: HashMap<MemoryId, RetrievalResult> = HashMap::new();

    for ranking in rankings {
        let mut seen: Vec<&MemoryId> = Vec::with_capacity(ranking.len());
        for (idx, hit) in ranking.iter().enumerate() {
            if seen.contains(&&hit.memory.id) {
                continue;
            }
            seen.push(&hit.memory.id);
            let contribution = 1.0 / (k + (idx + 1) as f64);
            fused
                .entry(hit.memory.id.clone())
                .and_modify(|r| r.score += contribution)
                .or_insert_with(|| {
                    RetrievalResult::new(hit.memory.clone(), contribution, RetrievalMethod::Fused)
                });
        }
    }

    let mut out: Vec<RetrievalResult> = fused.into_values().collect();
    sort_ranked(&mut out);
    out.truncate(top_k);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_adapters::{Memory, MemoryType};

    fn hit(memory: &Memory, method: RetrievalMethod) -> RetrievalResult {
        RetrievalResult::new(memory.clone(), 0.5, method)
    }

    fn mems(n: usize) -> Vec<Memory> {
        let base = chrono::Utc::now();
        (0..n)
            .map(|i| {
                let mut m = Memory::new(format!("m{i}"), MemoryType::Semantic);
                m.id = MemoryId::from(format!("id-{i}"));
                m.timestamp = base;
                m
            })
            .collect()
    }

    #[test]
    fn test_memory_in_both_lists_wins() {
        let m = mems(3);
        let graph = vec![hit(&m[0], RetrievalMethod::Graph), hit(&m[1], RetrievalMethod::Graph)];
        let semantic = vec![
            hit(&m[2], RetrievalMethod::Semantic),
            hit(&m[1], RetrievalMethod::Semantic),
        ];

        let out = reciprocal_rank_fusion(&[graph, semantic], 60.0, 10);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].memory.id, m[1].id);
        assert!((out[0].score - (2.0 / 62.0)).abs() < 1e-12);
        assert!(out.iter().all(|r| r.method == RetrievalMethod::Fused));
    }

    #[test]
    fn test_ties_break_on_id_then_truncate() {
        let m = mems(2);
        let a = vec![hit(&m[1], RetrievalMethod::Graph)];
        let b = vec![hit(&m[0], RetrievalMethod::Semantic)];

        let out = reciprocal_rank_fusion(&[a, b], 60.0, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].memory.id, m[0].id);
    }

    #[test]
    fn test_newer_memory_wins_tie() {
        let mut m = mems(2);
        m[1].timestamp = m[0].timestamp + chrono::Duration::seconds(5);
        let out = reciprocal_rank_fusion(
            &[vec![hit(&m[0], RetrievalMethod::Graph)], vec![hit(&m[1], RetrievalMethod::Keyword)]],
            60.0,
            5,
        );
        assert_eq!(out[0].memory.id, m[1].id);
    }

    #[test]
    fn test_is_deterministic_and_ignores_repeats() {
        let m = mems(4);
        let lists = vec![
            vec![
                hit(&m[3], RetrievalMethod::Graph),
                hit(&m[3], RetrievalMethod::Graph),
                hit(&m[0], RetrievalMethod::Graph),
            ],
            vec![hit(&m[2], RetrievalMethod::Semantic), hit(&m[1], RetrievalMethod::Semantic)],
        ];
        let first = reciprocal_rank_fusion(&lists, 60.0, 10);
        let second = reciprocal_rank_fusion(&lists, 60.0, 10);
        assert_eq!(first, second);

        let ids: Vec<&str> = first.iter().map(|r| r.memory.id.as_str()).collect();
        assert_eq!(ids, vec!["id-2", "id-3", "id-1", "id-0"]);
        assert!((first[1].score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input() {
        assert!(reciprocal_rank_fusion(&[], 60.0, 5).is_empty());
        assert!(reciprocal_rank_fusion(&[Vec::new()], 60.0, 5).is_empty());
    }
}
