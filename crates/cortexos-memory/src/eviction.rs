// Eviction scoring for over-budget memory tiers.

use chrono::Utc;

use crate::types::MemoryChunk;

/// Scores a chunk for eviction priority: lower score evicts first.
///
/// `score = importance * decay_factor^elapsed_days * (1 + log2(1 + access_count))`
///
/// Entries at or above `MemoryChunk::PROTECTED_THRESHOLD` importance never
/// reach this scoring — `evict_if_over` filters them out before scoring.
pub fn score(chunk: &MemoryChunk, now: chrono::DateTime<Utc>) -> f64 {
    let elapsed_days = (now - chunk.accessed_at).num_seconds().max(0) as f64 / 86_400.0;
    let recency = chunk.decay_factor.powf(elapsed_days);
    let frequency = 1.0 + ((1 + chunk.access_count.max(0)) as f64).log2();
    chunk.importance * recency * frequency
}

/// Returns the ids of chunks to evict so that at most `max_count` chunks
/// remain, skipping any chunk whose importance is at or above
/// `protected_threshold`. Ties broken by ascending score then creation
/// time so eviction order is deterministic.
pub fn evict_if_over(
    chunks: &[MemoryChunk],
    max_count: usize,
    protected_threshold: f64,
    now: chrono::DateTime<Utc>,
) -> Vec<String> {
    if chunks.len() <= max_count {
        return Vec::new();
    }

    let mut candidates: Vec<(&MemoryChunk, f64)> = chunks
        .iter()
        .filter(|c| c.importance < protected_threshold)
        .map(|c| (c, score(c, now)))
        .collect();

    let protected_count = chunks.len() - candidates.len();
    let over_budget = chunks.len().saturating_sub(max_count);
    if over_budget == 0 || protected_count >= chunks.len() {
        return Vec::new();
    }

    candidates.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.created_at.cmp(&b.0.created_at))
    });

    candidates
        .into_iter()
        .take(over_budget)
        .map(|(c, _)| c.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn chunk(id: &str, importance: f64, accessed_days_ago: i64, access_count: i64) -> MemoryChunk {
        let now = Utc::now();
        MemoryChunk {
            id: id.to_string(),
            content: "x".to_string(),
            tier: cortexos_types::MemoryType::Episodic,
            session_id: None,
            project_id: None,
            source: "test".to_string(),
            source_path: None,
            source_mtime: None,
            source_size: None,
            source_hash: None,
            created_at: now - Duration::days(accessed_days_ago),
            token_count: 10,
            metadata: None,
            importance,
            accessed_at: now - Duration::days(accessed_days_ago),
            access_count,
            decay_factor: MemoryChunk::DEFAULT_DECAY_FACTOR,
        }
    }

    #[test]
    fn protected_entries_are_never_selected_for_eviction() {
        let now = Utc::now();
        let chunks = vec![
            chunk("protected", 0.95, 400, 0),
            chunk("stale", 0.2, 400, 0),
        ];
        let evicted = evict_if_over(&chunks, 1, MemoryChunk::PROTECTED_THRESHOLD, now);
        assert_eq!(evicted, vec!["stale".to_string()]);
    }

    #[test]
    fn lower_scoring_entries_evict_first() {
        let now = Utc::now();
        let chunks = vec![
            chunk("fresh_frequent", 0.5, 0, 50),
            chunk("old_rare", 0.5, 365, 0),
        ];
        let evicted = evict_if_over(&chunks, 1, MemoryChunk::PROTECTED_THRESHOLD, now);
        assert_eq!(evicted, vec!["old_rare".to_string()]);
    }

    #[test]
    fn within_budget_evicts_nothing() {
        let now = Utc::now();
        let chunks = vec![chunk("a", 0.5, 0, 0)];
        assert!(evict_if_over(&chunks, 5, MemoryChunk::PROTECTED_THRESHOLD, now).is_empty());
    }
}
