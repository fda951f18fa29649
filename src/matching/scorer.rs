use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::db::models::{TMEntry, TMKey};
use crate::error::{CoreError, CoreResult};

use super::config::ScorerConfig;
use super::normalize::normalize_text;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MatchType {
    Exact,
    NearExact,
    High,
    Good,
    Fair,
    Low,
}

impl MatchType {
    pub fn from_percentage(percentage: u8) -> Self {
        match percentage {
            100.. => MatchType::Exact,
            95..=99 => MatchType::NearExact,
            85..=94 => MatchType::High,
            75..=84 => MatchType::Good,
            50..=74 => MatchType::Fair,
            _ => MatchType::Low,
        }
    }
}

/// Ephemeral scorer output. Persisted only if a user accepts it, at which
/// point provenance is recorded on the segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub target_text: String,
    pub match_percentage: u8,
    pub match_type: MatchType,
    pub source_entry: TMKey,
}

/// Rank TM candidates against a source text. Pure and deterministic: fixed
/// inputs always produce the same ordering and percentages.
///
/// Ordering: percentage desc, then usage count desc, then last-used desc,
/// then candidate insertion order (the sort is stable).
pub fn score(
    source_text: &str,
    candidates: &[TMEntry],
    target_language: &str,
    config: &ScorerConfig,
) -> CoreResult<Vec<MatchResult>> {
    let query = normalize_text(source_text);
    if query.is_empty() {
        return Err(CoreError::InvalidInput(
            "cannot score an empty source text".into(),
        ));
    }

    let mut results: Vec<MatchResult> = candidates
        .iter()
        .filter(|entry| entry.key.target_language == target_language)
        .map(|entry| {
            let candidate = normalize_text(&entry.key.normalized_source_text);
            let percentage = similarity_percentage(&query, &candidate, config);
            MatchResult {
                target_text: entry.target_text.clone(),
                match_percentage: percentage,
                match_type: MatchType::from_percentage(percentage),
                source_entry: entry.key.clone(),
            }
        })
        .filter(|result| config.include_low || result.match_type != MatchType::Low)
        .collect();

    // Stable sort keeps insertion order as the final tie-break.
    let usage: HashMap<&TMKey, (u64, chrono::DateTime<chrono::Utc>)> = candidates
        .iter()
        .map(|entry| (&entry.key, (entry.usage_count, entry.last_used)))
        .collect();
    results.sort_by(|a, b| {
        b.match_percentage
            .cmp(&a.match_percentage)
            .then_with(|| {
                let fallback = (0u64, chrono::DateTime::<chrono::Utc>::MIN_UTC);
                let ua = usage.get(&a.source_entry).copied().unwrap_or(fallback);
                let ub = usage.get(&b.source_entry).copied().unwrap_or(fallback);
                ub.0.cmp(&ua.0).then_with(|| ub.1.cmp(&ua.1))
            })
    });

    results.truncate(config.max_results);
    Ok(results)
}

/// Hybrid similarity in [0, 100]: token overlap (Dice) blended with
/// normalized Levenshtein. Exact normalized equality short-circuits to 100;
/// anything else tops out at 99 so only true equality classifies Exact.
fn similarity_percentage(query: &str, candidate: &str, config: &ScorerConfig) -> u8 {
    if query == candidate {
        return 100;
    }
    if candidate.is_empty() {
        return 0;
    }

    let token = token_dice(query, candidate);
    let edit = strsim::normalized_levenshtein(query, candidate);
    let blended =
        config.weight_token_overlap * token + config.weight_edit_distance * edit;

    ((blended * 100.0).round() as u8).min(99)
}

/// Dice coefficient over token multisets.
fn token_dice(a: &str, b: &str) -> f64 {
    let counts_a = token_counts(a);
    let counts_b = token_counts(b);
    let total = (a.split_whitespace().count() + b.split_whitespace().count()) as f64;
    if total == 0.0 {
        return 0.0;
    }

    let overlap: usize = counts_a
        .iter()
        .map(|(token, &count)| count.min(counts_b.get(token).copied().unwrap_or(0)))
        .sum();

    2.0 * overlap as f64 / total
}

fn token_counts(text: &str) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for token in text.split_whitespace() {
        *counts.entry(token).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(source: &str, target: &str, usage_count: u64, last_used_secs: i64) -> TMEntry {
        TMEntry {
            key: TMKey {
                normalized_source_text: normalize_text(source),
                source_language: "en".into(),
                target_language: "de".into(),
                domain_category: "general".into(),
            },
            target_text: target.into(),
            quality_score: 80,
            confidence_score: 80,
            usage_count,
            last_used: Utc.timestamp_opt(last_used_secs, 0).unwrap(),
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[test]
    fn empty_source_is_invalid_input() {
        let candidates = vec![entry("hello", "hallo", 1, 0)];
        assert!(matches!(
            score("   ", &candidates, "de", &ScorerConfig::default()),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn empty_candidate_pool_returns_empty_list() {
        let results = score("hello world", &[], "de", &ScorerConfig::default()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn exact_normalized_match_scores_one_hundred() {
        let candidates = vec![entry("Hello   WORLD", "hallo welt", 1, 0)];
        let results = score("hello world", &candidates, "de", &ScorerConfig::default()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].match_percentage, 100);
        assert_eq!(results[0].match_type, MatchType::Exact);
    }

    #[test]
    fn non_identical_text_never_scores_one_hundred() {
        let candidates = vec![entry(
            "the quick brown fox jumps over the lazy dog today",
            "x",
            1,
            0,
        )];
        let results = score(
            "the quick brown fox jumps over the lazy dog tonight",
            &candidates,
            "de",
            &ScorerConfig::default(),
        )
        .unwrap();
        assert!(results[0].match_percentage < 100);
    }

    #[test]
    fn scoring_is_deterministic() {
        let candidates = vec![
            entry("payment processing failed", "a", 3, 100),
            entry("payment processing succeeded", "b", 5, 50),
            entry("unrelated text entirely", "c", 9, 10),
        ];
        let first = score(
            "payment processing failed",
            &candidates,
            "de",
            &ScorerConfig::default(),
        )
        .unwrap();
        for _ in 0..5 {
            let again = score(
                "payment processing failed",
                &candidates,
                "de",
                &ScorerConfig::default(),
            )
            .unwrap();
            let pcts: Vec<u8> = again.iter().map(|r| r.match_percentage).collect();
            let first_pcts: Vec<u8> = first.iter().map(|r| r.match_percentage).collect();
            assert_eq!(pcts, first_pcts);
            let targets: Vec<&str> = again.iter().map(|r| r.target_text.as_str()).collect();
            let first_targets: Vec<&str> =
                first.iter().map(|r| r.target_text.as_str()).collect();
            assert_eq!(targets, first_targets);
        }
    }

    #[test]
    fn low_matches_are_excluded_by_default() {
        let candidates = vec![entry("completely different subject matter", "x", 1, 0)];
        let results = score(
            "invoice total due",
            &candidates,
            "de",
            &ScorerConfig::default(),
        )
        .unwrap();
        assert!(results.is_empty());

        let config = ScorerConfig {
            include_low: true,
            ..ScorerConfig::default()
        };
        let results = score("invoice total due", &candidates, "de", &config).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].match_type, MatchType::Low);
    }

    #[test]
    fn ties_break_on_usage_then_recency() {
        // Identical source text, so identical percentage; usage decides.
        let mut heavy = entry("shipping address", "heavy", 10, 100);
        heavy.key.domain_category = "logistics".into();
        let mut recent = entry("shipping address", "recent", 4, 900);
        recent.key.domain_category = "retail".into();
        let light = entry("shipping address", "light", 4, 100);

        let results = score(
            "shipping address",
            &[light.clone(), recent.clone(), heavy.clone()],
            "de",
            &ScorerConfig::default(),
        )
        .unwrap();

        let targets: Vec<&str> = results.iter().map(|r| r.target_text.as_str()).collect();
        assert_eq!(targets, vec!["heavy", "recent", "light"]);
    }

    #[test]
    fn result_set_is_capped() {
        let candidates: Vec<TMEntry> = (0..25)
            .map(|i| {
                let mut e = entry("order confirmation email", &format!("t{i}"), i, i as i64);
                e.key.domain_category = format!("d{i}");
                e
            })
            .collect();
        let results = score(
            "order confirmation email",
            &candidates,
            "de",
            &ScorerConfig::default(),
        )
        .unwrap();
        assert_eq!(results.len(), 10);

        let config = ScorerConfig {
            max_results: 20,
            ..ScorerConfig::default()
        };
        let results = score("order confirmation email", &candidates, "de", &config).unwrap();
        assert_eq!(results.len(), 20);
    }

    #[test]
    fn other_language_pairs_are_ignored() {
        let mut fr = entry("hello world", "bonjour", 1, 0);
        fr.key.target_language = "fr".into();
        let results = score("hello world", &[fr], "de", &ScorerConfig::default()).unwrap();
        assert!(results.is_empty());
    }

    // Ranking scenario: exact match first at 100%, near-duplicate in the
    // fuzzy bands above it, unrelated low-similarity entry excluded.
    #[test]
    fn ranks_exact_above_near_duplicate_and_drops_unrelated() {
        let source = "the updated privacy policy takes effect at the start of \
                      next month for all registered users";
        let near = "the updated privacy policy takes effect at the end of \
                    next month for all registered users";
        let candidates = vec![
            entry(near, "near", 50, 500),
            entry(source, "exact", 1, 0),
            entry("click here to reset your password", "unrelated", 99, 999),
        ];

        let results = score(source, &candidates, "de", &ScorerConfig::default()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].target_text, "exact");
        assert_eq!(results[0].match_percentage, 100);
        assert_eq!(results[1].target_text, "near");
        assert!(
            (85..=99).contains(&results[1].match_percentage),
            "near-duplicate scored {}",
            results[1].match_percentage
        );
    }
}
