pub mod config;
pub mod normalize;
pub mod scorer;

pub use config::ScorerConfig;
pub use normalize::normalize_text;
pub use scorer::{score, MatchResult, MatchType};

use crate::registry::{Segment, TranslationMethod};

/// Fraction of total source words satisfied by TM matches rather than fresh
/// translation, in [0, 1]. Zero for an empty unit.
pub fn leverage(segments: &[Segment]) -> f64 {
    let total: usize = segments.iter().map(|s| s.word_count()).sum();
    if total == 0 {
        return 0.0;
    }
    let matched: usize = segments
        .iter()
        .filter(|s| s.translation_method == TranslationMethod::MemoryMatch)
        .map(|s| s.word_count())
        .sum();
    matched as f64 / total as f64
}
