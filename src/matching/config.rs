/// Tunable knobs for the match scorer.
#[derive(Debug, Clone)]
pub struct ScorerConfig {
    /// Maximum number of results returned; bounds UI and network cost.
    pub max_results: usize,

    /// Include sub-50% matches in the result set (off by default).
    pub include_low: bool,

    /// Similarity blend weights (token overlap vs. edit distance).
    pub weight_token_overlap: f64,
    pub weight_edit_distance: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            max_results: 10,
            include_low: false,
            weight_token_overlap: 0.5,
            weight_edit_distance: 0.5,
        }
    }
}
