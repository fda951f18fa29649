/// Case-fold and collapse whitespace so that cosmetic differences never
/// affect match identity or scoring.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(|token| token.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_folds_case() {
        assert_eq!(normalize_text("  Hello\t WORLD \n"), "hello world");
    }

    #[test]
    fn empty_and_whitespace_normalize_to_empty() {
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text(" \t\n"), "");
    }

    #[test]
    fn unicode_case_folding() {
        assert_eq!(normalize_text("Grüße AUS Köln"), "grüße aus köln");
    }
}
