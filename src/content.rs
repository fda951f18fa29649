use serde::{Deserialize, Serialize};

use crate::registry::Segment;

/// One section of analyzed source content, as supplied by the upstream
/// content-analysis collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSection {
    pub title: String,
    pub content: String,
}

/// Seed fresh segments for a translation unit, one per section.
///
/// Segment ids are deterministic (`"<unit_id>:<index>"`): the same logical
/// section of source content always regenerates to the same id, which keeps
/// identity stable across restore cycles.
pub fn seed_segments(unit_id: &str, sections: &[ContentSection]) -> Vec<Segment> {
    sections
        .iter()
        .enumerate()
        .map(|(index, section)| {
            Segment::new(format!("{unit_id}:{index}"), section.content.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SegmentStatus;

    fn sections() -> Vec<ContentSection> {
        vec![
            ContentSection {
                title: "Intro".into(),
                content: "Welcome to the device".into(),
            },
            ContentSection {
                title: "Safety".into(),
                content: "Do not submerge the device in water".into(),
            },
        ]
    }

    #[test]
    fn seeds_one_pending_segment_per_section() {
        let segments = seed_segments("unit-1", &sections());
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(|s| s.status == SegmentStatus::Pending));
        assert!(segments.iter().all(|s| s.target_text.is_empty()));
        assert_eq!(segments[1].source_text, "Do not submerge the device in water");
    }

    #[test]
    fn segment_ids_are_stable_across_reseeding() {
        let first = seed_segments("unit-1", &sections());
        let second = seed_segments("unit-1", &sections());
        let first_ids: Vec<&str> = first.iter().map(|s| s.id.as_str()).collect();
        let second_ids: Vec<&str> = second.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(first_ids, second_ids);
        assert_eq!(first_ids, vec!["unit-1:0", "unit-1:1"]);
    }
}
