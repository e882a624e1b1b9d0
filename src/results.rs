//! Read side of a finalized drawing: result sets and the checklist join.
//!
//! An inspection checklist row carries a FIND NUMBER; the join returns every
//! balloon on the drawing with that number, ordered by page so a client can
//! step through the occurrences.

use crate::hash::ContentHash;
use crate::model::{BBox, Balloon, CacheEntry};
use serde::{Deserialize, Serialize};

/// Full result set for one drawing, plus the stored page rasters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub hash: ContentHash,
    pub page_count: usize,
    pub detections: Vec<Balloon>,
    /// Stored raster names in page order, e.g. `page_1.jpg`.
    pub page_images: Vec<String>,
}

impl ResultSet {
    pub fn new(entry: CacheEntry, page_images: Vec<String>) -> Self {
        Self {
            hash: entry.hash,
            page_count: entry.page_count,
            detections: entry.detections,
            page_images,
        }
    }
}

/// One place a FIND NUMBER appears.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub page: usize,
    pub bbox: BBox,
    pub image_width: u32,
    pub image_height: u32,
}

impl From<&Balloon> for Occurrence {
    fn from(b: &Balloon) -> Self {
        Self {
            page: b.page,
            bbox: b.bbox,
            image_width: b.image_width,
            image_height: b.image_height,
        }
    }
}

/// Canonical form of a FIND NUMBER as typed on a checklist.
///
/// Whitespace is trimmed; a purely numeric value loses its leading zeros so
/// `"007"` matches a balloon read as `"7"`. Anything else compares verbatim.
pub fn normalize_find_number(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let stripped = trimmed.trim_start_matches('0');
        return if stripped.is_empty() { "0" } else { stripped }.to_string();
    }
    trimmed.to_string()
}

/// Every balloon labelled `find_number`, ascending by page.
///
/// Within a page, occurrences are ordered top-to-bottom then left-to-right.
/// An unknown number yields an empty list.
pub fn find_occurrences(balloons: &[Balloon], find_number: &str) -> Vec<Occurrence> {
    let wanted = normalize_find_number(find_number);
    let mut hits: Vec<Occurrence> = balloons
        .iter()
        .filter(|b| normalize_find_number(&b.balloon_number) == wanted)
        .map(Occurrence::from)
        .collect();
    hits.sort_by_key(|o| (o.page, o.bbox.y1, o.bbox.x1));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balloon(number: &str, page: usize, y: u32) -> Balloon {
        Balloon {
            balloon_number: number.into(),
            page,
            bbox: BBox::new(10, y, 20, y + 10),
            image_width: 100,
            image_height: 100,
        }
    }

    #[test]
    fn find_returns_pages_ascending() {
        let balloons = vec![
            balloon("12", 3, 0),
            balloon("7", 2, 0),
            balloon("12", 1, 50),
            balloon("12", 1, 5),
        ];
        let hits = find_occurrences(&balloons, "12");
        let pages: Vec<usize> = hits.iter().map(|o| o.page).collect();
        assert_eq!(pages, vec![1, 1, 3]);
        assert_eq!(hits[0].bbox.y1, 5);
    }

    #[test]
    fn find_number_is_normalised() {
        let balloons = vec![balloon("7", 2, 0)];
        assert_eq!(find_occurrences(&balloons, " 007 ").len(), 1);
        assert!(find_occurrences(&balloons, "70").is_empty());
    }

    #[test]
    fn unknown_number_is_empty() {
        assert!(find_occurrences(&[balloon("1", 1, 0)], "99").is_empty());
        assert!(find_occurrences(&[], "1").is_empty());
    }

    #[test]
    fn non_numeric_values_compare_verbatim() {
        assert_eq!(normalize_find_number("A-01"), "A-01");
        assert_eq!(normalize_find_number("000"), "0");
    }
}
