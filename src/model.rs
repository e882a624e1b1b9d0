//! Data model shared by the stores, the job manager, and the HTTP layer.

use crate::hash::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bounding box in page-pixel space of the rendered raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// True when the box encloses no pixels.
    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }
}

/// One balloon as returned by a detection pipeline for a single page.
///
/// The page number is attached by the job that requested the detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub balloon_number: String,
    pub bbox: BBox,
}

/// A detected balloon, joined to a BOM row by `balloon_number` (FIND NUMBER).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Balloon {
    pub balloon_number: String,
    /// 1-based page number.
    pub page: usize,
    pub bbox: BBox,
    /// Size of the raster the box refers to, so clients can rescale.
    #[serde(default)]
    pub image_width: u32,
    #[serde(default)]
    pub image_height: u32,
}

/// Finalized, immutable result set for one drawing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: ContentHash,
    pub page_count: usize,
    pub detections: Vec<Balloon>,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn summary(&self) -> CacheSummary {
        CacheSummary {
            hash: self.hash.clone(),
            page_count: self.page_count,
            detection_count: self.detections.len(),
        }
    }
}

/// Partial progress of a run, enough to resume after page `processed_pages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub hash: ContentHash,
    pub processed_pages: usize,
    pub total_pages: usize,
    pub balloons_so_far: Vec<Balloon>,
    pub last_update: DateTime<Utc>,
}

impl Checkpoint {
    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            hash: self.hash.clone(),
            processed_pages: self.processed_pages,
            total_pages: self.total_pages,
            balloon_count: self.balloons_so_far.len(),
            last_update: self.last_update,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSummary {
    pub hash: ContentHash,
    pub page_count: usize,
    pub detection_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub hash: ContentHash,
    pub processed_pages: usize,
    pub total_pages: usize,
    pub balloon_count: usize,
    pub last_update: DateTime<Utc>,
}
