//! Shared fixtures: a scripted renderer and detector, so engine behaviour can
//! be tested without pdfium or a network provider.
//!
//! Test "PDFs" are tiny byte strings such as `%PDF-1.4 pages=3 id=a`; the fake
//! renderer reads `pages=N` from the stored upload.

#![allow(dead_code)]

use async_trait::async_trait;
use ga_balloons::{
    BBox, BalloonEngine, BalloonError, Detection, DetectionPipeline, EngineConfig, JobState,
    JobStatus, PageError, PageRenderer,
};
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use uuid::Uuid;

pub const PAGE_WIDTH: u32 = 40;
pub const PAGE_HEIGHT: u32 = 30;

pub fn pdf(pages: usize, id: &str) -> Vec<u8> {
    format!("%PDF-1.4 pages={pages} id={id}").into_bytes()
}

#[derive(Debug, Default)]
pub struct FakeRenderer;

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn page_count(&self, pdf_path: &Path) -> Result<usize, BalloonError> {
        let bytes = tokio::fs::read(pdf_path)
            .await
            .map_err(|e| BalloonError::Internal(e.to_string()))?;
        let text = String::from_utf8_lossy(&bytes);
        text.split_whitespace()
            .find_map(|tok| tok.strip_prefix("pages="))
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| BalloonError::CorruptPdf {
                path: PathBuf::from(pdf_path),
                detail: "no page tree".into(),
            })
    }

    async fn render_page(&self, _pdf_path: &Path, page: usize) -> Result<DynamicImage, PageError> {
        let shade = (page * 20 % 255) as u8;
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            PAGE_WIDTH,
            PAGE_HEIGHT,
            Rgb([shade, shade, shade]),
        )))
    }
}

/// Detector driven by a per-page script.
///
/// - `failing` pages return `DetectionFailed` until removed.
/// - With a gate, every call waits for one permit, so a test can release
///   pages one at a time.
#[derive(Debug, Default)]
pub struct ScriptedDetector {
    script: HashMap<usize, Vec<Detection>>,
    failing: Mutex<HashSet<usize>>,
    calls: Mutex<Vec<usize>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: usize, numbers: &[&str]) -> Self {
        let detections = numbers
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let x = 2 + i as u32 * 6;
                Detection {
                    balloon_number: n.to_string(),
                    bbox: BBox::new(x, 2, x + 5, 7),
                }
            })
            .collect();
        self.script.insert(page, detections);
        self
    }

    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn fail_page(&self, page: usize) {
        self.failing.lock().unwrap().insert(page);
    }

    pub fn heal_page(&self, page: usize) {
        self.failing.lock().unwrap().remove(&page);
    }

    /// Pages detected so far, in call order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, page: usize) -> usize {
        self.calls().iter().filter(|&&p| p == page).count()
    }
}

#[async_trait]
impl DetectionPipeline for ScriptedDetector {
    async fn detect(&self, page: usize, _image: &DynamicImage) -> Result<Vec<Detection>, PageError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.calls.lock().unwrap().push(page);
        if self.failing.lock().unwrap().contains(&page) {
            return Err(PageError::DetectionFailed {
                page,
                retries: 0,
                detail: "scripted failure".into(),
            });
        }
        Ok(self.script.get(&page).cloned().unwrap_or_default())
    }
}

/// The three-page drawing used throughout: balloon 12 on pages 1 and 3,
/// balloon 7 on page 2.
pub fn three_page_script() -> ScriptedDetector {
    ScriptedDetector::new()
        .page(1, &["12"])
        .page(2, &["7"])
        .page(3, &["12"])
}

pub fn config(dir: &TempDir) -> EngineConfig {
    EngineConfig::builder()
        .data_dir(dir.path())
        .max_upload_bytes(4096)
        .build()
        .unwrap()
}

pub fn engine_with(dir: &TempDir, detector: Arc<ScriptedDetector>) -> BalloonEngine {
    BalloonEngine::new(config(dir), Arc::new(FakeRenderer), detector)
}

/// Poll until the job reaches a terminal state.
pub async fn wait_terminal(engine: &BalloonEngine, job_id: Uuid) -> JobStatus {
    wait_until(engine, job_id, |s| s.state.is_terminal()).await
}

pub async fn wait_until(
    engine: &BalloonEngine,
    job_id: Uuid,
    pred: impl Fn(&JobStatus) -> bool,
) -> JobStatus {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let status = engine.status(job_id).expect("job should be tracked");
            if pred(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not reach the expected state in time")
}

pub fn assert_state(status: &JobStatus, state: JobState) {
    assert_eq!(status.state, state, "unexpected job state: {status:?}");
}
