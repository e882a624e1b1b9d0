//! # ga-balloons
//!
//! Resumable balloon detection for general-arrangement (GA) drawings.
//!
//! A balloon is a circled numeral on a drawing that points at a FIND NUMBER in
//! the bill of materials. Inspectors check each BOM row against the drawing;
//! this crate finds every balloon once, caches the result by the content of
//! the PDF, and answers "where is FIND NUMBER 12?" instantly afterwards.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload bytes
//!  │
//!  ├─ 1. Hash     sha256 of the raw bytes is the drawing's identity
//!  ├─ 2. Decide   cached result │ resumable checkpoint │ fresh job
//!  ├─ 3. Render   rasterise one page via pdfium (spawn_blocking), store JPEG
//!  ├─ 4. Detect   VLM reads the balloons on the page
//!  ├─ 5. Commit   append the page to the checkpoint (atomic rewrite)
//!  └─ 6. Finalize write the cache entry, drop the checkpoint
//! ```
//!
//! Jobs run in the background; callers poll [`JobStatus`] and may cancel.
//! A cancelled or failed job leaves its checkpoint behind, so a later resume
//! continues after the last committed page instead of starting over.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ga_balloons::{BalloonEngine, EngineConfig, SessionId, UploadOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / ...
//!     let engine = BalloonEngine::from_config(EngineConfig::default())?;
//!     let bytes = std::fs::read("drawing.pdf")?;
//!     let session = SessionId::generate();
//!
//!     match engine.upload(&bytes, &session, false).await? {
//!         UploadOutcome::Cached(summary) => println!("{} balloons", summary.detection_count),
//!         UploadOutcome::Resumable(cp) => {
//!             let job = engine.resume(&bytes, &session).await?;
//!             println!("resuming after page {} as job {job}", cp.processed_pages);
//!         }
//!         UploadOutcome::Started { job_id, .. } => println!("job {job_id} started"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ga-balloons` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod engine;
pub mod error;
pub mod hash;
pub mod jobs;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod results;
pub mod server;
pub mod session;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::{BalloonEngine, ProbeOutcome, UploadOutcome};
pub use error::{BalloonError, ErrorKind, PageError};
pub use hash::ContentHash;
pub use jobs::{JobManager, ReapReport};
pub use model::{BBox, Balloon, CacheEntry, CacheSummary, Checkpoint, CheckpointSummary, Detection};
pub use pipeline::{DetectionPipeline, PageRenderer};
pub use progress::{JobState, JobStatus};
pub use results::{find_occurrences, Occurrence, ResultSet};
pub use session::{SessionId, SessionRegistry};
