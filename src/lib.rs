//! Attempt Export Worker Library
//!
//! Renders finished assessment attempts into archival PDFs. Exports are
//! queued when an attempt is submitted and processed by a periodic
//! scheduler; every stored artifact is named after the SHA-256 of its
//! content.
//!
//! ## Module Overview
//!
//! - `queue`, `job`, `lock`, `scheduler`: durable job queue, job state
//!   machine, cross-process claim lock and the scheduling loop
//! - `source`: boundary to the host application's attempt data
//! - `assembler`, `html`, `overlay`, `inliner`: the document pipeline that
//!   turns review markup into one self-contained HTML page
//! - `converter`: HTML to PDF through wkhtmltopdf
//! - `export`, `attachments`, `blob`: single attempt export and artifact storage
//! - `service`: manual re-export, overview, download and zip packaging
//! - `telemetry`: OpenTelemetry spans and log setup
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use attempt_export::{
//!     queue::{ExportJobQueue, MemoryJobStore},
//!     scheduler::batch_size,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let queue = ExportJobQueue::new(Arc::new(MemoryJobStore::new()));
//!     queue.enqueue(42).await.unwrap();
//!
//!     let size = batch_size(100, Duration::from_secs(60), Some(Duration::from_secs(2)));
//!     let claimed = queue.claim_batch(size).await.unwrap();
//!     assert_eq!(claimed.len(), 1);
//! }
//! ```

pub mod assembler;
pub mod attachments;
pub mod blob;
pub mod config;
pub mod converter;
pub mod error;
pub mod export;
pub mod html;
pub mod inliner;
pub mod job;
pub mod lock;
pub mod overlay;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod source;
pub mod telemetry;

pub use error::{ExportError, Result};
