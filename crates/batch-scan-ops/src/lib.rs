//! Batch-Scan Operations Layer
//!
//! This crate provides a clean, typed API for all batch-scan operations.
//! It can be consumed by both the CLI and REST API, ensuring consistent
//! behavior and type-safe interactions.
//!
//! ## Architecture
//!
//! - **CheckpointStore**: durable ledger of processed / failed work items
//! - **ScanExecutor**: mirror, workspace, commit resolution, analysis for one item
//! - **Scheduler**: bounded worker pool over chunked input
//! - **JobRegistry** / **BatchService**: in-memory job tracking for service mode
//! - **UploadStore**: uploaded CSVs and their persisted scan status
//! - **OpsContext**: the facade the CLI and API call
//!
//! ## Usage
//!
//! ```rust,no_run
//! use batch_scan_ops::{OpsContext, ScanRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = OpsContext::default_config()?;
//!     let response = ctx
//!         .scan(ScanRequest::new("commits.csv"), &CancellationToken::new())
//!         .await?;
//!
//!     println!("{} succeeded, {} failed", response.summary.succeeded, response.summary.failed);
//!     Ok(())
//! }
//! ```

mod analyzer;
mod checkpoint;
mod config;
mod context;
mod error;
mod executor;
mod input;
mod registry;
mod requests;
mod responses;
mod scheduler;
mod service;
mod uploads;

// Re-export public API
pub use analyzer::{AnalysisRequest, Analyzer, SonarScanner};
pub use checkpoint::{CheckpointStats, CheckpointStore, RepoSummary};
pub use config::{Config, CONFIG_KEYS};
pub use context::OpsContext;
pub use error::{OpsError, OpsResult, ScanError};
pub use executor::{AnalyzerSettings, ScanExecutor, ScanRunner};
pub use input::{summarize, InputChunk, InputReader, InputSummary, WorkSource};
pub use registry::{JobHandle, JobRegistry};
pub use requests::*;
pub use responses::*;
pub use scheduler::Scheduler;
pub use service::BatchService;
pub use uploads::UploadStore;
