//! Common utilities and shared types for gbp-publisher.
//!
//! This crate provides foundational components used across all gbp-publisher crates:
//!
//! - **Configuration**: Worker settings via [`Config`]
//! - **Error handling**: Infrastructure error types via [`AppError`] and [`AppResult`]
//! - **ID Generation**: ULID-based identifiers for jobs and rows via [`IdGenerator`]
//! - **Metrics**: Pipeline counters via [`Metrics`]
//!
//! # Example
//!
//! ```no_run
//! use gbp_common::{AppResult, Config, IdGenerator};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::new();
//!     println!("queue {} job {}", config.worker.queue_name, id_gen.generate());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;
pub mod metrics;

pub use config::Config;
pub use error::{AppError, AppResult, RetryClass};
pub use id::IdGenerator;
pub use metrics::{Metrics, MetricsSnapshot, get_metrics};
