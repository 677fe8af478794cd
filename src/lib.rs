//! # rustpaperbot
//!
//! Paper search on Google Scholar and Crossref, cross-validation of the two,
//! a local SQLite store, deduplication and PDF acquisition.
//!
//! ## Modules
//!
//! - [`gscholar`] - Google Scholar result scraping (HTTP or headless browser)
//! - [`crossref`] - Crossref API client
//! - [`validator`] - Reconciliation of Scholar results against Crossref
//! - [`store`] - SQLite persistence
//! - [`dedup`] - Backup and deduplication
//! - [`download`] - PDF acquisition from direct links and mirrors
//! - [`pipeline`] - Session context wiring everything together
//! - [`record`] - The shared paper record
//! - [`config`] - TOML configuration
//! - [`cookies`] - Scholar cookie persistence
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rustpaperbot::{config::AppConfig, pipeline::SessionContext};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = SessionContext::open(AppConfig::load(None)?).await?;
//!     let report = session.validate("digital workplace", 10, Some(2015)).await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cookies;
pub mod crossref;
pub mod dedup;
pub mod download;
pub mod error;
pub mod gscholar;
pub mod pipeline;
pub mod record;
pub mod store;
pub mod validator;

pub use error::{PaperError, Result};
pub use record::{PaperRecord, VerificationStatus};
